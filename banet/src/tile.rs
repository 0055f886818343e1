use std::{
    ffi::OsStr,
    fmt::Display,
    fs::read_dir,
    path::{Component, Path, PathBuf},
};

use chrono::{Datelike, NaiveDate};
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::error::{BaNetError, Result};

pub const IMAGES_DIR: &str = "images";
pub const MASKS_DIR: &str = "masks";

const DATE_FORMATS: [&str; 2] = ["%Y%m%d", "%Y-%m-%d"];

/// Identity of one tile: where it is and which day it shows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, new)]
pub struct TileId {
    pub location: String,
    pub date: NaiveDate,
    pub row: usize,
    pub col: usize,
}

/// Spatial part of a tile identity, shared by every tile of an episode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationKey {
    pub location: String,
    pub row: usize,
    pub col: usize,
}

impl TileId {
    /// Parses `{location}_{date}_{row}_{col}.{ext}`.
    pub fn parse(path: &Path) -> Result<Self> {
        let malformed = |reason: String| BaNetError::MalformedFilename {
            path: path.to_path_buf(),
            reason,
        };

        let stem = path
            .file_stem()
            .and_then(OsStr::to_str)
            .ok_or_else(|| malformed("file stem is not valid utf-8".into()))?;
        let fields = stem.split('_').collect::<Vec<&str>>();
        let [location, date, row, col] = fields.as_slice() else {
            return Err(malformed(format!(
                "expected 4 '_'-separated fields, found {}",
                fields.len()
            )));
        };

        let date = DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(date, format).ok())
            .ok_or_else(|| malformed(format!("unparseable date {date:?}")))?;
        let row = row
            .parse::<usize>()
            .map_err(|e| malformed(format!("row {row:?}: {e}")))?;
        let col = col
            .parse::<usize>()
            .map_err(|e| malformed(format!("col {col:?}: {e}")))?;

        Ok(Self {
            location: location.to_string(),
            date,
            row,
            col,
        })
    }

    pub fn location_key(&self) -> LocationKey {
        LocationKey {
            location: self.location.clone(),
            row: self.row,
            col: self.col,
        }
    }

    /// File stem in the layout `parse` accepts.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.location,
            self.date.format("%Y%m%d"),
            self.row,
            self.col
        )
    }
}

impl Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} r{} c{}", self.location, self.date, self.row, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct TileRecord {
    pub id: TileId,
    pub path: PathBuf,
}

/// Maps an image tile path to the path of its label tile.
#[derive(Debug, Clone, new)]
pub struct LabelPaths {
    input_product: String,
    target_product: String,
}

impl Default for LabelPaths {
    fn default() -> Self {
        Self::new(String::from("VIIRS750"), String::from("MCD64A1C6"))
    }
}

impl LabelPaths {
    pub fn label_for(&self, image: &Path) -> PathBuf {
        let swapped = image
            .components()
            .map(|component| match component {
                Component::Normal(name) if name == IMAGES_DIR => Component::Normal(OsStr::new(MASKS_DIR)),
                other => other,
            })
            .collect::<PathBuf>();
        if self.input_product.is_empty() {
            return swapped;
        }
        PathBuf::from(
            swapped
                .to_string_lossy()
                .replace(&self.input_product, &self.target_product),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct TileIndex {
    records: Vec<TileRecord>,
}

impl TileIndex {
    pub fn from_records(records: Vec<TileRecord>) -> Self {
        Self { records }
    }

    /// Indexes every `*.{extension}` file directly under `dir`, sorted by path.
    pub fn scan(dir: &Path, extension: &str) -> Result<Self> {
        let entries = read_dir(dir).map_err(|e| BaNetError::io(dir, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| BaNetError::io(dir, e))?.path();
            if path.is_file() && path.extension().and_then(OsStr::to_str) == Some(extension) {
                paths.push(path);
            }
        }
        paths.sort();

        let records = paths
            .into_iter()
            .map(|path| TileId::parse(&path).map(|id| TileRecord::new(id, path)))
            .collect::<Result<Vec<TileRecord>>>()?;
        tracing::debug!("indexed {} tiles under {}", records.len(), dir.display());

        Ok(Self { records })
    }

    /// Splits into `(train, valid)`; validation holds the tiles dated in `valid_year`.
    pub fn split_by_year(self, valid_year: i32) -> (Self, Self) {
        let (valid, train): (Vec<TileRecord>, Vec<TileRecord>) = self
            .records
            .into_iter()
            .partition(|record| record.id.date.year() == valid_year);
        (Self { records: train }, Self { records: valid })
    }

    pub fn records(&self) -> &[TileRecord] {
        &self.records
    }

    /// Tiles of one location dated within `start..=end`, in date order.
    pub fn sequence(&self, key: &LocationKey, start: NaiveDate, end: NaiveDate) -> Vec<&TileRecord> {
        let mut tiles = self
            .records
            .iter()
            .filter(|record| record.id.location_key() == *key && (start..=end).contains(&record.id.date))
            .collect::<Vec<&TileRecord>>();
        tiles.sort_by_key(|record| record.id.date);
        tiles
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_both_date_layouts() {
        let compact = TileId::parse(Path::new("images/PT_20170615_3_12.json")).unwrap();
        assert_eq!(compact, TileId::new("PT".into(), date(2017, 6, 15), 3, 12));

        let dashed = TileId::parse(Path::new("PT_2017-06-15_3_12.bin")).unwrap();
        assert_eq!(dashed, compact);
        assert_eq!(compact.file_stem(), "PT_20170615_3_12");
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = TileId::parse(Path::new("PT_20170615_3.json")).unwrap_err();
        assert!(matches!(err, BaNetError::MalformedFilename { .. }));

        let err = TileId::parse(Path::new("P_T_20170615_3_12.json")).unwrap_err();
        assert!(matches!(err, BaNetError::MalformedFilename { .. }));
    }

    #[test]
    fn rejects_bad_date_and_row() {
        assert!(matches!(
            TileId::parse(Path::new("PT_2017jun15_3_12.json")),
            Err(BaNetError::MalformedFilename { .. })
        ));
        assert!(matches!(
            TileId::parse(Path::new("PT_20170615_x_12.json")),
            Err(BaNetError::MalformedFilename { .. })
        ));
    }

    #[test]
    fn label_path_swaps_folder_and_product() {
        let labels = LabelPaths::default();
        let label = labels.label_for(Path::new("/data/VIIRS750/images/PT_20170615_0_0.json"));
        assert_eq!(label, PathBuf::from("/data/MCD64A1C6/masks/PT_20170615_0_0.json"));
    }

    #[test]
    fn scan_filters_sorts_and_splits() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["B_20180101_0_0.json", "A_20170102_0_0.json", "A_20170101_0_0.json", "notes.txt"] {
            fs::write(dir.path().join(name), b"{}").unwrap();
        }

        let index = TileIndex::scan(dir.path(), "json").unwrap();
        let ids = index
            .records()
            .iter()
            .map(|record| record.id.file_stem())
            .collect::<Vec<String>>();
        assert_eq!(ids, ["A_20170101_0_0", "A_20170102_0_0", "B_20180101_0_0"]);

        let (train, valid) = index.split_by_year(2018);
        assert_eq!(train.len(), 2);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid.records()[0].id.location, "B");
    }

    #[test]
    fn sequence_selects_one_location_by_date() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "A_20170105_0_0.json",
            "A_20170103_0_0.json",
            "A_20170101_0_0.json",
            "A_20170103_0_1.json",
            "B_20170103_0_0.json",
            "A_20170110_0_0.json",
        ] {
            fs::write(dir.path().join(name), b"{}").unwrap();
        }
        let index = TileIndex::scan(dir.path(), "json").unwrap();

        let key = LocationKey {
            location: "A".into(),
            row: 0,
            col: 0,
        };
        let dates = index
            .sequence(&key, date(2017, 1, 2), date(2017, 1, 5))
            .iter()
            .map(|record| record.id.date)
            .collect::<Vec<NaiveDate>>();
        assert_eq!(dates, [date(2017, 1, 3), date(2017, 1, 5)]);

        assert!(index.sequence(&key, date(2018, 1, 1), date(2018, 12, 31)).is_empty());
    }

    #[test]
    fn scan_fails_on_malformed_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A_20170101_0.json"), b"{}").unwrap();
        assert!(matches!(
            TileIndex::scan(dir.path(), "json"),
            Err(BaNetError::MalformedFilename { .. })
        ));
    }
}
