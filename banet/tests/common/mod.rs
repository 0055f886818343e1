use std::{collections::BTreeMap, path::Path};

use banet::{
    loader::{JsonTileLoader, TileFile, TileLoader, IMAGE_BANDS, MASK_BANDS},
    tile::{TileId, IMAGES_DIR, MASKS_DIR},
};
use chrono::NaiveDate;

pub const SIDE: usize = 4;

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Writes an image / mask pair; every mask pixel holds `burned`.
pub fn write_tile(root: &Path, location: &str, day: NaiveDate, burned: f32) -> TileId {
    let id = TileId::new(location.to_string(), day, 0, 0);
    let name = format!("{}.json", id.file_stem());
    let plane = SIDE * SIDE;

    let image = IMAGE_BANDS
        .iter()
        .enumerate()
        .map(|(band, name)| {
            let values = (0..plane)
                .map(|pixel| Some(0.05 * band as f32 + 0.01 * pixel as f32))
                .collect();
            (name.to_string(), values)
        })
        .collect::<BTreeMap<String, Vec<Option<f32>>>>();
    JsonTileLoader
        .write(&root.join(IMAGES_DIR).join(&name), &TileFile::new(SIDE, SIDE, image))
        .unwrap();

    let mask = BTreeMap::from([(MASK_BANDS[0].to_string(), vec![Some(burned); plane])]);
    JsonTileLoader
        .write(&root.join(MASKS_DIR).join(&name), &TileFile::new(SIDE, SIDE, mask))
        .unwrap();
    id
}

/// Daily tiles over March of `year` at one location, burned from the 10th to the 14th.
pub fn write_month(root: &Path, location: &str, year: i32) {
    for day in 1..=31 {
        let burned = if (10..=14).contains(&day) { 1.0 } else { 0.0 };
        write_tile(root, location, date(year, 3, day), burned);
    }
}
