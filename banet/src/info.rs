use std::{fs, path::Path};

use derive_new::new;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::{
    error::{BaNetError, Result},
    loader::{load_label, TileLoader},
    tile::{LabelPaths, TileIndex, TileRecord},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct InfoRow {
    pub tile: TileRecord,
    pub burned_mass: f32,
}

/// Burned-area mass of every tile of one split, in tile index order.
///
/// Building it loads every label tile, so it is computed once per split and
/// shared read-only with the samplers and loader workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfoTable {
    rows: Vec<InfoRow>,
}

impl InfoTable {
    pub fn build(index: &TileIndex, loader: &dyn TileLoader, labels: &LabelPaths) -> Result<Self> {
        let rows = index
            .records()
            .par_iter()
            .map(|record| -> Result<InfoRow> {
                let label = labels.label_for(&record.path);
                let mask = load_label(loader, &record.path, &label)?;
                Ok(InfoRow::new(record.clone(), mask.sum().max(0.0)))
            })
            .collect::<Result<Vec<InfoRow>>>()?;

        let table = Self { rows };
        tracing::info!(
            "info table built: {} tiles, total burned mass {:.1}",
            table.len(),
            table.total_burned()
        );
        Ok(table)
    }

    pub fn from_rows(rows: Vec<InfoRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[InfoRow] {
        &self.rows
    }

    pub fn get(&self, index: usize) -> Option<&InfoRow> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_burned(&self) -> f32 {
        self.rows.iter().map(|row| row.burned_mass).sum()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self).map_err(|e| BaNetError::Decode {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })?;
        fs::write(path, json).map_err(|e| BaNetError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| BaNetError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| BaNetError::Decode {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })
    }

    /// Reuses the table stored at `cache` when it covers exactly the tiles of
    /// `index`, in order. Otherwise builds it and rewrites the cache.
    pub fn cached(cache: &Path, index: &TileIndex, loader: &dyn TileLoader, labels: &LabelPaths) -> Result<Self> {
        if cache.is_file() {
            match Self::load(cache) {
                Ok(table) if table.covers(index) => {
                    tracing::info!("reusing info table {}", cache.display());
                    return Ok(table);
                }
                Ok(_) => tracing::info!("info table {} is stale, rebuilding", cache.display()),
                Err(err) => tracing::warn!("ignoring unreadable info table: {err}"),
            }
        }

        let table = Self::build(index, loader, labels)?;
        table.save(cache)?;
        Ok(table)
    }

    fn covers(&self, index: &TileIndex) -> bool {
        self.rows.len() == index.len()
            && self
                .rows
                .iter()
                .zip(index.records())
                .all(|(row, record)| row.tile == *record)
    }
}
