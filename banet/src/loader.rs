use std::{collections::BTreeMap, fs, path::Path, sync::Arc};

use clap::ValueEnum;
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::error::{BaNetError, Result};

pub const IMAGE_BANDS: [&str; 4] = ["Red", "NIR", "MIR", "FRP"];
pub const MASK_BANDS: [&str; 1] = ["bafrac"];

/// On-disk tile: named row-major bands, `None` marking no-data pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, new)]
pub struct TileFile {
    pub height: usize,
    pub width: usize,
    pub bands: BTreeMap<String, Vec<Option<f32>>>,
}

/// Dense channel-major pixels of one tile.
#[derive(Debug, Clone, PartialEq, new)]
pub struct TileArrays {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub values: Vec<f32>,
}

impl TileArrays {
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        let plane = self.height * self.width;
        &mut self.values[channel * plane..(channel + 1) * plane]
    }

    pub fn sum(&self) -> f32 {
        self.values.iter().sum()
    }
}

pub trait TileLoader: Send + Sync {
    fn extension(&self) -> &'static str;

    fn read(&self, path: &Path) -> Result<TileFile>;

    fn write(&self, path: &Path, tile: &TileFile) -> Result<()>;

    /// Input bands with no-data zeroed and fire radiative power log-scaled.
    fn load_image(&self, path: &Path) -> Result<TileArrays> {
        let mut arrays = select_bands(path, &self.read(path)?, &IMAGE_BANDS)?;
        let frp = arrays.channel_mut(IMAGE_BANDS.len() - 1);
        for value in frp.iter_mut() {
            *value = value.ln_1p();
            if value.is_nan() {
                *value = 0.0;
            }
        }
        Ok(arrays)
    }

    fn load_mask(&self, path: &Path) -> Result<TileArrays> {
        select_bands(path, &self.read(path)?, &MASK_BANDS)
    }
}

/// Loads the label paired with `image`, failing with `MissingLabel` when it is absent.
pub fn load_label(loader: &dyn TileLoader, image: &Path, label: &Path) -> Result<TileArrays> {
    if !label.is_file() {
        return Err(BaNetError::MissingLabel {
            image: image.to_path_buf(),
            label: label.to_path_buf(),
        });
    }
    loader.load_mask(label)
}

fn select_bands(path: &Path, tile: &TileFile, bands: &[&str]) -> Result<TileArrays> {
    let plane = tile.height * tile.width;
    let mut values = Vec::with_capacity(plane * bands.len());

    for band in bands {
        let data = tile.bands.get(*band).ok_or_else(|| BaNetError::MissingBand {
            path: path.to_path_buf(),
            band: band.to_string(),
        })?;
        if data.len() != plane {
            return Err(BaNetError::Decode {
                path: path.to_path_buf(),
                msg: format!("band {band} holds {} values, expected {plane}", data.len()),
            });
        }
        values.extend(
            data.iter()
                .map(|value| value.filter(|v| !v.is_nan()).unwrap_or(0.0)),
        );
    }

    Ok(TileArrays::new(bands.len(), tile.height, tile.width, values))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| BaNetError::io(path, e))
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BaNetError::io(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| BaNetError::io(path, e))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTileLoader;

impl TileLoader for JsonTileLoader {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn read(&self, path: &Path) -> Result<TileFile> {
        serde_json::from_slice(&read_bytes(path)?).map_err(|e| BaNetError::Decode {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })
    }

    fn write(&self, path: &Path, tile: &TileFile) -> Result<()> {
        let bytes = serde_json::to_vec(tile).map_err(|e| BaNetError::Decode {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })?;
        write_bytes(path, &bytes)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeTileLoader;

impl TileLoader for BincodeTileLoader {
    fn extension(&self) -> &'static str {
        "bin"
    }

    fn read(&self, path: &Path) -> Result<TileFile> {
        bincode::deserialize(&read_bytes(path)?).map_err(|e| BaNetError::Decode {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })
    }

    fn write(&self, path: &Path, tile: &TileFile) -> Result<()> {
        let bytes = bincode::serialize(tile).map_err(|e| BaNetError::Decode {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })?;
        write_bytes(path, &bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
pub enum TileFormat {
    #[default]
    Json,
    Bincode,
}

impl TileFormat {
    pub fn loader(self) -> Arc<dyn TileLoader> {
        match self {
            TileFormat::Json => Arc::new(JsonTileLoader),
            TileFormat::Bincode => Arc::new(BincodeTileLoader),
        }
    }
}
