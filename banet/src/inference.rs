use std::{collections::BTreeMap, path::{Path, PathBuf}, sync::Arc};

use anyhow::anyhow;
use burn::{config::Config, tensor::{activation::sigmoid, backend::Backend, Tensor}};
use serde::{Deserialize, Serialize};

use crate::{
    checkpoint,
    data::{normalize, stack_tiles},
    error::{BaNetError, Result},
    loader::{TileFile, TileLoader},
    metrics::THRESHOLD,
    model::BaNet,
    reshape::SequenceReshaper,
    training::TrainingConfig,
};

pub const FRACTION_BAND: &str = "bafrac";
pub const BURN_STEP_BAND: &str = "burnstep";

/// Per-pixel prediction over one tile sequence, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnedAreaMap {
    pub height: usize,
    pub width: usize,
    /// Burned fraction over the whole sequence, capped at 1.
    pub fraction: Vec<f32>,
    /// Sequence step of the burn, for pixels whose fraction exceeds 0.5.
    pub burn_step: Vec<Option<usize>>,
}

impl BurnedAreaMap {
    pub fn burned_pixels(&self) -> usize {
        self.burn_step.iter().filter(|step| step.is_some()).count()
    }

    pub fn to_tile(&self) -> TileFile {
        let fraction = self.fraction.iter().map(|v| Some(*v)).collect();
        let steps = self.burn_step.iter().map(|step| step.map(|s| s as f32)).collect();
        TileFile::new(
            self.height,
            self.width,
            BTreeMap::from([(FRACTION_BAND.to_string(), fraction), (BURN_STEP_BAND.to_string(), steps)]),
        )
    }
}

/// Averages the probabilities of one or more models, typically one per fold.
pub struct Predictor<B: Backend> {
    models: Vec<BaNet<B>>,
    loader: Arc<dyn TileLoader>,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(models: Vec<BaNet<B>>, loader: Arc<dyn TileLoader>, device: B::Device) -> Result<Self> {
        if models.is_empty() {
            return Err(BaNetError::EmptyEnsemble);
        }
        Ok(Self { models, loader, device })
    }

    /// Rebuilds the model described by `{artifact_dir}/config.json` once per
    /// checkpoint (stem or file).
    pub fn load(artifact_dir: &Path, checkpoints: &[PathBuf], device: B::Device) -> anyhow::Result<Self> {
        let config_path = artifact_dir.join("config.json");
        let config = TrainingConfig::load(&config_path)
            .map_err(|err| anyhow!("reading {}: {err:?}", config_path.display()))?;
        let models = checkpoints
            .iter()
            .map(|path| checkpoint::load_model::<B>(&config.model, path, &device))
            .collect::<Result<Vec<BaNet<B>>>>()?;
        tracing::info!("predicting with {} model(s)", models.len());
        Ok(Self::new(models, config.tile_format.loader(), device)?)
    }

    pub fn sequence_len(&self) -> usize {
        self.models[0].sequence_len()
    }

    pub fn ensemble_size(&self) -> usize {
        self.models.len()
    }

    /// Mean probabilities `(1, 1, S, H, W)` for tiles of one location, in date order.
    pub fn probabilities(&self, tiles: &[PathBuf]) -> Result<Tensor<B, 5>> {
        let reshaper = SequenceReshaper::new(self.sequence_len());
        if tiles.len() != reshaper.sequence_len() {
            return Err(BaNetError::ShapeMismatch {
                len: tiles.len(),
                sequence_len: reshaper.sequence_len(),
            });
        }

        let mut images = Vec::with_capacity(tiles.len());
        let mut expected = None;
        for path in tiles {
            let mut image = self.loader.load_image(path)?;
            let shape = *expected.get_or_insert(image.shape());
            if image.shape() != shape {
                return Err(BaNetError::TileShape {
                    path: path.clone(),
                    expected: shape,
                    found: image.shape(),
                });
            }
            normalize(&mut image);
            images.push(image);
        }

        let sequences = reshaper.to_sequences(stack_tiles::<B>(&images, &self.device))?;
        let total = self
            .models
            .iter()
            .map(|model| sigmoid(model.forward(sequences.clone())))
            .reduce(|sum, probabilities| sum + probabilities)
            .ok_or(BaNetError::EmptyEnsemble)?;
        Ok(total.div_scalar(self.models.len() as f32))
    }

    pub fn predict(&self, tiles: &[PathBuf]) -> Result<BurnedAreaMap> {
        let probabilities = self.probabilities(tiles)?;
        let [_, _, _, height, width] = probabilities.dims();

        let fraction = probabilities
            .clone()
            .sum_dim(2)
            .clamp_max(1.0)
            .into_data()
            .convert::<f32>()
            .value;
        let steps = probabilities.argmax(2).float().into_data().convert::<f32>().value;

        let burn_step = fraction
            .iter()
            .zip(&steps)
            .map(|(fraction, step)| (*fraction > THRESHOLD).then_some(*step as usize))
            .collect::<Vec<Option<usize>>>();
        let map = BurnedAreaMap {
            height,
            width,
            fraction,
            burn_step,
        };
        tracing::debug!("predicted {} burned pixels over {} tiles", map.burned_pixels(), tiles.len());
        Ok(map)
    }
}
