use std::sync::Arc;

use burn::{data::{dataloader::batcher::Batcher, dataset::Dataset}, tensor::{backend::Backend, Data, Shape, Tensor}};
use derive_new::new;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    augment::Augmentation,
    error::{BaNetError, Result},
    info::InfoTable,
    loader::{load_label, TileArrays, TileLoader, IMAGE_BANDS},
    tile::{LabelPaths, TileRecord},
};

pub const CHANNEL_MEAN: [f32; 4] = [0.2349, 0.3548, 0.1128, 0.0016];
pub const CHANNEL_STD: [f32; 4] = [0.1879, 0.1660, 0.0547, 0.0776];

/// The tiles of one sampled mini-batch, in sampler order.
#[derive(Debug, Clone, new)]
pub struct EpisodeBatchItem {
    /// Run-wide batch counter, used to seed augmentation.
    pub batch: u64,
    pub tiles: Vec<TileRecord>,
}

/// One epoch of sampled mini-batches.
pub struct EpisodeDataset {
    items: Vec<EpisodeBatchItem>,
}

impl EpisodeDataset {
    /// Groups a sampler epoch into batches of `batch_len` tiles, numbering
    /// them from `first_batch`.
    pub fn from_indices(table: &InfoTable, indices: &[usize], batch_len: usize, first_batch: u64) -> Self {
        let items = indices
            .chunks(batch_len.max(1))
            .zip(first_batch..)
            .map(|(chunk, batch)| {
                let tiles = chunk
                    .iter()
                    .filter_map(|index| table.get(*index))
                    .map(|row| row.tile.clone())
                    .collect();
                EpisodeBatchItem::new(batch, tiles)
            })
            .collect();
        Self { items }
    }
}

impl Dataset<EpisodeBatchItem> for EpisodeDataset {
    fn get(&self, index: usize) -> Option<EpisodeBatchItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Per-channel standardization with the training set statistics.
pub fn normalize(tile: &mut TileArrays) {
    for channel in 0..tile.channels.min(IMAGE_BANDS.len()) {
        let (mean, std) = (CHANNEL_MEAN[channel], CHANNEL_STD[channel]);
        for value in tile.channel_mut(channel) {
            *value = (*value - mean) / std;
        }
    }
}

/// Stacks equally shaped tiles into a `(tiles, channels, height, width)` tensor.
pub fn stack_tiles<B: Backend>(tiles: &[TileArrays], device: &B::Device) -> Tensor<B, 4> {
    let (channels, height, width) = tiles
        .first()
        .map(|tile| (tile.channels, tile.height, tile.width))
        .unwrap_or_default();
    let values = tiles
        .iter()
        .flat_map(|tile| tile.values.iter().copied())
        .collect::<Vec<f32>>();
    let data = Data::new(values, Shape::new([tiles.len(), channels, height, width]));
    Tensor::<B, 4>::from_data(data.convert(), device)
}

#[derive(Debug, Clone)]
pub struct TileBatch<B: Backend> {
    /// `(tiles, 4, height, width)`, normalized.
    pub images: Tensor<B, 4>,
    /// `(tiles, 1, height, width)` burned-area fraction.
    pub targets: Tensor<B, 4>,
}

/// Loader workers hand failures back to the training loop instead of panicking.
pub type BatchResult<B> = std::result::Result<TileBatch<B>, Arc<BaNetError>>;

#[derive(Clone, new)]
pub struct TileBatcher<B: Backend> {
    device: B::Device,
    loader: Arc<dyn TileLoader>,
    labels: LabelPaths,
    augmentation: Option<Augmentation>,
    seed: u64,
}

impl<B: Backend> TileBatcher<B> {
    fn load(&self, items: Vec<EpisodeBatchItem>) -> Result<TileBatch<B>> {
        let first_batch = items.first().map(|item| item.batch).unwrap_or_default();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(first_batch));

        let records = items.into_iter().flat_map(|item| item.tiles).collect::<Vec<TileRecord>>();
        let Some(first) = records.first() else {
            return Err(BaNetError::EmptyBatch);
        };

        let mut images = Vec::with_capacity(records.len());
        let mut targets = Vec::with_capacity(records.len());
        let mut expected = None;

        for record in &records {
            let mut image = self.loader.load_image(&record.path)?;
            let label = load_label(
                self.loader.as_ref(),
                &record.path,
                &self.labels.label_for(&record.path),
            )?;

            let shape = *expected.get_or_insert(image.shape());
            for found in [image.shape(), label.shape()] {
                if found != shape {
                    return Err(BaNetError::TileShape {
                        path: record.path.clone(),
                        expected: shape,
                        found,
                    });
                }
            }

            if let Some(augmentation) = &self.augmentation {
                augmentation.apply(&mut image, &mut rng);
            }
            normalize(&mut image);

            images.push(image);
            targets.push(label);
        }
        tracing::trace!("loaded {} tiles starting at {}", records.len(), first.id);

        Ok(TileBatch {
            images: stack_tiles(&images, &self.device),
            targets: stack_tiles(&targets, &self.device),
        })
    }
}

impl<B: Backend> Batcher<EpisodeBatchItem, BatchResult<B>> for TileBatcher<B> {
    fn batch(&self, items: Vec<EpisodeBatchItem>) -> BatchResult<B> {
        self.load(items).map_err(Arc::new)
    }
}
