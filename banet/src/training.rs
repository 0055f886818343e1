use std::{fmt::Display, fs::File, io::BufWriter, path::{Path, PathBuf}, sync::Arc};

use anyhow::{anyhow, bail, Context};
use burn::{
    config::Config,
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    lr_scheduler::LrScheduler,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    tensor::{backend::{AutodiffBackend, Backend}, ElementConversion, Tensor},
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    augment::Augmentation,
    checkpoint,
    clip::{clip_global_norm, MAX_GRAD_NORM},
    data::{BatchResult, EpisodeDataset, TileBatch, TileBatcher},
    error::BaNetError,
    info::InfoTable,
    loader::{TileFormat, TileLoader},
    metrics::{MetricsAccumulator, MetricsSummary, SequenceBceLoss, SequenceMetrics},
    model::{BaNet, BaNetConfig},
    reshape::SequenceReshaper,
    sampler::{EpisodeSampler, SamplerConfig},
    schedule::OneCycleConfig,
    tile::{LabelPaths, TileIndex, IMAGES_DIR},
};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: BaNetConfig,
    pub optimizer: AdamWConfig,
    #[config(default = 8)]
    pub num_epochs: usize,
    #[config(default = 1.0e-2)]
    pub learning_rate: f64,
    /// Minimum burned mass of an anchor tile.
    #[config(default = 10.0)]
    pub nburned: f32,
    #[config(default = 2000)]
    pub n_episodes_train: usize,
    #[config(default = 100)]
    pub n_episodes_valid: usize,
    #[config(default = 1)]
    pub n_sequences: usize,
    /// Loader threads. With more than one, batches reach the optimizer in
    /// completion order, so a fixed seed only reproduces a run with 1 worker.
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 10000)]
    pub max_sampling_attempts: usize,
    #[config(default = true)]
    pub cutout: bool,
    #[config(default = "TileFormat::Json")]
    pub tile_format: TileFormat,
}

impl TrainingConfig {
    /// AdamW with the weight decay used for training. Gradients are clipped
    /// by the training loop, not by the optimizer.
    pub fn default_optimizer() -> AdamWConfig {
        AdamWConfig::new().with_weight_decay(1.0e-2)
    }

    pub fn sequence_len(&self) -> usize {
        self.model.sequence_len
    }

    fn sampler(&self, n_episodes: usize) -> SamplerConfig {
        SamplerConfig::new(
            self.sequence_len(),
            self.n_sequences,
            n_episodes,
            self.nburned,
            self.max_sampling_attempts,
        )
    }
}

/// What to train: a validation year / fold pair and where the data and
/// outputs live.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub valid_year: i32,
    pub fold: usize,
    /// Root holding the `images` and `masks` trees.
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub pretrained_weights: Option<PathBuf>,
    pub checkpoint_suffix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    DataPrepared,
    Training { epoch: usize },
    Checkpointed,
    Done,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Init => write!(f, "init"),
            Stage::DataPrepared => write!(f, "data prepared"),
            Stage::Training { epoch } => write!(f, "training epoch {epoch}"),
            Stage::Checkpointed => write!(f, "checkpointed"),
            Stage::Done => write!(f, "done"),
        }
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::info!("{stage} -> {next}");
    *stage = next;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f32,
    pub valid: MetricsSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub valid_year: i32,
    pub fold: usize,
    pub checkpoint: PathBuf,
    pub epochs: Vec<EpochReport>,
}

struct Split {
    name: &'static str,
    sampler: EpisodeSampler,
}

impl Split {
    /// Loads or builds the info table cached at `cache` and checks that the
    /// split can yield episodes at all.
    fn prepare(
        name: &'static str,
        index: &TileIndex,
        cache: &Path,
        loader: &dyn TileLoader,
        labels: &LabelPaths,
        config: SamplerConfig,
    ) -> anyhow::Result<Self> {
        if index.is_empty() {
            bail!("{name} split has no tiles");
        }
        let table = InfoTable::cached(cache, index, loader, labels)
            .with_context(|| format!("building {name} info table"))?;
        let sampler = EpisodeSampler::new(Arc::new(table), config);
        tracing::info!(
            "{name} split: {} tiles, {} anchors above {}",
            sampler.table().len(),
            sampler.anchor_count(),
            sampler.config().nburned
        );

        let config = sampler.config();
        if config.n_episodes > 0 && sampler.anchor_count() == 0 {
            let err = BaNetError::SamplingExhausted {
                threshold: config.nburned,
                candidates: 0,
                attempts: 0,
                sequence_len: config.sequence_len,
            };
            return Err(anyhow!(err).context(format!("{name} split")));
        }
        Ok(Self { name, sampler })
    }

    fn loader<B: Backend>(
        &self,
        batcher: TileBatcher<B>,
        rng: &mut StdRng,
        first_batch: u64,
        num_workers: usize,
    ) -> anyhow::Result<Arc<dyn DataLoader<BatchResult<B>>>> {
        let indices = self
            .sampler
            .produce_epoch(rng)
            .with_context(|| format!("sampling {} episodes", self.name))?;
        let dataset = EpisodeDataset::from_indices(self.sampler.table(), &indices, self.sampler.batch_len(), first_batch);

        Ok(DataLoaderBuilder::new(batcher)
            .batch_size(1)
            .num_workers(num_workers.max(1))
            .build(dataset))
    }
}

/// Reshapes a loaded batch into `(images, targets)` sequences.
fn to_sequences<B: Backend>(
    reshaper: &SequenceReshaper,
    batch: TileBatch<B>,
    epoch: usize,
    split: &str,
) -> anyhow::Result<(Tensor<B, 5>, Tensor<B, 5>)> {
    let images = reshaper
        .to_sequences(batch.images)
        .with_context(|| format!("epoch {epoch}: reshaping {split} images"))?;
    let targets = reshaper
        .to_sequences(batch.targets)
        .with_context(|| format!("epoch {epoch}: reshaping {split} targets"))?;
    Ok((images, targets))
}

pub fn train<B: AutodiffBackend>(
    job: &TrainingJob,
    config: &TrainingConfig,
    device: B::Device,
) -> anyhow::Result<TrainingReport> {
    let mut stage = Stage::Init;
    tracing::info!("training val{} fold{} from {}", job.valid_year, job.fold, job.input_path.display());

    std::fs::create_dir_all(&job.output_path)
        .with_context(|| format!("creating {}", job.output_path.display()))?;
    config
        .save(job.output_path.join("config.json"))
        .context("saving training config")?;

    B::seed(config.seed);

    let loader = config.tile_format.loader();
    let labels = LabelPaths::default();
    let index = TileIndex::scan(&job.input_path.join(IMAGES_DIR), loader.extension())
        .context("scanning image tiles")?;
    let (train_index, valid_index) = index.split_by_year(job.valid_year);

    let train_split = Split::prepare(
        "train",
        &train_index,
        &job.output_path.join("info-train.json"),
        loader.as_ref(),
        &labels,
        config.sampler(config.n_episodes_train),
    )?;
    let valid_split = Split::prepare(
        "valid",
        &valid_index,
        &job.output_path.join("info-valid.json"),
        loader.as_ref(),
        &labels,
        config.sampler(config.n_episodes_valid),
    )?;

    let augmentation = config.cutout.then(Augmentation::cutouts);
    let batcher_train = TileBatcher::<B>::new(device.clone(), loader.clone(), labels.clone(), augmentation, config.seed);
    let batcher_valid = TileBatcher::<B::InnerBackend>::new(device.clone(), loader.clone(), labels, None, config.seed);
    advance(&mut stage, Stage::DataPrepared);

    let mut model: BaNet<B> = match &job.pretrained_weights {
        Some(path) => checkpoint::load_model(&config.model, path, &device)
            .with_context(|| format!("loading pretrained weights {}", path.display()))?,
        None => config.model.init(&device),
    };
    let mut optim = config.optimizer.init();
    let mut schedule = OneCycleConfig::new(config.learning_rate).init(config.num_epochs * config.n_episodes_train);
    let reshaper = SequenceReshaper::new(config.sequence_len());
    let loss_fn = SequenceBceLoss::default();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut epochs = Vec::with_capacity(config.num_epochs);

    for epoch in 1..=config.num_epochs {
        advance(&mut stage, Stage::Training { epoch });
        let first_batch = ((epoch - 1) * config.n_episodes_train) as u64;

        let mut train_metrics = MetricsAccumulator::default();
        let mut learning_rate = 0.0;
        let dataloader_train = train_split
            .loader(batcher_train.clone(), &mut rng, first_batch, config.num_workers)
            .with_context(|| format!("epoch {epoch}"))?;

        for batch in dataloader_train.iter() {
            let batch = batch.with_context(|| format!("epoch {epoch}: loading train batch"))?;
            let (images, targets) = to_sequences(&reshaper, batch, epoch, train_split.name)?;

            let logits = model.forward(images);
            let loss = loss_fn.forward(logits, targets);
            train_metrics.push_loss(loss.clone().into_scalar().elem::<f32>());

            let mut grads = GradientsParams::from_grads(loss.backward(), &model);
            clip_global_norm::<B, _>(&model, &mut grads, MAX_GRAD_NORM);
            learning_rate = LrScheduler::<B>::step(&mut schedule);
            model = optim.step(learning_rate, model, grads);
        }

        let model_valid = model.valid();
        let mut valid_metrics = MetricsAccumulator::default();
        let dataloader_valid = valid_split
            .loader(batcher_valid.clone(), &mut rng, 0, config.num_workers)
            .with_context(|| format!("epoch {epoch}"))?;

        for batch in dataloader_valid.iter() {
            let batch = batch.with_context(|| format!("epoch {epoch}: loading valid batch"))?;
            let (images, targets) = to_sequences(&reshaper, batch, epoch, valid_split.name)?;

            let logits = model_valid.forward(images);
            let loss = loss_fn.forward(logits.clone(), targets.clone());
            valid_metrics.push_loss(loss.into_scalar().elem::<f32>());
            valid_metrics.push_metrics(&SequenceMetrics::evaluate(logits, targets));
        }

        let report = EpochReport {
            epoch,
            learning_rate,
            train_loss: train_metrics.summary().loss,
            valid: valid_metrics.summary(),
        };
        tracing::info!(
            "epoch {}/{}: train loss {:.4}, valid loss {:.4}, accuracy {:.4}, dice {:.4}, mae {}",
            epoch,
            config.num_epochs,
            report.train_loss,
            report.valid.loss,
            report.valid.accuracy,
            report.valid.dice,
            report.valid.mae.map_or("n/a".to_string(), |mae| format!("{mae:.2}")),
        );
        epochs.push(report);
    }

    let stem = checkpoint::checkpoint_path(
        &job.output_path,
        job.valid_year,
        job.fold,
        job.checkpoint_suffix.as_deref(),
    );
    let checkpoint = checkpoint::save_model(model, &stem).context("saving checkpoint")?;
    advance(&mut stage, Stage::Checkpointed);

    let report = TrainingReport {
        valid_year: job.valid_year,
        fold: job.fold,
        checkpoint,
        epochs,
    };
    let report_path = job.output_path.join("report.json");
    let file = File::create(&report_path).with_context(|| format!("creating {}", report_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &report).context("writing training report")?;
    advance(&mut stage, Stage::Done);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn reshape_errors_name_epoch_and_split() {
        let device = Default::default();
        let batch = TileBatch::<TestBackend> {
            images: Tensor::zeros([5, 4, 2, 2], &device),
            targets: Tensor::zeros([5, 1, 2, 2], &device),
        };

        let err = to_sequences(&SequenceReshaper::new(2), batch, 3, "valid").unwrap_err();
        let message = format!("{err:#}");
        assert!(message.starts_with("epoch 3: reshaping valid images"), "{message}");
        assert!(matches!(
            err.downcast_ref::<BaNetError>(),
            Some(BaNetError::ShapeMismatch { len: 5, sequence_len: 2 })
        ));
    }

    #[test]
    fn stages_read_as_log_lines() {
        assert_eq!(Stage::Training { epoch: 2 }.to_string(), "training epoch 2");
        assert_eq!(Stage::DataPrepared.to_string(), "data prepared");
    }
}
