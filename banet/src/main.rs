use std::path::PathBuf;

use anyhow::{bail, Context};
use banet::{
    inference::Predictor,
    loader::TileFormat,
    model::BaNetConfig,
    tile::{LocationKey, TileIndex},
    training::{self, TrainingConfig, TrainingJob},
};
use chrono::NaiveDate;
use burn::backend::Autodiff;
use clap::{Args, Parser, Subcommand};

#[cfg(not(feature = "tch"))]
type MyBackend = burn::backend::NdArray<f32>;
#[cfg(feature = "tch")]
type MyBackend = burn::backend::LibTorch<f32>;
type MyAutodiffBackend = Autodiff<MyBackend>;

#[derive(Parser, Debug)]
#[command(name = "banet", about = "Burned area mapping from daily satellite tile sequences")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train one validation year / fold.
    Train(TrainArgs),
    /// Predict a burned-area map from one tile sequence, averaging every checkpoint given.
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Tiles of this year form the validation split.
    #[arg(long)]
    val_year: i32,
    #[arg(long, default_value_t = 0)]
    fold: usize,
    /// Directory holding the `images` and `masks` trees.
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "models")]
    output: PathBuf,
    #[arg(long, default_value_t = 8)]
    epochs: usize,
    #[arg(long, default_value_t = 1e-2)]
    lr: f64,
    /// Minimum burned mass of an anchor tile.
    #[arg(long, default_value_t = 10.0)]
    nburned: f32,
    #[arg(long, default_value_t = 2000)]
    n_episodes_train: usize,
    #[arg(long, default_value_t = 100)]
    n_episodes_valid: usize,
    #[arg(long, default_value_t = 64)]
    sequence_len: usize,
    #[arg(long, default_value_t = 1)]
    n_sequences: usize,
    #[arg(long)]
    pretrained: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = TileFormat::Json)]
    format: TileFormat,
    #[arg(long, default_value_t = 4)]
    workers: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Anchor draws allowed per episode before sampling gives up.
    #[arg(long, default_value_t = 10_000)]
    max_attempts: usize,
    /// Appended to the checkpoint name.
    #[arg(long)]
    suffix: Option<String>,
    #[arg(long)]
    no_cutout: bool,
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Training output directory holding `config.json`.
    #[arg(long)]
    artifact_dir: PathBuf,
    /// Checkpoint stem or file. Repeat to average several folds.
    #[arg(long = "checkpoint", required = true)]
    checkpoints: Vec<PathBuf>,
    #[arg(long)]
    output: PathBuf,
    #[arg(long, value_enum, default_value_t = TileFormat::Json)]
    format: TileFormat,
    /// Image directory to select tiles from, instead of listing them.
    #[arg(long, conflicts_with = "tiles", requires = "location", requires = "start", requires = "end")]
    input: Option<PathBuf>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long, default_value_t = 0)]
    row: usize,
    #[arg(long, default_value_t = 0)]
    col: usize,
    /// First day of the sequence, `YYYY-MM-DD`.
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Last day of the sequence, inclusive.
    #[arg(long)]
    end: Option<NaiveDate>,
    /// Image tiles of one location, in date order.
    #[arg(required_unless_present = "input")]
    tiles: Vec<PathBuf>,
}

impl PredictArgs {
    /// Tiles listed on the command line, or those of one location and date
    /// range under `--input`.
    fn tiles(&self) -> anyhow::Result<Vec<PathBuf>> {
        let (Some(input), Some(location), Some(start), Some(end)) = (&self.input, &self.location, self.start, self.end)
        else {
            return Ok(self.tiles.clone());
        };
        if start > end {
            bail!("--start {start} is after --end {end}");
        }

        let index = TileIndex::scan(input, self.format.loader().extension())
            .with_context(|| format!("scanning {}", input.display()))?;
        let key = LocationKey {
            location: location.clone(),
            row: self.row,
            col: self.col,
        };
        let tiles = index
            .sequence(&key, start, end)
            .into_iter()
            .map(|record| record.path.clone())
            .collect::<Vec<PathBuf>>();
        if tiles.is_empty() {
            bail!("no tiles of {location} r{} c{} between {start} and {end}", self.row, self.col);
        }
        Ok(tiles)
    }
}

fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let job = TrainingJob {
        valid_year: args.val_year,
        fold: args.fold,
        input_path: args.input,
        output_path: args.output,
        pretrained_weights: args.pretrained,
        checkpoint_suffix: args.suffix,
    };
    let config = TrainingConfig::new(BaNetConfig::new(args.sequence_len), TrainingConfig::default_optimizer())
        .with_num_epochs(args.epochs)
        .with_learning_rate(args.lr)
        .with_nburned(args.nburned)
        .with_n_episodes_train(args.n_episodes_train)
        .with_n_episodes_valid(args.n_episodes_valid)
        .with_n_sequences(args.n_sequences)
        .with_num_workers(args.workers)
        .with_seed(args.seed)
        .with_max_sampling_attempts(args.max_attempts)
        .with_cutout(!args.no_cutout)
        .with_tile_format(args.format);

    let report = training::train::<MyAutodiffBackend>(&job, &config, Default::default())?;
    tracing::info!("checkpoint written to {}", report.checkpoint.display());
    Ok(())
}

fn run_predict(args: PredictArgs) -> anyhow::Result<()> {
    let tiles = args.tiles()?;
    let predictor = Predictor::<MyBackend>::load(&args.artifact_dir, &args.checkpoints, Default::default())?;
    let map = predictor.predict(&tiles).context("predicting burned area")?;
    args.format
        .loader()
        .write(&args.output, &map.to_tile())
        .with_context(|| format!("writing {}", args.output.display()))?;
    tracing::info!("{} burned pixels written to {}", map.burned_pixels(), args.output.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("banet=info")),
        )
        .init();

    match Cli::parse().command {
        Command::Train(args) => run_train(args),
        Command::Predict(args) => run_predict(args),
    }
}
