use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BaNetError>;

#[derive(Debug, Error)]
pub enum BaNetError {
    #[error("malformed tile filename {path}: {reason}")]
    MalformedFilename { path: PathBuf, reason: String },
    #[error("label tile {label} missing for image tile {image}")]
    MissingLabel { image: PathBuf, label: PathBuf },
    #[error(
        "no valid episode of length {sequence_len} after {attempts} draws \
         ({candidates} anchor candidates with burned mass > {threshold})"
    )]
    SamplingExhausted {
        threshold: f32,
        candidates: usize,
        attempts: usize,
        sequence_len: usize,
    },
    #[error("batch of {len} tiles cannot be split into sequences of length {sequence_len}")]
    ShapeMismatch { len: usize, sequence_len: usize },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode {path}: {msg}")]
    Decode { path: PathBuf, msg: String },
    #[error("band {band} missing in tile {path}")]
    MissingBand { path: PathBuf, band: String },
    #[error("tile {path} is {found:?} (height, width), expected {expected:?}")]
    TileShape {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("sampled batch holds no tiles")]
    EmptyBatch,
    #[error("prediction needs at least one checkpoint")]
    EmptyEnsemble,
    #[error("checkpoint {path}: {msg}")]
    Recorder { path: PathBuf, msg: String },
}

impl BaNetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
