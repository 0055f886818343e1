pub mod augment;
pub mod checkpoint;
pub mod clip;
pub mod data;
pub mod error;
pub mod inference;
pub mod info;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod reshape;
pub mod sampler;
pub mod schedule;
pub mod tile;
pub mod training;

pub use error::{BaNetError, Result};
