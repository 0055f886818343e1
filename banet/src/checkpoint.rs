use std::path::{Path, PathBuf};

use burn::{module::Module, record::{CompactRecorder, Recorder}, tensor::backend::Backend};

use crate::{
    error::{BaNetError, Result},
    model::{BaNet, BaNetConfig, BaNetRecord},
};

/// Extension the compact recorder adds to checkpoint stems.
pub const CHECKPOINT_EXTENSION: &str = "mpk";

/// `banet-val{year}-fold{fold}` with an optional `-{suffix}`.
pub fn checkpoint_stem(valid_year: i32, fold: usize, suffix: Option<&str>) -> String {
    match suffix.filter(|s| !s.is_empty()) {
        Some(suffix) => format!("banet-val{valid_year}-fold{fold}-{suffix}"),
        None => format!("banet-val{valid_year}-fold{fold}"),
    }
}

pub fn checkpoint_path(dir: &Path, valid_year: i32, fold: usize, suffix: Option<&str>) -> PathBuf {
    dir.join(checkpoint_stem(valid_year, fold, suffix))
}

/// File holding the checkpoint named by `path`. The extension is appended to
/// the full name, so dots inside a stem are kept.
pub fn checkpoint_file(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == CHECKPOINT_EXTENSION) {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(CHECKPOINT_EXTENSION);
    PathBuf::from(name)
}

/// Writes the model for `stem` and returns the file actually written.
pub fn save_model<B: Backend>(model: BaNet<B>, stem: &Path) -> Result<PathBuf> {
    let file = checkpoint_file(stem);
    model
        .save_file(file.clone(), &CompactRecorder::new())
        .map_err(|err| BaNetError::Recorder {
            path: file.clone(),
            msg: format!("{err:?}"),
        })?;
    Ok(file)
}

pub fn load_record<B: Backend>(path: &Path, device: &B::Device) -> Result<BaNetRecord<B>> {
    let file = checkpoint_file(path);
    if !file.is_file() {
        return Err(BaNetError::Recorder {
            path: file,
            msg: "no such checkpoint".into(),
        });
    }

    CompactRecorder::new()
        .load(file.clone(), device)
        .map_err(|err| BaNetError::Recorder {
            path: file,
            msg: format!("{err:?}"),
        })
}

/// Loads a checkpoint by stem or by full path into a model built from `config`.
pub fn load_model<B: Backend>(config: &BaNetConfig, path: &Path, device: &B::Device) -> Result<BaNet<B>> {
    let record = load_record::<B>(path, device)?;
    tracing::info!("loaded weights from {}", path.display());
    Ok(config.init_with(record))
}

#[cfg(test)]
mod tests {
    use burn::{backend::NdArray, tensor::{Distribution, Tensor}};

    use super::*;

    type TestBackend = NdArray<f32>;

    #[test]
    fn stems_follow_naming_convention() {
        assert_eq!(checkpoint_stem(2017, 0, None), "banet-val2017-fold0");
        assert_eq!(checkpoint_stem(2019, 3, Some("ft")), "banet-val2019-fold3-ft");
        assert_eq!(checkpoint_stem(2019, 3, Some("")), "banet-val2019-fold3");
        assert_eq!(
            checkpoint_path(Path::new("/models"), 2018, 1, None),
            PathBuf::from("/models/banet-val2018-fold1")
        );
    }

    #[test]
    fn saved_model_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = BaNetConfig::new(2).with_hidden_size(4);
        let model = config.init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 5>::random([1, 4, 2, 6, 6], Distribution::Default, &device);
        let expected = model.forward(input.clone()).into_data().value;

        let stem = checkpoint_path(dir.path(), 2017, 2, None);
        let written = save_model(model, &stem).unwrap();
        assert!(written.is_file());
        assert_eq!(written.file_name().unwrap(), "banet-val2017-fold2.mpk");

        // half precision storage
        for path in [stem, written] {
            let loaded = load_model::<TestBackend>(&config, &path, &device).unwrap();
            let found = loaded.forward(input.clone()).into_data().value;
            assert!(found.iter().zip(&expected).all(|(a, b)| (a - b).abs() < 5e-2));
        }
    }

    #[test]
    fn dotted_suffixes_keep_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = BaNetConfig::new(2).with_hidden_size(4);

        let first = checkpoint_path(dir.path(), 2017, 0, Some("v0.5"));
        let second = checkpoint_path(dir.path(), 2017, 0, Some("v0.6"));
        let first_file = save_model(config.init::<TestBackend>(&device), &first).unwrap();
        let second_file = save_model(config.init::<TestBackend>(&device), &second).unwrap();

        assert_ne!(first_file, second_file);
        assert_eq!(first_file.file_name().unwrap(), "banet-val2017-fold0-v0.5.mpk");
        assert!(first_file.is_file() && second_file.is_file());
        assert_eq!(checkpoint_file(&first_file), first_file);
        assert!(load_model::<TestBackend>(&config, &first, &device).is_ok());
    }

    #[test]
    fn missing_checkpoint_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_record::<TestBackend>(&dir.path().join("banet-val2000-fold0"), &Default::default()).err().unwrap();
        assert!(matches!(err, BaNetError::Recorder { .. }));
    }
}
