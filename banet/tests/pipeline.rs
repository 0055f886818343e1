mod common;

use std::sync::Arc;

use banet::{
    data::{EpisodeDataset, TileBatcher},
    info::InfoTable,
    loader::{JsonTileLoader, TileFormat},
    reshape::SequenceReshaper,
    sampler::{EpisodeSampler, SamplerConfig},
    tile::{LabelPaths, TileIndex, IMAGES_DIR},
    BaNetError,
};
use burn::{backend::NdArray, data::dataloader::batcher::Batcher, data::dataset::Dataset};
use common::{date, write_month, write_tile, SIDE};
use rand::{rngs::StdRng, SeedableRng};

type TestBackend = NdArray<f32>;

#[test]
fn scanned_tiles_flow_into_sequences() {
    let dir = tempfile::tempdir().unwrap();
    write_month(dir.path(), "A", 2016);
    write_month(dir.path(), "B", 2016);
    write_month(dir.path(), "A", 2017);

    let loader = TileFormat::Json.loader();
    let labels = LabelPaths::default();
    let index = TileIndex::scan(&dir.path().join(IMAGES_DIR), loader.extension()).unwrap();
    assert_eq!(index.len(), 93);

    let (train, valid) = index.split_by_year(2017);
    assert_eq!((train.len(), valid.len()), (62, 31));

    let table = Arc::new(InfoTable::build(&train, loader.as_ref(), &labels).unwrap());
    let burned_tile = (SIDE * SIDE) as f32;
    assert_eq!(table.total_burned(), 2.0 * 5.0 * burned_tile);

    let config = SamplerConfig::new(3, 2, 4, burned_tile - 1.0, 1_000);
    let sampler = EpisodeSampler::new(table.clone(), config);
    assert_eq!(sampler.anchor_count(), 10);

    let indices = sampler.produce_epoch(&mut StdRng::seed_from_u64(1)).unwrap();
    let dataset = EpisodeDataset::from_indices(&table, &indices, sampler.batch_len(), 0);
    assert_eq!(dataset.len(), 4);

    let batcher = TileBatcher::<TestBackend>::new(Default::default(), loader, labels, None, 1);
    let batch = batcher.batch(vec![dataset.get(0).unwrap()]).unwrap();
    assert_eq!(batch.images.dims(), [6, 4, SIDE, SIDE]);

    let reshaper = SequenceReshaper::new(3);
    let images = reshaper.to_sequences(batch.images).unwrap();
    let targets = reshaper.to_sequences(batch.targets).unwrap();
    assert_eq!(images.dims(), [2, 4, 3, SIDE, SIDE]);
    assert_eq!(targets.dims(), [2, 1, 3, SIDE, SIDE]);
}

#[test]
fn year_without_burning_exhausts_sampler() {
    let dir = tempfile::tempdir().unwrap();
    for day in 1..=10 {
        write_tile(dir.path(), "A", date(2018, 1, day), 0.0);
    }

    let index = TileIndex::scan(&dir.path().join(IMAGES_DIR), "json").unwrap();
    let table = InfoTable::build(&index, &JsonTileLoader, &LabelPaths::default()).unwrap();
    let sampler = EpisodeSampler::new(Arc::new(table), SamplerConfig::new(2, 1, 1, 10.0, 100));

    let err = sampler.produce_epoch(&mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, BaNetError::SamplingExhausted { candidates: 0, .. }));
}

#[test]
fn missing_mask_aborts_info_table() {
    let dir = tempfile::tempdir().unwrap();
    let id = write_tile(dir.path(), "A", date(2018, 1, 1), 1.0);
    std::fs::remove_file(dir.path().join("masks").join(format!("{}.json", id.file_stem()))).unwrap();

    let index = TileIndex::scan(&dir.path().join(IMAGES_DIR), "json").unwrap();
    let err = InfoTable::build(&index, &JsonTileLoader, &LabelPaths::default()).unwrap_err();
    assert!(matches!(err, BaNetError::MissingLabel { .. }));
}

#[test]
fn info_table_cache_survives_missing_masks() {
    let dir = tempfile::tempdir().unwrap();
    write_month(dir.path(), "A", 2016);
    let cache = dir.path().join("info-train.json");

    let loader = TileFormat::Json.loader();
    let labels = LabelPaths::default();
    let index = TileIndex::scan(&dir.path().join(IMAGES_DIR), loader.extension()).unwrap();
    let built = InfoTable::cached(&cache, &index, loader.as_ref(), &labels).unwrap();
    assert!(cache.is_file());

    std::fs::remove_dir_all(dir.path().join("masks")).unwrap();
    let reused = InfoTable::cached(&cache, &index, loader.as_ref(), &labels).unwrap();
    assert_eq!(reused.rows(), built.rows());
    assert_eq!(reused.total_burned(), 5.0 * (SIDE * SIDE) as f32);
}
