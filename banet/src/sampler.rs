use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{Days, NaiveDate};
use derive_new::new;
use rand::Rng;

use crate::{
    error::{BaNetError, Result},
    info::InfoTable,
    tile::LocationKey,
};

#[derive(Debug, Clone, new)]
pub struct SamplerConfig {
    pub sequence_len: usize,
    pub n_sequences: usize,
    pub n_episodes: usize,
    pub nburned: f32,
    pub max_attempts: usize,
}

/// Draws episodes anchored on burned tiles.
///
/// An episode is `sequence_len` tiles of one location in date order, taken
/// from a window of `2 * sequence_len` days that starts `sequence_len / 2`
/// days before a randomly drawn anchor whose burned mass exceeds `nburned`.
/// Indices refer to rows of the sampler's [`InfoTable`].
pub struct EpisodeSampler {
    table: Arc<InfoTable>,
    config: SamplerConfig,
    anchors: Vec<usize>,
    timelines: HashMap<LocationKey, BTreeMap<NaiveDate, usize>>,
}

impl EpisodeSampler {
    pub fn new(table: Arc<InfoTable>, config: SamplerConfig) -> Self {
        let mut anchors = Vec::new();
        let mut timelines: HashMap<LocationKey, BTreeMap<NaiveDate, usize>> = HashMap::new();

        for (index, row) in table.rows().iter().enumerate() {
            if row.burned_mass > config.nburned {
                anchors.push(index);
            }
            timelines
                .entry(row.tile.id.location_key())
                .or_default()
                .insert(row.tile.id.date, index);
        }

        Self {
            table,
            config,
            anchors,
            timelines,
        }
    }

    pub fn table(&self) -> &Arc<InfoTable> {
        &self.table
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Number of tiles in one mini-batch.
    pub fn batch_len(&self) -> usize {
        self.config.sequence_len * self.config.n_sequences
    }

    /// Number of tiles in one epoch.
    pub fn len(&self) -> usize {
        self.config.n_episodes * self.batch_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn produce_epoch<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<usize>> {
        let mut indices = Vec::with_capacity(self.len());
        for _ in 0..self.config.n_episodes {
            indices.extend(self.produce_batch(rng)?);
        }
        Ok(indices)
    }

    pub fn produce_batch<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<usize>> {
        if self.anchors.is_empty() {
            return Err(self.exhausted(0));
        }

        let mut indices = Vec::with_capacity(self.batch_len());
        for _ in 0..self.config.n_sequences {
            let mut attempts = 0;
            let episode = loop {
                if attempts >= self.config.max_attempts {
                    return Err(self.exhausted(attempts));
                }
                attempts += 1;

                let anchor = self.anchors[rng.gen_range(0..self.anchors.len())];
                if let Some(episode) = self.random_sample(anchor) {
                    break episode;
                }
            };
            if attempts > 1 {
                tracing::trace!("episode found after {attempts} anchor draws");
            }
            indices.extend(episode);
        }
        Ok(indices)
    }

    /// Builds the episode around `anchor`, or `None` when the location has no
    /// tile `sequence_len` days after the anchor or too few tiles in the window.
    pub fn random_sample(&self, anchor: usize) -> Option<Vec<usize>> {
        let sequence_len = self.config.sequence_len;
        if sequence_len == 0 {
            return None;
        }
        let id = &self.table.get(anchor)?.tile.id;
        let timeline = self.timelines.get(&id.location_key())?;

        let future = id.date.checked_add_days(Days::new(sequence_len as u64))?;
        if !timeline.contains_key(&future) {
            return None;
        }

        let start = id.date.checked_sub_days(Days::new((sequence_len / 2) as u64))?;
        let end = start.checked_add_days(Days::new((2 * sequence_len - 1) as u64))?;
        let episode = timeline
            .range(start..=end)
            .map(|(_, index)| *index)
            .take(sequence_len)
            .collect::<Vec<usize>>();

        (episode.len() == sequence_len).then_some(episode)
    }

    fn exhausted(&self, attempts: usize) -> BaNetError {
        BaNetError::SamplingExhausted {
            threshold: self.config.nburned,
            candidates: self.anchors.len(),
            attempts,
            sequence_len: self.config.sequence_len,
        }
    }
}
