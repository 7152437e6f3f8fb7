//! Size-capped episode store and the training batch sampler.
//!
//! [`BoundedEpisodeCache`] keeps episodes keyed by [`EpisodeId`], so iteration
//! order is recency order. Eviction walks from the newest episode backwards,
//! accumulating lengths; the first episode that would push the total past the
//! capacity ends the walk and is deleted together with everything older. The
//! newest episode is always kept, even when it alone exceeds the capacity.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{EpisodeId, EpisodeRecord, Transition};

/// Episode store ordered by identifier (oldest first).
#[derive(Debug, Clone, Default)]
pub struct BoundedEpisodeCache {
    episodes: BTreeMap<EpisodeId, EpisodeRecord>,
}

impl BoundedEpisodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `record` under `id`.
    ///
    /// Identifiers are unique by construction; a repeated id replaces the
    /// previous record and returns it.
    pub fn insert(&mut self, id: EpisodeId, record: EpisodeRecord) -> Option<EpisodeRecord> {
        self.episodes.insert(id, record)
    }

    /// Drop the oldest episodes so the retained length fits `capacity`.
    ///
    /// Returns the ids that were removed, oldest first.
    pub fn evict_to_capacity(&mut self, capacity: usize) -> Vec<EpisodeId> {
        let mut total = 0usize;
        let mut cutoff: Option<&EpisodeId> = None;
        for (i, (id, ep)) in self.episodes.iter().rev().enumerate() {
            let next = total.saturating_add(ep.length());
            if i > 0 && next > capacity {
                cutoff = Some(id);
                break;
            }
            total = next;
        }
        let Some(cutoff) = cutoff.cloned() else {
            return Vec::new();
        };
        // Everything at or below the cutoff goes.
        let kept = self.episodes.split_off(&cutoff);
        let evicted = std::mem::replace(&mut self.episodes, kept);
        let mut removed: Vec<EpisodeId> = evicted.into_keys().collect();
        // `split_off` kept the cutoff itself on the right side.
        if self.episodes.remove(&cutoff).is_some() {
            removed.push(cutoff);
        }
        removed
    }

    /// Total retained length.
    pub fn snapshot(&self) -> usize {
        self.episodes.values().map(EpisodeRecord::length).sum()
    }

    pub fn clear(&mut self) {
        self.episodes.clear();
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn get(&self, id: &EpisodeId) -> Option<&EpisodeRecord> {
        self.episodes.get(id)
    }

    pub fn contains(&self, id: &EpisodeId) -> bool {
        self.episodes.contains_key(id)
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&EpisodeId, &EpisodeRecord)> + '_ {
        self.episodes.iter()
    }

    /// Newest identifier, if any.
    pub fn newest(&self) -> Option<&EpisodeId> {
        self.episodes.keys().next_back()
    }
}

/// A training batch: `batch_size` windows of `batch_length` consecutive transitions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    pub sequences: Vec<Vec<Transition>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

/// Draws fixed-length windows from a cache.
#[derive(Debug, Clone)]
pub struct EpisodeSampler {
    rng: StdRng,
    batch_size: usize,
    batch_length: usize,
    oversample_ends: bool,
}

impl EpisodeSampler {
    pub fn new(seed: u64, batch_size: usize, batch_length: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            batch_size,
            batch_length,
            oversample_ends: false,
        }
    }

    /// Bias window starts toward episode ends.
    pub fn with_oversample_ends(mut self, oversample_ends: bool) -> Self {
        self.oversample_ends = oversample_ends;
        self
    }

    /// One window from a uniformly chosen episode with at least `batch_length + 1` steps.
    ///
    /// `None` when no episode is long enough.
    pub fn sample_window(&mut self, cache: &BoundedEpisodeCache) -> Option<Vec<Transition>> {
        let eligible: Vec<&EpisodeRecord> = cache
            .iter()
            .map(|(_, ep)| ep)
            .filter(|ep| ep.steps().len() > self.batch_length)
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let ep = eligible[self.rng.random_range(0..eligible.len())];
        let total = ep.steps().len();
        let available = total - self.batch_length;
        let start = if self.oversample_ends {
            self.rng.random_range(0..total).min(available)
        } else {
            self.rng.random_range(0..=available)
        };
        Some(ep.steps()[start..start + self.batch_length].to_vec())
    }

    /// A full batch, or `None` when no episode is long enough.
    pub fn sample(&mut self, cache: &BoundedEpisodeCache) -> Option<Batch> {
        let mut sequences = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            sequences.push(self.sample_window(cache)?);
        }
        Some(Batch { sequences })
    }
}
