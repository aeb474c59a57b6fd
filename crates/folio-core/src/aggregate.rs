use std::collections::BTreeMap;

use serde::Serialize;

use crate::DeduplicatedBatch;

/// Number of records per genre label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenreCount {
    counts: BTreeMap<String, usize>,
}

impl GenreCount {
    pub fn get(&self, genre: &str) -> usize {
        self.counts.get(genre).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn as_map(&self) -> &BTreeMap<String, usize> {
        &self.counts
    }

    /// Rows ordered by count descending, then label ascending.
    pub fn ranked(&self) -> Vec<(&str, usize)> {
        let mut rows = self
            .counts
            .iter()
            .map(|(genre, count)| (genre.as_str(), *count))
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        rows
    }
}

pub fn count_by_genre(batch: &DeduplicatedBatch) -> GenreCount {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in batch {
        *counts.entry(record.genre.clone()).or_default() += 1;
    }
    GenreCount { counts }
}
