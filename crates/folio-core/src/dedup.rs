//! Greedy first-seen deduplication.
//!
//! Records are visited in input order. A record is kept unless it is judged a
//! duplicate of a record already kept; kept records are never revisited and
//! fields are never merged between a dropped record and its representative.
//! Kept records are indexed by their exact author string, which is the only
//! place the judge can ever say yes.

use std::collections::HashMap;

use serde::Serialize;

use crate::similarity::SimilarityJudge;
use crate::{DeduplicatedBatch, NormalizedRecord};

/// A dropped record and the representative it collapsed into.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    pub discarded_index: usize,
    pub kept_index: usize,
    pub discarded_id: String,
    pub kept_id: String,
    pub title_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupOutcome {
    pub input_len: usize,
    pub batch: DeduplicatedBatch,
    pub duplicates: Vec<DuplicateMatch>,
}

impl DedupOutcome {
    pub fn removed(&self) -> usize {
        self.input_len - self.batch.len()
    }
}

#[derive(Debug, Default)]
pub struct DedupEngine {
    judge: SimilarityJudge,
}

impl DedupEngine {
    pub fn new(judge: SimilarityJudge) -> Self {
        Self { judge }
    }

    pub fn judge(&self) -> &SimilarityJudge {
        &self.judge
    }

    pub fn apply(&self, records: Vec<NormalizedRecord>) -> DedupOutcome {
        let input_len = records.len();
        let mut kept: Vec<NormalizedRecord> = Vec::new();
        let mut kept_input_index: Vec<usize> = Vec::new();
        let mut by_authors: HashMap<String, Vec<usize>> = HashMap::new();
        let mut duplicates = Vec::new();

        for (input_index, record) in records.into_iter().enumerate() {
            let matched = by_authors.get(&record.authors).and_then(|slots| {
                slots.iter().find_map(|&slot| {
                    self.judge
                        .duplicate_score(&record, &kept[slot])
                        .map(|score| (slot, score))
                })
            });

            match matched {
                Some((slot, title_score)) => duplicates.push(DuplicateMatch {
                    discarded_index: input_index,
                    kept_index: kept_input_index[slot],
                    discarded_id: record.id,
                    kept_id: kept[slot].id.clone(),
                    title_score,
                }),
                None => {
                    by_authors
                        .entry(record.authors.clone())
                        .or_default()
                        .push(kept.len());
                    kept_input_index.push(input_index);
                    kept.push(record);
                }
            }
        }

        DedupOutcome {
            input_len,
            batch: DeduplicatedBatch::from_accepted(kept),
            duplicates,
        }
    }

    pub fn deduplicate(&self, records: Vec<NormalizedRecord>) -> DeduplicatedBatch {
        self.apply(records).batch
    }
}

/// Deduplicate with the default judge.
pub fn deduplicate(records: Vec<NormalizedRecord>) -> DeduplicatedBatch {
    DedupEngine::default().deduplicate(records)
}
