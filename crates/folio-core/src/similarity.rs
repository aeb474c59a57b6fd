//! Record similarity: exact author gate plus a pluggable fuzzy title score.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

use crate::NormalizedRecord;

/// Title scores strictly above this value (0-100 scale) mark a duplicate.
pub const DUPLICATE_THRESHOLD: f64 = 90.0;

/// Scores two titles on a 0-100 scale, independent of word order.
pub trait TitleScorer: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Lowercase, punctuation to spaces, whitespace collapsed.
fn process(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn sorted_tokens(processed: &str) -> String {
    let mut tokens = processed.split_whitespace().collect::<Vec<_>>();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                row[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()]
}

/// Insertion/deletion distance between two strings, counted in characters.
fn indel_distance(a: &str, b: &str) -> usize {
    let a = a.chars().collect::<Vec<_>>();
    let b = b.chars().collect::<Vec<_>>();
    a.len() + b.len() - 2 * lcs_len(&a, &b)
}

fn normalized_similarity(distance: usize, len_sum: usize) -> f64 {
    if len_sum == 0 {
        return 100.0;
    }
    100.0 - 100.0 * distance as f64 / len_sum as f64
}

fn indel_ratio(a: &str, b: &str) -> f64 {
    let len_sum = a.chars().count() + b.chars().count();
    normalized_similarity(indel_distance(a, b), len_sum)
}

pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    indel_ratio(&sorted_tokens(&process(a)), &sorted_tokens(&process(b)))
}

/// Title with any `:`-delimited subtitle removed. A title that is only a
/// subtitle is kept whole.
pub fn main_title(title: &str) -> &str {
    match title.split_once(':') {
        Some((head, _)) if !head.trim().is_empty() => head,
        _ => title,
    }
}

/// Indel similarity of the sorted token strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSortScorer;

impl TitleScorer for TokenSortScorer {
    fn name(&self) -> &'static str {
        "token_sort"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        token_sort_ratio(a, b)
    }
}

/// Token-sort ratio of the main titles, so an appended `: subtitle` does not
/// count against a match while extra words in the main title still do.
#[derive(Debug, Clone, Copy, Default)]
pub struct MainTitleScorer;

impl TitleScorer for MainTitleScorer {
    fn name(&self) -> &'static str {
        "main_title"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        token_sort_ratio(main_title(a), main_title(b))
    }
}

/// Jaro-Winkler over the sorted token strings, scaled to 0-100.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinklerScorer;

impl TitleScorer for JaroWinklerScorer {
    fn name(&self) -> &'static str {
        "jaro_winkler"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        let a = sorted_tokens(&process(a));
        let b = sorted_tokens(&process(b));
        if a.is_empty() && b.is_empty() {
            return 100.0;
        }
        jaro_winkler(&a, &b) * 100.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleScorerKind {
    #[default]
    MainTitle,
    TokenSort,
    JaroWinkler,
}

impl TitleScorerKind {
    pub fn scorer(self) -> Box<dyn TitleScorer> {
        match self {
            Self::MainTitle => Box::new(MainTitleScorer),
            Self::TokenSort => Box::new(TokenSortScorer),
            Self::JaroWinkler => Box::new(JaroWinklerScorer),
        }
    }
}

impl FromStr for TitleScorerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main_title" => Ok(Self::MainTitle),
            "token_sort" => Ok(Self::TokenSort),
            "jaro_winkler" => Ok(Self::JaroWinkler),
            other => Err(format!("unknown title scorer `{other}`")),
        }
    }
}

impl fmt::Display for TitleScorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scorer().name())
    }
}

pub struct SimilarityJudge {
    scorer: Box<dyn TitleScorer>,
    threshold: f64,
}

impl Default for SimilarityJudge {
    fn default() -> Self {
        Self::new(Box::new(MainTitleScorer))
    }
}

impl fmt::Debug for SimilarityJudge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimilarityJudge")
            .field("scorer", &self.scorer.name())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl SimilarityJudge {
    pub fn new(scorer: Box<dyn TitleScorer>) -> Self {
        Self {
            scorer,
            threshold: DUPLICATE_THRESHOLD,
        }
    }

    pub fn from_kind(kind: TitleScorerKind) -> Self {
        Self::new(kind.scorer())
    }

    /// Non-finite thresholds are ignored.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        if threshold.is_finite() {
            self.threshold = threshold.clamp(0.0, 100.0);
        }
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    /// Title score for two records by the same authors; `None` when the
    /// author strings differ.
    pub fn title_score(&self, a: &NormalizedRecord, b: &NormalizedRecord) -> Option<f64> {
        if a.authors != b.authors {
            return None;
        }
        Some(self.scorer.score(&a.title, &b.title))
    }

    /// The title score when `a` and `b` are judged the same book.
    pub fn duplicate_score(&self, a: &NormalizedRecord, b: &NormalizedRecord) -> Option<f64> {
        self.title_score(a, b).filter(|score| *score > self.threshold)
    }

    pub fn is_duplicate(&self, a: &NormalizedRecord, b: &NormalizedRecord) -> bool {
        self.duplicate_score(a, b).is_some()
    }
}
