//! Pure scoring functions. Relevance depends only on (similarity, age,
//! weight), so the same inputs always rank the same way.

use chrono::{DateTime, Utc};

use crate::types::MemoryFragment;

use super::embedding::Embedding;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub similarity: f64,
    pub recency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.7,
            recency: 0.3,
        }
    }
}

/// 0.5^(age / half_life); future timestamps count as age 0
pub fn recency(age_hours: f64, half_life_hours: f64) -> f64 {
    if half_life_hours <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(age_hours.max(0.0) / half_life_hours)
}

pub fn age_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - created_at).num_milliseconds() as f64 / 3_600_000.0
}

/// |a ∩ b| / |a ∪ b| over sorted, de-duplicated keyword lists
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (mut i, mut j, mut shared) = (0, 0, 0usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Cosine when both sides carry an embedding, keyword Jaccard otherwise.
/// Negative cosine is floored at 0.
pub fn similarity(
    query_embedding: Option<&Embedding>,
    query_keywords: &[String],
    fragment: &MemoryFragment,
) -> f64 {
    match (query_embedding, fragment.embedding.as_ref()) {
        (Some(q), Some(f)) => (q.cosine_similarity(f) as f64).max(0.0),
        _ => jaccard(query_keywords, &fragment.keywords),
    }
}

pub fn relevance_score(
    similarity: f64,
    age_hours: f64,
    half_life_hours: f64,
    weight: f64,
    weights: ScoreWeights,
) -> f64 {
    (weights.similarity * similarity + weights.recency * recency(age_hours, half_life_hours))
        * weight
}

/// Compaction keeps fragments with the highest retention score
pub fn retention_score(fragment: &MemoryFragment, now: DateTime<Utc>) -> f64 {
    fragment.weight as f64
        * recency(age_hours(fragment.created_at, now), fragment.half_life_hours)
}
