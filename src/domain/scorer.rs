//! Deterministic value-score computation (spec §4.8).
//!
//! Grounded term-for-term in `original_source/src/scoring.py::
//! calculate_value_score`: base + content-type table lookup + tag table
//! lookup + body-length weight + interpretation-length weight + media bonus
//! + link bonus, rounded to 4 decimal places.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::post::PostKind;

/// Weights and lookup tables driving [`score`]. All fields are configured;
/// defaults mirror the original system's defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub base_score: f64,
    pub content_type_scores: HashMap<String, f64>,
    pub tag_scores: HashMap<String, f64>,
    pub body_length_weight: f64,
    pub interpretation_length_weight: f64,
    pub media_bonus: f64,
    pub link_bonus: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: 1.0,
            content_type_scores: HashMap::new(),
            tag_scores: HashMap::new(),
            body_length_weight: 0.0,
            interpretation_length_weight: 0.0,
            media_bonus: 0.0,
            link_bonus: 0.0,
        }
    }
}

/// The minimal post+enrichment projection the scorer needs. Kept separate
/// from [`crate::domain::ports::EnrichedPostRow`] so the scorer stays a
/// pure function of plain values with no store dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPostInput<'a> {
    pub kind: PostKind,
    pub body: &'a str,
    pub content_type: &'a str,
    pub tag: &'a str,
    pub interpretation: &'a str,
    pub has_media: bool,
    pub published_at: DateTime<Utc>,
}

/// Compute the deterministic value score for one post.
///
/// Pure: no randomness, no time-dependent state (spec invariant 6).
///
/// # Examples
/// ```
/// use intel_pipeline::domain::post::PostKind;
/// use intel_pipeline::domain::scorer::{score, ScoredPostInput, ScoringConfig};
/// use chrono::{TimeZone, Utc};
///
/// let config = ScoringConfig {
///     base_score: 1.0,
///     ..ScoringConfig::default()
/// };
/// let input = ScoredPostInput {
///     kind: PostKind::Original,
///     body: "",
///     content_type: "",
///     tag: "",
///     interpretation: "",
///     has_media: false,
///     published_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid"),
/// };
/// assert_eq!(score(&input, &config), 1.0);
/// ```
#[must_use]
pub fn score(input: &ScoredPostInput<'_>, config: &ScoringConfig) -> f64 {
    let mut total = config.base_score;

    if let Some(value) = config.content_type_scores.get(input.content_type) {
        total += value;
    }
    if let Some(value) = config.tag_scores.get(input.tag) {
        total += value;
    }

    let body_len = i32::try_from(input.body.chars().count()).unwrap_or(i32::MAX);
    total += f64::from(body_len) * config.body_length_weight;

    let interp_len = i32::try_from(input.interpretation.chars().count()).unwrap_or(i32::MAX);
    total += f64::from(interp_len) * config.interpretation_length_weight;

    if input.has_media {
        total += config.media_bonus;
    }

    if input.kind == PostKind::LinkShare || input.body.contains("http") {
        total += config.link_bonus;
    }

    (total * 10_000.0).round() / 10_000.0
}

/// Ordering for candidate ranking: score descending, then `published_at`
/// descending on ties (spec §4.8/§8). Scores are always finite sums of
/// finite configured weights, so `partial_cmp` only returns `None` in
/// practice for NaN configuration values, which this treats as equal.
#[must_use]
pub fn compare_candidates(
    a_score: f64,
    a_published_at: DateTime<Utc>,
    b_score: f64,
    b_published_at: DateTime<Utc>,
) -> std::cmp::Ordering {
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b_published_at.cmp(&a_published_at))
}
