//! Enrichment entity: the structured + narrative LLM analysis attached
//! one-to-one to a [`crate::domain::post::Post`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Enrichment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    /// Placeholder row inserted at claim time; analysis not yet complete.
    Pending,
    /// Analysis completed and all fields populated.
    Completed,
    /// Analysis terminally failed (model exhausted retries, or JSON
    /// parsing failed after the regex-repair attempt).
    Failed,
}

/// A named entity mentioned in a post, as extracted by the enrichment
/// model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
}

/// Structured + narrative enrichment for one post.
///
/// ## Invariants
/// - At most one row exists per `post_id` (enforced by the store's unique
///   index / upsert semantics, spec §3).
/// - `summary.len() <= 50` for a `Completed` row (soft cap enforced by the
///   prompt contract, not re-validated here).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub post_id: i64,
    pub status: EnrichmentStatus,
    pub summary: String,
    pub tag: String,
    pub content_type: String,
    pub entities: Vec<Entity>,
    pub deep_interpretation: String,
    pub image_description: Option<String>,
    /// Supplemental field (SPEC_FULL §3): true when the post reads as an
    /// unfinished thread continuation. Grounded in
    /// `original_source/src/post_enrichment.py`'s `is_incomplete` field.
    pub continues_thread: bool,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Enrichment {
    /// Build the PENDING placeholder row inserted at claim time.
    pub fn pending(post_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            post_id,
            status: EnrichmentStatus::Pending,
            summary: String::new(),
            tag: String::new(),
            content_type: String::new(),
            entities: Vec::new(),
            deep_interpretation: String::new(),
            image_description: None,
            continues_thread: false,
            model_name: String::new(),
            created_at: now,
            completed_at: None,
        }
    }

    /// True once the enrichment has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            EnrichmentStatus::Completed | EnrichmentStatus::Failed
        )
    }
}
