//! Report entity: an append-only synthesized digest document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The report variant produced by one synthesis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Digest-style, categorical bullet lists, bandwidth-light.
    DailyLight,
    /// Five-section editorial analysis with mandatory citations.
    DailyDeep,
    /// Per-account monthly key-opinion-leader style report.
    MonthlyKol,
}

/// A persisted report. Append-only; never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub kind: ReportKind,
    pub title: String,
    pub body_markdown: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub account_id: Option<i64>,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
}
