//! Account entity: scheduling state for one monitored social-media handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fetch frequency tier, driving the nominal interval between crawls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Checked roughly every 20 minutes.
    High,
    /// Checked roughly every 90 minutes.
    Medium,
    /// Checked roughly every 3-5 hours.
    Low,
}

/// Per-account fetch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Never successfully fetched yet.
    Pending,
    /// Last fetch attempt succeeded.
    Ok,
    /// Last fetch attempt failed but retries remain.
    Failed,
    /// Consecutive failures reached the threshold; never selected for fetch.
    Quarantined,
}

/// A monitored social-media account and its scheduling state.
///
/// ## Invariants
/// - `handle` is non-empty once trimmed.
/// - `status == Quarantined` iff `consecutive_failures >= max_failures` for
///   the configured threshold (enforced by [`crate::domain::scheduler`], not
///   by this type, since the threshold is a runtime configuration value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub handle: String,
    pub tier: Tier,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub next_fetch_at: DateTime<Utc>,
    pub status: AccountStatus,
    pub consecutive_failures: u32,
    pub avg_posts_per_day: f64,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Build a freshly bootstrapped account pinned to `next_fetch_at = now`
    /// so it is immediately eligible for its first crawl.
    pub fn bootstrap(handle: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            handle: handle.into(),
            tier: Tier::Medium,
            last_fetched_at: None,
            next_fetch_at: now,
            status: AccountStatus::Pending,
            consecutive_failures: 0,
            avg_posts_per_day: 0.0,
            created_at: now,
        }
    }

    /// True when the account is younger than 3 days relative to `now`.
    ///
    /// Used by the cold-start fallback in tier reclassification (spec
    /// §4.5): a brand-new account is pinned to [`Tier::Medium`] regardless
    /// of observed posting activity.
    pub fn is_cold_start(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) < chrono::Duration::days(3)
    }
}
