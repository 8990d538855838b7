//! Profile entity: per-account summary document, overwritten on refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured per-account profile document produced by the profile
/// analyzer (spec §4.10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub account_id: i64,
    pub keywords: Vec<String>,
    pub sentiment_trend: String,
    pub mentioned_asset_categories: Vec<String>,
    pub interaction_graph: Vec<String>,
    pub role_label: String,
    pub trajectory_summary: String,
    pub generated_at: DateTime<Utc>,
}

impl Profile {
    /// True when the profile is older than `max_age` relative to `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.generated_at) > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn profile_generated_at(ts: DateTime<Utc>) -> Profile {
        Profile {
            account_id: 1,
            keywords: vec![],
            sentiment_trend: "neutral".to_owned(),
            mentioned_asset_categories: vec![],
            interaction_graph: vec![],
            role_label: "builder".to_owned(),
            trajectory_summary: String::new(),
            generated_at: ts,
        }
    }

    #[rstest]
    fn staleness_is_relative_to_generation_time() {
        let generated = Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp");
        let profile = profile_generated_at(generated);

        assert!(!profile.is_stale(generated + chrono::Duration::days(6), chrono::Duration::days(7)));
        assert!(profile.is_stale(generated + chrono::Duration::days(8), chrono::Duration::days(7)));
    }
}
