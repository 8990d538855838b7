//! Profile analyzer: per-account summary of recent enriched posts into a
//! structured profile document (spec §4.10).
//!
//! Runs sequentially — each pass consumes a full model context, so
//! parallelism adds little (spec §4.10) — unlike the fetch worker pool and
//! enricher, which are explicitly bounded-concurrency.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::Deserialize;
use tracing::warn;

use super::error::Error;
use super::ports::{ModelClient, Store};
use super::profile::Profile;

/// Profile analyzer run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileAnalyzerConfig {
    pub min_completed_enrichments: u32,
    pub recent_days: i64,
    pub profile_max_age_days: i64,
    pub smart_model_id: String,
    pub max_retries: u32,
    pub temperature: f32,
}

impl Default for ProfileAnalyzerConfig {
    fn default() -> Self {
        Self {
            min_completed_enrichments: 3,
            recent_days: 30,
            profile_max_age_days: 7,
            smart_model_id: "smart-default".to_owned(),
            max_retries: 3,
            temperature: 0.2,
        }
    }
}

/// Aggregate counters for one profile-analyzer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileBatchOutcome {
    pub accounts_considered: u32,
    pub profiles_updated: u32,
    pub profiles_failed: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct RawProfileJson {
    #[serde(default)]
    keywords: Vec<String>,
    sentiment_trend: String,
    #[serde(default)]
    mentioned_asset_categories: Vec<String>,
    #[serde(default)]
    interaction_graph: Vec<String>,
    role_label: String,
    trajectory_summary: String,
}

const PROFILE_PROMPT_PREAMBLE: &str = "Summarize this account's recent activity into a single \
strict JSON object with exactly these fields: keywords (list of strings), \
sentiment_trend, mentioned_asset_categories (list of strings), \
interaction_graph (list of strings), role_label, trajectory_summary. \
No prose outside the JSON object.";

/// Sequential per-account profile refresh pass.
pub struct ProfileAnalyzer {
    store: Arc<dyn Store>,
    model_client: Arc<dyn ModelClient>,
    clock: Arc<dyn Clock>,
    config: ProfileAnalyzerConfig,
}

impl ProfileAnalyzer {
    pub fn new(
        store: Arc<dyn Store>,
        model_client: Arc<dyn ModelClient>,
        clock: Arc<dyn Clock>,
        config: ProfileAnalyzerConfig,
    ) -> Self {
        Self {
            store,
            model_client,
            clock,
            config,
        }
    }

    /// Refresh every account due for profiling, one at a time.
    pub async fn run(&self) -> Result<ProfileBatchOutcome, Error> {
        let now = self.clock.utc();
        let accounts = self
            .store
            .select_accounts_due_for_profiling(
                self.config.min_completed_enrichments,
                self.config.recent_days,
                self.config.profile_max_age_days,
                now,
            )
            .await
            .map_err(|error| Error::database_constraint(error.to_string()))?;

        let mut outcome = ProfileBatchOutcome {
            accounts_considered: u32::try_from(accounts.len()).unwrap_or(u32::MAX),
            ..ProfileBatchOutcome::default()
        };

        for account in accounts {
            match self.refresh_one(account.id, now).await {
                Ok(true) => outcome.profiles_updated += 1,
                Ok(false) | Err(_) => outcome.profiles_failed += 1,
            }
        }

        Ok(outcome)
    }

    async fn refresh_one(&self, account_id: i64, now: DateTime<Utc>) -> Result<bool, Error> {
        let enrichments = self
            .store
            .select_recent_enrichments_for_account(account_id, self.config.recent_days, now)
            .await
            .map_err(|error| Error::database_constraint(error.to_string()))?;

        if enrichments.is_empty() {
            return Ok(false);
        }

        let prompt = build_profile_prompt(&enrichments);
        let response = self
            .model_client
            .text_chat(
                &prompt,
                &self.config.smart_model_id,
                self.config.temperature,
                self.config.max_retries,
            )
            .await
            .map_err(|error| {
                warn!(account_id, error = %error, "profile model call failed");
                Error::transient_network(error.to_string())
            })?;

        let parsed = serde_json::from_str::<RawProfileJson>(&response.content).map_err(|error| {
            warn!(account_id, error = %error, "profile JSON parse failed");
            Error::json_parse_failure(error.to_string())
        })?;

        let profile = Profile {
            account_id,
            keywords: parsed.keywords,
            sentiment_trend: parsed.sentiment_trend,
            mentioned_asset_categories: parsed.mentioned_asset_categories,
            interaction_graph: parsed.interaction_graph,
            role_label: parsed.role_label,
            trajectory_summary: parsed.trajectory_summary,
            generated_at: now,
        };

        self.store
            .upsert_profile(&profile)
            .await
            .map_err(|error| Error::database_constraint(error.to_string()))
    }
}

/// Build the fixed profile-analyzer prompt from a timestamped list of
/// recent enrichments (spec §4.10).
fn build_profile_prompt(enrichments: &[super::ports::EnrichedPostRow]) -> String {
    let mut body = String::from(PROFILE_PROMPT_PREAMBLE);
    body.push_str("\n\nRECENT ACTIVITY:\n");
    for row in enrichments {
        body.push_str(&format!(
            "[{}] {}: {}\n",
            row.post.published_at.to_rfc3339(),
            row.enrichment.tag,
            row.enrichment.deep_interpretation
        ));
    }
    body
}
