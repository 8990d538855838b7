//! CLI task dispatcher (spec §6): one tagged outcome per task kind,
//! printed as JSON or text per `--output`.
//!
//! Each task is a thin wiring layer over the domain jobs in
//! [`crate::domain`]: per-item failures never abort a job (spec §7
//! "Propagation"), so every task function returns `Ok` with a
//! [`TaskResult`] whose `success` flag already encodes the task-level
//! verdict; only configuration/connection failures short-circuit with an
//! `Err`.

mod crawl;
mod enrichment;
mod full_analysis;
mod profiling;
mod reports;

pub mod context;

use serde_json::{json, Value};

use crate::config::cli::{Cli, TaskName};
use crate::config::Settings;
use context::{build_context, Context, ContextError};

/// The outcome of one task invocation (spec §7 "every task returns a JSON
/// object... containing at minimum `{success, error?, ...counters}`").
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub success: bool,
    pub error: Option<String>,
    /// One-line human summary for `--output=text`.
    pub summary: String,
    /// Task-specific counters, always a JSON object.
    pub data: Value,
}

impl TaskResult {
    fn ok(summary: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            error: None,
            summary: summary.into(),
            data,
        }
    }

    fn failed(summary: impl Into<String>, error: impl Into<String>, data: Value) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            summary: summary.into(),
            data,
        }
    }

    /// Render as the JSON object required by spec §7, merging `success`/
    /// `error` into the task-specific counters.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut object = match &self.data {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_owned(), other.clone());
                map
            }
        };
        object.insert("success".to_owned(), json!(self.success));
        if let Some(error) = &self.error {
            object.insert("error".to_owned(), json!(error));
        }
        Value::Object(object)
    }
}

/// Run the task named by `cli.task`, having resolved `settings` (CLI
/// overlay already applied by the caller).
///
/// # Errors
/// Returns a fatal [`ContextError`] only when adapter/database wiring
/// itself fails (spec §7 "Configuration missing... fail fast"); task-level
/// failures are reported inside the returned [`TaskResult`].
pub async fn dispatch(cli: &Cli, settings: Settings) -> Result<TaskResult, ContextError> {
    let context = build_context(settings).await?;

    if cli.recreate_db {
        if let Err(error) = context.store.initialize_schema().await {
            return Ok(TaskResult::failed(
                "schema bootstrap failed",
                error.to_string(),
                json!({}),
            ));
        }
    }

    let result = match cli.task {
        TaskName::HighFreq => crawl::run_tier(&context, cli, crate::domain::Tier::High).await,
        TaskName::MediumFreq => crawl::run_tier(&context, cli, crate::domain::Tier::Medium).await,
        TaskName::LowFreq => crawl::run_tier(&context, cli, crate::domain::Tier::Low).await,
        TaskName::FullCrawl => crawl::run_full_crawl(&context, cli).await,
        TaskName::Scavenger => crawl::run_scavenger(&context, cli).await,
        TaskName::UserProfiling => profiling::run_tier_recompute(&context).await,
        TaskName::PostInsights => enrichment::run(&context, cli).await,
        TaskName::UserAnalysis => profiling::run_profile_analysis(&context, cli).await,
        TaskName::IntelligenceReport => reports::run_intelligence_report(&context, cli).await,
        TaskName::KolReport => reports::run_kol_report(&context, cli).await,
        TaskName::FullAnalysis => full_analysis::run(&context, cli).await,
    };

    Ok(result)
}
