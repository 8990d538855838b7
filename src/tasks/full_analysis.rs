//! Combined pipeline task (spec §6 `full_analysis`): enrichment, then
//! profile refresh, then intelligence-report synthesis, run as one job.

use serde_json::json;

use crate::config::cli::Cli;

use super::context::Context;
use super::{enrichment, profiling, reports};
use super::TaskResult;

/// Runs enrichment, profile analysis, and intelligence-report synthesis
/// back to back. Each stage's failure is recorded but does not prevent
/// the next stage from running (spec §7 "per-item failures never abort a
/// job"); overall success requires every stage to have succeeded.
pub async fn run(context: &Context, cli: &Cli) -> TaskResult {
    let enrichment_outcome = enrichment::run(context, cli).await;
    let profile_outcome = profiling::run_profile_analysis(context, cli).await;
    let report_outcome = reports::run_intelligence_report(context, cli).await;

    let success = enrichment_outcome.success && profile_outcome.success && report_outcome.success;

    let data = json!({
        "enrichment": enrichment_outcome.to_json(),
        "profile": profile_outcome.to_json(),
        "report": report_outcome.to_json(),
    });

    let summary = format!(
        "full_analysis: enrichment={e}, profile={p}, report={r}",
        e = enrichment_outcome.success,
        p = profile_outcome.success,
        r = report_outcome.success,
    );

    if success {
        TaskResult::ok(summary, data)
    } else {
        let mut errors = Vec::new();
        if let Some(error) = &enrichment_outcome.error {
            errors.push(format!("enrichment: {error}"));
        }
        if let Some(error) = &profile_outcome.error {
            errors.push(format!("profile: {error}"));
        }
        if let Some(error) = &report_outcome.error {
            errors.push(format!("report: {error}"));
        }
        TaskResult::failed(summary, errors.join("; "), data)
    }
}
