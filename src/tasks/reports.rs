//! Report-synthesis tasks (spec §6): `intelligence_report` and
//! `kol_report`.

use serde_json::json;

use crate::config::cli::Cli;
use crate::domain::report_synth::{ReportFlow, ReportKindOutcome, ReportSynthConfig, ReportSynthesizer};

use super::context::Context;
use super::TaskResult;

fn synthesizer(context: &Context, config: ReportSynthConfig) -> ReportSynthesizer {
    ReportSynthesizer::new(
        context.store.clone(),
        context.model_client.clone(),
        Some(context.note_publisher.clone()),
        context.clock.clone(),
        config,
    )
}

fn kind_outcome_json(outcome: &ReportKindOutcome) -> serde_json::Value {
    json!({
        "kind": format!("{:?}", outcome.kind),
        "candidates_considered": outcome.candidates_considered,
        "posts_packed": outcome.posts_packed,
        "succeeded": outcome.succeeded(),
        "model_outcomes": outcome.model_outcomes.iter().map(|variant| json!({
            "model_id": variant.model_id,
            "success": variant.success,
            "error": variant.error,
        })).collect::<Vec<_>>(),
    })
}

/// Whole-roster report synthesis, fanned out across the configured model
/// list per variant (spec §4.9).
pub async fn run_intelligence_report(context: &Context, cli: &Cli) -> TaskResult {
    let report_settings = &context.settings.report;
    let model_settings = &context.settings.model;

    let flow = cli
        .flow
        .map(ReportFlow::from)
        .unwrap_or(ReportFlow::Dual);

    let config = ReportSynthConfig {
        hours: cli.hours.unwrap_or(report_settings.hours),
        limit: cli.report_limit.unwrap_or(report_settings.limit),
        candidate_multiplier: report_settings.candidate_multiplier,
        max_context_chars: report_settings.max_context_chars,
        exclude_tags: report_settings.exclude_tags.clone(),
        model_ids: model_settings.report_model_ids.clone(),
        max_retries: model_settings.max_retries,
        temperature: report_settings.temperature,
        flow,
        scoring: context.settings.scoring.to_domain(),
    };

    let synthesizer = synthesizer(context, config);

    match synthesizer.run().await {
        Ok(outcome) => {
            let succeeded = outcome.succeeded();
            let data = json!({
                "kinds": outcome.kinds.iter().map(kind_outcome_json).collect::<Vec<_>>(),
            });
            if succeeded {
                TaskResult::ok("intelligence_report: at least one variant succeeded", data)
            } else {
                TaskResult::failed(
                    "intelligence_report: every model variant failed",
                    "no report variant persisted",
                    data,
                )
            }
        }
        Err(error) => TaskResult::failed("intelligence_report: job failed", error.to_string(), json!({})),
    }
}

/// Single-account "KOL" report synthesis (spec §4.9 "KOL reports").
pub async fn run_kol_report(context: &Context, cli: &Cli) -> TaskResult {
    let Some(account_id) = cli.user_id else {
        return TaskResult::failed(
            "kol_report: --user-id is required",
            "missing required flag --user-id",
            json!({}),
        );
    };

    let report_settings = &context.settings.report;
    let model_settings = &context.settings.model;
    let days = cli.days.unwrap_or(30);

    let config = ReportSynthConfig {
        hours: report_settings.hours,
        limit: report_settings.limit,
        candidate_multiplier: report_settings.candidate_multiplier,
        max_context_chars: report_settings.max_context_chars,
        exclude_tags: report_settings.exclude_tags.clone(),
        model_ids: model_settings.report_model_ids.clone(),
        max_retries: model_settings.max_retries,
        temperature: report_settings.temperature,
        flow: ReportFlow::Deep,
        scoring: context.settings.scoring.to_domain(),
    };

    let synthesizer = synthesizer(context, config);

    match synthesizer.run_for_account(account_id, days).await {
        Ok(outcome) => {
            let data = kind_outcome_json(&outcome);
            if outcome.succeeded() {
                TaskResult::ok(format!("kol_report: report persisted for account {account_id}"), data)
            } else {
                TaskResult::failed(
                    format!("kol_report: no model variant persisted for account {account_id}"),
                    "no report variant persisted",
                    data,
                )
            }
        }
        Err(error) => TaskResult::failed("kol_report: job failed", error.to_string(), json!({})),
    }
}
