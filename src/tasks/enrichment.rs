//! Enrichment task (spec §6 `post_insights`).

use serde_json::json;

use crate::config::cli::Cli;
use crate::domain::enricher::{Enricher, EnricherConfig, ImageDeliveryMode};

use super::context::Context;
use super::TaskResult;

pub async fn run(context: &Context, cli: &Cli) -> TaskResult {
    let enricher_settings = &context.settings.enricher;
    let worker_settings = &context.settings.workers;
    let model_settings = &context.settings.model;

    let config = EnricherConfig {
        batch_size: cli.batch_size.unwrap_or(enricher_settings.batch_size),
        hours_back: cli.hours_back.unwrap_or(enricher_settings.hours_back),
        text_worker_count: worker_settings.enrich_text_workers,
        vision_worker_count: worker_settings.enrich_vision_workers,
        text_model_id: model_settings.text_model_id.clone(),
        primary_vision_model_id: model_settings.primary_vision_model_id.clone(),
        secondary_vision_model_id: model_settings.secondary_vision_model_id.clone(),
        max_retries: model_settings.max_retries,
        temperature: enricher_settings.temperature,
        image_delivery: if enricher_settings.inline_base64_images {
            ImageDeliveryMode::InlineBase64
        } else {
            ImageDeliveryMode::DirectUrl
        },
    };

    let enricher = Enricher::new(
        context.store.clone(),
        context.model_client.clone(),
        context.image_preprocessor.clone(),
        context.clock.clone(),
        config,
    );

    match enricher.run().await {
        Ok(outcome) => TaskResult::ok(
            format!(
                "post_insights: {claimed} claimed, {completed} completed, {failed} failed",
                claimed = outcome.claimed,
                completed = outcome.completed,
                failed = outcome.failed,
            ),
            json!({
                "claimed": outcome.claimed,
                "completed": outcome.completed,
                "failed": outcome.failed,
            }),
        ),
        Err(error) => TaskResult::failed("post_insights: job failed", error.to_string(), json!({})),
    }
}
