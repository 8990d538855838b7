//! Crawl tasks (spec §6): `high_freq`/`medium_freq`/`low_freq`,
//! `full_crawl`, and `scavenger`.

use mockable::Clock;
use serde_json::json;
use tracing::info;

use crate::config::cli::Cli;
use crate::domain::account::Tier;
use crate::domain::fetch_worker::{FetchWorkerConfig, FetchWorkerPool, RandJitterSleeper};

use super::context::Context;
use super::TaskResult;

fn tier_limit(context: &Context, tier: Tier) -> u32 {
    match tier {
        Tier::High => context.settings.task_limits.high_limit,
        Tier::Medium => context.settings.task_limits.medium_limit,
        Tier::Low => context.settings.task_limits.low_limit,
    }
}

fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::High => "high_freq",
        Tier::Medium => "medium_freq",
        Tier::Low => "low_freq",
    }
}

fn fetch_worker_pool(context: &Context, max_workers: usize) -> FetchWorkerPool {
    let config = FetchWorkerConfig {
        max_workers,
        tier_intervals: context.settings.tier_intervals.to_domain(),
        retry_window: context.settings.failure_handling.to_domain(),
        max_failures: context.settings.failure_handling.max_failed_attempts,
    };
    FetchWorkerPool::new(
        context.store.clone(),
        context.gateway.clone(),
        context.clock.clone(),
        std::sync::Arc::new(RandJitterSleeper),
        config,
    )
}

/// Quiet window check shared by every crawl task (spec §4.5/§8.5): running
/// a crawl task inside the window yields zero fetched posts.
fn quiet_window_active(context: &Context) -> bool {
    let window = context.settings.quiet_window.to_domain();
    window.contains(context.clock.utc())
}

pub async fn run_tier(context: &Context, cli: &Cli, tier: Tier) -> TaskResult {
    let label = tier_label(tier);
    if quiet_window_active(context) {
        info!(task = label, "quiet window active, skipping crawl");
        return TaskResult::ok(
            format!("{label}: quiet window active, 0 accounts processed"),
            json!({"accounts_processed": 0, "accounts_success": 0, "accounts_failed": 0, "posts_inserted": 0, "quiet_window": true}),
        );
    }

    let limit = cli.limit.unwrap_or_else(|| tier_limit(context, tier));
    let max_workers = cli
        .max_workers
        .unwrap_or(context.settings.workers.fetch_max_workers);

    let accounts = match context
        .store
        .lock_and_select_due(tier, limit, context.clock.utc())
        .await
    {
        Ok(accounts) => accounts,
        Err(error) => {
            return TaskResult::failed(format!("{label}: account selection failed"), error.to_string(), json!({}));
        }
    };

    let pool = fetch_worker_pool(context, max_workers);
    let outcome = pool.process_batch(accounts).await;

    TaskResult::ok(
        format!(
            "{label}: {processed} processed, {success} succeeded, {failed} failed, {inserted} posts inserted",
            processed = outcome.accounts_processed,
            success = outcome.accounts_success,
            failed = outcome.accounts_failed,
            inserted = outcome.posts_inserted,
        ),
        json!({
            "accounts_processed": outcome.accounts_processed,
            "accounts_success": outcome.accounts_success,
            "accounts_failed": outcome.accounts_failed,
            "posts_inserted": outcome.posts_inserted,
        }),
    )
}

/// Run every tier back-to-back in batches, as a single job (spec §6
/// `full_crawl`).
pub async fn run_full_crawl(context: &Context, cli: &Cli) -> TaskResult {
    if quiet_window_active(context) {
        return TaskResult::ok(
            "full_crawl: quiet window active, 0 accounts processed",
            json!({"accounts_processed": 0, "accounts_success": 0, "accounts_failed": 0, "posts_inserted": 0, "quiet_window": true}),
        );
    }

    let batch_size = cli
        .batch_size
        .unwrap_or(context.settings.task_limits.full_crawl_batch_size);
    let max_workers = cli
        .max_workers
        .unwrap_or(context.settings.workers.fetch_max_workers);
    let pool = fetch_worker_pool(context, max_workers);

    let mut processed = 0u32;
    let mut success = 0u32;
    let mut failed = 0u32;
    let mut inserted = 0u64;
    let mut any_error = None;

    for tier in [Tier::High, Tier::Medium, Tier::Low] {
        loop {
            let accounts = match context
                .store
                .lock_and_select_due(tier, batch_size, context.clock.utc())
                .await
            {
                Ok(accounts) => accounts,
                Err(error) => {
                    any_error = Some(error.to_string());
                    break;
                }
            };
            if accounts.is_empty() {
                break;
            }
            let batch_len = u32::try_from(accounts.len()).unwrap_or(u32::MAX);
            let outcome = pool.process_batch(accounts).await;
            processed += outcome.accounts_processed;
            success += outcome.accounts_success;
            failed += outcome.accounts_failed;
            inserted += outcome.posts_inserted;
            if batch_len < batch_size {
                break;
            }
        }
    }

    let data = json!({
        "accounts_processed": processed,
        "accounts_success": success,
        "accounts_failed": failed,
        "posts_inserted": inserted,
    });

    match any_error {
        Some(error) => TaskResult::failed("full_crawl: one or more batches failed", error, data),
        None => TaskResult::ok(
            format!("full_crawl: {processed} processed, {success} succeeded, {failed} failed"),
            data,
        ),
    }
}

/// Stale-account safety net (spec §4.5/§6 `scavenger`): picks up accounts
/// whose `next_fetch_at` has drifted well into the past.
pub async fn run_scavenger(context: &Context, cli: &Cli) -> TaskResult {
    if quiet_window_active(context) {
        info!(task = "scavenger", "quiet window active, skipping crawl");
        return TaskResult::ok(
            "scavenger: quiet window active, 0 accounts processed",
            json!({"accounts_processed": 0, "accounts_success": 0, "accounts_failed": 0, "posts_inserted": 0, "quiet_window": true}),
        );
    }

    let hours_back = cli
        .hours_back
        .unwrap_or(context.settings.task_limits.scavenger_hours_back);
    let max_workers = cli
        .max_workers
        .unwrap_or(context.settings.workers.fetch_max_workers);
    let limit = context.settings.task_limits.high_limit
        + context.settings.task_limits.medium_limit
        + context.settings.task_limits.low_limit;

    let accounts = match context
        .store
        .select_stale(hours_back, limit, context.clock.utc())
        .await
    {
        Ok(accounts) => accounts,
        Err(error) => {
            return TaskResult::failed("scavenger: stale-account selection failed", error.to_string(), json!({}));
        }
    };

    let pool = fetch_worker_pool(context, max_workers);
    let outcome = pool.process_batch(accounts).await;

    TaskResult::ok(
        format!(
            "scavenger: {processed} processed, {success} succeeded, {failed} failed",
            processed = outcome.accounts_processed,
            success = outcome.accounts_success,
            failed = outcome.accounts_failed,
        ),
        json!({
            "accounts_processed": outcome.accounts_processed,
            "accounts_success": outcome.accounts_success,
            "accounts_failed": outcome.accounts_failed,
            "posts_inserted": outcome.posts_inserted,
        }),
    )
}
