//! Fetch worker pool: executes gateway-fetch + store-commit for a batch of
//! selected accounts with bounded parallelism and inter-request jitter
//! (spec §4.6).

use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::account::Account;
use super::ports::{GatewayClient, Store};
use super::scheduler::{self, RetryWindow, TierIntervals};

/// Jitter abstraction so tests can run a batch without real sleeps.
#[async_trait::async_trait]
pub trait JitterSleeper: Send + Sync {
    /// Sleep a random duration in `[min, max)` seconds.
    async fn jitter_sleep(&self, min_secs: u64, max_secs: u64);
}

/// Jitter sleeper backed by `tokio::time::sleep` and `rand::thread_rng`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandJitterSleeper;

#[async_trait::async_trait]
impl JitterSleeper for RandJitterSleeper {
    async fn jitter_sleep(&self, min_secs: u64, max_secs: u64) {
        let max_secs = max_secs.max(min_secs + 1);
        let delay = rand::thread_rng().gen_range(min_secs..max_secs);
        tokio::time::sleep(Duration::from_secs(delay)).await;
    }
}

/// Fetch worker pool configuration, resolved once at startup per the
/// CLI > env > file > default precedence in [`crate::config`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchWorkerConfig {
    pub max_workers: usize,
    pub tier_intervals: TierIntervals,
    pub retry_window: RetryWindow,
    pub max_failures: u32,
}

impl Default for FetchWorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            tier_intervals: TierIntervals::default(),
            retry_window: RetryWindow::default(),
            max_failures: 5,
        }
    }
}

/// Aggregate counters for one fetch batch run, mirroring the task-result
/// shape in `original_source/src/tasks.py::run_crawl_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchBatchOutcome {
    pub accounts_processed: u32,
    pub accounts_success: u32,
    pub accounts_failed: u32,
    pub posts_inserted: u64,
}

impl FetchBatchOutcome {
    fn merge(&mut self, other: FetchBatchOutcome) {
        self.accounts_processed += other.accounts_processed;
        self.accounts_success += other.accounts_success;
        self.accounts_failed += other.accounts_failed;
        self.posts_inserted += other.posts_inserted;
    }
}

/// Executes gateway fetches for a batch of accounts.
pub struct FetchWorkerPool {
    store: Arc<dyn Store>,
    gateway: Arc<dyn GatewayClient>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSleeper>,
    config: FetchWorkerConfig,
}

impl FetchWorkerPool {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn GatewayClient>,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn JitterSleeper>,
        config: FetchWorkerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            jitter,
            config,
        }
    }

    /// Process one batch of already-selected accounts.
    ///
    /// Ordering guarantee: none across accounts; within one account, all
    /// posts from one fetch are inserted in a single `insert_posts` call
    /// (spec §4.6/§5).
    pub async fn process_batch(&self, accounts: Vec<Account>) -> FetchBatchOutcome {
        if accounts.is_empty() {
            return FetchBatchOutcome::default();
        }

        let outcome = if self.config.max_workers <= 1 {
            self.process_sequentially(accounts).await
        } else {
            self.process_concurrently(accounts).await
        };

        if self.config.max_workers > 1 {
            self.jitter.jitter_sleep(60, 120).await;
        }

        outcome
    }

    async fn process_sequentially(&self, accounts: Vec<Account>) -> FetchBatchOutcome {
        let mut outcome = FetchBatchOutcome::default();
        let last_index = accounts.len().saturating_sub(1);
        for (index, account) in accounts.into_iter().enumerate() {
            outcome.merge(self.process_one(account).await);
            if index != last_index {
                self.jitter.jitter_sleep(6, 12).await;
            }
        }
        outcome
    }

    async fn process_concurrently(&self, accounts: Vec<Account>) -> FetchBatchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut handles = Vec::with_capacity(accounts.len());

        for account in accounts {
            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let gateway = Arc::clone(&self.gateway);
            let clock = Arc::clone(&self.clock);
            let config = self.config.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                process_account(&*store, &*gateway, &*clock, &config, account).await
            }));
        }

        let mut outcome = FetchBatchOutcome::default();
        for handle in handles {
            match handle.await {
                Ok(single) => outcome.merge(single),
                Err(error) => {
                    warn!(error = %error, "fetch worker task panicked");
                    outcome.accounts_processed += 1;
                    outcome.accounts_failed += 1;
                }
            }
        }
        outcome
    }

    async fn process_one(&self, account: Account) -> FetchBatchOutcome {
        process_account(&*self.store, &*self.gateway, &*self.clock, &self.config, account).await
    }
}

async fn process_account(
    store: &dyn Store,
    gateway: &dyn GatewayClient,
    clock: &dyn Clock,
    config: &FetchWorkerConfig,
    account: Account,
) -> FetchBatchOutcome {
    let now = clock.utc();
    match gateway.fetch_posts(&account.handle).await {
        Ok(posts) => {
            let inserted = if posts.is_empty() {
                0
            } else {
                match store.insert_posts(&posts).await {
                    Ok(count) => count,
                    Err(error) => {
                        warn!(account = %account.handle, error = %error, "post insert failed");
                        0
                    }
                }
            };

            let next_fetch_at = now
                + scheduler::interval_for_tier(
                    account.tier,
                    &config.tier_intervals,
                    &mut rand::thread_rng(),
                );
            let _ = store
                .mark_fetch_success(account.id, now, next_fetch_at)
                .await;

            info!(account = %account.handle, posts_inserted = inserted, "fetch succeeded");
            FetchBatchOutcome {
                accounts_processed: 1,
                accounts_success: 1,
                accounts_failed: 0,
                posts_inserted: inserted,
            }
        }
        Err(error) => {
            warn!(account = %account.handle, error = %error, "gateway fetch failed");
            let min_secs = config.retry_window.min.num_seconds().max(0) as u64;
            let max_secs = config.retry_window.max.num_seconds().max(0) as u64;
            let retry_at = now
                + chrono::Duration::seconds(
                    rand::thread_rng()
                        .gen_range(min_secs..max_secs.max(min_secs + 1))
                        .try_into()
                        .unwrap_or(i64::MAX),
                );
            let _ = store
                .mark_fetch_failure(account.id, retry_at, config.max_failures)
                .await;

            FetchBatchOutcome {
                accounts_processed: 1,
                accounts_success: 0,
                accounts_failed: 1,
                posts_inserted: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{AccountStatus, Tier};
    use crate::domain::ports::{GatewayError, NewPost, StoreError};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use mockable::DefaultClock;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct NoopJitter;

    #[async_trait]
    impl JitterSleeper for NoopJitter {
        async fn jitter_sleep(&self, _min_secs: u64, _max_secs: u64) {}
    }

    struct FakeGateway {
        posts_per_account: usize,
        fail_handles: Vec<String>,
    }

    #[async_trait]
    impl GatewayClient for FakeGateway {
        async fn fetch_posts(&self, handle: &str) -> Result<Vec<NewPost>, GatewayError> {
            if self.fail_handles.iter().any(|h| h == handle) {
                return Err(GatewayError::transport("simulated outage"));
            }
            Ok((0..self.posts_per_account)
                .map(|i| NewPost {
                    account_id: 0,
                    post_url: format!("https://example.invalid/{handle}/{i}"),
                    body_markdown: "hello".to_owned(),
                    kind: crate::domain::post::PostKind::Original,
                    media_urls: vec![],
                    published_at: Utc::now(),
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeStore {
        inserted: AtomicU64,
        successes: StdMutex<Vec<i64>>,
        failures: StdMutex<Vec<i64>>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn lock_and_select_due(
            &self,
            _tier: Tier,
            _limit: u32,
            _now: chrono::DateTime<Utc>,
        ) -> Result<Vec<Account>, StoreError> {
            Ok(vec![])
        }

        async fn select_stale(
            &self,
            _hours: i64,
            _limit: u32,
            _now: chrono::DateTime<Utc>,
        ) -> Result<Vec<Account>, StoreError> {
            Ok(vec![])
        }

        async fn mark_fetch_success(
            &self,
            account_id: i64,
            _fetched_at: chrono::DateTime<Utc>,
            _next_fetch_at: chrono::DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.successes
                .lock()
                .expect("successes mutex poisoned")
                .push(account_id);
            Ok(true)
        }

        async fn mark_fetch_failure(
            &self,
            account_id: i64,
            _retry_at: chrono::DateTime<Utc>,
            _max_failures: u32,
        ) -> Result<bool, StoreError> {
            self.failures
                .lock()
                .expect("failures mutex poisoned")
                .push(account_id);
            Ok(true)
        }

        async fn insert_posts(&self, posts: &[NewPost]) -> Result<u64, StoreError> {
            let count = posts.len() as u64;
            self.inserted.fetch_add(count, Ordering::SeqCst);
            Ok(count)
        }

        async fn claim_pending_enrichments(
            &self,
            _limit: u32,
            _hours_back: i64,
            _now: chrono::DateTime<Utc>,
        ) -> Result<Vec<crate::domain::Post>, StoreError> {
            Ok(vec![])
        }

        async fn commit_enrichment(
            &self,
            _enrichment: &crate::domain::Enrichment,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn select_enriched_in_window(
            &self,
            _start: chrono::DateTime<Utc>,
            _end: chrono::DateTime<Utc>,
            _limit: u32,
            _exclude_tags: &[String],
        ) -> Result<Vec<crate::domain::ports::EnrichedPostRow>, StoreError> {
            Ok(vec![])
        }

        async fn upsert_profile(&self, _profile: &crate::domain::Profile) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn insert_report(
            &self,
            _report: &crate::domain::ports::NewReport,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn recompute_profiling_tiers(&self, _now: chrono::DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn select_accounts_due_for_profiling(
            &self,
            _min_completed_enrichments: u32,
            _recent_days: i64,
            _profile_max_age_days: i64,
            _now: chrono::DateTime<Utc>,
        ) -> Result<Vec<Account>, StoreError> {
            Ok(vec![])
        }

        async fn select_recent_enrichments_for_account(
            &self,
            _account_id: i64,
            _recent_days: i64,
            _now: chrono::DateTime<Utc>,
        ) -> Result<Vec<crate::domain::ports::EnrichedPostRow>, StoreError> {
            Ok(vec![])
        }

        async fn initialize_schema(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn account(id: i64, handle: &str) -> Account {
        let mut account = Account::bootstrap(handle, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid"));
        account.id = id;
        account.status = AccountStatus::Pending;
        account
    }

    #[rstest]
    #[tokio::test]
    async fn empty_batch_does_zero_work() {
        let pool = FetchWorkerPool::new(
            Arc::new(FakeStore::default()),
            Arc::new(FakeGateway {
                posts_per_account: 0,
                fail_handles: vec![],
            }),
            Arc::new(DefaultClock),
            Arc::new(NoopJitter),
            FetchWorkerConfig::default(),
        );

        let outcome = pool.process_batch(vec![]).await;
        assert_eq!(outcome, FetchBatchOutcome::default());
    }

    #[rstest]
    #[tokio::test]
    async fn successful_fetch_inserts_posts_and_marks_success() {
        let store = Arc::new(FakeStore::default());
        let pool = FetchWorkerPool::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(FakeGateway {
                posts_per_account: 3,
                fail_handles: vec![],
            }),
            Arc::new(DefaultClock),
            Arc::new(NoopJitter),
            FetchWorkerConfig::default(),
        );

        let outcome = pool
            .process_batch(vec![account(1, "alice"), account(2, "bob")])
            .await;

        assert_eq!(outcome.accounts_processed, 2);
        assert_eq!(outcome.accounts_success, 2);
        assert_eq!(outcome.accounts_failed, 0);
        assert_eq!(outcome.posts_inserted, 6);
        assert_eq!(store.successes.lock().expect("poisoned").len(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn gateway_failure_marks_fetch_failure_not_aborted() {
        let store = Arc::new(FakeStore::default());
        let pool = FetchWorkerPool::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(FakeGateway {
                posts_per_account: 1,
                fail_handles: vec!["bob".to_owned()],
            }),
            Arc::new(DefaultClock),
            Arc::new(NoopJitter),
            FetchWorkerConfig::default(),
        );

        let outcome = pool
            .process_batch(vec![account(1, "alice"), account(2, "bob")])
            .await;

        assert_eq!(outcome.accounts_processed, 2);
        assert_eq!(outcome.accounts_success, 1);
        assert_eq!(outcome.accounts_failed, 1);
        assert_eq!(store.failures.lock().expect("poisoned").len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn concurrent_pool_processes_every_account() {
        let store = Arc::new(FakeStore::default());
        let pool = FetchWorkerPool::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(FakeGateway {
                posts_per_account: 1,
                fail_handles: vec![],
            }),
            Arc::new(DefaultClock),
            Arc::new(NoopJitter),
            FetchWorkerConfig {
                max_workers: 4,
                ..FetchWorkerConfig::default()
            },
        );

        let accounts = (1..=10).map(|i| account(i, &format!("user{i}"))).collect();
        let outcome = pool.process_batch(accounts).await;

        assert_eq!(outcome.accounts_processed, 10);
        assert_eq!(outcome.accounts_success, 10);
    }
}
