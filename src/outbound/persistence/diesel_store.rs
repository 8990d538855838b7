//! Diesel/PostgreSQL-backed implementation of the [`Store`] port (spec
//! §4.1), grounded in the teacher's
//! `outbound::persistence::diesel_route_annotation_repository`: a thin
//! adapter over a pooled `diesel-async` connection, mapping every
//! constraint/connection failure into [`StoreError`] rather than leaking
//! `diesel::result::Error`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::sql_types::{
    Array, BigInt, Bool, Double, Int4, Jsonb, Nullable, Text, Timestamptz,
};
use diesel_async::RunQueryDsl;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::domain::account::{Account, AccountStatus, Tier};
use crate::domain::enrichment::{Entity, Enrichment, EnrichmentStatus};
use crate::domain::post::{Post, PostKind};
use crate::domain::ports::{EnrichedPostRow, NewPost, NewReport, Store, StoreError};
use crate::domain::profile::Profile;
use crate::domain::report::ReportKind;
use crate::domain::scheduler::{classify_tier_from_rate, clamp_days_observed};

use super::models::{
    AccountFetchSuccessUpdate, AccountRow, AccountTierUpdate, EntityJson, NewEnrichmentRow,
    NewPostRow, NewProfileRow, NewReportRow, PostRow,
};
use super::pool::{DbPool, PoolError};
use super::schema::{accounts, enrichments, posts, profiles, reports};

/// Diesel-backed implementation of the [`Store`] port.
#[derive(Clone)]
pub struct DieselStore {
    pool: DbPool,
    /// Kept alongside the pool only to open the standalone blocking
    /// connection [`Self::initialize_schema`] needs for
    /// `diesel_migrations`, which runs synchronously and does not speak
    /// `diesel-async`.
    database_url: String,
}

impl DieselStore {
    pub fn new(pool: DbPool, database_url: impl Into<String>) -> Self {
        Self {
            pool,
            database_url: database_url.into(),
        }
    }
}

fn map_pool_error(error: PoolError) -> StoreError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            StoreError::connection(message)
        }
    }
}

fn map_diesel_error(error: diesel::result::Error) -> StoreError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
        }
        _ => debug!(error = %error, "diesel operation failed"),
    }

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            StoreError::connection("database connection closed")
        }
        DieselError::DatabaseError(_, info) => {
            StoreError::query(format!("database constraint violation: {}", info.message()))
        }
        other => StoreError::query(other.to_string()),
    }
}

// ---------------------------------------------------------------------
// String <-> domain enum boundary (Design Notes: keep strings in schema,
// introduce enums only at the adapter boundary)
// ---------------------------------------------------------------------

fn tier_to_str(tier: Tier) -> &'static str {
    match tier {
        Tier::High => "high",
        Tier::Medium => "medium",
        Tier::Low => "low",
    }
}

fn parse_tier(raw: &str) -> Tier {
    match raw {
        "high" => Tier::High,
        "low" => Tier::Low,
        _ => Tier::Medium,
    }
}

fn status_to_str(status: AccountStatus) -> &'static str {
    match status {
        AccountStatus::Pending => "pending",
        AccountStatus::Ok => "ok",
        AccountStatus::Failed => "failed",
        AccountStatus::Quarantined => "quarantined",
    }
}

fn parse_status(raw: &str) -> AccountStatus {
    match raw {
        "ok" => AccountStatus::Ok,
        "failed" => AccountStatus::Failed,
        "quarantined" => AccountStatus::Quarantined,
        _ => AccountStatus::Pending,
    }
}

fn kind_to_str(kind: PostKind) -> &'static str {
    match kind {
        PostKind::Original => "original",
        PostKind::Reply => "reply",
        PostKind::Quote => "quote",
        PostKind::LinkShare => "link_share",
    }
}

fn parse_kind(raw: &str) -> PostKind {
    match raw {
        "reply" => PostKind::Reply,
        "quote" => PostKind::Quote,
        "link_share" => PostKind::LinkShare,
        _ => PostKind::Original,
    }
}

fn enrichment_status_to_str(status: EnrichmentStatus) -> &'static str {
    match status {
        EnrichmentStatus::Pending => "pending",
        EnrichmentStatus::Completed => "completed",
        EnrichmentStatus::Failed => "failed",
    }
}

fn parse_enrichment_status(raw: &str) -> EnrichmentStatus {
    match raw {
        "completed" => EnrichmentStatus::Completed,
        "failed" => EnrichmentStatus::Failed,
        _ => EnrichmentStatus::Pending,
    }
}

fn report_kind_to_str(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::DailyLight => "daily_light",
        ReportKind::DailyDeep => "daily_deep",
        ReportKind::MonthlyKol => "monthly_kol",
    }
}

// ---------------------------------------------------------------------
// Raw-SQL row shapes for queries the typed DSL cannot express cleanly
// (outer-join aggregation, atomic claim-by-insert). Ordinary single-table
// reads and writes go through `models::AccountRow`/`PostRow` and the
// `AsChangeset` update structs via the typed DSL instead.
// ---------------------------------------------------------------------

#[derive(Debug, QueryableByName)]
struct AccountSqlRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    handle: String,
    #[diesel(sql_type = Text)]
    tier: String,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    last_fetched_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Timestamptz)]
    next_fetch_at: DateTime<Utc>,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = Int4)]
    consecutive_failures: i32,
    #[diesel(sql_type = Double)]
    avg_posts_per_day: f64,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
}

impl From<AccountSqlRow> for Account {
    fn from(row: AccountSqlRow) -> Self {
        Self {
            id: row.id,
            handle: row.handle,
            tier: parse_tier(&row.tier),
            last_fetched_at: row.last_fetched_at,
            next_fetch_at: row.next_fetch_at,
            status: parse_status(&row.status),
            consecutive_failures: u32::try_from(row.consecutive_failures).unwrap_or(0),
            avg_posts_per_day: row.avg_posts_per_day,
            created_at: row.created_at,
        }
    }
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            handle: row.handle,
            tier: parse_tier(&row.tier),
            last_fetched_at: row.last_fetched_at,
            next_fetch_at: row.next_fetch_at,
            status: parse_status(&row.status),
            consecutive_failures: u32::try_from(row.consecutive_failures).unwrap_or(0),
            avg_posts_per_day: row.avg_posts_per_day,
            created_at: row.created_at,
        }
    }
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            post_url: row.post_url,
            body_markdown: row.body_markdown,
            kind: parse_kind(&row.kind),
            media_urls: row.media_urls,
            published_at: row.published_at,
        }
    }
}

#[derive(Debug, QueryableByName)]
struct EnrichedPostSqlRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = BigInt)]
    account_id: i64,
    #[diesel(sql_type = Text)]
    post_url: String,
    #[diesel(sql_type = Text)]
    body_markdown: String,
    #[diesel(sql_type = Text)]
    kind: String,
    #[diesel(sql_type = Array<Text>)]
    media_urls: Vec<String>,
    #[diesel(sql_type = Timestamptz)]
    published_at: DateTime<Utc>,
    #[diesel(sql_type = Text)]
    account_handle: String,
    #[diesel(sql_type = Text)]
    e_status: String,
    #[diesel(sql_type = Text)]
    e_summary: String,
    #[diesel(sql_type = Text)]
    e_tag: String,
    #[diesel(sql_type = Text)]
    e_content_type: String,
    #[diesel(sql_type = Jsonb)]
    e_entities: serde_json::Value,
    #[diesel(sql_type = Text)]
    e_deep_interpretation: String,
    #[diesel(sql_type = Nullable<Text>)]
    e_image_description: Option<String>,
    #[diesel(sql_type = Bool)]
    e_continues_thread: bool,
    #[diesel(sql_type = Text)]
    e_model_name: String,
    #[diesel(sql_type = Timestamptz)]
    e_created_at: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    e_completed_at: Option<DateTime<Utc>>,
}

impl From<EnrichedPostSqlRow> for EnrichedPostRow {
    fn from(row: EnrichedPostSqlRow) -> Self {
        let entities: Vec<Entity> = serde_json::from_value::<Vec<EntityJson>>(row.e_entities)
            .unwrap_or_default()
            .into_iter()
            .map(|e| Entity {
                name: e.name,
                entity_type: e.entity_type,
            })
            .collect();

        Self {
            post: Post {
                id: row.id,
                account_id: row.account_id,
                post_url: row.post_url,
                body_markdown: row.body_markdown,
                kind: parse_kind(&row.kind),
                media_urls: row.media_urls,
                published_at: row.published_at,
            },
            account_handle: row.account_handle,
            enrichment: Enrichment {
                post_id: row.id,
                status: parse_enrichment_status(&row.e_status),
                summary: row.e_summary,
                tag: row.e_tag,
                content_type: row.e_content_type,
                entities,
                deep_interpretation: row.e_deep_interpretation,
                image_description: row.e_image_description,
                continues_thread: row.e_continues_thread,
                model_name: row.e_model_name,
                created_at: row.e_created_at,
                completed_at: row.e_completed_at,
            },
        }
    }
}

#[derive(Debug, QueryableByName)]
struct TierAggregateRow {
    #[diesel(sql_type = BigInt)]
    account_id: i64,
    #[diesel(sql_type = Text)]
    tier: String,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = BigInt)]
    post_count: i64,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    oldest_published_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl Store for DieselStore {
    async fn lock_and_select_due(
        &self,
        tier: Tier,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let limit_i64 = i64::from(limit);

        let rows: Vec<AccountRow> = accounts::table
            .filter(accounts::tier.eq(tier_to_str(tier)))
            .filter(accounts::status.ne(status_to_str(AccountStatus::Quarantined)))
            .filter(accounts::next_fetch_at.le(now))
            .select(AccountRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        let mut accounts: Vec<Account> = rows.into_iter().map(Account::from).collect();
        accounts.shuffle(&mut rand::thread_rng());
        accounts.truncate(usize::try_from(limit_i64).unwrap_or(usize::MAX));
        Ok(accounts)
    }

    async fn select_stale(
        &self,
        hours: i64,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let threshold = now - ChronoDuration::hours(hours);

        let rows: Vec<AccountRow> = accounts::table
            .filter(accounts::status.eq(status_to_str(AccountStatus::Pending)))
            .filter(accounts::next_fetch_at.lt(threshold))
            .order(accounts::next_fetch_at.asc())
            .limit(i64::from(limit))
            .select(AccountRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows.into_iter().map(Account::from).collect())
    }

    async fn mark_fetch_success(
        &self,
        account_id: i64,
        fetched_at: DateTime<Utc>,
        next_fetch_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let update = AccountFetchSuccessUpdate {
            status: status_to_str(AccountStatus::Ok).to_owned(),
            consecutive_failures: 0,
            last_fetched_at: Some(fetched_at),
            next_fetch_at,
        };
        let rows = diesel::update(accounts::table.filter(accounts::id.eq(account_id)))
            .set(&update)
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(rows > 0)
    }

    async fn mark_fetch_failure(
        &self,
        account_id: i64,
        retry_at: DateTime<Utc>,
        max_failures: u32,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let max_failures_i32 = i32::try_from(max_failures).unwrap_or(i32::MAX);

        // Single round-trip: increment the counter and branch status/next
        // fetch with a CASE expression rather than read-modify-write,
        // keeping the transition atomic under concurrent callers.
        let rows = diesel::sql_query(
            "UPDATE accounts SET \
             consecutive_failures = consecutive_failures + 1, \
             status = CASE WHEN consecutive_failures + 1 >= $3 THEN 'quarantined' ELSE 'failed' END, \
             next_fetch_at = CASE WHEN consecutive_failures + 1 >= $3 THEN next_fetch_at ELSE $2 END \
             WHERE id = $1",
        )
        .bind::<BigInt, _>(account_id)
        .bind::<Timestamptz, _>(retry_at)
        .bind::<Int4, _>(max_failures_i32)
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;
        Ok(rows > 0)
    }

    async fn insert_posts(&self, new_posts: &[NewPost]) -> Result<u64, StoreError> {
        if new_posts.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<NewPostRow> = new_posts
            .iter()
            .map(|post| NewPostRow {
                account_id: post.account_id,
                post_url: post.post_url.clone(),
                body_markdown: post.body_markdown.clone(),
                kind: kind_to_str(post.kind).to_owned(),
                media_urls: post.media_urls.clone(),
                published_at: post.published_at,
            })
            .collect();

        let inserted_ids: Vec<i64> = diesel::insert_into(posts::table)
            .values(&rows)
            .on_conflict(posts::post_url)
            .do_nothing()
            .returning(posts::id)
            .get_results(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(inserted_ids.len() as u64)
    }

    async fn claim_pending_enrichments(
        &self,
        limit: u32,
        hours_back: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Post>, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let since = now - ChronoDuration::hours(hours_back);

        // Atomic claim: the INSERT...SELECT...ON CONFLICT DO NOTHING only
        // returns the post ids *this* statement actually inserted a
        // placeholder for, so two concurrent claimers racing on an
        // overlapping candidate set never both claim the same post
        // (spec §4.1/§5, scenario C).
        let claimed_ids: Vec<i64> = diesel::sql_query(
            "INSERT INTO enrichments (post_id, status, summary, tag, content_type, entities, \
             deep_interpretation, image_description, continues_thread, model_name, created_at, completed_at) \
             SELECT p.id, 'pending', '', '', '', '[]'::jsonb, '', NULL, false, '', $3, NULL \
             FROM posts p LEFT JOIN enrichments e ON e.post_id = p.id \
             WHERE p.published_at >= $1 AND (e.post_id IS NULL OR e.status = 'pending') \
             ORDER BY p.published_at DESC LIMIT $2 \
             ON CONFLICT (post_id) DO NOTHING \
             RETURNING post_id AS id",
        )
        .bind::<Timestamptz, _>(since)
        .bind::<BigInt, _>(i64::from(limit))
        .bind::<Timestamptz, _>(now)
        .load::<IdRow>(&mut conn)
        .await
        .map_err(map_diesel_error)?
        .into_iter()
        .map(|row| row.id)
        .collect();

        if claimed_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<PostRow> = posts::table
            .filter(posts::id.eq_any(&claimed_ids))
            .select(PostRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn commit_enrichment(&self, enrichment: &Enrichment) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let entities_json = serde_json::to_value(
            enrichment
                .entities
                .iter()
                .map(|e| EntityJson {
                    name: e.name.clone(),
                    entity_type: e.entity_type.clone(),
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| serde_json::Value::Array(Vec::new()));

        let row = NewEnrichmentRow {
            post_id: enrichment.post_id,
            status: enrichment_status_to_str(enrichment.status).to_owned(),
            summary: enrichment.summary.clone(),
            tag: enrichment.tag.clone(),
            content_type: enrichment.content_type.clone(),
            entities: entities_json,
            deep_interpretation: enrichment.deep_interpretation.clone(),
            image_description: enrichment.image_description.clone(),
            continues_thread: enrichment.continues_thread,
            model_name: enrichment.model_name.clone(),
            created_at: enrichment.created_at,
            completed_at: enrichment.completed_at,
        };

        let rows = diesel::insert_into(enrichments::table)
            .values(&row)
            .on_conflict(enrichments::post_id)
            .do_update()
            .set((
                enrichments::status.eq(&row.status),
                enrichments::summary.eq(&row.summary),
                enrichments::tag.eq(&row.tag),
                enrichments::content_type.eq(&row.content_type),
                enrichments::entities.eq(&row.entities),
                enrichments::deep_interpretation.eq(&row.deep_interpretation),
                enrichments::image_description.eq(&row.image_description),
                enrichments::continues_thread.eq(row.continues_thread),
                enrichments::model_name.eq(&row.model_name),
                enrichments::completed_at.eq(row.completed_at),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows > 0)
    }

    async fn select_enriched_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
        exclude_tags: &[String],
    ) -> Result<Vec<EnrichedPostRow>, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<EnrichedPostSqlRow> = diesel::sql_query(
            "SELECT p.id, p.account_id, p.post_url, p.body_markdown, p.kind, p.media_urls, \
             p.published_at, a.handle AS account_handle, \
             e.status AS e_status, e.summary AS e_summary, e.tag AS e_tag, \
             e.content_type AS e_content_type, e.entities AS e_entities, \
             e.deep_interpretation AS e_deep_interpretation, \
             e.image_description AS e_image_description, \
             e.continues_thread AS e_continues_thread, e.model_name AS e_model_name, \
             e.created_at AS e_created_at, e.completed_at AS e_completed_at \
             FROM posts p \
             JOIN enrichments e ON e.post_id = p.id \
             JOIN accounts a ON a.id = p.account_id \
             WHERE e.status = 'completed' AND p.published_at BETWEEN $1 AND $2 \
               AND NOT (e.tag = ANY($3)) \
             ORDER BY p.published_at DESC LIMIT $4",
        )
        .bind::<Timestamptz, _>(start)
        .bind::<Timestamptz, _>(end)
        .bind::<Array<Text>, _>(exclude_tags)
        .bind::<BigInt, _>(i64::from(limit))
        .load(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        Ok(rows.into_iter().map(EnrichedPostRow::from).collect())
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row = NewProfileRow {
            account_id: profile.account_id,
            keywords: profile.keywords.clone(),
            sentiment_trend: profile.sentiment_trend.clone(),
            mentioned_asset_categories: profile.mentioned_asset_categories.clone(),
            interaction_graph: profile.interaction_graph.clone(),
            role_label: profile.role_label.clone(),
            trajectory_summary: profile.trajectory_summary.clone(),
            generated_at: profile.generated_at,
        };

        let rows = diesel::insert_into(profiles::table)
            .values(&row)
            .on_conflict(profiles::account_id)
            .do_update()
            .set((
                profiles::keywords.eq(&row.keywords),
                profiles::sentiment_trend.eq(&row.sentiment_trend),
                profiles::mentioned_asset_categories.eq(&row.mentioned_asset_categories),
                profiles::interaction_graph.eq(&row.interaction_graph),
                profiles::role_label.eq(&row.role_label),
                profiles::trajectory_summary.eq(&row.trajectory_summary),
                profiles::generated_at.eq(row.generated_at),
            ))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows > 0)
    }

    async fn insert_report(&self, report: &NewReport) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row = NewReportRow {
            kind: report_kind_to_str(report.kind).to_owned(),
            title: report.title.clone(),
            body_markdown: report.body_markdown.clone(),
            window_start: report.window_start,
            window_end: report.window_end,
            account_id: report.account_id,
            model_name: report.model_name.clone(),
        };

        let rows = diesel::insert_into(reports::table)
            .values(&row)
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows > 0)
    }

    async fn recompute_profiling_tiers(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let window_start = now - ChronoDuration::days(7);

        let rows: Vec<TierAggregateRow> = diesel::sql_query(
            "SELECT a.id AS account_id, a.tier AS tier, a.status AS status, \
             a.created_at AS created_at, COUNT(p.id) AS post_count, \
             MIN(p.published_at) AS oldest_published_at \
             FROM accounts a \
             LEFT JOIN posts p ON p.account_id = a.id AND p.published_at >= $1 \
             WHERE a.status != 'quarantined' \
             GROUP BY a.id",
        )
        .bind::<Timestamptz, _>(window_start)
        .load(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        let mut changed = 0u64;
        for row in rows {
            let avg_posts_per_day = match row.oldest_published_at {
                None => 0.0,
                Some(oldest) => {
                    let days_since_oldest = (now.date_naive() - oldest.date_naive()).num_days();
                    let days_observed = clamp_days_observed(days_since_oldest).max(1);
                    #[allow(
                        clippy::cast_precision_loss,
                        reason = "post counts stay far below f64's exact-integer range"
                    )]
                    let post_count = row.post_count as f64;
                    #[allow(
                        clippy::cast_precision_loss,
                        reason = "days_observed is clamped to [1, 7]"
                    )]
                    let divisor = days_observed as f64;
                    #[allow(
                        clippy::float_arithmetic,
                        reason = "posting-rate ratio is the documented formula for tier reclassification"
                    )]
                    {
                        post_count / divisor
                    }
                }
            };

            let is_cold_start =
                avg_posts_per_day <= 0.0 && now - row.created_at < ChronoDuration::days(3);
            let new_tier = if is_cold_start {
                Tier::Medium
            } else {
                classify_tier_from_rate(avg_posts_per_day)
            };

            let current_tier = parse_tier(&row.tier);
            if new_tier != current_tier {
                changed += 1;
            }

            let update = AccountTierUpdate {
                tier: tier_to_str(new_tier).to_owned(),
                avg_posts_per_day,
            };
            diesel::update(accounts::table.filter(accounts::id.eq(row.account_id)))
                .set(&update)
                .execute(&mut conn)
                .await
                .map_err(map_diesel_error)?;
        }

        Ok(changed)
    }

    async fn select_accounts_due_for_profiling(
        &self,
        min_completed_enrichments: u32,
        recent_days: i64,
        profile_max_age_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let recent_since = now - ChronoDuration::days(recent_days);
        let stale_before = now - ChronoDuration::days(profile_max_age_days);

        let rows: Vec<AccountSqlRow> = diesel::sql_query(
            "SELECT a.id, a.handle, a.tier, a.last_fetched_at, a.next_fetch_at, a.status, \
             a.consecutive_failures, a.avg_posts_per_day, a.created_at \
             FROM accounts a \
             JOIN posts p ON p.account_id = a.id \
             JOIN enrichments e ON e.post_id = p.id AND e.status = 'completed' \
                AND e.completed_at >= $1 \
             LEFT JOIN profiles pr ON pr.account_id = a.id \
             WHERE pr.account_id IS NULL OR pr.generated_at < $2 \
             GROUP BY a.id \
             HAVING COUNT(e.post_id) >= $3",
        )
        .bind::<Timestamptz, _>(recent_since)
        .bind::<Timestamptz, _>(stale_before)
        .bind::<BigInt, _>(i64::from(min_completed_enrichments))
        .load(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        Ok(rows.into_iter().map(Account::from).collect())
    }

    async fn select_recent_enrichments_for_account(
        &self,
        account_id: i64,
        recent_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<EnrichedPostRow>, StoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let since = now - ChronoDuration::days(recent_days);

        let rows: Vec<EnrichedPostSqlRow> = diesel::sql_query(
            "SELECT p.id, p.account_id, p.post_url, p.body_markdown, p.kind, p.media_urls, \
             p.published_at, a.handle AS account_handle, \
             e.status AS e_status, e.summary AS e_summary, e.tag AS e_tag, \
             e.content_type AS e_content_type, e.entities AS e_entities, \
             e.deep_interpretation AS e_deep_interpretation, \
             e.image_description AS e_image_description, \
             e.continues_thread AS e_continues_thread, e.model_name AS e_model_name, \
             e.created_at AS e_created_at, e.completed_at AS e_completed_at \
             FROM posts p \
             JOIN enrichments e ON e.post_id = p.id \
             JOIN accounts a ON a.id = p.account_id \
             WHERE p.account_id = $1 AND e.status = 'completed' AND p.published_at >= $2 \
             ORDER BY p.published_at DESC",
        )
        .bind::<BigInt, _>(account_id)
        .bind::<Timestamptz, _>(since)
        .load(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        Ok(rows.into_iter().map(EnrichedPostRow::from).collect())
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        use diesel::Connection;
        use diesel::pg::PgConnection;
        use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

        const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

        // `diesel_migrations` runs its harness over a blocking
        // `diesel::Connection`, not `diesel-async`'s, so this opens one
        // standalone connection for the duration of the bootstrap rather
        // than borrowing from the async pool.
        let database_url = self.database_url.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = PgConnection::establish(&database_url)
                .map_err(|error| StoreError::connection(error.to_string()))?;
            conn.run_pending_migrations(MIGRATIONS)
                .map(|_| ())
                .map_err(|error| StoreError::query(error.to_string()))
        })
        .await
        .map_err(|error| StoreError::connection(error.to_string()))?
    }
}

#[derive(Debug, QueryableByName)]
struct IdRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
}
