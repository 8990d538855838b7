//! Domain ports defining the edges of the hexagon.
//!
//! Ports describe how the domain jobs (scheduler, fetch worker, enricher,
//! report synthesizer, profile analyzer) expect to interact with driven
//! adapters (the relational store, the RSS gateway, the LLM providers, the
//! image pipeline, the note-publishing service). Each trait exposes a
//! strongly typed error so adapters map their failures into predictable
//! variants instead of an opaque `anyhow::Error`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::account::{Account, Tier};
use super::enrichment::Enrichment;
use super::post::{Post, PostKind};
use super::profile::Profile;
use super::report::ReportKind;

// ---------------------------------------------------------------------
// Store port
// ---------------------------------------------------------------------

/// Errors surfaced by the relational store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connection or transaction setup failed.
    #[error("store connection failed: {message}")]
    Connection { message: String },
    /// A query or mutation failed to execute, including constraint
    /// violations (spec §7: "Database constraint... abort the single
    /// operation; surface to caller; do not retry blindly").
    #[error("store operation failed: {message}")]
    Query { message: String },
}

impl StoreError {
    /// Helper for connection-level failures.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Helper for query/mutation failures.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }
}

/// A newly observed post awaiting insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub account_id: i64,
    pub post_url: String,
    pub body_markdown: String,
    pub kind: PostKind,
    pub media_urls: Vec<String>,
    pub published_at: DateTime<Utc>,
}

/// A post joined with its (possibly absent) enrichment and owning
/// account's handle, as returned by [`Store::select_enriched_in_window`]
/// for scoring and report synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedPostRow {
    pub post: Post,
    pub account_handle: String,
    pub enrichment: Enrichment,
}

/// A report ready to be persisted by [`Store::insert_report`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub kind: ReportKind,
    pub title: String,
    pub body_markdown: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub account_id: Option<i64>,
    pub model_name: String,
}

/// Persistence port covering every operation in spec §4.1.
///
/// Every method must be atomic with respect to concurrent callers: two
/// schedulers or two enrichers racing against the same rows must not
/// corrupt state, even though spec §5 explicitly allows both to observe
/// the same "due" row in the absence of an advisory lock.
#[async_trait]
pub trait Store: Send + Sync {
    /// Up to `limit` accounts in `tier` with `next_fetch_at <= now` and
    /// `status != Quarantined`, in randomized order (to avoid starving
    /// accounts near the end of a lexical ordering).
    async fn lock_and_select_due(
        &self,
        tier: Tier,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError>;

    /// Up to `limit` accounts with `next_fetch_at < now - hours` and
    /// `status == Pending`, ordered oldest-first. The scavenger safety net
    /// (spec §4.5).
    async fn select_stale(
        &self,
        hours: i64,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError>;

    /// Record a successful fetch: `status = Ok`, failures cleared,
    /// `last_fetched_at`/`next_fetch_at` updated.
    async fn mark_fetch_success(
        &self,
        account_id: i64,
        fetched_at: DateTime<Utc>,
        next_fetch_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Record a failed fetch: increments `consecutive_failures`; transitions
    /// to `Quarantined` once `max_failures` is reached, else `Failed` with
    /// `next_fetch_at = retry_at`.
    async fn mark_fetch_failure(
        &self,
        account_id: i64,
        retry_at: DateTime<Utc>,
        max_failures: u32,
    ) -> Result<bool, StoreError>;

    /// INSERT-IF-NEW on `post_url`; returns the count of newly inserted
    /// rows (duplicates are silently dropped).
    async fn insert_posts(&self, posts: &[NewPost]) -> Result<u64, StoreError>;

    /// Claim up to `limit` posts published within `hours_back` that have no
    /// enrichment row or a `Pending` one within the window; inserts a
    /// `Pending` placeholder for each returned row in the same transaction
    /// so the claim itself prevents double-processing.
    async fn claim_pending_enrichments(
        &self,
        limit: u32,
        hours_back: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Post>, StoreError>;

    /// UPSERT the final enrichment row for one post.
    async fn commit_enrichment(&self, enrichment: &Enrichment) -> Result<bool, StoreError>;

    /// Enriched, completed posts published within `[start, end]`, excluding
    /// any whose `tag` is in `exclude_tags`, capped at `limit`, joined with
    /// the owning account's handle. Used by the scorer/report synthesizer.
    async fn select_enriched_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
        exclude_tags: &[String],
    ) -> Result<Vec<EnrichedPostRow>, StoreError>;

    /// Overwrite the prior profile document for `account_id`.
    async fn upsert_profile(&self, profile: &Profile) -> Result<bool, StoreError>;

    /// Append-only report insert.
    async fn insert_report(&self, report: &NewReport) -> Result<bool, StoreError>;

    /// Recompute every non-quarantined account's tier from its last-7-days
    /// posting rate (spec §4.5); returns the count of accounts whose tier
    /// changed.
    async fn recompute_profiling_tiers(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Accounts with at least `min_completed_enrichments` completed
    /// enrichments in the last `recent_days` days, and either no profile or
    /// one older than `profile_max_age_days` (spec §4.10).
    async fn select_accounts_due_for_profiling(
        &self,
        min_completed_enrichments: u32,
        recent_days: i64,
        profile_max_age_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError>;

    /// Completed enrichments for one account within `recent_days`, newest
    /// first, used to build the profile-analyzer prompt context.
    async fn select_recent_enrichments_for_account(
        &self,
        account_id: i64,
        recent_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<EnrichedPostRow>, StoreError>;

    /// Create the five-table schema if absent. An explicit bootstrap step
    /// (never implicit inside a constructor), invoked by the
    /// `--recreate-db` CLI flag.
    async fn initialize_schema(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------
// Gateway client port
// ---------------------------------------------------------------------

/// Errors surfaced by the RSS-style gateway client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network-level failure reaching the gateway.
    #[error("gateway request failed: {message}")]
    Transport { message: String },
    /// The response body could not be parsed as RSS/Atom.
    #[error("gateway response parse failed: {message}")]
    Parse { message: String },
}

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

/// Gateway port: fetches one account's recent posts.
///
/// Per spec §4.2, any failure (network or parse) is swallowed into an empty
/// result by the *caller* (the fetch worker), not by this port — the port
/// still surfaces the underlying [`GatewayError`] so the caller can decide
/// how to record the fetch failure and log it.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Fetch the most recent posts for `handle`.
    async fn fetch_posts(&self, handle: &str) -> Result<Vec<NewPost>, GatewayError>;
}

// ---------------------------------------------------------------------
// Model client port
// ---------------------------------------------------------------------

/// One image attachment passed to a vision-capable model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageAttachment {
    /// A publicly fetchable image URL.
    Url(String),
    /// An inline base64-encoded image payload (data URL body only).
    InlineBase64(String),
}

/// Errors surfaced by the model client adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelClientError {
    /// Transient network/transport failure; retryable.
    #[error("model request failed: {message}")]
    Transport { message: String },
    /// A 400-class error or a "bad image format" style rejection; never
    /// retried (spec §4.3).
    #[error("model rejected request: {message}")]
    BadRequest { message: String },
    /// The streamed response concatenated to an empty string.
    #[error("model returned an empty response")]
    EmptyResponse,
}

impl ModelClientError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// True when this error should abort retries immediately rather than
    /// backing off (spec §4.3: "A 400-class error or a message indicating
    /// 'bad image format' aborts retries immediately").
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }
}

/// A successful model call result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
}

/// Uniform call surface for text and vision LLMs (spec §4.3).
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Single text chat completion with up to `max_retries` attempts.
    async fn text_chat(
        &self,
        prompt: &str,
        model_id: &str,
        temperature: f32,
        max_retries: u32,
    ) -> Result<ModelResponse, ModelClientError>;

    /// Vision chat completion: `prompt` plus an ordered list of image
    /// attachments.
    async fn vision_chat(
        &self,
        prompt: &str,
        images: &[ImageAttachment],
        model_id: &str,
        temperature: f32,
        max_retries: u32,
    ) -> Result<ModelResponse, ModelClientError>;
}

// ---------------------------------------------------------------------
// Image preprocessor port
// ---------------------------------------------------------------------

/// Errors surfaced by the image preprocessing adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// Download failed or exceeded the size cap.
    #[error("image download failed: {message}")]
    Download { message: String },
    /// Decoding or re-encoding failed.
    #[error("image decode failed: {message}")]
    Decode { message: String },
}

impl ImageError {
    pub fn download(message: impl Into<String>) -> Self {
        Self::Download {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// One processed image result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub source_url: String,
    pub success: bool,
    /// Base64-encoded re-encoded image bytes; empty when `success` is
    /// false.
    pub base64_data: String,
    pub mime_type: String,
}

/// Image preprocessing port (spec §4.4): download, decode, resize,
/// re-encode, base64-emit, with per-run caching left to the caller.
#[async_trait]
pub trait ImagePreprocessor: Send + Sync {
    /// Process one media URL. Never returns an `Err`: download/decode
    /// failures are represented as `ProcessedImage { success: false, .. }`
    /// so a batch of URLs can be processed without aborting the whole
    /// enrichment job on one bad image.
    async fn process(&self, url: &str) -> ProcessedImage;
}

// ---------------------------------------------------------------------
// Note-service publishing port (best-effort, external collaborator)
// ---------------------------------------------------------------------

/// Errors surfaced by the optional note-service publisher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotePublishError {
    #[error("note service publish failed: {message}")]
    Failed { message: String },
}

impl NotePublishError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Best-effort downstream publishing port. Report synthesis never fails a
/// job because this port failed (spec §4.9 step 5: "best-effort publishes
/// to the configured note service").
#[async_trait]
pub trait NotePublisher: Send + Sync {
    async fn publish(&self, title: &str, body_markdown: &str) -> Result<(), NotePublishError>;
}
