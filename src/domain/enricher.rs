//! Enrichment pipeline: claims un-enriched posts, routes them to a text or
//! vision model, parses the model's JSON response, and commits the result
//! (spec §4.7).
//!
//! Grounded in the teacher's `domain::overpass_enrichment_worker`: bounded
//! concurrency via a semaphore-backed pool, a fallback path on rejection,
//! and a results collector rather than an abort-on-first-failure loop.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::warn;

use super::enrichment::{Entity, Enrichment, EnrichmentStatus};
use super::ports::{ImageAttachment, ImagePreprocessor, ModelClient, ModelClientError, Store};
use super::post::Post;

/// How attached images are delivered to the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDeliveryMode {
    /// Pass the original media URL straight through.
    DirectUrl,
    /// Pre-download, resize, and inline the image as base64.
    InlineBase64,
}

/// Enricher run configuration, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct EnricherConfig {
    pub batch_size: u32,
    pub hours_back: i64,
    pub text_worker_count: usize,
    pub vision_worker_count: usize,
    pub text_model_id: String,
    pub primary_vision_model_id: String,
    pub secondary_vision_model_id: String,
    pub max_retries: u32,
    pub temperature: f32,
    pub image_delivery: ImageDeliveryMode,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            hours_back: 48,
            text_worker_count: 4,
            vision_worker_count: 2,
            text_model_id: "text-default".to_owned(),
            primary_vision_model_id: "vision-primary".to_owned(),
            secondary_vision_model_id: "vision-secondary".to_owned(),
            max_retries: 3,
            temperature: 0.3,
            image_delivery: ImageDeliveryMode::InlineBase64,
        }
    }
}

/// Aggregate counters for one enrichment batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnrichmentBatchOutcome {
    pub claimed: u32,
    pub completed: u32,
    pub failed: u32,
}

/// The structured JSON shape every enrichment prompt demands (spec §3/§4.7).
#[derive(Debug, Clone, Deserialize)]
struct RawEnrichmentJson {
    summary: String,
    tag: String,
    content_type: String,
    #[serde(default)]
    entities: Vec<RawEntity>,
    deep_interpretation: String,
    #[serde(default)]
    image_description: Option<String>,
    #[serde(default)]
    continues_thread: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
}

/// Bounded-concurrency enrichment pipeline.
pub struct Enricher {
    store: Arc<dyn Store>,
    model_client: Arc<dyn ModelClient>,
    image_preprocessor: Arc<dyn ImagePreprocessor>,
    clock: Arc<dyn Clock>,
    config: EnricherConfig,
}

impl Enricher {
    pub fn new(
        store: Arc<dyn Store>,
        model_client: Arc<dyn ModelClient>,
        image_preprocessor: Arc<dyn ImagePreprocessor>,
        clock: Arc<dyn Clock>,
        config: EnricherConfig,
    ) -> Self {
        Self {
            store,
            model_client,
            image_preprocessor,
            clock,
            config,
        }
    }

    /// Claim a batch of eligible posts and enrich every one of them.
    pub async fn run(&self) -> Result<EnrichmentBatchOutcome, super::error::Error> {
        let now = self.clock.utc();
        let posts = self
            .store
            .claim_pending_enrichments(self.config.batch_size, self.config.hours_back, now)
            .await
            .map_err(|error| super::error::Error::database_constraint(error.to_string()))?;

        if posts.is_empty() {
            return Ok(EnrichmentBatchOutcome::default());
        }

        let image_cache = self.prime_image_cache(&posts).await;

        let (vision_posts, text_posts): (Vec<Post>, Vec<Post>) = posts
            .into_iter()
            .partition(|post| self.has_usable_images(post, &image_cache));

        let text_semaphore = Arc::new(Semaphore::new(self.config.text_worker_count.max(1)));
        let vision_semaphore = Arc::new(Semaphore::new(self.config.vision_worker_count.max(1)));
        let image_cache = Arc::new(image_cache);

        let mut handles = Vec::with_capacity(text_posts.len() + vision_posts.len());

        for post in text_posts {
            let semaphore = Arc::clone(&text_semaphore);
            let store = Arc::clone(&self.store);
            let model_client = Arc::clone(&self.model_client);
            let config = self.config.clone();
            let now = now;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                process_text_post(&*store, &*model_client, &config, &post, now).await
            }));
        }

        for post in vision_posts {
            let semaphore = Arc::clone(&vision_semaphore);
            let store = Arc::clone(&self.store);
            let model_client = Arc::clone(&self.model_client);
            let cache = Arc::clone(&image_cache);
            let config = self.config.clone();
            let now = now;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                process_vision_post(&*store, &*model_client, &config, &post, &cache, now).await
            }));
        }

        let mut outcome = EnrichmentBatchOutcome {
            claimed: u32::try_from(handles.len()).unwrap_or(u32::MAX),
            ..EnrichmentBatchOutcome::default()
        };
        for handle in handles {
            match handle.await {
                Ok(EnrichOne::Completed) => outcome.completed += 1,
                Ok(EnrichOne::Failed) => outcome.failed += 1,
                Err(error) => {
                    warn!(error = %error, "enrichment worker task panicked");
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn prime_image_cache(&self, posts: &[Post]) -> HashMap<String, bool> {
        if self.config.image_delivery != ImageDeliveryMode::InlineBase64 {
            return HashMap::new();
        }

        let mut unique_urls: Vec<String> = Vec::new();
        for post in posts {
            for url in &post.media_urls {
                if !unique_urls.contains(url) {
                    unique_urls.push(url.clone());
                }
            }
        }

        let mut results = HashMap::with_capacity(unique_urls.len());
        for url in unique_urls {
            let processed = self.image_preprocessor.process(&url).await;
            results.insert(url, processed.success);
        }
        results
    }

    fn has_usable_images(&self, post: &Post, image_cache: &HashMap<String, bool>) -> bool {
        if !post.has_media() {
            return false;
        }
        match self.config.image_delivery {
            ImageDeliveryMode::DirectUrl => true,
            ImageDeliveryMode::InlineBase64 => post
                .media_urls
                .iter()
                .any(|url| image_cache.get(url).copied().unwrap_or(false)),
        }
    }
}

enum EnrichOne {
    Completed,
    Failed,
}

async fn process_text_post(
    store: &dyn Store,
    model_client: &dyn ModelClient,
    config: &EnricherConfig,
    post: &Post,
    now: DateTime<Utc>,
) -> EnrichOne {
    let prompt = build_text_prompt(&post.body_markdown);
    let response = model_client
        .text_chat(
            &prompt,
            &config.text_model_id,
            config.temperature,
            config.max_retries,
        )
        .await;

    let enrichment = match response {
        Ok(response) => match parse_enrichment(&response.content) {
            Ok(parsed) => completed_enrichment(post.id, parsed, &response.model, now),
            Err(message) => failed_enrichment(post.id, message, &config.text_model_id, now),
        },
        Err(error) => failed_enrichment(post.id, error.to_string(), &config.text_model_id, now),
    };

    commit(store, enrichment).await
}

async fn process_vision_post(
    store: &dyn Store,
    model_client: &dyn ModelClient,
    config: &EnricherConfig,
    post: &Post,
    image_cache: &HashMap<String, bool>,
    now: DateTime<Utc>,
) -> EnrichOne {
    let images = gather_images(post, config.image_delivery, image_cache);
    if images.is_empty() {
        return process_text_post(store, model_client, config, post, now).await;
    }

    let prompt = build_vision_prompt(&post.body_markdown, images.len());

    let primary = model_client
        .vision_chat(
            &prompt,
            &images,
            &config.primary_vision_model_id,
            config.temperature,
            config.max_retries,
        )
        .await;

    let (response, model_used) = match primary {
        Ok(response) => (Ok(response), config.primary_vision_model_id.clone()),
        Err(primary_error) => {
            let fallback = model_client
                .vision_chat(
                    &prompt,
                    &images,
                    &config.secondary_vision_model_id,
                    config.temperature,
                    config.max_retries,
                )
                .await;
            match fallback {
                Ok(response) => (Ok(response), config.secondary_vision_model_id.clone()),
                Err(fallback_error) => (
                    Err(format!(
                        "both vision models rejected the post: primary={primary_error}, secondary={fallback_error}"
                    )),
                    config.secondary_vision_model_id.clone(),
                ),
            }
        }
    };

    let enrichment = match response {
        Ok(response) => match parse_enrichment(&response.content) {
            Ok(parsed) => completed_enrichment(post.id, parsed, &response.model, now),
            Err(message) => failed_enrichment(post.id, message, &model_used, now),
        },
        Err(message) => failed_enrichment(post.id, message, &model_used, now),
    };

    commit(store, enrichment).await
}

/// Select processed (or raw-URL) images still usable for a vision call.
/// Per spec §4.7 failure semantics: image-download failures downgrade to
/// text-only when no valid images remain.
fn gather_images(
    post: &Post,
    mode: ImageDeliveryMode,
    image_cache: &HashMap<String, bool>,
) -> Vec<ImageAttachment> {
    match mode {
        ImageDeliveryMode::DirectUrl => post
            .media_urls
            .iter()
            .cloned()
            .map(ImageAttachment::Url)
            .collect(),
        ImageDeliveryMode::InlineBase64 => post
            .media_urls
            .iter()
            .filter(|url| image_cache.get(*url).copied().unwrap_or(false))
            .cloned()
            .map(ImageAttachment::Url)
            .collect(),
    }
}

async fn commit(store: &dyn Store, enrichment: Enrichment) -> EnrichOne {
    let is_completed = enrichment.status == EnrichmentStatus::Completed;
    if let Err(error) = store.commit_enrichment(&enrichment).await {
        warn!(post_id = enrichment.post_id, error = %error, "enrichment commit failed");
        return EnrichOne::Failed;
    }
    if is_completed {
        EnrichOne::Completed
    } else {
        EnrichOne::Failed
    }
}

fn completed_enrichment(
    post_id: i64,
    parsed: RawEnrichmentJson,
    model_name: &str,
    now: DateTime<Utc>,
) -> Enrichment {
    Enrichment {
        post_id,
        status: EnrichmentStatus::Completed,
        summary: parsed.summary,
        tag: parsed.tag,
        content_type: parsed.content_type,
        entities: parsed
            .entities
            .into_iter()
            .map(|entity| Entity {
                name: entity.name,
                entity_type: entity.entity_type,
            })
            .collect(),
        deep_interpretation: parsed.deep_interpretation,
        image_description: parsed.image_description,
        continues_thread: parsed.continues_thread,
        model_name: model_name.to_owned(),
        created_at: now,
        completed_at: Some(now),
    }
}

fn failed_enrichment(post_id: i64, message: String, model_name: &str, now: DateTime<Utc>) -> Enrichment {
    Enrichment {
        post_id,
        status: EnrichmentStatus::Failed,
        summary: String::new(),
        tag: String::new(),
        content_type: String::new(),
        entities: Vec::new(),
        deep_interpretation: message,
        image_description: None,
        continues_thread: false,
        model_name: model_name.to_owned(),
        created_at: now,
        completed_at: Some(now),
    }
}

/// Target interpretation-length hint by body length (spec §4.7 prompt
/// selection table).
fn text_interpretation_hint(body_len: usize) -> &'static str {
    if body_len < 100 {
        "~100 characters"
    } else if body_len < 300 {
        "~150 characters"
    } else {
        "~250 characters"
    }
}

fn build_text_prompt(body: &str) -> String {
    let hint = text_interpretation_hint(body.chars().count());
    format!(
        "Analyze the following social media post and respond with a single \
         strict JSON object with exactly these fields: summary (<=50 chars), \
         tag, content_type, entities (list of {{name, type}}), \
         deep_interpretation ({hint}), image_description (null), \
         continues_thread (bool). No prose outside the JSON object.\n\n\
         POST:\n{body}"
    )
}

/// Target image-description length by attached image count, and the
/// interpretation length by combined body/image complexity (spec §4.7).
fn vision_image_description_hint(image_count: usize) -> &'static str {
    match image_count {
        1 => "~150 characters",
        2 => "~250 characters",
        _ => "~300 characters",
    }
}

fn vision_interpretation_hint(body_len: usize, image_count: usize) -> &'static str {
    let complexity = body_len / 100 + image_count;
    if complexity <= 1 {
        "~150 characters"
    } else if complexity <= 3 {
        "~200 characters"
    } else {
        "~300 characters"
    }
}

fn build_vision_prompt(body: &str, image_count: usize) -> String {
    let image_hint = vision_image_description_hint(image_count);
    let interp_hint = vision_interpretation_hint(body.chars().count(), image_count);
    format!(
        "Analyze the following social media post together with its attached \
         images and respond with a single strict JSON object with exactly \
         these fields: summary (<=50 chars), tag, content_type, entities \
         (list of {{name, type}}), deep_interpretation ({interp_hint}), \
         image_description ({image_hint}), continues_thread (bool). No prose \
         outside the JSON object.\n\nPOST:\n{body}"
    )
}

/// Parse a model's response into the enrichment JSON shape: (a) try a
/// strict parse; (b) on failure, regex-extract the first `{...}` block,
/// strip trailing commas before `}`/`]`, and retry; (c) on failure, return
/// the error message to be recorded as a terminal FAILED enrichment (spec
/// §4.7 step 6).
fn parse_enrichment(content: &str) -> Result<RawEnrichmentJson, String> {
    if let Ok(parsed) = serde_json::from_str::<RawEnrichmentJson>(content) {
        return Ok(parsed);
    }

    let Some(repaired) = repair_json_block(content) else {
        return Err("no JSON object found in model response".to_owned());
    };

    serde_json::from_str::<RawEnrichmentJson>(&repaired)
        .map_err(|error| format!("JSON parse failed after repair: {error}"))
}

fn repair_json_block(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    let block = &content[start..=end];
    let trailing_comma = Regex::new(r",(\s*[}\]])").ok()?;
    Some(trailing_comma.replace_all(block, "$1").into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{Account, AccountStatus, Tier};
    use crate::domain::post::PostKind;
    use crate::domain::ports::{EnrichedPostRow, NewPost, ProcessedImage, StoreError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use mockable::DefaultClock;
    use rstest::rstest;
    use std::sync::Mutex as StdMutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid")
    }

    fn sample_post(id: i64, body: &str, media: Vec<&str>) -> Post {
        Post {
            id,
            account_id: 1,
            post_url: format!("https://example.invalid/{id}"),
            body_markdown: body.to_owned(),
            kind: PostKind::Original,
            media_urls: media.into_iter().map(str::to_owned).collect(),
            published_at: now(),
        }
    }

    #[rstest]
    #[case(50, "~100 characters")]
    #[case(200, "~150 characters")]
    #[case(500, "~250 characters")]
    fn text_hint_buckets(#[case] len: usize, #[case] expected: &str) {
        assert_eq!(text_interpretation_hint(len), expected);
    }

    #[rstest]
    #[case(1, "~150 characters")]
    #[case(2, "~250 characters")]
    #[case(5, "~300 characters")]
    fn vision_image_hint_buckets(#[case] count: usize, #[case] expected: &str) {
        assert_eq!(vision_image_description_hint(count), expected);
    }

    #[rstest]
    fn strict_json_parses_directly() {
        let payload = r#"{"summary":"s","tag":"t","content_type":"ct","entities":[{"name":"n","type":"ty"}],"deep_interpretation":"di","image_description":null,"continues_thread":false}"#;
        let parsed = parse_enrichment(payload).expect("parses");
        assert_eq!(parsed.summary, "s");
        assert_eq!(parsed.entities.len(), 1);
    }

    #[rstest]
    fn malformed_json_with_trailing_commas_is_repaired() {
        let payload = r#"Sure, here you go: {"summary":"s","tag":"t","content_type":"ct","entities":[],"deep_interpretation":"di","image_description":null,"continues_thread":false,}"#;
        let parsed = parse_enrichment(payload).expect("repairs and parses");
        assert_eq!(parsed.tag, "t");
    }

    #[rstest]
    fn no_json_object_is_terminal_failure() {
        let error = parse_enrichment("no json here").expect_err("must fail");
        assert!(error.contains("no JSON object"));
    }

    #[derive(Default)]
    struct FakeStore {
        committed: StdMutex<Vec<Enrichment>>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn lock_and_select_due(
            &self,
            _tier: Tier,
            _limit: u32,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Account>, StoreError> {
            Ok(vec![])
        }
        async fn select_stale(
            &self,
            _hours: i64,
            _limit: u32,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Account>, StoreError> {
            Ok(vec![])
        }
        async fn mark_fetch_success(
            &self,
            _account_id: i64,
            _fetched_at: DateTime<Utc>,
            _next_fetch_at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn mark_fetch_failure(
            &self,
            _account_id: i64,
            _retry_at: DateTime<Utc>,
            _max_failures: u32,
        ) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn insert_posts(&self, _posts: &[NewPost]) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn claim_pending_enrichments(
            &self,
            _limit: u32,
            _hours_back: i64,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Post>, StoreError> {
            Ok(vec![])
        }
        async fn commit_enrichment(&self, enrichment: &Enrichment) -> Result<bool, StoreError> {
            self.committed.lock().expect("poisoned").push(enrichment.clone());
            Ok(true)
        }
        async fn select_enriched_in_window(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _limit: u32,
            _exclude_tags: &[String],
        ) -> Result<Vec<EnrichedPostRow>, StoreError> {
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
        async fn recompute_profiling_tiers(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn select_accounts_due_for_profiling(
            &self,
            _min_completed_enrichments: u32,
            _recent_days: i64,
            _profile_max_age_days: i64,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Account>, StoreError> {
            Ok(vec![])
        }
        async fn select_recent_enrichments_for_account(
            &self,
            _account_id: i64,
            _recent_days: i64,
            _now: DateTime<Utc>,
        ) -> Result<Vec<EnrichedPostRow>, StoreError> {
            Ok(vec![])
        }
        async fn initialize_schema(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct FakeModelClient {
        text_response: Result<String, ModelClientError>,
    }

    #[async_trait]
    impl ModelClient for FakeModelClient {
        async fn text_chat(
            &self,
            _prompt: &str,
            model_id: &str,
            _temperature: f32,
            _max_retries: u32,
        ) -> Result<crate::domain::ports::ModelResponse, ModelClientError> {
            self.text_response
                .clone()
                .map(|content| crate::domain::ports::ModelResponse {
                    content,
                    provider: "fake".to_owned(),
                    model: model_id.to_owned(),
                })
        }

        async fn vision_chat(
            &self,
            _prompt: &str,
            _images: &[ImageAttachment],
            model_id: &str,
            _temperature: f32,
            _max_retries: u32,
        ) -> Result<crate::domain::ports::ModelResponse, ModelClientError> {
            self.text_response
                .clone()
                .map(|content| crate::domain::ports::ModelResponse {
                    content,
                    provider: "fake".to_owned(),
                    model: model_id.to_owned(),
                })
        }
    }

    struct NoopImagePreprocessor;

    #[async_trait]
    impl ImagePreprocessor for NoopImagePreprocessor {
        async fn process(&self, url: &str) -> ProcessedImage {
            ProcessedImage {
                source_url: url.to_owned(),
                success: true,
                base64_data: "ZmFrZQ==".to_owned(),
                mime_type: "image/png".to_owned(),
            }
        }
    }

    #[rstest]
    #[tokio::test]
    async fn text_only_post_completes_on_strict_json() {
        let store = Arc::new(FakeStore::default());
        let model_client = Arc::new(FakeModelClient {
            text_response: Ok(r#"{"summary":"s","tag":"t","content_type":"ct","entities":[],"deep_interpretation":"di","image_description":null,"continues_thread":false}"#.to_owned()),
        });
        let enricher = Enricher::new(
            Arc::clone(&store) as Arc<dyn Store>,
            model_client,
            Arc::new(NoopImagePreprocessor),
            Arc::new(DefaultClock),
            EnricherConfig::default(),
        );

        let post = sample_post(1, "hello world", vec![]);
        let outcome = process_text_post(
            &*store,
            &*enricher.model_client,
            &enricher.config,
            &post,
            now(),
        )
        .await;
        assert!(matches!(outcome, EnrichOne::Completed));
        assert_eq!(store.committed.lock().expect("poisoned").len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn model_error_produces_failed_enrichment() {
        let store = Arc::new(FakeStore::default());
        let model_client = Arc::new(FakeModelClient {
            text_response: Err(ModelClientError::bad_request("bad image format")),
        });
        let enricher = Enricher::new(
            Arc::clone(&store) as Arc<dyn Store>,
            model_client,
            Arc::new(NoopImagePreprocessor),
            Arc::new(DefaultClock),
            EnricherConfig::default(),
        );

        let post = sample_post(2, "hi", vec![]);
        let outcome = process_text_post(
            &*store,
            &*enricher.model_client,
            &enricher.config,
            &post,
            now(),
        )
        .await;
        assert!(matches!(outcome, EnrichOne::Failed));
        let committed = store.committed.lock().expect("poisoned");
        assert_eq!(committed[0].status, EnrichmentStatus::Failed);
    }
}
