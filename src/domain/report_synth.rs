//! Report synthesizer: selects the top-N enriched posts in a window, packs
//! them into a size-bounded prompt context, fans out to multiple models in
//! parallel, and persists each variant (spec §4.9).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use regex::Regex;
use tracing::warn;

use super::error::Error;
use super::ports::{EnrichedPostRow, NewReport, ModelClient, NotePublisher, Store};
use super::report::ReportKind;
use super::scorer::{compare_candidates, score, ScoredPostInput, ScoringConfig};

/// Which report variant(s) a synthesis run produces (spec §6 `--flow`).
///
/// `Intelligence` is this crate's documented resolution of the spec's
/// fourth, otherwise-unexplained flow value: treated as an alias for
/// `Dual` (see `DESIGN.md`), since the original source's "intelligence"
/// report task always emitted both the light and deep variants together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFlow {
    Light,
    Deep,
    Dual,
    Intelligence,
}

impl ReportFlow {
    fn variants(self) -> Vec<ReportKind> {
        match self {
            Self::Light => vec![ReportKind::DailyLight],
            Self::Deep => vec![ReportKind::DailyDeep],
            Self::Dual | Self::Intelligence => vec![ReportKind::DailyLight, ReportKind::DailyDeep],
        }
    }
}

/// Report synthesis run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSynthConfig {
    pub hours: i64,
    pub limit: u32,
    pub candidate_multiplier: u32,
    pub max_context_chars: usize,
    pub exclude_tags: Vec<String>,
    pub model_ids: Vec<String>,
    pub max_retries: u32,
    pub temperature: f32,
    pub flow: ReportFlow,
    pub scoring: ScoringConfig,
}

impl Default for ReportSynthConfig {
    fn default() -> Self {
        Self {
            hours: 24,
            limit: 20,
            candidate_multiplier: 3,
            max_context_chars: 12_000,
            exclude_tags: Vec::new(),
            model_ids: vec!["report-model".to_owned()],
            max_retries: 2,
            temperature: 0.4,
            flow: ReportFlow::Dual,
            scoring: ScoringConfig::default(),
        }
    }
}

/// Per-model outcome of one fan-out task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelVariantOutcome {
    pub model_id: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Aggregate result of one report-kind synthesis (one call to
/// [`ReportSynthesizer::synthesize`] covers every configured model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportKindOutcome {
    pub kind: ReportKind,
    pub candidates_considered: u32,
    pub posts_packed: u32,
    pub model_outcomes: Vec<ModelVariantOutcome>,
}

impl ReportKindOutcome {
    /// Overall success = at least one model variant persisted (spec §4.9
    /// step 6 / §7).
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.model_outcomes.iter().any(|outcome| outcome.success)
    }
}

/// Result of a full synthesis run across every variant the configured
/// [`ReportFlow`] requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSynthOutcome {
    pub kinds: Vec<ReportKindOutcome>,
}

impl ReportSynthOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.kinds.iter().any(ReportKindOutcome::succeeded)
    }
}

/// Size-bounded, source-labeled context packer (spec §4.9 step 3).
pub struct ContextPacker {
    max_context_chars: usize,
}

impl ContextPacker {
    #[must_use]
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    /// Pack ranked candidates into blocks until the next block would exceed
    /// the char budget. Returns the joined context plus a `label ->
    /// post_url` sources map for citation linking.
    fn pack(&self, ranked: &[EnrichedPostRow], light_mode: bool) -> (String, HashMap<String, String>, Vec<(String, String)>) {
        let mut context = String::new();
        let mut sources = HashMap::new();
        let mut handles_by_label = Vec::new();

        for (index, row) in ranked.iter().enumerate() {
            let label = format!("T{}", index + 1);
            let block_text = render_block(&label, row, light_mode);

            let projected_len = if context.is_empty() {
                block_text.chars().count()
            } else {
                context.chars().count() + 1 + block_text.chars().count()
            };
            if projected_len > self.max_context_chars {
                break;
            }

            if !context.is_empty() {
                context.push('\n');
            }
            context.push_str(&block_text);
            sources.insert(label.clone(), row.post.post_url.clone());
            handles_by_label.push((label, row.account_handle.clone()));
        }

        (context, sources, handles_by_label)
    }
}

const IMAGE_URL_MARKER_RE: &str = r"https?://\S+\.(?:jpg|jpeg|png|gif|webp|mp4)\b";

fn render_block(label: &str, row: &EnrichedPostRow, light_mode: bool) -> String {
    let media_marker = if row.post.has_media() {
        format!("[attached {} images]\n", row.post.media_urls.len())
    } else {
        String::new()
    };

    let cleaned_body = strip_inline_image_urls(&row.post.body_markdown);
    let include_insight = !(light_mode && row.enrichment.image_description.is_none() && !row.post.has_media());

    let mut block = format!(
        "[{label} @{handle}]\n{media_marker}{body}",
        handle = row.account_handle,
        body = cleaned_body
    );
    if include_insight {
        block.push_str(&format!("\n\u{2192} insight: {}", row.enrichment.deep_interpretation));
    }
    block
}

fn strip_inline_image_urls(body: &str) -> String {
    match Regex::new(IMAGE_URL_MARKER_RE) {
        Ok(re) => re.replace_all(body, "").into_owned(),
        Err(_) => body.to_owned(),
    }
}

/// Build the digest-style, categorical bullet-list prompt (light variant).
fn build_light_prompt(context: &str) -> String {
    format!(
        "Produce a digest-style summary of the following sourced posts as \
         categorical bullet lists grouped by theme. Keep it terse; omit \
         sources that add no signal.\n\nCONTEXT:\n{context}"
    )
}

/// Build the five-section editorial-analysis prompt (deep variant) with
/// mandatory `[Source: Tn]` citations.
fn build_deep_prompt(context: &str) -> String {
    format!(
        "Write a five-section editorial analysis (Overview, Key \
         Developments, Notable Voices, Risks & Counter-signals, Outlook) \
         from the following sourced posts. Every claim drawn from a source \
         must cite it inline as `[Source: Tn]`, using commas for multiple \
         sources in one citation.\n\nCONTEXT:\n{context}"
    )
}

/// Header prepended to every persisted report body (spec §4.9 step 5).
fn render_header(title: &str, generated_at: DateTime<Utc>, window_start: DateTime<Utc>, window_end: DateTime<Utc>, post_count: usize) -> String {
    format!(
        "# {title}\n\n_Generated {generated_at} — window {window_start} to \
         {window_end} — {post_count} posts_\n\n",
        generated_at = generated_at.to_rfc3339(),
        window_start = window_start.to_rfc3339(),
        window_end = window_end.to_rfc3339(),
    )
}

/// Sources appendix rendered from the packer's `label -> (post_url, handle)`
/// map.
fn render_sources_appendix(handles_by_label: &[(String, String)], sources: &HashMap<String, String>) -> String {
    let mut appendix = String::from("\n\n## Sources\n");
    for (label, handle) in handles_by_label {
        if let Some(url) = sources.get(label) {
            appendix.push_str(&format!("- {label}: @{handle} — {url}\n"));
        }
    }
    appendix
}

/// Escape stray `[`/`]` that would otherwise collide with markdown link
/// syntax, while rewriting every `[Source: Tn, ...]` citation into
/// `[Source: [Tn](url), ...]` using the packer's sources map (spec §4.9
/// step 5, scenario E).
fn postprocess_citations(body: &str, sources: &HashMap<String, String>) -> String {
    let Ok(citation_re) = Regex::new(r"\[Source:\s*([^\]]+)\]") else {
        return escape_brackets(body);
    };

    let mut result = String::with_capacity(body.len());
    let mut last_end = 0;
    for captures in citation_re.captures_iter(body) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        result.push_str(&escape_brackets(&body[last_end..whole.start()]));

        let inner = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let linked = inner
            .split(',')
            .map(str::trim)
            .map(|tag| match sources.get(tag) {
                Some(url) => format!("[{tag}]({url})"),
                None => tag.to_owned(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        result.push_str(&format!("[Source: {linked}]"));
        last_end = whole.end();
    }
    result.push_str(&escape_brackets(&body[last_end..]));
    result
}

fn escape_brackets(segment: &str) -> String {
    segment.replace('[', "\\[").replace(']', "\\]")
}

/// Size-bounded, multi-model report synthesizer.
pub struct ReportSynthesizer {
    store: Arc<dyn Store>,
    model_client: Arc<dyn ModelClient>,
    note_publisher: Option<Arc<dyn NotePublisher>>,
    clock: Arc<dyn Clock>,
    config: ReportSynthConfig,
}

impl ReportSynthesizer {
    pub fn new(
        store: Arc<dyn Store>,
        model_client: Arc<dyn ModelClient>,
        note_publisher: Option<Arc<dyn NotePublisher>>,
        clock: Arc<dyn Clock>,
        config: ReportSynthConfig,
    ) -> Self {
        Self {
            store,
            model_client,
            note_publisher,
            clock,
            config,
        }
    }

    /// Run the configured flow end-to-end: candidate selection, scoring,
    /// packing, and a fan-out synthesis per variant.
    pub async fn run(&self) -> Result<ReportSynthOutcome, Error> {
        let now = self.clock.utc();
        let window_start = now - chrono::Duration::hours(self.config.hours);
        let window_end = now;

        let candidate_cap = self.config.limit.saturating_mul(self.config.candidate_multiplier.max(1));
        let candidates = self
            .store
            .select_enriched_in_window(window_start, window_end, candidate_cap, &self.config.exclude_tags)
            .await
            .map_err(|error| Error::database_constraint(error.to_string()))?;

        let mut ranked = candidates;
        ranked.sort_by(|a, b| {
            let score_a = score(&to_scorer_input(a), &self.config.scoring);
            let score_b = score(&to_scorer_input(b), &self.config.scoring);
            compare_candidates(score_a, a.post.published_at, score_b, b.post.published_at)
        });
        ranked.truncate(usize::try_from(self.config.limit).unwrap_or(usize::MAX));

        let mut kinds = Vec::new();
        for kind in self.config.flow.variants() {
            let outcome = self
                .synthesize_kind(kind, &ranked, window_start, window_end, now, None)
                .await?;
            kinds.push(outcome);
        }

        Ok(ReportSynthOutcome { kinds })
    }

    /// Run a single-account "KOL" synthesis (spec §6 `kol_report` task):
    /// the candidate pool is one account's recent completed enrichments
    /// rather than the whole roster, and the persisted report carries
    /// `account_id = Some(account_id)`.
    pub async fn run_for_account(
        &self,
        account_id: i64,
        days: i64,
    ) -> Result<ReportKindOutcome, Error> {
        let now = self.clock.utc();
        let window_start = now - chrono::Duration::days(days);
        let window_end = now;

        let candidates = self
            .store
            .select_recent_enrichments_for_account(account_id, days, now)
            .await
            .map_err(|error| Error::database_constraint(error.to_string()))?;

        let mut ranked = candidates;
        ranked.sort_by(|a, b| {
            let score_a = score(&to_scorer_input(a), &self.config.scoring);
            let score_b = score(&to_scorer_input(b), &self.config.scoring);
            compare_candidates(score_a, a.post.published_at, score_b, b.post.published_at)
        });
        ranked.truncate(usize::try_from(self.config.limit).unwrap_or(usize::MAX));

        self.synthesize_kind(
            ReportKind::MonthlyKol,
            &ranked,
            window_start,
            window_end,
            now,
            Some(account_id),
        )
        .await
    }

    async fn synthesize_kind(
        &self,
        kind: ReportKind,
        ranked: &[EnrichedPostRow],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
        account_id: Option<i64>,
    ) -> Result<ReportKindOutcome, Error> {
        let light_mode = kind == ReportKind::DailyLight;
        let packer = ContextPacker::new(self.config.max_context_chars);
        let (context, sources, handles_by_label) = packer.pack(ranked, light_mode);

        let prompt = if light_mode {
            build_light_prompt(&context)
        } else {
            build_deep_prompt(&context)
        };

        let title = match kind {
            ReportKind::DailyLight => "Daily Digest",
            ReportKind::DailyDeep => "Daily Deep Analysis",
            ReportKind::MonthlyKol => "Monthly KOL Report",
        };

        let mut handles = Vec::with_capacity(self.config.model_ids.len());
        for model_id in self.config.model_ids.clone() {
            let store = Arc::clone(&self.store);
            let model_client = Arc::clone(&self.model_client);
            let note_publisher = self.note_publisher.clone();
            let prompt = prompt.clone();
            let sources = sources.clone();
            let handles_by_label = handles_by_label.clone();
            let title = title.to_owned();
            let max_retries = self.config.max_retries;
            let temperature = self.config.temperature;
            let post_count = handles_by_label.len();

            handles.push(tokio::spawn(async move {
                synthesize_one_model(
                    &*store,
                    &*model_client,
                    note_publisher.as_deref(),
                    &model_id,
                    &prompt,
                    temperature,
                    max_retries,
                    &title,
                    now,
                    window_start,
                    window_end,
                    post_count,
                    kind,
                    account_id,
                    &sources,
                    &handles_by_label,
                )
                .await
            }));
        }

        let mut model_outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => model_outcomes.push(outcome),
                Err(error) => {
                    warn!(error = %error, "report fan-out task panicked");
                    model_outcomes.push(ModelVariantOutcome {
                        model_id: "unknown".to_owned(),
                        success: false,
                        error: Some(error.to_string()),
                    });
                }
            }
        }

        Ok(ReportKindOutcome {
            kind,
            candidates_considered: u32::try_from(ranked.len()).unwrap_or(u32::MAX),
            posts_packed: u32::try_from(handles_by_label.len()).unwrap_or(u32::MAX),
            model_outcomes,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn synthesize_one_model(
    store: &dyn Store,
    model_client: &dyn ModelClient,
    note_publisher: Option<&dyn NotePublisher>,
    model_id: &str,
    prompt: &str,
    temperature: f32,
    max_retries: u32,
    title: &str,
    generated_at: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    post_count: usize,
    kind: ReportKind,
    account_id: Option<i64>,
    sources: &HashMap<String, String>,
    handles_by_label: &[(String, String)],
) -> ModelVariantOutcome {
    let response = match model_client.text_chat(prompt, model_id, temperature, max_retries).await {
        Ok(response) => response,
        Err(error) => {
            return ModelVariantOutcome {
                model_id: model_id.to_owned(),
                success: false,
                error: Some(error.to_string()),
            };
        }
    };

    let body = postprocess_citations(&response.content, sources);
    let mut full_body = render_header(title, generated_at, window_start, window_end, post_count);
    full_body.push_str(&body);
    full_body.push_str(&render_sources_appendix(handles_by_label, sources));

    let new_report = NewReport {
        kind,
        title: title.to_owned(),
        body_markdown: full_body.clone(),
        window_start,
        window_end,
        account_id,
        model_name: response.model.clone(),
    };

    match store.insert_report(&new_report).await {
        Ok(_) => {
            if let Some(publisher) = note_publisher {
                // Best-effort: a publish failure never fails report synthesis
                // (spec §4.9 step 5).
                let _ = publisher.publish(title, &full_body).await;
            }
            ModelVariantOutcome {
                model_id: model_id.to_owned(),
                success: true,
                error: None,
            }
        }
        Err(error) => ModelVariantOutcome {
            model_id: model_id.to_owned(),
            success: false,
            error: Some(error.to_string()),
        },
    }
}

fn to_scorer_input(row: &EnrichedPostRow) -> ScoredPostInput<'_> {
    ScoredPostInput {
        kind: row.post.kind,
        body: &row.post.body_markdown,
        content_type: &row.enrichment.content_type,
        tag: &row.enrichment.tag,
        interpretation: &row.enrichment.deep_interpretation,
        has_media: row.post.has_media(),
        published_at: row.post.published_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{Account, Tier};
    use crate::domain::enrichment::{Enrichment, EnrichmentStatus};
    use crate::domain::post::{Post, PostKind};
    use crate::domain::ports::{ImageAttachment, ModelClientError, ModelResponse, NewPost, NotePublishError, StoreError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use mockable::DefaultClock;
    use rstest::rstest;
    use std::sync::Mutex as StdMutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().expect("valid")
    }

    fn row(id: i64, handle: &str, body: &str, interpretation: &str, hour: u32) -> EnrichedPostRow {
        EnrichedPostRow {
            post: Post {
                id,
                account_id: 1,
                post_url: format!("https://example.invalid/{id}"),
                body_markdown: body.to_owned(),
                kind: PostKind::Original,
                media_urls: vec![],
                published_at: Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).single().expect("valid"),
            },
            account_handle: handle.to_owned(),
            enrichment: Enrichment {
                post_id: id,
                status: EnrichmentStatus::Completed,
                summary: "s".to_owned(),
                tag: "news".to_owned(),
                content_type: "text".to_owned(),
                entities: vec![],
                deep_interpretation: interpretation.to_owned(),
                image_description: None,
                continues_thread: false,
                model_name: "m".to_owned(),
                created_at: now(),
                completed_at: Some(now()),
            },
        }
    }

    #[rstest]
    fn packer_includes_exactly_one_block_when_budget_equals_first_block_length() {
        let rows = vec![row(1, "alice", "first", "insight one", 0), row(2, "bob", "second", "insight two", 1)];
        let first_len = render_block("T1", &rows[0], false).chars().count();
        let packer = ContextPacker::new(first_len);
        let (context, sources, _) = packer.pack(&rows, false);
        assert_eq!(sources.len(), 1);
        assert_eq!(context.chars().count(), first_len);
    }

    #[rstest]
    fn packer_never_exceeds_budget() {
        let rows: Vec<EnrichedPostRow> = (0..10)
            .map(|i| row(i, "alice", "a fairly long body of text to pack", "a fairly long insight text", 0))
            .collect();
        let packer = ContextPacker::new(120);
        let (context, _, _) = packer.pack(&rows, false);
        assert!(context.chars().count() <= 120);
    }

    #[rstest]
    fn light_mode_omits_insight_for_text_only_posts() {
        let r = row(1, "alice", "plain text", "should be omitted", 0);
        let block = render_block("T1", &r, true);
        assert!(!block.contains("should be omitted"));
    }

    #[rstest]
    fn deep_mode_always_includes_insight() {
        let r = row(1, "alice", "plain text", "must appear", 0);
        let block = render_block("T1", &r, false);
        assert!(block.contains("must appear"));
    }

    #[rstest]
    fn citation_linking_rewrites_source_tags_to_markdown_links() {
        let mut sources = HashMap::new();
        sources.insert("T2".to_owned(), "https://example.invalid/2".to_owned());
        sources.insert("T9".to_owned(), "https://example.invalid/9".to_owned());

        let body = "Some claim [Source: T2, T9] and stray [brackets] here.";
        let result = postprocess_citations(body, &sources);

        assert!(result.contains("[Source: [T2](https://example.invalid/2), [T9](https://example.invalid/9)]"));
        assert!(result.contains("\\[brackets\\]"));
    }

    #[derive(Default)]
    struct FakeStore {
        candidates: Vec<EnrichedPostRow>,
        inserted: StdMutex<Vec<NewReport>>,
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
        async fn commit_enrichment(&self, _enrichment: &Enrichment) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn select_enriched_in_window(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _limit: u32,
            _exclude_tags: &[String],
        ) -> Result<Vec<EnrichedPostRow>, StoreError> {
            Ok(self.candidates.clone())
        }
        async fn upsert_profile(&self, _profile: &crate::domain::Profile) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn insert_report(&self, report: &NewReport) -> Result<bool, StoreError> {
            self.inserted.lock().expect("poisoned").push(report.clone());
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

    struct FlakyModelClient {
        fail_models: Vec<String>,
    }

    #[async_trait]
    impl ModelClient for FlakyModelClient {
        async fn text_chat(
            &self,
            _prompt: &str,
            model_id: &str,
            _temperature: f32,
            _max_retries: u32,
        ) -> Result<ModelResponse, ModelClientError> {
            if self.fail_models.iter().any(|m| m == model_id) {
                return Err(ModelClientError::transport("simulated 500"));
            }
            Ok(ModelResponse {
                content: "a generated report body".to_owned(),
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
        ) -> Result<ModelResponse, ModelClientError> {
            Ok(ModelResponse {
                content: String::new(),
                provider: "fake".to_owned(),
                model: model_id.to_owned(),
            })
        }
    }

    struct NoopPublisher;

    #[async_trait]
    impl NotePublisher for NoopPublisher {
        async fn publish(&self, _title: &str, _body_markdown: &str) -> Result<(), NotePublishError> {
            Ok(())
        }
    }

    #[rstest]
    #[tokio::test]
    async fn fan_out_with_one_model_failing_still_succeeds_overall() {
        let store = Arc::new(FakeStore {
            candidates: vec![row(1, "alice", "a post", "an insight", 0)],
            ..FakeStore::default()
        });
        let model_client = Arc::new(FlakyModelClient {
            fail_models: vec!["bad-model".to_owned()],
        });

        let config = ReportSynthConfig {
            model_ids: vec!["bad-model".to_owned(), "good-model".to_owned()],
            flow: ReportFlow::Light,
            ..ReportSynthConfig::default()
        };

        let synthesizer = ReportSynthesizer::new(
            Arc::clone(&store) as Arc<dyn Store>,
            model_client,
            Some(Arc::new(NoopPublisher)),
            Arc::new(DefaultClock),
            config,
        );

        let outcome = synthesizer.run().await.expect("run succeeds");
        assert!(outcome.succeeded());
        assert_eq!(outcome.kinds.len(), 1);
        let kind_outcome = &outcome.kinds[0];
        assert_eq!(kind_outcome.model_outcomes.len(), 2);
        let successes = kind_outcome.model_outcomes.iter().filter(|o| o.success).count();
        assert_eq!(successes, 1);
        assert_eq!(store.inserted.lock().expect("poisoned").len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn dual_flow_produces_both_kinds() {
        let store = Arc::new(FakeStore {
            candidates: vec![row(1, "alice", "a post", "an insight", 0)],
            ..FakeStore::default()
        });
        let model_client = Arc::new(FlakyModelClient { fail_models: vec![] });

        let config = ReportSynthConfig {
            model_ids: vec!["model-a".to_owned()],
            flow: ReportFlow::Dual,
            ..ReportSynthConfig::default()
        };

        let synthesizer = ReportSynthesizer::new(
            Arc::clone(&store) as Arc<dyn Store>,
            model_client,
            None,
            Arc::new(DefaultClock),
            config,
        );

        let outcome = synthesizer.run().await.expect("run succeeds");
        assert_eq!(outcome.kinds.len(), 2);
        assert!(outcome.kinds.iter().any(|k| k.kind == ReportKind::DailyLight));
        assert!(outcome.kinds.iter().any(|k| k.kind == ReportKind::DailyDeep));
    }
}
