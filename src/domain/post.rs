//! Post entity: one ingested item from a monitored account's feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rule-classified post kind, assigned once at ingest time by the gateway
/// client (spec §4.2) and never mutated afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    /// Not a reply, quote, or predominantly-link post.
    Original,
    /// Text begins with `@` or contains a reply marker.
    Reply,
    /// Body contains a blockquote.
    Quote,
    /// URL characters exceed 30% of the body length.
    LinkShare,
}

/// An ingested post. Immutable once inserted; `post_url` is the logical
/// primary key enforced by the store's unique index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub account_id: i64,
    pub post_url: String,
    pub body_markdown: String,
    pub kind: PostKind,
    pub media_urls: Vec<String>,
    pub published_at: DateTime<Utc>,
}

impl Post {
    /// True when the post has no text body (whitespace only).
    ///
    /// Spec §8 boundary behaviour: a post with no text and no media still
    /// runs through text-prompt enrichment and may legitimately complete
    /// with a near-empty summary.
    pub fn has_empty_body(&self) -> bool {
        self.body_markdown.trim().is_empty()
    }

    /// True when the post references at least one media URL.
    pub fn has_media(&self) -> bool {
        !self.media_urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn sample(body: &str, media: Vec<&str>) -> Post {
        Post {
            id: 1,
            account_id: 1,
            post_url: "https://example.invalid/1".to_owned(),
            body_markdown: body.to_owned(),
            kind: PostKind::Original,
            media_urls: media.into_iter().map(str::to_owned).collect(),
            published_at: Utc
                .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
                .single()
                .expect("valid timestamp"),
        }
    }

    #[rstest]
    #[case("", true)]
    #[case("   \n", true)]
    #[case("hello", false)]
    fn empty_body_detection(#[case] body: &str, #[case] expected: bool) {
        assert_eq!(sample(body, vec![]).has_empty_body(), expected);
    }

    #[rstest]
    fn media_presence() {
        assert!(!sample("x", vec![]).has_media());
        assert!(sample("x", vec!["https://cdn.invalid/a.jpg"]).has_media());
    }
}
