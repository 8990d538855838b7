//! Diesel row types and their conversions to/from domain entities.
//!
//! Following Design Notes ("String-typed state machines: keep as strings
//! in the schema for migration compatibility, but introduce enumerations
//! at the boundary"), every enum column round-trips through a plain
//! `String` here and is parsed into its domain enum only at the adapter
//! boundary in `diesel_store.rs`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::schema::{accounts, enrichments, posts, profiles, reports};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = accounts)]
pub struct AccountRow {
    pub id: i64,
    pub handle: String,
    pub tier: String,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub next_fetch_at: DateTime<Utc>,
    pub status: String,
    pub consecutive_failures: i32,
    pub avg_posts_per_day: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = accounts)]
pub struct AccountFetchSuccessUpdate {
    pub status: String,
    pub consecutive_failures: i32,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub next_fetch_at: DateTime<Utc>,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = accounts)]
pub struct AccountTierUpdate {
    pub tier: String,
    pub avg_posts_per_day: f64,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = posts)]
pub struct PostRow {
    pub id: i64,
    pub account_id: i64,
    pub post_url: String,
    pub body_markdown: String,
    pub kind: String,
    pub media_urls: Vec<String>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = posts)]
pub struct NewPostRow {
    pub account_id: i64,
    pub post_url: String,
    pub body_markdown: String,
    pub kind: String,
    pub media_urls: Vec<String>,
    pub published_at: DateTime<Utc>,
}

/// JSON-encoded entity list stored in `enrichments.entities` (`Jsonb`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityJson {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = enrichments)]
pub struct NewEnrichmentRow {
    pub post_id: i64,
    pub status: String,
    pub summary: String,
    pub tag: String,
    pub content_type: String,
    pub entities: serde_json::Value,
    pub deep_interpretation: String,
    pub image_description: Option<String>,
    pub continues_thread: bool,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = profiles)]
pub struct NewProfileRow {
    pub account_id: i64,
    pub keywords: Vec<String>,
    pub sentiment_trend: String,
    pub mentioned_asset_categories: Vec<String>,
    pub interaction_graph: Vec<String>,
    pub role_label: String,
    pub trajectory_summary: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = reports)]
pub struct NewReportRow {
    pub kind: String,
    pub title: String,
    pub body_markdown: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub account_id: Option<i64>,
    pub model_name: String,
}
