//! Diesel table definitions for the five-table PostgreSQL schema (spec §3,
//! §6 "Persistent schema").
//!
//! Maintained by hand alongside the `migrations/` directory, following the
//! teacher's `outbound::persistence::schema` convention of manually-kept
//! `table!` macros rather than a generated `schema.rs`.

diesel::table! {
    accounts (id) {
        id -> BigInt,
        handle -> Text,
        tier -> Text,
        last_fetched_at -> Nullable<Timestamptz>,
        next_fetch_at -> Timestamptz,
        status -> Text,
        consecutive_failures -> Int4,
        avg_posts_per_day -> Double,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    posts (id) {
        id -> BigInt,
        account_id -> BigInt,
        post_url -> Text,
        body_markdown -> Text,
        kind -> Text,
        media_urls -> Array<Text>,
        published_at -> Timestamptz,
    }
}

diesel::table! {
    enrichments (post_id) {
        post_id -> BigInt,
        status -> Text,
        summary -> Text,
        tag -> Text,
        content_type -> Text,
        entities -> Jsonb,
        deep_interpretation -> Text,
        image_description -> Nullable<Text>,
        continues_thread -> Bool,
        model_name -> Text,
        created_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    profiles (account_id) {
        account_id -> BigInt,
        keywords -> Array<Text>,
        sentiment_trend -> Text,
        mentioned_asset_categories -> Array<Text>,
        interaction_graph -> Array<Text>,
        role_label -> Text,
        trajectory_summary -> Text,
        generated_at -> Timestamptz,
    }
}

diesel::table! {
    reports (id) {
        id -> BigInt,
        kind -> Text,
        title -> Text,
        body_markdown -> Text,
        window_start -> Timestamptz,
        window_end -> Timestamptz,
        account_id -> Nullable<BigInt>,
        model_name -> Text,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(posts -> accounts (account_id));
diesel::joinable!(enrichments -> posts (post_id));
diesel::joinable!(profiles -> accounts (account_id));

diesel::allow_tables_to_appear_in_same_query!(accounts, posts, enrichments, profiles, reports,);
