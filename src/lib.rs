#![cfg_attr(
    test,
    expect(clippy::expect_used, reason = "tests require contextual panics")
)]
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]
//! Coordination engine for the account-monitoring / enrichment / report
//! pipeline: adaptive fetch scheduling, bounded-concurrency enrichment, and
//! multi-model report synthesis.

pub mod config;
pub mod domain;
pub mod outbound;
pub mod tasks;
