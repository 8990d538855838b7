//! Per-account scheduling state machine, tier classification, and the
//! nightly quiet window (spec §4.5).
//!
//! These are pure functions over [`Account`] plus configuration; the
//! store-backed selection queries (`lock_and_select_due`, `select_stale`)
//! live behind [`crate::domain::ports::Store`] since they require a
//! randomized/ordered scan across many rows.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use rand::Rng;

use super::account::{Account, AccountStatus, Tier};

/// Nominal fetch intervals per tier (spec §4.5 defaults).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierIntervals {
    pub high: ChronoDuration,
    pub medium: ChronoDuration,
    pub low_min: ChronoDuration,
    pub low_max: ChronoDuration,
}

impl Default for TierIntervals {
    fn default() -> Self {
        Self {
            high: ChronoDuration::minutes(20),
            medium: ChronoDuration::minutes(90),
            low_min: ChronoDuration::hours(3),
            low_max: ChronoDuration::hours(5),
        }
    }
}

/// Retry delay bounds used after a failed fetch (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryWindow {
    pub min: ChronoDuration,
    pub max: ChronoDuration,
}

impl Default for RetryWindow {
    fn default() -> Self {
        Self {
            min: ChronoDuration::minutes(5),
            max: ChronoDuration::minutes(30),
        }
    }
}

/// Inclusive UTC hour range during which all fetch jobs return immediately
/// with zero work done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietWindow {
    /// True when `now`'s UTC hour falls within `[start_hour, end_hour]`,
    /// wrapping across midnight when `start_hour > end_hour`.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let hour = now.hour();
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour <= self.end_hour
        } else {
            hour >= self.start_hour || hour <= self.end_hour
        }
    }
}

/// Draw a concrete interval for `tier`, using `rng` only for [`Tier::Low`]'s
/// 3-5 hour band.
pub fn interval_for_tier(tier: Tier, intervals: &TierIntervals, rng: &mut impl Rng) -> ChronoDuration {
    match tier {
        Tier::High => intervals.high,
        Tier::Medium => intervals.medium,
        Tier::Low => {
            let min_secs = intervals.low_min.num_seconds();
            let max_secs = intervals.low_max.num_seconds().max(min_secs + 1);
            ChronoDuration::seconds(rng.gen_range(min_secs..max_secs))
        }
    }
}

/// Apply a successful fetch transition in place.
///
/// Invariant (spec §8.2): `next_fetch_at(account) > now` immediately after.
pub fn on_fetch_success(
    account: &mut Account,
    now: DateTime<Utc>,
    intervals: &TierIntervals,
    rng: &mut impl Rng,
) {
    account.status = AccountStatus::Ok;
    account.consecutive_failures = 0;
    account.last_fetched_at = Some(now);
    account.next_fetch_at = now + interval_for_tier(account.tier, intervals, rng);
}

/// Apply a failed fetch transition in place. Transitions to
/// [`AccountStatus::Quarantined`] once `consecutive_failures` reaches
/// `max_failures` (spec invariant: `quarantined <=> consecutive_failures >=
/// max_failures`).
pub fn on_fetch_failure(
    account: &mut Account,
    now: DateTime<Utc>,
    retry_window: &RetryWindow,
    max_failures: u32,
    rng: &mut impl Rng,
) {
    account.consecutive_failures = account.consecutive_failures.saturating_add(1);
    if account.consecutive_failures >= max_failures {
        account.status = AccountStatus::Quarantined;
        return;
    }
    account.status = AccountStatus::Failed;
    let min_secs = retry_window.min.num_seconds();
    let max_secs = retry_window.max.num_seconds().max(min_secs + 1);
    account.next_fetch_at = now + ChronoDuration::seconds(rng.gen_range(min_secs..max_secs));
}

/// Classify a tier from an observed posts-per-day average (spec §4.5):
/// `> 10` -> High, `> 1` -> Medium, else Low.
pub fn classify_tier_from_rate(avg_posts_per_day: f64) -> Tier {
    if avg_posts_per_day > 10.0 {
        Tier::High
    } else if avg_posts_per_day > 1.0 {
        Tier::Medium
    } else {
        Tier::Low
    }
}

/// Reclassify one account's tier given its observed posting rate, applying
/// the cold-start fallback (spec §4.5: an account with zero posts in the
/// window whose record is younger than 3 days is pinned to Medium) and
/// leaving [`AccountStatus::Quarantined`] accounts untouched.
///
/// Returns `true` when the tier changed.
pub fn reclassify_tier(account: &mut Account, avg_posts_per_day: f64, now: DateTime<Utc>) -> bool {
    if account.status == AccountStatus::Quarantined {
        return false;
    }

    let new_tier = if avg_posts_per_day == 0.0 && account.is_cold_start(now) {
        Tier::Medium
    } else {
        classify_tier_from_rate(avg_posts_per_day)
    };

    account.avg_posts_per_day = avg_posts_per_day;
    if account.tier == new_tier {
        return false;
    }
    account.tier = new_tier;
    true
}

/// Clamp the "days observed" denominator used by the posts-per-day
/// aggregation to `[1, 7]` (spec §4.5/§9).
///
/// This crate follows the "elapsed days since the oldest post in the
/// window" reading documented as the adopted resolution in `DESIGN.md`:
/// `clamp(today - oldest_post_date + 1, 1, 7)`.
pub fn clamp_days_observed(days_since_oldest_post: i64) -> i64 {
    (days_since_oldest_post + 1).clamp(1, 7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn bootstrap(tier: Tier) -> Account {
        let mut account = Account::bootstrap("handle", now());
        account.tier = tier;
        account
    }

    #[rstest]
    fn successful_fetch_clears_failures_and_advances_next_fetch() {
        let mut account = bootstrap(Tier::High);
        account.consecutive_failures = 2;
        let mut rng = SmallRng::seed_from_u64(1);

        on_fetch_success(&mut account, now(), &TierIntervals::default(), &mut rng);

        assert_eq!(account.status, AccountStatus::Ok);
        assert_eq!(account.consecutive_failures, 0);
        assert!(account.next_fetch_at > now());
        assert_eq!(account.last_fetched_at, Some(now()));
    }

    #[rstest]
    fn quarantine_triggers_at_max_failures() {
        let mut account = bootstrap(Tier::Medium);
        let mut rng = SmallRng::seed_from_u64(2);
        let retry_window = RetryWindow::default();

        for expected_failures in 1..=3u32 {
            on_fetch_failure(&mut account, now(), &retry_window, 3, &mut rng);
            assert_eq!(account.consecutive_failures, expected_failures);
            if expected_failures < 3 {
                assert_eq!(account.status, AccountStatus::Failed);
            }
        }

        assert_eq!(account.status, AccountStatus::Quarantined);
    }

    #[rstest]
    #[case(0.5, Tier::Low)]
    #[case(1.0, Tier::Low)]
    #[case(1.1, Tier::Medium)]
    #[case(10.0, Tier::Medium)]
    #[case(10.1, Tier::High)]
    fn tier_classification_boundaries(#[case] rate: f64, #[case] expected: Tier) {
        assert_eq!(classify_tier_from_rate(rate), expected);
    }

    #[rstest]
    fn cold_start_pins_to_medium_regardless_of_zero_rate() {
        let mut account = bootstrap(Tier::High);
        let changed = reclassify_tier(&mut account, 0.0, now() + chrono::Duration::days(1));
        assert_eq!(account.tier, Tier::Medium);
        assert!(changed);
    }

    #[rstest]
    fn zero_rate_past_cold_start_window_becomes_low() {
        let mut account = bootstrap(Tier::High);
        let changed = reclassify_tier(&mut account, 0.0, now() + chrono::Duration::days(4));
        assert_eq!(account.tier, Tier::Low);
        assert!(changed);
    }

    #[rstest]
    fn quarantined_accounts_are_never_reclassified() {
        let mut account = bootstrap(Tier::High);
        account.status = AccountStatus::Quarantined;
        let changed = reclassify_tier(&mut account, 20.0, now());
        assert_eq!(account.tier, Tier::High);
        assert!(!changed);
    }

    #[rstest]
    #[case(0, 6, 0, true)]
    #[case(0, 6, 7, false)]
    #[case(22, 4, 23, true)]
    #[case(22, 4, 12, false)]
    fn quiet_window_hour_ranges(
        #[case] start: u32,
        #[case] end: u32,
        #[case] hour: u32,
        #[case] expected: bool,
    ) {
        let window = QuietWindow {
            start_hour: start,
            end_hour: end,
        };
        let moment = Utc
            .with_ymd_and_hms(2026, 1, 1, hour, 30, 0)
            .single()
            .expect("valid timestamp");
        assert_eq!(window.contains(moment), expected);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(6, 7)]
    #[case(6, 7)]
    #[case(10, 7)]
    fn days_observed_is_clamped_to_one_through_seven(#[case] raw: i64, #[case] expected: i64) {
        assert_eq!(clamp_days_observed(raw), expected);
    }
}
