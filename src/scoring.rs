// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Score and streak calculation over finished activity sessions
//!
//! Both calculators are pure: they read a slice of [`SessionRecord`] and an
//! explicitly injected "now", so window boundaries (midnight rollover,
//! challenge start instants) are deterministic under test.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::models::{ChallengeType, SessionRecord};

/// Compute a user's score for one metric from finished sessions
///
/// `Sessions` counts matching sessions, `Calories` and `Duration` sum the
/// corresponding field. Only sessions dated at or after `since` count.
/// `Streak` is the current consecutive-day count as of `now`; a streak is not
/// window-bound, so `since` is ignored for it and the full session history
/// should be passed in.
pub fn score(
    sessions: &[SessionRecord],
    metric: ChallengeType,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> i64 {
    match metric {
        ChallengeType::Streak => current_streak(&active_days(sessions), now.date_naive()),
        ChallengeType::Sessions => sessions.iter().filter(|s| s.date >= since).count() as i64,
        ChallengeType::Calories => sessions
            .iter()
            .filter(|s| s.date >= since)
            .map(|s| s.calories)
            .sum(),
        ChallengeType::Duration => sessions
            .iter()
            .filter(|s| s.date >= since)
            .map(|s| s.duration_minutes)
            .sum(),
    }
}

/// Distinct calendar days (UTC, truncated to midnight) with at least one session
pub fn active_days(sessions: &[SessionRecord]) -> BTreeSet<NaiveDate> {
    sessions.iter().map(|s| s.date.date_naive()).collect()
}

/// Current consecutive-day streak ending today or yesterday
///
/// If the most recent active day is older than yesterday the streak is 0.
/// Otherwise walk backward one calendar day at a time, counting while each
/// day is present in the set.
pub fn current_streak(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> i64 {
    let most_recent = match days.iter().next_back() {
        Some(day) => *day,
        None => return 0,
    };

    let yesterday = today - Duration::days(1);
    if most_recent != today && most_recent != yesterday {
        return 0;
    }

    let mut streak = 0;
    let mut cursor = most_recent;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}

/// Start of the ISO week containing `now` (Monday 00:00 UTC)
pub fn start_of_week(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = now.weekday().num_days_from_monday() as i64;
    let monday = now.date_naive() - Duration::days(days_from_monday);
    monday
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

/// Start of the calendar month containing `now` (UTC)
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .expect("day 1 is always valid")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionCategory;
    use chrono::TimeZone;

    fn session(date: DateTime<Utc>, minutes: i64, calories: i64) -> SessionRecord {
        SessionRecord {
            date,
            duration_minutes: minutes,
            calories,
            category: SessionCategory::Cardio,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_streak_three_consecutive_days() {
        let today = day(2025, 6, 10);
        let days: BTreeSet<NaiveDate> =
            [day(2025, 6, 10), day(2025, 6, 9), day(2025, 6, 8)].into();
        assert_eq!(current_streak(&days, today), 3);
    }

    #[test]
    fn test_streak_broken_by_gap() {
        let today = day(2025, 6, 10);
        let days: BTreeSet<NaiveDate> = [day(2025, 6, 10), day(2025, 6, 7)].into();
        assert_eq!(current_streak(&days, today), 1);
    }

    #[test]
    fn test_streak_empty_set() {
        assert_eq!(current_streak(&BTreeSet::new(), day(2025, 6, 10)), 0);
    }

    #[test]
    fn test_streak_yesterday_only_survives_until_midnight() {
        let days: BTreeSet<NaiveDate> = [day(2025, 6, 9)].into();
        // Evaluated on the 10th: yesterday's streak still counts.
        assert_eq!(current_streak(&days, day(2025, 6, 10)), 1);
        // Evaluated on the 11th: the streak has lapsed.
        assert_eq!(current_streak(&days, day(2025, 6, 11)), 0);
    }

    #[test]
    fn test_streak_ending_yesterday_counts_full_run() {
        let today = day(2025, 6, 10);
        let days: BTreeSet<NaiveDate> =
            [day(2025, 6, 9), day(2025, 6, 8), day(2025, 6, 7)].into();
        assert_eq!(current_streak(&days, today), 3);
    }

    #[test]
    fn test_score_counts_only_sessions_in_window() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
        let since = Utc.with_ymd_and_hms(2025, 6, 8, 0, 0, 0).unwrap();
        let sessions = vec![
            session(Utc.with_ymd_and_hms(2025, 6, 9, 8, 0, 0).unwrap(), 30, 250),
            session(Utc.with_ymd_and_hms(2025, 6, 8, 8, 0, 0).unwrap(), 45, 400),
            // Before the window, must not count.
            session(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(), 60, 600),
        ];

        assert_eq!(score(&sessions, ChallengeType::Sessions, since, now), 2);
        assert_eq!(score(&sessions, ChallengeType::Calories, since, now), 650);
        assert_eq!(score(&sessions, ChallengeType::Duration, since, now), 75);
    }

    #[test]
    fn test_streak_metric_ignores_since() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
        // A window starting today would exclude both sessions, but streak
        // is not window-bound.
        let since = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let sessions = vec![
            session(Utc.with_ymd_and_hms(2025, 6, 9, 8, 0, 0).unwrap(), 30, 250),
            session(Utc.with_ymd_and_hms(2025, 6, 8, 8, 0, 0).unwrap(), 30, 250),
        ];
        assert_eq!(score(&sessions, ChallengeType::Streak, since, now), 2);
    }

    #[test]
    fn test_multiple_sessions_one_day_is_one_streak_day() {
        let today = day(2025, 6, 10);
        let sessions = vec![
            session(Utc.with_ymd_and_hms(2025, 6, 10, 7, 0, 0).unwrap(), 30, 250),
            session(Utc.with_ymd_and_hms(2025, 6, 10, 19, 0, 0).unwrap(), 30, 250),
        ];
        assert_eq!(current_streak(&active_days(&sessions), today), 1);
    }

    #[test]
    fn test_start_of_week_is_monday_midnight() {
        // 2025-06-11 is a Wednesday.
        let now = Utc.with_ymd_and_hms(2025, 6, 11, 15, 30, 0).unwrap();
        let start = start_of_week(now);
        assert_eq!(start.date_naive(), day(2025, 6, 9));
        assert_eq!(start.time().to_string(), "00:00:00");
    }

    #[test]
    fn test_start_of_month() {
        let now = Utc.with_ymd_and_hms(2025, 6, 11, 15, 30, 0).unwrap();
        assert_eq!(start_of_month(now).date_naive(), day(2025, 6, 1));
    }
}
