// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Leaderboard Aggregator
//!
//! Recomputes per-user stats snapshots from the activity log and serves
//! ranked views of the public entries. Opting out only hides an entry;
//! stats and XP survive and reappear on opt-in.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::activity::ActivityLog;
use crate::constants::leaderboard::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::database::Database;
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    LeaderboardEntry, SessionCategory, SessionRecord, StatsSnapshot, Visibility,
};
use crate::scoring;

/// Time window a leaderboard view ranks over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardPeriod {
    AllTime,
    Week,
    Month,
}

/// Stat a leaderboard view ranks by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardMetric {
    Sessions,
    Calories,
    Duration,
    Streak,
    Xp,
}

/// One row of a ranked leaderboard view
#[derive(Debug, Clone, Serialize)]
pub struct RankedEntry {
    pub rank: i64,
    pub entry: LeaderboardEntry,
}

/// Column the (period, metric) pair ranks by. Only session counts are
/// tracked per window; the remaining metrics have a single column and the
/// period is ignored for them.
fn stat_column(period: LeaderboardPeriod, metric: LeaderboardMetric) -> &'static str {
    match (metric, period) {
        (LeaderboardMetric::Sessions, LeaderboardPeriod::Week) => "week_sessions",
        (LeaderboardMetric::Sessions, LeaderboardPeriod::Month) => "month_sessions",
        (LeaderboardMetric::Sessions, LeaderboardPeriod::AllTime) => "total_sessions",
        (LeaderboardMetric::Calories, _) => "total_calories",
        (LeaderboardMetric::Duration, _) => "total_duration_min",
        (LeaderboardMetric::Streak, _) => "current_streak",
        (LeaderboardMetric::Xp, _) => "xp",
    }
}

fn stat_value(entry: &LeaderboardEntry, period: LeaderboardPeriod, metric: LeaderboardMetric) -> i64 {
    match (metric, period) {
        (LeaderboardMetric::Sessions, LeaderboardPeriod::Week) => entry.stats.this_week_sessions,
        (LeaderboardMetric::Sessions, LeaderboardPeriod::Month) => entry.stats.this_month_sessions,
        (LeaderboardMetric::Sessions, LeaderboardPeriod::AllTime) => entry.stats.total_sessions,
        (LeaderboardMetric::Calories, _) => entry.stats.total_calories_burned,
        (LeaderboardMetric::Duration, _) => entry.stats.total_duration_min,
        (LeaderboardMetric::Streak, _) => entry.stats.current_streak,
        (LeaderboardMetric::Xp, _) => entry.xp,
    }
}

/// Build the full stats snapshot from a user's finished sessions
pub fn build_snapshot(sessions: &[SessionRecord], now: DateTime<Utc>) -> StatsSnapshot {
    let week_start = scoring::start_of_week(now);
    let month_start = scoring::start_of_month(now);

    let mut stats = StatsSnapshot {
        current_streak: scoring::current_streak(&scoring::active_days(sessions), now.date_naive()),
        ..StatsSnapshot::default()
    };

    for session in sessions {
        stats.total_sessions += 1;
        stats.total_calories_burned += session.calories;
        stats.total_duration_min += session.duration_minutes;

        let in_week = session.date >= week_start;
        let in_month = session.date >= month_start;
        if in_week {
            stats.this_week_sessions += 1;
        }
        if in_month {
            stats.this_month_sessions += 1;
        }

        match session.category {
            SessionCategory::Strength => {
                stats.strength_sessions += 1;
                if in_week {
                    stats.strength_week += 1;
                }
                if in_month {
                    stats.strength_month += 1;
                }
            }
            SessionCategory::Cardio => {
                stats.cardio_sessions += 1;
                if in_week {
                    stats.cardio_week += 1;
                }
                if in_month {
                    stats.cardio_month += 1;
                }
            }
            SessionCategory::Bodyweight => {
                stats.bodyweight_sessions += 1;
                if in_week {
                    stats.bodyweight_week += 1;
                }
                if in_month {
                    stats.bodyweight_month += 1;
                }
            }
        }
    }

    stats
}

/// Owns leaderboard entries: refresh, visibility, and ranked queries
#[derive(Clone)]
pub struct LeaderboardManager {
    database: Database,
    activity_log: Arc<dyn ActivityLog>,
}

impl LeaderboardManager {
    pub fn new(database: Database, activity_log: Arc<dyn ActivityLog>) -> Self {
        Self {
            database,
            activity_log,
        }
    }

    /// Recompute the full stats snapshot from the activity log and upsert it
    pub async fn refresh(
        &self,
        user_id: Uuid,
        display_name: &str,
        avatar_ref: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StatsSnapshot> {
        let sessions = self.activity_log.list_finished_sessions(user_id, None).await?;
        let stats = build_snapshot(&sessions, now);
        self.database
            .upsert_entry_stats(user_id, display_name, avatar_ref, &stats, now)
            .await?;
        Ok(stats)
    }

    /// Opt the user into the public leaderboard after a fresh refresh
    pub async fn opt_in(
        &self,
        user_id: Uuid,
        display_name: &str,
        avatar_ref: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.refresh(user_id, display_name, avatar_ref, now).await?;
        self.database
            .set_visibility(user_id, Visibility::Public, now)
            .await?;
        info!(user.id = %user_id, "User opted into leaderboard");
        Ok(())
    }

    /// Hide the entry without discarding stats. Any running challenges are
    /// unaffected; challenge tracking is independent of visibility.
    pub async fn opt_out(&self, user_id: Uuid, now: DateTime<Utc>) -> EngineResult<()> {
        let updated = self
            .database
            .set_visibility(user_id, Visibility::Private, now)
            .await?;
        if !updated {
            return Err(EngineError::not_found("leaderboard entry", user_id));
        }
        info!(user.id = %user_id, "User opted out of leaderboard");
        Ok(())
    }

    /// Ranked public view. Rank = 1 + count of public entries with a strictly
    /// greater value; tied values share a rank under the stable sort order.
    pub async fn get_leaderboard(
        &self,
        period: LeaderboardPeriod,
        metric: LeaderboardMetric,
        limit: Option<i64>,
    ) -> Result<Vec<RankedEntry>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let column = stat_column(period, metric);
        let entries = self.database.list_public_by_stat(column, limit).await?;

        let mut ranked = Vec::with_capacity(entries.len());
        let mut prev_value: Option<i64> = None;
        let mut prev_rank = 0i64;
        for (idx, entry) in entries.into_iter().enumerate() {
            let value = stat_value(&entry, period, metric);
            let rank = match prev_value {
                Some(prev) if prev == value => prev_rank,
                _ => idx as i64 + 1,
            };
            prev_value = Some(value);
            prev_rank = rank;
            ranked.push(RankedEntry { rank, entry });
        }
        Ok(ranked)
    }

    /// Rank for a single user without materializing the full sorted list
    pub async fn get_user_rank(
        &self,
        user_id: Uuid,
        period: LeaderboardPeriod,
        metric: LeaderboardMetric,
    ) -> EngineResult<i64> {
        let entry = self
            .database
            .get_entry(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("leaderboard entry", user_id))?;

        let column = stat_column(period, metric);
        let greater = self
            .database
            .count_public_greater(column, stat_value(&entry, period, metric))
            .await?;
        Ok(greater + 1)
    }
}
