// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Badge Engine
//!
//! Evaluates catalog unlock requirements against a user's current stats and
//! grants each badge at most once. The `UNIQUE(user_id, badge_code)`
//! constraint is the source of truth for at-most-once granting, not a prior
//! existence check, so concurrent or repeated evaluations cannot double-grant.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::activity::ActivityLog;
use crate::database::Database;
use crate::models::{Badge, RequirementKind, Visibility};
use crate::notifications::{Dispatcher, NotificationPayload};
use crate::scoring;

/// Stats a badge requirement is evaluated against
#[derive(Debug, Clone, Default)]
pub struct BadgeStats {
    pub current_streak: i64,
    pub total_sessions: i64,
    pub challenges_won: i64,
    /// Current public leaderboard rank by XP, when visible
    pub leaderboard_rank: Option<i64>,
}

/// Whether `stats` satisfy one catalog requirement
pub fn requirement_met(badge: &Badge, stats: &BadgeStats) -> bool {
    match badge.requirement_kind {
        RequirementKind::Streak => stats.current_streak >= badge.threshold,
        RequirementKind::Sessions => stats.total_sessions >= badge.threshold,
        RequirementKind::ChallengesWon => stats.challenges_won >= badge.threshold,
        // Rank requirements invert: rank 1 is best, so "top N" means rank <= N.
        RequirementKind::TopRank => match stats.leaderboard_rank {
            Some(rank) => rank <= badge.threshold,
            None => false,
        },
        RequirementKind::Special => stats.total_sessions >= badge.threshold,
    }
}

/// The immutable default catalog, seeded once at startup
pub fn default_catalog() -> Vec<Badge> {
    fn badge(
        code: &str,
        name: &str,
        description: &str,
        category: &str,
        rarity: &str,
        kind: RequirementKind,
        threshold: i64,
        xp_reward: i64,
    ) -> Badge {
        Badge {
            code: code.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            rarity: rarity.to_string(),
            requirement_kind: kind,
            threshold,
            xp_reward,
        }
    }

    vec![
        badge("first_session", "First Steps", "Finish your first session", "special", "common", RequirementKind::Special, 1, 50),
        badge("streak_3", "Warming Up", "Train 3 days in a row", "streak", "common", RequirementKind::Streak, 3, 100),
        badge("streak_7", "One Week Strong", "Train 7 days in a row", "streak", "uncommon", RequirementKind::Streak, 7, 250),
        badge("streak_30", "Iron Month", "Train 30 days in a row", "streak", "rare", RequirementKind::Streak, 30, 1000),
        badge("streak_100", "Unbreakable", "Train 100 days in a row", "streak", "legendary", RequirementKind::Streak, 100, 5000),
        badge("sessions_10", "Getting Going", "Finish 10 sessions", "sessions", "common", RequirementKind::Sessions, 10, 100),
        badge("sessions_50", "Regular", "Finish 50 sessions", "sessions", "uncommon", RequirementKind::Sessions, 50, 300),
        badge("sessions_100", "Centurion", "Finish 100 sessions", "sessions", "rare", RequirementKind::Sessions, 100, 750),
        badge("sessions_365", "Year of Sweat", "Finish 365 sessions", "sessions", "legendary", RequirementKind::Sessions, 365, 3000),
        badge("challenger_1", "First Blood", "Win your first challenge", "challenges", "common", RequirementKind::ChallengesWon, 1, 150),
        badge("challenger_10", "Gladiator", "Win 10 challenges", "challenges", "rare", RequirementKind::ChallengesWon, 10, 1000),
        badge("challenger_25", "Champion", "Win 25 challenges", "challenges", "epic", RequirementKind::ChallengesWon, 25, 2500),
        badge("podium_3", "On the Podium", "Reach the leaderboard top 3", "rank", "epic", RequirementKind::TopRank, 3, 1500),
    ]
}

/// Evaluates and grants badges; idempotent per (user, badge)
#[derive(Clone)]
pub struct BadgeEngine {
    database: Database,
    activity_log: Arc<dyn ActivityLog>,
    dispatcher: Dispatcher,
}

impl BadgeEngine {
    pub fn new(database: Database, activity_log: Arc<dyn ActivityLog>, dispatcher: Dispatcher) -> Self {
        Self {
            database,
            activity_log,
            dispatcher,
        }
    }

    /// Assemble the stats a user's badge requirements are checked against
    async fn collect_stats(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<BadgeStats> {
        let sessions = self.activity_log.list_finished_sessions(user_id, None).await?;
        let challenges_won = self.database.count_challenge_wins(user_id).await?;

        let leaderboard_rank = match self.database.get_entry(user_id).await? {
            Some(entry) if entry.visibility == Visibility::Public => {
                let greater = self.database.count_public_greater("xp", entry.xp).await?;
                Some(greater + 1)
            }
            _ => None,
        };

        Ok(BadgeStats {
            current_streak: scoring::current_streak(
                &scoring::active_days(&sessions),
                now.date_naive(),
            ),
            total_sessions: sessions.len() as i64,
            challenges_won,
            leaderboard_rank,
        })
    }

    /// Evaluate every catalog badge and grant the newly satisfied ones.
    ///
    /// Running this twice with unchanged stats performs zero additional
    /// grants: the insert-if-absent either claims the (user, badge) pair or
    /// sees it already claimed.
    pub async fn check_and_award(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Badge>> {
        let stats = self.collect_stats(user_id, now).await?;
        let catalog = self.database.list_badges().await?;

        let display_name = self
            .database
            .get_entry(user_id)
            .await?
            .map(|e| e.display_name)
            .unwrap_or_default();

        let mut granted = Vec::new();
        for badge in catalog {
            if !requirement_met(&badge, &stats) {
                continue;
            }
            if !self.database.try_grant_badge(user_id, &badge.code, now).await? {
                continue;
            }

            self.database
                .credit_xp(user_id, &display_name, badge.xp_reward, now)
                .await?;
            info!(
                user.id = %user_id,
                badge.code = %badge.code,
                badge.xp = badge.xp_reward,
                "Badge unlocked"
            );

            self.dispatcher
                .dispatch(
                    NotificationPayload::new(
                        user_id,
                        "Badge unlocked!",
                        format!("You earned \"{}\" (+{} XP)", badge.name, badge.xp_reward),
                        "badge_unlocked",
                    ),
                )
                .await;

            granted.push(badge);
        }

        Ok(granted)
    }
}
