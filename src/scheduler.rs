// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Batch orchestrator
//!
//! Owns the recurring passes: leaderboard refresh, the unified challenge
//! tick, notification rules, and XP premium expiry. Every pass is a plain
//! async method taking a `now`, so tests invoke them directly with pinned
//! clocks. `run` wires them to wall-clock intervals for the daemon.
//!
//! Fault isolation is per entity: one broken user or challenge is logged
//! with its id and never aborts the rest of the batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::activity::ActivityLog;
use crate::challenges::ChallengeEngine;
use crate::constants::notifications as rules;
use crate::database::Database;
use crate::leaderboard::LeaderboardManager;
use crate::models::LeaderboardEntry;
use crate::notifications::{Dispatcher, NotificationPayload};
use crate::scoring;
use crate::xp::XpManager;

/// Interval lengths for the daemon loop
#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub challenge_pass_hours: u64,
    pub daily_pass_hours: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            challenge_pass_hours: 6,
            daily_pass_hours: 24,
        }
    }
}

/// Runs the periodic passes over all users and challenges
#[derive(Clone)]
pub struct Orchestrator {
    database: Database,
    activity_log: Arc<dyn ActivityLog>,
    leaderboard: LeaderboardManager,
    challenges: ChallengeEngine,
    xp: XpManager,
    dispatcher: Dispatcher,
}

impl Orchestrator {
    pub fn new(
        database: Database,
        activity_log: Arc<dyn ActivityLog>,
        leaderboard: LeaderboardManager,
        challenges: ChallengeEngine,
        xp: XpManager,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            database,
            activity_log,
            leaderboard,
            challenges,
            xp,
            dispatcher,
        }
    }

    /// Recompute every known entry's stats snapshot from the activity log
    pub async fn refresh_all_leaderboards(&self, now: DateTime<Utc>) {
        let entries = match self.database.list_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                error!(error = %err, "Failed to list leaderboard entries");
                return;
            }
        };

        let total = entries.len();
        let mut failed = 0usize;
        for entry in entries {
            let result = self
                .leaderboard
                .refresh(
                    entry.user_id,
                    &entry.display_name,
                    entry.avatar_ref.as_deref(),
                    now,
                )
                .await;
            if let Err(err) = result {
                failed += 1;
                error!(user.id = %entry.user_id, error = %err, "Leaderboard refresh failed");
            }
        }
        info!(total, failed, "Leaderboard refresh pass done");
    }

    /// Progress, completion, reminders, and pending timeouts for challenges
    pub async fn challenge_pass(&self, now: DateTime<Utc>) {
        self.challenges.periodic_pass(now).await;
    }

    /// Daily per-user notification rules, each gated by that user's opt-ins
    pub async fn notification_pass(&self, now: DateTime<Utc>) {
        let entries = match self.database.list_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                error!(error = %err, "Failed to list entries for notification pass");
                return;
            }
        };

        for entry in entries {
            if let Err(err) = self.notify_one(&entry, now).await {
                error!(user.id = %entry.user_id, error = %err, "Notification rules failed");
            }
        }
    }

    async fn notify_one(&self, entry: &LeaderboardEntry, now: DateTime<Utc>) -> anyhow::Result<()> {
        let prefs = self.database.get_notification_prefs(entry.user_id).await?;
        if !prefs.daily_motivation && !prefs.streak_risk && !prefs.inactivity {
            return Ok(());
        }

        let sessions = self
            .activity_log
            .list_finished_sessions(entry.user_id, None)
            .await?;
        let days = scoring::active_days(&sessions);
        let today = now.date_naive();
        let trained_today = days.contains(&today);
        let last_active = days.iter().next_back().copied();

        let streak = scoring::current_streak(&days, today);
        if prefs.streak_risk && streak > 0 && !trained_today {
            self.dispatcher
                .dispatch(NotificationPayload::new(
                    entry.user_id,
                    "Streak at risk!",
                    format!("Your {streak}-day streak ends tonight. One session saves it."),
                    "streak_risk",
                ))
                .await;
            return Ok(());
        }

        let idle_days = match last_active {
            Some(last) => (today - last).num_days(),
            None => i64::MAX,
        };
        if prefs.inactivity && last_active.is_some() && idle_days >= rules::INACTIVITY_DAYS {
            self.dispatcher
                .dispatch(NotificationPayload::new(
                    entry.user_id,
                    "We miss you!",
                    format!("It's been {idle_days} days since your last session."),
                    "inactivity",
                ))
                .await;
            return Ok(());
        }

        if prefs.daily_motivation && trained_today {
            self.dispatcher
                .dispatch(NotificationPayload::new(
                    entry.user_id,
                    "Keep it up!",
                    match streak {
                        0 | 1 => "Great session today. Come back tomorrow!".to_string(),
                        n => format!("Session done and your streak is at {n} days. Keep rolling!"),
                    },
                    "daily_motivation",
                ))
                .await;
        }
        Ok(())
    }

    /// Expire lapsed XP-funded premium windows
    pub async fn xp_expiry_pass(&self, now: DateTime<Utc>) {
        self.xp.expiry_sweep(now).await;
    }

    /// Daemon loop: challenge pass every few hours, the daily passes on their
    /// own cadence. Runs until the task is dropped.
    pub async fn run(self, config: ScheduleConfig) {
        info!(
            challenge_hours = config.challenge_pass_hours,
            daily_hours = config.daily_pass_hours,
            "Orchestrator started"
        );

        let mut challenge_tick =
            interval(std::time::Duration::from_secs(config.challenge_pass_hours * 3600));
        let mut daily_tick =
            interval(std::time::Duration::from_secs(config.daily_pass_hours * 3600));
        challenge_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        daily_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = challenge_tick.tick() => {
                    let now = Utc::now();
                    self.challenge_pass(now).await;
                }
                _ = daily_tick.tick() => {
                    let now = Utc::now();
                    self.refresh_all_leaderboards(now).await;
                    self.notification_pass(now).await;
                    self.xp_expiry_pass(now).await;
                }
            }
        }
    }
}
