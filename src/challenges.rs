// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Challenge State Machine
//!
//! Owns the lifecycle of pairwise timed competitions:
//! `pending -> {active, declined, cancelled}`, `active -> completed`.
//!
//! Progress is the delta since challenge start, not the raw lifetime score,
//! so long-lived users don't win purely on tenure. Completion compares final
//! scores strictly; equal scores are a draw. All state transitions are
//! conditional updates, so an overlapping periodic pass settles each
//! challenge at most once.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::activity::ActivityLog;
use crate::badges::BadgeEngine;
use crate::constants::{challenge as limits, xp as xp_awards};
use crate::database::{ChallengeRecord, Database};
use crate::errors::{EngineError, EngineResult};
use crate::models::{Challenge, ChallengeStatus, ChallengeType};
use crate::notifications::{Dispatcher, NotificationPayload};
use crate::scoring;

/// Drives challenge lifecycle transitions and periodic evaluation
#[derive(Clone)]
pub struct ChallengeEngine {
    database: Database,
    activity_log: Arc<dyn ActivityLog>,
    dispatcher: Dispatcher,
    badges: BadgeEngine,
}

impl ChallengeEngine {
    pub fn new(
        database: Database,
        activity_log: Arc<dyn ActivityLog>,
        dispatcher: Dispatcher,
        badges: BadgeEngine,
    ) -> Self {
        Self {
            database,
            activity_log,
            dispatcher,
            badges,
        }
    }

    /// Score one participant for this challenge's metric since `since`
    async fn score(
        &self,
        user_id: Uuid,
        metric: ChallengeType,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        // Streak ignores the window, so always fetch the full history.
        let mut sessions = self.activity_log.list_finished_sessions(user_id, None).await?;
        sessions.retain(|s| s.date <= now);
        Ok(scoring::score(&sessions, metric, since, now))
    }

    /// Display name and avatar snapshot for one participant, as of now
    async fn participant_snapshot(&self, user_id: Uuid) -> Result<(String, Option<String>)> {
        match self.database.get_entry(user_id).await? {
            Some(entry) => Ok((entry.display_name, entry.avatar_ref)),
            None => Ok(("Unknown".to_string(), None)),
        }
    }

    /// Issue a new challenge (status = pending) and notify the challenged user
    pub async fn create(
        &self,
        challenger_id: Uuid,
        challenged_id: Uuid,
        challenge_type: ChallengeType,
        duration_days: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<Challenge> {
        if challenger_id == challenged_id {
            return Err(EngineError::validation("cannot challenge yourself"));
        }
        if !limits::ALLOWED_DURATIONS.contains(&duration_days) {
            return Err(EngineError::validation(
                "challenge duration must be 3, 7 or 14 days",
            ));
        }

        let (challenger_name, challenger_avatar) =
            self.participant_snapshot(challenger_id).await?;
        let (challenged_name, challenged_avatar) =
            self.participant_snapshot(challenged_id).await?;

        let challenge = Challenge {
            id: Uuid::new_v4(),
            challenger_id,
            challenged_id,
            challenger_name,
            challenger_avatar,
            challenged_name: challenged_name.clone(),
            challenged_avatar,
            challenge_type,
            duration_days,
            status: ChallengeStatus::Pending,
            created_at: now,
            start_date: None,
            end_date: None,
            challenger_score: 0,
            challenged_score: 0,
            challenger_start_score: 0,
            challenged_start_score: 0,
            winner_id: None,
            last_notification_at: None,
            notifications_sent: 0,
        };

        // The partial unique index rejects a duplicate pending/active pair
        // in either direction.
        self.database.insert_challenge(&challenge).await?;
        info!(
            challenge.id = %challenge.id,
            challenger.id = %challenger_id,
            challenged.id = %challenged_id,
            challenge.kind = challenge_type.as_str(),
            "Challenge created"
        );

        self.dispatcher
            .dispatch(
                NotificationPayload::new(
                    challenged_id,
                    "New challenge!",
                    format!(
                        "{} challenged you: {} for {} days",
                        challenge.challenger_name,
                        challenge_type.as_str(),
                        duration_days
                    ),
                    "challenge_invite",
                )
                .with_target(challenge.id),
            )
            .await;

        Ok(challenge)
    }

    /// Accept a pending challenge. Only the challenged party may accept.
    ///
    /// Baselines for both participants are captured at this instant so that
    /// progress is measured as delta since start.
    pub async fn accept(
        &self,
        id: Uuid,
        acting_user: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<Challenge> {
        let challenge = self.get(id).await?;
        if challenge.challenged_id != acting_user {
            return Err(EngineError::unauthorized(
                "only the challenged user may accept",
            ));
        }
        if challenge.status != ChallengeStatus::Pending {
            return Err(EngineError::validation("challenge is not pending"));
        }

        let start_date = now;
        let end_date = start_date + Duration::days(challenge.duration_days);
        let challenger_start = self
            .score(challenge.challenger_id, challenge.challenge_type, start_date, now)
            .await?;
        let challenged_start = self
            .score(challenge.challenged_id, challenge.challenge_type, start_date, now)
            .await?;

        let accepted = self
            .database
            .mark_challenge_accepted(id, start_date, end_date, challenger_start, challenged_start)
            .await?;
        if !accepted {
            // Lost a race with a decline/cancel/timeout.
            return Err(EngineError::validation("challenge is not pending"));
        }

        info!(challenge.id = %id, "Challenge accepted");
        self.dispatcher
            .dispatch(
                NotificationPayload::new(
                    challenge.challenger_id,
                    "Challenge accepted!",
                    format!("{} accepted your challenge. Game on!", challenge.challenged_name),
                    "challenge_accepted",
                )
                .with_target(id),
            )
            .await;

        self.get(id).await
    }

    /// Decline a pending challenge (challenged party only)
    pub async fn decline(&self, id: Uuid, acting_user: Uuid) -> EngineResult<()> {
        let challenge = self.get(id).await?;
        if challenge.challenged_id != acting_user {
            return Err(EngineError::unauthorized(
                "only the challenged user may decline",
            ));
        }
        self.terminate_pending(id, ChallengeStatus::Declined).await
    }

    /// Cancel a pending challenge (challenger only)
    pub async fn cancel(&self, id: Uuid, acting_user: Uuid) -> EngineResult<()> {
        let challenge = self.get(id).await?;
        if challenge.challenger_id != acting_user {
            return Err(EngineError::unauthorized(
                "only the challenger may cancel",
            ));
        }
        self.terminate_pending(id, ChallengeStatus::Cancelled).await
    }

    async fn terminate_pending(&self, id: Uuid, status: ChallengeStatus) -> EngineResult<()> {
        let updated = self.database.mark_challenge_terminal(id, status).await?;
        if !updated {
            return Err(EngineError::validation("challenge is not pending"));
        }
        info!(challenge.id = %id, status = status.as_str(), "Challenge closed");
        Ok(())
    }

    /// Get a challenge by id
    pub async fn get(&self, id: Uuid) -> EngineResult<Challenge> {
        self.database
            .get_challenge(id)
            .await?
            .ok_or_else(|| EngineError::not_found("challenge", id))
    }

    /// Get a challenge, enforcing that the viewer takes part in it
    pub async fn get_for_user(&self, id: Uuid, user_id: Uuid) -> EngineResult<Challenge> {
        let challenge = self.get(id).await?;
        if !challenge.involves(user_id) {
            return Err(EngineError::unauthorized(
                "challenge is only visible to its participants",
            ));
        }
        Ok(challenge)
    }

    /// All challenges the user takes part in, most recent first
    pub async fn list_for_user(&self, user_id: Uuid) -> EngineResult<Vec<Challenge>> {
        Ok(self.database.list_challenges_for_user(user_id).await?)
    }

    /// Win/loss/draw/active aggregate for one user
    pub async fn stats_for_user(&self, user_id: Uuid) -> EngineResult<ChallengeRecord> {
        Ok(self.database.challenge_record(user_id).await?)
    }

    /// Current progress for both participants: delta since challenge start
    async fn compute_progress(
        &self,
        challenge: &Challenge,
        start_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(i64, i64)> {
        let challenger_raw = self
            .score(challenge.challenger_id, challenge.challenge_type, start_date, now)
            .await?;
        let challenged_raw = self
            .score(challenge.challenged_id, challenge.challenge_type, start_date, now)
            .await?;
        Ok((
            (challenger_raw - challenge.challenger_start_score).max(0),
            (challenged_raw - challenge.challenged_start_score).max(0),
        ))
    }

    /// One unified periodic pass: refresh progress and reminders on active
    /// challenges, settle those past their end date, and sweep stale pending
    /// ones. Each challenge is fault-isolated; one failure never aborts the
    /// batch.
    pub async fn periodic_pass(&self, now: DateTime<Utc>) {
        match self.database.list_challenges_by_status(ChallengeStatus::Pending).await {
            Ok(pending) => {
                for challenge in pending {
                    if let Err(err) = self.sweep_pending(&challenge, now).await {
                        error!(challenge.id = %challenge.id, error = %err, "Pending sweep failed");
                    }
                }
            }
            Err(err) => error!(error = %err, "Failed to list pending challenges"),
        }

        match self.database.list_challenges_by_status(ChallengeStatus::Active).await {
            Ok(active) => {
                for challenge in active {
                    if let Err(err) = self.tick_active(&challenge, now).await {
                        error!(challenge.id = %challenge.id, error = %err, "Challenge tick failed");
                    }
                }
            }
            Err(err) => error!(error = %err, "Failed to list active challenges"),
        }
    }

    /// Cancel a pending challenge past the 48-hour acceptance window.
    /// Idempotent: an already-cancelled row is left untouched.
    async fn sweep_pending(&self, challenge: &Challenge, now: DateTime<Utc>) -> Result<()> {
        let age = now - challenge.created_at;
        if age < Duration::hours(limits::PENDING_TIMEOUT_HOURS) {
            return Ok(());
        }
        let swept = self
            .database
            .mark_challenge_terminal(challenge.id, ChallengeStatus::Cancelled)
            .await?;
        if swept {
            info!(challenge.id = %challenge.id, "Pending challenge timed out");
        }
        Ok(())
    }

    /// Progress refresh, completion check, and reminder throttling for one
    /// active challenge
    async fn tick_active(&self, challenge: &Challenge, now: DateTime<Utc>) -> Result<()> {
        let (start_date, end_date) = match (challenge.start_date, challenge.end_date) {
            (Some(s), Some(e)) => (s, e),
            _ => anyhow::bail!("active challenge without a window"),
        };

        // Scores never include sessions logged after the end date, even when
        // the settling pass runs hours later.
        let as_of = now.min(end_date);
        let (challenger_score, challenged_score) =
            self.compute_progress(challenge, start_date, as_of).await?;

        if now >= end_date {
            self.complete(challenge, challenger_score, challenged_score, now)
                .await?;
            return Ok(());
        }

        self.database
            .update_challenge_scores(challenge.id, challenger_score, challenged_score)
            .await?;

        self.send_reminders(challenge, challenger_score, challenged_score, end_date, now)
            .await?;
        Ok(())
    }

    /// Settle a challenge whose end date has passed: strictly greater score
    /// wins, equal scores draw. XP and badge evaluation follow for both
    /// participants.
    async fn complete(
        &self,
        challenge: &Challenge,
        challenger_score: i64,
        challenged_score: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let winner_id = if challenger_score > challenged_score {
            Some(challenge.challenger_id)
        } else if challenged_score > challenger_score {
            Some(challenge.challenged_id)
        } else {
            None
        };

        let settled = self
            .database
            .mark_challenge_completed(challenge.id, challenger_score, challenged_score, winner_id)
            .await?;
        if !settled {
            // Another pass already settled it; XP was granted there.
            return Ok(());
        }

        match winner_id {
            Some(winner) => {
                let loser = challenge.opponent_of(winner);
                let (winner_name, loser_name) = if winner == challenge.challenger_id {
                    (&challenge.challenger_name, &challenge.challenged_name)
                } else {
                    (&challenge.challenged_name, &challenge.challenger_name)
                };

                self.database
                    .credit_xp(winner, winner_name, xp_awards::CHALLENGE_WIN, now)
                    .await?;
                self.database
                    .credit_xp(loser, loser_name, xp_awards::CHALLENGE_LOSS, now)
                    .await?;

                info!(
                    challenge.id = %challenge.id,
                    winner.id = %winner,
                    score = format!("{challenger_score}-{challenged_score}"),
                    "Challenge completed"
                );

                self.dispatcher
                    .dispatch(
                        NotificationPayload::new(
                            winner,
                            "You won!",
                            format!("You beat {loser_name} (+{} XP)", xp_awards::CHALLENGE_WIN),
                            "challenge_won",
                        )
                        .with_target(challenge.id),
                    )
                    .await;
                self.dispatcher
                    .dispatch(
                        NotificationPayload::new(
                            loser,
                            "Challenge over",
                            format!(
                                "{winner_name} took this one (+{} XP for competing)",
                                xp_awards::CHALLENGE_LOSS
                            ),
                            "challenge_lost",
                        )
                        .with_target(challenge.id),
                    )
                    .await;
            }
            None => {
                for (user, name) in [
                    (challenge.challenger_id, &challenge.challenger_name),
                    (challenge.challenged_id, &challenge.challenged_name),
                ] {
                    self.database
                        .credit_xp(user, name, xp_awards::CHALLENGE_DRAW, now)
                        .await?;
                    self.dispatcher
                        .dispatch(
                            NotificationPayload::new(
                                user,
                                "It's a draw!",
                                format!(
                                    "Dead even at {challenger_score}. Both get +{} XP",
                                    xp_awards::CHALLENGE_DRAW
                                ),
                                "challenge_draw",
                            )
                            .with_target(challenge.id),
                        )
                        .await;
                }
                info!(challenge.id = %challenge.id, "Challenge completed as a draw");
            }
        }

        // Challenge wins may unlock badges for either side.
        for user in [challenge.challenger_id, challenge.challenged_id] {
            if let Err(err) = self.badges.check_and_award(user, now).await {
                error!(user.id = %user, error = %err, "Badge evaluation after challenge failed");
            }
        }

        Ok(())
    }

    /// Reminder throttling on an active challenge.
    ///
    /// Gap nudge: when the score gap reaches the threshold and the cooldown
    /// since the last notification has passed, nudge only the trailing
    /// participant. Endgame: when the challenge ends within 24 hours and
    /// fewer than the reminder cap have been sent, remind both.
    async fn send_reminders(
        &self,
        challenge: &Challenge,
        challenger_score: i64,
        challenged_score: i64,
        end_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let gap = (challenger_score - challenged_score).abs();
        let cooled_down = match challenge.last_notification_at {
            Some(last) => now - last >= Duration::hours(limits::NUDGE_COOLDOWN_HOURS),
            None => true,
        };

        if gap >= limits::NUDGE_GAP && cooled_down {
            let (trailing, leader_name) = if challenger_score < challenged_score {
                (challenge.challenger_id, &challenge.challenged_name)
            } else {
                (challenge.challenged_id, &challenge.challenger_name)
            };

            self.dispatcher
                .dispatch(
                    NotificationPayload::new(
                        trailing,
                        "You're falling behind!",
                        format!("{leader_name} leads by {gap}. Time to move!"),
                        "challenge_nudge",
                    )
                    .with_target(challenge.id),
                )
                .await;
            self.database
                .stamp_challenge_notification(challenge.id, now)
                .await?;
        }

        let ends_soon = end_date - now <= Duration::hours(limits::ENDGAME_WINDOW_HOURS);
        if ends_soon && challenge.notifications_sent < limits::MAX_REMINDERS {
            for user in [challenge.challenger_id, challenge.challenged_id] {
                self.dispatcher
                    .dispatch(
                        NotificationPayload::new(
                            user,
                            "Final stretch!",
                            format!(
                                "Challenge ends soon. Score: {challenger_score}-{challenged_score}"
                            ),
                            "challenge_ending",
                        )
                        .with_target(challenge.id),
                    )
                    .await;
            }
            // The cooldown only throttles gap nudges, so the endgame path
            // counts toward the cap without stamping it.
            self.database
                .increment_challenge_reminders(challenge.id)
                .await?;
        }

        Ok(())
    }
}
