// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Database Management
//!
//! SQLite storage layer for the gamification engine. All mutations that back
//! an at-most-once guarantee go through conditional writes scoped by unique
//! keys: the `UNIQUE(user_id, badge_code)` constraint for badge grants, a
//! partial unique index on the unordered challenge pair for duplicate
//! challenges, and a balance-guarded debit inside one transaction for XP
//! redemptions.

use crate::errors::{EngineError, EngineResult};
use crate::models::{
    Badge, Challenge, ChallengeStatus, ChallengeType, LeaderboardEntry, League,
    NotificationPrefs, RedemptionStatus, RequirementKind, SessionRecord, StatsSnapshot,
    SubscriptionKind, UserBadge, Visibility, XpRedemption,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use uuid::Uuid;

/// Aggregate win/loss record for one user, derived from completed challenges
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChallengeRecord {
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
    pub active: i64,
}

/// Database manager for engine state
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection and run migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        // Ensure SQLite creates the database file if it doesn't exist
        let connection_options = if database_url.starts_with("sqlite:") {
            format!("{database_url}?mode=rwc")
        } else {
            database_url.to_string()
        };

        let pool = SqlitePool::connect(&connection_options).await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL,
                calories INTEGER NOT NULL,
                category TEXT NOT NULL,
                finished BOOLEAN NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, date)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leaderboard_entries (
                user_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                avatar_ref TEXT,
                visibility TEXT NOT NULL DEFAULT 'private',
                xp INTEGER NOT NULL DEFAULT 0,
                league TEXT NOT NULL DEFAULT 'bronze',
                total_sessions INTEGER NOT NULL DEFAULT 0,
                total_calories INTEGER NOT NULL DEFAULT 0,
                total_duration_min INTEGER NOT NULL DEFAULT 0,
                current_streak INTEGER NOT NULL DEFAULT 0,
                week_sessions INTEGER NOT NULL DEFAULT 0,
                month_sessions INTEGER NOT NULL DEFAULT 0,
                strength_sessions INTEGER NOT NULL DEFAULT 0,
                strength_week INTEGER NOT NULL DEFAULT 0,
                strength_month INTEGER NOT NULL DEFAULT 0,
                cardio_sessions INTEGER NOT NULL DEFAULT 0,
                cardio_week INTEGER NOT NULL DEFAULT 0,
                cardio_month INTEGER NOT NULL DEFAULT 0,
                bodyweight_sessions INTEGER NOT NULL DEFAULT 0,
                bodyweight_week INTEGER NOT NULL DEFAULT 0,
                bodyweight_month INTEGER NOT NULL DEFAULT 0,
                xp_premium_until TEXT,
                premium_via_xp BOOLEAN NOT NULL DEFAULT 0,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS challenges (
                id TEXT PRIMARY KEY,
                challenger_id TEXT NOT NULL,
                challenged_id TEXT NOT NULL,
                challenger_name TEXT NOT NULL,
                challenger_avatar TEXT,
                challenged_name TEXT NOT NULL,
                challenged_avatar TEXT,
                challenge_type TEXT NOT NULL,
                duration_days INTEGER NOT NULL,
                status TEXT NOT NULL,
                pair_key TEXT NOT NULL,
                created_at TEXT NOT NULL,
                start_date TEXT,
                end_date TEXT,
                challenger_score INTEGER NOT NULL DEFAULT 0,
                challenged_score INTEGER NOT NULL DEFAULT 0,
                challenger_start_score INTEGER NOT NULL DEFAULT 0,
                challenged_start_score INTEGER NOT NULL DEFAULT 0,
                winner_id TEXT,
                last_notification_at TEXT,
                notifications_sent INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // The source of truth for "at most one pending/active challenge per
        // unordered pair": completed/declined/cancelled rows fall out of the
        // partial index, so the pair becomes available again.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_challenges_open_pair
            ON challenges(pair_key) WHERE status IN ('pending', 'active')
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_challenges_status ON challenges(status)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS badges (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                category TEXT NOT NULL,
                rarity TEXT NOT NULL,
                requirement_kind TEXT NOT NULL,
                threshold INTEGER NOT NULL,
                xp_reward INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // UNIQUE(user_id, badge_code) is the source of truth for at-most-once
        // badge granting.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_badges (
                user_id TEXT NOT NULL,
                badge_code TEXT NOT NULL,
                unlocked_at TEXT NOT NULL,
                displayed BOOLEAN NOT NULL DEFAULT 0,
                UNIQUE(user_id, badge_code)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS xp_redemptions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                xp_spent INTEGER NOT NULL,
                months_redeemed INTEGER NOT NULL,
                xp_balance_before INTEGER NOT NULL,
                xp_balance_after INTEGER NOT NULL,
                subscription_kind TEXT NOT NULL,
                valid_from TEXT NOT NULL,
                valid_until TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_redemptions_user ON xp_redemptions(user_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notification_prefs (
                user_id TEXT PRIMARY KEY,
                daily_motivation BOOLEAN NOT NULL DEFAULT 1,
                streak_risk BOOLEAN NOT NULL DEFAULT 1,
                inactivity BOOLEAN NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ----- activity sessions -----

    /// Record a finished session (used by the host system and tests)
    pub async fn insert_session(&self, user_id: Uuid, session: &SessionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, date, duration_minutes, calories, category, finished)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id.to_string())
        .bind(session.date.to_rfc3339())
        .bind(session.duration_minutes)
        .bind(session.calories)
        .bind(session.category.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List finished sessions for a user, optionally bounded below by `since`
    pub async fn finished_sessions(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionRecord>> {
        let rows = match since {
            Some(since) => {
                sqlx::query(
                    r#"
                    SELECT date, duration_minutes, calories, category FROM sessions
                    WHERE user_id = ?1 AND finished = 1 AND date >= ?2
                    ORDER BY date ASC
                    "#,
                )
                .bind(user_id.to_string())
                .bind(since.to_rfc3339())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT date, duration_minutes, calories, category FROM sessions
                    WHERE user_id = ?1 AND finished = 1
                    ORDER BY date ASC
                    "#,
                )
                .bind(user_id.to_string())
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let date_str: String = row.try_get("date")?;
            sessions.push(SessionRecord {
                date: DateTime::parse_from_rfc3339(&date_str)?.with_timezone(&Utc),
                duration_minutes: row.try_get("duration_minutes")?,
                calories: row.try_get("calories")?,
                category: crate::models::SessionCategory::from_str(row.try_get("category")?),
            });
        }
        Ok(sessions)
    }

    // ----- leaderboard entries -----

    /// Upsert the stats snapshot for a user, preserving visibility, XP, and
    /// premium fields on existing rows
    pub async fn upsert_entry_stats(
        &self,
        user_id: Uuid,
        display_name: &str,
        avatar_ref: Option<&str>,
        stats: &StatsSnapshot,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leaderboard_entries (
                user_id, display_name, avatar_ref, visibility, xp, league,
                total_sessions, total_calories, total_duration_min, current_streak,
                week_sessions, month_sessions,
                strength_sessions, strength_week, strength_month,
                cardio_sessions, cardio_week, cardio_month,
                bodyweight_sessions, bodyweight_week, bodyweight_month,
                last_updated
            )
            VALUES (?1, ?2, ?3, 'private', 0, 'bronze',
                    ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            ON CONFLICT(user_id) DO UPDATE SET
                display_name = excluded.display_name,
                avatar_ref = excluded.avatar_ref,
                total_sessions = excluded.total_sessions,
                total_calories = excluded.total_calories,
                total_duration_min = excluded.total_duration_min,
                current_streak = excluded.current_streak,
                week_sessions = excluded.week_sessions,
                month_sessions = excluded.month_sessions,
                strength_sessions = excluded.strength_sessions,
                strength_week = excluded.strength_week,
                strength_month = excluded.strength_month,
                cardio_sessions = excluded.cardio_sessions,
                cardio_week = excluded.cardio_week,
                cardio_month = excluded.cardio_month,
                bodyweight_sessions = excluded.bodyweight_sessions,
                bodyweight_week = excluded.bodyweight_week,
                bodyweight_month = excluded.bodyweight_month,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(user_id.to_string())
        .bind(display_name)
        .bind(avatar_ref)
        .bind(stats.total_sessions)
        .bind(stats.total_calories_burned)
        .bind(stats.total_duration_min)
        .bind(stats.current_streak)
        .bind(stats.this_week_sessions)
        .bind(stats.this_month_sessions)
        .bind(stats.strength_sessions)
        .bind(stats.strength_week)
        .bind(stats.strength_month)
        .bind(stats.cardio_sessions)
        .bind(stats.cardio_week)
        .bind(stats.cardio_month)
        .bind(stats.bodyweight_sessions)
        .bind(stats.bodyweight_week)
        .bind(stats.bodyweight_month)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flip the visibility flag; stats are kept either way
    pub async fn set_visibility(
        &self,
        user_id: Uuid,
        visibility: Visibility,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE leaderboard_entries SET visibility = ?1, last_updated = ?2 WHERE user_id = ?3",
        )
        .bind(visibility.as_str())
        .bind(now.to_rfc3339())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Get one leaderboard entry by user id
    pub async fn get_entry(&self, user_id: Uuid) -> Result<Option<LeaderboardEntry>> {
        let row = sqlx::query("SELECT * FROM leaderboard_entries WHERE user_id = ?1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_entry(&row)?)),
            None => Ok(None),
        }
    }

    /// List every entry regardless of visibility (batch jobs)
    pub async fn list_entries(&self) -> Result<Vec<LeaderboardEntry>> {
        let rows = sqlx::query("SELECT * FROM leaderboard_entries")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Public entries sorted descending by one stat column
    pub async fn list_public_by_stat(
        &self,
        stat_column: &'static str,
        limit: i64,
    ) -> Result<Vec<LeaderboardEntry>> {
        // stat_column comes from a fixed mapping in leaderboard.rs, never
        // from caller input.
        let sql = format!(
            "SELECT * FROM leaderboard_entries WHERE visibility = 'public' \
             ORDER BY {stat_column} DESC LIMIT ?1"
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Count public entries with a strictly greater value in one stat column
    pub async fn count_public_greater(
        &self,
        stat_column: &'static str,
        value: i64,
    ) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM leaderboard_entries \
             WHERE visibility = 'public' AND {stat_column} > ?1"
        );
        let row = sqlx::query(&sql).bind(value).fetch_one(&self.pool).await?;
        Ok(row.try_get("n")?)
    }

    /// Credit XP to a user, creating a private entry if none exists, and
    /// recompute the league from the new balance
    pub async fn credit_xp(
        &self,
        user_id: Uuid,
        display_name: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO leaderboard_entries (user_id, display_name, visibility, xp, league, last_updated)
            VALUES (?1, ?2, 'private', 0, 'bronze', ?3)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user_id.to_string())
        .bind(display_name)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE leaderboard_entries SET xp = xp + ?1, last_updated = ?2 WHERE user_id = ?3")
            .bind(amount)
            .bind(now.to_rfc3339())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT xp FROM leaderboard_entries WHERE user_id = ?1")
            .bind(user_id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        let balance: i64 = row.try_get("xp")?;

        sqlx::query("UPDATE leaderboard_entries SET league = ?1 WHERE user_id = ?2")
            .bind(League::for_xp(balance).as_str())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(balance)
    }

    // ----- challenges -----

    /// Insert a new pending challenge
    ///
    /// A second pending/active challenge between the same unordered pair hits
    /// the partial unique index and is rejected as a validation error, in
    /// either direction.
    pub async fn insert_challenge(&self, challenge: &Challenge) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO challenges (
                id, challenger_id, challenged_id,
                challenger_name, challenger_avatar, challenged_name, challenged_avatar,
                challenge_type, duration_days, status, pair_key, created_at,
                challenger_score, challenged_score,
                challenger_start_score, challenged_start_score,
                notifications_sent
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, 0, 0, 0, 0)
            "#,
        )
        .bind(challenge.id.to_string())
        .bind(challenge.challenger_id.to_string())
        .bind(challenge.challenged_id.to_string())
        .bind(&challenge.challenger_name)
        .bind(&challenge.challenger_avatar)
        .bind(&challenge.challenged_name)
        .bind(&challenge.challenged_avatar)
        .bind(challenge.challenge_type.as_str())
        .bind(challenge.duration_days)
        .bind(challenge.status.as_str())
        .bind(pair_key(challenge.challenger_id, challenge.challenged_id))
        .bind(challenge.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(EngineError::validation(
                "an active or pending challenge already exists between these users",
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Get a challenge by id
    pub async fn get_challenge(&self, id: Uuid) -> Result<Option<Challenge>> {
        let row = sqlx::query("SELECT * FROM challenges WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_challenge(&row)?)),
            None => Ok(None),
        }
    }

    /// All challenges a user takes part in, most recent first
    pub async fn list_challenges_for_user(&self, user_id: Uuid) -> Result<Vec<Challenge>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM challenges
            WHERE challenger_id = ?1 OR challenged_id = ?1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_challenge).collect()
    }

    /// All challenges in one status
    pub async fn list_challenges_by_status(
        &self,
        status: ChallengeStatus,
    ) -> Result<Vec<Challenge>> {
        let rows = sqlx::query("SELECT * FROM challenges WHERE status = ?1")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_challenge).collect()
    }

    /// Transition pending -> active, capturing window and baselines.
    /// Conditional on the row still being pending.
    pub async fn mark_challenge_accepted(
        &self,
        id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        challenger_start_score: i64,
        challenged_start_score: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE challenges
            SET status = 'active', start_date = ?1, end_date = ?2,
                challenger_start_score = ?3, challenged_start_score = ?4,
                challenger_score = 0, challenged_score = 0
            WHERE id = ?5 AND status = 'pending'
            "#,
        )
        .bind(start_date.to_rfc3339())
        .bind(end_date.to_rfc3339())
        .bind(challenger_start_score)
        .bind(challenged_start_score)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition pending -> declined/cancelled. Conditional on pending.
    pub async fn mark_challenge_terminal(
        &self,
        id: Uuid,
        status: ChallengeStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE challenges SET status = ?1 WHERE id = ?2 AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Update both progress scores on an active challenge
    pub async fn update_challenge_scores(
        &self,
        id: Uuid,
        challenger_score: i64,
        challenged_score: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE challenges SET challenger_score = ?1, challenged_score = ?2
            WHERE id = ?3 AND status = 'active'
            "#,
        )
        .bind(challenger_score)
        .bind(challenged_score)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Transition active -> completed with the final result. Conditional on
    /// the row still being active so overlapping sweeps settle a challenge
    /// only once.
    pub async fn mark_challenge_completed(
        &self,
        id: Uuid,
        challenger_score: i64,
        challenged_score: i64,
        winner_id: Option<Uuid>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE challenges
            SET status = 'completed', challenger_score = ?1, challenged_score = ?2, winner_id = ?3
            WHERE id = ?4 AND status = 'active'
            "#,
        )
        .bind(challenger_score)
        .bind(challenged_score)
        .bind(winner_id.map(|id| id.to_string()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Stamp the reminder throttle state after a notification went out
    pub async fn stamp_challenge_notification(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE challenges
            SET last_notification_at = ?1, notifications_sent = notifications_sent + 1
            WHERE id = ?2
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count a reminder toward the per-challenge cap without touching the
    /// nudge cooldown
    pub async fn increment_challenge_reminders(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE challenges SET notifications_sent = notifications_sent + 1 WHERE id = ?1",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Completed-challenge wins for one user
    pub async fn count_challenge_wins(&self, user_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM challenges WHERE status = 'completed' AND winner_id = ?1",
        )
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    /// Win/loss/draw/active aggregate for one user
    pub async fn challenge_record(&self, user_id: Uuid) -> Result<ChallengeRecord> {
        let uid = user_id.to_string();
        let row = sqlx::query(
            r#"
            SELECT
                SUM(CASE WHEN status = 'completed' AND winner_id = ?1 THEN 1 ELSE 0 END) AS wins,
                SUM(CASE WHEN status = 'completed' AND winner_id IS NOT NULL AND winner_id != ?1
                    THEN 1 ELSE 0 END) AS losses,
                SUM(CASE WHEN status = 'completed' AND winner_id IS NULL THEN 1 ELSE 0 END) AS draws,
                SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END) AS active
            FROM challenges
            WHERE challenger_id = ?1 OR challenged_id = ?1
            "#,
        )
        .bind(&uid)
        .fetch_one(&self.pool)
        .await?;

        Ok(ChallengeRecord {
            wins: row.try_get::<Option<i64>, _>("wins")?.unwrap_or(0),
            losses: row.try_get::<Option<i64>, _>("losses")?.unwrap_or(0),
            draws: row.try_get::<Option<i64>, _>("draws")?.unwrap_or(0),
            active: row.try_get::<Option<i64>, _>("active")?.unwrap_or(0),
        })
    }

    // ----- badges -----

    /// Seed the badge catalog (insert-if-absent; the catalog is immutable)
    pub async fn seed_badges(&self, badges: &[Badge]) -> Result<()> {
        for badge in badges {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO badges
                    (code, name, description, category, rarity, requirement_kind, threshold, xp_reward)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&badge.code)
            .bind(&badge.name)
            .bind(&badge.description)
            .bind(&badge.category)
            .bind(&badge.rarity)
            .bind(badge.requirement_kind.as_str())
            .bind(badge.threshold)
            .bind(badge.xp_reward)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Full badge catalog
    pub async fn list_badges(&self) -> Result<Vec<Badge>> {
        let rows = sqlx::query("SELECT * FROM badges ORDER BY category, threshold")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_badge).collect()
    }

    /// Get one catalog badge by code
    pub async fn get_badge(&self, code: &str) -> Result<Option<Badge>> {
        let row = sqlx::query("SELECT * FROM badges WHERE code = ?1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row_to_badge(&row)?)),
            None => Ok(None),
        }
    }

    /// Atomic insert-if-absent grant. Returns true only for the first grant
    /// of (user, badge); concurrent or repeated evaluations see false.
    pub async fn try_grant_badge(
        &self,
        user_id: Uuid,
        badge_code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO user_badges (user_id, badge_code, unlocked_at, displayed)
            VALUES (?1, ?2, ?3, 0)
            "#,
        )
        .bind(user_id.to_string())
        .bind(badge_code)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// All badges unlocked by a user
    pub async fn list_user_badges(&self, user_id: Uuid) -> Result<Vec<UserBadge>> {
        let rows = sqlx::query(
            "SELECT * FROM user_badges WHERE user_id = ?1 ORDER BY unlocked_at ASC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_user_badge).collect()
    }

    /// Replace the set of displayed badges for a user
    pub async fn set_displayed_badges(&self, user_id: Uuid, codes: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE user_badges SET displayed = 0 WHERE user_id = ?1")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;

        for code in codes {
            sqlx::query(
                "UPDATE user_badges SET displayed = 1 WHERE user_id = ?1 AND badge_code = ?2",
            )
            .bind(user_id.to_string())
            .bind(code)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // ----- XP redemptions -----

    /// Commit one redemption: debit the balance, recompute the league, write
    /// the audit row, and (for standalone grants) set the premium window.
    ///
    /// A single transaction guarantees there is never a debit without an
    /// audit row or vice versa. The debit is guarded by `xp >= spent`, so an
    /// overlapping redemption cannot take the balance negative.
    pub async fn execute_redemption(
        &self,
        redemption: &XpRedemption,
        xp_premium_until: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let mut tx = self.pool.begin().await.map_err(EngineError::Database)?;

        let debit = sqlx::query(
            r#"
            UPDATE leaderboard_entries
            SET xp = xp - ?1, league = ?2, last_updated = ?3
            WHERE user_id = ?4 AND xp >= ?1
            "#,
        )
        .bind(redemption.xp_spent)
        .bind(League::for_xp(redemption.xp_balance_after).as_str())
        .bind(redemption.created_at.to_rfc3339())
        .bind(redemption.user_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(EngineError::Database)?;

        if debit.rows_affected() != 1 {
            // Balance changed underneath us; roll back with no state touched.
            return Err(EngineError::validation("insufficient XP balance"));
        }

        sqlx::query(
            r#"
            INSERT INTO xp_redemptions (
                id, user_id, xp_spent, months_redeemed,
                xp_balance_before, xp_balance_after,
                subscription_kind, valid_from, valid_until, status, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(redemption.id.to_string())
        .bind(redemption.user_id.to_string())
        .bind(redemption.xp_spent)
        .bind(redemption.months_redeemed)
        .bind(redemption.xp_balance_before)
        .bind(redemption.xp_balance_after)
        .bind(redemption.subscription_kind.as_str())
        .bind(redemption.valid_from.to_rfc3339())
        .bind(redemption.valid_until.to_rfc3339())
        .bind(redemption.status.as_str())
        .bind(redemption.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(EngineError::Database)?;

        if let Some(until) = xp_premium_until {
            sqlx::query(
                r#"
                UPDATE leaderboard_entries
                SET xp_premium_until = ?1, premium_via_xp = 1
                WHERE user_id = ?2
                "#,
            )
            .bind(until.to_rfc3339())
            .bind(redemption.user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(EngineError::Database)?;
        }

        tx.commit().await.map_err(EngineError::Database)?;
        Ok(())
    }

    /// Redemption history for a user, most recent first
    pub async fn list_redemptions(&self, user_id: Uuid) -> Result<Vec<XpRedemption>> {
        let rows = sqlx::query(
            "SELECT * FROM xp_redemptions WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_redemption).collect()
    }

    /// Entries whose XP-funded premium window has lapsed
    pub async fn list_lapsed_xp_premium(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<LeaderboardEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM leaderboard_entries \
             WHERE xp_premium_until IS NOT NULL AND xp_premium_until < ?1",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Clear the XP premium expiry; drop the premium flag only when the
    /// downgrade actually applies (no paid coverage elsewhere)
    pub async fn clear_xp_premium(&self, user_id: Uuid, downgrade: bool) -> Result<()> {
        let sql = if downgrade {
            "UPDATE leaderboard_entries SET xp_premium_until = NULL, premium_via_xp = 0 WHERE user_id = ?1"
        } else {
            "UPDATE leaderboard_entries SET xp_premium_until = NULL WHERE user_id = ?1"
        };
        sqlx::query(sql)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flip active standalone redemptions whose window has lapsed to expired
    pub async fn expire_redemptions(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE xp_redemptions SET status = 'expired'
            WHERE user_id = ?1 AND status = 'active' AND valid_until < ?2
            "#,
        )
        .bind(user_id.to_string())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ----- notification preferences -----

    /// Per-user notification rule opt-ins, with defaults if never saved
    pub async fn get_notification_prefs(&self, user_id: Uuid) -> Result<NotificationPrefs> {
        let row = sqlx::query("SELECT * FROM notification_prefs WHERE user_id = ?1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(NotificationPrefs {
                user_id,
                daily_motivation: row.try_get("daily_motivation")?,
                streak_risk: row.try_get("streak_risk")?,
                inactivity: row.try_get("inactivity")?,
            }),
            None => Ok(NotificationPrefs::default_for(user_id)),
        }
    }

    /// Save notification rule opt-ins
    pub async fn upsert_notification_prefs(&self, prefs: &NotificationPrefs) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_prefs (user_id, daily_motivation, streak_risk, inactivity)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                daily_motivation = excluded.daily_motivation,
                streak_risk = excluded.streak_risk,
                inactivity = excluded.inactivity
            "#,
        )
        .bind(prefs.user_id.to_string())
        .bind(prefs.daily_motivation)
        .bind(prefs.streak_risk)
        .bind(prefs.inactivity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Order-independent key for the challenge pair uniqueness index
fn pair_key(a: Uuid, b: Uuid) -> String {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(&v)).transpose()
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<LeaderboardEntry> {
    let user_id: String = row.try_get("user_id")?;
    let visibility: String = row.try_get("visibility")?;
    let league: String = row.try_get("league")?;
    let last_updated: String = row.try_get("last_updated")?;
    let premium_until: Option<String> = row.try_get("xp_premium_until")?;

    Ok(LeaderboardEntry {
        user_id: Uuid::parse_str(&user_id)?,
        display_name: row.try_get("display_name")?,
        avatar_ref: row.try_get("avatar_ref")?,
        visibility: Visibility::from_str(&visibility),
        xp: row.try_get("xp")?,
        league: League::from_str(&league),
        stats: StatsSnapshot {
            total_sessions: row.try_get("total_sessions")?,
            total_calories_burned: row.try_get("total_calories")?,
            total_duration_min: row.try_get("total_duration_min")?,
            current_streak: row.try_get("current_streak")?,
            this_week_sessions: row.try_get("week_sessions")?,
            this_month_sessions: row.try_get("month_sessions")?,
            strength_sessions: row.try_get("strength_sessions")?,
            strength_week: row.try_get("strength_week")?,
            strength_month: row.try_get("strength_month")?,
            cardio_sessions: row.try_get("cardio_sessions")?,
            cardio_week: row.try_get("cardio_week")?,
            cardio_month: row.try_get("cardio_month")?,
            bodyweight_sessions: row.try_get("bodyweight_sessions")?,
            bodyweight_week: row.try_get("bodyweight_week")?,
            bodyweight_month: row.try_get("bodyweight_month")?,
        },
        xp_premium_until: parse_opt_ts(premium_until)?,
        premium_via_xp: row.try_get("premium_via_xp")?,
        last_updated: parse_ts(&last_updated)?,
    })
}

fn row_to_challenge(row: &sqlx::sqlite::SqliteRow) -> Result<Challenge> {
    let id: String = row.try_get("id")?;
    let challenger_id: String = row.try_get("challenger_id")?;
    let challenged_id: String = row.try_get("challenged_id")?;
    let challenge_type: String = row.try_get("challenge_type")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let start_date: Option<String> = row.try_get("start_date")?;
    let end_date: Option<String> = row.try_get("end_date")?;
    let winner_id: Option<String> = row.try_get("winner_id")?;
    let last_notification_at: Option<String> = row.try_get("last_notification_at")?;

    Ok(Challenge {
        id: Uuid::parse_str(&id)?,
        challenger_id: Uuid::parse_str(&challenger_id)?,
        challenged_id: Uuid::parse_str(&challenged_id)?,
        challenger_name: row.try_get("challenger_name")?,
        challenger_avatar: row.try_get("challenger_avatar")?,
        challenged_name: row.try_get("challenged_name")?,
        challenged_avatar: row.try_get("challenged_avatar")?,
        challenge_type: ChallengeType::from_str(&challenge_type)
            .ok_or_else(|| anyhow::anyhow!("unknown challenge type: {challenge_type}"))?,
        duration_days: row.try_get("duration_days")?,
        status: ChallengeStatus::from_str(&status),
        created_at: parse_ts(&created_at)?,
        start_date: parse_opt_ts(start_date)?,
        end_date: parse_opt_ts(end_date)?,
        challenger_score: row.try_get("challenger_score")?,
        challenged_score: row.try_get("challenged_score")?,
        challenger_start_score: row.try_get("challenger_start_score")?,
        challenged_start_score: row.try_get("challenged_start_score")?,
        winner_id: winner_id.map(|id| Uuid::parse_str(&id)).transpose()?,
        last_notification_at: parse_opt_ts(last_notification_at)?,
        notifications_sent: row.try_get("notifications_sent")?,
    })
}

fn row_to_badge(row: &sqlx::sqlite::SqliteRow) -> Result<Badge> {
    let kind: String = row.try_get("requirement_kind")?;
    Ok(Badge {
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        rarity: row.try_get("rarity")?,
        requirement_kind: RequirementKind::from_str(&kind),
        threshold: row.try_get("threshold")?,
        xp_reward: row.try_get("xp_reward")?,
    })
}

fn row_to_user_badge(row: &sqlx::sqlite::SqliteRow) -> Result<UserBadge> {
    let user_id: String = row.try_get("user_id")?;
    let unlocked_at: String = row.try_get("unlocked_at")?;
    Ok(UserBadge {
        user_id: Uuid::parse_str(&user_id)?,
        badge_code: row.try_get("badge_code")?,
        unlocked_at: parse_ts(&unlocked_at)?,
        displayed: row.try_get("displayed")?,
    })
}

fn row_to_redemption(row: &sqlx::sqlite::SqliteRow) -> Result<XpRedemption> {
    let id: String = row.try_get("id")?;
    let user_id: String = row.try_get("user_id")?;
    let kind: String = row.try_get("subscription_kind")?;
    let status: String = row.try_get("status")?;
    let valid_from: String = row.try_get("valid_from")?;
    let valid_until: String = row.try_get("valid_until")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(XpRedemption {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        xp_spent: row.try_get("xp_spent")?,
        months_redeemed: row.try_get("months_redeemed")?,
        xp_balance_before: row.try_get("xp_balance_before")?,
        xp_balance_after: row.try_get("xp_balance_after")?,
        subscription_kind: SubscriptionKind::from_str(&kind),
        valid_from: parse_ts(&valid_from)?,
        valid_until: parse_ts(&valid_until)?,
        status: RedemptionStatus::from_str(&status),
        created_at: parse_ts(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionCategory;

    async fn create_test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn pending_challenge(challenger: Uuid, challenged: Uuid) -> Challenge {
        Challenge {
            id: Uuid::new_v4(),
            challenger_id: challenger,
            challenged_id: challenged,
            challenger_name: "Challenger".to_string(),
            challenger_avatar: None,
            challenged_name: "Challenged".to_string(),
            challenged_avatar: None,
            challenge_type: ChallengeType::Sessions,
            duration_days: 7,
            status: ChallengeStatus::Pending,
            created_at: Utc::now(),
            start_date: None,
            end_date: None,
            challenger_score: 0,
            challenged_score: 0,
            challenger_start_score: 0,
            challenged_start_score: 0,
            winner_id: None,
            last_notification_at: None,
            notifications_sent: 0,
        }
    }

    #[tokio::test]
    async fn test_entry_upsert_preserves_xp_and_visibility() {
        let db = create_test_db().await;
        let user = Uuid::new_v4();
        let now = Utc::now();

        db.upsert_entry_stats(user, "Alice", None, &StatsSnapshot::default(), now)
            .await
            .unwrap();
        db.set_visibility(user, Visibility::Public, now).await.unwrap();
        db.credit_xp(user, "Alice", 1500, now).await.unwrap();

        // A stats refresh must not clobber visibility, XP, or league.
        let mut stats = StatsSnapshot::default();
        stats.total_sessions = 42;
        db.upsert_entry_stats(user, "Alice", None, &stats, now)
            .await
            .unwrap();

        let entry = db.get_entry(user).await.unwrap().unwrap();
        assert_eq!(entry.stats.total_sessions, 42);
        assert_eq!(entry.xp, 1500);
        assert_eq!(entry.league, League::Silver);
        assert_eq!(entry.visibility, Visibility::Public);
    }

    #[tokio::test]
    async fn test_duplicate_pair_challenge_rejected_both_directions() {
        let db = create_test_db().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        db.insert_challenge(&pending_challenge(a, b)).await.unwrap();

        // Same direction.
        let err = db.insert_challenge(&pending_challenge(a, b)).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // Reverse direction is the same unordered pair.
        let err = db.insert_challenge(&pending_challenge(b, a)).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_pair_becomes_available_after_terminal_state() {
        let db = create_test_db().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let first = pending_challenge(a, b);
        db.insert_challenge(&first).await.unwrap();
        assert!(db
            .mark_challenge_terminal(first.id, ChallengeStatus::Declined)
            .await
            .unwrap());

        // Declined rows leave the partial index, so a fresh challenge works.
        db.insert_challenge(&pending_challenge(b, a)).await.unwrap();
    }

    #[tokio::test]
    async fn test_badge_grant_is_at_most_once() {
        let db = create_test_db().await;
        let user = Uuid::new_v4();
        let now = Utc::now();

        assert!(db.try_grant_badge(user, "streak_7", now).await.unwrap());
        assert!(!db.try_grant_badge(user, "streak_7", now).await.unwrap());

        let badges = db.list_user_badges(user).await.unwrap();
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].badge_code, "streak_7");
    }

    #[tokio::test]
    async fn test_redemption_debit_and_audit_are_atomic() {
        let db = create_test_db().await;
        let user = Uuid::new_v4();
        let now = Utc::now();
        db.credit_xp(user, "Alice", 20_000, now).await.unwrap();

        let redemption = XpRedemption {
            id: Uuid::new_v4(),
            user_id: user,
            xp_spent: 20_000,
            months_redeemed: 2,
            xp_balance_before: 20_000,
            xp_balance_after: 0,
            subscription_kind: SubscriptionKind::Standalone,
            valid_from: now,
            valid_until: now + chrono::Duration::days(60),
            status: RedemptionStatus::Active,
            created_at: now,
        };
        db.execute_redemption(&redemption, Some(redemption.valid_until))
            .await
            .unwrap();

        let entry = db.get_entry(user).await.unwrap().unwrap();
        assert_eq!(entry.xp, 0);
        assert!(entry.premium_via_xp);

        let history = db.list_redemptions(user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].xp_balance_before, 20_000);
        assert_eq!(history[0].xp_balance_after, 0);

        // Balance is now insufficient; nothing may mutate.
        let again = XpRedemption {
            id: Uuid::new_v4(),
            xp_spent: 10_000,
            xp_balance_before: 0,
            xp_balance_after: 0,
            months_redeemed: 1,
            ..redemption
        };
        let err = db.execute_redemption(&again, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(db.list_redemptions(user).await.unwrap().len(), 1);
        assert_eq!(db.get_entry(user).await.unwrap().unwrap().xp, 0);
    }

    #[tokio::test]
    async fn test_finished_sessions_window() {
        let db = create_test_db().await;
        let user = Uuid::new_v4();
        let now = Utc::now();

        for days_ago in [1, 2, 10] {
            db.insert_session(
                user,
                &SessionRecord {
                    date: now - chrono::Duration::days(days_ago),
                    duration_minutes: 30,
                    calories: 200,
                    category: SessionCategory::Cardio,
                },
            )
            .await
            .unwrap();
        }

        let all = db.finished_sessions(user, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let recent = db
            .finished_sessions(user, Some(now - chrono::Duration::days(5)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn test_notification_prefs_default_and_upsert() {
        let db = create_test_db().await;
        let user = Uuid::new_v4();

        let prefs = db.get_notification_prefs(user).await.unwrap();
        assert!(prefs.daily_motivation && prefs.streak_risk && prefs.inactivity);

        db.upsert_notification_prefs(&NotificationPrefs {
            user_id: user,
            daily_motivation: false,
            streak_risk: true,
            inactivity: false,
        })
        .await
        .unwrap();

        let prefs = db.get_notification_prefs(user).await.unwrap();
        assert!(!prefs.daily_motivation);
        assert!(prefs.streak_risk);
        assert!(!prefs.inactivity);
    }
}
