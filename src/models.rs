// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Data Models
//!
//! Core data structures for the competitive gamification engine.
//!
//! ## Core Models
//!
//! - [`LeaderboardEntry`]: public-facing aggregated stats snapshot for one user
//! - [`Challenge`]: a timed two-party competition on one metric
//! - [`Badge`] / [`UserBadge`]: catalog achievements and per-user unlocks
//! - [`XpRedemption`]: audit record of one XP-to-premium-time conversion
//! - [`SessionRecord`]: a finished activity session consumed from the activity log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::league;

/// A finished activity session as consumed (read-only) from the activity log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// When the session took place (UTC)
    pub date: DateTime<Utc>,
    /// Session length in minutes
    pub duration_minutes: i64,
    /// Estimated calories burned
    pub calories: i64,
    /// Workout category of the session
    pub category: SessionCategory,
}

/// Workout categories tracked in per-category stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    Strength,
    Cardio,
    Bodyweight,
}

impl SessionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionCategory::Strength => "strength",
            SessionCategory::Cardio => "cardio",
            SessionCategory::Bodyweight => "bodyweight",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "strength" => SessionCategory::Strength,
            "cardio" => SessionCategory::Cardio,
            _ => SessionCategory::Bodyweight,
        }
    }
}

/// Leaderboard visibility flag. Entries are never hard-deleted, only hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn from_str(s: &str) -> Self {
        if s == "public" {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

/// Aggregated stats snapshot recomputed from the activity log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_sessions: i64,
    pub total_calories_burned: i64,
    pub total_duration_min: i64,
    pub current_streak: i64,
    pub this_week_sessions: i64,
    pub this_month_sessions: i64,
    pub strength_sessions: i64,
    pub strength_week: i64,
    pub strength_month: i64,
    pub cardio_sessions: i64,
    pub cardio_week: i64,
    pub cardio_month: i64,
    pub bodyweight_sessions: i64,
    pub bodyweight_week: i64,
    pub bodyweight_month: i64,
}

/// One user's leaderboard entry (unique key = `user_id`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub display_name: String,
    /// Reference to the user's avatar (URL or asset key)
    pub avatar_ref: Option<String>,
    pub visibility: Visibility,
    /// XP point balance, always >= 0
    pub xp: i64,
    /// League banding derived from the XP balance
    pub league: League,
    pub stats: StatsSnapshot,
    /// End of the XP-funded premium window, if one has been redeemed
    pub xp_premium_until: Option<DateTime<Utc>>,
    /// Whether the user currently holds XP-funded premium access
    pub premium_via_xp: bool,
    pub last_updated: DateTime<Utc>,
}

/// League banding of an XP balance into a named rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum League {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl League {
    /// Band an XP balance into its league. Recomputed on every XP mutation.
    pub fn for_xp(xp: i64) -> Self {
        if xp >= league::DIAMOND_MIN_XP {
            League::Diamond
        } else if xp >= league::PLATINUM_MIN_XP {
            League::Platinum
        } else if xp >= league::GOLD_MIN_XP {
            League::Gold
        } else if xp >= league::SILVER_MIN_XP {
            League::Silver
        } else {
            League::Bronze
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            League::Bronze => "bronze",
            League::Silver => "silver",
            League::Gold => "gold",
            League::Platinum => "platinum",
            League::Diamond => "diamond",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "diamond" => League::Diamond,
            "platinum" => League::Platinum,
            "gold" => League::Gold,
            "silver" => League::Silver,
            _ => League::Bronze,
        }
    }
}

/// Metric a challenge is scored on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeType {
    Sessions,
    Streak,
    Calories,
    Duration,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Sessions => "sessions",
            ChallengeType::Streak => "streak",
            ChallengeType::Calories => "calories",
            ChallengeType::Duration => "duration",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sessions" => Some(ChallengeType::Sessions),
            "streak" => Some(ChallengeType::Streak),
            "calories" => Some(ChallengeType::Calories),
            "duration" => Some(ChallengeType::Duration),
            _ => None,
        }
    }
}

/// Lifecycle states of a challenge
///
/// `Pending -> {Active, Declined, Cancelled}`; `Active -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Active,
    Completed,
    Declined,
    Cancelled,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Active => "active",
            ChallengeStatus::Completed => "completed",
            ChallengeStatus::Declined => "declined",
            ChallengeStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => ChallengeStatus::Pending,
            "active" => ChallengeStatus::Active,
            "completed" => ChallengeStatus::Completed,
            "declined" => ChallengeStatus::Declined,
            _ => ChallengeStatus::Cancelled,
        }
    }
}

/// A timed, two-party competition on one metric type
///
/// Display name and avatar of both parties are snapshotted at creation time
/// on purpose: a challenge record shows the participants as they were when
/// the challenge was issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub challenger_id: Uuid,
    pub challenged_id: Uuid,
    pub challenger_name: String,
    pub challenger_avatar: Option<String>,
    pub challenged_name: String,
    pub challenged_avatar: Option<String>,
    pub challenge_type: ChallengeType,
    /// Challenge length in days, one of 3 / 7 / 14
    pub duration_days: i64,
    pub status: ChallengeStatus,
    pub created_at: DateTime<Utc>,
    /// Set at acceptance
    pub start_date: Option<DateTime<Utc>>,
    /// `start_date + duration_days`
    pub end_date: Option<DateTime<Utc>>,
    /// Progress since challenge start (delta, not lifetime score)
    pub challenger_score: i64,
    pub challenged_score: i64,
    /// Baseline captured at acceptance, for cumulative metrics
    pub challenger_start_score: i64,
    pub challenged_start_score: i64,
    /// `None` on a completed challenge means a draw
    pub winner_id: Option<Uuid>,
    pub last_notification_at: Option<DateTime<Utc>>,
    /// Counter capping repeated reminder notifications
    pub notifications_sent: i64,
}

impl Challenge {
    /// The opponent of `user_id` in this challenge
    pub fn opponent_of(&self, user_id: Uuid) -> Uuid {
        if user_id == self.challenger_id {
            self.challenged_id
        } else {
            self.challenger_id
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.challenger_id == user_id || self.challenged_id == user_id
    }
}

/// Kind of stat a badge requirement is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    Streak,
    Sessions,
    ChallengesWon,
    TopRank,
    Special,
}

impl RequirementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::Streak => "streak",
            RequirementKind::Sessions => "sessions",
            RequirementKind::ChallengesWon => "challenges_won",
            RequirementKind::TopRank => "top_rank",
            RequirementKind::Special => "special",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "streak" => RequirementKind::Streak,
            "sessions" => RequirementKind::Sessions,
            "challenges_won" => RequirementKind::ChallengesWon,
            "top_rank" => RequirementKind::TopRank,
            _ => RequirementKind::Special,
        }
    }
}

/// Immutable catalog entry describing one unlockable achievement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Badge {
    /// Unique code, e.g. `streak_7`
    pub code: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub rarity: String,
    pub requirement_kind: RequirementKind,
    /// Stat threshold that unlocks the badge
    pub threshold: i64,
    /// XP credited on first unlock
    pub xp_reward: i64,
}

/// Junction of (user, badge); the unique pair constraint makes grants at-most-once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBadge {
    pub user_id: Uuid,
    pub badge_code: String,
    pub unlocked_at: DateTime<Utc>,
    /// At most 3 badges may be displayed per user at once
    pub displayed: bool,
}

/// How a redemption applied the premium time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Extended an existing externally-managed paid period
    Extension,
    /// Granted a standalone XP-funded premium window
    Standalone,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::Extension => "extension",
            SubscriptionKind::Standalone => "standalone",
        }
    }

    pub fn from_str(s: &str) -> Self {
        if s == "extension" {
            SubscriptionKind::Extension
        } else {
            SubscriptionKind::Standalone
        }
    }
}

/// Lifecycle of a redemption's validity window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionStatus::Active => "active",
            RedemptionStatus::Expired => "expired",
            RedemptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "active" => RedemptionStatus::Active,
            "expired" => RedemptionStatus::Expired,
            _ => RedemptionStatus::Cancelled,
        }
    }
}

/// Audit/ledger record of one XP-to-premium-time conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XpRedemption {
    pub id: Uuid,
    pub user_id: Uuid,
    pub xp_spent: i64,
    pub months_redeemed: i64,
    pub xp_balance_before: i64,
    pub xp_balance_after: i64,
    pub subscription_kind: SubscriptionKind,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: RedemptionStatus,
    pub created_at: DateTime<Utc>,
}

/// Per-user opt-ins for the daily notification rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPrefs {
    pub user_id: Uuid,
    pub daily_motivation: bool,
    pub streak_risk: bool,
    pub inactivity: bool,
}

impl NotificationPrefs {
    /// Defaults for a user who never saved preferences
    pub fn default_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            daily_motivation: true,
            streak_risk: true,
            inactivity: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_league_banding() {
        assert_eq!(League::for_xp(0), League::Bronze);
        assert_eq!(League::for_xp(999), League::Bronze);
        assert_eq!(League::for_xp(1000), League::Silver);
        assert_eq!(League::for_xp(5000), League::Gold);
        assert_eq!(League::for_xp(15000), League::Platinum);
        assert_eq!(League::for_xp(40000), League::Diamond);
    }

    #[test]
    fn test_challenge_type_parsing() {
        assert_eq!(ChallengeType::from_str("sessions"), Some(ChallengeType::Sessions));
        assert_eq!(ChallengeType::from_str("streak"), Some(ChallengeType::Streak));
        assert_eq!(ChallengeType::from_str("calories"), Some(ChallengeType::Calories));
        assert_eq!(ChallengeType::from_str("duration"), Some(ChallengeType::Duration));
        assert_eq!(ChallengeType::from_str("distance"), None);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ChallengeStatus::Pending,
            ChallengeStatus::Active,
            ChallengeStatus::Completed,
            ChallengeStatus::Declined,
            ChallengeStatus::Cancelled,
        ] {
            assert_eq!(ChallengeStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_challenge_serialization() {
        let challenge = Challenge {
            id: Uuid::new_v4(),
            challenger_id: Uuid::new_v4(),
            challenged_id: Uuid::new_v4(),
            challenger_name: "Alice".to_string(),
            challenger_avatar: None,
            challenged_name: "Bob".to_string(),
            challenged_avatar: Some("avatar/bob.png".to_string()),
            challenge_type: ChallengeType::Calories,
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
        };

        let json = serde_json::to_string(&challenge).expect("Failed to serialize challenge");
        assert!(json.contains("\"calories\""));
        assert!(json.contains("\"pending\""));

        let back: Challenge = serde_json::from_str(&json).expect("Failed to deserialize challenge");
        assert_eq!(back.challenge_type, ChallengeType::Calories);
        assert_eq!(back.challenged_name, "Bob");
    }

    #[test]
    fn test_opponent_of() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let challenge = Challenge {
            id: Uuid::new_v4(),
            challenger_id: a,
            challenged_id: b,
            challenger_name: "A".to_string(),
            challenger_avatar: None,
            challenged_name: "B".to_string(),
            challenged_avatar: None,
            challenge_type: ChallengeType::Sessions,
            duration_days: 3,
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
        };
        assert_eq!(challenge.opponent_of(a), b);
        assert_eq!(challenge.opponent_of(b), a);
        assert!(challenge.involves(a));
    }
}
