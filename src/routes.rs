// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Request/response surface for the engine operations
//!
//! Thin DTO layer over the managers. The host exposes these over whatever
//! transport it runs (HTTP, RPC, in-process); every handler takes the
//! already-authenticated acting user id.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::badges::BadgeEngine;
use crate::challenges::ChallengeEngine;
use crate::constants::badge::MAX_DISPLAYED;
use crate::database::{ChallengeRecord, Database};
use crate::errors::{EngineError, EngineResult};
use crate::leaderboard::{LeaderboardManager, LeaderboardMetric, LeaderboardPeriod, RankedEntry};
use crate::models::{Badge, Challenge, ChallengeType, NotificationPrefs, UserBadge, XpRedemption};
use crate::xp::{RedemptionEligibility, XpManager};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    pub period: LeaderboardPeriod,
    pub metric: LeaderboardMetric,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub entries: Vec<RankedEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptInRequest {
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChallengeRequest {
    pub challenged_id: Uuid,
    pub challenge_type: String,
    pub duration_days: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeListResponse {
    pub challenges: Vec<Challenge>,
    pub record: ChallengeRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeCollectionResponse {
    pub catalog: Vec<Badge>,
    pub unlocked: Vec<UserBadge>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayBadgesRequest {
    pub badge_codes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedeemRequest {
    pub months: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionHistoryResponse {
    pub redemptions: Vec<XpRedemption>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl From<&EngineError> for ErrorResponse {
    fn from(err: &EngineError) -> Self {
        let error = match err {
            EngineError::Validation(_) => "validation_error",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Database(_) | EngineError::Internal(_) => "internal_error",
        };
        ErrorResponse {
            error,
            message: err.to_string(),
        }
    }
}

/// All engine operations, bundled for the host transport
#[derive(Clone)]
pub struct EngineRoutes {
    database: Database,
    leaderboard: LeaderboardManager,
    challenges: ChallengeEngine,
    badges: BadgeEngine,
    xp: XpManager,
}

impl EngineRoutes {
    pub fn new(
        database: Database,
        leaderboard: LeaderboardManager,
        challenges: ChallengeEngine,
        badges: BadgeEngine,
        xp: XpManager,
    ) -> Self {
        Self {
            database,
            leaderboard,
            challenges,
            badges,
            xp,
        }
    }

    // ----- leaderboard -----

    pub async fn get_leaderboard(&self, query: LeaderboardQuery) -> EngineResult<LeaderboardResponse> {
        let entries = self
            .leaderboard
            .get_leaderboard(query.period, query.metric, query.limit)
            .await?;
        Ok(LeaderboardResponse { entries })
    }

    pub async fn get_my_rank(
        &self,
        acting_user: Uuid,
        period: LeaderboardPeriod,
        metric: LeaderboardMetric,
    ) -> EngineResult<i64> {
        self.leaderboard.get_user_rank(acting_user, period, metric).await
    }

    pub async fn opt_in(&self, acting_user: Uuid, request: OptInRequest) -> EngineResult<()> {
        if request.display_name.trim().is_empty() {
            return Err(EngineError::validation("display name must not be empty"));
        }
        self.leaderboard
            .opt_in(
                acting_user,
                request.display_name.trim(),
                request.avatar_ref.as_deref(),
                Utc::now(),
            )
            .await?;
        Ok(())
    }

    pub async fn opt_out(&self, acting_user: Uuid) -> EngineResult<()> {
        self.leaderboard.opt_out(acting_user, Utc::now()).await
    }

    // ----- challenges -----

    pub async fn create_challenge(
        &self,
        acting_user: Uuid,
        request: CreateChallengeRequest,
    ) -> EngineResult<Challenge> {
        let challenge_type = ChallengeType::from_str(&request.challenge_type)
            .ok_or_else(|| EngineError::validation("unknown challenge type"))?;
        self.challenges
            .create(
                acting_user,
                request.challenged_id,
                challenge_type,
                request.duration_days,
                Utc::now(),
            )
            .await
    }

    pub async fn accept_challenge(&self, acting_user: Uuid, id: Uuid) -> EngineResult<Challenge> {
        self.challenges.accept(id, acting_user, Utc::now()).await
    }

    pub async fn decline_challenge(&self, acting_user: Uuid, id: Uuid) -> EngineResult<()> {
        self.challenges.decline(id, acting_user).await
    }

    pub async fn cancel_challenge(&self, acting_user: Uuid, id: Uuid) -> EngineResult<()> {
        self.challenges.cancel(id, acting_user).await
    }

    pub async fn get_challenge(&self, acting_user: Uuid, id: Uuid) -> EngineResult<Challenge> {
        self.challenges.get_for_user(id, acting_user).await
    }

    pub async fn list_my_challenges(&self, acting_user: Uuid) -> EngineResult<ChallengeListResponse> {
        let challenges = self.challenges.list_for_user(acting_user).await?;
        let record = self.challenges.stats_for_user(acting_user).await?;
        Ok(ChallengeListResponse { challenges, record })
    }

    pub async fn get_challenge_stats(&self, acting_user: Uuid) -> EngineResult<ChallengeRecord> {
        self.challenges.stats_for_user(acting_user).await
    }

    // ----- badges -----

    pub async fn list_all_badges(&self) -> EngineResult<Vec<Badge>> {
        Ok(self.database.list_badges().await?)
    }

    pub async fn list_user_badges(&self, acting_user: Uuid) -> EngineResult<Vec<UserBadge>> {
        Ok(self.database.list_user_badges(acting_user).await?)
    }

    /// Catalog and unlocked collection in one response, for hosts that render
    /// the badge page with a single call
    pub async fn get_badges(&self, acting_user: Uuid) -> EngineResult<BadgeCollectionResponse> {
        let catalog = self.list_all_badges().await?;
        let unlocked = self.list_user_badges(acting_user).await?;
        Ok(BadgeCollectionResponse { catalog, unlocked })
    }

    /// Re-evaluate the acting user's badges now; returns freshly granted ones
    pub async fn check_badges(&self, acting_user: Uuid) -> EngineResult<Vec<Badge>> {
        Ok(self.badges.check_and_award(acting_user, Utc::now()).await?)
    }

    /// Pin at most three unlocked badges to the acting user's profile
    pub async fn set_displayed_badges(
        &self,
        acting_user: Uuid,
        request: DisplayBadgesRequest,
    ) -> EngineResult<()> {
        if request.badge_codes.len() > MAX_DISPLAYED {
            return Err(EngineError::validation(format!(
                "at most {MAX_DISPLAYED} badges can be displayed"
            )));
        }

        let unlocked = self.database.list_user_badges(acting_user).await?;
        for code in &request.badge_codes {
            if !unlocked.iter().any(|b| &b.badge_code == code) {
                return Err(EngineError::validation(format!("badge not unlocked: {code}")));
            }
        }

        Ok(self
            .database
            .set_displayed_badges(acting_user, &request.badge_codes)
            .await?)
    }

    // ----- XP economy -----

    pub async fn redemption_eligibility(
        &self,
        acting_user: Uuid,
    ) -> EngineResult<RedemptionEligibility> {
        self.xp.check_eligibility(acting_user).await
    }

    pub async fn redeem_xp(
        &self,
        acting_user: Uuid,
        request: RedeemRequest,
    ) -> EngineResult<XpRedemption> {
        self.xp.redeem(acting_user, request.months, Utc::now()).await
    }

    pub async fn redemption_history(
        &self,
        acting_user: Uuid,
    ) -> EngineResult<RedemptionHistoryResponse> {
        let redemptions = self.xp.history(acting_user).await?;
        Ok(RedemptionHistoryResponse { redemptions })
    }

    // ----- notification preferences -----

    pub async fn get_notification_prefs(&self, acting_user: Uuid) -> EngineResult<NotificationPrefs> {
        Ok(self.database.get_notification_prefs(acting_user).await?)
    }

    pub async fn update_notification_prefs(
        &self,
        acting_user: Uuid,
        mut prefs: NotificationPrefs,
    ) -> EngineResult<()> {
        // The path parameter wins over whatever id the body carries.
        prefs.user_id = acting_user;
        Ok(self.database.upsert_notification_prefs(&prefs).await?)
    }
}
