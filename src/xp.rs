// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # XP economy
//!
//! Converts accumulated XP into premium subscription time. Two fulfilment
//! paths: extending an externally-managed paid period through the
//! [`SubscriptionProvider`], or opening a standalone XP-funded window tracked
//! on the leaderboard entry. The debit, the audit row, and the window update
//! commit in one transaction, so a failure at any point leaves the balance
//! untouched.

use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::constants::xp as costs;
use crate::database::Database;
use crate::errors::{EngineError, EngineResult};
use crate::models::{RedemptionStatus, SubscriptionKind, XpRedemption};
use crate::notifications::{Dispatcher, NotificationPayload};
use crate::subscription::SubscriptionProvider;

/// What a redemption would cost the user right now
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionEligibility {
    pub eligible: bool,
    pub xp_balance: i64,
    pub cost_per_month: i64,
    pub max_months: i64,
    /// Months the current balance covers, capped at `max_months`
    pub affordable_months: i64,
}

/// Orchestrates XP-for-subscription-time redemptions and window expiry
#[derive(Clone)]
pub struct XpManager {
    database: Database,
    provider: Arc<dyn SubscriptionProvider>,
    dispatcher: Dispatcher,
}

impl XpManager {
    pub fn new(
        database: Database,
        provider: Arc<dyn SubscriptionProvider>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            database,
            provider,
            dispatcher,
        }
    }

    /// How many months the user's balance can buy right now
    pub async fn check_eligibility(&self, user_id: Uuid) -> EngineResult<RedemptionEligibility> {
        let balance = match self.database.get_entry(user_id).await? {
            Some(entry) => entry.xp,
            None => 0,
        };
        let cost = costs::cost_per_month();
        let max_months = costs::max_redeem_months();
        let affordable = (balance / cost).min(max_months);
        Ok(RedemptionEligibility {
            eligible: affordable >= 1,
            xp_balance: balance,
            cost_per_month: cost,
            max_months,
            affordable_months: affordable,
        })
    }

    /// Spend XP on `months` of premium time.
    ///
    /// Preferred path extends the user's genuine paid period at the provider.
    /// Provider-side failures (or test-mode billing references) fall back to
    /// a standalone window so the user always gets what they paid for.
    pub async fn redeem(
        &self,
        user_id: Uuid,
        months: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<XpRedemption> {
        let max_months = costs::max_redeem_months();
        if months < 1 || months > max_months {
            return Err(EngineError::validation(format!(
                "months must be between 1 and {max_months}"
            )));
        }

        let entry = self
            .database
            .get_entry(user_id)
            .await?
            .ok_or_else(|| EngineError::not_found("leaderboard entry", user_id))?;
        let cost = months * costs::cost_per_month();
        if entry.xp < cost {
            return Err(EngineError::validation("insufficient XP balance"));
        }

        let span = Months::new(months as u32);
        let paid = match self.provider.get_active_paid_subscription(user_id).await {
            Ok(paid) => paid,
            Err(err) => {
                // Treat a provider outage like no paid coverage; the
                // standalone window is always fulfillable.
                warn!(user.id = %user_id, error = %err, "Subscription lookup failed, using standalone window");
                None
            }
        };

        let mut redemption = XpRedemption {
            id: Uuid::new_v4(),
            user_id,
            xp_spent: cost,
            months_redeemed: months,
            xp_balance_before: entry.xp,
            xp_balance_after: entry.xp - cost,
            subscription_kind: SubscriptionKind::Standalone,
            valid_from: now,
            valid_until: now + span,
            status: RedemptionStatus::Active,
            created_at: now,
        };

        let mut premium_until = Some(redemption.valid_until);
        if let Some(paid) = paid.filter(|p| p.active && p.is_genuine()) {
            let new_end = paid.period_end + span;
            match self.provider.extend_period(&paid.provider_ref, new_end).await {
                Ok(()) => {
                    redemption.subscription_kind = SubscriptionKind::Extension;
                    redemption.valid_from = paid.period_end;
                    redemption.valid_until = new_end;
                    // The payment system owns the extended period.
                    premium_until = None;
                }
                Err(err) => {
                    warn!(user.id = %user_id, error = %err, "Period extension failed, falling back to standalone window");
                }
            }
        }

        if redemption.subscription_kind == SubscriptionKind::Standalone {
            // Stack onto an unexpired standalone window instead of eating it.
            if let Some(existing) = entry.xp_premium_until.filter(|until| *until > now) {
                redemption.valid_from = existing;
                redemption.valid_until = existing + span;
                premium_until = Some(redemption.valid_until);
            }
        }

        self.database
            .execute_redemption(&redemption, premium_until)
            .await?;

        info!(
            user.id = %user_id,
            redemption.id = %redemption.id,
            months,
            xp_spent = cost,
            kind = redemption.subscription_kind.as_str(),
            "XP redeemed for premium time"
        );

        self.dispatcher
            .dispatch(
                NotificationPayload::new(
                    user_id,
                    "Premium unlocked!",
                    format!(
                        "You traded {cost} XP for {months} month(s) of premium, active until {}",
                        redemption.valid_until.format("%Y-%m-%d")
                    ),
                    "xp_redeemed",
                )
                .with_target(redemption.id),
            )
            .await;

        Ok(redemption)
    }

    /// Redemption history, most recent first
    pub async fn history(&self, user_id: Uuid) -> EngineResult<Vec<XpRedemption>> {
        Ok(self.database.list_redemptions(user_id).await?)
    }

    /// Daily sweep over lapsed XP-funded windows.
    ///
    /// A user with paid coverage elsewhere keeps premium; the expired window
    /// marker is cleared either way so the entry is not re-swept. Failures
    /// are isolated per entry.
    pub async fn expiry_sweep(&self, now: DateTime<Utc>) {
        let lapsed = match self.database.list_lapsed_xp_premium(now).await {
            Ok(lapsed) => lapsed,
            Err(err) => {
                error!(error = %err, "Failed to list lapsed premium windows");
                return;
            }
        };

        for entry in lapsed {
            if let Err(err) = self.expire_one(entry.user_id, now).await {
                error!(user.id = %entry.user_id, error = %err, "Premium expiry failed");
            }
        }
    }

    async fn expire_one(&self, user_id: Uuid, now: DateTime<Utc>) -> EngineResult<()> {
        let has_paid_coverage = match self.provider.get_active_paid_subscription(user_id).await {
            Ok(Some(paid)) => paid.active && paid.period_end > now,
            Ok(None) => false,
            Err(err) => {
                // Leave the entry untouched on a provider outage; the next
                // sweep picks it up again.
                warn!(user.id = %user_id, error = %err, "Subscription lookup failed during expiry");
                return Ok(());
            }
        };

        let downgrade = !has_paid_coverage;
        self.database.clear_xp_premium(user_id, downgrade).await?;
        self.database.expire_redemptions(user_id, now).await?;

        if downgrade {
            info!(user.id = %user_id, "XP premium window expired");
            self.dispatcher
                .dispatch(NotificationPayload::new(
                    user_id,
                    "Premium expired",
                    "Your XP-funded premium time has ended. Win challenges to earn more!",
                    "xp_premium_expired",
                ))
                .await;
        }
        Ok(())
    }
}
