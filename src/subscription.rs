// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Subscription system seam
//!
//! Redemption path 1 (extending an externally-managed paid period) talks to
//! the payment system through [`SubscriptionProvider`]. Provider calls must
//! have a bounded timeout on the host side; a failure here makes redemption
//! fall back to the standalone XP-funded window rather than losing the debit.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An externally-managed paid subscription as reported by the payment system
#[derive(Debug, Clone)]
pub struct PaidSubscription {
    pub active: bool,
    pub period_end: DateTime<Utc>,
    /// Provider-side reference (e.g. a billing subscription id). References
    /// created by test/sandbox billing are not extendable.
    pub provider_ref: String,
}

impl PaidSubscription {
    /// Whether the provider reference points at genuine (non-test) billing
    pub fn is_genuine(&self) -> bool {
        !self.provider_ref.is_empty() && !self.provider_ref.starts_with("test")
    }
}

/// Access to the external payment/subscription system
#[async_trait]
pub trait SubscriptionProvider: Send + Sync {
    /// The user's active paid subscription, if any
    async fn get_active_paid_subscription(&self, user_id: Uuid)
        -> Result<Option<PaidSubscription>>;

    /// Push a new period end to the provider. Errors are recovered by the
    /// caller via the standalone fallback path.
    async fn extend_period(
        &self,
        provider_ref: &str,
        new_period_end: DateTime<Utc>,
    ) -> Result<()>;
}

/// Provider for deployments without a payment system: no paid coverage exists
/// and every redemption takes the standalone path.
pub struct NoSubscriptions;

#[async_trait]
impl SubscriptionProvider for NoSubscriptions {
    async fn get_active_paid_subscription(
        &self,
        _user_id: Uuid,
    ) -> Result<Option<PaidSubscription>> {
        Ok(None)
    }

    async fn extend_period(
        &self,
        provider_ref: &str,
        _new_period_end: DateTime<Utc>,
    ) -> Result<()> {
        anyhow::bail!("no subscription provider configured (ref: {provider_ref})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genuine_provider_ref() {
        let base = PaidSubscription {
            active: true,
            period_end: Utc::now(),
            provider_ref: "sub_1abc".to_string(),
        };
        assert!(base.is_genuine());

        let test_ref = PaidSubscription {
            provider_ref: "test_sub_1".to_string(),
            ..base.clone()
        };
        assert!(!test_ref.is_genuine());

        let empty = PaidSubscription {
            provider_ref: String::new(),
            ..base
        };
        assert!(!empty.is_genuine());
    }
}
