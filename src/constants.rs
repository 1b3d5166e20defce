// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Constants Module
//!
//! Tunables of the XP economy, challenge lifecycle, and notification
//! throttling. Hardcoded defaults with environment overrides where a
//! deployment is likely to want a different value.

/// XP economy constants
pub mod xp {
    use std::env;

    /// XP cost of one month of premium time
    pub const COST_PER_MONTH: i64 = 10_000;

    /// Maximum months redeemable in one transaction
    pub const MAX_REDEEM_MONTHS: i64 = 3;

    /// XP awarded to a challenge winner
    pub const CHALLENGE_WIN: i64 = 500;

    /// Participation XP awarded to a challenge loser
    pub const CHALLENGE_LOSS: i64 = 100;

    /// Flat XP awarded to both parties on a draw
    pub const CHALLENGE_DRAW: i64 = 250;

    /// Get XP cost per month from environment or default
    pub fn cost_per_month() -> i64 {
        env::var("XP_COST_PER_MONTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(COST_PER_MONTH)
    }

    /// Get redemption month cap from environment or default
    pub fn max_redeem_months() -> i64 {
        env::var("XP_MAX_REDEEM_MONTHS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(MAX_REDEEM_MONTHS)
    }
}

/// League XP thresholds
pub mod league {
    pub const SILVER_MIN_XP: i64 = 1_000;
    pub const GOLD_MIN_XP: i64 = 5_000;
    pub const PLATINUM_MIN_XP: i64 = 15_000;
    pub const DIAMOND_MIN_XP: i64 = 40_000;
}

/// Challenge lifecycle constants
pub mod challenge {
    /// Valid challenge lengths in days
    pub const ALLOWED_DURATIONS: [i64; 3] = [3, 7, 14];

    /// Hours a challenge may stay pending before the sweep cancels it
    pub const PENDING_TIMEOUT_HOURS: i64 = 48;

    /// Score gap that triggers a nudge to the trailing participant
    pub const NUDGE_GAP: i64 = 2;

    /// Minimum hours between nudges on one challenge
    pub const NUDGE_COOLDOWN_HOURS: i64 = 12;

    /// Window before the end date in which both parties get a final reminder
    pub const ENDGAME_WINDOW_HOURS: i64 = 24;

    /// Hard cap on reminder notifications per challenge
    pub const MAX_REMINDERS: i64 = 10;
}

/// Badge display constants
pub mod badge {
    /// Maximum badges a user may pin to their public profile
    pub const MAX_DISPLAYED: usize = 3;
}

/// Leaderboard query defaults
pub mod leaderboard {
    /// Default page size for leaderboard queries
    pub const DEFAULT_LIMIT: i64 = 50;

    /// Upper bound on requested page size
    pub const MAX_LIMIT: i64 = 200;
}

/// Daily notification rule constants
pub mod notifications {
    /// Days without a session before the inactivity nudge fires
    pub const INACTIVITY_DAYS: i64 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides_fall_back_to_defaults() {
        std::env::remove_var("XP_COST_PER_MONTH");
        std::env::remove_var("XP_MAX_REDEEM_MONTHS");
        assert_eq!(xp::cost_per_month(), xp::COST_PER_MONTH);
        assert_eq!(xp::max_redeem_months(), xp::MAX_REDEEM_MONTHS);
    }

    #[test]
    fn test_league_thresholds_are_ordered() {
        assert!(league::SILVER_MIN_XP < league::GOLD_MIN_XP);
        assert!(league::GOLD_MIN_XP < league::PLATINUM_MIN_XP);
        assert!(league::PLATINUM_MIN_XP < league::DIAMOND_MIN_XP);
    }
}
