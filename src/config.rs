// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration management for the engine daemon

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::scheduler::ScheduleConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// SQLite database URL
    pub database_url: String,
    /// Hours between challenge evaluation passes
    pub challenge_pass_hours: u64,
    /// Hours between the daily passes (refresh, notifications, XP expiry)
    pub daily_pass_hours: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/arena.db".to_string(),
            challenge_pass_hours: 6,
            daily_pass_hours: 24,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults. A `.env` file is honored when present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);
        let challenge_pass_hours = parse_hours("CHALLENGE_PASS_HOURS", defaults.challenge_pass_hours)?;
        let daily_pass_hours = parse_hours("DAILY_PASS_HOURS", defaults.daily_pass_hours)?;

        Ok(Self {
            database_url,
            challenge_pass_hours,
            daily_pass_hours,
        })
    }

    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            challenge_pass_hours: self.challenge_pass_hours,
            daily_pass_hours: self.daily_pass_hours,
        }
    }
}

fn parse_hours(var: &str, default: u64) -> Result<u64> {
    match std::env::var(var) {
        Ok(raw) => {
            let hours: u64 = raw
                .parse()
                .with_context(|| format!("{var} must be a positive integer"))?;
            anyhow::ensure!(hours >= 1, "{var} must be at least 1");
            Ok(hours)
        }
        Err(_) => Ok(default),
    }
}
