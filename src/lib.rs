// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Arena Engine
//!
//! A competitive gamification engine over fitness activity data: pairwise
//! timed challenges, an opt-in global leaderboard with streaks and leagues,
//! an idempotent badge engine, and an XP economy that converts points into
//! premium subscription time.
//!
//! ## Architecture
//!
//! The engine reads finished sessions from an activity log and derives all
//! competitive state from them:
//! - **Scoring**: pure functions turning session history into metric values
//! - **Leaderboard**: per-user stats snapshots with ranked public views
//! - **Challenges**: a state machine for 1v1 timed competitions
//! - **Badges**: a declarative catalog granted at most once per user
//! - **XP economy**: challenge rewards redeemable for premium time
//! - **Orchestrator**: the periodic passes driving progress, completion,
//!   reminders, and expiry
//!
//! Every operation takes an explicit `now`, so batch passes and tests run
//! against pinned clocks.

/// Activity log seam the engine reads finished sessions through
pub mod activity;

/// Badge catalog, requirement evaluation, and the grant engine
pub mod badges;

/// Challenge state machine and periodic evaluation
pub mod challenges;

/// Configuration management for the engine daemon
pub mod config;

/// Application constants and tunable limits
pub mod constants;

/// SQLite persistence layer
pub mod database;

/// Error taxonomy for engine operations
pub mod errors;

/// Leaderboard aggregation and ranked views
pub mod leaderboard;

/// Structured logging configuration
pub mod logging;

/// Common data models
pub mod models;

/// Notification payloads and the fire-and-forget dispatcher
pub mod notifications;

/// Request/response surface for the engine operations
pub mod routes;

/// Batch orchestrator for the recurring passes
pub mod scheduler;

/// Pure scoring functions over session history
pub mod scoring;

/// Subscription system seam for the XP economy
pub mod subscription;

/// XP redemption and premium window expiry
pub mod xp;
