// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use arena_engine::activity::ActivityLog;
use arena_engine::badges::{self, BadgeEngine};
use arena_engine::challenges::ChallengeEngine;
use arena_engine::config::EngineConfig;
use arena_engine::database::Database;
use arena_engine::leaderboard::LeaderboardManager;
use arena_engine::logging;
use arena_engine::notifications::{Dispatcher, NullNotifier};
use arena_engine::scheduler::Orchestrator;
use arena_engine::subscription::NoSubscriptions;
use arena_engine::xp::XpManager;

#[derive(Parser, Debug)]
#[command(author, version, about = "Competitive gamification engine daemon", long_about = None)]
struct Args {
    /// Override the database URL from the environment
    #[arg(short, long)]
    database_url: Option<String>,

    /// Run every pass once and exit instead of looping
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_from_env()?;

    let args = Args::parse();
    let mut config = EngineConfig::from_env()?;
    if let Some(url) = args.database_url {
        config.database_url = url;
    }

    info!(database_url = %config.database_url, "Connecting to database");
    let database = Database::new(&config.database_url).await?;
    database.seed_badges(&badges::default_catalog()).await?;

    let activity_log: Arc<dyn ActivityLog> = Arc::new(database.clone());
    let dispatcher = Dispatcher::new(Arc::new(NullNotifier));
    let leaderboard = LeaderboardManager::new(database.clone(), activity_log.clone());
    let badge_engine = BadgeEngine::new(database.clone(), activity_log.clone(), dispatcher.clone());
    let challenges = ChallengeEngine::new(
        database.clone(),
        activity_log.clone(),
        dispatcher.clone(),
        badge_engine,
    );
    let xp = XpManager::new(database.clone(), Arc::new(NoSubscriptions), dispatcher.clone());

    let orchestrator = Orchestrator::new(
        database,
        activity_log,
        leaderboard,
        challenges,
        xp,
        dispatcher,
    );

    if args.once {
        let now = chrono::Utc::now();
        orchestrator.refresh_all_leaderboards(now).await;
        orchestrator.challenge_pass(now).await;
        orchestrator.notification_pass(now).await;
        orchestrator.xp_expiry_pass(now).await;
        info!("Single pass complete");
        return Ok(());
    }

    orchestrator.run(config.schedule()).await;
    Ok(())
}
