// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end challenge flow: opt-in, challenge, compete, settle, redeem

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use arena_engine::activity::ActivityLog;
use arena_engine::badges::{self, BadgeEngine};
use arena_engine::challenges::ChallengeEngine;
use arena_engine::constants::xp as xp_awards;
use arena_engine::database::Database;
use arena_engine::leaderboard::{LeaderboardManager, LeaderboardMetric, LeaderboardPeriod};
use arena_engine::models::{ChallengeStatus, ChallengeType, SessionCategory, SessionRecord};
use arena_engine::notifications::{testing::RecordingNotifier, Dispatcher};
use arena_engine::scheduler::Orchestrator;
use arena_engine::subscription::NoSubscriptions;
use arena_engine::xp::XpManager;

struct Engine {
    database: Database,
    leaderboard: LeaderboardManager,
    challenges: ChallengeEngine,
    xp: XpManager,
    orchestrator: Orchestrator,
    notifier: Arc<RecordingNotifier>,
}

async fn build_engine() -> Result<Engine> {
    let database = Database::new("sqlite::memory:").await?;
    database.seed_badges(&badges::default_catalog()).await?;

    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = Dispatcher::new(notifier.clone());
    let activity_log: Arc<dyn ActivityLog> = Arc::new(database.clone());
    let leaderboard = LeaderboardManager::new(database.clone(), activity_log.clone());
    let badge_engine =
        BadgeEngine::new(database.clone(), activity_log.clone(), dispatcher.clone());
    let challenges = ChallengeEngine::new(
        database.clone(),
        activity_log.clone(),
        dispatcher.clone(),
        badge_engine,
    );
    let xp = XpManager::new(database.clone(), Arc::new(NoSubscriptions), dispatcher.clone());
    let orchestrator = Orchestrator::new(
        database.clone(),
        activity_log,
        leaderboard.clone(),
        challenges.clone(),
        xp.clone(),
        dispatcher,
    );

    Ok(Engine {
        database,
        leaderboard,
        challenges,
        xp,
        orchestrator,
        notifier,
    })
}

async fn log_session(db: &Database, user: Uuid, date: DateTime<Utc>, calories: i64) -> Result<()> {
    db.insert_session(
        user,
        &SessionRecord {
            date,
            duration_minutes: 40,
            calories,
            category: SessionCategory::Strength,
        },
    )
    .await
}

#[tokio::test]
async fn test_full_challenge_lifecycle() -> Result<()> {
    let engine = build_engine().await?;
    let now = Utc::now();
    let start = now - Duration::days(4);
    let (asha, noor) = (Uuid::new_v4(), Uuid::new_v4());

    engine.leaderboard.opt_in(asha, "Asha", None, start).await?;
    engine.leaderboard.opt_in(noor, "Noor", None, start).await?;

    // Asha challenges Noor to a 3-day session count duel.
    let challenge = engine
        .challenges
        .create(asha, noor, ChallengeType::Sessions, 3, start)
        .await?;
    assert_eq!(challenge.status, ChallengeStatus::Pending);
    assert_eq!(challenge.challenger_name, "Asha");

    let challenge = engine.challenges.accept(challenge.id, noor, start).await?;
    assert_eq!(challenge.status, ChallengeStatus::Active);

    // Asha trains 5 times, Noor twice, all inside the window.
    for i in 0..5 {
        log_session(&engine.database, asha, start + Duration::hours(i * 12 + 1), 300).await?;
    }
    for i in 0..2 {
        log_session(&engine.database, noor, start + Duration::hours(i * 12 + 1), 300).await?;
    }

    // The periodic pass settles the expired challenge.
    engine.orchestrator.challenge_pass(now).await;

    let settled = engine.challenges.get(challenge.id).await?;
    assert_eq!(settled.status, ChallengeStatus::Completed);
    assert_eq!(settled.winner_id, Some(asha));
    assert_eq!(settled.challenger_score, 5);
    assert_eq!(settled.challenged_score, 2);

    // Both sides got their award and the winner pulled ahead on XP.
    let winner = engine.database.get_entry(asha).await?.unwrap();
    let loser = engine.database.get_entry(noor).await?.unwrap();
    assert!(winner.xp >= xp_awards::CHALLENGE_WIN);
    assert!(loser.xp >= xp_awards::CHALLENGE_LOSS);
    assert!(winner.xp > loser.xp);

    // The winner unlocked first_session and the first challenge win badge.
    let unlocked: Vec<String> = engine
        .database
        .list_user_badges(asha)
        .await?
        .into_iter()
        .map(|b| b.badge_code)
        .collect();
    assert!(unlocked.contains(&"first_session".to_string()));
    assert!(unlocked.contains(&"challenger_1".to_string()));

    // Completion notified both participants.
    let won: Vec<_> = engine.notifier.for_user(asha).await;
    assert!(won.iter().any(|p| p.data["type"] == "challenge_won"));
    let lost: Vec<_> = engine.notifier.for_user(noor).await;
    assert!(lost.iter().any(|p| p.data["type"] == "challenge_lost"));

    // The record reflects the outcome.
    let record = engine.challenges.stats_for_user(asha).await?;
    assert_eq!(record.wins, 1);
    assert_eq!(record.active, 0);
    Ok(())
}

#[tokio::test]
async fn test_winner_ranks_first_on_xp_leaderboard() -> Result<()> {
    let engine = build_engine().await?;
    let now = Utc::now();
    let start = now - Duration::days(4);
    let (asha, noor) = (Uuid::new_v4(), Uuid::new_v4());

    engine.leaderboard.opt_in(asha, "Asha", None, start).await?;
    engine.leaderboard.opt_in(noor, "Noor", None, start).await?;

    let challenge = engine
        .challenges
        .create(asha, noor, ChallengeType::Calories, 3, start)
        .await?;
    engine.challenges.accept(challenge.id, noor, start).await?;
    log_session(&engine.database, asha, start + Duration::hours(2), 800).await?;
    log_session(&engine.database, noor, start + Duration::hours(2), 500).await?;

    engine.orchestrator.challenge_pass(now).await;

    let ranked = engine
        .leaderboard
        .get_leaderboard(LeaderboardPeriod::AllTime, LeaderboardMetric::Xp, None)
        .await?;
    assert_eq!(ranked[0].entry.user_id, asha);
    assert_eq!(ranked[0].rank, 1);

    let rank = engine
        .leaderboard
        .get_user_rank(noor, LeaderboardPeriod::AllTime, LeaderboardMetric::Xp)
        .await?;
    assert_eq!(rank, 2);
    Ok(())
}

#[tokio::test]
async fn test_challenge_rewards_fund_redemption() -> Result<()> {
    let engine = build_engine().await?;
    let now = Utc::now();
    let user = Uuid::new_v4();

    engine.leaderboard.opt_in(user, "Asha", None, now).await?;
    // A long competitive career's worth of XP.
    engine.database.credit_xp(user, "Asha", 20_000, now).await?;

    let eligibility = engine.xp.check_eligibility(user).await?;
    assert!(eligibility.eligible);
    assert_eq!(eligibility.affordable_months, 2);

    let redemption = engine.xp.redeem(user, 2, now).await?;
    assert_eq!(redemption.xp_spent, 20_000);

    let entry = engine.database.get_entry(user).await?.unwrap();
    assert!(entry.premium_via_xp);
    assert_eq!(entry.xp_premium_until, Some(redemption.valid_until));

    // The balance is spent; a second redemption is rejected.
    assert!(engine.xp.redeem(user, 1, now).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_pair_rejected_until_settled() -> Result<()> {
    let engine = build_engine().await?;
    let now = Utc::now();
    let (asha, noor) = (Uuid::new_v4(), Uuid::new_v4());

    let first = engine
        .challenges
        .create(asha, noor, ChallengeType::Sessions, 7, now)
        .await?;

    // Same pair, either direction, is rejected while one is open.
    assert!(engine
        .challenges
        .create(asha, noor, ChallengeType::Calories, 7, now)
        .await
        .is_err());
    assert!(engine
        .challenges
        .create(noor, asha, ChallengeType::Sessions, 3, now)
        .await
        .is_err());

    engine.challenges.decline(first.id, noor).await?;

    // A settled pair frees the slot.
    engine
        .challenges
        .create(noor, asha, ChallengeType::Duration, 3, now)
        .await?;
    Ok(())
}
