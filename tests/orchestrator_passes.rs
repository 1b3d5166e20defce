// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Batch orchestrator passes: refresh, timeouts, notification rules, expiry

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Months, Utc};
use uuid::Uuid;

use arena_engine::activity::ActivityLog;
use arena_engine::badges::{self, BadgeEngine};
use arena_engine::challenges::ChallengeEngine;
use arena_engine::database::Database;
use arena_engine::leaderboard::LeaderboardManager;
use arena_engine::models::{
    ChallengeStatus, ChallengeType, NotificationPrefs, SessionCategory, SessionRecord,
};
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

async fn log_session(db: &Database, user: Uuid, date: DateTime<Utc>) -> Result<()> {
    db.insert_session(
        user,
        &SessionRecord {
            date,
            duration_minutes: 30,
            calories: 280,
            category: SessionCategory::Cardio,
        },
    )
    .await
}

#[tokio::test]
async fn test_daily_refresh_keeps_streaks_current() -> Result<()> {
    let engine = build_engine().await?;
    let now = Utc::now();
    let user = Uuid::new_v4();

    engine.leaderboard.opt_in(user, "Asha", None, now).await?;
    for days_ago in 0..3 {
        log_session(&engine.database, user, now - Duration::days(days_ago)).await?;
    }

    engine.orchestrator.refresh_all_leaderboards(now).await;

    let entry = engine.database.get_entry(user).await?.unwrap();
    assert_eq!(entry.stats.total_sessions, 3);
    assert_eq!(entry.stats.current_streak, 3);
    Ok(())
}

#[tokio::test]
async fn test_stale_pending_challenges_cancelled() -> Result<()> {
    let engine = build_engine().await?;
    let now = Utc::now();
    let (stale_a, stale_b) = (Uuid::new_v4(), Uuid::new_v4());
    let (fresh_a, fresh_b) = (Uuid::new_v4(), Uuid::new_v4());

    let stale = engine
        .challenges
        .create(stale_a, stale_b, ChallengeType::Sessions, 7, now - Duration::hours(50))
        .await?;
    let fresh = engine
        .challenges
        .create(fresh_a, fresh_b, ChallengeType::Sessions, 7, now - Duration::hours(2))
        .await?;

    engine.orchestrator.challenge_pass(now).await;

    assert_eq!(
        engine.challenges.get(stale.id).await?.status,
        ChallengeStatus::Cancelled
    );
    assert_eq!(
        engine.challenges.get(fresh.id).await?.status,
        ChallengeStatus::Pending
    );
    Ok(())
}

#[tokio::test]
async fn test_notification_pass_respects_opt_outs() -> Result<()> {
    let engine = build_engine().await?;
    let now = Utc::now();
    let (chatty, quiet) = (Uuid::new_v4(), Uuid::new_v4());

    engine.leaderboard.opt_in(chatty, "Asha", None, now).await?;
    engine.leaderboard.opt_in(quiet, "Noor", None, now).await?;

    // Both have a streak at risk (last session yesterday).
    for user in [chatty, quiet] {
        log_session(&engine.database, user, now - Duration::days(1)).await?;
    }

    let prefs = NotificationPrefs {
        user_id: quiet,
        daily_motivation: false,
        streak_risk: false,
        inactivity: false,
    };
    engine.database.upsert_notification_prefs(&prefs).await?;

    engine.orchestrator.notification_pass(now).await;

    assert!(engine
        .notifier
        .for_user(chatty)
        .await
        .iter()
        .any(|p| p.data["type"] == "streak_risk"));
    assert!(engine.notifier.for_user(quiet).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_xp_expiry_pass_downgrades_lapsed_windows() -> Result<()> {
    let engine = build_engine().await?;
    let now = Utc::now();
    let user = Uuid::new_v4();

    engine.leaderboard.opt_in(user, "Asha", None, now).await?;
    engine.database.credit_xp(user, "Asha", 10_000, now).await?;

    // Redeemed two months ago for one month of premium.
    engine.xp.redeem(user, 1, now - Months::new(2)).await?;
    assert!(engine.database.get_entry(user).await?.unwrap().premium_via_xp);

    engine.orchestrator.xp_expiry_pass(now).await;

    let entry = engine.database.get_entry(user).await?.unwrap();
    assert!(!entry.premium_via_xp);
    assert_eq!(entry.xp_premium_until, None);
    assert!(engine
        .notifier
        .for_user(user)
        .await
        .iter()
        .any(|p| p.data["type"] == "xp_premium_expired"));
    Ok(())
}

#[tokio::test]
async fn test_single_pass_sequence_is_safe_to_repeat() -> Result<()> {
    let engine = build_engine().await?;
    let now = Utc::now();
    let start = now - Duration::days(4);
    let (asha, noor) = (Uuid::new_v4(), Uuid::new_v4());

    engine.leaderboard.opt_in(asha, "Asha", None, start).await?;
    engine.leaderboard.opt_in(noor, "Noor", None, start).await?;
    let challenge = engine
        .challenges
        .create(asha, noor, ChallengeType::Sessions, 3, start)
        .await?;
    engine.challenges.accept(challenge.id, noor, start).await?;
    log_session(&engine.database, asha, start + Duration::hours(1)).await?;

    for _ in 0..3 {
        engine.orchestrator.refresh_all_leaderboards(now).await;
        engine.orchestrator.challenge_pass(now).await;
        engine.orchestrator.xp_expiry_pass(now).await;
    }

    // Settled exactly once; repeated passes change nothing.
    let record = engine.challenges.stats_for_user(asha).await?;
    assert_eq!(record.wins, 1);

    let xp_after_first = engine.database.get_entry(asha).await?.unwrap().xp;
    engine.orchestrator.challenge_pass(now).await;
    assert_eq!(engine.database.get_entry(asha).await?.unwrap().xp, xp_after_first);
    Ok(())
}
