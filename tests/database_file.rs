// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! File-backed database creation and persistence across reopens

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use arena_engine::database::Database;
use arena_engine::models::{SessionCategory, SessionRecord, Visibility};

#[tokio::test]
async fn test_file_database_created_and_persistent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("arena.db");
    let url = format!("sqlite:{}", path.display());
    let user = Uuid::new_v4();
    let now = Utc::now();

    {
        let database = Database::new(&url).await?;
        database
            .upsert_entry_stats(user, "Asha", None, &Default::default(), now)
            .await?;
        database.set_visibility(user, Visibility::Public, now).await?;
        database
            .insert_session(
                user,
                &SessionRecord {
                    date: now,
                    duration_minutes: 25,
                    calories: 200,
                    category: SessionCategory::Bodyweight,
                },
            )
            .await?;
    }

    assert!(path.exists(), "database file should exist on disk");

    // Reopen and verify the state survived.
    let database = Database::new(&url).await?;
    let entry = database.get_entry(user).await?.unwrap();
    assert_eq!(entry.display_name, "Asha");
    assert_eq!(entry.visibility, Visibility::Public);

    let sessions = database.finished_sessions(user, None).await?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].calories, 200);
    Ok(())
}

#[tokio::test]
async fn test_memory_databases_are_isolated() -> Result<()> {
    let first = Database::new("sqlite::memory:").await?;
    let second = Database::new("sqlite::memory:").await?;
    let user = Uuid::new_v4();

    first
        .upsert_entry_stats(user, "Asha", None, &Default::default(), Utc::now())
        .await?;

    assert!(first.get_entry(user).await?.is_some());
    assert!(second.get_entry(user).await?.is_none());
    Ok(())
}
