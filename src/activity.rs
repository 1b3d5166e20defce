// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Activity log seam
//!
//! The engine consumes finished sessions read-only through [`ActivityLog`].
//! The host system brings its own implementation; [`Database`] implements it
//! over the local `sessions` table for embedded deployments and tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::Database;
use crate::models::SessionRecord;

/// Read-only access to a user's finished activity sessions
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Finished sessions for `user_id`, optionally bounded below by `since`
    async fn list_finished_sessions(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionRecord>>;
}

#[async_trait]
impl ActivityLog for Database {
    async fn list_finished_sessions(
        &self,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionRecord>> {
        self.finished_sessions(user_id, since).await
    }
}
