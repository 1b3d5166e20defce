// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Notification dispatch seam
//!
//! Notifications are fire-and-forget: a transport failure is logged and
//! counted but never propagated to the caller, and never rolls back a state
//! transition that already committed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

/// Payload handed to the notification transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    /// Routing data: `{type, targetId?, url?}`
    pub data: serde_json::Value,
}

impl NotificationPayload {
    pub fn new(user_id: Uuid, title: impl Into<String>, body: impl Into<String>, kind: &str) -> Self {
        Self {
            user_id,
            title: title.into(),
            body: body.into(),
            data: json!({ "type": kind }),
        }
    }

    /// Attach the entity the notification links to
    pub fn with_target(mut self, target_id: Uuid) -> Self {
        self.data["targetId"] = json!(target_id.to_string());
        self
    }
}

/// Notification transport (push/WebSocket dispatcher on the host side)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, payload: NotificationPayload) -> Result<()>;
}

/// Wrapper enforcing the fire-and-forget contract: failures are swallowed,
/// logged, and counted.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    sent: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            sent: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Best-effort dispatch. Never returns an error.
    pub async fn dispatch(&self, payload: NotificationPayload) {
        let user_id = payload.user_id;
        match self.notifier.notify(payload).await {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                debug!(user.id = %user_id, "Notification dispatched");
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(user.id = %user_id, error = %err, "Notification dispatch failed");
            }
        }
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Transport that drops everything, for deployments without push delivery
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _payload: NotificationPayload) -> Result<()> {
        Ok(())
    }
}

pub mod testing {
    //! Recording notifier shared by unit and integration tests

    use super::*;
    use tokio::sync::Mutex;

    /// Captures payloads instead of delivering them; can be told to fail.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub payloads: Mutex<Vec<NotificationPayload>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingNotifier {
        pub async fn for_user(&self, user_id: Uuid) -> Vec<NotificationPayload> {
            self.payloads
                .lock()
                .await
                .iter()
                .filter(|p| p.user_id == user_id)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, payload: NotificationPayload) -> Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                anyhow::bail!("transport unavailable");
            }
            self.payloads.lock().await.push(payload);
            Ok(())
        }
    }
}
