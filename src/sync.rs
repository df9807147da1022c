//! # Sync Queue Notifier
//!
//! Reacts to connectivity coming back (an offline to online transition, or a
//! background-sync trigger tagged [`SYNC_TAG`]) and answers host messages.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::cache::CacheManager;
use crate::error::Result;
use crate::notify::{Notification, Notifier};

/// Background-sync tag that triggers reconciliation.
pub const SYNC_TAG: &str = "road-data-sync";

/// Notification tag for completed syncs.
pub const SYNC_COMPLETE_TAG: &str = "sync-complete";

const DEFAULT_PUSH_TEXT: &str = "New update available";

/// Pushes locally recorded data upstream once the network is back.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self) -> Result<()>;
}

/// Nothing to push; data lives only on the device.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReconciler;

#[async_trait]
impl Reconciler for NoopReconciler {
    async fn reconcile(&self) -> Result<()> {
        Ok(())
    }
}

/// Messages the host page sends to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentMessage {
    /// Activate the current generations now
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    /// Reply with the cache footprint
    #[serde(rename = "GET_CACHE_SIZE")]
    GetCacheSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentReply {
    CacheSize {
        #[serde(rename = "cacheSize")]
        cache_size: u64,
    },
}

pub struct SyncNotifier {
    reconciler: Arc<dyn Reconciler>,
    notifier: Arc<dyn Notifier>,
    cache: Arc<CacheManager>,
}

impl SyncNotifier {
    pub fn new(
        reconciler: Arc<dyn Reconciler>,
        notifier: Arc<dyn Notifier>,
        cache: Arc<CacheManager>,
    ) -> Self {
        Self {
            reconciler,
            notifier,
            cache,
        }
    }

    /// Run reconciliation and report the outcome as a notification.
    pub async fn on_connectivity_restored(&self) -> Result<()> {
        info!("[SyncNotifier] Connectivity restored; reconciling");
        match self.reconciler.reconcile().await {
            Ok(()) => {
                self.notifier.notify(
                    Notification::success("Offline data has been synchronized")
                        .with_tag(SYNC_COMPLETE_TAG),
                );
                Ok(())
            }
            Err(e) => {
                error!("[SyncNotifier] Reconciliation failed: {}", e);
                self.notifier.notify(Notification::from(&e));
                Err(e)
            }
        }
    }

    /// Handle a background-sync trigger. Returns false for unknown tags.
    pub async fn on_sync(&self, tag: &str) -> Result<bool> {
        if tag != SYNC_TAG {
            debug!("[SyncNotifier] Ignoring sync tag {}", tag);
            return Ok(false);
        }
        self.on_connectivity_restored().await?;
        Ok(true)
    }

    /// Follow an online flag until its sender goes away, reconciling on every
    /// offline to online transition.
    pub async fn watch_connectivity(&self, mut online: watch::Receiver<bool>) {
        let mut was_online = *online.borrow_and_update();
        while online.changed().await.is_ok() {
            let now_online = *online.borrow_and_update();
            if now_online && !was_online {
                // Failures are already notified
                let _ = self.on_connectivity_restored().await;
            } else if !now_online && was_online {
                info!("[SyncNotifier] Connectivity lost");
            }
            was_online = now_online;
        }
    }

    /// Total cached bytes across every generation.
    pub fn report_cache_footprint(&self) -> Result<u64> {
        self.cache.footprint()
    }

    pub fn handle_message(&self, message: AgentMessage) -> Result<Option<AgentReply>> {
        match message {
            AgentMessage::SkipWaiting => {
                let swept = self.cache.activate()?;
                info!(
                    "[SyncNotifier] Activated on request; swept {} generations",
                    swept.len()
                );
                Ok(None)
            }
            AgentMessage::GetCacheSize => Ok(Some(AgentReply::CacheSize {
                cache_size: self.report_cache_footprint()?,
            })),
        }
    }

    /// Handle a raw JSON message, replying with JSON. Unknown messages are ignored.
    pub fn handle_raw(&self, json: &str) -> Result<Option<String>> {
        let message = match serde_json::from_str::<AgentMessage>(json) {
            Ok(message) => message,
            Err(e) => {
                debug!("[SyncNotifier] Ignoring message {}: {}", json, e);
                return Ok(None);
            }
        };
        let reply = self.handle_message(message)?;
        Ok(reply.and_then(|r| serde_json::to_string(&r).ok()))
    }

    /// Surface a push message.
    pub fn on_push(&self, payload: Option<&str>) -> Notification {
        let text = payload
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_PUSH_TEXT);
        let notification = Notification::info(text);
        self.notifier.notify(notification.clone());
        notification
    }
}
