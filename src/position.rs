//! # Position Sources
//!
//! A [`PositionSource`] opens a [`FixSubscription`]: a lazy, unbounded,
//! non-restartable sequence of fixes and source errors in delivery order.
//!
//! Cancelling a subscription is idempotent. Once [`FixSubscription::cancel`]
//! returns, `next()` yields `None` forever, including for events the source had
//! already buffered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{FieldError, Result};
use crate::types::PositionFix;

/// Options passed to the device when a watch is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchOptions {
    /// Ask for GNSS-grade fixes instead of network positioning.
    /// Default: true
    pub enable_high_accuracy: bool,

    /// Source-level timeout per fix. Expiry is reported as a non-fatal
    /// [`PositionErrorKind::Timeout`]. Default: 5000 ms
    pub timeout_ms: u64,

    /// Oldest cached fix the device may hand back. Default: 1000 ms
    pub maximum_age_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout_ms: 5000,
            maximum_age_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionErrorKind {
    /// The user revoked (or never granted) location permission
    PermissionDenied,
    /// The device could not determine a position right now
    Unavailable,
    /// No fix arrived within `timeout_ms`
    Timeout,
}

/// A failure reported by the positioning source.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionError {
    pub kind: PositionErrorKind,
    pub message: String,
}

impl PositionError {
    pub fn new(kind: PositionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Terminal errors mean no further fixes will arrive on this subscription.
    pub fn is_terminal(&self) -> bool {
        match self.kind {
            PositionErrorKind::PermissionDenied => true,
            PositionErrorKind::Unavailable | PositionErrorKind::Timeout => false,
        }
    }
}

impl From<PositionError> for FieldError {
    fn from(err: PositionError) -> Self {
        FieldError::Source {
            terminal: err.is_terminal(),
            message: err.message,
        }
    }
}

pub type FixEvent = std::result::Result<PositionFix, PositionError>;

/// Live subscription to a position source.
#[derive(Debug)]
pub struct FixSubscription {
    receiver: mpsc::UnboundedReceiver<FixEvent>,
    cancelled: Arc<AtomicBool>,
}

impl FixSubscription {
    /// Wrap a receiving channel. The source must stop sending once `cancelled` is set.
    pub fn new(receiver: mpsc::UnboundedReceiver<FixEvent>, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            receiver,
            cancelled,
        }
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once cancelled or once the source has hung up. This is
    /// cancel-safe: dropping the future never loses an event.
    pub async fn next(&mut self) -> Option<FixEvent> {
        if self.is_cancelled() {
            return None;
        }
        let event = self.receiver.recv().await?;
        if self.is_cancelled() {
            return None;
        }
        Some(event)
    }

    /// Stop delivery. Safe to call more than once.
    pub fn cancel(&mut self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.receiver.close();
        let mut dropped = 0usize;
        while self.receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("[FixSubscription] Discarded {} buffered events on cancel", dropped);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for FixSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A device capability that can stream fixes.
pub trait PositionSource: Send + Sync {
    /// Open a continuous watch. Fails with [`FieldError::SourceUnavailable`]
    /// when the device has no positioning capability.
    fn watch(&self, options: &WatchOptions) -> Result<FixSubscription>;
}

// ============================================================================
// Channel-fed source
// ============================================================================

#[derive(Debug)]
struct ActiveWatch {
    sender: mpsc::UnboundedSender<FixEvent>,
    cancelled: Arc<AtomicBool>,
    options: WatchOptions,
}

#[derive(Debug, Default)]
struct FeedState {
    active: Option<ActiveWatch>,
    watches_opened: usize,
}

/// A position source fed from the host through a [`FixFeed`].
///
/// Platform bridges push device callbacks into the feed; only the most
/// recently opened subscription receives them.
#[derive(Debug, Clone)]
pub struct ChannelPositionSource {
    state: Arc<Mutex<FeedState>>,
    available: bool,
}

/// Host-side handle pushing events into a [`ChannelPositionSource`].
#[derive(Debug, Clone)]
pub struct FixFeed {
    state: Arc<Mutex<FeedState>>,
}

impl ChannelPositionSource {
    pub fn new() -> (Self, FixFeed) {
        let state = Arc::new(Mutex::new(FeedState::default()));
        (
            Self {
                state: Arc::clone(&state),
                available: true,
            },
            FixFeed { state },
        )
    }

    /// A source for devices without positioning hardware or API.
    pub fn unavailable() -> Self {
        Self {
            state: Arc::new(Mutex::new(FeedState::default())),
            available: false,
        }
    }
}

impl PositionSource for ChannelPositionSource {
    fn watch(&self, options: &WatchOptions) -> Result<FixSubscription> {
        if !self.available {
            return Err(FieldError::SourceUnavailable);
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut state = self.state.lock().map_err(|_| FieldError::SourceUnavailable)?;
        if let Some(previous) = state.active.take() {
            previous.cancelled.store(true, Ordering::SeqCst);
        }
        state.active = Some(ActiveWatch {
            sender,
            cancelled: Arc::clone(&cancelled),
            options: options.clone(),
        });
        state.watches_opened += 1;

        Ok(FixSubscription::new(receiver, cancelled))
    }
}

impl FixFeed {
    /// Deliver a fix. Returns false when no live subscription took it.
    pub fn push_fix(&self, fix: PositionFix) -> bool {
        self.push(Ok(fix))
    }

    /// Deliver a source error. Returns false when no live subscription took it.
    pub fn push_error(&self, error: PositionError) -> bool {
        self.push(Err(error))
    }

    /// Hang up the current subscription as a device would when its watch dies.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.active = None;
        }
    }

    /// Whether a subscription is currently listening.
    pub fn is_watching(&self) -> bool {
        self.state
            .lock()
            .map(|state| {
                state
                    .active
                    .as_ref()
                    .is_some_and(|w| !w.cancelled.load(Ordering::SeqCst))
            })
            .unwrap_or(false)
    }

    /// Options of the current watch, if any.
    pub fn watch_options(&self) -> Option<WatchOptions> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.active.as_ref().map(|w| w.options.clone()))
    }

    pub fn watches_opened(&self) -> usize {
        self.state.lock().map(|s| s.watches_opened).unwrap_or(0)
    }

    fn push(&self, event: FixEvent) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let Some(active) = state.active.as_ref() else {
            return false;
        };
        if active.cancelled.load(Ordering::SeqCst) {
            state.active = None;
            return false;
        }
        if active.sender.send(event).is_err() {
            state.active = None;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (source, feed) = ChannelPositionSource::new();
        let mut sub = source.watch(&WatchOptions::default()).unwrap();

        assert!(feed.push_fix(PositionFix::new(40.0, -74.0, 1)));
        assert!(feed.push_error(PositionError::new(PositionErrorKind::Timeout, "slow")));
        assert!(feed.push_fix(PositionFix::new(40.001, -74.0, 2)));

        assert_eq!(sub.next().await.unwrap().unwrap().capture_time_millis, 1);
        assert!(sub.next().await.unwrap().is_err());
        assert_eq!(sub.next().await.unwrap().unwrap().capture_time_millis, 2);
    }

    #[tokio::test]
    async fn test_cancel_discards_buffered_and_is_idempotent() {
        let (source, feed) = ChannelPositionSource::new();
        let mut sub = source.watch(&WatchOptions::default()).unwrap();

        feed.push_fix(PositionFix::new(40.0, -74.0, 1));
        sub.cancel();
        sub.cancel();

        assert!(sub.next().await.is_none());
        assert!(!feed.push_fix(PositionFix::new(40.0, -74.0, 2)));
        assert!(!feed.is_watching());
    }

    #[tokio::test]
    async fn test_closed_feed_ends_subscription() {
        let (source, feed) = ChannelPositionSource::new();
        let mut sub = source.watch(&WatchOptions::default()).unwrap();
        feed.close();
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn test_unavailable_source() {
        let source = ChannelPositionSource::unavailable();
        assert!(matches!(
            source.watch(&WatchOptions::default()),
            Err(FieldError::SourceUnavailable)
        ));
    }

    #[test]
    fn test_permission_denied_is_terminal() {
        let err = PositionError::new(PositionErrorKind::PermissionDenied, "denied");
        assert!(err.is_terminal());
        let field: FieldError = err.into();
        assert!(matches!(field, FieldError::Source { terminal: true, .. }));
    }
}
