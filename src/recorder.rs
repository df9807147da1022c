//! # Track Recorder
//!
//! Records a road path from a live fix stream.
//!
//! ## Lifecycle
//!
//! `Idle --start--> Recording --stop--> Idle`. A finished [`Track`] goes to the
//! [`EntityStore`], never back into the recorder.
//!
//! ## Driving the recorder
//!
//! The recorder owns its subscription. A host loop awaits
//! [`TrackRecorder::next_event`] alongside its UI commands:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(event) = recorder.next_event(), if recorder.is_recording() => show(event),
//!         Some(cmd) = commands.recv() => handle(cmd, &mut recorder),
//!     }
//! }
//! ```
//!
//! `next_event` is cancel-safe, and every mutation needs `&mut self`, so a fix
//! can never be applied concurrently with `stop()`. Events still buffered when
//! `stop()` cancels the subscription are discarded by the subscription itself.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::clock::{Clock, IdGenerator};
use crate::error::{FieldError, OptionExt, Result, ValidationError};
use crate::geodesy::fix_distance;
use crate::notify::{Notification, Notifier};
use crate::position::{FixSubscription, PositionError, PositionSource, WatchOptions};
use crate::store::EntityStore;
use crate::types::{PositionFix, RoadClass, RoadCondition, Track};

/// Recorder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Options for the position watch opened at `start`.
    pub watch: WatchOptions,

    /// Stop and persist the session when the source fails terminally
    /// (e.g. permission revoked). When false the failure is reported and the
    /// session stays open until the user stops it.
    /// Default: false
    pub auto_stop_on_terminal_error: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            watch: WatchOptions::default(),
            auto_stop_on_terminal_error: false,
        }
    }
}

/// What the operator entered before pressing start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartRequest {
    pub name: String,
    pub road_class: Option<RoadClass>,
    pub condition: Option<RoadCondition>,
    pub notes: Option<String>,
}

impl StartRequest {
    pub fn new(name: impl Into<String>, road_class: RoadClass) -> Self {
        Self {
            name: name.into(),
            road_class: Some(road_class),
            ..Self::default()
        }
    }

    pub fn with_condition(mut self, condition: RoadCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

/// Snapshot published after every accepted fix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LiveMetrics {
    pub recording: bool,
    pub latest: Option<PositionFix>,
    pub distance_meters: f64,
    pub point_count: usize,
}

/// Outcome of one routed subscription event.
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// A fix was appended
    Fix(LiveMetrics),
    /// A transient source error; the session continues
    SourceError(FieldError),
    /// The source failed for good; the session is still open
    SourceLost(FieldError),
    /// The source failed for good and the session was stopped and persisted
    AutoStopped(Track),
}

/// Running distance owned by exactly one session.
#[derive(Debug, Default)]
struct DistanceAccumulator {
    previous: Option<PositionFix>,
    total_meters: f64,
}

impl DistanceAccumulator {
    fn push(&mut self, fix: &PositionFix) -> f64 {
        if let Some(prev) = self.previous.as_ref() {
            self.total_meters += fix_distance(prev, fix);
        }
        self.previous = Some(*fix);
        self.total_meters
    }
}

struct Session {
    track: Track,
    distance: DistanceAccumulator,
    subscription: FixSubscription,
    source_lost: bool,
}

/// Records one road at a time.
pub struct TrackRecorder {
    source: Arc<dyn PositionSource>,
    store: Arc<EntityStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    config: RecorderConfig,
    session: Option<Session>,
    metrics: watch::Sender<LiveMetrics>,
}

impl TrackRecorder {
    pub fn new(
        source: Arc<dyn PositionSource>,
        store: Arc<EntityStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: RecorderConfig,
    ) -> Self {
        let (metrics, _) = watch::channel(LiveMetrics::default());
        Self {
            source,
            store,
            notifier,
            clock,
            ids: IdGenerator::new(),
            config,
            session: None,
            metrics,
        }
    }

    pub fn state(&self) -> RecorderState {
        if self.session.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// The track being recorded, if any.
    pub fn current_track(&self) -> Option<&Track> {
        self.session.as_ref().map(|s| &s.track)
    }

    /// Whether the current session's source has failed for good.
    pub fn source_lost(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.source_lost)
    }

    /// Subscribe to live metrics.
    pub fn metrics(&self) -> watch::Receiver<LiveMetrics> {
        self.metrics.subscribe()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Begin recording a road.
    pub fn start(&mut self, request: StartRequest) -> Result<&Track> {
        let session = match self.open_session(request) {
            Ok(session) => session,
            Err(e) => {
                self.notifier.notify(Notification::from(&e));
                return Err(e);
            }
        };

        let session = self.session.insert(session);
        publish_metrics(&self.metrics, Some(&*session));
        self.notifier.notify(Notification::success(
            "Recording started! Start walking or riding along the road.",
        ));
        Ok(&session.track)
    }

    fn open_session(&self, request: StartRequest) -> Result<Session> {
        if self.session.is_some() {
            return Err(ValidationError::AlreadyRecording.into());
        }
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        let road_class = request.road_class.ok_or_invalid(ValidationError::MissingType)?;

        let subscription = self.source.watch(&self.config.watch)?;

        let now = self.clock.now();
        let track = Track {
            id: self.ids.next_id(now),
            name: name.to_string(),
            road_class,
            condition: request.condition.unwrap_or_default(),
            points: Vec::new(),
            start_time: now,
            end_time: None,
            cumulative_distance_meters: 0.0,
            notes: request.notes.as_deref().map(str::trim).unwrap_or_default().to_string(),
        };

        info!(
            "[TrackRecorder] Started '{}' ({}) as {}",
            track.name,
            road_class.as_str(),
            track.id
        );

        Ok(Session {
            track,
            distance: DistanceAccumulator::default(),
            subscription,
            source_lost: false,
        })
    }

    /// Append a fix to the current track. Returns false when idle.
    ///
    /// Fixes are appended as delivered: no deduplication, no smoothing.
    pub fn on_fix(&mut self, fix: PositionFix) -> bool {
        let Some(session) = self.session.as_mut() else {
            debug!("[TrackRecorder] Ignoring fix while idle");
            return false;
        };

        let total = session.distance.push(&fix);
        session.track.points.push(fix);
        session.track.cumulative_distance_meters = total;

        self.publish();
        true
    }

    /// Report a source error against the current session.
    pub fn on_source_error(&mut self, error: PositionError) -> Option<RecorderEvent> {
        let terminal = error.is_terminal();
        self.source_failure(error.into(), terminal)
    }

    fn source_failure(&mut self, error: FieldError, terminal: bool) -> Option<RecorderEvent> {
        let session = self.session.as_mut()?;
        warn!("[TrackRecorder] {} (terminal: {})", error, terminal);
        self.notifier.notify(Notification::from(&error));

        if !terminal {
            return Some(RecorderEvent::SourceError(error));
        }

        session.source_lost = true;
        session.subscription.cancel();

        if !self.config.auto_stop_on_terminal_error {
            return Some(RecorderEvent::SourceLost(error));
        }

        match self.stop() {
            Ok(Some(track)) => Some(RecorderEvent::AutoStopped(track)),
            Ok(None) => None,
            Err(_) => Some(RecorderEvent::SourceLost(error)),
        }
    }

    /// Wait for the next subscription event and apply it.
    ///
    /// Returns `None` when idle or once the source has been lost.
    pub async fn next_event(&mut self) -> Option<RecorderEvent> {
        let session = self.session.as_mut()?;
        if session.source_lost {
            return None;
        }

        let event = session.subscription.next().await;
        match event {
            Some(Ok(fix)) => {
                self.on_fix(fix);
                Some(RecorderEvent::Fix(self.metrics.borrow().clone()))
            }
            Some(Err(error)) => self.on_source_error(error),
            None => {
                let error = FieldError::Source {
                    message: "Position source closed".to_string(),
                    terminal: true,
                };
                self.source_failure(error, true)
            }
        }
    }

    /// Finish the current recording and persist it.
    ///
    /// No-op (returns `Ok(None)`) when idle. The recorder is idle afterwards
    /// even when persisting fails; the track then stays in the store's
    /// in-memory snapshot and the write error is returned.
    pub fn stop(&mut self) -> Result<Option<Track>> {
        let Some(mut session) = self.session.take() else {
            return Ok(None);
        };
        session.subscription.cancel();

        let mut track = session.track;
        track.end_time = Some(self.clock.now().max(track.start_time));
        track.cumulative_distance_meters = session.distance.total_meters;

        self.publish();

        info!(
            "[TrackRecorder] Stopped '{}': {} points, {:.1} m",
            track.name,
            track.points.len(),
            track.cumulative_distance_meters
        );

        if let Err(e) = self.store.upsert(track.clone()) {
            self.notifier.notify(Notification::from(&e));
            return Err(e);
        }

        self.notifier.notify(Notification::success(format!(
            "Road \"{}\" recorded successfully! Distance: {:.2} km",
            track.name,
            track.distance_km()
        )));
        Ok(Some(track))
    }

    /// Delete a persisted track. Idempotent; works in any state.
    pub fn delete(&self, track_id: &str) -> Result<bool> {
        let removed = self.store.remove::<Track>(track_id)?;
        if removed {
            info!("[TrackRecorder] Deleted track {}", track_id);
            self.notifier.notify(Notification::success("Recording deleted"));
        }
        Ok(removed)
    }

    /// All persisted tracks, oldest first.
    pub fn tracks(&self) -> Vec<Track> {
        self.store
            .snapshot::<Track>()
            .unwrap_or_else(|| self.store.load_or_empty::<Track>())
    }

    fn publish(&self) {
        publish_metrics(&self.metrics, self.session.as_ref());
    }
}

fn publish_metrics(metrics: &watch::Sender<LiveMetrics>, session: Option<&Session>) {
    let snapshot = match session {
        Some(session) => LiveMetrics {
            recording: true,
            latest: session.track.points.last().copied(),
            distance_meters: session.track.cumulative_distance_meters,
            point_count: session.track.points.len(),
        },
        None => LiveMetrics::default(),
    };
    metrics.send_replace(snapshot);
}

impl Drop for TrackRecorder {
    fn drop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            warn!(
                "[TrackRecorder] Dropped while recording '{}'; session discarded",
                session.track.name
            );
            session.subscription.cancel();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
