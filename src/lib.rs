//! # Road Monitor
//!
//! Offline-first core for field capture of road geometry and infrastructure.
//!
//! This library provides:
//! - Live GPS track recording with a running haversine distance
//! - Point-of-interest asset records with validation
//! - Durable entity collections (SQLite or in-memory)
//! - Versioned, cache-first resource caching with an app-shell fallback
//! - Reconnect handling and host message replies
//! - JSON, CSV and GeoJSON export
//!
//! ## Features
//!
//! - **`http`** - Enable the `reqwest` fetcher for cache misses
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use road_monitor::{
//!     AppConfig, ChannelPositionSource, FieldApp, LogNotifier, OfflineFetcher,
//!     PositionFix, RoadClass, Services, StartRequest,
//! };
//!
//! let (source, feed) = ChannelPositionSource::new();
//! let mut app = FieldApp::open(
//!     AppConfig::default(),
//!     Services::new(Arc::new(source), Arc::new(OfflineFetcher), Arc::new(LogNotifier)),
//! )
//! .unwrap();
//!
//! let recorder = app.recorder_mut();
//! recorder.start(StartRequest::new("Main Street", RoadClass::Main)).unwrap();
//! recorder.on_fix(PositionFix::new(40.0, -74.0, 1_714_557_600_000));
//! recorder.on_fix(PositionFix::new(40.001, -74.0, 1_714_557_601_000));
//!
//! let track = recorder.stop().unwrap().unwrap();
//! assert!((track.cumulative_distance_meters - 111.19).abs() < 1.0);
//! # drop(feed);
//! ```

// Unified error handling
pub mod error;
pub use error::{FieldError, OptionExt, Result, ValidationError};

// Entity types (fixes, tracks, assets)
pub mod types;
pub use types::{
    Asset, AssetCategory, AssetPriority, AssetStatus, Location, PositionFix, RoadClass,
    RoadCondition, Track,
};

// Haversine distance and path geometry
pub mod geodesy;

pub mod clock;
pub use clock::{Clock, IdGenerator, ManualClock, SystemClock};

// User-facing notifications
pub mod notify;
pub use notify::{ChannelNotifier, LogNotifier, Notification, NotificationLevel, Notifier};

// Positioning sources and fix subscriptions
pub mod position;
pub use position::{
    ChannelPositionSource, FixEvent, FixFeed, FixSubscription, PositionError, PositionErrorKind,
    PositionSource, WatchOptions,
};

// Persisted collections
pub mod store;
pub use store::{
    Collection, Entity, EntityStore, KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore,
};

pub mod recorder;
pub use recorder::{
    LiveMetrics, RecorderConfig, RecorderEvent, RecorderState, StartRequest, TrackRecorder,
};

pub mod assets;
pub use assets::{AssetDraft, AssetRegistry};

// Versioned resource caching
pub mod cache;
#[cfg(feature = "http")]
pub use cache::HttpFetcher;
pub use cache::{
    CacheConfig, CacheManager, Fetcher, HandleOutcome, OfflineFetcher, Request, Response,
    ResponseSource,
};

pub mod sync;
pub use sync::{AgentMessage, AgentReply, NoopReconciler, Reconciler, SyncNotifier};

pub mod export;
pub use export::{ExportBundle, ExportFile, ExportFormat};

pub mod config;
pub use config::AppConfig;

pub mod app;
pub use app::{FieldApp, Services};

/// Initialize logging for Android
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RoadMonitorRust"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms
}
