//! # Field App
//!
//! Owns every stateful component of one running field session:
//! the entity store, the track recorder, the asset registry, the cache
//! manager and the sync notifier.
//!
//! Built by [`FieldApp::open`] (rebuilding state from storage), torn down by
//! [`FieldApp::shutdown`], and passed by reference in between.

use std::sync::Arc;

use log::{info, warn};

use crate::assets::AssetRegistry;
use crate::cache::{CacheManager, CacheStorage, Fetcher, InstallReport, MemoryCacheStorage, SqliteCacheStorage};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::error::{FieldError, Result};
use crate::export::{render, ExportBundle, ExportFile, ExportFormat};
use crate::notify::{Notification, Notifier};
use crate::position::PositionSource;
use crate::recorder::TrackRecorder;
use crate::store::{EntityStore, KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
use crate::sync::{NoopReconciler, Reconciler, SyncNotifier};
use crate::types::{Asset, Track};

/// Platform capabilities handed to [`FieldApp::open`].
pub struct Services {
    pub source: Arc<dyn PositionSource>,
    pub fetcher: Arc<dyn Fetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub reconciler: Arc<dyn Reconciler>,
}

impl Services {
    /// Services with the system clock and no upstream reconciliation.
    pub fn new(
        source: Arc<dyn PositionSource>,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            fetcher,
            notifier,
            clock: Arc::new(SystemClock),
            reconciler: Arc::new(NoopReconciler),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }
}

pub struct FieldApp {
    config: AppConfig,
    store: Arc<EntityStore>,
    recorder: TrackRecorder,
    assets: AssetRegistry,
    cache: Arc<CacheManager>,
    sync: SyncNotifier,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl FieldApp {
    pub fn open(config: AppConfig, services: Services) -> Result<Self> {
        crate::init_logging();
        config.validate()?;

        let (backend, cache_storage): (Arc<dyn KeyValueStore>, Arc<dyn CacheStorage>) =
            match config.db_path.as_deref() {
                Some(path) => (
                    Arc::new(SqliteKeyValueStore::new(path).map_err(|e| open_error(path, e))?),
                    Arc::new(SqliteCacheStorage::new(path).map_err(|e| open_error(path, e))?),
                ),
                None => (
                    Arc::new(MemoryKeyValueStore::new()),
                    Arc::new(MemoryCacheStorage::new()),
                ),
            };

        let store = Arc::new(EntityStore::new(backend));
        let tracks = store.load_or_empty::<Track>();
        let assets = store.load_or_empty::<Asset>();

        let cache = Arc::new(CacheManager::new(
            cache_storage,
            services.fetcher,
            config.cache.clone(),
        )?);

        let recorder = TrackRecorder::new(
            services.source,
            Arc::clone(&store),
            Arc::clone(&services.notifier),
            Arc::clone(&services.clock),
            config.recorder.clone(),
        );
        let registry = AssetRegistry::new(
            Arc::clone(&store),
            Arc::clone(&services.notifier),
            Arc::clone(&services.clock),
        );
        let sync = SyncNotifier::new(
            services.reconciler,
            Arc::clone(&services.notifier),
            Arc::clone(&cache),
        );

        info!(
            "[FieldApp] Opened ({}): {} tracks, {} assets",
            config.db_path.as_deref().unwrap_or("in-memory"),
            tracks.len(),
            assets.len()
        );

        Ok(Self {
            config,
            store,
            recorder,
            assets: registry,
            cache,
            sync,
            notifier: services.notifier,
            clock: services.clock,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn recorder(&self) -> &TrackRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut TrackRecorder {
        &mut self.recorder
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn sync(&self) -> &SyncNotifier {
        &self.sync
    }

    /// Install the current cache generations, then sweep older ones.
    pub async fn install_cache(&self) -> Result<InstallReport> {
        let report = self.cache.install().await?;
        self.cache.activate()?;
        Ok(report)
    }

    /// Render every persisted track and asset.
    pub fn export(&self, format: ExportFormat) -> Result<ExportFile> {
        let result = ExportBundle::new(self.recorder.tracks(), self.assets.list(), self.clock.now())
            .and_then(|bundle| render(&bundle, format));

        match &result {
            Ok(file) => {
                info!("[FieldApp] Exported {} ({} bytes)", file.filename, file.contents.len());
                self.notifier.notify(Notification::success(format!(
                    "Data exported successfully as {}!",
                    format.extension().to_uppercase()
                )));
            }
            Err(e) => self.notifier.notify(Notification::from(e)),
        }
        result
    }

    /// Finish any running recording and wait for background cache writes.
    pub async fn shutdown(mut self) -> Result<()> {
        let stopped = if self.recorder.is_recording() {
            warn!("[FieldApp] Shutting down while recording; stopping");
            self.recorder.stop().map(|_| ())
        } else {
            Ok(())
        };
        self.cache.settle().await;
        info!("[FieldApp] Shut down");
        stopped
    }
}

fn open_error(path: &str, err: rusqlite::Error) -> FieldError {
    FieldError::Config {
        message: format!("cannot open database {}: {}", path, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::OfflineFetcher;
    use crate::notify::LogNotifier;
    use crate::position::ChannelPositionSource;
    use crate::recorder::StartRequest;
    use crate::types::RoadClass;

    fn open_in_memory() -> FieldApp {
        let (source, _feed) = ChannelPositionSource::new();
        FieldApp::open(
            AppConfig::default(),
            Services::new(Arc::new(source), Arc::new(OfflineFetcher), Arc::new(LogNotifier)),
        )
        .unwrap()
    }

    #[test]
    fn test_export_with_no_data() {
        let app = open_in_memory();
        assert_eq!(app.export(ExportFormat::Csv), Err(FieldError::NothingToExport));
    }

    #[tokio::test]
    async fn test_shutdown_persists_running_recording() {
        let mut app = open_in_memory();
        app.recorder_mut()
            .start(StartRequest::new("Ring Road", RoadClass::Highway))
            .unwrap();
        let store = Arc::clone(&app.store);

        app.shutdown().await.unwrap();
        let tracks = store.load::<Track>().unwrap();
        assert_eq!(tracks.len(), 1);
        assert!(tracks[0].is_finished());
    }

    #[test]
    fn test_invalid_origin_is_config_error() {
        let (source, _feed) = ChannelPositionSource::new();
        let mut config = AppConfig::default();
        config.cache.origin = "not a url".to_string();
        let result = FieldApp::open(
            config,
            Services::new(Arc::new(source), Arc::new(OfflineFetcher), Arc::new(LogNotifier)),
        );
        assert!(matches!(result, Err(FieldError::Config { .. })));
    }
}
