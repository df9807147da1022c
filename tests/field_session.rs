//! End-to-end field sessions against an on-disk database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use road_monitor::cache::FetchError;
use road_monitor::{
    AppConfig, AssetCategory, AssetDraft, ChannelNotifier, ChannelPositionSource, ExportFormat,
    FieldApp, Fetcher, FixFeed, HandleOutcome, Location, ManualClock, PositionFix, RecorderEvent,
    Request, Response, ResponseSource, RoadClass, Services, StartRequest, Track,
};
use tempfile::TempDir;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct SiteFetcher {
    pages: HashMap<String, Response>,
    calls: AtomicUsize,
}

impl SiteFetcher {
    fn site() -> Self {
        let mut pages = HashMap::new();
        pages.insert("/".to_string(), Response::ok("<html>road monitor</html>"));
        pages.insert("/manifest.json".to_string(), Response::ok(r#"{"name":"Road Monitor"}"#));
        pages.insert("/icon-192x192.png".to_string(), Response::ok(vec![7u8; 64]));
        pages.insert("/icon-512x512.png".to_string(), Response::ok(vec![7u8; 128]));
        pages.insert("/static/app.js".to_string(), Response::ok("start()"));
        Self {
            pages,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Fetcher for SiteFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(request.url.path())
            .cloned()
            .ok_or_else(|| FetchError("no route to host".to_string()))
    }
}

fn open(dir: &TempDir, fetcher: Arc<SiteFetcher>) -> (FieldApp, FixFeed) {
    let db_path = dir.path().join("field.db");
    let config = AppConfig {
        db_path: Some(db_path.to_string_lossy().into_owned()),
        ..AppConfig::default()
    };
    let (source, feed) = ChannelPositionSource::new();
    let (notifier, _rx) = ChannelNotifier::new();
    let services = Services::new(Arc::new(source), fetcher, Arc::new(notifier))
        .with_clock(Arc::new(ManualClock::at_millis(1_714_557_600_000)));
    (FieldApp::open(config, services).unwrap(), feed)
}

#[tokio::test]
async fn test_main_street_survives_restart() {
    init_logs();
    let dir = TempDir::new().unwrap();

    {
        let (mut app, feed) = open(&dir, Arc::new(SiteFetcher::site()));
        let recorder = app.recorder_mut();
        recorder
            .start(StartRequest::new("Main Street", RoadClass::Main))
            .unwrap();

        feed.push_fix(PositionFix::new(40.0, -74.0, 1_714_557_600_000));
        feed.push_fix(PositionFix::new(40.001, -74.0, 1_714_557_601_000));
        for _ in 0..2 {
            assert!(matches!(recorder.next_event().await, Some(RecorderEvent::Fix(_))));
        }

        let track = recorder.stop().unwrap().unwrap();
        assert!((track.cumulative_distance_meters - 111.19).abs() < 1.0);
        app.shutdown().await.unwrap();
    }

    let (app, _feed) = open(&dir, Arc::new(SiteFetcher::site()));
    let tracks: Vec<Track> = app.recorder().tracks();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].name, "Main Street");
    assert_eq!(tracks[0].points.len(), 2);
    assert!(tracks[0].end_time.unwrap() >= tracks[0].start_time);
}

#[tokio::test]
async fn test_assets_and_export() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let (app, _feed) = open(&dir, Arc::new(SiteFetcher::site()));

    assert!(app.assets().list().is_empty());
    app.assets()
        .create(AssetDraft::new(
            "Culvert 12",
            AssetCategory::Drain,
            Location::new(40.2, -74.1),
        ))
        .unwrap();

    let file = app.export(ExportFormat::GeoJson).unwrap();
    assert_eq!(file.filename, "road-infrastructure-data-2024-05-01.geojson");
    let geojson: serde_json::Value = serde_json::from_str(&file.contents).unwrap();
    assert_eq!(geojson["metadata"]["infrastructure"], 1);
    assert_eq!(geojson["features"][0]["geometry"]["type"], "Point");
}

#[tokio::test]
async fn test_cache_miss_then_hit() {
    init_logs();
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(SiteFetcher::site());
    let (app, _feed) = open(&dir, Arc::clone(&fetcher));

    let report = app.install_cache().await.unwrap();
    assert!(report.is_complete());
    let after_install = fetcher.calls.load(Ordering::SeqCst);

    let request = Request::get(app.cache().url_for("/static/app.js").unwrap());
    let first = app.cache().handle(&request).await.unwrap();
    assert!(matches!(
        first,
        HandleOutcome::Served {
            source: ResponseSource::Network,
            ..
        }
    ));
    app.cache().settle().await;

    let second = app.cache().handle(&request).await.unwrap();
    assert_eq!(second.response(), Some(&Response::ok("start()")));
    assert!(matches!(
        second,
        HandleOutcome::Served {
            source: ResponseSource::CacheHit { .. },
            ..
        }
    ));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), after_install + 1);

    let reply = app
        .sync()
        .handle_raw(r#"{"type":"GET_CACHE_SIZE"}"#)
        .unwrap()
        .unwrap();
    let expected = "<html>road monitor</html>".len()
        + r#"{"name":"Road Monitor"}"#.len()
        + 64
        + 128
        + "start()".len();
    assert_eq!(reply, format!(r#"{{"cacheSize":{}}}"#, expected));
}

#[tokio::test]
async fn test_version_bump_sweeps_old_generations() {
    init_logs();
    let dir = TempDir::new().unwrap();
    {
        let (app, _feed) = open(&dir, Arc::new(SiteFetcher::site()));
        app.install_cache().await.unwrap();
    }

    let db_path = dir.path().join("field.db");
    let mut config = AppConfig {
        db_path: Some(db_path.to_string_lossy().into_owned()),
        ..AppConfig::default()
    };
    config.cache.version = "v2".to_string();
    let (source, _feed) = ChannelPositionSource::new();
    let (notifier, _rx) = ChannelNotifier::new();
    let app = FieldApp::open(
        config,
        Services::new(
            Arc::new(source),
            Arc::new(SiteFetcher::site()),
            Arc::new(notifier),
        ),
    )
    .unwrap();

    let report = app.install_cache().await.unwrap();
    assert_eq!(report.cached.len(), 4);
    let footprint_v2 = app.cache().footprint().unwrap();
    let expected = "<html>road monitor</html>".len()
        + r#"{"name":"Road Monitor"}"#.len()
        + 64
        + 128;
    assert_eq!(footprint_v2, expected as u64);
}
