//! # Entity Store
//!
//! Persistence façade over the two entity collections (`roadRecordings`,
//! `infrastructure`) kept in a client-side key-value store.
//!
//! ## Tiers
//!
//! 1. **Snapshot** (in memory): the last collection this process loaded or
//!    wrote. It is authoritative: a failed write leaves it in place so the UI
//!    keeps showing what the user did, and the next successful save persists it.
//! 2. **Backend** (durable): one JSON document per collection key, replaced in
//!    a single statement so readers never observe a partial collection.
//!
//! A `load` always re-reads the backend and replaces the snapshot.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::{FieldError, Result};
use crate::types::{Asset, Track};

// ============================================================================
// Collections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Tracks,
    Assets,
}

impl Collection {
    /// Storage key shared with every other surface of the client.
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Tracks => "roadRecordings",
            Collection::Assets => "infrastructure",
        }
    }
}

/// A record kept in one of the persisted collections.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

impl Entity for Track {
    const COLLECTION: Collection = Collection::Tracks;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Asset {
    const COLLECTION: Collection = Collection::Assets;

    fn id(&self) -> &str {
        &self.id
    }
}

// ============================================================================
// Key-value backends
// ============================================================================

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        BackendError(err.to_string())
    }
}

/// String key-value storage. Each `set` must replace the value atomically.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, BackendError>;
    fn set(&self, key: &str, value: &str) -> std::result::Result<(), BackendError>;
    fn remove(&self, key: &str) -> std::result::Result<(), BackendError>;
}

/// SQLite-backed key-value store.
pub struct SqliteKeyValueStore {
    db: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    /// Open (or create) the store at the given database path.
    pub fn new(db_path: &str) -> rusqlite::Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[EntityStore] Opened key-value store at {}", db_path);
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )
    }

    fn conn(&self) -> std::result::Result<std::sync::MutexGuard<'_, Connection>, BackendError> {
        self.db
            .lock()
            .map_err(|_| BackendError("database lock poisoned".to_string()))
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, BackendError> {
        let db = self.conn()?;
        let value = db
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), BackendError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> std::result::Result<(), BackendError> {
        let db = self.conn()?;
        db.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
        Ok(())
    }
}

/// In-memory key-value store with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would push the total stored bytes past `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn lock(&self) -> std::result::Result<std::sync::MutexGuard<'_, HashMap<String, String>>, BackendError> {
        self.values
            .lock()
            .map_err(|_| BackendError("store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, BackendError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), BackendError> {
        let mut values = self.lock()?;
        if let Some(quota) = self.quota_bytes {
            let others: usize = values
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if others + key.len() + value.len() > quota {
                return Err(BackendError(format!(
                    "quota of {} bytes exceeded",
                    quota
                )));
            }
        }
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> std::result::Result<(), BackendError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

// ============================================================================
// Entity Store
// ============================================================================

type Snapshot = Arc<dyn Any + Send + Sync>;

/// Typed CRUD over the persisted collections.
pub struct EntityStore {
    backend: Arc<dyn KeyValueStore>,
    snapshots: Mutex<HashMap<Collection, Snapshot>>,
}

impl EntityStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// A store over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()))
    }

    /// Read a collection from the backend, reviving dates.
    ///
    /// A missing or blank key is an empty collection. Unparseable data fails
    /// with [`FieldError::StoreCorrupt`].
    pub fn load<E: Entity>(&self) -> Result<Vec<E>> {
        let collection = E::COLLECTION;
        let raw = self
            .backend
            .get(collection.key())
            .map_err(|e| corrupt(collection, e.to_string()))?;

        let items: Vec<E> = match raw.as_deref().map(str::trim) {
            None | Some("") => Vec::new(),
            Some(json) => {
                serde_json::from_str(json).map_err(|e| corrupt(collection, e.to_string()))?
            }
        };

        debug!(
            "[EntityStore] Loaded {} entries from {}",
            items.len(),
            collection.key()
        );
        self.put_snapshot(collection, items.clone());
        Ok(items)
    }

    /// Like [`load`](Self::load), but an unreadable collection is logged and
    /// treated as empty.
    pub fn load_or_empty<E: Entity>(&self) -> Vec<E> {
        match self.load::<E>() {
            Ok(items) => items,
            Err(e) => {
                warn!("[EntityStore] {}; treating as empty", e);
                self.put_snapshot::<E>(E::COLLECTION, Vec::new());
                Vec::new()
            }
        }
    }

    /// Replace a whole collection.
    ///
    /// The in-memory snapshot is updated first; on
    /// [`FieldError::StoreWriteFailed`] it stays as the authoritative view.
    pub fn save<E: Entity>(&self, items: &[E]) -> Result<()> {
        let collection = E::COLLECTION;
        self.put_snapshot(collection, items.to_vec());

        let json = serde_json::to_string(items).map_err(|e| write_failed(collection, e.to_string()))?;
        self.backend
            .set(collection.key(), &json)
            .map_err(|e| write_failed(collection, e.to_string()))?;

        debug!(
            "[EntityStore] Saved {} entries to {}",
            items.len(),
            collection.key()
        );
        Ok(())
    }

    /// Insert, or replace the entry with the same id in place.
    ///
    /// Returns the collection as written.
    pub fn upsert<E: Entity>(&self, entity: E) -> Result<Vec<E>> {
        let mut items = self.current::<E>()?;
        match items.iter().position(|e| e.id() == entity.id()) {
            Some(index) => items[index] = entity,
            None => items.push(entity),
        }
        self.save(&items)?;
        Ok(items)
    }

    /// Remove the entry with the given id. Returns whether anything was removed.
    pub fn remove<E: Entity>(&self, id: &str) -> Result<bool> {
        let mut items = self.current::<E>()?;
        let before = items.len();
        items.retain(|e| e.id() != id);
        if items.len() == before {
            return Ok(false);
        }
        self.save(&items)?;
        Ok(true)
    }

    /// The in-memory view of a collection, if this process has one.
    pub fn snapshot<E: Entity>(&self) -> Option<Vec<E>> {
        let snapshots = self.snapshots.lock().ok()?;
        snapshots
            .get(&E::COLLECTION)
            .and_then(|s| s.downcast_ref::<Vec<E>>())
            .cloned()
    }

    /// Drop a collection entirely.
    pub fn clear(&self, collection: Collection) -> Result<()> {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.remove(&collection);
        }
        self.backend
            .remove(collection.key())
            .map_err(|e| write_failed(collection, e.to_string()))
    }

    fn current<E: Entity>(&self) -> Result<Vec<E>> {
        match self.snapshot::<E>() {
            Some(items) => Ok(items),
            None => self.load::<E>(),
        }
    }

    fn put_snapshot<E: Entity>(&self, collection: Collection, items: Vec<E>) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.insert(collection, Arc::new(items));
        }
    }
}

fn corrupt(collection: Collection, message: String) -> FieldError {
    FieldError::StoreCorrupt {
        collection: collection.key().to_string(),
        message,
    }
}

fn write_failed(collection: Collection, message: String) -> FieldError {
    FieldError::StoreWriteFailed {
        collection: collection.key().to_string(),
        message,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetCategory, AssetPriority, AssetStatus, Location, PositionFix, RoadClass, RoadCondition};
    use chrono::{TimeZone, Utc};

    fn sample_track(id: &str) -> Track {
        let start = Utc.timestamp_millis_opt(1_714_557_600_123).unwrap();
        Track {
            id: id.to_string(),
            name: "Main Street".to_string(),
            road_class: RoadClass::Main,
            condition: RoadCondition::Good,
            points: vec![
                PositionFix::new(40.0, -74.0, 1_714_557_600_123).with_accuracy(4.0),
                PositionFix::new(40.001, -74.0, 1_714_557_601_123),
            ],
            start_time: start,
            end_time: Some(start + chrono::Duration::seconds(30)),
            cumulative_distance_meters: 111.19,
            notes: "potholes near 5th".to_string(),
        }
    }

    fn sample_asset(id: &str) -> Asset {
        let created = Utc.timestamp_millis_opt(1_714_557_600_000).unwrap();
        Asset {
            id: id.to_string(),
            name: "Bridge 4".to_string(),
            category: AssetCategory::Bridge,
            location: Location::new(40.0, -74.0),
            status: AssetStatus::Maintenance,
            priority: AssetPriority::High,
            description: "Deck cracking".to_string(),
            contact: "county roads".to_string(),
            notes: String::new(),
            photos: Vec::new(),
            created_at: created,
            updated_at: created + chrono::Duration::minutes(5),
        }
    }

    #[test]
    fn test_empty_store_loads_empty() {
        let store = EntityStore::in_memory();
        assert!(store.load::<Asset>().unwrap().is_empty());
        assert!(store.load::<Track>().unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_preserves_instants() {
        let store = EntityStore::in_memory();
        let tracks = vec![sample_track("1"), sample_track("2")];
        store.save(&tracks).unwrap();
        assert_eq!(store.load::<Track>().unwrap(), tracks);

        let assets = vec![sample_asset("a")];
        store.save(&assets).unwrap();
        let loaded = store.load::<Asset>().unwrap();
        assert_eq!(loaded, assets);
        assert!(loaded[0].updated_at >= loaded[0].created_at);
    }

    #[test]
    fn test_round_trip_preserves_exact_coordinates() {
        // Values whose shortest decimal form needs all 17 significant digits
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed >> 11) as f64 / (1u64 << 53) as f64
        };

        let mut track = sample_track("1");
        track.points = (0..2000)
            .map(|i| {
                PositionFix::new(next() * 180.0 - 90.0, next() * 360.0 - 180.0, i)
                    .with_accuracy(next() * 25.0)
            })
            .collect();
        track.points.push(PositionFix::new(13.346133595589677, -74.00000000000001, 2000));
        track.cumulative_distance_meters = crate::geodesy::path_length(&track.points);

        let store = EntityStore::new(Arc::new(SqliteKeyValueStore::in_memory().unwrap()));
        store.save(&[track.clone()]).unwrap();
        let loaded = store.load::<Track>().unwrap();

        assert_eq!(loaded.len(), 1);
        for (saved, read) in track.points.iter().zip(&loaded[0].points) {
            assert_eq!(saved.latitude.to_bits(), read.latitude.to_bits());
            assert_eq!(saved.longitude.to_bits(), read.longitude.to_bits());
        }
        assert_eq!(loaded[0], track);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let store = EntityStore::in_memory();
        store.upsert(sample_asset("a")).unwrap();
        store.upsert(sample_asset("b")).unwrap();

        let mut changed = sample_asset("a");
        changed.name = "Bridge 4 (east)".to_string();
        let items = store.upsert(changed).unwrap();

        let ids: Vec<&str> = items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.load::<Asset>().unwrap()[0].name, "Bridge 4 (east)");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = EntityStore::in_memory();
        store.upsert(sample_track("1")).unwrap();
        assert!(store.remove::<Track>("1").unwrap());
        assert!(!store.remove::<Track>("1").unwrap());
        assert!(store.load::<Track>().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_collection() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        backend.set("infrastructure", "{not json").unwrap();
        let store = EntityStore::new(backend);

        assert!(matches!(
            store.load::<Asset>(),
            Err(FieldError::StoreCorrupt { .. })
        ));
        assert!(store.load_or_empty::<Asset>().is_empty());
    }

    #[test]
    fn test_write_failure_keeps_snapshot() {
        let store = EntityStore::new(Arc::new(MemoryKeyValueStore::with_quota(64)));
        let result = store.save(&[sample_track("1")]);

        assert!(matches!(result, Err(FieldError::StoreWriteFailed { .. })));
        assert_eq!(store.snapshot::<Track>().unwrap().len(), 1);
        // A reload conflicts with the unsaved snapshot and wins
        assert!(store.load::<Track>().unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_backend_round_trip() {
        let backend = Arc::new(SqliteKeyValueStore::in_memory().unwrap());
        let store = EntityStore::new(backend);
        store.save(&[sample_track("1")]).unwrap();
        store.upsert(sample_track("2")).unwrap();
        assert_eq!(store.load::<Track>().unwrap().len(), 2);

        store.clear(Collection::Tracks).unwrap();
        assert!(store.load::<Track>().unwrap().is_empty());
    }

    #[test]
    fn test_reads_existing_client_data() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        backend
            .set(
                "roadRecordings",
                r#"[{"id":"1714557600000","name":"Elm","type":"residential","coordinates":[],
                    "startTime":"2024-05-01T10:00:00.000Z","endTime":"2024-05-01T10:05:00.000Z",
                    "distance":0,"notes":"","condition":"poor"}]"#,
            )
            .unwrap();
        let store = EntityStore::new(backend);
        let tracks = store.load::<Track>().unwrap();
        assert_eq!(tracks[0].condition, RoadCondition::Poor);
        assert!(tracks[0].end_time.unwrap() > tracks[0].start_time);
    }
}
