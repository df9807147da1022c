//! Offline-first resource caching.
//!
//! - [`request`]: request/response values and cache keys
//! - [`storage`]: named generations (in-memory or SQLite)
//! - [`fetch`]: network access on a miss
//! - [`manager`]: install, activate and cache-first request handling

pub mod fetch;
pub mod manager;
pub mod request;
pub mod storage;

#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use fetch::{FetchError, Fetcher, OfflineFetcher};
pub use manager::{CacheConfig, CacheManager, HandleOutcome, InstallReport, ResponseSource};
pub use request::{Destination, Method, Request, Response};
pub use storage::{CacheStorage, MemoryCacheStorage, SqliteCacheStorage, StorageError};
