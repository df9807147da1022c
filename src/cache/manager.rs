//! # Cache Generation Manager
//!
//! Two generations are active at a time:
//! - **shell**: the app shell, pre-populated from the manifest at install
//! - **dynamic**: filled lazily from successful same-origin fetches
//!
//! Generations are named `{product}-static-{version}` and
//! `{product}-dynamic-{version}`. Bumping the version and calling
//! [`CacheManager::activate`] sweeps every older generation.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use url::Url;

use super::fetch::Fetcher;
use super::request::{Method, Request, Response};
use super::storage::{CacheStorage, StorageError};
use crate::error::{FieldError, Result};

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Origin the app is served from. Requests to other origins bypass the cache.
    /// Default: "https://localhost"
    pub origin: String,

    /// Prefix of generation names. Default: "road-monitor"
    pub product: String,

    /// Generation version. Default: "v1"
    pub version: String,

    /// Paths pre-populated into the shell generation at install.
    /// Default: `/`, `/manifest.json` and the two app icons
    pub manifest: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            origin: "https://localhost".to_string(),
            product: "road-monitor".to_string(),
            version: "v1".to_string(),
            manifest: vec![
                "/".to_string(),
                "/manifest.json".to_string(),
                "/icon-192x192.png".to_string(),
                "/icon-512x512.png".to_string(),
            ],
        }
    }
}

impl CacheConfig {
    pub fn shell_generation(&self) -> String {
        format!("{}-static-{}", self.product, self.version)
    }

    pub fn dynamic_generation(&self) -> String {
        format!("{}-dynamic-{}", self.product, self.version)
    }
}

/// Outcome of [`CacheManager::install`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallReport {
    /// Manifest paths stored in the shell generation
    pub cached: Vec<String>,
    /// Manifest paths that could not be stored, with the reason
    pub failed: Vec<(String, String)>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseSource {
    CacheHit { generation: String },
    Network,
    /// The network failed on a navigation; the shell's root document was served
    ShellFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// Cross-origin: the cache did not touch the request
    Bypass,
    Served {
        response: Response,
        source: ResponseSource,
    },
}

impl HandleOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            HandleOutcome::Bypass => None,
            HandleOutcome::Served { response, .. } => Some(response),
        }
    }
}

pub struct CacheManager {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    config: CacheConfig,
    origin: Url,
    population: Mutex<JoinSet<()>>,
}

impl CacheManager {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        config: CacheConfig,
    ) -> Result<Self> {
        let origin = Url::parse(&config.origin).map_err(|e| FieldError::Config {
            message: format!("invalid cache origin {:?}: {}", config.origin, e),
        })?;
        Ok(Self {
            storage,
            fetcher,
            config,
            origin,
            population: Mutex::new(JoinSet::new()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Resolve an app path against the origin.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        self.origin.join(path).map_err(|e| FieldError::Config {
            message: format!("invalid path {:?}: {}", path, e),
        })
    }

    /// Open both active generations and pre-populate the shell.
    ///
    /// Individual manifest failures are reported in the [`InstallReport`] and
    /// do not fail the install.
    pub async fn install(&self) -> Result<InstallReport> {
        let shell = self.config.shell_generation();
        let dynamic = self.config.dynamic_generation();
        for generation in [&shell, &dynamic] {
            self.storage
                .open(generation)
                .map_err(|e| cache_error(generation, "", e))?;
        }

        let fetches = self.config.manifest.iter().map(|path| {
            let shell = shell.as_str();
            async move { (path.clone(), self.precache(shell, path).await) }
        });

        let mut report = InstallReport::default();
        for (path, outcome) in join_all(fetches).await {
            match outcome {
                Ok(()) => report.cached.push(path),
                Err(reason) => {
                    warn!("[CacheManager] Could not precache {}: {}", path, reason);
                    report.failed.push((path, reason));
                }
            }
        }

        info!(
            "[CacheManager] Installed {}: {}/{} manifest entries cached",
            shell,
            report.cached.len(),
            self.config.manifest.len()
        );
        Ok(report)
    }

    async fn precache(&self, shell: &str, path: &str) -> std::result::Result<(), String> {
        let url = self.url_for(path).map_err(|e| e.to_string())?;
        let request = Request::get(url);
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|e| e.to_string())?;
        if !response.is_ok() {
            return Err(format!("HTTP {}", response.status));
        }
        self.storage
            .put(shell, &request.cache_key(), &response)
            .map_err(|e| e.to_string())
    }

    /// Delete every generation other than the two active ones.
    ///
    /// Returns the swept names. The active generations exist afterwards.
    pub fn activate(&self) -> Result<Vec<String>> {
        let keep = [
            self.config.shell_generation(),
            self.config.dynamic_generation(),
        ];

        let existing = self
            .storage
            .generations()
            .map_err(|e| cache_error("*", "", e))?;

        let mut swept = Vec::new();
        for name in existing {
            if keep.contains(&name) {
                continue;
            }
            self.storage
                .delete(&name)
                .map_err(|e| cache_error(&name, "", e))?;
            info!("[CacheManager] Deleted old generation {}", name);
            swept.push(name);
        }

        for generation in &keep {
            self.storage
                .open(generation)
                .map_err(|e| cache_error(generation, "", e))?;
        }
        Ok(swept)
    }

    /// Serve a request cache-first.
    ///
    /// - cross-origin: [`HandleOutcome::Bypass`]
    /// - hit in shell, then dynamic: the stored response, no network
    /// - miss: the network response; a `GET` answered with 200 is copied into
    ///   the dynamic generation in the background
    /// - network failure on a navigation: the shell's root document
    pub async fn handle(&self, request: &Request) -> Result<HandleOutcome> {
        if !self.is_same_origin(&request.url) {
            debug!("[CacheManager] Bypassing cross-origin {}", request.url);
            return Ok(HandleOutcome::Bypass);
        }

        let key = request.cache_key();
        if request.method == Method::Get {
            if let Some((generation, response)) = self.lookup(&key) {
                debug!("[CacheManager] Hit {} in {}", key, generation);
                return Ok(HandleOutcome::Served {
                    response,
                    source: ResponseSource::CacheHit { generation },
                });
            }
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if request.method == Method::Get && response.is_ok() {
                    self.populate(key, response.clone());
                }
                Ok(HandleOutcome::Served {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                if request.is_navigation() {
                    if let Some(root) = self.shell_root() {
                        info!("[CacheManager] Offline; serving shell for {}", request.url);
                        return Ok(HandleOutcome::Served {
                            response: root,
                            source: ResponseSource::ShellFallback,
                        });
                    }
                }
                Err(FieldError::NetworkUnavailable {
                    url: request.url.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Wait for every background population task started so far.
    pub async fn settle(&self) {
        loop {
            let mut tasks = match self.population.lock() {
                Ok(mut guard) => std::mem::take(&mut *guard),
                Err(_) => return,
            };
            if tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("[CacheManager] Population task failed: {}", e);
                }
            }
        }
    }

    /// Population tasks not yet joined. Finished tasks are reaped on the next miss.
    pub fn pending_population(&self) -> usize {
        self.population.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    /// Total stored body bytes across every generation, active or not.
    pub fn footprint(&self) -> Result<u64> {
        let generations = self
            .storage
            .generations()
            .map_err(|e| cache_error("*", "", e))?;
        let mut total = 0u64;
        for generation in generations {
            total += self
                .storage
                .size(&generation)
                .map_err(|e| cache_error(&generation, "", e))?;
        }
        Ok(total)
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    fn lookup(&self, key: &str) -> Option<(String, Response)> {
        for generation in [
            self.config.shell_generation(),
            self.config.dynamic_generation(),
        ] {
            match self.storage.get(&generation, key) {
                Ok(Some(response)) => return Some((generation, response)),
                Ok(None) => {}
                Err(e) => warn!("[CacheManager] Lookup in {} failed: {}", generation, e),
            }
        }
        None
    }

    fn shell_root(&self) -> Option<Response> {
        let root = self.url_for("/").ok()?;
        self.storage
            .get(&self.config.shell_generation(), &Request::get(root).cache_key())
            .ok()
            .flatten()
    }

    fn populate(&self, key: String, response: Response) {
        let storage = Arc::clone(&self.storage);
        let generation = self.config.dynamic_generation();

        let Ok(mut tasks) = self.population.lock() else {
            return;
        };
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                warn!("[CacheManager] Population task failed: {}", e);
            }
        }
        tasks.spawn_blocking(move || match storage.put(&generation, &key, &response) {
            Ok(()) => debug!("[CacheManager] Cached {} in {}", key, generation),
            Err(StorageError::MissingGeneration(_)) => {
                debug!("[CacheManager] {} was swept; dropping {}", generation, key)
            }
            Err(e) => warn!("[CacheManager] {}", cache_error(&generation, &key, e)),
        });
    }
}

fn cache_error(generation: &str, key: &str, err: StorageError) -> FieldError {
    FieldError::CacheWriteFailed {
        generation: generation.to_string(),
        key: key.to_string(),
        message: err.to_string(),
    }
}
