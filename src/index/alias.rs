//! Tenant-to-index naming and the alias resolution cache.
//!
//! Every application reads through `{root}_{app}_read_alias` and writes
//! through `{root}_{app}_write_alias`. The aliases point at physical indices
//! named `{root}_{suffix}`, so a rebuild can create a new index and flip the
//! aliases without callers noticing.

use crate::backend::SearchBackend;
use crate::config::IndexConfig;
use crate::error::Result;
use crate::types::ApplicationScope;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Token that should appear at most once in an index root.
pub const DEFAULT_NAME_TOKEN: &str = "usergrid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasType {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexAlias {
    pub read_alias: String,
    pub write_alias: String,
}

impl IndexAlias {
    pub fn name(&self, alias_type: AliasType) -> &str {
        match alias_type {
            AliasType::Read => &self.read_alias,
            AliasType::Write => &self.write_alias,
        }
    }
}

/// `{prefix}_{keyspace}`, lower-cased, without repeating the default token
/// when both halves carry it.
pub fn index_root(prefix: &str, keyspace: &str) -> String {
    let prefix = prefix.trim().to_lowercase();
    let mut keyspace = keyspace.trim().to_lowercase();
    if prefix.contains(DEFAULT_NAME_TOKEN) && keyspace.contains(DEFAULT_NAME_TOKEN) {
        keyspace = keyspace
            .replacen(DEFAULT_NAME_TOKEN, "", 1)
            .trim_matches('_')
            .to_string();
    }
    [prefix, keyspace]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Where one application's documents live.
#[derive(Debug, Clone)]
pub struct IndexLocationStrategy {
    scope: ApplicationScope,
    root: String,
    suffix: String,
    number_of_shards: u32,
    number_of_replicas: u32,
}

impl IndexLocationStrategy {
    pub fn new(config: &IndexConfig, scope: ApplicationScope) -> Self {
        IndexLocationStrategy {
            scope,
            root: index_root(&config.index_prefix, &config.keyspace),
            suffix: config.index_suffix.to_lowercase(),
            number_of_shards: config.number_of_shards,
            number_of_replicas: config.number_of_replicas,
        }
    }

    pub fn application_scope(&self) -> &ApplicationScope {
        &self.scope
    }

    pub fn index_root(&self) -> &str {
        &self.root
    }

    pub fn alias(&self) -> IndexAlias {
        let base = format!("{}_{}", self.root, self.scope.application.uuid);
        IndexAlias {
            read_alias: format!("{}_read_alias", base),
            write_alias: format!("{}_write_alias", base),
        }
    }

    /// Physical index for the configured suffix, or an explicit one.
    pub fn index_name(&self, suffix: Option<&str>) -> String {
        let suffix = suffix
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.suffix.clone());
        format!("{}_{}", self.root, suffix)
    }

    pub fn number_of_shards(&self) -> u32 {
        self.number_of_shards
    }

    pub fn number_of_replicas(&self) -> u32 {
        self.number_of_replicas
    }
}

#[derive(Debug, Clone)]
struct CachedAlias {
    indices: Arc<Vec<String>>,
    refreshed_at: Instant,
}

/// Alias name → physical indices, with stale-while-revalidate refresh.
///
/// A cold miss loads synchronously. An entry older than the refresh interval
/// is returned as-is while a reload runs in the background.
#[derive(Clone)]
pub struct AliasCache {
    backend: Arc<dyn SearchBackend>,
    entries: Arc<DashMap<String, CachedAlias>>,
    refreshing: Arc<DashMap<String, ()>>,
    refresh_interval: Duration,
    max_entries: usize,
}

impl AliasCache {
    pub fn new(backend: Arc<dyn SearchBackend>, refresh_interval: Duration, max_entries: usize) -> Self {
        AliasCache {
            backend,
            entries: Arc::new(DashMap::new()),
            refreshing: Arc::new(DashMap::new()),
            refresh_interval,
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(backend: Arc<dyn SearchBackend>, config: &IndexConfig) -> Self {
        AliasCache::new(backend, config.alias_cache_refresh(), config.alias_cache_size)
    }

    pub async fn get_indexes(&self, alias: &IndexAlias, alias_type: AliasType) -> Result<Vec<String>> {
        let name = alias.name(alias_type);
        let cached = self.entries.get(name).map(|e| e.value().clone());
        match cached {
            Some(entry) => {
                if entry.refreshed_at.elapsed() >= self.refresh_interval {
                    self.schedule_refresh(name.to_string());
                }
                Ok(entry.indices.as_ref().clone())
            }
            None => self.load(name).await,
        }
    }

    /// Read and write targets together, deduplicated.
    pub async fn unique_indexes(&self, alias: &IndexAlias) -> Result<Vec<String>> {
        let mut indices = self.get_indexes(alias, AliasType::Read).await?;
        indices.extend(self.get_indexes(alias, AliasType::Write).await?);
        indices.sort();
        indices.dedup();
        Ok(indices)
    }

    async fn load(&self, name: &str) -> Result<Vec<String>> {
        let mut indices = self.backend.get_alias_indices(name).await?;
        indices.sort();
        self.insert(name.to_string(), indices.clone());
        Ok(indices)
    }

    fn insert(&self, name: String, indices: Vec<String>) {
        self.entries.insert(
            name,
            CachedAlias {
                indices: Arc::new(indices),
                refreshed_at: Instant::now(),
            },
        );
        self.evict_over_capacity();
    }

    fn evict_over_capacity(&self) {
        while self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().refreshed_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn schedule_refresh(&self, name: String) {
        if self.refreshing.insert(name.clone(), ()).is_some() {
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            match cache.backend.get_alias_indices(&name).await {
                Ok(mut indices) => {
                    indices.sort();
                    // An invalidation during the reload wins.
                    if cache.entries.contains_key(&name) {
                        cache.insert(name.clone(), indices);
                    }
                }
                Err(e) => {
                    tracing::warn!("[ALIAS] background refresh of {} failed: {}", name, e)
                }
            }
            cache.refreshing.remove(&name);
        });
    }

    /// Reload every cached alias now.
    pub async fn refresh_all(&self) {
        let names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Err(e) = self.load(&name).await {
                tracing::warn!("[ALIAS] refresh of {} failed: {}", name, e);
            }
        }
    }

    /// Periodically reload every cached alias. Runs until the handle is aborted.
    pub fn spawn_refresher(&self) -> JoinHandle<()> {
        let cache = self.clone();
        let period = self.refresh_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.refresh_all().await;
            }
        })
    }

    pub fn invalidate(&self, alias: &IndexAlias) {
        tracing::debug!(
            "[ALIAS] invalidating {} and {}",
            alias.read_alias,
            alias.write_alias
        );
        self.entries.remove(&alias.read_alias);
        self.entries.remove(&alias.write_alias);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
