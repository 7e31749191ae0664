use crate::error::{IndexError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which queue implementation backs the index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferBackend {
    /// Bounded in-process channel. Messages do not survive a restart.
    Memory,
    /// Append-only journal on local disk with ack/release semantics.
    Journal,
}

impl BufferBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Some(BufferBackend::Memory),
            "journal" | "durable" => Some(BufferBackend::Journal),
            _ => None,
        }
    }
}

/// Tunables for the indexing pipeline and the query layer, loaded from
/// `EDGEINDEX_*` environment variables.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub queue_capacity: usize,
    pub offer_timeout_ms: u64,
    /// Max messages a consumer drains per take.
    pub buffer_size: usize,
    pub buffer_timeout_ms: u64,
    /// Max operations per bulk request sent to the backend.
    pub max_bulk_size: usize,
    pub worker_count: usize,
    pub failure_retry_ms: u64,
    pub overload_backoff_ms: u64,
    /// Connectivity failures tolerated before the backend client is recycled.
    pub max_failures: usize,
    pub alias_cache_refresh_secs: u64,
    pub alias_cache_size: usize,
    pub cursor_ttl_minutes: u64,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub index_prefix: String,
    pub keyspace: String,
    pub index_suffix: String,
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
    pub forced_refresh: bool,
    pub query_timeout_ms: u64,
    pub scroll_keep_alive_ms: u64,
    pub buffer_backend: BufferBackend,
    pub journal_dir: PathBuf,
    pub journal_batch_limit: usize,
    /// Receives allowed per journal message before a retryable failure drops it.
    pub max_deliveries: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            queue_capacity: 1000,
            offer_timeout_ms: 1000,
            buffer_size: 100,
            buffer_timeout_ms: 250,
            max_bulk_size: 500,
            worker_count: 1,
            failure_retry_ms: 1000,
            overload_backoff_ms: 2000,
            max_failures: 20,
            alias_cache_refresh_secs: 60,
            alias_cache_size: 1000,
            cursor_ttl_minutes: 2,
            default_page_size: 10,
            max_page_size: 1000,
            index_prefix: "usergrid".to_string(),
            keyspace: "usergrid_applications".to_string(),
            index_suffix: "applications_1".to_string(),
            number_of_shards: 6,
            number_of_replicas: 1,
            forced_refresh: false,
            query_timeout_ms: 5000,
            scroll_keep_alive_ms: 6000,
            buffer_backend: BufferBackend::Memory,
            journal_dir: PathBuf::from("./data/index-journal"),
            journal_batch_limit: 10,
            max_deliveries: 5,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl IndexConfig {
    pub fn from_env() -> Self {
        let d = IndexConfig::default();
        IndexConfig {
            queue_capacity: env_parse("EDGEINDEX_QUEUE_CAPACITY", d.queue_capacity),
            offer_timeout_ms: env_parse("EDGEINDEX_OFFER_TIMEOUT_MS", d.offer_timeout_ms),
            buffer_size: env_parse("EDGEINDEX_BUFFER_SIZE", d.buffer_size),
            buffer_timeout_ms: env_parse("EDGEINDEX_BUFFER_TIMEOUT_MS", d.buffer_timeout_ms),
            max_bulk_size: env_parse("EDGEINDEX_MAX_BULK_SIZE", d.max_bulk_size),
            worker_count: env_parse("EDGEINDEX_WORKER_COUNT", d.worker_count),
            failure_retry_ms: env_parse("EDGEINDEX_FAILURE_RETRY_MS", d.failure_retry_ms),
            overload_backoff_ms: env_parse("EDGEINDEX_OVERLOAD_BACKOFF_MS", d.overload_backoff_ms),
            max_failures: env_parse("EDGEINDEX_MAX_FAILURES", d.max_failures),
            alias_cache_refresh_secs: env_parse(
                "EDGEINDEX_ALIAS_CACHE_REFRESH_SECS",
                d.alias_cache_refresh_secs,
            ),
            alias_cache_size: env_parse("EDGEINDEX_ALIAS_CACHE_SIZE", d.alias_cache_size),
            cursor_ttl_minutes: env_parse("EDGEINDEX_CURSOR_TTL_MINUTES", d.cursor_ttl_minutes),
            default_page_size: env_parse("EDGEINDEX_DEFAULT_PAGE_SIZE", d.default_page_size),
            max_page_size: env_parse("EDGEINDEX_MAX_PAGE_SIZE", d.max_page_size),
            index_prefix: env::var("EDGEINDEX_INDEX_PREFIX").unwrap_or(d.index_prefix),
            keyspace: env::var("EDGEINDEX_KEYSPACE").unwrap_or(d.keyspace),
            index_suffix: env::var("EDGEINDEX_INDEX_SUFFIX").unwrap_or(d.index_suffix),
            number_of_shards: env_parse("EDGEINDEX_NUMBER_OF_SHARDS", d.number_of_shards),
            number_of_replicas: env_parse("EDGEINDEX_NUMBER_OF_REPLICAS", d.number_of_replicas),
            forced_refresh: env::var("EDGEINDEX_FORCED_REFRESH")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(d.forced_refresh),
            query_timeout_ms: env_parse("EDGEINDEX_QUERY_TIMEOUT_MS", d.query_timeout_ms),
            scroll_keep_alive_ms: env_parse(
                "EDGEINDEX_SCROLL_KEEP_ALIVE_MS",
                d.scroll_keep_alive_ms,
            ),
            buffer_backend: env::var("EDGEINDEX_BUFFER_BACKEND")
                .ok()
                .and_then(|v| BufferBackend::parse(&v))
                .unwrap_or(d.buffer_backend),
            journal_dir: env::var("EDGEINDEX_JOURNAL_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.journal_dir),
            journal_batch_limit: env_parse("EDGEINDEX_JOURNAL_BATCH_LIMIT", d.journal_batch_limit),
            max_deliveries: env_parse("EDGEINDEX_MAX_DELIVERIES", d.max_deliveries),
        }
    }

    /// Config tuned for tests: short timeouts, no backoff, refresh on every bulk.
    pub fn for_tests() -> Self {
        IndexConfig {
            queue_capacity: 100,
            offer_timeout_ms: 50,
            buffer_timeout_ms: 10,
            failure_retry_ms: 10,
            overload_backoff_ms: 10,
            forced_refresh: true,
            ..IndexConfig::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("queue_capacity", self.queue_capacity),
            ("buffer_size", self.buffer_size),
            ("max_bulk_size", self.max_bulk_size),
            ("worker_count", self.worker_count),
            ("alias_cache_size", self.alias_cache_size),
            ("default_page_size", self.default_page_size),
            ("max_page_size", self.max_page_size),
            ("journal_batch_limit", self.journal_batch_limit),
            ("max_deliveries", self.max_deliveries as usize),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(IndexError::Config(format!("{} must be greater than 0", name)));
            }
        }
        if self.default_page_size > self.max_page_size {
            return Err(IndexError::Config(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.index_prefix.trim().is_empty() && self.keyspace.trim().is_empty() {
            return Err(IndexError::Config(
                "index_prefix and keyspace cannot both be empty".to_string(),
            ));
        }
        if self.index_suffix.trim().is_empty() {
            return Err(IndexError::Config("index_suffix cannot be empty".to_string()));
        }
        if self.number_of_shards == 0 {
            return Err(IndexError::Config("number_of_shards must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }

    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }

    pub fn failure_retry(&self) -> Duration {
        Duration::from_millis(self.failure_retry_ms)
    }

    pub fn overload_backoff(&self) -> Duration {
        Duration::from_millis(self.overload_backoff_ms)
    }

    pub fn alias_cache_refresh(&self) -> Duration {
        Duration::from_secs(self.alias_cache_refresh_secs)
    }

    pub fn cursor_ttl(&self) -> Duration {
        Duration::from_secs(self.cursor_ttl_minutes * 60)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn scroll_keep_alive(&self) -> Duration {
        Duration::from_millis(self.scroll_keep_alive_ms)
    }

    /// Clamp a caller-supplied page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}
