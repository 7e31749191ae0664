//! External cursors over backend continuation tokens.
//!
//! Callers never see the backend's scroll id. A cursor is an opaque key
//! that maps to the token and the page size it was minted for, and expires
//! after the configured TTL.

use crate::error::{IndexError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    /// Backend continuation token.
    pub token: String,
    pub page_size: usize,
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn put(&self, key: &str, record: CursorRecord, ttl: Duration) -> Result<()>;

    /// `None` when the key is unknown or expired.
    async fn get(&self, key: &str) -> Result<Option<CursorRecord>>;

    async fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryCursorStore {
    entries: DashMap<String, (CursorRecord, Instant)>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        MemoryCursorStore::default()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn put(&self, key: &str, record: CursorRecord, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), (record, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CursorRecord>> {
        let hit = self
            .entries
            .get(key)
            .map(|e| (e.value().0.clone(), e.value().1));
        match hit {
            Some((record, expires_at)) if expires_at > Instant::now() => Ok(Some(record)),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct CursorManager {
    store: Arc<dyn CursorStore>,
    ttl: Duration,
}

impl CursorManager {
    pub fn new(store: Arc<dyn CursorStore>, ttl: Duration) -> Self {
        CursorManager { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a cursor for the page just returned. A short page means the
    /// results are exhausted, so no cursor is issued.
    pub async fn mint(
        &self,
        token: Option<&str>,
        hits: usize,
        page_size: usize,
    ) -> Result<Option<String>> {
        let Some(token) = token else {
            return Ok(None);
        };
        if hits < page_size {
            return Ok(None);
        }
        let key = URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
        self.store
            .put(
                &key,
                CursorRecord {
                    token: token.to_string(),
                    page_size,
                },
                self.ttl,
            )
            .await?;
        tracing::debug!("[CURSOR] minted {} for page of {}", key, page_size);
        Ok(Some(key))
    }

    /// # Errors
    /// [`IndexError::CursorNotFound`] for a malformed, unknown or expired cursor.
    pub async fn resolve(&self, cursor: &str) -> Result<CursorRecord> {
        let well_formed = URL_SAFE_NO_PAD
            .decode(cursor)
            .map(|bytes| bytes.len() == 16)
            .unwrap_or(false);
        if !well_formed {
            return Err(IndexError::CursorNotFound(format!(
                "malformed cursor '{}'",
                cursor
            )));
        }
        self.store.get(cursor).await?.ok_or_else(|| {
            tracing::debug!("[CURSOR] {} unknown or expired", cursor);
            IndexError::CursorNotFound(format!("cursor '{}' not found or expired", cursor))
        })
    }

    pub async fn discard(&self, cursor: &str) -> Result<()> {
        self.store.remove(cursor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(ttl: Duration) -> (CursorManager, Arc<MemoryCursorStore>) {
        let store = Arc::new(MemoryCursorStore::new());
        (CursorManager::new(store.clone(), ttl), store)
    }

    #[tokio::test]
    async fn test_short_page_gets_no_cursor() {
        let (m, store) = manager(Duration::from_secs(60));
        assert_eq!(m.mint(Some("scroll-1"), 3, 5).await.unwrap(), None);
        assert_eq!(m.mint(None, 5, 5).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_full_page_round_trips() {
        let (m, _) = manager(Duration::from_secs(60));
        let cursor = m.mint(Some("scroll-1"), 5, 5).await.unwrap().unwrap();
        assert!(!cursor.contains("scroll-1"));
        let record = m.resolve(&cursor).await.unwrap();
        assert_eq!(
            record,
            CursorRecord {
                token: "scroll-1".into(),
                page_size: 5
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_cursors() {
        let (m, _) = manager(Duration::from_secs(60));
        let unknown = URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
        assert!(matches!(
            m.resolve(&unknown).await,
            Err(IndexError::CursorNotFound(_))
        ));
        assert!(matches!(
            m.resolve("not a cursor!").await,
            Err(IndexError::CursorNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_expires() {
        let (m, store) = manager(Duration::from_secs(120));
        let cursor = m.mint(Some("t"), 2, 2).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(m.resolve(&cursor).await.is_ok());
        tokio::time::advance(Duration::from_secs(61)).await;
        let err = m.resolve(&cursor).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(store.purge_expired(), 0);
    }
}
