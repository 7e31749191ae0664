//! REST client implementing [`edgeindex::SearchBackend`] against an
//! Elasticsearch-compatible cluster.
//!
//! ```rust,no_run
//! use edgeindex::{EntityIndexManager, IndexConfig};
//! use edgeindex_http::HttpBackend;
//! use std::sync::Arc;
//!
//! # fn main() -> edgeindex::Result<()> {
//! let backend = Arc::new(HttpBackend::from_env()?);
//! let manager = EntityIndexManager::new(IndexConfig::from_env(), backend)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod wire;

pub use client::{map_transport, HttpBackend};
pub use config::HttpBackendConfig;
