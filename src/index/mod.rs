//! The write pipeline and the per-application index facade.
//!
//! Producers build an [`EntityIndexBatch`], which flattens entities into
//! documents and offers one [`IndexOperationMessage`] to a [`BufferQueue`].
//! The [`IndexBufferConsumer`] drains the queue in windows and writes bulk
//! requests to the backend, resolving each message's completion handle.

pub mod alias;
pub mod batch;
pub mod buffer;
pub mod consumer;
pub mod document;
pub mod entity_index;
pub mod failure;
pub mod fields;
pub mod journal;
pub mod manager;
pub mod operations;

pub use alias::{AliasCache, AliasType, IndexAlias, IndexLocationStrategy};
pub use batch::EntityIndexBatch;
pub use buffer::{BufferQueue, InMemoryBufferQueue};
pub use consumer::{ConsumerStatsSnapshot, IndexBufferConsumer};
pub use document::IndexDocument;
pub use entity_index::{EntityIndex, IndexServices};
pub use failure::FailureMonitor;
pub use journal::{BrokerBufferQueue, JournalBroker, QueueBroker};
pub use manager::EntityIndexManager;
pub use operations::{CompletionHandle, DeIndexOperation, IndexOperation, IndexOperationMessage};
