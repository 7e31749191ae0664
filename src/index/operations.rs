//! Index/de-index commands and the message that batches them.

use crate::error::{IndexError, Result};
use crate::index::document::IndexDocument;
use crate::types::{EntityId, Version};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::oneshot;

/// Upsert `document` through `write_alias`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexOperation {
    pub write_alias: String,
    pub document_id: String,
    pub document: IndexDocument,
}

impl IndexOperation {
    pub fn new(write_alias: impl Into<String>, document: IndexDocument) -> Self {
        IndexOperation {
            write_alias: write_alias.into(),
            document_id: document.id.clone(),
            document,
        }
    }
}

/// Delete `document_id` from every index in `indices`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeIndexOperation {
    pub indices: Vec<String>,
    pub document_id: String,
    pub entity_id: EntityId,
    pub version: Version,
}

impl DeIndexOperation {
    pub fn new(
        indices: Vec<String>,
        document_id: impl Into<String>,
        entity_id: EntityId,
        version: Version,
    ) -> Self {
        DeIndexOperation {
            indices,
            document_id: document_id.into(),
            entity_id,
            version,
        }
    }
}

/// Sending half of a message's completion channel.
///
/// Resolves at most once. Dropping an unresolved signal rejects the handle, so
/// a message lost anywhere in the pipeline never leaves its producer waiting.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    tx: Option<oneshot::Sender<Result<()>>>,
}

impl CompletionSignal {
    fn resolve(&mut self, result: Result<()>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    fn is_pending(&self) -> bool {
        self.tx.is_some()
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(IndexError::Closed(
                "index message dropped before completion".to_string(),
            )));
        }
    }
}

/// What a producer awaits after handing a message to the buffer.
#[derive(Debug)]
pub struct CompletionHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl CompletionHandle {
    /// A handle that is already resolved, for messages with nothing to do.
    pub fn resolved(result: Result<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        CompletionHandle { rx }
    }

    pub async fn wait(self) -> Result<()> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(IndexError::Closed("completion channel closed".to_string())))
    }

    /// Non-blocking poll. `None` while the message is still in flight.
    pub fn try_result(&mut self) -> Option<Result<()>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(IndexError::Closed(
                "completion channel closed".to_string(),
            ))),
        }
    }
}

/// A batch of index and de-index operations with a completion handle.
///
/// Operations are sets, so adding the same operation twice is a no-op.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexOperationMessage {
    index_requests: HashSet<IndexOperation>,
    deindex_requests: HashSet<DeIndexOperation>,
    created_at: i64,
    #[serde(skip)]
    signal: CompletionSignal,
    #[serde(skip)]
    handle: Option<CompletionHandle>,
    #[serde(skip)]
    receipt: Option<u64>,
    #[serde(skip)]
    deliveries: u32,
}

impl Default for IndexOperationMessage {
    fn default() -> Self {
        IndexOperationMessage::new()
    }
}

impl IndexOperationMessage {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        IndexOperationMessage {
            index_requests: HashSet::new(),
            deindex_requests: HashSet::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
            signal: CompletionSignal { tx: Some(tx) },
            handle: Some(CompletionHandle { rx }),
            receipt: None,
            deliveries: 0,
        }
    }

    pub fn add_index_request(&mut self, op: IndexOperation) {
        self.index_requests.insert(op);
    }

    pub fn add_deindex_request(&mut self, op: DeIndexOperation) {
        self.deindex_requests.insert(op);
    }

    /// Merge another message's operations into this one.
    pub fn ingest(&mut self, other: IndexOperationMessage) {
        self.index_requests.extend(other.index_requests.iter().cloned());
        self.deindex_requests.extend(other.deindex_requests.iter().cloned());
    }

    pub fn index_requests(&self) -> &HashSet<IndexOperation> {
        &self.index_requests
    }

    pub fn deindex_requests(&self) -> &HashSet<DeIndexOperation> {
        &self.deindex_requests
    }

    pub fn is_empty(&self) -> bool {
        self.index_requests.is_empty() && self.deindex_requests.is_empty()
    }

    pub fn operation_count(&self) -> usize {
        self.index_requests.len() + self.deindex_requests.len()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn age_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.created_at
    }

    /// Take the completion handle. Only the first call returns it.
    pub fn completion(&mut self) -> Option<CompletionHandle> {
        self.handle.take()
    }

    /// Resolve the completion handle. Later calls are ignored; returns whether
    /// this call did the resolving.
    pub fn resolve(&mut self, result: Result<()>) -> bool {
        self.signal.resolve(result)
    }

    pub fn is_pending(&self) -> bool {
        self.signal.is_pending()
    }

    /// Broker receipt, set on messages that came back from a durable queue.
    pub fn receipt(&self) -> Option<u64> {
        self.receipt
    }

    /// Times the broker has handed this message out, 0 if it never went
    /// through one.
    pub fn deliveries(&self) -> u32 {
        self.deliveries
    }

    pub(crate) fn set_receipt(&mut self, receipt: u64, deliveries: u32) {
        self.receipt = Some(receipt);
        self.deliveries = deliveries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deindex(doc: &str) -> DeIndexOperation {
        DeIndexOperation::new(
            vec!["idx".to_string()],
            doc,
            EntityId::generate("user"),
            Version::now(),
        )
    }

    #[test]
    fn duplicate_operations_coalesce() {
        let mut msg = IndexOperationMessage::new();
        let op = deindex("a");
        msg.add_deindex_request(op.clone());
        msg.add_deindex_request(op);
        assert_eq!(msg.operation_count(), 1);
        assert!(!msg.is_empty());
    }

    #[tokio::test]
    async fn resolves_exactly_once() {
        let mut msg = IndexOperationMessage::new();
        let handle = msg.completion().unwrap();
        assert!(msg.completion().is_none());
        assert!(msg.resolve(Ok(())));
        assert!(!msg.resolve(Err(IndexError::Backend("late".into()))));
        assert_eq!(handle.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn dropping_unresolved_message_rejects_handle() {
        let mut msg = IndexOperationMessage::new();
        let handle = msg.completion().unwrap();
        drop(msg);
        assert!(matches!(handle.wait().await, Err(IndexError::Closed(_))));
    }

    #[test]
    fn try_result_pending_then_ready() {
        let mut msg = IndexOperationMessage::new();
        let mut handle = msg.completion().unwrap();
        assert!(handle.try_result().is_none());
        msg.resolve(Err(IndexError::Overloaded("busy".into())));
        assert_eq!(
            handle.try_result(),
            Some(Err(IndexError::Overloaded("busy".into())))
        );
    }

    #[test]
    fn serialized_message_keeps_operations_only() {
        let mut msg = IndexOperationMessage::new();
        msg.add_deindex_request(deindex("x"));
        let json = serde_json::to_string(&msg).unwrap();
        let mut back: IndexOperationMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.deindex_requests(), msg.deindex_requests());
        // Rehydrated messages have no producer waiting on them.
        assert!(back.completion().is_none());
        assert!(!back.resolve(Ok(())));
        msg.resolve(Ok(()));
    }
}
