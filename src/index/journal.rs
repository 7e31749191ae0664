//! Durable buffer backing: a local append-only journal with broker-style
//! receive/delete/release semantics.
//!
//! Messages are appended as JSONL entries to `segment_NNNN.jsonl`; deletions
//! are appended to `acked.log`. On reopen every entry without an ack is
//! delivered again, so a crash between receive and delete means redelivery,
//! never loss.

use crate::error::{IndexError, Result};
use crate::index::buffer::BufferQueue;
use crate::index::operations::IndexOperationMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

const SEGMENT_MAX_BYTES: u64 = 10 * 1024 * 1024;
const ACK_LOG: &str = "acked.log";

/// A message handed out by a broker. `receipt` is what gets deleted or
/// released afterwards; `deliveries` counts receives, this one included.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub receipt: u64,
    pub body: String,
    pub deliveries: u32,
}

/// Minimal interface of an external message broker.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    async fn send(&self, body: String) -> Result<u64>;

    /// Up to `max` messages, long-polling for at most `wait`.
    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<BrokerMessage>>;

    /// Permanently remove processed messages.
    async fn delete(&self, receipts: &[u64]) -> Result<()>;

    /// Make received messages visible again once `delay` has passed.
    async fn release(&self, receipts: &[u64], delay: Duration) -> Result<()>;

    /// Largest batch a single receive will return.
    fn batch_limit(&self) -> usize;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub timestamp_ms: i64,
    pub node_id: String,
    pub body: String,
}

struct ActiveSegment {
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
    id: u32,
}

impl ActiveSegment {
    fn rotate(&mut self, dir: &Path) -> Result<()> {
        self.writer.flush()?;
        self.id += 1;
        let new_path = dir.join(format!("segment_{:04}.jsonl", self.id));
        self.writer = BufWriter::new(append_file(&new_path)?);
        self.path = new_path;
        self.size = 0;
        Ok(())
    }
}

struct JournalState {
    seq: u64,
    segment: ActiveSegment,
    acks: BufWriter<File>,
    pending: VecDeque<u64>,
    /// Released with a delay; moved back to `pending` once due.
    delayed: Vec<(Instant, u64)>,
    in_flight: HashSet<u64>,
    deliveries: HashMap<u64, u32>,
    bodies: HashMap<u64, String>,
}

impl JournalState {
    fn promote_due(&mut self, now: Instant) {
        let mut due = Vec::new();
        self.delayed.retain(|&(at, seq)| {
            if at <= now {
                due.push(seq);
                false
            } else {
                true
            }
        });
        due.sort_unstable();
        for seq in due.into_iter().rev() {
            self.pending.push_front(seq);
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }
}

pub struct JournalBroker {
    dir: PathBuf,
    node_id: String,
    batch_limit: usize,
    state: Arc<Mutex<JournalState>>,
    notify: Notify,
}

fn segment_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut segments: Vec<(u32, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            let id = name
                .strip_prefix("segment_")
                .and_then(|s| s.strip_suffix(".jsonl"))?
                .parse::<u32>()
                .ok()?;
            Some((id, e.path()))
        })
        .collect();
    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}

fn read_entries(path: &Path) -> Result<Vec<JournalEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("[JOURNAL] skipping torn entry in {}: {}", path.display(), e),
        }
    }
    Ok(entries)
}

fn read_acks(path: &Path) -> Result<HashSet<u64>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut acked = HashSet::new();
    for line in reader.lines() {
        if let Ok(seq) = line?.trim().parse::<u64>() {
            acked.insert(seq);
        }
    }
    Ok(acked)
}

fn append_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn lock_state(state: &Mutex<JournalState>) -> Result<MutexGuard<'_, JournalState>> {
    state
        .lock()
        .map_err(|_| IndexError::Io("journal state lock poisoned".to_string()))
}

impl JournalBroker {
    pub fn open(dir: &Path, batch_limit: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let segments = segment_files(dir)?;
        let acked = read_acks(&dir.join(ACK_LOG))?;
        let mut max_seq = 0u64;
        let mut bodies = HashMap::new();
        for (_, path) in &segments {
            for entry in read_entries(path)? {
                max_seq = max_seq.max(entry.seq);
                if !acked.contains(&entry.seq) {
                    bodies.insert(entry.seq, entry.body);
                }
            }
        }
        let mut pending: Vec<u64> = bodies.keys().copied().collect();
        pending.sort_unstable();

        let seg_id = segments.last().map(|(id, _)| *id).unwrap_or(1);
        let seg_path = dir.join(format!("segment_{:04}.jsonl", seg_id));
        let seg_size = seg_path.metadata().map(|m| m.len()).unwrap_or(0);

        if !pending.is_empty() {
            tracing::info!(
                "[JOURNAL] reopened {} with {} undelivered messages, seq={}",
                dir.display(),
                pending.len(),
                max_seq
            );
        }

        let node_id = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());

        Ok(JournalBroker {
            dir: dir.to_path_buf(),
            node_id,
            batch_limit: batch_limit.max(1),
            state: Arc::new(Mutex::new(JournalState {
                seq: max_seq,
                segment: ActiveSegment {
                    writer: BufWriter::new(append_file(&seg_path)?),
                    path: seg_path,
                    size: seg_size,
                    id: seg_id,
                },
                acks: BufWriter::new(append_file(&dir.join(ACK_LOG))?),
                pending: pending.into(),
                delayed: Vec::new(),
                in_flight: HashSet::new(),
                deliveries: HashMap::new(),
                bodies,
            })),
            notify: Notify::new(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, JournalState>> {
        lock_state(&self.state)
    }

    /// Run file I/O against the journal state on the blocking pool.
    async fn with_state_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut JournalState) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock_state(&state)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| IndexError::Io(format!("journal task join error: {}", e)))?
    }

    pub fn current_seq(&self) -> u64 {
        self.lock().map(|s| s.seq).unwrap_or(0)
    }

    /// Messages waiting to be received, including delayed redeliveries.
    pub fn pending_count(&self) -> usize {
        self.lock()
            .map(|s| s.pending.len() + s.delayed.len())
            .unwrap_or(0)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Remove closed segments whose entries are all acked, and rewrite the ack
    /// log to cover only what is left. Returns the number of segments removed.
    pub fn compact(&self) -> Result<usize> {
        let mut state = self.lock()?;
        state.acks.flush()?;
        let active = state.segment.path.clone();

        let mut removed = 0usize;
        let mut kept_acked = Vec::new();
        for (_, path) in segment_files(&self.dir)? {
            let entries = read_entries(&path)?;
            let live = entries.iter().any(|e| state.bodies.contains_key(&e.seq));
            if path != active && !live {
                fs::remove_file(&path)?;
                removed += 1;
                continue;
            }
            kept_acked.extend(
                entries
                    .iter()
                    .filter(|e| !state.bodies.contains_key(&e.seq))
                    .map(|e| e.seq),
            );
        }

        let ack_path = self.dir.join(ACK_LOG);
        let tmp_path = self.dir.join(format!("{}.tmp", ACK_LOG));
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for seq in &kept_acked {
                writeln!(tmp, "{}", seq)?;
            }
            tmp.flush()?;
        }
        fs::rename(&tmp_path, &ack_path)?;
        state.acks = BufWriter::new(append_file(&ack_path)?);

        if removed > 0 {
            tracing::info!("[JOURNAL] compacted {} segments", removed);
        }
        Ok(removed)
    }
}

#[async_trait]
impl QueueBroker for JournalBroker {
    async fn send(&self, body: String) -> Result<u64> {
        let dir = self.dir.clone();
        let node_id = self.node_id.clone();
        let seq = self
            .with_state_blocking(move |state| {
                let seq = state.seq + 1;
                let entry = JournalEntry {
                    seq,
                    timestamp_ms: chrono::Utc::now().timestamp_millis(),
                    node_id,
                    body,
                };
                let line = serde_json::to_string(&entry)?;
                let seg = &mut state.segment;
                seg.writer.write_all(line.as_bytes())?;
                seg.writer.write_all(b"\n")?;
                seg.writer.flush()?;
                seg.size += line.len() as u64 + 1;
                state.seq = seq;
                state.pending.push_back(seq);
                state.bodies.insert(seq, entry.body);
                if state.segment.size >= SEGMENT_MAX_BYTES {
                    state.segment.rotate(&dir)?;
                }
                Ok(seq)
            })
            .await?;
        self.notify.notify_waiters();
        Ok(seq)
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<BrokerMessage>> {
        let max = max.min(self.batch_limit).max(1);
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let next_due = {
                let mut state = self.lock()?;
                state.promote_due(Instant::now());
                let mut batch = Vec::new();
                while batch.len() < max {
                    let Some(seq) = state.pending.pop_front() else {
                        break;
                    };
                    if let Some(body) = state.bodies.get(&seq).cloned() {
                        state.in_flight.insert(seq);
                        let deliveries = state.deliveries.entry(seq).or_insert(0);
                        *deliveries += 1;
                        batch.push(BrokerMessage {
                            receipt: seq,
                            body,
                            deliveries: *deliveries,
                        });
                    }
                }
                if !batch.is_empty() {
                    return Ok(batch);
                }
                state.next_due()
            };
            let wake = next_due.map_or(deadline, |at| at.min(deadline));
            if timeout_at(wake, notified).await.is_err() && wake >= deadline {
                return Ok(Vec::new());
            }
        }
    }

    async fn delete(&self, receipts: &[u64]) -> Result<()> {
        let receipts = receipts.to_vec();
        self.with_state_blocking(move |state| {
            for seq in &receipts {
                writeln!(state.acks, "{}", seq)?;
            }
            state.acks.flush()?;
            for seq in &receipts {
                state.in_flight.remove(seq);
                state.deliveries.remove(seq);
                state.bodies.remove(seq);
            }
            Ok(())
        })
        .await
    }

    async fn release(&self, receipts: &[u64], delay: Duration) -> Result<()> {
        {
            let mut state = self.lock()?;
            let visible_at = Instant::now() + delay;
            for seq in receipts.iter().rev() {
                if !state.in_flight.remove(seq) {
                    continue;
                }
                if delay.is_zero() {
                    state.pending.push_front(*seq);
                } else {
                    state.delayed.push((visible_at, *seq));
                }
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }
}

/// [`BufferQueue`] over a [`QueueBroker`].
///
/// `offer` resolves the producer's handle as soon as the broker has the
/// message; from then on delivery is the broker's job. Messages that failed
/// with a retryable error are released for another attempt after
/// `retry_delay`, up to `max_deliveries` receives. Anything else is deleted
/// so it cannot come back.
pub struct BrokerBufferQueue<B: QueueBroker> {
    broker: Arc<B>,
    retry_delay: Duration,
    max_deliveries: u32,
}

impl<B: QueueBroker> BrokerBufferQueue<B> {
    pub fn new(broker: Arc<B>) -> Self {
        BrokerBufferQueue {
            broker,
            retry_delay: Duration::from_secs(1),
            max_deliveries: 5,
        }
    }

    pub fn with_redelivery(mut self, retry_delay: Duration, max_deliveries: u32) -> Self {
        self.retry_delay = retry_delay;
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    fn receipts(messages: &[IndexOperationMessage]) -> Vec<u64> {
        messages.iter().filter_map(|m| m.receipt()).collect()
    }
}

#[async_trait]
impl<B: QueueBroker + 'static> BufferQueue for BrokerBufferQueue<B> {
    async fn offer(&self, mut message: IndexOperationMessage) -> Result<()> {
        let body = match serde_json::to_string(&message) {
            Ok(body) => body,
            Err(e) => {
                let err = IndexError::from(e);
                message.resolve(Err(err.clone()));
                return Err(err);
            }
        };
        match self.broker.send(body).await {
            Ok(_) => {
                message.resolve(Ok(()));
                Ok(())
            }
            Err(e) => {
                tracing::error!("[BUF] failed to enqueue message to broker: {}", e);
                message.resolve(Err(e.clone()));
                Err(e)
            }
        }
    }

    async fn take(&self, max: usize, timeout: Duration) -> Result<Vec<IndexOperationMessage>> {
        let received = self.broker.receive(max, timeout).await?;
        let mut messages = Vec::with_capacity(received.len());
        let mut poison = Vec::new();
        for BrokerMessage {
            receipt,
            body,
            deliveries,
        } in received
        {
            match serde_json::from_str::<IndexOperationMessage>(&body) {
                Ok(mut message) => {
                    message.set_receipt(receipt, deliveries);
                    messages.push(message);
                }
                Err(e) => {
                    tracing::error!("[BUF] dropping undecodable message {}: {}", receipt, e);
                    poison.push(receipt);
                }
            }
        }
        if !poison.is_empty() {
            self.broker.delete(&poison).await?;
        }
        Ok(messages)
    }

    async fn ack(&self, messages: Vec<IndexOperationMessage>) {
        let receipts = Self::receipts(&messages);
        if let Err(e) = self.broker.delete(&receipts).await {
            tracing::error!(
                "[BUF] failed to delete {} acked messages: {}",
                receipts.len(),
                e
            );
        }
        for mut message in messages {
            message.resolve(Ok(()));
        }
    }

    async fn fail(&self, messages: Vec<IndexOperationMessage>, cause: IndexError) {
        let retryable = cause.is_retryable();
        let (retry, dropped): (Vec<_>, Vec<_>) = messages
            .iter()
            .filter_map(|m| m.receipt().map(|r| (r, m.deliveries())))
            .partition(|(_, deliveries)| retryable && *deliveries < self.max_deliveries);

        if !retry.is_empty() {
            let receipts: Vec<u64> = retry.iter().map(|(r, _)| *r).collect();
            tracing::warn!(
                "[BUF] releasing {} messages for redelivery in {}ms: {}",
                receipts.len(),
                self.retry_delay.as_millis(),
                cause
            );
            if let Err(e) = self.broker.release(&receipts, self.retry_delay).await {
                tracing::error!("[BUF] failed to release messages: {}", e);
            }
        }
        if !dropped.is_empty() {
            let receipts: Vec<u64> = dropped.iter().map(|(r, _)| *r).collect();
            tracing::error!(
                "[BUF] dropping {} messages (retryable={}, max_deliveries={}): {}",
                receipts.len(),
                retryable,
                self.max_deliveries,
                cause
            );
            if let Err(e) = self.broker.delete(&receipts).await {
                tracing::error!("[BUF] failed to delete dropped messages: {}", e);
            }
        }
        for mut message in messages {
            message.resolve(Err(cause.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn send_receive_delete() {
        let tmp = TempDir::new().unwrap();
        let broker = JournalBroker::open(tmp.path(), 10).unwrap();
        assert_eq!(broker.send("a".into()).await.unwrap(), 1);
        assert_eq!(broker.send("b".into()).await.unwrap(), 2);

        let got = broker.receive(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].body, "a");
        assert_eq!(broker.in_flight_count(), 2);

        broker.delete(&[1, 2]).await.unwrap();
        assert_eq!(broker.in_flight_count(), 0);
        assert!(broker
            .receive(10, Duration::from_millis(10))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn receive_honors_batch_limit() {
        let tmp = TempDir::new().unwrap();
        let broker = JournalBroker::open(tmp.path(), 2).unwrap();
        for i in 0..5 {
            broker.send(format!("m{}", i)).await.unwrap();
        }
        let got = broker.receive(100, Duration::from_millis(10)).await.unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn released_messages_come_back_first() {
        let tmp = TempDir::new().unwrap();
        let broker = JournalBroker::open(tmp.path(), 10).unwrap();
        broker.send("a".into()).await.unwrap();
        broker.send("b".into()).await.unwrap();
        let first = broker.receive(1, Duration::from_millis(10)).await.unwrap();
        broker
            .release(&[first[0].receipt], Duration::ZERO)
            .await
            .unwrap();
        let again = broker.receive(10, Duration::from_millis(10)).await.unwrap();
        let bodies: Vec<_> = again.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn receive_wakes_on_send() {
        let tmp = TempDir::new().unwrap();
        let broker = Arc::new(JournalBroker::open(tmp.path(), 10).unwrap());
        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.receive(10, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.send("late".into()).await.unwrap();
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn compact_drops_fully_acked_segments() {
        let tmp = TempDir::new().unwrap();
        let broker = JournalBroker::open(tmp.path(), 10).unwrap();
        broker.send("a".into()).await.unwrap();
        {
            let mut state = broker.lock().unwrap();
            state.segment.rotate(tmp.path()).unwrap();
        }
        broker.send("b".into()).await.unwrap();
        let got = broker.receive(1, Duration::from_millis(10)).await.unwrap();
        broker.delete(&[got[0].receipt]).await.unwrap();

        assert_eq!(broker.compact().unwrap(), 1);
        drop(broker);

        let reopened = JournalBroker::open(tmp.path(), 10).unwrap();
        assert_eq!(reopened.pending_count(), 1);
        assert_eq!(reopened.current_seq(), 2);
    }

    #[tokio::test]
    async fn retryable_failures_come_back_after_the_delay() {
        let tmp = TempDir::new().unwrap();
        let broker = Arc::new(JournalBroker::open(tmp.path(), 10).unwrap());
        let queue = BrokerBufferQueue::new(Arc::clone(&broker))
            .with_redelivery(Duration::from_millis(50), 5);
        queue.offer(IndexOperationMessage::new()).await.unwrap();

        let taken = queue.take(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(taken[0].deliveries(), 1);
        queue
            .fail(taken, IndexError::NoNodeAvailable("down".into()))
            .await;
        assert_eq!(broker.pending_count(), 1);
        assert_eq!(broker.in_flight_count(), 0);

        // Not visible yet.
        assert!(queue.take(10, Duration::ZERO).await.unwrap().is_empty());
        let again = queue.take(10, Duration::from_millis(500)).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].deliveries(), 2);
    }

    #[tokio::test]
    async fn rejected_messages_are_deleted_not_released() {
        let tmp = TempDir::new().unwrap();
        {
            let broker = Arc::new(JournalBroker::open(tmp.path(), 10).unwrap());
            let queue = BrokerBufferQueue::new(Arc::clone(&broker))
                .with_redelivery(Duration::ZERO, 5);
            queue.offer(IndexOperationMessage::new()).await.unwrap();
            let taken = queue.take(10, Duration::from_millis(10)).await.unwrap();
            queue
                .fail(
                    taken,
                    IndexError::BulkFailure {
                        failed: 1,
                        total: 1,
                        message: "mapper_parsing_exception".into(),
                    },
                )
                .await;
            assert_eq!(broker.pending_count(), 0);
            assert_eq!(broker.in_flight_count(), 0);
        }
        let reopened = JournalBroker::open(tmp.path(), 10).unwrap();
        assert_eq!(reopened.pending_count(), 0);
    }

    #[tokio::test]
    async fn redelivery_stops_at_max_deliveries() {
        let tmp = TempDir::new().unwrap();
        let broker = Arc::new(JournalBroker::open(tmp.path(), 10).unwrap());
        let queue = BrokerBufferQueue::new(Arc::clone(&broker)).with_redelivery(Duration::ZERO, 2);
        queue.offer(IndexOperationMessage::new()).await.unwrap();

        for _ in 0..2 {
            let taken = queue.take(10, Duration::from_millis(10)).await.unwrap();
            assert_eq!(taken.len(), 1);
            queue
                .fail(taken, IndexError::Overloaded("429".into()))
                .await;
        }
        assert_eq!(broker.pending_count(), 0);
        assert!(queue
            .take(10, Duration::from_millis(10))
            .await
            .unwrap()
            .is_empty());
    }
}
