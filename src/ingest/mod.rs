//! Ingestion batcher
//!
//! Request handlers hand enriched events to the [`Batcher`] through a bounded
//! mpsc queue. A single worker task owns the drain side of that queue, appends
//! to an in-memory buffer and flushes the buffer to the event store when it
//! reaches the batch threshold or when the idle interval elapses without a
//! flush. The worker awaits each insert before reading the queue again, so a
//! slow store fills the queue and `accept` callers wait for capacity. At most
//! one batch is ever being written.
//!
//! Lifecycle is `Running -> Draining -> Stopped`, published on a `watch`
//! channel so that `shutdown()` can wait for the worker to finish the final
//! flush.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::error::{TrackError, TrackResult};
use crate::models::{today_as_int, EnrichedEvent};
use crate::storage::EventStore;

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub max_batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
    pub insert_timeout: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for BatcherConfig {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.max(1),
            flush_interval: config.flush_interval(),
            queue_capacity: config.queue_capacity.max(1),
            insert_timeout: config.insert_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatcherState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Idle,
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushReason::Size => "size",
            FlushReason::Idle => "idle",
            FlushReason::Shutdown => "shutdown",
        })
    }
}

pub struct Batcher {
    store: Arc<dyn EventStore>,
    config: BatcherConfig,
    tx: mpsc::Sender<EnrichedEvent>,
    /// Taken by whoever drains the queue: the worker, or `shutdown()` if the
    /// worker never ran.
    rx: Mutex<Option<mpsc::Receiver<EnrichedEvent>>>,
    buffer: Mutex<Vec<EnrichedEvent>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    state: watch::Sender<BatcherState>,
}

impl Batcher {
    pub fn new(store: Arc<dyn EventStore>, config: BatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (state, _) = watch::channel(BatcherState::Running);
        let buffer = Vec::with_capacity(config.max_batch_size);

        Self {
            store,
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            buffer: Mutex::new(buffer),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            state,
        }
    }

    pub fn state(&self) -> BatcherState {
        *self.state.borrow()
    }

    /// Run the worker loop until `cancel` fires or `shutdown()` is called,
    /// then drain the queue and perform the final flush.
    ///
    /// May only be called once.
    pub async fn run(&self, cancel: CancellationToken) -> TrackResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TrackError::invalid("batcher already started"));
        }
        let mut rx = self
            .take_receiver()
            .ok_or_else(|| TrackError::invalid("batcher queue already drained"))?;

        info!(
            max_batch_size = self.config.max_batch_size,
            flush_interval = ?self.config.flush_interval,
            queue_capacity = self.config.queue_capacity,
            "Ingestion batcher started"
        );

        let _stopped = StoppedOnDrop(&self.state);
        let idle = tokio::time::sleep(self.config.flush_interval);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Some(event) => {
                        if self.push(event) >= self.config.max_batch_size {
                            self.flush(FlushReason::Size).await;
                            idle.as_mut().reset(Instant::now() + self.config.flush_interval);
                        }
                    }
                    None => break,
                },
                _ = &mut idle => {
                    self.flush(FlushReason::Idle).await;
                    idle.as_mut().reset(Instant::now() + self.config.flush_interval);
                }
            }
        }

        // A cancelled run token stops intake exactly like shutdown()
        self.shutdown.cancel();
        self.drain(rx).await;
        Ok(())
    }

    /// Enqueue one event, waiting for queue capacity if needed.
    ///
    /// Returns once the event is queued, not once it is stored.
    pub async fn accept(&self, event: EnrichedEvent, cancel: &CancellationToken) -> TrackResult<()> {
        if cancel.is_cancelled() || self.shutdown.is_cancelled() {
            return Err(TrackError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TrackError::Cancelled),
            _ = self.shutdown.cancelled() => Err(TrackError::Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| TrackError::Cancelled),
        }
    }

    /// Enqueue without waiting. A full queue drops the event.
    pub fn try_accept(&self, event: EnrichedEvent) -> TrackResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(TrackError::Cancelled);
        }

        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(site_id = %event.site_id, "Ingestion queue full, dropping event");
                Err(TrackError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TrackError::Cancelled),
        }
    }

    /// Stop intake, flush everything buffered and wait for the worker to exit.
    ///
    /// If the worker was never started the drain happens on the caller's task.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        if !self.started.swap(true, Ordering::SeqCst) {
            if let Some(rx) = self.take_receiver() {
                self.drain(rx).await;
                return;
            }
        }

        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == BatcherState::Stopped).await;
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<EnrichedEvent>> {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Append to the buffer, returning the new length.
    fn push(&self, event: EnrichedEvent) -> usize {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.push(event);
        buffer.len()
    }

    fn take_buffer(&self) -> Vec<EnrichedEvent> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *buffer, Vec::with_capacity(self.config.max_batch_size))
    }

    /// Swap the buffer out and write it. The buffer lock is released before
    /// the insert starts.
    async fn flush(&self, reason: FlushReason) {
        let batch = self.take_buffer();
        if batch.is_empty() {
            return;
        }

        let today = today_as_int();
        let rows: Vec<EnrichedEvent> = batch.into_iter().map(|e| e.stamped(today)).collect();
        debug!(reason = %reason, rows = rows.len(), "Flushing event batch");

        write_batch(self.store.as_ref(), &rows, self.config.insert_timeout, reason).await;
    }

    async fn drain(&self, mut rx: mpsc::Receiver<EnrichedEvent>) {
        self.state.send_replace(BatcherState::Draining);
        info!("Ingestion batcher draining");

        rx.close();
        while let Some(event) = rx.recv().await {
            self.push(event);
        }

        self.flush(FlushReason::Shutdown).await;

        self.state.send_replace(BatcherState::Stopped);
        info!("Ingestion batcher stopped");
    }
}

/// Publishes `Stopped` when the worker exits by any path, including abort or
/// panic, so `shutdown()` never waits on a worker that is gone.
struct StoppedOnDrop<'a>(&'a watch::Sender<BatcherState>);

impl Drop for StoppedOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| {
            let changed = *state != BatcherState::Stopped;
            *state = BatcherState::Stopped;
            changed
        });
    }
}

async fn write_batch(
    store: &dyn EventStore,
    rows: &[EnrichedEvent],
    insert_timeout: Duration,
    reason: FlushReason,
) {
    match tokio::time::timeout(insert_timeout, store.insert_batch(rows)).await {
        Ok(Ok(())) => {
            debug!(reason = %reason, rows = rows.len(), "Event batch stored");
        }
        Ok(Err(e)) => {
            error!(reason = %reason, rows = rows.len(), "Failed to store event batch: {e:#}");
        }
        Err(_) => {
            error!(
                reason = %reason,
                rows = rows.len(),
                "Storing event batch timed out after {:?}",
                insert_timeout
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricRow;
    use crate::query::{Dialect, MetricQuery};
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<Vec<EnrichedEvent>>>,
    }

    impl RecordingStore {
        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(Vec::len).collect()
        }
    }

    #[async_trait]
    impl EventStore for RecordingStore {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        async fn init(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn insert_batch(&self, events: &[EnrichedEvent]) -> anyhow::Result<()> {
            self.batches.lock().unwrap().push(events.to_vec());
            Ok(())
        }

        async fn query_metrics(&self, _query: &MetricQuery) -> anyhow::Result<Vec<MetricRow>> {
            Ok(vec![])
        }
    }

    fn event(n: usize) -> EnrichedEvent {
        EnrichedEvent {
            site_id: "site".to_string(),
            event: format!("/page/{n}"),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_from_ingest_defaults() {
        let config = BatcherConfig::default();
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.insert_timeout, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_shutdown_without_run_flushes_queue() {
        let store = Arc::new(RecordingStore::default());
        let batcher = Batcher::new(store.clone(), BatcherConfig::default());

        batcher.try_accept(event(1)).unwrap();
        batcher.try_accept(event(2)).unwrap();
        batcher.shutdown().await;

        assert_eq!(store.batch_sizes(), vec![2]);
        assert_eq!(batcher.state(), BatcherState::Stopped);

        // idempotent
        batcher.shutdown().await;
        assert_eq!(store.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_try_accept_reports_full_queue() {
        let store = Arc::new(RecordingStore::default());
        let config = BatcherConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        let batcher = Batcher::new(store, config);

        batcher.try_accept(event(1)).unwrap();
        batcher.try_accept(event(2)).unwrap();
        assert!(matches!(batcher.try_accept(event(3)), Err(TrackError::QueueFull)));
    }

    #[tokio::test]
    async fn test_accept_with_cancelled_token() {
        let store = Arc::new(RecordingStore::default());
        let batcher = Batcher::new(store, BatcherConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            batcher.accept(event(1), &cancel).await,
            Err(TrackError::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_gives_up_when_token_fires_on_full_queue() {
        let store = Arc::new(RecordingStore::default());
        let config = BatcherConfig {
            queue_capacity: 1,
            ..Default::default()
        };
        let batcher = Batcher::new(store, config);
        let cancel = CancellationToken::new();

        batcher.accept(event(1), &cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        assert!(matches!(
            batcher.accept(event(2), &cancel).await,
            Err(TrackError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_run_twice_is_invalid() {
        let store = Arc::new(RecordingStore::default());
        let batcher = Batcher::new(store.clone(), BatcherConfig::default());
        batcher.try_accept(event(1)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        batcher.run(cancel).await.unwrap();
        assert_eq!(batcher.state(), BatcherState::Stopped);
        assert_eq!(store.batch_sizes(), vec![1]);

        assert!(matches!(
            batcher.run(CancellationToken::new()).await,
            Err(TrackError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_flush_reason_display() {
        assert_eq!(FlushReason::Size.to_string(), "size");
        assert_eq!(FlushReason::Idle.to_string(), "idle");
        assert_eq!(FlushReason::Shutdown.to_string(), "shutdown");
    }
}
