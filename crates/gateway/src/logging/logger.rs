//! Bounded, lossy, batching request logger.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use config::RequestLogConfig;
use store::{LogEntry, Store};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Shared {
    queue: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    notify: tokio::sync::Notify,
    dropped: AtomicU64,
}

impl Shared {
    fn pop_batch(&self, max: usize) -> Vec<LogEntry> {
        let Ok(mut queue) = self.queue.lock() else {
            return Vec::new();
        };

        let take = queue.len().min(max);
        queue.drain(..take).collect()
    }
}

/// Cloneable submission handle given to request handlers.
#[derive(Clone)]
pub struct LogHandle {
    shared: Arc<Shared>,
}

impl LogHandle {
    /// Enqueue an entry without blocking. When the queue is full the oldest
    /// pending entry is dropped and counted; the response path is never
    /// affected.
    pub fn submit(&self, entry: LogEntry) {
        let Ok(mut queue) = self.shared.queue.lock() else {
            return;
        };

        if queue.len() >= self.shared.capacity {
            queue.pop_front();
            let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("request log queue full, dropped oldest entry (total dropped: {dropped})");
        }

        queue.push_back(entry);
        drop(queue);

        self.shared.notify.notify_one();
    }

    /// Total entries dropped under pressure.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// Owner of the worker tasks; hand out [`LogHandle`]s for submission.
pub struct RequestLogger {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl RequestLogger {
    /// Start the configured number of flush workers against the store.
    pub fn new(store: Arc<dyn Store>, config: &RequestLogConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(config.channel_capacity)),
            capacity: config.channel_capacity.max(1),
            notify: tokio::sync::Notify::new(),
            dropped: AtomicU64::new(0),
        });

        let shutdown = CancellationToken::new();
        let workers = (0..config.workers)
            .map(|_| {
                tokio::spawn(worker(
                    shared.clone(),
                    store.clone(),
                    config.batch_size.max(1),
                    config.flush_interval,
                    shutdown.clone(),
                ))
            })
            .collect();

        Self {
            shared,
            shutdown,
            workers,
        }
    }

    /// A submission handle for request handlers.
    pub fn handle(&self) -> LogHandle {
        LogHandle {
            shared: self.shared.clone(),
        }
    }

    /// Stop accepting work, drain what is queued, flush, and return.
    pub async fn close(self) {
        self.shutdown.cancel();

        for worker in self.workers {
            if let Err(error) = worker.await {
                log::error!("request log worker panicked during shutdown: {error}");
            }
        }
    }
}

async fn worker(
    shared: Arc<Shared>,
    store: Arc<dyn Store>,
    batch_size: usize,
    flush_interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let mut batch = shared.pop_batch(batch_size);

        if batch.is_empty() {
            tokio::select! {
                _ = shared.notify.notified() => continue,
                _ = shutdown.cancelled() => break,
            }
        }

        // Wait up to the flush interval to top the batch up.
        if batch.len() < batch_size {
            let deadline = tokio::time::sleep(flush_interval);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = shared.notify.notified() => {
                        batch.extend(shared.pop_batch(batch_size - batch.len()));

                        if batch.len() >= batch_size {
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        }

        flush(&store, &batch).await;

        if shutdown.is_cancelled() && shared.queue.lock().map(|q| q.is_empty()).unwrap_or(true) {
            break;
        }
    }

    // Final drain after cancellation.
    loop {
        let batch = shared.pop_batch(batch_size);

        if batch.is_empty() {
            break;
        }

        flush(&store, &batch).await;
    }
}

async fn flush(store: &Arc<dyn Store>, batch: &[LogEntry]) {
    if batch.is_empty() {
        return;
    }

    if let Err(error) = store.insert_log_batch(batch).await {
        log::error!("failed to insert request log batch of {}: {error}", batch.len());
    }
}
