//! Deduplicating last-used tracker for LLM keys.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use config::LastUsedConfig;
use store::Store;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TrackerShared {
    pending: Mutex<HashSet<i64>>,
}

/// Collects key touches and flushes them as one batched store update per
/// interval. Touching is lock-and-insert; duplicates within an interval
/// collapse to a single update.
pub struct LastUsedTracker {
    shared: Arc<TrackerShared>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LastUsedTracker {
    /// Start the background flush ticker.
    pub fn new(store: Arc<dyn Store>, config: &LastUsedConfig) -> Self {
        let shared = Arc::new(TrackerShared {
            pending: Mutex::new(HashSet::new()),
        });

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run(
            shared.clone(),
            store,
            config.flush_interval,
            config.store_timeout,
            shutdown.clone(),
        ));

        Self {
            shared,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Mark a key as used. Never blocks on the store.
    pub fn touch(&self, key_id: i64) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.insert(key_id);
        }
    }

    /// Stop the ticker and run a final flush. Idempotent; later calls are
    /// no-ops.
    pub async fn close(&self) {
        self.shutdown.cancel();

        let worker = self.worker.lock().ok().and_then(|mut slot| slot.take());

        if let Some(worker) = worker
            && let Err(error) = worker.await
        {
            log::error!("last-used tracker panicked during shutdown: {error}");
        }
    }
}

async fn run(
    shared: Arc<TrackerShared>,
    store: Arc<dyn Store>,
    flush_interval: Duration,
    store_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => flush(&shared, &store, store_timeout).await,
            _ = shutdown.cancelled() => {
                flush(&shared, &store, store_timeout).await;
                return;
            }
        }
    }
}

async fn flush(shared: &TrackerShared, store: &Arc<dyn Store>, store_timeout: Duration) {
    let ids: Vec<i64> = {
        let Ok(mut pending) = shared.pending.lock() else {
            return;
        };
        std::mem::take(&mut *pending).into_iter().collect()
    };

    if ids.is_empty() {
        return;
    }

    match tokio::time::timeout(store_timeout, store.batch_update_llm_key_last_used(&ids)).await {
        Ok(Ok(())) => log::debug!("updated last_used_at for {} keys", ids.len()),
        Ok(Err(error)) => log::error!("failed to update key last_used_at: {error}"),
        Err(_) => log::error!("key last_used_at update timed out after {store_timeout:?}"),
    }
}

#[cfg(test)]
mod tests {
    use store::{LlmKeyRecord, MemoryStore, Store as _};

    use super::*;

    fn key(id: i64) -> LlmKeyRecord {
        LlmKeyRecord {
            id,
            key_hash: format!("hash-{id}"),
            key_prefix: "pxb_0000".to_string(),
            name: format!("key-{id}"),
            active: true,
            created_at: jiff::Timestamp::now(),
            last_used_at: None,
        }
    }

    fn config(flush_interval: Duration) -> LastUsedConfig {
        LastUsedConfig {
            flush_interval,
            store_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn touches_flush_on_the_ticker() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_llm_key(key(1)).await;

        let tracker = LastUsedTracker::new(store.clone() as Arc<dyn Store>, &config(Duration::from_millis(20)));

        tracker.touch(1);
        tracker.touch(1);
        tracker.touch(1);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let record = store.get_llm_key_by_hash("hash-1").await.unwrap().unwrap();
        assert!(record.last_used_at.is_some());

        tracker.close().await;
    }

    #[tokio::test]
    async fn close_runs_a_final_flush() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_llm_key(key(7)).await;

        // Long interval: only the shutdown flush can deliver the touch.
        let tracker = LastUsedTracker::new(store.clone() as Arc<dyn Store>, &config(Duration::from_secs(3600)));

        tracker.touch(7);
        tracker.close().await;

        let record = store.get_llm_key_by_hash("hash-7").await.unwrap().unwrap();
        assert!(record.last_used_at.is_some());
    }
}
