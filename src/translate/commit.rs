//! Batched commit path for finalized translations.
//! Commits are buffered in a channel and flushed to the store in one
//! transaction per tick. Every commit gets a ticket that resolves once its
//! records are written, or with the error that stopped them.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::{BatchSummary, StoreError, TranslationRecord, TranslationStore};
use crate::metrics::{metric_names, MetricsRegistry};

struct PendingCommit {
    records: Vec<TranslationRecord>,
    ack: oneshot::Sender<Result<(), StoreError>>,
}

/// Resolves when the flush loop has written (or failed to write) a commit.
#[must_use = "a commit is only known to be persisted once its ticket resolves"]
pub struct CommitTicket(oneshot::Receiver<Result<(), StoreError>>);

impl CommitTicket {
    pub async fn wait(self) -> Result<(), StoreError> {
        self.0
            .await
            .unwrap_or_else(|_| Err(StoreError::Task("commit queue closed".into())))
    }
}

pub struct CommitQueue {
    tx: mpsc::UnboundedSender<PendingCommit>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CommitQueue {
    /// Spawn the flush loop on the current Tokio runtime.
    pub fn start(
        store: Arc<dyn TranslationStore>,
        flush_interval: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(flush_loop(
            rx,
            store,
            flush_interval,
            shutdown.clone(),
            metrics,
        ));
        Self {
            tx,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue records that must land together. Never blocks; after shutdown
    /// the ticket resolves to an error.
    pub fn enqueue(&self, records: Vec<TranslationRecord>) -> CommitTicket {
        let (ack, rx) = oneshot::channel();
        if let Err(e) = self.tx.send(PendingCommit { records, ack }) {
            warn!(records = e.0.records.len(), "commit queue closed, records dropped");
        }
        CommitTicket(rx)
    }

    /// Flush everything still buffered and stop the loop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "commit flush loop ended abnormally");
            }
        }
    }
}

async fn flush_loop(
    mut rx: mpsc::UnboundedReceiver<PendingCommit>,
    store: Arc<dyn TranslationStore>,
    flush_interval: Duration,
    shutdown: CancellationToken,
    metrics: Arc<MetricsRegistry>,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buffer: Vec<PendingCommit> = Vec::with_capacity(16);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_batch(&store, std::mem::take(&mut buffer), &metrics).await;
                }
            }
            msg = rx.recv() => match msg {
                Some(commit) => buffer.push(commit),
                None => break,
            },
            _ = shutdown.cancelled() => {
                rx.close();
                while let Ok(commit) = rx.try_recv() {
                    buffer.push(commit);
                }
                break;
            }
        }
    }

    if !buffer.is_empty() {
        flush_batch(&store, buffer, &metrics).await;
    }
    info!("commit flush loop exiting");
}

async fn flush_batch(store: &Arc<dyn TranslationStore>, batch: Vec<PendingCommit>, metrics: &Arc<MetricsRegistry>) {
    let span = metrics.span(metric_names::COMMIT_FLUSH);
    let (commits, acks): (Vec<_>, Vec<_>) = batch.into_iter().map(|c| (c.records, c.ack)).unzip();
    let sizes: Vec<usize> = commits.iter().map(Vec::len).collect();
    let store = Arc::clone(store);
    let result = tokio::task::spawn_blocking(move || write_commits(store.as_ref(), &commits)).await;
    span.finish();

    let (summary, results) = match result {
        Ok(written) => written,
        Err(e) => {
            warn!(error = %e, commits = acks.len(), "commit batch task panicked");
            let reason = e.to_string();
            let results = acks
                .iter()
                .map(|_| Err(StoreError::Task(reason.clone())))
                .collect();
            (BatchSummary::default(), results)
        }
    };

    if summary.queued > 0 {
        metrics.add(metric_names::OVERRIDE_REJECTED, summary.queued as u64);
    }
    let mut failed = 0;
    for ((ack, result), size) in acks.into_iter().zip(results).zip(sizes) {
        if let Err(e) = &result {
            warn!(error = %e, records = size, "commit failed");
            failed += size;
        }
        // The caller may have gone away; the rows are written regardless.
        let _ = ack.send(result);
    }
    if failed > 0 {
        metrics.add(metric_names::COMMIT_FAILED, failed as u64);
    }
    debug!(
        inserted = summary.inserted,
        updated = summary.updated,
        queued = summary.queued,
        rejected = summary.rejected,
        failed,
        "commit batch flushed"
    );
}

/// One transaction for the whole batch. If it fails, each commit is retried
/// on its own so one bad commit cannot sink its neighbours.
fn write_commits(
    store: &dyn TranslationStore,
    commits: &[Vec<TranslationRecord>],
) -> (BatchSummary, Vec<Result<(), StoreError>>) {
    let all = commits.concat();
    match store.put_batch(&all) {
        Ok(summary) => (summary, commits.iter().map(|_| Ok(())).collect()),
        Err(e) if commits.len() == 1 => (BatchSummary::default(), vec![Err(e)]),
        Err(e) => {
            warn!(error = %e, commits = commits.len(), "batch write failed, retrying per commit");
            let mut total = BatchSummary::default();
            let results = commits
                .iter()
                .map(|records| store.put_batch(records).map(|summary| total += summary))
                .collect();
            (total, results)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::store::{PutOutcome, ReviewItem, SqliteStore};
    use crate::translate::{Language, Role, Translation};
    use std::collections::HashMap;

    fn record(key: &str, value: &str) -> TranslationRecord {
        TranslationRecord::automatic(Language::Th, key, Role::UiLabel, &Translation::translated(value))
    }

    /// SQLite store whose batch writes fail when any record targets `broken`.
    struct BrokenKeyStore {
        inner: SqliteStore,
        broken: &'static str,
    }

    impl TranslationStore for BrokenKeyStore {
        fn get(&self, language: Language, key: &str) -> Result<Option<TranslationRecord>, StoreError> {
            self.inner.get(language, key)
        }

        fn get_all(&self, language: Language) -> Result<HashMap<String, String>, StoreError> {
            self.inner.get_all(language)
        }

        fn put(&self, record: &TranslationRecord) -> Result<PutOutcome, StoreError> {
            self.inner.put(record)
        }

        fn put_batch(&self, records: &[TranslationRecord]) -> Result<BatchSummary, StoreError> {
            if records.iter().any(|r| r.key == self.broken) {
                return Err(StoreError::Task("disk full".into()));
            }
            self.inner.put_batch(records)
        }

        fn reinitialize(&self, language: Language, entries: &HashMap<String, String>) -> Result<usize, StoreError> {
            self.inner.reinitialize(language, entries)
        }

        fn pending_reviews(&self, language: Language) -> Result<Vec<ReviewItem>, StoreError> {
            self.inner.pending_reviews(language)
        }
    }

    #[tokio::test]
    async fn tickets_resolve_after_the_tick_writes() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let queue = CommitQueue::start(store.clone(), Duration::from_millis(20), Arc::new(MetricsRegistry::new()));

        let first = queue.enqueue(vec![record("a", "1")]);
        let second = queue.enqueue(vec![record("b", "2"), record("c", "3")]);
        first.wait().await.unwrap();
        second.wait().await.unwrap();

        assert_eq!(store.get_all(Language::Th).unwrap().len(), 3);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_records() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let metrics = Arc::new(MetricsRegistry::new());
        let queue = CommitQueue::start(store.clone(), Duration::from_secs(3600), Arc::clone(&metrics));

        store
            .put(&TranslationRecord::manual(Language::Th, "locked", Role::UiLabel, "x"))
            .unwrap();
        let ticket = queue.enqueue(vec![record("a", "1"), record("locked", "machine")]);
        queue.shutdown().await;
        ticket.wait().await.unwrap();

        let all = store.get_all(Language::Th).unwrap();
        assert_eq!(all["a"], "1");
        assert_eq!(all["locked"], "x");
        assert_eq!(metrics.counter(metric_names::OVERRIDE_REJECTED), 1);

        let late = queue.enqueue(vec![record("late", "z")]);
        assert!(matches!(late.wait().await, Err(StoreError::Task(_))));
        assert!(store.get(Language::Th, "late").unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_write_reaches_its_caller_only() {
        let store = Arc::new(BrokenKeyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            broken: "banner",
        });
        let metrics = Arc::new(MetricsRegistry::new());
        let queue = CommitQueue::start(store.clone(), Duration::from_secs(3600), Arc::clone(&metrics));

        let good = queue.enqueue(vec![record("nav.home", "หน้าแรก")]);
        let bad = queue.enqueue(vec![record("banner.alt", "ok"), record("banner", "x")]);
        queue.shutdown().await;

        good.wait().await.unwrap();
        let err = bad.wait().await.unwrap_err();
        assert!(err.to_string().contains("disk full"));

        let all = store.get_all(Language::Th).unwrap();
        assert_eq!(all["nav.home"], "หน้าแรก");
        // The failed commit is all-or-nothing.
        assert!(!all.contains_key("banner.alt"));
        assert_eq!(metrics.counter(metric_names::COMMIT_FAILED), 2);
    }
}
