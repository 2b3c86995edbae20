//! Translation service: the orchestrator plus an injected store and the
//! commit queue. Store calls run on the blocking pool.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::commit::CommitQueue;
use super::orchestrator::{PreviewRequest, PreviewResponse, TranslationOrchestrator};
use super::store::{PutOutcome, ReviewItem, StoreError, TranslationRecord, TranslationStore};
use super::{Language, Role, Translation};
use crate::metrics::{metric_names, MetricsRegistry};

pub struct TranslationService {
    orchestrator: Arc<TranslationOrchestrator>,
    store: Arc<dyn TranslationStore>,
    commits: CommitQueue,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationService {
    pub fn new(
        orchestrator: Arc<TranslationOrchestrator>,
        store: Arc<dyn TranslationStore>,
        commits: CommitQueue,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            commits,
            metrics,
        }
    }

    pub fn orchestrator(&self) -> &TranslationOrchestrator {
        &self.orchestrator
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub async fn preview(&self, request: &PreviewRequest) -> PreviewResponse {
        self.orchestrator.preview(request).await
    }

    /// Translate a finalized value and persist both language rows. The typed
    /// side is stored as authored; the translated side carries the outcome's
    /// review flag. Returns once the commit queue has written both rows.
    pub async fn commit(&self, request: &PreviewRequest) -> Result<PreviewResponse, StoreError> {
        let response = self.orchestrator.preview(request).await;
        let source = response.source_language;
        let target = source.counterpart();

        let ticket = self.commits.enqueue(vec![
            TranslationRecord::automatic(
                source,
                request.key.clone(),
                request.role,
                &Translation::translated(request.text.clone()),
            ),
            TranslationRecord::automatic(
                target,
                request.key.clone(),
                request.role,
                &Translation {
                    text: response.text(target).to_string(),
                    outcome: response.outcome,
                },
            ),
        ]);
        ticket.wait().await?;
        Ok(response)
    }

    /// Manual correction; bypasses the queue and protects the key.
    pub async fn set_override(
        &self,
        language: Language,
        key: String,
        role: Role,
        value: String,
    ) -> Result<PutOutcome, StoreError> {
        let record = TranslationRecord::manual(language, key, role, value);
        self.blocking(move |store| store.put(&record)).await
    }

    pub async fn get(&self, language: Language, key: String) -> Result<Option<TranslationRecord>, StoreError> {
        self.blocking(move |store| store.get(language, &key)).await
    }

    pub async fn dictionary(&self, language: Language) -> Result<HashMap<String, String>, StoreError> {
        self.blocking(move |store| store.get_all(language)).await
    }

    pub async fn reinitialize(
        &self,
        language: Language,
        entries: HashMap<String, String>,
    ) -> Result<usize, StoreError> {
        let span = self.metrics.span(metric_names::STORE_REINITIALIZE);
        let result = self
            .blocking(move |store| store.reinitialize(language, &entries))
            .await;
        span.finish();
        result
    }

    pub async fn pending_reviews(&self, language: Language) -> Result<Vec<ReviewItem>, StoreError> {
        self.blocking(move |store| store.pending_reviews(language)).await
    }

    /// Flush queued commits.
    pub async fn shutdown(&self) {
        self.commits.shutdown().await;
        info!("translation service stopped");
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn TranslationStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}
