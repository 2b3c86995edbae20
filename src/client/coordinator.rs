//! Debounced live preview for the authoring UI.
//!
//! Each field runs its own [`StateMachine`]. An edit restarts the debounce
//! timer and advances the field's generation, which also aborts any request
//! still in flight for the previous generation. A response is applied only
//! while its generation is current, so a slow earlier request can never
//! overwrite a newer preview.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ApiClient, ClientError};
use crate::cancellation::{GenerationGuard, TaskGeneration};
use crate::config::ClientConfig;
use crate::state_machine::{FieldState, StateMachine};
use crate::translate::orchestrator::{PreviewRequest, PreviewResponse, TranslationOrchestrator};
use crate::translate::{Language, Outcome, Role};

/// Where preview requests go: the HTTP API, or an in-process orchestrator.
pub trait PreviewBackend: Send + Sync {
    fn preview<'a>(&'a self, request: &'a PreviewRequest) -> BoxFuture<'a, Result<PreviewResponse, ClientError>>;
}

impl PreviewBackend for ApiClient {
    fn preview<'a>(&'a self, request: &'a PreviewRequest) -> BoxFuture<'a, Result<PreviewResponse, ClientError>> {
        Box::pin(ApiClient::preview(self, request))
    }
}

impl PreviewBackend for TranslationOrchestrator {
    fn preview<'a>(&'a self, request: &'a PreviewRequest) -> BoxFuture<'a, Result<PreviewResponse, ClientError>> {
        Box::pin(async move { Ok(TranslationOrchestrator::preview(self, request).await) })
    }
}

/// What an editor may trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStatus {
    Pending,
    Translated,
    /// Original text shown in place of a translation.
    Fallback,
    Failed,
}

impl PreviewStatus {
    pub fn from_outcome(outcome: &Outcome) -> Self {
        if outcome.needs_review() {
            PreviewStatus::Fallback
        } else {
            PreviewStatus::Translated
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSnapshot {
    pub state: FieldState,
    pub status: Option<PreviewStatus>,
    pub zh_text: String,
    pub th_text: String,
    pub source_language: Option<Language>,
    pub generation: u64,
    pub error: Option<String>,
}

impl Default for FieldSnapshot {
    fn default() -> Self {
        Self {
            state: FieldState::Idle,
            status: None,
            zh_text: String::new(),
            th_text: String::new(),
            source_language: None,
            generation: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub key: String,
    pub text: String,
    pub role: Role,
}

struct Field {
    key: String,
    /// Serializes generation checks with state changes.
    gate: Mutex<()>,
    machine: StateMachine,
    generation: TaskGeneration,
    snapshot: watch::Sender<FieldSnapshot>,
}

impl Field {
    fn new(key: &str, root: &CancellationToken) -> Self {
        let (snapshot, _) = watch::channel(FieldSnapshot::default());
        Self {
            key: key.to_string(),
            gate: Mutex::new(()),
            machine: StateMachine::new(),
            generation: TaskGeneration::with_parent(root),
            snapshot,
        }
    }

    fn enter(&self, next: FieldState) -> bool {
        self.machine.transition(next).is_ok()
    }

    fn publish(&self, update: impl FnOnce(&mut FieldSnapshot)) {
        let state = self.machine.current();
        let generation = self.generation.current_generation();
        self.snapshot.send_modify(|snapshot| {
            update(snapshot);
            snapshot.state = state;
            snapshot.generation = generation;
        });
    }

    /// Caller holds `gate`.
    fn reset(&self) {
        self.generation.invalidate();
        self.enter(FieldState::Idle);
        self.publish(|snapshot| *snapshot = FieldSnapshot::default());
    }
}

pub struct PreviewCoordinator {
    backend: Arc<dyn PreviewBackend>,
    debounce: Duration,
    fields: Mutex<HashMap<String, Arc<Field>>>,
    root: CancellationToken,
}

impl PreviewCoordinator {
    pub fn new(backend: Arc<dyn PreviewBackend>, debounce: Duration) -> Self {
        Self {
            backend,
            debounce,
            fields: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let api = ApiClient::new(config.api_base_url.clone(), Duration::from_secs(30))?;
        Ok(Self::new(Arc::new(api), config.debounce))
    }

    /// Record an edit. Blank text clears the preview at once; anything else
    /// (re)starts the debounce timer. Must be called inside a Tokio runtime.
    pub fn edit(&self, key: &str, text: &str, role: Role) {
        self.edit_with_source(key, text, role, None);
    }

    pub fn edit_with_source(&self, key: &str, text: &str, role: Role, source_language: Option<Language>) {
        if self.root.is_cancelled() {
            debug!(key, "coordinator closed, edit ignored");
            return;
        }
        let field = self.field(key);
        let _gate = field.gate.lock();

        if text.trim().is_empty() {
            field.reset();
            return;
        }

        let guard = field.generation.advance();
        field.enter(FieldState::Pending);
        field.publish(|snapshot| {
            snapshot.status = Some(PreviewStatus::Pending);
            snapshot.error = None;
        });

        let request = PreviewRequest {
            text: text.to_string(),
            key: key.to_string(),
            role,
            source_language,
        };
        tokio::spawn(run_preview(
            Arc::clone(&field),
            Arc::clone(&self.backend),
            request,
            guard,
            self.debounce,
        ));
    }

    /// Reset a field to idle. The field stays registered, so subscribers
    /// keep receiving its snapshots.
    pub fn clear(&self, key: &str) {
        let field = self.fields.lock().get(key).cloned();
        if let Some(field) = field {
            let _gate = field.gate.lock();
            field.reset();
        }
    }

    /// Abort a field's work and drop it. Its subscribers see the channel
    /// close once the last in-flight task lets go of the field.
    pub fn forget(&self, key: &str) {
        let field = self.fields.lock().remove(key);
        if let Some(field) = field {
            let _gate = field.gate.lock();
            field.reset();
            debug!(key, "field forgotten");
        }
    }

    pub fn subscribe(&self, key: &str) -> watch::Receiver<FieldSnapshot> {
        self.field(key).snapshot.subscribe()
    }

    pub fn snapshot(&self, key: &str) -> Option<FieldSnapshot> {
        self.fields
            .lock()
            .get(key)
            .map(|field| field.snapshot.borrow().clone())
    }

    /// Translate independent items concurrently. Every item gets its own
    /// result; a duplicate key keeps the last item's result.
    pub async fn translate_batch(&self, items: Vec<BatchItem>) -> HashMap<String, Result<PreviewResponse, ClientError>> {
        let count = items.len();
        let requests = items.into_iter().map(|item| {
            let backend = Arc::clone(&self.backend);
            let root = self.root.clone();
            async move {
                let request = PreviewRequest {
                    text: item.text,
                    key: item.key,
                    role: item.role,
                    source_language: None,
                };
                let result = match request.validate() {
                    Err(errors) => Err(ClientError::Invalid(errors)),
                    Ok(()) => tokio::select! {
                        _ = root.cancelled() => Err(ClientError::Cancelled),
                        result = backend.preview(&request) => result,
                    },
                };
                (request.key, result)
            }
        });

        let results: HashMap<_, _> = join_all(requests).await.into_iter().collect();
        let failed = results.values().filter(|r| r.is_err()).count();
        debug!(count, failed, "batch preview finished");
        results
    }

    /// Abort every timer and request. Later edits are ignored.
    pub fn close(&self) {
        self.root.cancel();
        let fields: Vec<Arc<Field>> = self.fields.lock().values().cloned().collect();
        for field in &fields {
            let _gate = field.gate.lock();
            field.generation.invalidate();
        }
        info!(fields = fields.len(), "preview coordinator closed");
    }

    fn field(&self, key: &str) -> Arc<Field> {
        let mut fields = self.fields.lock();
        Arc::clone(
            fields
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Field::new(key, &self.root))),
        )
    }
}

impl Drop for PreviewCoordinator {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn run_preview(
    field: Arc<Field>,
    backend: Arc<dyn PreviewBackend>,
    request: PreviewRequest,
    guard: GenerationGuard,
    debounce: Duration,
) {
    tokio::select! {
        _ = guard.token().cancelled() => return,
        _ = tokio::time::sleep(debounce) => {}
    }

    {
        let _gate = field.gate.lock();
        if !guard.should_continue() {
            return;
        }
        field.enter(FieldState::Requesting);
        field.publish(|_| {});
    }
    debug!(key = %field.key, generation = guard.my_generation(), "dispatching preview");

    let result = match request.validate() {
        Err(errors) => Err(ClientError::Invalid(errors)),
        Ok(()) => tokio::select! {
            _ = guard.token().cancelled() => Err(ClientError::Cancelled),
            result = backend.preview(&request) => result,
        },
    };

    let _gate = field.gate.lock();
    if !guard.should_continue() {
        debug!(key = %field.key, generation = guard.my_generation(), "discarding superseded preview");
        return;
    }
    match result {
        Ok(response) => {
            field.enter(FieldState::Resolved);
            field.publish(|snapshot| {
                snapshot.status = Some(PreviewStatus::from_outcome(&response.outcome));
                snapshot.zh_text = response.zh_text;
                snapshot.th_text = response.th_text;
                snapshot.source_language = Some(response.source_language);
                snapshot.error = None;
            });
        }
        Err(e) => {
            warn!(key = %field.key, error = %e, "preview request failed");
            field.enter(FieldState::Failed);
            field.publish(|snapshot| {
                snapshot.status = Some(PreviewStatus::Failed);
                snapshot.error = Some(e.to_string());
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::metrics::MetricsRegistry;
    use crate::translate::cache::TranslationMemo;
    use crate::translate::orchestrator::tests::ScriptedProvider;
    use crate::translate::orchestrator::MAX_KEY_LEN;
    use crate::translate::FallbackReason;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Texts starting with `slow` take 5 s, others 100 ms. `ERR` fails the
    /// request, `FAIL` resolves with a fallback outcome.
    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
        completed: AtomicUsize,
    }

    impl PreviewBackend for FakeBackend {
        fn preview<'a>(&'a self, request: &'a PreviewRequest) -> BoxFuture<'a, Result<PreviewResponse, ClientError>> {
            Box::pin(async move {
                self.calls.lock().push(request.text.clone());
                let delay = if request.text.starts_with("slow") { 5_000 } else { 100 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                self.completed.fetch_add(1, Ordering::SeqCst);

                if request.text.contains("ERR") {
                    return Err(ClientError::Status {
                        status: 500,
                        body: "boom".into(),
                    });
                }
                let outcome = if request.text.contains("FAIL") {
                    Outcome::Fallback {
                        reason: FallbackReason::Status(502),
                    }
                } else {
                    Outcome::Translated
                };
                Ok(PreviewResponse {
                    zh_text: request.text.clone(),
                    th_text: format!("th:{}", request.text),
                    source_language: Language::Zh,
                    outcome,
                })
            })
        }
    }

    fn coordinator(backend: Arc<FakeBackend>) -> PreviewCoordinator {
        PreviewCoordinator::new(backend, Duration::from_millis(800))
    }

    async fn settled(rx: &mut watch::Receiver<FieldSnapshot>) -> FieldSnapshot {
        rx.wait_for(|s| matches!(s.state, FieldState::Resolved | FieldState::Failed))
            .await
            .unwrap()
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn edits_inside_the_window_collapse_into_one_request() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(backend.clone());
        let mut rx = coord.subscribe("title");

        coord.edit("title", "你", Role::UiLabel);
        assert_eq!(coord.snapshot("title").unwrap().state, FieldState::Pending);
        assert_eq!(coord.snapshot("title").unwrap().status, Some(PreviewStatus::Pending));

        tokio::time::sleep(Duration::from_millis(300)).await;
        coord.edit("title", "你好", Role::UiLabel);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(backend.calls.lock().is_empty());

        let snap = settled(&mut rx).await;
        assert_eq!(*backend.calls.lock(), vec!["你好".to_string()]);
        assert_eq!(snap.state, FieldState::Resolved);
        assert_eq!(snap.status, Some(PreviewStatus::Translated));
        assert_eq!(snap.th_text, "th:你好");
        assert_eq!(snap.generation, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_input_clears_without_waiting() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(backend.clone());
        let mut rx = coord.subscribe("title");

        coord.edit("title", "你好", Role::UiLabel);
        settled(&mut rx).await;

        coord.edit("title", "   ", Role::UiLabel);
        let snap = coord.snapshot("title").unwrap();
        assert_eq!(snap.state, FieldState::Idle);
        assert_eq!(snap.status, None);
        assert!(snap.th_text.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_edit_aborts_in_flight_request() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(backend.clone());
        let mut rx = coord.subscribe("body");

        coord.edit("body", "slow 慢", Role::LongContent);
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(coord.snapshot("body").unwrap().state, FieldState::Requesting);
        assert_eq!(backend.calls.lock().len(), 1);

        coord.edit("body", "快", Role::LongContent);
        let snap = settled(&mut rx).await;
        assert_eq!(snap.th_text, "th:快");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.completed.load(Ordering::SeqCst), 1);
        assert_eq!(coord.snapshot("body").unwrap().th_text, "th:快");
    }

    #[tokio::test(start_paused = true)]
    async fn clear_discards_pending_result() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(backend.clone());

        coord.edit("title", "slow 标题", Role::UiLabel);
        tokio::time::sleep(Duration::from_millis(900)).await;
        coord.clear("title");
        tokio::time::sleep(Duration::from_secs(10)).await;

        let snap = coord.snapshot("title").unwrap();
        assert_eq!(snap.state, FieldState::Idle);
        assert!(snap.th_text.is_empty());
        assert_eq!(backend.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_drops_the_field_and_its_request() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(backend.clone());
        let mut rx = coord.subscribe("title");

        coord.edit("title", "slow 标题", Role::UiLabel);
        tokio::time::sleep(Duration::from_millis(900)).await;
        coord.forget("title");

        assert!(coord.snapshot("title").is_none());
        assert!(coord.fields.lock().is_empty());
        // The aborted task releases the field, closing the channel.
        assert!(rx.wait_for(|_| false).await.is_err());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.completed.load(Ordering::SeqCst), 0);

        coord.forget("never-edited");
        coord.edit("title", "你好", Role::UiLabel);
        let snap = settled(&mut coord.subscribe("title")).await;
        assert_eq!(snap.th_text, "th:你好");
        assert_eq!(snap.generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_key_fails_without_calling_backend() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(backend.clone());
        let mut rx = coord.subscribe("promo/title");

        coord.edit("promo/title", "文本", Role::UiLabel);
        let snap = settled(&mut rx).await;
        assert_eq!(snap.state, FieldState::Failed);
        assert_eq!(snap.status, Some(PreviewStatus::Failed));
        assert!(snap.error.unwrap().contains("invalid field"));

        let long_key = "k".repeat(MAX_KEY_LEN + 1);
        let mut rx = coord.subscribe(&long_key);
        coord.edit(&long_key, "文本", Role::UiLabel);
        assert_eq!(settled(&mut rx).await.state, FieldState::Failed);
        assert!(backend.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn status_distinguishes_fallback_and_failure() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(backend.clone());
        let mut fallback_rx = coord.subscribe("a");
        let mut failed_rx = coord.subscribe("b");

        coord.edit("a", "FAIL 文案", Role::UiLabel);
        coord.edit("b", "ERR", Role::UiLabel);

        let a = settled(&mut fallback_rx).await;
        assert_eq!(a.state, FieldState::Resolved);
        assert_eq!(a.status, Some(PreviewStatus::Fallback));

        let b = settled(&mut failed_rx).await;
        assert_eq!(b.state, FieldState::Failed);
        assert_eq!(b.status, Some(PreviewStatus::Failed));
        assert!(b.error.unwrap().contains("500"));
    }

    #[tokio::test(start_paused = true)]
    async fn close_aborts_everything() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(backend.clone());

        coord.edit("title", "slow 标题", Role::UiLabel);
        coord.edit("other", "slow 其他", Role::UiLabel);
        tokio::time::sleep(Duration::from_millis(900)).await;
        coord.close();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.completed.load(Ordering::SeqCst), 0);

        coord.edit("late", "你好", Role::UiLabel);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.calls.lock().len(), 2);
        assert!(coord.snapshot("late").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn batch_results_are_independent() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(backend.clone());

        let items = vec![
            BatchItem { key: "a".into(), text: "甲".into(), role: Role::UiLabel },
            BatchItem { key: "b".into(), text: "ERR".into(), role: Role::UiLabel },
            BatchItem { key: "c".into(), text: " ".into(), role: Role::UiLabel },
            BatchItem { key: "d".into(), text: "FAIL 丁".into(), role: Role::UiLabel },
        ];
        let results = coord.translate_batch(items).await;

        assert_eq!(results.len(), 4);
        assert_eq!(results["a"].as_ref().unwrap().th_text, "th:甲");
        assert!(matches!(results["b"], Err(ClientError::Status { status: 500, .. })));
        assert!(matches!(&results["c"], Err(ClientError::Invalid(errors)) if errors[0].field == "text"));
        assert!(results["d"].as_ref().unwrap().outcome.needs_review());
        assert_eq!(backend.calls.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn in_process_backend_previews_thai_source() {
        let metrics = Arc::new(MetricsRegistry::new());
        let orchestrator = TranslationOrchestrator::new(
            Arc::new(ScriptedProvider::default()),
            Arc::new(TranslationMemo::new(16, Duration::from_secs(60))),
            ChunkingConfig::default(),
            metrics,
        );
        let coord = PreviewCoordinator::new(Arc::new(orchestrator), Duration::from_millis(800));
        let mut rx = coord.subscribe("greeting");

        coord.edit("greeting", "สวัสดี", Role::UiLabel);
        let snap = settled(&mut rx).await;
        assert_eq!(snap.source_language, Some(Language::Th));
        assert_eq!(snap.th_text, "สวัสดี");
        assert_eq!(snap.zh_text, "[zh]สวัสดี");
    }
}
