//! Composes chunker, detector, memo and provider into the two translation
//! paths: short UI labels and arbitrary-length content.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cache::TranslationMemo;
use super::{chunker, detect, Language, Outcome, Role, Translation, TranslationProvider};
use crate::config::ChunkingConfig;
use crate::metrics::{metric_names, MetricsRegistry};

/// Live-preview request from the authoring UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub text: String,
    pub key: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub source_language: Option<Language>,
}

pub const MAX_KEY_LEN: usize = 128;

/// One failed form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl PreviewRequest {
    /// Collects every field-level problem rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.text.trim().is_empty() {
            errors.push(FieldError::new("text", "must not be empty"));
        }
        let key = self.key.trim();
        if key.is_empty() {
            errors.push(FieldError::new("key", "must not be empty"));
        } else if key.chars().count() > MAX_KEY_LEN {
            errors.push(FieldError::new(
                "key",
                format!("must be at most {MAX_KEY_LEN} characters"),
            ));
        } else if key.contains('/') {
            errors.push(FieldError::new("key", "must not contain '/'"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Both canonical variants of an edited value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub zh_text: String,
    pub th_text: String,
    pub source_language: Language,
    pub outcome: Outcome,
}

impl PreviewResponse {
    pub fn text(&self, language: Language) -> &str {
        match language {
            Language::Zh => &self.zh_text,
            Language::Th => &self.th_text,
        }
    }
}

pub struct TranslationOrchestrator {
    provider: Arc<dyn TranslationProvider>,
    memo: Arc<TranslationMemo>,
    chunking: ChunkingConfig,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationOrchestrator {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        memo: Arc<TranslationMemo>,
        chunking: ChunkingConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            provider,
            memo,
            chunking,
            metrics,
        }
    }

    /// Short strings: straight to the provider (through the memo).
    pub async fn translate_ui(&self, text: &str, from: Language, to: Language) -> Translation {
        self.translate_unit(text, from, to).await
    }

    /// Long content: chunked above the threshold, chunks translated
    /// concurrently and rejoined in order. A failed chunk keeps its
    /// original text without affecting its siblings.
    pub async fn translate_content(&self, text: &str, from: Language, to: Language) -> Translation {
        if !chunker::exceeds(text, self.chunking.threshold) {
            return self.translate_unit(text, from, to).await;
        }

        let span = self.metrics.span(metric_names::CONTENT_TRANSLATE);
        let chunks = chunker::split(text, self.chunking.max_len);
        if chunks.is_empty() {
            // Nothing but terminators.
            return Translation::unchanged(text);
        }
        let total_chunks = chunks.len();
        self.metrics
            .record(metric_names::CONTENT_CHUNKS, total_chunks as f64);
        debug!(chunks = total_chunks, chars = text.chars().count(), "content chunked");

        let results: Vec<Translation> = stream::iter(chunks)
            .map(|chunk| async move { self.translate_unit(&chunk, from, to).await })
            .buffered(self.chunking.max_concurrent.max(1))
            .collect()
            .await;
        span.finish();

        let fallback_chunks = results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Fallback { .. }))
            .count();
        let joined: String = results.iter().map(|r| r.text.as_str()).collect();

        let outcome = match fallback_chunks {
            0 => Outcome::Translated,
            n if n == total_chunks => results[0].outcome,
            n => Outcome::Partial {
                fallback_chunks: n,
                total_chunks,
            },
        };
        if fallback_chunks > 0 {
            info!(fallback_chunks, total_chunks, "content translated with fallback chunks");
        }

        Translation {
            text: joined,
            outcome,
        }
    }

    /// Translate by role.
    pub async fn translate(&self, text: &str, role: Role, from: Language, to: Language) -> Translation {
        match role {
            Role::UiLabel => self.translate_ui(text, from, to).await,
            Role::LongContent => self.translate_content(text, from, to).await,
        }
    }

    /// Produce both language variants of an edited value. The source side is
    /// the text as typed; the other side is translated.
    pub async fn preview(&self, request: &PreviewRequest) -> PreviewResponse {
        let source = request
            .source_language
            .unwrap_or_else(|| detect::detect_or_source(&request.text));
        let target = source.counterpart();

        let translated = self
            .translate(&request.text, request.role, source, target)
            .await;
        debug!(key = %request.key, %source, outcome = ?translated.outcome, "preview translated");

        let (zh_text, th_text) = match source {
            Language::Zh => (request.text.clone(), translated.text),
            Language::Th => (translated.text, request.text.clone()),
        };
        PreviewResponse {
            zh_text,
            th_text,
            source_language: source,
            outcome: translated.outcome,
        }
    }

    async fn translate_unit(&self, text: &str, from: Language, to: Language) -> Translation {
        if from == to {
            return Translation::unchanged(text);
        }
        let key = TranslationMemo::compute_key(from, to, text);
        if let Some(hit) = self.memo.get(&key) {
            self.metrics.increment(metric_names::MEMO_HIT);
            return Translation::translated(hit);
        }
        let result = self.provider.translate_one(text, from, to).await;
        if result.outcome.is_translated() {
            self.memo.insert(key, result.text.clone());
        }
        result
    }
}
