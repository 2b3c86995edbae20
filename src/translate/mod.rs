//! Translation pipeline: detection, chunking, provider calls, orchestration,
//! memoization and persistence of zh/th translations.

pub mod cache;
pub mod chunker;
pub mod commit;
pub mod detect;
pub mod orchestrator;
pub mod provider;
pub mod service;
pub mod store;

use std::fmt;
use std::str::FromStr;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// The two languages the platform supports. Content is authored in Chinese
/// and machine-translated into Thai.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    Th,
}

impl Language {
    pub const SOURCE: Language = Language::Zh;
    pub const TARGET: Language = Language::Th;
    pub const ALL: [Language; 2] = [Language::Zh, Language::Th];

    pub fn code(self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::Th => "th",
        }
    }

    /// English name used inside provider prompts.
    pub fn prompt_name(self) -> &'static str {
        match self {
            Language::Zh => "Chinese",
            Language::Th => "Thai",
        }
    }

    /// The other language of the pair.
    pub fn counterpart(self) -> Language {
        match self {
            Language::Zh => Language::Th,
            Language::Th => Language::Zh,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language code: {0}")]
pub struct ParseLanguageError(pub String);

impl FromStr for Language {
    type Err = ParseLanguageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "zh-tw" | "cn" => Ok(Language::Zh),
            "th" | "th-th" => Ok(Language::Th),
            other => Err(ParseLanguageError(other.to_string())),
        }
    }
}

/// How a string is used. Affects chunking only, never storage shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    UiLabel,
    LongContent,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::UiLabel => "ui-label",
            Role::LongContent => "long-content",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "ui-label" => Some(Role::UiLabel),
            "long-content" => Some(Role::LongContent),
            _ => None,
        }
    }
}

/// Why a provider call degraded to the original text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    MissingCredentials,
    Status(u16),
    MalformedResponse,
    EmptyOutput,
    Transport,
    Timeout,
}

/// Explicit result tag carried next to every translated value, so callers
/// never infer success from string equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Translated,
    /// Blank input, nothing was sent.
    Unchanged,
    Fallback { reason: FallbackReason },
    /// Chunked content where some chunks fell back to the original text.
    Partial { fallback_chunks: usize, total_chunks: usize },
}

impl Outcome {
    pub fn needs_review(&self) -> bool {
        matches!(self, Outcome::Fallback { .. } | Outcome::Partial { .. })
    }

    pub fn is_translated(&self) -> bool {
        matches!(self, Outcome::Translated)
    }
}

/// A value plus the outcome that produced it. `text` is always usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub text: String,
    pub outcome: Outcome,
}

impl Translation {
    pub fn translated(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            outcome: Outcome::Translated,
        }
    }

    pub fn unchanged(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            outcome: Outcome::Unchanged,
        }
    }

    pub fn fallback(original: impl Into<String>, reason: FallbackReason) -> Self {
        Self {
            text: original.into(),
            outcome: Outcome::Fallback { reason },
        }
    }

    pub fn needs_review(&self) -> bool {
        self.outcome.needs_review()
    }
}

/// Failure of a single provider attempt. Never leaves the provider: it is
/// logged and converted into a [`FallbackReason`].
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("translation API key not configured")]
    MissingCredentials,
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("provider returned empty text")]
    EmptyOutput,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("translation timeout")]
    Timeout,
}

impl TranslateError {
    pub fn fallback_reason(&self) -> FallbackReason {
        match self {
            TranslateError::MissingCredentials => FallbackReason::MissingCredentials,
            TranslateError::Status { status, .. } => FallbackReason::Status(*status),
            TranslateError::Malformed(_) => FallbackReason::MalformedResponse,
            TranslateError::EmptyOutput => FallbackReason::EmptyOutput,
            TranslateError::Transport(_) => FallbackReason::Transport,
            TranslateError::Timeout => FallbackReason::Timeout,
        }
    }
}

/// Translates one unit of text. Implementations never fail: on any error
/// they return the original text tagged with a fallback outcome.
pub trait TranslationProvider: Send + Sync {
    fn translate_one<'a>(
        &'a self,
        text: &'a str,
        from: Language,
        to: Language,
    ) -> BoxFuture<'a, Translation>;
}
