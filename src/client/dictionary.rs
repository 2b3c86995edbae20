//! Read-path dictionary loader for rendered pages.
//! Per-language freshness window, capped retries with exponential backoff,
//! and a built-in dictionary of critical strings so a page never renders
//! blank text.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{ApiClient, ClientError};
use crate::config::ClientConfig;
use crate::translate::Language;

const STATIC_ZH: &[(&str, &str)] = &[
    ("nav.home", "首页"),
    ("nav.campaigns", "活动"),
    ("nav.profile", "我的"),
    ("action.back", "返回"),
    ("action.retry", "重试"),
    ("action.share", "分享"),
    ("action.login", "登录"),
    ("status.loading", "加载中…"),
    ("status.error", "出错了，请稍后再试"),
    ("status.empty", "暂无内容"),
];

const STATIC_TH: &[(&str, &str)] = &[
    ("nav.home", "หน้าแรก"),
    ("nav.campaigns", "แคมเปญ"),
    ("nav.profile", "โปรไฟล์"),
    ("action.back", "ย้อนกลับ"),
    ("action.retry", "ลองอีกครั้ง"),
    ("action.share", "แชร์"),
    ("action.login", "เข้าสู่ระบบ"),
    ("status.loading", "กำลังโหลด…"),
    ("status.error", "เกิดข้อผิดพลาด กรุณาลองใหม่"),
    ("status.empty", "ไม่มีข้อมูล"),
];

/// Built-in string for `key`, if it is one of the critical ones.
pub fn static_text(language: Language, key: &str) -> Option<&'static str> {
    let table = match language {
        Language::Zh => STATIC_ZH,
        Language::Th => STATIC_TH,
    };
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionarySource {
    /// Fetched just now.
    Remote,
    /// Served from the freshness window.
    Cached,
    /// Expired copy, used because every fetch attempt failed.
    Stale,
    /// Nothing fetched; only the built-in strings are available.
    Static,
}

#[derive(Debug, Clone)]
pub struct Dictionary {
    pub language: Language,
    pub source: DictionarySource,
    entries: Arc<HashMap<String, String>>,
}

impl Dictionary {
    pub fn builtin(language: Language) -> Self {
        let table = match language {
            Language::Zh => STATIC_ZH,
            Language::Th => STATIC_TH,
        };
        let entries = table
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            language,
            source: DictionarySource::Static,
            entries: Arc::new(entries),
        }
    }

    /// Value for `key`; falls back to the built-in string, then to the key
    /// itself. Never blank.
    pub fn text<'a>(&'a self, key: &'a str) -> &'a str {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| static_text(self.language, key))
            .unwrap_or(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct CachedEntry {
    fetched_at: Instant,
    entries: Arc<HashMap<String, String>>,
}

pub struct DictionaryClient {
    api: ApiClient,
    ttl: Duration,
    max_attempts: u32,
    base_delay: Duration,
    cache: Mutex<HashMap<Language, CachedEntry>>,
}

impl DictionaryClient {
    pub fn new(api: ApiClient, config: &ClientConfig) -> Self {
        Self {
            api,
            ttl: config.dictionary_ttl,
            max_attempts: config.max_fetch_attempts.max(1),
            base_delay: config.retry_base_delay,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load the dictionary for `language`. Never fails: exhausted retries
    /// fall back to an expired copy if one exists, else the built-in strings.
    pub async fn load(&self, language: Language) -> Dictionary {
        if let Some(entries) = self.fresh(language) {
            debug!(%language, "dictionary served from cache");
            return Dictionary {
                language,
                source: DictionarySource::Cached,
                entries,
            };
        }

        match self.fetch_with_retry(language).await {
            Ok(entries) => {
                let entries = Arc::new(entries);
                self.cache.lock().insert(
                    language,
                    CachedEntry {
                        fetched_at: Instant::now(),
                        entries: Arc::clone(&entries),
                    },
                );
                Dictionary {
                    language,
                    source: DictionarySource::Remote,
                    entries,
                }
            }
            Err(e) => {
                let stale = self
                    .cache
                    .lock()
                    .get(&language)
                    .map(|cached| Arc::clone(&cached.entries));
                match stale {
                    Some(entries) => {
                        warn!(%language, error = %e, "dictionary fetch failed, serving expired copy");
                        Dictionary {
                            language,
                            source: DictionarySource::Stale,
                            entries,
                        }
                    }
                    None => {
                        warn!(%language, error = %e, "dictionary fetch failed, using built-in strings");
                        Dictionary::builtin(language)
                    }
                }
            }
        }
    }

    /// Drop the cached copy so the next `load` refetches.
    pub fn invalidate(&self, language: Language) {
        self.cache.lock().remove(&language);
    }

    fn fresh(&self, language: Language) -> Option<Arc<HashMap<String, String>>> {
        let cache = self.cache.lock();
        cache
            .get(&language)
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.entries))
    }

    async fn fetch_with_retry(&self, language: Language) -> Result<HashMap<String, String>, ClientError> {
        let mut attempt = 0;
        loop {
            match self.api.fetch_dictionary(language).await {
                Ok(entries) => return Ok(entries),
                Err(e) if attempt + 1 < self.max_attempts => {
                    let delay = self.base_delay * 2u32.pow(attempt);
                    debug!(%language, attempt, ?delay, error = %e, "dictionary fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
