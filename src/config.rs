//! Application configuration, read once at startup and passed into
//! constructors. Nothing in the crate reads the environment after this.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default endpoint of the text-generation API used for translation.
pub const DEFAULT_API_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";
pub const DEFAULT_MODEL: &str = "qwen-turbo";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Bearer token. `None` degrades every translation to pass-through.
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub request_timeout: Duration,
    /// Retries for 429 and 5xx responses.
    pub max_retries: u32,
    /// Minimum spacing between outgoing requests.
    pub min_interval: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.into(),
            model: DEFAULT_MODEL.into(),
            temperature: 0.1,
            top_p: 0.5,
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
            min_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Content longer than this (in chars) is chunked.
    pub threshold: usize,
    pub max_len: usize,
    pub max_concurrent: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            threshold: 2000,
            max_len: 2000,
            max_concurrent: 8,
        }
    }
}

/// In-memory memoization of successful provider results.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    /// Token accepted on admin routes. `None` rejects every admin call.
    pub admin_token: Option<String>,
    pub commit_flush_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            database_path: PathBuf::from("translations.db"),
            admin_token: None,
            commit_flush_interval: Duration::from_millis(300),
        }
    }
}

/// Settings of the authoring-UI and page-render clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub debounce: Duration,
    pub dictionary_ttl: Duration,
    pub max_fetch_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080".into(),
            debounce: Duration::from_millis(800),
            dictionary_ttl: Duration::from_secs(300),
            max_fetch_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LineConfig {
    /// Channel access token. `None` selects the mock capability.
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub chunking: ChunkingConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub line: LineConfig,
}

impl AppConfig {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = AppConfig::default();

        config.provider.api_key = get("TRANSLATION_API_KEY");
        if let Some(url) = get("TRANSLATION_API_URL") {
            config.provider.api_url = url;
        }
        if let Some(model) = get("TRANSLATION_MODEL") {
            config.provider.model = model;
        }
        if let Some(secs) = parse::<u64>("TRANSLATION_TIMEOUT_SECS", get("TRANSLATION_TIMEOUT_SECS"))? {
            config.provider.request_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse("TRANSLATION_MAX_RETRIES", get("TRANSLATION_MAX_RETRIES"))? {
            config.provider.max_retries = n;
        }
        if let Some(n) = parse("CHUNK_THRESHOLD", get("CHUNK_THRESHOLD"))? {
            config.chunking.threshold = n;
        }
        if let Some(n) = parse("CHUNK_MAX_LEN", get("CHUNK_MAX_LEN"))? {
            config.chunking.max_len = n;
        }
        if let Some(addr) = parse("BIND_ADDR", get("BIND_ADDR"))? {
            config.server.bind_addr = addr;
        }
        if let Some(path) = get("DATABASE_PATH") {
            config.server.database_path = PathBuf::from(path);
        }
        config.server.admin_token = get("ADMIN_TOKEN");
        if let Some(base) = get("TRANSLATION_API_BASE") {
            config.client.api_base_url = base;
        }
        config.line.access_token = get("LINE_ACCESS_TOKEN");

        Ok(config)
    }
}

fn parse<T: FromStr>(name: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
