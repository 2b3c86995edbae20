//! Text-generation API translation client.
//! Connection pooling via reqwest, min-interval rate limiting, retry on
//! 429/5xx/timeout, and a no-throw contract: every failure is logged and
//! degrades to the original text tagged with a fallback outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Language, TranslateError, Translation, TranslationProvider};
use crate::config::ProviderConfig;
use crate::metrics::{metric_names, MetricsRegistry};

const SYSTEM_PROMPT: &str = "You translate user-interface text for a marketing app. \
Keep the translation as brief as the original. Output only the translation, nothing else.";

pub struct TextGenerationClient {
    http: reqwest::Client,
    config: ProviderConfig,
    /// Simple token-bucket: the next instant a request may start.
    next_allowed: tokio::sync::Mutex<Instant>,
    metrics: Arc<MetricsRegistry>,
}

impl TextGenerationClient {
    pub fn new(config: ProviderConfig, metrics: Arc<MetricsRegistry>) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TranslateError::Transport(e.to_string()))?;

        if config.api_key.is_none() {
            warn!("TRANSLATION_API_KEY not set, translations degrade to original text");
        }

        Ok(Self {
            http,
            config,
            next_allowed: tokio::sync::Mutex::new(Instant::now()),
            metrics,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Translate `text`, never failing. Blank text is returned as-is.
    pub async fn translate(&self, text: &str, from: Language, to: Language) -> Translation {
        if text.trim().is_empty() {
            return Translation::unchanged(text);
        }

        let span = self.metrics.span(metric_names::PROVIDER_CALL);
        let result = self.try_translate(text, from, to).await;
        span.finish();

        match result {
            Ok(translated) => Translation::translated(translated),
            Err(e) => {
                let reason = e.fallback_reason();
                self.metrics.increment(metric_names::PROVIDER_FALLBACK);
                warn!(
                    error = %e,
                    ?reason,
                    %from,
                    %to,
                    chars = text.chars().count(),
                    "translation degraded to original text"
                );
                Translation::fallback(text, reason)
            }
        }
    }

    /// One translation attempt chain, surfacing the failure cause.
    pub async fn try_translate(
        &self,
        text: &str,
        from: Language,
        to: Language,
    ) -> Result<String, TranslateError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(TranslateError::MissingCredentials)?;

        self.rate_limit_wait().await;

        let body = serde_json::json!({
            "model": self.config.model,
            "input": {
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": build_user_prompt(text, from, to)}
                ]
            },
            "parameters": {
                "temperature": self.config.temperature,
                "top_p": self.config.top_p
            }
        });

        let response = self.send_with_retry(api_key, &body).await?;
        let parsed: GenerationResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                TranslateError::Timeout
            } else {
                TranslateError::Malformed(e.to_string())
            }
        })?;

        let translated = parsed
            .output
            .and_then(|o| o.text)
            .ok_or_else(|| TranslateError::Malformed("missing output.text".into()))?;

        let trimmed = translated.trim();
        if trimmed.is_empty() {
            return Err(TranslateError::EmptyOutput);
        }
        debug!(%from, %to, chars = trimmed.chars().count(), "translation received");
        Ok(trimmed.to_string())
    }

    async fn rate_limit_wait(&self) {
        if self.config.min_interval.is_zero() {
            return;
        }
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.config.min_interval;
    }

    /// 429: Retry-After or 1s/2s/4s. 5xx: 500ms exponential backoff.
    /// Both capped by `max_retries`. Timeout: one immediate retry.
    async fn send_with_retry(
        &self,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, TranslateError> {
        let max_retries = self.config.max_retries;
        let mut attempt: u32 = 0;
        let mut timeout_retried = false;

        loop {
            let result = self
                .http
                .post(&self.config.api_url)
                .bearer_auth(api_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 && attempt < max_retries => {
                    let wait = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| Duration::from_secs(1 << attempt.min(4)));
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() && attempt < max_retries => {
                    let wait = Duration::from_millis(500 * (1 << attempt.min(4)));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(TranslateError::Status {
                        status,
                        body: body_text.chars().take(200).collect(),
                    });
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(TranslateError::Timeout);
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => return Err(TranslateError::Transport(e.to_string())),
            }
        }
    }
}

impl TranslationProvider for TextGenerationClient {
    fn translate_one<'a>(
        &'a self,
        text: &'a str,
        from: Language,
        to: Language,
    ) -> BoxFuture<'a, Translation> {
        Box::pin(self.translate(text, from, to))
    }
}

/// The text is embedded verbatim after the instruction line.
fn build_user_prompt(text: &str, from: Language, to: Language) -> String {
    format!(
        "Translate the following {} text into {}. Return only the translation.\n\n{}",
        from.prompt_name(),
        to.prompt_name(),
        text
    )
}

#[derive(Deserialize)]
struct GenerationResponse {
    output: Option<GenerationOutput>,
}

#[derive(Deserialize)]
struct GenerationOutput {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::{FallbackReason, Outcome};
    use axum::extract::State;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct FakeApi {
        status: StatusCode,
        reply: Value,
        hits: Arc<AtomicUsize>,
        seen: Arc<parking_lot::Mutex<Vec<(Option<String>, Value)>>>,
    }

    impl FakeApi {
        fn new(status: StatusCode, reply: Value) -> Self {
            Self {
                status,
                reply,
                hits: Arc::new(AtomicUsize::new(0)),
                seen: Arc::new(parking_lot::Mutex::new(Vec::new())),
            }
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    async fn generate(
        State(api): State<FakeApi>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        api.hits.fetch_add(1, Ordering::SeqCst);
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        api.seen.lock().push((auth, body));
        (api.status, Json(api.reply.clone()))
    }

    async fn serve(api: FakeApi) -> String {
        serve_app(Router::new().route("/generate", post(generate)).with_state(api)).await
    }

    async fn serve_app(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/generate")
    }

    fn client(api_url: String, api_key: Option<&str>, max_retries: u32) -> TextGenerationClient {
        client_with_timeout(api_url, api_key, max_retries, Duration::from_secs(5))
    }

    fn client_with_timeout(
        api_url: String,
        api_key: Option<&str>,
        max_retries: u32,
        request_timeout: Duration,
    ) -> TextGenerationClient {
        let config = ProviderConfig {
            api_key: api_key.map(str::to_string),
            api_url,
            max_retries,
            min_interval: Duration::ZERO,
            request_timeout,
            ..ProviderConfig::default()
        };
        TextGenerationClient::new(config, Arc::new(MetricsRegistry::new())).unwrap()
    }

    #[tokio::test]
    async fn missing_credentials_skip_the_network() {
        let api = FakeApi::new(StatusCode::OK, json!({"output": {"text": "สวัสดี"}}));
        let url = serve(api.clone()).await;
        let provider = client(url, None, 0);

        let result = provider.translate("Hello", Language::Zh, Language::Th).await;
        assert_eq!(result.text, "Hello");
        assert_eq!(
            result.outcome,
            Outcome::Fallback {
                reason: FallbackReason::MissingCredentials
            }
        );
        assert_eq!(api.hits(), 0);
        assert!(!provider.has_credentials());
    }

    #[tokio::test]
    async fn successful_call_is_trimmed_and_shaped() {
        let api = FakeApi::new(StatusCode::OK, json!({"output": {"text": "  คูปองส่วนลด \n"}}));
        let url = serve(api.clone()).await;
        let provider = client(url, Some("sk-test"), 0);

        let result = provider.translate("优惠券", Language::Zh, Language::Th).await;
        assert_eq!(result, Translation::translated("คูปองส่วนลด"));

        let seen = api.seen.lock();
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
        assert_eq!(body["model"], "qwen-turbo");
        assert_eq!(body["parameters"]["temperature"], 0.1);
        let messages = body["input"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        let user = messages[1]["content"].as_str().unwrap();
        assert!(user.contains("Chinese") && user.contains("Thai"));
        assert!(user.ends_with("优惠券"));
    }

    #[tokio::test]
    async fn client_error_status_falls_back() {
        let api = FakeApi::new(StatusCode::BAD_REQUEST, json!({"code": "InvalidParameter"}));
        let url = serve(api.clone()).await;
        let provider = client(url, Some("sk-test"), 2);

        let result = provider.translate("活动规则", Language::Zh, Language::Th).await;
        assert_eq!(result.text, "活动规则");
        assert_eq!(
            result.outcome,
            Outcome::Fallback {
                reason: FallbackReason::Status(400)
            }
        );
        assert_eq!(api.hits(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_fall_back() {
        let api = FakeApi::new(StatusCode::SERVICE_UNAVAILABLE, json!({}));
        let url = serve(api.clone()).await;
        let provider = client(url, Some("sk-test"), 1);

        let result = provider.translate("立即领取", Language::Zh, Language::Th).await;
        assert_eq!(result.text, "立即领取");
        assert_eq!(api.hits(), 2);
        assert!(result.needs_review());
    }

    /// Answers 429 with `Retry-After: 0` for the first `limited` hits.
    async fn rate_limited_api(limited: usize, hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/generate",
            post(move || {
                let hits = Arc::clone(&hits);
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < limited {
                        (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "0")], "slow down").into_response()
                    } else {
                        Json(json!({"output": {"text": "ลดราคา"}})).into_response()
                    }
                }
            }),
        );
        serve_app(app).await
    }

    #[tokio::test]
    async fn rate_limit_honours_retry_after() {
        let hits = Arc::new(AtomicUsize::new(0));
        let provider = client(rate_limited_api(1, Arc::clone(&hits)).await, Some("sk-test"), 3);

        let result = provider.translate("打折", Language::Zh, Language::Th).await;
        assert_eq!(result, Translation::translated("ลดราคา"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rate_limit_beyond_retry_budget_falls_back() {
        let hits = Arc::new(AtomicUsize::new(0));
        let provider = client(rate_limited_api(usize::MAX, Arc::clone(&hits)).await, Some("sk-test"), 2);

        let result = provider.translate("打折", Language::Zh, Language::Th).await;
        assert_eq!(result.text, "打折");
        assert_eq!(
            result.outcome,
            Outcome::Fallback {
                reason: FallbackReason::Status(429)
            }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    /// Stalls past any short client timeout for the first `stalled` hits.
    async fn stalling_api(stalled: usize, hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/generate",
            post(move || {
                let hits = Arc::clone(&hits);
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < stalled {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                    Json(json!({"output": {"text": "ตอบกลับ"}}))
                }
            }),
        );
        serve_app(app).await
    }

    #[tokio::test]
    async fn timeout_is_retried_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = stalling_api(1, Arc::clone(&hits)).await;
        let provider = client_with_timeout(url, Some("sk-test"), 0, Duration::from_millis(200));

        let result = provider.translate("回复", Language::Zh, Language::Th).await;
        assert_eq!(result, Translation::translated("ตอบกลับ"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_timeout_falls_back() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = stalling_api(usize::MAX, Arc::clone(&hits)).await;
        let provider = client_with_timeout(url, Some("sk-test"), 3, Duration::from_millis(200));

        let result = provider.translate("回复", Language::Zh, Language::Th).await;
        assert_eq!(result.text, "回复");
        assert_eq!(
            result.outcome,
            Outcome::Fallback {
                reason: FallbackReason::Timeout
            }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_and_malformed_bodies_fall_back() {
        let api = FakeApi::new(StatusCode::OK, json!({"output": {"text": "   "}}));
        let provider = client(serve(api).await, Some("sk-test"), 0);
        let result = provider.translate("领取", Language::Zh, Language::Th).await;
        assert_eq!(result.text, "领取");
        assert_eq!(
            result.outcome,
            Outcome::Fallback {
                reason: FallbackReason::EmptyOutput
            }
        );

        let api = FakeApi::new(StatusCode::OK, json!({"choices": []}));
        let provider = client(serve(api).await, Some("sk-test"), 0);
        let result = provider.translate("领取", Language::Zh, Language::Th).await;
        assert_eq!(
            result.outcome,
            Outcome::Fallback {
                reason: FallbackReason::MalformedResponse
            }
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_falls_back() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = client(format!("http://{addr}/generate"), Some("sk-test"), 0);
        let result = provider.translate("สวัสดี", Language::Th, Language::Zh).await;
        assert_eq!(result.text, "สวัสดี");
        assert!(result.needs_review());
    }

    #[tokio::test]
    async fn blank_text_is_not_sent() {
        let api = FakeApi::new(StatusCode::OK, json!({"output": {"text": "x"}}));
        let provider = client(serve(api.clone()).await, Some("sk-test"), 0);
        let result = provider.translate("  ", Language::Zh, Language::Th).await;
        assert_eq!(result, Translation::unchanged("  "));
        assert_eq!(api.hits(), 0);
    }
}
