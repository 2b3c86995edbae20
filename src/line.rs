//! LINE login/share capability, injected once at startup.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::LineConfig;

pub const LINE_API_BASE: &str = "https://api.line.me";
const SHARE_BASE: &str = "https://line.me/R/share";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineProfile {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LineError {
    #[error("not logged in to LINE")]
    NotLoggedIn,
    #[error("LINE API transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("LINE API returned {0}")]
    Status(u16),
    #[error("invalid share url: {0}")]
    InvalidUrl(String),
}

pub trait LineCapability: Send + Sync {
    fn is_logged_in(&self) -> bool;
    fn profile(&self) -> BoxFuture<'_, Result<LineProfile, LineError>>;
    fn share_url(&self, text: &str) -> Result<String, LineError> {
        reqwest::Url::parse_with_params(SHARE_BASE, &[("text", text)])
            .map(String::from)
            .map_err(|e| LineError::InvalidUrl(e.to_string()))
    }
}

/// Pick the implementation for this process: the real API when a channel
/// access token is configured, a logged-out mock otherwise.
pub fn from_config(config: &LineConfig) -> Result<Arc<dyn LineCapability>, LineError> {
    match &config.access_token {
        Some(token) => {
            info!("LINE capability: api");
            Ok(Arc::new(LineApiClient::new(LINE_API_BASE, token.clone())?))
        }
        None => {
            warn!("LINE_ACCESS_TOKEN not set, using mock LINE capability");
            Ok(Arc::new(MockLine::logged_out()))
        }
    }
}

pub struct LineApiClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl LineApiClient {
    pub fn new(base_url: impl Into<String>, access_token: String) -> Result<Self, LineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }

    async fn fetch_profile(&self) -> Result<LineProfile, LineError> {
        let resp = self
            .http
            .get(format!("{}/v2/profile", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LineError::NotLoggedIn);
        }
        if !status.is_success() {
            return Err(LineError::Status(status.as_u16()));
        }
        Ok(resp.json::<LineProfile>().await?)
    }
}

impl LineCapability for LineApiClient {
    fn is_logged_in(&self) -> bool {
        !self.access_token.is_empty()
    }

    fn profile(&self) -> BoxFuture<'_, Result<LineProfile, LineError>> {
        Box::pin(self.fetch_profile())
    }
}

/// In-process stand-in for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct MockLine {
    profile: Option<LineProfile>,
}

impl MockLine {
    pub fn logged_out() -> Self {
        Self { profile: None }
    }

    pub fn logged_in(profile: LineProfile) -> Self {
        Self {
            profile: Some(profile),
        }
    }
}

impl LineCapability for MockLine {
    fn is_logged_in(&self) -> bool {
        self.profile.is_some()
    }

    fn profile(&self) -> BoxFuture<'_, Result<LineProfile, LineError>> {
        let profile = self.profile.clone();
        Box::pin(async move { profile.ok_or(LineError::NotLoggedIn) })
    }
}
