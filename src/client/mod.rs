//! Client side of the translation API: the authoring preview coordinator
//! and the read-path dictionary loader.

pub mod coordinator;
pub mod dictionary;

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::translate::orchestrator::{FieldError, PreviewRequest, PreviewResponse};
use crate::translate::Language;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{} invalid field(s)", .0.len())]
    Invalid(Vec<FieldError>),
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Deserialize)]
struct DataEnvelope {
    data: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ErrorsEnvelope {
    errors: Vec<FieldError>,
}

/// Thin reqwest wrapper over the translation HTTP API.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn preview(&self, request: &PreviewRequest) -> Result<PreviewResponse, ClientError> {
        let url = format!("{}/translations/preview", self.base_url);
        let resp = self.http.post(&url).json(request).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body = resp.text().await?;
            return match serde_json::from_str::<ErrorsEnvelope>(&body) {
                Ok(envelope) => Err(ClientError::Invalid(envelope.errors)),
                Err(_) => Err(ClientError::Status {
                    status: status.as_u16(),
                    body,
                }),
            };
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<PreviewResponse>().await?)
    }

    pub async fn fetch_dictionary(&self, language: Language) -> Result<HashMap<String, String>, ClientError> {
        let url = format!("{}/translations/{}", self.base_url, language.code());
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<DataEnvelope>().await?.data)
    }
}
