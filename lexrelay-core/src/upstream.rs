//! Upstream chat backend.
//!
//! Provides a `ChatBackend` trait with one implementation:
//! - **Dify**: `POST /chat-messages` in streaming mode, plus the stop and
//!   parameters endpoints used for cancellation and health checks.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::UpstreamConfig;

/// Raw upstream body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

// ============================================================================
// ChatBackend trait
// ============================================================================

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a streaming chat turn. Resolves once the upstream has answered
    /// with a success status; the body is then read through the stream.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ByteStream, UpstreamError>;

    /// Ask the upstream to stop generating the answer for `task_id`.
    async fn stop_generation(
        &self,
        task_id: &str,
        user: &str,
    ) -> Result<serde_json::Value, UpstreamError>;

    /// Cheap authenticated call proving the upstream is reachable.
    async fn health_check(&self) -> Result<(), UpstreamError>;

    /// Base URL, for status output.
    fn endpoint(&self) -> &str;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing upstream app key")]
    MissingApiKey,

    #[error("Missing upstream API URL")]
    MissingApiUrl,
}

// ============================================================================
// Request types
// ============================================================================

/// Body of `POST /chat-messages`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub inputs: serde_json::Value,
    pub query: String,
    pub response_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub user: String,
    pub auto_generate_name: bool,
}

impl ChatRequest {
    pub fn streaming(query: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            inputs: serde_json::json!({}),
            query: query.into(),
            response_mode: "streaming".to_string(),
            conversation_id: None,
            user: user.into(),
            auto_generate_name: true,
        }
    }

    /// Continue an existing conversation. Empty ids start a new one.
    pub fn with_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id.filter(|c| !c.is_empty());
        self
    }

    /// Null inputs become an empty object.
    pub fn with_inputs(mut self, inputs: serde_json::Value) -> Self {
        if !inputs.is_null() {
            self.inputs = inputs;
        }
        self
    }
}

#[derive(Debug, Serialize)]
struct StopRequest<'a> {
    user: &'a str,
}

#[derive(Debug, Deserialize)]
struct DifyErrorResponse {
    message: Option<String>,
}

// ============================================================================
// DifyClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct DifyClient {
    client: Client,
    base_url: String,
    app_key: String,
    default_user: String,
}

impl DifyClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        Self::with_base_url(config, config.api_url.clone())
    }

    /// Create a client against a custom base URL (for testing / integration)
    pub fn with_base_url(config: &UpstreamConfig, base_url: String) -> Result<Self, UpstreamError> {
        if config.app_key.is_empty() {
            return Err(UpstreamError::MissingApiKey);
        }
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(UpstreamError::MissingApiUrl);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url,
            app_key: config.app_key.clone(),
            default_user: config.default_user.clone(),
        })
    }

    /// Turn a non-2xx response into `UpstreamError::Api`, preferring Dify's
    /// own `message` field over the raw body.
    async fn api_error(response: reqwest::Response) -> UpstreamError {
        let code = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<DifyErrorResponse>(&body)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or(body);

        tracing::error!(code = code, message = %message, "Dify API error");
        UpstreamError::Api { code, message }
    }
}

#[async_trait]
impl ChatBackend for DifyClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ByteStream, UpstreamError> {
        let url = format!("{}/chat-messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.app_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        Ok(response.bytes_stream().map_err(UpstreamError::Http).boxed())
    }

    async fn stop_generation(
        &self,
        task_id: &str,
        user: &str,
    ) -> Result<serde_json::Value, UpstreamError> {
        let url = format!("{}/chat-messages/{}/stop", self.base_url, task_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.app_key)
            .json(&StopRequest { user })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        Ok(response.json().await?)
    }

    async fn health_check(&self) -> Result<(), UpstreamError> {
        let url = format!("{}/parameters", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.app_key)
            .query(&[("user", self.default_user.as_str())])
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn name(&self) -> &str {
        "dify"
    }
}

// ============================================================================
// TESTS
// ============================================================================
