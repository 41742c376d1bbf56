use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CompletionConfig;
use crate::error::{ChatError, Result};
use crate::models::{ApiErrorEnvelope, CompletionRequest, CompletionResponse};
use crate::stream::{self, LineStream};

/// What the completion API handed back, depending on `CompletionRequest::stream`.
pub enum TransportResponse {
    /// Open response body, split into lines. Dropping it closes the connection.
    Stream(LineStream),
    Completion(CompletionResponse),
}

#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn send(&self, request: &CompletionRequest) -> Result<TransportResponse>;
}

pub struct HttpTransport {
    client: Client,
    api_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Option<Duration>,
        read_timeout: Option<Duration>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let mut builder = Client::builder().connect_timeout(connect_timeout);
        // A total deadline also covers the streamed body; only stalls should fail.
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = read_timeout {
            builder = builder.read_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(cfg: &CompletionConfig) -> Result<Self> {
        Self::new(
            cfg.api_url.clone(),
            cfg.api_key.clone(),
            cfg.request_timeout_seconds.map(Duration::from_secs),
            cfg.read_timeout_seconds.map(Duration::from_secs),
            Duration::from_secs(cfg.connect_timeout_seconds),
        )
    }

    async fn post(&self, request: &CompletionRequest) -> Result<Response> {
        debug!(
            model = %request.model,
            stream = request.stream,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!("Completion request failed before a response: {}", e);
                ChatError::InvalidResponse(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(bad_response(status, response).await);
        }

        info!(status = status.as_u16(), stream = request.stream, "Completion API responded");
        Ok(response)
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<TransportResponse> {
        let response = self.post(request).await?;

        if request.stream {
            return Ok(TransportResponse::Stream(stream::lines(
                response.bytes_stream(),
            )));
        }

        let body = response.bytes().await?;
        let completion = serde_json::from_slice::<CompletionResponse>(&body)
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        Ok(TransportResponse::Completion(completion))
    }
}

/// Builds `BadResponse` from a non-2xx reply, preferring the API's own error message.
async fn bad_response(status: StatusCode, response: Response) -> ChatError {
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to read error body: {}", e);
            String::new()
        }
    };

    let message = error_message(status, &body);
    warn!(status = status.as_u16(), "Completion API error: {}", message);

    ChatError::BadResponse {
        status_code: status.as_u16(),
        message,
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
    }
}
