//! HTTP client for a remote diagram generator.
//!
//! Every call is a single JSON `POST`:
//!
//! ```text
//! → {"action":"propose","transcript":"…","mode":"replaceCanvas","context":{…}}
//! → {"action":"revise", …, "previousDiagram":"…","feedback":"…"}
//! ← {"diagram":"flowchart TD …"}   or   {"spec":{…}}
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use flowcanvas_core::{ApplyMode, CanvasContext, DiagramSpec};

use crate::config::{GeneratorConfig, RetryConfig};
use crate::generator::{DiagramGenerator, GenerationError, GenerationRequest, Proposal};

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    action: &'static str,
    transcript: &'a str,
    mode: ApplyMode,
    context: &'a CanvasContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_diagram: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    diagram: Option<String>,
    #[serde(default)]
    spec: Option<DiagramSpec>,
}

impl WireResponse {
    fn into_proposal(self) -> Result<Proposal, GenerationError> {
        match (self.spec, self.diagram) {
            (Some(spec), _) => Ok(Proposal::Spec(spec)),
            (None, Some(text)) if !text.trim().is_empty() => Ok(Proposal::Text(text)),
            (None, Some(_)) => Err(GenerationError::MalformedResponse(
                "`diagram` is empty".into(),
            )),
            (None, None) => Err(GenerationError::MalformedResponse(
                "response has neither `diagram` nor `spec`".into(),
            )),
        }
    }
}

/// Generator reached over HTTP, with bounded retry on transient failures.
#[derive(Clone)]
pub struct HttpGenerator {
    inner: Arc<InnerClient>,
}

struct InnerClient {
    http: Client,
    endpoint: Url,
    retry_config: RetryConfig,
}

impl std::fmt::Debug for HttpGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGenerator")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("retry_config", &self.inner.retry_config)
            .finish_non_exhaustive()
    }
}

impl HttpGenerator {
    /// Create a client for `endpoint` with default retry configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::InvalidUrl`] if the URL is malformed.
    /// Returns [`GenerationError::Http`] if the HTTP client fails to build.
    pub fn new(endpoint: impl AsRef<str>) -> Result<Self, GenerationError> {
        Self::with_retry_config(endpoint, RetryConfig::default())
    }

    /// Create a client from a [`GeneratorConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::InvalidUrl`] if no URL is configured or it
    /// is malformed.
    /// Returns [`GenerationError::Http`] if the HTTP client fails to build.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| GenerationError::InvalidUrl("no generator URL configured".into()))?;
        Self::build(url, config.retry.clone(), &config.user_agent)
    }

    /// Create a client with custom retry configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::InvalidUrl`] if the URL is malformed.
    /// Returns [`GenerationError::Http`] if the HTTP client fails to build.
    pub fn with_retry_config(
        endpoint: impl AsRef<str>,
        retry_config: RetryConfig,
    ) -> Result<Self, GenerationError> {
        Self::build(
            endpoint.as_ref(),
            retry_config,
            &GeneratorConfig::default().user_agent,
        )
    }

    fn build(
        endpoint: &str,
        retry_config: RetryConfig,
        user_agent: &str,
    ) -> Result<Self, GenerationError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| GenerationError::InvalidUrl(e.to_string()))?;
        let http = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            inner: Arc::new(InnerClient {
                http,
                endpoint,
                retry_config,
            }),
        })
    }

    /// Endpoint every request is posted to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    async fn send(&self, request: &WireRequest<'_>) -> Result<Proposal, GenerationError> {
        let config = &self.inner.retry_config;
        let attempts = config.max_attempts.max(1);

        for attempt in 0..attempts {
            match self.send_once(request).await {
                Ok(proposal) => return Ok(proposal),
                Err(error) if error.is_retryable() && attempt + 1 < attempts => {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        action = request.action,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %error,
                        "generator call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
        Err(GenerationError::MalformedResponse(
            "retry loop ended without a response".into(),
        ))
    }

    async fn send_once(&self, request: &WireRequest<'_>) -> Result<Proposal, GenerationError> {
        let response = self
            .inner
            .http
            .post(self.inner.endpoint.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let wire: WireResponse = serde_json::from_str(&body)?;
        wire.into_proposal()
    }
}

#[async_trait]
impl DiagramGenerator for HttpGenerator {
    async fn propose(&self, request: &GenerationRequest) -> Result<Proposal, GenerationError> {
        self.send(&WireRequest {
            action: "propose",
            transcript: &request.transcript,
            mode: request.mode,
            context: &request.context,
            previous_diagram: None,
            feedback: None,
        })
        .await
    }

    async fn revise(
        &self,
        request: &GenerationRequest,
        previous: &str,
        feedback: &str,
    ) -> Result<Proposal, GenerationError> {
        self.send(&WireRequest {
            action: "revise",
            transcript: &request.transcript,
            mode: request.mode,
            context: &request.context,
            previous_diagram: Some(previous),
            feedback: Some(feedback),
        })
        .await
    }
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}
