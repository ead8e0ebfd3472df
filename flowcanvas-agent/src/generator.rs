//! The external diagram generator seam.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flowcanvas_core::{ApplyMode, CanvasContext, DiagramSpec};

/// Everything the generator is told about one edit request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// What the user said.
    pub transcript: String,
    /// How the result will be applied.
    pub mode: ApplyMode,
    /// Index-addressed view of the current canvas.
    pub context: CanvasContext,
}

impl GenerationRequest {
    /// Create a request.
    #[must_use]
    pub fn new(transcript: impl Into<String>, mode: ApplyMode, context: CanvasContext) -> Self {
        Self {
            transcript: transcript.into(),
            mode,
            context,
        }
    }
}

/// A diagram proposed by the generator.
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    /// Structured spec, rendered locally before linting.
    Spec(DiagramSpec),
    /// Diagram text as written by the generator.
    Text(String),
}

/// Errors from a generator call.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The call ran past its wall-clock limit.
    #[error("generator call timed out after {0:?}")]
    Timeout(Duration),
    /// The call was superseded by a newer request.
    #[error("generator call was cancelled")]
    Cancelled,
    /// HTTP layer failed (connection, body read, etc.).
    #[error("generator HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The generator answered with a non-success status.
    #[error("generator returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The response body was not valid JSON.
    #[error("failed to parse generator payload: {0}")]
    Json(#[from] serde_json::Error),
    /// The configured endpoint is not a valid URL.
    #[error("invalid generator URL: {0}")]
    InvalidUrl(String),
    /// The response was JSON but carried no diagram.
    #[error("malformed generator response: {0}")]
    MalformedResponse(String),
}

impl GenerationError {
    /// Returns true if the transport may succeed on a retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the call was superseded rather than failed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A collaborator that proposes diagrams from natural language.
#[async_trait]
pub trait DiagramGenerator: Send + Sync {
    /// Propose a diagram for `request`.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationError`] if no proposal could be obtained.
    async fn propose(&self, request: &GenerationRequest) -> Result<Proposal, GenerationError>;

    /// Propose a replacement for `previous` that addresses `feedback`.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationError`] if no proposal could be obtained.
    async fn revise(
        &self,
        request: &GenerationRequest,
        previous: &str,
        feedback: &str,
    ) -> Result<Proposal, GenerationError>;
}
