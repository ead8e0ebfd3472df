//! Error types for canvas operations.

use thiserror::Error;

use crate::spec::SchemaViolation;
use crate::store::StoreError;

/// Result type for canvas operations.
pub type CanvasResult<T> = Result<T, CanvasError>;

/// Errors that can occur in canvas operations.
#[derive(Debug, Error)]
pub enum CanvasError {
    /// Element not found in scene.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Invalid element operation.
    #[error("Invalid operation on element: {0}")]
    InvalidOperation(String),

    /// Scene serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The shape-conversion step produced no elements.
    #[error("Shape conversion produced no elements for {nodes} structural nodes")]
    ConversionFailure {
        /// Number of structural nodes handed to the converter.
        nodes: usize,
    },

    /// A diagram spec failed schema validation before rendering.
    #[error("Diagram spec rejected: {}", format_violations(.0))]
    Schema(Vec<SchemaViolation>),

    /// The canvas store or record store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
