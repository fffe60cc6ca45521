use thiserror::Error;

use crate::provider::ProviderError;
use crate::types::QualityMetrics;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    /// No face where one was required. Liveness checks still attach the
    /// quality metrics of the primary frame for diagnostics.
    #[error("no face detected")]
    NoFaceDetected { quality: Option<QualityMetrics> },
    #[error("face embedding capability unavailable")]
    EmbeddingUnavailable,
    #[error("embedding dimension mismatch: {left} vs {right}")]
    EmbeddingMismatch { left: usize, right: usize },
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("face provider error: {0}")]
    Provider(#[from] ProviderError),
}
