//! Caller-facing result envelope.

use serde::Serialize;
use veriface_core::{CoreError, QualityMetrics};

use crate::engine::ServiceError;

/// `success` plus either a `result` or a human-readable `message`.
///
/// A no-face liveness failure still reports the primary frame's quality
/// metrics so the caller can tell the user what to fix.
#[derive(Debug, Clone, Serialize)]
pub struct Response<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityMetrics>,
}

impl<T> Response<T> {
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            message: None,
            result: Some(result),
            quality: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            result: None,
            quality: None,
        }
    }
}

impl<T> From<Result<T, ServiceError>> for Response<T> {
    fn from(outcome: Result<T, ServiceError>) -> Self {
        match outcome {
            Ok(result) => Self::ok(result),
            Err(ServiceError::Core(CoreError::NoFaceDetected { quality })) => Self {
                quality,
                ..Self::failure("no face detected")
            },
            Err(e) => Self::failure(e.to_string()),
        }
    }
}
