//! veriface-core: liveness assessment and face similarity decisions.
//!
//! Answers two questions for a document-onboarding flow: is the live capture a
//! present human (liveness), and does it show the same person as the document
//! photo (identity match). Face detection, landmarks and embeddings come from
//! an external [`FaceProvider`]; everything else is computed here from pixels.

pub mod error;
pub mod explain;
pub mod liveness;
pub mod passive;
pub mod pixels;
pub mod policy;
pub mod provider;
pub mod quality;
pub mod similarity;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::CoreError;
pub use explain::{decide, render_comparison, AuditRecord, ComparisonStyle, MatchReport};
pub use liveness::{check_liveness, check_session_liveness, LivenessAssessment, LivenessMode};
pub use passive::PassiveLiveness;
pub use policy::{LivenessPolicy, MatchPolicy, PassivePolicy, Policy, QualityPolicy};
pub use provider::{FaceProvider, FullFrameProvider, ProviderError};
pub use quality::{assess_face_crop, assess_quality, FaceCropQuality};
pub use similarity::{compare, match_faces, MatchAssessment, MatchMethod, StructuralScores, Threshold};
pub use tracker::{eye_aspect_ratio, head_movement, BlinkTracker};
pub use types::{EarSample, FaceEmbedding, FaceRegion, Landmarks, Point, QualityMetrics};
