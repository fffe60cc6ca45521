//! Face similarity.
//!
//! Two strategies, selected at the call boundary:
//!
//! - **Embedding**: Euclidean distance between provider embeddings. Robust to
//!   pose and lighting; preferred whenever the provider can embed.
//! - **Structural**: both crops resized to a fixed square, then the mean of
//!   grayscale histogram correlation and Gaussian-windowed SSIM. Needs no
//!   model, but resizing discards aspect ratio and the method is sensitive
//!   to lighting.

use std::fmt;
use std::str::FromStr;

use image::DynamicImage;
use ndarray::Array2;
use serde::Serialize;

use crate::error::CoreError;
use crate::pixels;
use crate::policy::MatchPolicy;
use crate::provider::FaceProvider;

/// SSIM stabilisers for 8-bit data: (0.01 × 255)² and (0.03 × 255)².
const SSIM_C1: f64 = 6.5025;
const SSIM_C2: f64 = 58.5225;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Embedding,
    Structural,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMethod::Embedding => f.write_str("embedding"),
            MatchMethod::Structural => f.write_str("structural"),
        }
    }
}

impl FromStr for MatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "embedding" => Ok(MatchMethod::Embedding),
            "structural" => Ok(MatchMethod::Structural),
            other => Err(format!(
                "unknown match method '{other}' (expected 'embedding' or 'structural')"
            )),
        }
    }
}

/// The cutoff a decision was made against, in the units of its method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Threshold {
    /// Matched when the combined score is strictly greater.
    MinScore(f32),
    /// Matched when the embedding distance is less than or equal.
    MaxDistance(f32),
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::MinScore(v) => write!(f, "score > {v:.2}"),
            Threshold::MaxDistance(v) => write!(f, "distance <= {v:.2}"),
        }
    }
}

/// Sub-scores of the structural method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StructuralScores {
    pub histogram_correlation: f64,
    pub ssim: f64,
}

impl StructuralScores {
    pub fn combined(&self) -> f64 {
        (self.histogram_correlation + self.ssim) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchAssessment {
    /// 0..=1.
    pub similarity_score: f32,
    /// `similarity_score` × 100.
    pub confidence_percent: f32,
    /// Embedding distance, embedding method only.
    pub distance: Option<f32>,
    pub matched: bool,
    pub method_used: MatchMethod,
    pub threshold: Threshold,
    /// Structural method only.
    pub structural: Option<StructuralScores>,
}

/// Compare two face crops with exactly the requested method.
///
/// The embedding method fails with [`CoreError::EmbeddingUnavailable`] when
/// the provider cannot embed and with [`CoreError::NoFaceDetected`] when it
/// finds no face in either crop.
pub fn compare(
    provider: &dyn FaceProvider,
    face_a: &DynamicImage,
    face_b: &DynamicImage,
    method: MatchMethod,
    policy: &MatchPolicy,
) -> Result<MatchAssessment, CoreError> {
    pixels::ensure_non_empty(face_a)?;
    pixels::ensure_non_empty(face_b)?;
    match method {
        MatchMethod::Embedding => compare_embeddings(provider, face_a, face_b, policy),
        MatchMethod::Structural => compare_structural(face_a, face_b, policy),
    }
}

/// Compare two face crops, choosing the method by policy.
///
/// With no method requested the embedding method is used when the provider
/// supports it. A requested embedding comparison falls back to the structural
/// method when the capability is missing. `threshold` overrides the policy
/// cutoff of whichever method ends up being used.
pub fn match_faces(
    provider: &dyn FaceProvider,
    face_a: &DynamicImage,
    face_b: &DynamicImage,
    method: Option<MatchMethod>,
    threshold: Option<f32>,
    policy: &MatchPolicy,
) -> Result<MatchAssessment, CoreError> {
    let mut policy = policy.clone();
    if let Some(t) = threshold {
        if !t.is_finite() {
            return Err(CoreError::InvalidPolicy(format!(
                "match threshold must be finite, got {t}"
            )));
        }
    }

    let requested = method.unwrap_or(if provider.supports_embeddings() {
        MatchMethod::Embedding
    } else {
        MatchMethod::Structural
    });

    if requested == MatchMethod::Embedding {
        if let Some(t) = threshold {
            policy.distance_threshold = t;
        }
        match compare(provider, face_a, face_b, MatchMethod::Embedding, &policy) {
            Err(CoreError::EmbeddingUnavailable) => {
                tracing::warn!("embedding capability unavailable; using structural method");
            }
            Err(CoreError::NoFaceDetected { .. }) if policy.fallback_on_unembeddable => {
                tracing::warn!("no embeddable face; using structural method");
            }
            other => return other,
        }
    }

    if let Some(t) = threshold {
        policy.structural_threshold = t;
    }
    compare(provider, face_a, face_b, MatchMethod::Structural, &policy)
}

fn compare_embeddings(
    provider: &dyn FaceProvider,
    face_a: &DynamicImage,
    face_b: &DynamicImage,
    policy: &MatchPolicy,
) -> Result<MatchAssessment, CoreError> {
    if !provider.supports_embeddings() {
        return Err(CoreError::EmbeddingUnavailable);
    }
    let (Some(a), Some(b)) = (provider.embed_face(face_a)?, provider.embed_face(face_b)?) else {
        return Err(CoreError::NoFaceDetected { quality: None });
    };

    let distance = a.distance(&b)?;
    let similarity_score = (1.0 - distance).clamp(0.0, 1.0);
    let matched = distance <= policy.distance_threshold;

    tracing::debug!(
        distance,
        similarity_score,
        matched,
        threshold = policy.distance_threshold,
        "embedding comparison"
    );

    Ok(MatchAssessment {
        similarity_score,
        confidence_percent: similarity_score * 100.0,
        distance: Some(distance),
        matched,
        method_used: MatchMethod::Embedding,
        threshold: Threshold::MaxDistance(policy.distance_threshold),
        structural: None,
    })
}

fn compare_structural(
    face_a: &DynamicImage,
    face_b: &DynamicImage,
    policy: &MatchPolicy,
) -> Result<MatchAssessment, CoreError> {
    let scores = structural_scores(face_a, face_b, policy.structural_size);
    let combined = scores.combined() as f32;
    let matched = combined > policy.structural_threshold;
    // Combined score can dip below zero for anti-correlated histograms
    let similarity_score = combined.clamp(0.0, 1.0);

    tracing::debug!(
        histogram_correlation = scores.histogram_correlation,
        ssim = scores.ssim,
        combined,
        matched,
        threshold = policy.structural_threshold,
        "structural comparison"
    );

    Ok(MatchAssessment {
        similarity_score,
        confidence_percent: similarity_score * 100.0,
        distance: None,
        matched,
        method_used: MatchMethod::Structural,
        threshold: Threshold::MinScore(policy.structural_threshold),
        structural: Some(scores),
    })
}

/// Histogram correlation and SSIM of two crops after resizing both to
/// `size`×`size`.
pub fn structural_scores(face_a: &DynamicImage, face_b: &DynamicImage, size: u32) -> StructuralScores {
    let gray_a = pixels::grayscale(&pixels::resize_exact(face_a, size, size));
    let gray_b = pixels::grayscale(&pixels::resize_exact(face_b, size, size));

    StructuralScores {
        histogram_correlation: pixels::histogram_correlation(
            &pixels::histogram(&gray_a),
            &pixels::histogram(&gray_b),
        ),
        ssim: ssim(&gray_a, &gray_b),
    }
}

/// Mean structural similarity of two equally sized luma planes.
pub fn ssim(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    let mu_a = pixels::gaussian_blur(a);
    let mu_b = pixels::gaussian_blur(b);

    let sigma_a_sq = pixels::gaussian_blur(&(a * a)) - &mu_a * &mu_a;
    let sigma_b_sq = pixels::gaussian_blur(&(b * b)) - &mu_b * &mu_b;
    let sigma_ab = pixels::gaussian_blur(&(a * b)) - &mu_a * &mu_b;

    let mu_ab = &mu_a * &mu_b;
    let numerator = (2.0 * &mu_ab + SSIM_C1) * (2.0 * &sigma_ab + SSIM_C2);
    let denominator =
        (&mu_a * &mu_a + &mu_b * &mu_b + SSIM_C1) * (&sigma_a_sq + &sigma_b_sq + SSIM_C2);

    pixels::mean(&(numerator / denominator))
}
