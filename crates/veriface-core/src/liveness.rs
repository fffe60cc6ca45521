//! Liveness fusion.
//!
//! With a single still image the decision rests on the passive cues alone.
//! When a frame sequence is available the passive score is averaged with a
//! blink score and a head-movement score, so an attacker who defeats the
//! texture analysis with a high-resolution replay must also reproduce natural
//! blink timing and micro-movement.
//!
//! # Threat Coverage
//!
//! - **Blocks:** printed photographs, static screen images, frozen replays.
//! - **Does not block:** video replays with natural blinking, 3D masks,
//!   adversarial deepfakes. This is a best-effort onboarding heuristic.

use image::DynamicImage;
use serde::Serialize;

use crate::error::CoreError;
use crate::passive::{self, PassiveLiveness};
use crate::policy::{LivenessPolicy, Policy};
use crate::provider::FaceProvider;
use crate::quality::assess_quality;
use crate::tracker::BlinkTracker;
use crate::types::QualityMetrics;

/// Score awarded when head movement is detected.
const MOVEMENT_SCORE: f64 = 50.0;
/// Blink score for exactly `blink_threshold` blinks.
const BLINK_SCORE_AT_THRESHOLD: f64 = 50.0;

/// Which evidence a liveness check may use.
#[derive(Debug, Clone, Copy)]
pub enum LivenessMode<'a> {
    /// Still image only.
    Passive,
    /// Still image plus a frame sequence for blink and movement analysis.
    PassiveAndActive(&'a [DynamicImage]),
}

impl<'a> LivenessMode<'a> {
    /// Multi-frame mode needs at least two frames.
    pub fn from_frames(frames: Option<&'a [DynamicImage]>) -> Self {
        match frames {
            Some(frames) if frames.len() >= 2 => Self::PassiveAndActive(frames),
            _ => Self::Passive,
        }
    }
}

/// Outcome of one liveness check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessAssessment {
    /// Passive confidence, 0..=100.
    pub passive_score: f64,
    pub blink_count: u32,
    pub head_movement_detected: bool,
    /// Final score, 0..=100.
    pub fused_score: f64,
    pub passed: bool,
    /// Whether blink and movement evidence contributed.
    pub multi_frame: bool,
    pub frames_analysed: u64,
    pub passive: PassiveLiveness,
    pub quality: QualityMetrics,
}

/// Assess whether `image` shows a live subject.
///
/// Fails with [`CoreError::NoFaceDetected`] when the primary frame contains
/// no face; the error carries the frame's quality metrics.
pub fn check_liveness(
    provider: &dyn FaceProvider,
    image: &DynamicImage,
    mode: LivenessMode<'_>,
    policy: &Policy,
) -> Result<LivenessAssessment, CoreError> {
    let (quality, passive) = primary_frame(provider, image, policy)?;

    match mode {
        LivenessMode::Passive => Ok(single_frame(quality, passive)),
        LivenessMode::PassiveAndActive(frames) => {
            let mut tracker = BlinkTracker::new(&policy.liveness);
            for frame in frames {
                tracker.ingest_frame(provider, frame)?;
            }
            Ok(fuse(quality, passive, &tracker, &policy.liveness))
        }
    }
}

/// Like [`check_liveness`], using the evidence a session tracker has
/// accumulated instead of an explicit frame sequence.
pub fn check_session_liveness(
    provider: &dyn FaceProvider,
    image: &DynamicImage,
    tracker: &BlinkTracker,
    policy: &Policy,
) -> Result<LivenessAssessment, CoreError> {
    let (quality, passive) = primary_frame(provider, image, policy)?;
    if tracker.frames_seen() < 2 {
        return Ok(single_frame(quality, passive));
    }
    Ok(fuse(quality, passive, tracker, &policy.liveness))
}

fn primary_frame(
    provider: &dyn FaceProvider,
    image: &DynamicImage,
    policy: &Policy,
) -> Result<(QualityMetrics, PassiveLiveness), CoreError> {
    let quality = assess_quality(image, &policy.quality)?;
    if provider.detect_faces(image)?.is_empty() {
        tracing::warn!(
            brightness = quality.brightness,
            blur_score = quality.blur_score,
            "liveness: no face in primary frame"
        );
        return Err(CoreError::NoFaceDetected {
            quality: Some(quality),
        });
    }
    let passive = passive::analyze(image, &policy.liveness.passive)?;
    Ok((quality, passive))
}

fn single_frame(quality: QualityMetrics, passive: PassiveLiveness) -> LivenessAssessment {
    LivenessAssessment {
        passive_score: passive.confidence,
        blink_count: 0,
        head_movement_detected: false,
        fused_score: passive.confidence,
        passed: passive.is_live,
        multi_frame: false,
        frames_analysed: 1,
        passive,
        quality,
    }
}

fn fuse(
    quality: QualityMetrics,
    passive: PassiveLiveness,
    tracker: &BlinkTracker,
    policy: &LivenessPolicy,
) -> LivenessAssessment {
    let blink_count = tracker.blink_count();
    let movement = tracker.head_movement_detected();
    let fused_score = fused_score(blink_count, movement, passive.confidence, policy);
    let passed = fused_score > policy.pass_score;

    tracing::debug!(
        blink_count,
        movement,
        passive = passive.confidence,
        fused_score,
        passed,
        "liveness fused"
    );

    LivenessAssessment {
        passive_score: passive.confidence,
        blink_count,
        head_movement_detected: movement,
        fused_score,
        passed,
        multi_frame: true,
        frames_analysed: tracker.frames_seen(),
        passive,
        quality,
    }
}

/// Unweighted mean of the blink, movement and passive scores.
pub fn fused_score(blink_count: u32, movement: bool, passive_score: f64, policy: &LivenessPolicy) -> f64 {
    let blink_score =
        (blink_count as f64 / policy.blink_threshold * BLINK_SCORE_AT_THRESHOLD).min(100.0);
    let movement_score = if movement { MOVEMENT_SCORE } else { 0.0 };
    (blink_score + movement_score + passive_score) / 3.0
}
