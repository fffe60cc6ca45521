//! Decision thresholds.
//!
//! Every cutoff below is an empirically tuned policy value, not a derived
//! constant. The defaults reproduce the behaviour the onboarding flow was
//! calibrated against; tests and deployments override them freely.

use serde::Deserialize;

use crate::error::CoreError;

/// Advisory image-quality gates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QualityPolicy {
    /// Minimum grayscale mean.
    pub min_brightness: f64,
    /// Minimum Laplacian variance.
    pub min_sharpness: f64,
    /// Minimum grayscale standard deviation.
    pub min_contrast: f64,
    /// Minimum width and height of a face crop, in pixels.
    pub min_face_size: u32,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_brightness: 50.0,
            min_sharpness: 100.0,
            min_contrast: 30.0,
            min_face_size: 100,
        }
    }
}

/// Single-frame texture / colour / spectrum gates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PassivePolicy {
    /// Minimum Laplacian variance of the whole frame.
    pub min_texture_energy: f64,
    /// Minimum raw pixel variance across all channels.
    pub min_color_variance: f64,
    /// Minimum mean magnitude of the high-frequency spectrum.
    pub min_high_freq_energy: f64,
    /// Spectrum magnitudes above this percentile count as high frequency.
    pub high_freq_percentile: f64,
}

impl Default for PassivePolicy {
    fn default() -> Self {
        Self {
            min_texture_energy: 50.0,
            min_color_variance: 100.0,
            min_high_freq_energy: 10.0,
            high_freq_percentile: 90.0,
        }
    }
}

/// Blink, movement and fusion cutoffs for active liveness.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LivenessPolicy {
    /// EAR strictly below this value is a closed-eye frame.
    pub ear_threshold: f32,
    /// Minimum closed run length that counts as a blink.
    pub ear_consec_frames: u32,
    /// Number of EAR samples the tracker retains.
    pub window_capacity: usize,
    /// Expected blinks for a full blink score.
    pub blink_threshold: f64,
    /// Face-centre variance (px²) on either axis that counts as movement.
    pub movement_variance: f64,
    /// Detections required before movement is evaluated at all. Must not
    /// exceed `window_capacity`, which also bounds the retained face centres.
    pub min_movement_frames: usize,
    /// Fused score that must be exceeded in multi-frame mode.
    pub pass_score: f64,
    /// Gates for the single-frame analyzer.
    pub passive: PassivePolicy,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            ear_threshold: 0.25,
            ear_consec_frames: 3,
            window_capacity: 100,
            blink_threshold: 2.0,
            movement_variance: 100.0,
            min_movement_frames: 5,
            pass_score: 50.0,
            passive: PassivePolicy::default(),
        }
    }
}

/// Face comparison cutoffs for both match methods.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    /// Maximum embedding distance for a match.
    pub distance_threshold: f32,
    /// Structural score that must be exceeded for a match.
    pub structural_threshold: f32,
    /// Side length both crops are resized to before structural comparison.
    pub structural_size: u32,
    /// Fall back to the structural method when the provider can embed but
    /// finds no face in one of the crops, instead of failing.
    pub fallback_on_unembeddable: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            distance_threshold: 0.6,
            structural_threshold: 0.6,
            structural_size: 100,
            fallback_on_unembeddable: false,
        }
    }
}

/// Complete decision policy, loadable from a TOML document with one table
/// per section.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// `[quality]`
    pub quality: QualityPolicy,
    /// `[liveness]`, with `[liveness.passive]` nested.
    pub liveness: LivenessPolicy,
    /// `[matching]`
    pub matching: MatchPolicy,
}

impl Policy {
    /// Parse a TOML policy document. Missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self, CoreError> {
        let policy: Policy =
            toml::from_str(text).map_err(|e| CoreError::InvalidPolicy(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject cutoffs that are non-finite, out of range or that could never
    /// be satisfied.
    pub fn validate(&self) -> Result<(), CoreError> {
        let q = &self.quality;
        non_negative("quality.min_brightness", q.min_brightness)?;
        non_negative("quality.min_sharpness", q.min_sharpness)?;
        non_negative("quality.min_contrast", q.min_contrast)?;

        let l = &self.liveness;
        if !(l.ear_threshold.is_finite() && l.ear_threshold > 0.0) {
            return Err(CoreError::InvalidPolicy(
                "liveness.ear_threshold must be positive".into(),
            ));
        }
        if l.ear_consec_frames == 0 {
            return Err(CoreError::InvalidPolicy(
                "liveness.ear_consec_frames must be at least 1".into(),
            ));
        }
        if l.window_capacity == 0 {
            return Err(CoreError::InvalidPolicy(
                "liveness.window_capacity must be at least 1".into(),
            ));
        }
        if l.min_movement_frames > l.window_capacity {
            return Err(CoreError::InvalidPolicy(format!(
                "liveness.min_movement_frames ({}) exceeds liveness.window_capacity ({})",
                l.min_movement_frames, l.window_capacity
            )));
        }
        if !(l.blink_threshold.is_finite() && l.blink_threshold > 0.0) {
            return Err(CoreError::InvalidPolicy(
                "liveness.blink_threshold must be positive".into(),
            ));
        }
        non_negative("liveness.movement_variance", l.movement_variance)?;
        non_negative("liveness.pass_score", l.pass_score)?;
        non_negative("liveness.passive.min_texture_energy", l.passive.min_texture_energy)?;
        non_negative("liveness.passive.min_color_variance", l.passive.min_color_variance)?;
        non_negative(
            "liveness.passive.min_high_freq_energy",
            l.passive.min_high_freq_energy,
        )?;
        if !(0.0..=100.0).contains(&l.passive.high_freq_percentile) {
            return Err(CoreError::InvalidPolicy(
                "liveness.passive.high_freq_percentile must be within 0..=100".into(),
            ));
        }

        let m = &self.matching;
        non_negative("matching.distance_threshold", m.distance_threshold as f64)?;
        if !m.structural_threshold.is_finite() {
            return Err(CoreError::InvalidPolicy(
                "matching.structural_threshold must be finite".into(),
            ));
        }
        if m.structural_size < 11 {
            // SSIM uses an 11x11 window
            return Err(CoreError::InvalidPolicy(
                "matching.structural_size must be at least 11".into(),
            ));
        }
        Ok(())
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), CoreError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(CoreError::InvalidPolicy(format!(
            "{name} must be a finite, non-negative number"
        )))
    }
}
