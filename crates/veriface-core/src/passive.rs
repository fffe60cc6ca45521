//! Single-frame passive liveness cues.
//!
//! A photograph of a print or a screen loses fine skin texture, compresses
//! the colour range and picks up aliasing from the reproduction grid. Three
//! cues approximate those artefacts:
//!
//! - texture energy: variance of the Laplacian response of the luma plane;
//! - colour variance: variance of all raw channel values;
//! - high-frequency energy: mean spectrum magnitude above the 90th
//!   percentile of the 2-D DFT of the luma plane.
//!
//! # Threat Coverage
//!
//! - **Blocks:** flat prints, heavily re-compressed or blurred replays.
//! - **Does not block:** high-resolution displays, 3D masks, deepfakes.

use image::DynamicImage;
use serde::Serialize;

use crate::error::CoreError;
use crate::pixels;
use crate::policy::PassivePolicy;

/// Weight that maps the three normalised cues onto 0..=100.
const CONFIDENCE_SCALE: f64 = 33.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PassiveLiveness {
    /// Every cue cleared its minimum.
    pub is_live: bool,
    /// 0..=100.
    pub confidence: f64,
    pub texture_energy: f64,
    pub color_variance: f64,
    pub high_freq_energy: f64,
}

pub fn analyze(image: &DynamicImage, policy: &PassivePolicy) -> Result<PassiveLiveness, CoreError> {
    pixels::ensure_non_empty(image)?;
    let gray = pixels::grayscale(image);

    let texture_energy = pixels::variance(&pixels::laplacian(&gray));
    let color_variance = pixels::color_variance(image);
    let high_freq_energy = high_frequency_energy(&gray, policy.high_freq_percentile);

    let is_live = texture_energy > policy.min_texture_energy
        && color_variance > policy.min_color_variance
        && high_freq_energy > policy.min_high_freq_energy;

    let confidence = ((texture_energy / 100.0 + color_variance / 1000.0 + high_freq_energy / 100.0)
        * CONFIDENCE_SCALE)
        .min(100.0);

    tracing::debug!(
        texture_energy,
        color_variance,
        high_freq_energy,
        confidence,
        is_live,
        "passive liveness"
    );

    Ok(PassiveLiveness {
        is_live,
        confidence,
        texture_energy,
        color_variance,
        high_freq_energy,
    })
}

fn high_frequency_energy(gray: &ndarray::Array2<f64>, pct: f64) -> f64 {
    let magnitudes = pixels::spectrum_magnitudes(gray);
    let cutoff = pixels::percentile(&magnitudes, pct);
    let (sum, count) = magnitudes
        .iter()
        .filter(|&&m| m > cutoff)
        .fold((0.0, 0usize), |(s, n), &m| (s + m, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
