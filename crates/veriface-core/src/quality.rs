use image::DynamicImage;
use serde::Serialize;

use crate::error::CoreError;
use crate::pixels;
use crate::policy::QualityPolicy;
use crate::provider::{crop, FaceProvider};
use crate::types::{FaceRegion, QualityMetrics};

/// Quality of a face crop: the image metrics plus size checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceCropQuality {
    pub metrics: QualityMetrics,
    pub width: u32,
    pub height: u32,
    pub large_enough: bool,
    pub aspect_ratio: f64,
    /// Whether the provider found eye landmarks inside the crop.
    pub eyes_detected: bool,
}

/// Brightness (grayscale mean), sharpness (Laplacian variance) and contrast
/// (grayscale standard deviation) of a whole image.
pub fn assess_quality(
    image: &DynamicImage,
    policy: &QualityPolicy,
) -> Result<QualityMetrics, CoreError> {
    pixels::ensure_non_empty(image)?;
    let gray = pixels::grayscale(image);

    let brightness = pixels::mean(&gray);
    let blur_score = pixels::variance(&pixels::laplacian(&gray));
    let contrast = pixels::variance(&gray).sqrt();

    let metrics = QualityMetrics {
        brightness,
        blur_score,
        contrast,
        passes_brightness: brightness > policy.min_brightness,
        passes_sharpness: blur_score > policy.min_sharpness,
        passes_contrast: contrast > policy.min_contrast,
    };
    tracing::debug!(brightness, blur_score, contrast, "quality assessed");
    Ok(metrics)
}

/// [`assess_quality`] restricted to one face region.
pub fn assess_region(
    image: &DynamicImage,
    region: &FaceRegion,
    policy: &QualityPolicy,
) -> Result<QualityMetrics, CoreError> {
    assess_quality(&crop(image, region)?, policy)
}

/// Quality of an extracted face crop, including whether eyes are visible
/// in it. Eyes are looked up over the whole crop.
pub fn assess_face_crop(
    provider: &dyn FaceProvider,
    face: &DynamicImage,
    policy: &QualityPolicy,
) -> Result<FaceCropQuality, CoreError> {
    let metrics = assess_quality(face, policy)?;
    let (width, height) = (face.width(), face.height());
    let eyes_detected = match FaceRegion::new(0, width, height, 0) {
        Some(whole) => provider.detect_landmarks(face, &whole)?.is_some(),
        None => false,
    };
    Ok(FaceCropQuality {
        metrics,
        width,
        height,
        large_enough: width >= policy.min_face_size && height >= policy.min_face_size,
        aspect_ratio: width as f64 / height as f64,
        eyes_detected,
    })
}
