//! Facial-region provider capability.
//!
//! Detection, landmarking and embedding are supplied by a collaborator
//! (a detector model, a remote service, precomputed detections). The core
//! only consumes their results.

use image::DynamicImage;
use thiserror::Error;

use crate::error::CoreError;
use crate::types::{FaceEmbedding, FaceRegion, Landmarks};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{0} capability not supported by this provider")]
    Unsupported(&'static str),
    #[error("provider failed: {0}")]
    Failed(String),
}

/// Face detection, landmark and embedding capabilities.
///
/// Implementations are shared between concurrent sessions and must not keep
/// per-session state.
pub trait FaceProvider: Send + Sync {
    fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceRegion>, ProviderError>;

    fn detect_landmarks(
        &self,
        image: &DynamicImage,
        region: &FaceRegion,
    ) -> Result<Option<Landmarks>, ProviderError>;

    /// Whether [`embed_face`](Self::embed_face) is backed by a real model.
    fn supports_embeddings(&self) -> bool {
        false
    }

    /// Embedding of the most prominent face, `None` if no face was found.
    fn embed_face(&self, _image: &DynamicImage) -> Result<Option<FaceEmbedding>, ProviderError> {
        Err(ProviderError::Unsupported("embedding"))
    }
}

/// Treats every image as one pre-cropped face filling the frame.
///
/// Useful when the caller already holds face crops. Provides no landmarks
/// and no embeddings.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFrameProvider;

impl FaceProvider for FullFrameProvider {
    fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceRegion>, ProviderError> {
        Ok(FaceRegion::new(0, image.width(), image.height(), 0)
            .into_iter()
            .collect())
    }

    fn detect_landmarks(
        &self,
        _image: &DynamicImage,
        _region: &FaceRegion,
    ) -> Result<Option<Landmarks>, ProviderError> {
        Ok(None)
    }
}

/// The region with the largest area.
pub fn largest_face(regions: &[FaceRegion]) -> Option<FaceRegion> {
    regions.iter().copied().max_by_key(FaceRegion::area)
}

/// Crop a region out of an image, clipped to the image bounds.
pub fn crop(image: &DynamicImage, region: &FaceRegion) -> Result<DynamicImage, CoreError> {
    let clipped = region
        .clamp_to(image.width(), image.height())
        .ok_or_else(|| {
            CoreError::InvalidImage(format!(
                "face region {region:?} lies outside the {}x{} image",
                image.width(),
                image.height()
            ))
        })?;
    Ok(image.crop_imm(
        clipped.left,
        clipped.top,
        clipped.width(),
        clipped.height(),
    ))
}

/// Detect faces and crop the largest one, e.g. the portrait on an ID document.
pub fn extract_largest_face(
    provider: &dyn FaceProvider,
    image: &DynamicImage,
) -> Result<Option<(DynamicImage, FaceRegion)>, CoreError> {
    crate::pixels::ensure_non_empty(image)?;
    let regions = provider.detect_faces(image)?;
    let Some(region) = largest_face(&regions) else {
        tracing::debug!("extract_largest_face: no face found");
        return Ok(None);
    };
    tracing::debug!(
        faces = regions.len(),
        width = region.width(),
        height = region.height(),
        "extract_largest_face: selected largest face"
    );
    Ok(Some((crop(image, &region)?, region)))
}
