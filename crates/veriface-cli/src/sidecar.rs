//! Face provider backed by a JSON file of precomputed detections.
//!
//! The file maps image paths to what an external detector found:
//!
//! ```json
//! {
//!   "document.jpg": {
//!     "faces": [{ "top": 40, "right": 180, "bottom": 200, "left": 30 }],
//!     "landmarks": [{ "left_eye": [...], "right_eye": [...] }],
//!     "embedding": [0.12, -0.03, ...]
//!   }
//! }
//! ```
//!
//! Entries are bound to image content (pixel digest) when the image is
//! loaded, so lookups work on the decoded image alone. Images without an
//! entry are treated as a single face filling the frame.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use serde::Deserialize;
use veriface_core::pixels::pixel_digest;
use veriface_core::{
    FaceEmbedding, FaceProvider, FaceRegion, FullFrameProvider, Landmarks, Point, ProviderError,
};

#[derive(Debug, Clone, Copy, Deserialize)]
struct RegionSpec {
    top: u32,
    right: u32,
    bottom: u32,
    left: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Detection {
    faces: Vec<RegionSpec>,
    /// Parallel to `faces`.
    landmarks: Vec<Landmarks>,
    embedding: Option<Vec<f32>>,
}

impl RegionSpec {
    fn region(&self) -> Option<FaceRegion> {
        FaceRegion::new(self.top, self.right, self.bottom, self.left)
    }
}

impl Detection {
    fn regions(&self) -> Vec<FaceRegion> {
        self.faces.iter().filter_map(RegionSpec::region).collect()
    }

    /// Position of `region` in `faces`, which also indexes `landmarks`.
    fn index_of(&self, region: &FaceRegion) -> Option<usize> {
        self.faces
            .iter()
            .position(|r| r.region().as_ref() == Some(region))
    }
}

#[derive(Debug, Default)]
pub struct SidecarProvider {
    by_path: HashMap<PathBuf, Detection>,
    by_digest: HashMap<String, Detection>,
}

impl SidecarProvider {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detections {}", path.display()))?;
        let by_path: HashMap<PathBuf, Detection> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse detections {}", path.display()))?;
        tracing::info!(path = %path.display(), entries = by_path.len(), "detections loaded");
        Ok(Self {
            by_path,
            by_digest: HashMap::new(),
        })
    }

    /// Decode an image and bind its detection entry, if any, to its pixels.
    pub fn load_image(&mut self, path: &Path) -> Result<DynamicImage> {
        let image = open_image(path)?;
        if let Some(detection) = self.by_path.get(path) {
            self.by_digest.insert(pixel_digest(&image), detection.clone());
        } else {
            tracing::debug!(path = %path.display(), "no detections; using full frame");
        }
        Ok(image)
    }

    /// Bind the face at `region` of `source` to `derived`, the crop of that
    /// region: the crop inherits the embedding and the face's landmarks,
    /// moved into crop coordinates.
    pub fn alias(&mut self, source: &DynamicImage, derived: &DynamicImage, region: &FaceRegion) {
        let Some(detection) = self.by_digest.get(&pixel_digest(source)) else {
            return;
        };
        let landmarks = detection
            .index_of(region)
            .and_then(|i| detection.landmarks.get(i))
            .map(|l| shift(l, region))
            .into_iter()
            .collect();
        let inherited = Detection {
            faces: Vec::new(),
            landmarks,
            embedding: detection.embedding.clone(),
        };
        self.by_digest.insert(pixel_digest(derived), inherited);
    }

    fn lookup(&self, image: &DynamicImage) -> Option<&Detection> {
        self.by_digest.get(&pixel_digest(image))
    }
}

impl FaceProvider for SidecarProvider {
    fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceRegion>, ProviderError> {
        match self.lookup(image) {
            Some(d) if !d.faces.is_empty() => Ok(d.regions()),
            _ => FullFrameProvider.detect_faces(image),
        }
    }

    fn detect_landmarks(
        &self,
        image: &DynamicImage,
        region: &FaceRegion,
    ) -> Result<Option<Landmarks>, ProviderError> {
        let Some(d) = self.lookup(image) else {
            return Ok(None);
        };
        let index = d.index_of(region).unwrap_or(0);
        Ok(d.landmarks.get(index).cloned())
    }

    fn supports_embeddings(&self) -> bool {
        self.by_path.values().any(|d| d.embedding.is_some())
    }

    fn embed_face(&self, image: &DynamicImage) -> Result<Option<FaceEmbedding>, ProviderError> {
        Ok(self
            .lookup(image)
            .and_then(|d| d.embedding.clone())
            .map(FaceEmbedding::new))
    }
}

fn shift(landmarks: &Landmarks, region: &FaceRegion) -> Landmarks {
    let (dx, dy) = (region.left as f32, region.top as f32);
    let moved = |p: Point| Point::new(p.x - dx, p.y - dy);
    Landmarks {
        left_eye: landmarks.left_eye.map(moved),
        right_eye: landmarks.right_eye.map(moved),
    }
}

pub fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("failed to decode image {}", path.display()))
}
