use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Face bounding box in pixel coordinates of the source image.
///
/// Always satisfies `right > left` and `bottom > top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRegion {
    /// Build a region, rejecting degenerate boxes.
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Option<Self> {
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self {
            top,
            right,
            bottom,
            left,
        })
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Centre of the box as `(x, y)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.left as f64 + self.right as f64) / 2.0,
            (self.top as f64 + self.bottom as f64) / 2.0,
        )
    }

    /// Intersect with an image of the given size. `None` if nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        Self::new(
            self.top.min(height),
            self.right.min(width),
            self.bottom.min(height),
            self.left.min(width),
        )
    }
}

/// Landmark coordinate in the pixel space of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn scaled(&self, k: f32) -> Point {
        Point::new(self.x * k, self.y * k)
    }
}

/// Eye landmarks for one detected face, six points per eye in canonical
/// order: outer corner, two upper lid points, inner corner, two lower lid
/// points (p0..p5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    /// Subject's left eye, p0..p5.
    pub left_eye: [Point; 6],
    /// Subject's right eye, p0..p5.
    pub right_eye: [Point; 6],
}

/// Identity signature of one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    /// Fixed-length vector; only embeddings from the same model compare.
    pub values: Vec<f32>,
}

impl FaceEmbedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another embedding of the same dimension.
    pub fn distance(&self, other: &FaceEmbedding) -> Result<f32, CoreError> {
        if self.values.len() != other.values.len() {
            return Err(CoreError::EmbeddingMismatch {
                left: self.values.len(),
                right: other.values.len(),
            });
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        Ok(sum.sqrt())
    }
}

/// One eye-aspect-ratio reading from the blink tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EarSample {
    pub ear: f32,
    /// Sequence number of the frame that produced this sample.
    pub index: u64,
}

/// Brightness, sharpness and contrast of one image region.
///
/// The `passes_*` flags are advisory; none of them fails a check on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityMetrics {
    /// Grayscale mean.
    pub brightness: f64,
    /// Variance of the Laplacian response, a sharpness proxy.
    pub blur_score: f64,
    /// Grayscale standard deviation.
    pub contrast: f64,
    pub passes_brightness: bool,
    pub passes_sharpness: bool,
    pub passes_contrast: bool,
}

impl QualityMetrics {
    pub fn passes_all(&self) -> bool {
        self.passes_brightness && self.passes_sharpness && self.passes_contrast
    }
}
