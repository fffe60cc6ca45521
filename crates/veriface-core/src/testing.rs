//! Synthetic images and a scripted provider for unit tests.

use image::{DynamicImage, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::provider::{FaceProvider, ProviderError};
use crate::types::{FaceEmbedding, FaceRegion, Landmarks, Point};

pub fn uniform_image(width: u32, height: u32, value: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value; 3])))
}

pub fn noise_image(width: u32, height: u32, seed: u64) -> DynamicImage {
    let mut rng = StdRng::seed_from_u64(seed);
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, _| {
        Rgb([rng.gen(), rng.gen(), rng.gen()])
    }))
}

pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let v = ((x * 255) / width.max(1)) as u8;
        let w = ((y * 255) / height.max(1)) as u8;
        Rgb([v, w, v / 2 + w / 2])
    }))
}

const FRAME_SIZE: u32 = 64;
const FACE_HALF: u32 = 10;
const EYE_WIDTH: f32 = 10.0;

/// A frame whose header pixel tells [`ScriptedProvider`] what to report:
/// red = EAR × 100 (0 means no landmarks), green = face present,
/// blue = face-centre x coordinate.
pub fn scripted_frame(ear: Option<f32>, face: bool, center_x: u8) -> DynamicImage {
    let mut img = RgbImage::from_pixel(FRAME_SIZE, FRAME_SIZE, Rgb([90, 90, 90]));
    let ear_code = ear.map(|e| (e * 100.0).round() as u8).unwrap_or(0);
    img.put_pixel(0, 0, Rgb([ear_code, face as u8, center_x]));
    DynamicImage::ImageRgb8(img)
}

/// Like [`scripted_frame`] but with an embedding encoded in the second pixel.
pub fn embedded_frame(base: DynamicImage, embedding: Option<[u8; 3]>) -> DynamicImage {
    let mut img = base.to_rgb8();
    img.put_pixel(0, 0, Rgb([30, 1, 32]));
    img.put_pixel(1, 0, Rgb(embedding.unwrap_or([0, 0, 0])));
    DynamicImage::ImageRgb8(img)
}

/// Six eye points at the origin whose aspect ratio equals `ear`.
pub fn eye_with_ear(ear: f32, origin: Point) -> [Point; 6] {
    // Vertical pairs span 2h each: EAR = 4h / (2 * EYE_WIDTH)
    let h = ear * EYE_WIDTH / 2.0;
    let at = |x: f32, y: f32| Point::new(origin.x + x, origin.y + y);
    [
        at(0.0, 0.0),
        at(3.0, -h),
        at(7.0, -h),
        at(EYE_WIDTH, 0.0),
        at(7.0, h),
        at(3.0, h),
    ]
}

/// Decodes the header pixels written by [`scripted_frame`] and
/// [`embedded_frame`].
pub struct ScriptedProvider {
    pub embeddings: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self { embeddings: false }
    }

    pub fn with_embeddings() -> Self {
        Self { embeddings: true }
    }

    fn header(image: &DynamicImage, x: u32) -> [u8; 3] {
        image.to_rgb8().get_pixel(x, 0).0
    }
}

impl FaceProvider for ScriptedProvider {
    fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceRegion>, ProviderError> {
        let [_, face, cx] = Self::header(image, 0);
        if face == 0 {
            return Ok(Vec::new());
        }
        let cx = (cx as u32).max(FACE_HALF);
        let cy = FRAME_SIZE / 2;
        Ok(
            FaceRegion::new(cy - FACE_HALF, cx + FACE_HALF, cy + FACE_HALF, cx - FACE_HALF)
                .into_iter()
                .collect(),
        )
    }

    fn detect_landmarks(
        &self,
        image: &DynamicImage,
        region: &FaceRegion,
    ) -> Result<Option<Landmarks>, ProviderError> {
        let [ear_code, _, _] = Self::header(image, 0);
        if ear_code == 0 {
            return Ok(None);
        }
        let ear = ear_code as f32 / 100.0;
        let top = region.top as f32 + 5.0;
        Ok(Some(Landmarks {
            left_eye: eye_with_ear(ear, Point::new(region.left as f32, top)),
            right_eye: eye_with_ear(ear, Point::new(region.left as f32 + 12.0, top)),
        }))
    }

    fn supports_embeddings(&self) -> bool {
        self.embeddings
    }

    fn embed_face(&self, image: &DynamicImage) -> Result<Option<FaceEmbedding>, ProviderError> {
        if !self.embeddings {
            return Err(ProviderError::Unsupported("embedding"));
        }
        let code = Self::header(image, 1);
        if code == [0, 0, 0] {
            return Ok(None);
        }
        Ok(Some(FaceEmbedding::new(
            code.iter().map(|&c| c as f32 / 100.0).collect(),
        )))
    }
}
