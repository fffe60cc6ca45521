//! Pixel-level primitives shared by the quality gate, the passive analyzer
//! and the structural matcher.
//!
//! Grayscale planes are `Array2<f64>` indexed `[row, col]`. Neighbourhood
//! operations mirror the edge pixels without repeating them
//! (`gfedcb|abcdefgh|gfedcba`).

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array2;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use sha2::{Digest, Sha256};

use crate::error::CoreError;

const GAUSSIAN_WINDOW: usize = 11;
const GAUSSIAN_SIGMA: f64 = 1.5;

/// Reject zero-sized buffers before any arithmetic touches them.
pub fn ensure_non_empty(image: &DynamicImage) -> Result<(), CoreError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(CoreError::InvalidImage(format!(
            "empty pixel buffer ({}x{})",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

/// Convert to an 8-bit-valued luma plane using BT.601 weights.
pub fn grayscale(image: &DynamicImage) -> Array2<f64> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if let DynamicImage::ImageLuma8(gray) = image {
        return Array2::from_shape_fn((h, w), |(y, x)| gray.get_pixel(x as u32, y as u32)[0] as f64);
    }
    let rgb = image.to_rgb8();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let [r, g, b] = rgb.get_pixel(x as u32, y as u32).0;
        (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64).round()
    })
}

/// Resize ignoring aspect ratio (bilinear).
pub fn resize_exact(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    image.resize_exact(width, height, FilterType::Triangle)
}

fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let last = n as isize - 1;
    let mut i = i;
    while i < 0 || i > last {
        if i < 0 {
            i = -i;
        }
        if i > last {
            i = 2 * last - i;
        }
    }
    i as usize
}

/// 4-neighbour Laplacian response.
pub fn laplacian(gray: &Array2<f64>) -> Array2<f64> {
    let (h, w) = gray.dim();
    Array2::from_shape_fn((h, w), |(y, x)| {
        let at = |dy: isize, dx: isize| {
            gray[[
                reflect101(y as isize + dy, h),
                reflect101(x as isize + dx, w),
            ]]
        };
        at(-1, 0) + at(1, 0) + at(0, -1) + at(0, 1) - 4.0 * at(0, 0)
    })
}

fn gaussian_kernel() -> [f64; GAUSSIAN_WINDOW] {
    let mut kernel = [0.0f64; GAUSSIAN_WINDOW];
    let centre = (GAUSSIAN_WINDOW / 2) as f64;
    for (i, k) in kernel.iter_mut().enumerate() {
        let d = i as f64 - centre;
        *k = (-(d * d) / (2.0 * GAUSSIAN_SIGMA * GAUSSIAN_SIGMA)).exp();
    }
    let sum: f64 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Separable 11×11 Gaussian blur, σ = 1.5.
pub fn gaussian_blur(plane: &Array2<f64>) -> Array2<f64> {
    let kernel = gaussian_kernel();
    let radius = (GAUSSIAN_WINDOW / 2) as isize;
    let (h, w) = plane.dim();

    let horizontal = Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| k * plane[[y, reflect101(x as isize + i as isize - radius, w)]])
            .sum::<f64>()
    });
    Array2::from_shape_fn((h, w), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| k * horizontal[[reflect101(y as isize + i as isize - radius, h), x]])
            .sum::<f64>()
    })
}

pub fn mean(plane: &Array2<f64>) -> f64 {
    plane.mean().unwrap_or(0.0)
}

/// Population variance.
pub fn variance(plane: &Array2<f64>) -> f64 {
    if plane.is_empty() {
        return 0.0;
    }
    plane.var(0.0)
}

/// Population variance over every channel value of an RGB rendition.
pub fn color_variance(image: &DynamicImage) -> f64 {
    let rgb = image.to_rgb8();
    let raw = rgb.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    let n = raw.len() as f64;
    let mean = raw.iter().map(|&v| v as f64).sum::<f64>() / n;
    raw.iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

/// 256-bin histogram of a luma plane.
pub fn histogram(gray: &Array2<f64>) -> [f64; 256] {
    let mut bins = [0.0f64; 256];
    for &v in gray.iter() {
        bins[v.clamp(0.0, 255.0) as usize] += 1.0;
    }
    bins
}

/// Pearson correlation between two histograms. Two flat histograms are
/// treated as perfectly correlated.
pub fn histogram_correlation(a: &[f64; 256], b: &[f64; 256]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cross = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let da = x - mean_a;
        let db = y - mean_b;
        cross += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom.abs() > f64::EPSILON {
        cross / denom
    } else {
        1.0
    }
}

/// Magnitudes of the 2-D discrete Fourier transform, row-major.
pub fn spectrum_magnitudes(gray: &Array2<f64>) -> Vec<f64> {
    let (h, w) = gray.dim();
    if h == 0 || w == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::<f64>::new();
    let row_fft = planner.plan_fft_forward(w);
    let col_fft = planner.plan_fft_forward(h);

    let mut data: Vec<Complex<f64>> = gray.iter().map(|&v| Complex::new(v, 0.0)).collect();
    for row in data.chunks_exact_mut(w) {
        row_fft.process(row);
    }

    let mut column = vec![Complex::new(0.0, 0.0); h];
    for x in 0..w {
        for (y, c) in column.iter_mut().enumerate() {
            *c = data[y * w + x];
        }
        col_fft.process(&mut column);
        for (y, c) in column.iter().enumerate() {
            data[y * w + x] = *c;
        }
    }

    data.iter().map(|c| c.norm()).collect()
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// SHA-256 over dimensions and RGB pixel data, hex encoded.
pub fn pixel_digest(image: &DynamicImage) -> String {
    let rgb = image.to_rgb8();
    let mut hasher = Sha256::new();
    hasher.update(rgb.width().to_le_bytes());
    hasher.update(rgb.height().to_le_bytes());
    hasher.update(rgb.as_raw());
    format!("{:x}", hasher.finalize())
}
