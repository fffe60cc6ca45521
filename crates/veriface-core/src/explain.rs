//! Match decision reporting: summary line, audit record and the rendered
//! side-by-side comparison. No decision logic lives here.

use ab_glyph::{FontArc, PxScale};
use chrono::{DateTime, Utc};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::pixels;
use crate::policy::MatchPolicy;
use crate::provider::FaceProvider;
use crate::similarity::{match_faces, MatchAssessment, MatchMethod, Threshold};

const MATCH_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const NO_MATCH_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BORDER_WIDTH: u32 = 4;

/// Layout of the comparison artifact.
#[derive(Clone)]
pub struct ComparisonStyle {
    /// Both halves are scaled to this height, keeping aspect ratio.
    pub target_height: u32,
    /// Text is only drawn when a font is supplied.
    pub font: Option<FontArc>,
    pub document_label: String,
    pub live_label: String,
}

impl Default for ComparisonStyle {
    fn default() -> Self {
        Self {
            target_height: 300,
            font: None,
            document_label: "Document".to_string(),
            live_label: "Live".to_string(),
        }
    }
}

impl ComparisonStyle {
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }
}

/// Immutable trail of one match decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the document crop's pixels.
    pub document_digest: String,
    /// SHA-256 of the live crop's pixels.
    pub live_digest: String,
    pub method: MatchMethod,
    pub threshold: Threshold,
    pub similarity_score: f32,
    pub matched: bool,
}

impl AuditRecord {
    pub fn new(document: &DynamicImage, live: &DynamicImage, assessment: &MatchAssessment) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            document_digest: pixels::pixel_digest(document),
            live_digest: pixels::pixel_digest(live),
            method: assessment.method_used,
            threshold: assessment.threshold,
            similarity_score: assessment.similarity_score,
            matched: assessment.matched,
        }
    }
}

/// Final outcome of a document-to-live comparison.
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub assessment: MatchAssessment,
    pub summary: String,
    pub audit: AuditRecord,
}

/// Compare the document crop against the live crop and package the result
/// for display and audit.
pub fn decide(
    provider: &dyn FaceProvider,
    document: &DynamicImage,
    live: &DynamicImage,
    method: Option<MatchMethod>,
    threshold: Option<f32>,
    policy: &MatchPolicy,
) -> Result<MatchReport, CoreError> {
    let assessment = match_faces(provider, document, live, method, threshold, policy)?;
    let audit = AuditRecord::new(document, live, &assessment);
    let summary = summary(&assessment);
    tracing::info!(
        audit_id = %audit.id,
        method = %assessment.method_used,
        matched = assessment.matched,
        score = assessment.similarity_score,
        threshold = %assessment.threshold,
        "match decided"
    );
    Ok(MatchReport {
        assessment,
        summary,
        audit,
    })
}

/// One-line verdict, e.g. `MATCH: 87.3% (structural, score > 0.60)`.
pub fn summary(assessment: &MatchAssessment) -> String {
    format!(
        "{}: {:.1}% ({}, {})",
        verdict(assessment),
        assessment.confidence_percent,
        assessment.method_used,
        assessment.threshold
    )
}

fn verdict(assessment: &MatchAssessment) -> &'static str {
    if assessment.matched {
        "MATCH"
    } else {
        "NO MATCH"
    }
}

/// Side-by-side rendering of both crops, framed in green for a match and red
/// otherwise, with verdict, confidence and source labels when a font is set.
pub fn render_comparison(
    document: &DynamicImage,
    live: &DynamicImage,
    assessment: &MatchAssessment,
    style: &ComparisonStyle,
) -> Result<RgbImage, CoreError> {
    pixels::ensure_non_empty(document)?;
    pixels::ensure_non_empty(live)?;
    let height = style.target_height.max(1);

    let left = scale_to_height(document, height);
    let right = scale_to_height(live, height);
    let left_width = left.width();

    let mut canvas = RgbImage::new(left_width + right.width(), height);
    imageops::replace(&mut canvas, &left, 0, 0);
    imageops::replace(&mut canvas, &right, left_width as i64, 0);

    let color = if assessment.matched {
        MATCH_COLOR
    } else {
        NO_MATCH_COLOR
    };
    let (width, height) = canvas.dimensions();
    for inset in 0..BORDER_WIDTH.min(width / 2).min(height / 2) {
        let rect = Rect::at(inset as i32, inset as i32)
            .of_size(width - 2 * inset, height - 2 * inset);
        draw_hollow_rect_mut(&mut canvas, rect, color);
    }

    if let Some(font) = &style.font {
        let headline = format!(
            "{}: {:.1}%",
            verdict(assessment),
            assessment.confidence_percent
        );
        draw_text_mut(&mut canvas, color, 10, 10, PxScale::from(28.0), font, &headline);

        let label_y = height as i32 - 30;
        draw_text_mut(
            &mut canvas,
            LABEL_COLOR,
            10,
            label_y,
            PxScale::from(20.0),
            font,
            &style.document_label,
        );
        draw_text_mut(
            &mut canvas,
            LABEL_COLOR,
            left_width as i32 + 10,
            label_y,
            PxScale::from(20.0),
            font,
            &style.live_label,
        );
    }

    Ok(canvas)
}

fn scale_to_height(image: &DynamicImage, height: u32) -> RgbImage {
    let ratio = height as f64 / image.height() as f64;
    let width = ((image.width() as f64 * ratio) as u32).max(1);
    image
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8()
}
