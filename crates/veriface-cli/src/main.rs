use std::path::{Path, PathBuf};
use std::sync::Arc;

use ab_glyph::FontArc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use veriface_core::provider::extract_largest_face;
use veriface_core::{
    assess_face_crop, assess_quality, render_comparison, ComparisonStyle, CoreError, EarSample,
    FaceCropQuality, FaceProvider, FullFrameProvider, LivenessAssessment, MatchMethod,
    MatchReport, QualityMetrics,
};
use veriface_service::config::with_policy_file;
use veriface_service::{Config, Response, ServiceError, SessionId, VerificationEngine};

mod sidecar;

use sidecar::{open_image, SidecarProvider};

#[derive(Parser)]
#[command(name = "veriface", version, about = "Liveness and face match checks for document onboarding")]
struct Cli {
    /// TOML policy file; takes the place of VERIFACE_POLICY_FILE, threshold
    /// variables still override it
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    /// JSON file of precomputed face detections keyed by image path
    #[arg(long, global = true)]
    detections: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Brightness, sharpness and contrast of an image and its largest face
    Quality { image: PathBuf },
    /// Liveness of an image, optionally with a sequence of live frames
    Liveness {
        image: PathBuf,
        #[arg(long, num_args = 1..)]
        frames: Vec<PathBuf>,
    },
    /// Compare the face on an identity document with a live face
    Match {
        document: PathBuf,
        live: PathBuf,
        #[arg(long)]
        method: Option<MatchMethod>,
        /// Cutoff in the units of the method used (score or distance)
        #[arg(long)]
        threshold: Option<f32>,
        /// Write a side-by-side comparison PNG here
        #[arg(long)]
        render: Option<PathBuf>,
        /// TTF/OTF font for the comparison labels
        #[arg(long, requires = "render")]
        font: Option<PathBuf>,
    },
    /// Stream frames through a session, then check liveness of `image`
    Session {
        image: PathBuf,
        #[arg(long, num_args = 1..)]
        frames: Vec<PathBuf>,
    },
}

#[derive(Serialize)]
struct QualityReport {
    image: QualityMetrics,
    face: Option<FaceCropQuality>,
}

#[derive(Serialize)]
struct SessionReport {
    session: SessionId,
    samples: Vec<Option<EarSample>>,
    assessment: LivenessAssessment,
}

/// Images are decoded through the sidecar so its entries bind to them.
enum Images {
    Sidecar(SidecarProvider),
    Plain,
}

impl Images {
    fn open(&mut self, path: &Path) -> Result<DynamicImage> {
        match self {
            Images::Sidecar(provider) => provider.load_image(path),
            Images::Plain => open_image(path),
        }
    }

    fn open_all(&mut self, paths: &[PathBuf]) -> Result<Vec<DynamicImage>> {
        paths.iter().map(|p| self.open(p)).collect()
    }

    fn provider(&self) -> &dyn FaceProvider {
        match self {
            Images::Sidecar(provider) => provider,
            Images::Plain => &FullFrameProvider,
        }
    }

    /// Crop the largest face of `image`, carrying its detections over to
    /// the crop.
    fn largest_face(&mut self, image: &DynamicImage) -> Result<Option<DynamicImage>, CoreError> {
        let Some((crop, region)) = extract_largest_face(self.provider(), image)? else {
            return Ok(None);
        };
        if let Images::Sidecar(provider) = self {
            provider.alias(image, &crop, &region);
        }
        Ok(Some(crop))
    }

    fn into_provider(self) -> Arc<dyn FaceProvider> {
        match self {
            Images::Sidecar(provider) => Arc::new(provider),
            Images::Plain => Arc::new(FullFrameProvider),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::from_lookup(with_policy_file(cli.policy.as_deref(), |key| {
        std::env::var(key).ok()
    }))
    .context("invalid configuration")?;

    let mut images = match &cli.detections {
        Some(path) => Images::Sidecar(SidecarProvider::from_file(path)?),
        None => Images::Plain,
    };

    let output = match cli.command {
        Command::Quality { image } => {
            let image = images.open(&image)?;
            to_json(quality_report(&mut images, &image, &config))?
        }
        Command::Liveness { image, frames } => {
            let image = images.open(&image)?;
            let frames = images.open_all(&frames)?;
            let engine = VerificationEngine::new(images.into_provider(), &config);
            to_json(engine.check_liveness(image, frames).await)?
        }
        Command::Match {
            document,
            live,
            method,
            threshold,
            render,
            font,
        } => {
            let style = match font {
                Some(path) => ComparisonStyle::default().with_font(load_font(&path)?),
                None => ComparisonStyle::default(),
            };
            let document = images.open(&document)?;
            let live = images.open(&live)?;
            let outcome =
                run_match(images, &config, document, live, method, threshold, render, &style).await?;
            to_json(outcome)?
        }
        Command::Session { image, frames } => {
            let image = images.open(&image)?;
            let frames = images.open_all(&frames)?;
            let engine = VerificationEngine::new(images.into_provider(), &config);
            to_json(run_session(&engine, image, frames).await)?
        }
    };

    println!("{output}");
    Ok(())
}

fn to_json<T: Serialize>(outcome: Result<T, ServiceError>) -> Result<String> {
    serde_json::to_string_pretty(&Response::from(outcome)).context("failed to serialize response")
}

fn quality_report(
    images: &mut Images,
    image: &DynamicImage,
    config: &Config,
) -> Result<QualityReport, ServiceError> {
    let policy = &config.policy.quality;
    let metrics = assess_quality(image, policy)?;
    let face = match images.largest_face(image)? {
        Some(crop) => Some(assess_face_crop(images.provider(), &crop, policy)?),
        None => None,
    };
    Ok(QualityReport {
        image: metrics,
        face,
    })
}

/// Crop the largest face from each image, compare, and optionally render.
#[allow(clippy::too_many_arguments)]
async fn run_match(
    mut images: Images,
    config: &Config,
    document: DynamicImage,
    live: DynamicImage,
    method: Option<MatchMethod>,
    threshold: Option<f32>,
    render: Option<PathBuf>,
    style: &ComparisonStyle,
) -> Result<Result<MatchReport, ServiceError>> {
    let document_face = images.largest_face(&document);
    let live_face = images.largest_face(&live);
    let (document_face, live_face) = match (document_face, live_face) {
        (Ok(Some(d)), Ok(Some(l))) => (d, l),
        (Ok(None), _) | (_, Ok(None)) => {
            tracing::warn!("no face found in one of the match inputs");
            return Ok(Err(CoreError::NoFaceDetected { quality: None }.into()));
        }
        (Err(e), _) | (_, Err(e)) => return Ok(Err(e.into())),
    };

    let engine = VerificationEngine::new(images.into_provider(), config);
    let report = match engine
        .match_faces(document_face.clone(), live_face.clone(), method, threshold)
        .await
    {
        Ok(report) => report,
        Err(e) => return Ok(Err(e)),
    };
    tracing::info!(summary = %report.summary, audit = %report.audit.id, "match decided");

    if let Some(path) = render {
        let artifact = render_comparison(&document_face, &live_face, &report.assessment, style)?;
        artifact
            .save(&path)
            .with_context(|| format!("failed to write comparison {}", path.display()))?;
        tracing::info!(path = %path.display(), "comparison written");
    }
    Ok(Ok(report))
}

async fn run_session(
    engine: &VerificationEngine,
    image: DynamicImage,
    frames: Vec<DynamicImage>,
) -> Result<SessionReport, ServiceError> {
    let session = engine.open_session().await?;
    let outcome = stream_session(engine, session, image, frames).await;
    engine.close_session(session).await;
    outcome
}

async fn stream_session(
    engine: &VerificationEngine,
    session: SessionId,
    image: DynamicImage,
    frames: Vec<DynamicImage>,
) -> Result<SessionReport, ServiceError> {
    let mut samples = Vec::with_capacity(frames.len());
    for frame in frames {
        samples.push(engine.push_frame(session, frame).await?);
    }
    let assessment = engine.session_liveness(session, image).await?;
    Ok(SessionReport {
        session,
        samples,
        assessment,
    })
}

fn load_font(path: &Path) -> Result<FontArc> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read font {}", path.display()))?;
    FontArc::try_from_vec(bytes).with_context(|| format!("invalid font {}", path.display()))
}
