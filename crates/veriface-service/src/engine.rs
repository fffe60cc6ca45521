use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;
use veriface_core::{
    check_liveness, check_session_liveness, decide, BlinkTracker, CoreError, EarSample,
    FaceProvider, LivenessAssessment, LivenessMode, MatchMethod, MatchReport, Policy,
};

use crate::config::Config;

pub type SessionId = Uuid;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("session {0} already has a request in flight")]
    SessionBusy(SessionId),
    #[error("session limit reached ({0} open)")]
    SessionLimit(usize),
    #[error("request exceeded its {0:?} deadline")]
    Timeout(Duration),
    #[error("worker task failed: {0}")]
    WorkerFailed(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read policy file {path}: {source}")]
    PolicyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-session state. The tracker is taken out while a request for the
/// session is in flight, which gives that request exclusive ownership.
struct Session {
    tracker: Option<BlinkTracker>,
    /// Refreshed when the session is opened and after every request on it.
    last_used: Instant,
}

/// Clone-safe handle to the verification engine.
///
/// Every computation runs on the blocking pool under the configured request
/// deadline. A request that misses its deadline is abandoned: its result is
/// discarded and, for session requests, the session restarts with an empty
/// tracker.
#[derive(Clone)]
pub struct VerificationEngine {
    provider: Arc<dyn FaceProvider>,
    policy: Arc<Policy>,
    timeout: Duration,
    max_sessions: usize,
    session_ttl: Duration,
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
}

impl VerificationEngine {
    pub fn new(provider: Arc<dyn FaceProvider>, config: &Config) -> Self {
        tracing::info!(
            timeout = ?config.request_timeout,
            max_sessions = config.max_sessions,
            "verification engine ready"
        );
        Self {
            provider,
            policy: Arc::new(config.policy.clone()),
            timeout: config.request_timeout,
            max_sessions: config.max_sessions,
            session_ttl: config.session_ttl,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a session with a fresh blink tracker.
    pub async fn open_session(&self) -> Result<SessionId, ServiceError> {
        let mut sessions = self.sessions.lock().await;
        prune_expired(&mut sessions, self.session_ttl);
        if sessions.len() >= self.max_sessions {
            tracing::warn!(open = sessions.len(), "session limit reached");
            return Err(ServiceError::SessionLimit(sessions.len()));
        }
        let id = Uuid::new_v4();
        sessions.insert(
            id,
            Session {
                tracker: Some(BlinkTracker::new(&self.policy.liveness)),
                last_used: Instant::now(),
            },
        );
        tracing::info!(session = %id, "session opened");
        Ok(id)
    }

    /// End a session, dropping its tracker. Returns whether it existed.
    pub async fn close_session(&self, id: SessionId) -> bool {
        let removed = self.sessions.lock().await.remove(&id).is_some();
        if removed {
            tracing::info!(session = %id, "session closed");
        } else {
            tracing::warn!(session = %id, "close requested for unknown session");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Feed one live frame into a session's tracker.
    pub async fn push_frame(
        &self,
        id: SessionId,
        frame: DynamicImage,
    ) -> Result<Option<EarSample>, ServiceError> {
        let mut tracker = self.checkout(id).await?;
        let provider = self.provider.clone();
        let outcome = self
            .run_blocking(move || {
                let result = tracker.ingest_frame(provider.as_ref(), &frame);
                (tracker, result)
            })
            .await;
        self.checkin(id, outcome).await
    }

    /// Liveness of `image` using the blinks and movement accumulated by the
    /// session so far.
    pub async fn session_liveness(
        &self,
        id: SessionId,
        image: DynamicImage,
    ) -> Result<LivenessAssessment, ServiceError> {
        let tracker = self.checkout(id).await?;
        let provider = self.provider.clone();
        let policy = self.policy.clone();
        let outcome = self
            .run_blocking(move || {
                let result = check_session_liveness(provider.as_ref(), &image, &tracker, &policy);
                (tracker, result)
            })
            .await;
        let assessment = self.checkin(id, outcome).await?;
        tracing::info!(
            session = %id,
            passed = assessment.passed,
            fused_score = assessment.fused_score,
            blinks = assessment.blink_count,
            "session liveness checked"
        );
        Ok(assessment)
    }

    /// One-shot liveness check; multi-frame when two or more frames are given.
    pub async fn check_liveness(
        &self,
        image: DynamicImage,
        frames: Vec<DynamicImage>,
    ) -> Result<LivenessAssessment, ServiceError> {
        let provider = self.provider.clone();
        let policy = self.policy.clone();
        let assessment = self
            .run_blocking(move || {
                let mode = LivenessMode::from_frames(Some(&frames));
                check_liveness(provider.as_ref(), &image, mode, &policy)
            })
            .await??;
        tracing::info!(
            passed = assessment.passed,
            fused_score = assessment.fused_score,
            multi_frame = assessment.multi_frame,
            "liveness checked"
        );
        Ok(assessment)
    }

    /// Compare a document face crop with a live face crop.
    pub async fn match_faces(
        &self,
        document: DynamicImage,
        live: DynamicImage,
        method: Option<MatchMethod>,
        threshold: Option<f32>,
    ) -> Result<MatchReport, ServiceError> {
        let provider = self.provider.clone();
        let policy = self.policy.clone();
        let report = self
            .run_blocking(move || {
                decide(
                    provider.as_ref(),
                    &document,
                    &live,
                    method,
                    threshold,
                    &policy.matching,
                )
            })
            .await??;
        Ok(report)
    }

    async fn checkout(&self, id: SessionId) -> Result<BlinkTracker, ServiceError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(ServiceError::UnknownSession(id))?;
        session.tracker.take().ok_or(ServiceError::SessionBusy(id))
    }

    async fn checkin<T>(
        &self,
        id: SessionId,
        outcome: Result<(BlinkTracker, Result<T, CoreError>), ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&id) else {
            // Closed while the request was running
            return match outcome {
                Ok((_, result)) => result.map_err(ServiceError::from),
                Err(e) => Err(e),
            };
        };
        session.last_used = Instant::now();
        match outcome {
            Ok((tracker, result)) => {
                session.tracker = Some(tracker);
                result.map_err(ServiceError::from)
            }
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "session tracker discarded");
                session.tracker = Some(BlinkTracker::new(&self.policy.liveness));
                Err(e)
            }
        }
    }

    async fn run_blocking<R, F>(&self, work: F) -> Result<R, ServiceError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let task = tokio::task::spawn_blocking(work);
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "worker task failed");
                Err(ServiceError::WorkerFailed(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "request timed out; result will be discarded");
                Err(ServiceError::Timeout(self.timeout))
            }
        }
    }
}

/// Drop sessions idle for at least `ttl`. Sessions with a request in flight
/// are kept.
fn prune_expired(sessions: &mut HashMap<SessionId, Session>, ttl: Duration) {
    let now = Instant::now();
    let before = sessions.len();
    sessions.retain(|_, s| s.tracker.is_none() || now.duration_since(s.last_used) < ttl);
    let pruned = before - sessions.len();
    if pruned > 0 {
        tracing::info!(pruned, "expired sessions pruned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use veriface_core::{FaceEmbedding, FaceRegion, FullFrameProvider, Landmarks, Point, ProviderError};

    fn textured(width: u32, height: u32, seed: u64) -> DynamicImage {
        let mut rng = StdRng::seed_from_u64(seed);
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, _| {
            Rgb([rng.gen(), rng.gen(), rng.gen()])
        }))
    }

    /// Reads the EAR (red / 100) and face-centre x (blue) from pixel (0, 0);
    /// green = 0 means no face.
    struct HeaderProvider {
        delay: Duration,
    }

    impl HeaderProvider {
        fn new() -> Self {
            Self {
                delay: Duration::ZERO,
            }
        }
    }

    fn eye(ear: f32, x: f32) -> [Point; 6] {
        let h = ear * 5.0;
        [
            Point::new(x, 20.0),
            Point::new(x + 3.0, 20.0 - h),
            Point::new(x + 7.0, 20.0 - h),
            Point::new(x + 10.0, 20.0),
            Point::new(x + 7.0, 20.0 + h),
            Point::new(x + 3.0, 20.0 + h),
        ]
    }

    impl FaceProvider for HeaderProvider {
        fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceRegion>, ProviderError> {
            std::thread::sleep(self.delay);
            let [_, face, cx] = image.to_rgb8().get_pixel(0, 0).0;
            if face == 0 {
                return Ok(Vec::new());
            }
            let cx = (cx as u32).max(10);
            Ok(FaceRegion::new(20, cx + 10, 40, cx - 10).into_iter().collect())
        }

        fn detect_landmarks(
            &self,
            image: &DynamicImage,
            _region: &FaceRegion,
        ) -> Result<Option<Landmarks>, ProviderError> {
            let ear = image.to_rgb8().get_pixel(0, 0).0[0] as f32 / 100.0;
            Ok(Some(Landmarks {
                left_eye: eye(ear, 0.0),
                right_eye: eye(ear, 15.0),
            }))
        }

        fn supports_embeddings(&self) -> bool {
            true
        }

        fn embed_face(&self, image: &DynamicImage) -> Result<Option<FaceEmbedding>, ProviderError> {
            let [r, g, _] = image.to_rgb8().get_pixel(1, 0).0;
            Ok(Some(FaceEmbedding::new(vec![r as f32 / 100.0, g as f32 / 100.0])))
        }
    }

    fn frame(ear: f32, cx: u8) -> DynamicImage {
        let mut img = RgbImage::from_pixel(64, 64, Rgb([90, 90, 90]));
        img.put_pixel(0, 0, Rgb([(ear * 100.0).round() as u8, 1, cx]));
        DynamicImage::ImageRgb8(img)
    }

    fn live_primary() -> DynamicImage {
        let mut img = textured(64, 64, 9).to_rgb8();
        img.put_pixel(0, 0, Rgb([30, 1, 32]));
        DynamicImage::ImageRgb8(img)
    }

    fn engine(provider: impl FaceProvider + 'static) -> VerificationEngine {
        VerificationEngine::new(Arc::new(provider), &Config::default())
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let engine = engine(HeaderProvider::new());
        let id = engine.open_session().await.unwrap();
        assert_eq!(engine.session_count().await, 1);
        assert!(engine.close_session(id).await);
        assert!(!engine.close_session(id).await);
        assert_eq!(engine.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let engine = engine(HeaderProvider::new());
        let err = engine
            .push_frame(Uuid::new_v4(), frame(0.3, 32))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_session_limit() {
        let config = Config {
            max_sessions: 2,
            ..Config::default()
        };
        let engine = VerificationEngine::new(Arc::new(HeaderProvider::new()), &config);
        engine.open_session().await.unwrap();
        engine.open_session().await.unwrap();
        assert!(matches!(
            engine.open_session().await,
            Err(ServiceError::SessionLimit(2))
        ));
    }

    #[tokio::test]
    async fn test_expired_sessions_pruned() {
        let config = Config {
            max_sessions: 1,
            session_ttl: Duration::ZERO,
            ..Config::default()
        };
        let engine = VerificationEngine::new(Arc::new(HeaderProvider::new()), &config);
        let first = engine.open_session().await.unwrap();
        let second = engine.open_session().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(engine.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_active_session_outlives_ttl_since_open() {
        let config = Config {
            session_ttl: Duration::from_millis(200),
            ..Config::default()
        };
        let engine = VerificationEngine::new(Arc::new(HeaderProvider::new()), &config);
        let active = engine.open_session().await.unwrap();
        let idle = engine.open_session().await.unwrap();

        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            engine.push_frame(active, frame(0.3, 32)).await.unwrap();
        }

        // Active was opened ~400ms ago but used just now; idle never was
        engine.open_session().await.unwrap();
        engine.push_frame(active, frame(0.3, 32)).await.unwrap();
        assert!(matches!(
            engine.push_frame(idle, frame(0.3, 32)).await,
            Err(ServiceError::UnknownSession(_))
        ));
        assert_eq!(engine.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_sessions_track_blinks_independently() {
        let engine = engine(HeaderProvider::new());
        let blinking = engine.open_session().await.unwrap();
        let steady = engine.open_session().await.unwrap();

        let ears = [0.3, 0.1, 0.1, 0.1, 0.3, 0.1, 0.1, 0.1, 0.1, 0.3];
        let centers = [12u8, 44, 15, 46, 20, 50, 14, 42, 18, 47];
        for (&ear, &cx) in ears.iter().zip(&centers) {
            let sample = engine.push_frame(blinking, frame(ear, cx)).await.unwrap();
            assert!(sample.is_some());
            engine.push_frame(steady, frame(0.3, 32)).await.unwrap();
        }

        let live = engine.session_liveness(blinking, live_primary()).await.unwrap();
        assert_eq!(live.blink_count, 2);
        assert!(live.head_movement_detected);
        assert!(live.passed);

        let still = engine.session_liveness(steady, live_primary()).await.unwrap();
        assert_eq!(still.blink_count, 0);
        assert!(!still.head_movement_detected);
        assert!(!still.passed);
    }

    #[tokio::test]
    async fn test_one_shot_liveness_single_frame() {
        let engine = engine(FullFrameProvider);
        let flat = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([128; 3])));
        let result = engine.check_liveness(flat, Vec::new()).await.unwrap();
        assert!(!result.passed);
        assert!(!result.multi_frame);
    }

    #[tokio::test]
    async fn test_no_face_error_surfaces() {
        let engine = engine(HeaderProvider::new());
        let mut img = RgbImage::from_pixel(64, 64, Rgb([90, 90, 90]));
        img.put_pixel(0, 0, Rgb([30, 0, 32]));
        let err = engine
            .check_liveness(DynamicImage::ImageRgb8(img), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::NoFaceDetected { quality: Some(_) })
        ));
    }

    #[tokio::test]
    async fn test_match_report_via_embeddings() {
        let engine = engine(HeaderProvider::new());
        let mut a = textured(64, 64, 1).to_rgb8();
        a.put_pixel(1, 0, Rgb([10, 20, 0]));
        let mut b = textured(64, 64, 2).to_rgb8();
        b.put_pixel(1, 0, Rgb([10, 50, 0]));
        let report = engine
            .match_faces(
                DynamicImage::ImageRgb8(a),
                DynamicImage::ImageRgb8(b),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(report.assessment.method_used, MatchMethod::Embedding);
        assert!(report.assessment.matched);
        assert!((report.assessment.distance.unwrap() - 0.3).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_timeout_resets_session() {
        let config = Config {
            request_timeout: Duration::from_millis(20),
            ..Config::default()
        };
        let provider = HeaderProvider {
            delay: Duration::from_millis(300),
        };
        let engine = VerificationEngine::new(Arc::new(provider), &config);
        let id = engine.open_session().await.unwrap();

        let err = engine.push_frame(id, frame(0.3, 32)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout(_)));

        // Session survives with a fresh tracker, not stuck busy
        let again = engine.push_frame(id, frame(0.3, 32)).await.unwrap_err();
        assert!(matches!(again, ServiceError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_concurrent_request_on_same_session_is_busy() {
        let provider = HeaderProvider {
            delay: Duration::from_millis(400),
        };
        let engine = VerificationEngine::new(Arc::new(provider), &Config::default());
        let id = engine.open_session().await.unwrap();

        let background = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.push_frame(id, frame(0.3, 32)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = engine.push_frame(id, frame(0.3, 32)).await.unwrap_err();
        assert!(matches!(err, ServiceError::SessionBusy(_)));

        background.await.unwrap().unwrap();
        engine.push_frame(id, frame(0.3, 32)).await.unwrap();
    }
}
