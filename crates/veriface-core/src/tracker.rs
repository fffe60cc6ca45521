//! Blink and head-movement tracking over a frame sequence.
//!
//! The eye aspect ratio (EAR) of a six-point eye contour drops sharply while
//! the lid is closed and is tolerant of scale and small head tilts, which
//! makes it a per-frame openness signal. A blink is a sustained run of
//! closed frames followed by a reopening edge; shorter dips are noise.
//!
//! A [`BlinkTracker`] is per-session state. Each concurrent session owns its
//! own instance and drops it when the session ends.

use std::collections::VecDeque;

use image::DynamicImage;

use crate::error::CoreError;
use crate::policy::LivenessPolicy;
use crate::provider::FaceProvider;
use crate::types::{EarSample, Point};

/// EAR = (|p1-p5| + |p2-p4|) / (2 |p0-p3|).
///
/// Returns `None` when the eye corners coincide and the ratio is undefined.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> Option<f32> {
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal <= f32::EPSILON {
        return None;
    }
    let vertical_a = eye[1].distance(&eye[5]);
    let vertical_b = eye[2].distance(&eye[4]);
    Some((vertical_a + vertical_b) / (2.0 * horizontal))
}

/// Sliding-window blink counter with face-centre history.
#[derive(Debug, Clone)]
pub struct BlinkTracker {
    window: VecDeque<EarSample>,
    centers: VecDeque<(f64, f64)>,
    capacity: usize,
    ear_threshold: f32,
    ear_consec_frames: u32,
    movement_variance: f64,
    min_movement_frames: usize,
    consecutive_closed: u32,
    blink_count: u32,
    frames_seen: u64,
}

impl BlinkTracker {
    pub fn new(policy: &LivenessPolicy) -> Self {
        let capacity = policy.window_capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            centers: VecDeque::with_capacity(capacity),
            capacity,
            ear_threshold: policy.ear_threshold,
            ear_consec_frames: policy.ear_consec_frames,
            movement_variance: policy.movement_variance,
            min_movement_frames: policy.min_movement_frames,
            consecutive_closed: 0,
            blink_count: 0,
            frames_seen: 0,
        }
    }

    /// Detect the face and eye landmarks in `frame` and record its EAR.
    ///
    /// Returns `None` without touching the EAR window when no face or no
    /// landmarks were found. The face centre is recorded for movement
    /// analysis whenever a face was found.
    pub fn ingest_frame(
        &mut self,
        provider: &dyn FaceProvider,
        frame: &DynamicImage,
    ) -> Result<Option<EarSample>, CoreError> {
        let index = self.frames_seen;
        self.frames_seen += 1;

        let regions = provider.detect_faces(frame)?;
        let Some(region) = regions.first() else {
            tracing::debug!(frame = index, "tracker: no face");
            return Ok(None);
        };
        push_bounded(&mut self.centers, region.center(), self.capacity);

        let Some(landmarks) = provider.detect_landmarks(frame, region)? else {
            tracing::debug!(frame = index, "tracker: no landmarks");
            return Ok(None);
        };
        let (Some(left), Some(right)) = (
            eye_aspect_ratio(&landmarks.left_eye),
            eye_aspect_ratio(&landmarks.right_eye),
        ) else {
            tracing::debug!(frame = index, "tracker: degenerate eye contour");
            return Ok(None);
        };

        Ok(Some(self.record(index, (left + right) / 2.0)))
    }

    /// Feed one EAR value directly, bypassing detection.
    pub fn ingest_ear(&mut self, ear: f32) -> EarSample {
        let index = self.frames_seen;
        self.frames_seen += 1;
        self.record(index, ear)
    }

    fn record(&mut self, index: u64, ear: f32) -> EarSample {
        let sample = EarSample { ear, index };
        push_bounded(&mut self.window, sample, self.capacity);

        if ear < self.ear_threshold {
            self.consecutive_closed += 1;
        } else {
            if self.consecutive_closed >= self.ear_consec_frames {
                self.blink_count += 1;
                tracing::debug!(
                    frame = index,
                    closed_run = self.consecutive_closed,
                    blinks = self.blink_count,
                    "tracker: blink"
                );
            }
            self.consecutive_closed = 0;
        }
        sample
    }

    pub fn blink_count(&self) -> u32 {
        self.blink_count
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &EarSample> + '_ {
        self.window.iter()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Frames offered to the tracker so far, with or without a face.
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Movement across the face centres recorded by [`ingest_frame`](Self::ingest_frame).
    pub fn head_movement_detected(&self) -> bool {
        centers_show_movement(
            self.centers.iter().copied(),
            self.min_movement_frames,
            self.movement_variance,
        )
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.centers.clear();
        self.consecutive_closed = 0;
        self.blink_count = 0;
        self.frames_seen = 0;
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, capacity: usize) {
    if queue.len() == capacity {
        queue.pop_front();
    }
    queue.push_back(value);
}

/// Whether the face centre moves across `frames`.
///
/// Needs at least `min_movement_frames` frames with a detectable face;
/// fewer detections yield `false` rather than an error.
pub fn head_movement(
    provider: &dyn FaceProvider,
    frames: &[DynamicImage],
    policy: &LivenessPolicy,
) -> Result<bool, CoreError> {
    if frames.len() < policy.min_movement_frames {
        return Ok(false);
    }
    let mut centers = Vec::with_capacity(frames.len());
    for frame in frames {
        if let Some(region) = provider.detect_faces(frame)?.first() {
            centers.push(region.center());
        }
    }
    Ok(centers_show_movement(
        centers.into_iter(),
        policy.min_movement_frames,
        policy.movement_variance,
    ))
}

fn centers_show_movement(
    centers: impl Iterator<Item = (f64, f64)>,
    min_frames: usize,
    threshold: f64,
) -> bool {
    let (xs, ys): (Vec<f64>, Vec<f64>) = centers.unzip();
    if xs.len() < min_frames || xs.is_empty() {
        tracing::debug!(detections = xs.len(), "movement: insufficient detections");
        return false;
    }
    let var_x = population_variance(&xs);
    let var_y = population_variance(&ys);
    tracing::debug!(var_x, var_y, threshold, "movement: centre variance");
    var_x > threshold || var_y > threshold
}

fn population_variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eye_with_ear, scripted_frame, ScriptedProvider};

    fn tracker() -> BlinkTracker {
        BlinkTracker::new(&LivenessPolicy::default())
    }

    fn feed(values: &[f32]) -> BlinkTracker {
        let mut t = tracker();
        for &v in values {
            t.ingest_ear(v);
        }
        t
    }

    fn sequence(open: usize, closed: usize, reopen: usize) -> Vec<f32> {
        let mut seq = vec![0.3; open];
        seq.extend(std::iter::repeat(0.1).take(closed));
        seq.extend(std::iter::repeat(0.3).take(reopen));
        seq
    }

    #[test]
    fn test_ear_known_geometry() {
        let eye = eye_with_ear(0.3, Point::new(4.0, 9.0));
        assert!((eye_aspect_ratio(&eye).unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_ear_scale_invariant() {
        let eye = [
            Point::new(0.0, 0.0),
            Point::new(2.5, -1.7),
            Point::new(6.1, -1.9),
            Point::new(9.0, 0.4),
            Point::new(6.3, 1.6),
            Point::new(2.2, 1.8),
        ];
        let base = eye_aspect_ratio(&eye).unwrap();
        for k in [0.01f32, 0.5, 3.7, 250.0] {
            let scaled = eye.map(|p| p.scaled(k));
            let ear = eye_aspect_ratio(&scaled).unwrap();
            assert!((ear - base).abs() < 1e-5, "k={k}: {ear} vs {base}");
        }
    }

    #[test]
    fn test_ear_degenerate_eye() {
        let eye = [Point::new(1.0, 1.0); 6];
        assert!(eye_aspect_ratio(&eye).is_none());
    }

    #[test]
    fn test_four_frame_closure_is_one_blink() {
        assert_eq!(feed(&sequence(5, 4, 5)).blink_count(), 1);
    }

    #[test]
    fn test_two_frame_closure_is_noise() {
        assert_eq!(feed(&sequence(5, 2, 5)).blink_count(), 0);
    }

    #[test]
    fn test_exact_minimum_run_counts() {
        assert_eq!(feed(&sequence(2, 3, 1)).blink_count(), 1);
    }

    #[test]
    fn test_unfinished_closure_not_counted() {
        // Eyes still closed at the end of the sequence: no reopening edge
        assert_eq!(feed(&sequence(5, 6, 0)).blink_count(), 0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let t = feed(&[0.25, 0.25, 0.25, 0.25, 0.3]);
        assert_eq!(t.blink_count(), 0);
    }

    #[test]
    fn test_multiple_blinks() {
        let mut seq = sequence(3, 3, 3);
        seq.extend(sequence(0, 5, 2));
        seq.extend(sequence(0, 1, 2));
        assert_eq!(feed(&seq).blink_count(), 2);
    }

    #[test]
    fn test_window_eviction_keeps_most_recent() {
        let mut t = tracker();
        for i in 0..150 {
            t.ingest_ear(0.3 + (i % 3) as f32 * 0.01);
        }
        assert_eq!(t.len(), 100);
        let indices: Vec<u64> = t.samples().map(|s| s.index).collect();
        assert_eq!(indices, (50..150).collect::<Vec<u64>>());
    }

    #[test]
    fn test_blink_count_survives_eviction() {
        let mut policy = LivenessPolicy::default();
        policy.window_capacity = 4;
        let mut t = BlinkTracker::new(&policy);
        for v in sequence(5, 4, 5) {
            t.ingest_ear(v);
        }
        assert_eq!(t.len(), 4);
        assert_eq!(t.blink_count(), 1);
    }

    #[test]
    fn test_ingest_frames_counts_blink() {
        let provider = ScriptedProvider::new();
        let mut t = tracker();
        for ear in sequence(5, 4, 5) {
            let sample = t
                .ingest_frame(&provider, &scripted_frame(Some(ear), true, 32))
                .unwrap()
                .unwrap();
            assert!((sample.ear - ear).abs() < 1e-5);
        }
        assert_eq!(t.blink_count(), 1);
        assert_eq!(t.len(), 14);
    }

    #[test]
    fn test_no_face_leaves_window_unchanged() {
        let provider = ScriptedProvider::new();
        let mut t = tracker();
        t.ingest_frame(&provider, &scripted_frame(Some(0.3), true, 32))
            .unwrap();
        let result = t
            .ingest_frame(&provider, &scripted_frame(Some(0.1), false, 32))
            .unwrap();
        assert!(result.is_none());
        assert_eq!(t.len(), 1);
        assert_eq!(t.frames_seen(), 2);
    }

    #[test]
    fn test_no_face_frames_do_not_break_closed_run() {
        let provider = ScriptedProvider::new();
        let mut t = tracker();
        let frames = [
            scripted_frame(Some(0.3), true, 32),
            scripted_frame(Some(0.1), true, 32),
            scripted_frame(Some(0.1), true, 32),
            scripted_frame(None, false, 32),
            scripted_frame(Some(0.1), true, 32),
            scripted_frame(Some(0.3), true, 32),
        ];
        for f in &frames {
            t.ingest_frame(&provider, f).unwrap();
        }
        assert_eq!(t.blink_count(), 1);
    }

    #[test]
    fn test_face_without_landmarks_records_centre_only() {
        let provider = ScriptedProvider::new();
        let mut t = tracker();
        assert!(t
            .ingest_frame(&provider, &scripted_frame(None, true, 20))
            .unwrap()
            .is_none());
        assert!(t.is_empty());
        assert_eq!(t.centers.len(), 1);
    }

    #[test]
    fn test_head_movement_detected() {
        let provider = ScriptedProvider::new();
        let frames: Vec<_> = [12u8, 40, 15, 45, 20, 50]
            .iter()
            .map(|&cx| scripted_frame(Some(0.3), true, cx))
            .collect();
        assert!(head_movement(&provider, &frames, &LivenessPolicy::default()).unwrap());
    }

    #[test]
    fn test_static_head_not_movement() {
        let provider = ScriptedProvider::new();
        let frames: Vec<_> = [30u8, 31, 30, 32, 31, 30]
            .iter()
            .map(|&cx| scripted_frame(Some(0.3), true, cx))
            .collect();
        assert!(!head_movement(&provider, &frames, &LivenessPolicy::default()).unwrap());
    }

    #[test]
    fn test_movement_needs_five_detections() {
        let provider = ScriptedProvider::new();
        let mut frames: Vec<_> = [12u8, 50, 12, 50]
            .iter()
            .map(|&cx| scripted_frame(Some(0.3), true, cx))
            .collect();
        assert!(!head_movement(&provider, &frames, &LivenessPolicy::default()).unwrap());

        // Five frames, but one without a face: still only four detections
        frames.push(scripted_frame(None, false, 12));
        assert!(!head_movement(&provider, &frames, &LivenessPolicy::default()).unwrap());
    }

    #[test]
    fn test_tracker_movement_matches_standalone() {
        let provider = ScriptedProvider::new();
        let frames: Vec<_> = [12u8, 40, 15, 45, 20, 50]
            .iter()
            .map(|&cx| scripted_frame(Some(0.3), true, cx))
            .collect();
        let mut t = tracker();
        for f in &frames {
            t.ingest_frame(&provider, f).unwrap();
        }
        assert_eq!(
            t.head_movement_detected(),
            head_movement(&provider, &frames, &LivenessPolicy::default()).unwrap()
        );
    }

    #[test]
    fn test_reset_clears_session() {
        let mut t = feed(&sequence(5, 4, 5));
        t.reset();
        assert_eq!(t.blink_count(), 0);
        assert!(t.is_empty());
        assert_eq!(t.frames_seen(), 0);
    }
}
