//! The live attendance loop: capture, match, tally, annotate.

use anyhow::{Context, Result};
use image::RgbImage;
use rollcall_core::{annotate, ConsistencyTracker, EmbeddingProvider, FrameMatcher, IdentityDatabase};
use rollcall_hw::FrameSource;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const ANNOTATED_FILE: &str = "latest.jpg";

/// What a finished session hands to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Frames captured and processed.
    pub frames: u64,
    pub capture_failures: u64,
    pub average_frame_time: Option<Duration>,
    /// Confirmed names, in confirmation order.
    pub confirmed: Vec<String>,
}

/// One live session. The tracker lives and dies with it.
pub struct Session<'a, P: EmbeddingProvider + ?Sized> {
    provider: &'a mut P,
    db: &'a IdentityDatabase,
    matcher: FrameMatcher,
    tracker: ConsistencyTracker,
    annotated_dir: Option<PathBuf>,
    frames: u64,
    capture_failures: u64,
    busy: Duration,
}

impl<'a, P: EmbeddingProvider + ?Sized> Session<'a, P> {
    pub fn new(
        provider: &'a mut P,
        db: &'a IdentityDatabase,
        matcher: FrameMatcher,
        tracker: ConsistencyTracker,
    ) -> Self {
        Self {
            provider,
            db,
            matcher,
            tracker,
            annotated_dir: None,
            frames: 0,
            capture_failures: 0,
            busy: Duration::ZERO,
        }
    }

    /// Write each annotated frame to `<dir>/latest.jpg`.
    pub fn with_annotated_dir(mut self, dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create annotated frame directory {}", dir.display()))?;
        self.annotated_dir = Some(dir);
        Ok(self)
    }

    pub fn tracker(&self) -> &ConsistencyTracker {
        &self.tracker
    }

    /// Process frames until `stop` is set or `max_frames` loop iterations
    /// have run. The stop flag is checked once per iteration.
    pub fn run<S>(&mut self, source: &mut S, stop: &AtomicBool, max_frames: Option<u64>) -> SessionSummary
    where
        S: FrameSource + ?Sized,
    {
        tracing::info!(
            identities = self.db.len(),
            min_frames = self.tracker.min_frames(),
            "session started"
        );

        let mut iterations = 0u64;
        while !stop.load(Ordering::SeqCst) {
            if max_frames.is_some_and(|max| iterations >= max) {
                break;
            }
            iterations += 1;

            let started = Instant::now();
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    self.capture_failures += 1;
                    tracing::warn!(error = %e, "frame capture failed");
                    continue;
                }
            };
            self.process(frame);
            let elapsed = started.elapsed();
            self.frames += 1;
            self.busy += elapsed;
            tracing::debug!(frame = self.frames, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "frame processed");
        }

        let summary = self.summary();
        tracing::info!(
            frames = summary.frames,
            capture_failures = summary.capture_failures,
            confirmed = summary.confirmed.len(),
            "session finished"
        );
        summary
    }

    fn process(&mut self, mut frame: RgbImage) {
        let events = match self.matcher.process_frame(&mut *self.provider, &frame, self.db) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "face pipeline failed on frame, skipping");
                return;
            }
        };

        for name in self.tracker.observe(events.iter().map(|e| &e.outcome)) {
            println!("{name} confirmed present");
        }

        if let Some(dir) = &self.annotated_dir {
            annotate(&mut frame, &events);
            let path = dir.join(ANNOTATED_FILE);
            if let Err(e) = frame.save(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write annotated frame");
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            frames: self.frames,
            capture_failures: self.capture_failures,
            average_frame_time: (self.frames > 0).then(|| self.busy.div_f64(self.frames as f64)),
            confirmed: self.tracker.confirmed().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{
        BoundingBox, Embedding, IdentityRecord, MatchOutcome, ProviderError, TallyPolicy, Thresholds, Thumbnail,
    };
    use rollcall_hw::CameraError;
    use std::collections::VecDeque;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    fn face(x: f32) -> BoundingBox {
        BoundingBox { x, y: 4.0, width: 8.0, height: 8.0, confidence: 0.9, landmarks: None }
    }

    /// Each `detect` call pops the embeddings seen in the next frame.
    struct FakeProvider {
        frames: VecDeque<Vec<Embedding>>,
        pending: Vec<Embedding>,
    }

    impl EmbeddingProvider for FakeProvider {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, ProviderError> {
            self.pending = self.frames.pop_front().unwrap_or_default();
            Ok((0..self.pending.len()).map(|i| face(i as f32 * 10.0)).collect())
        }

        fn embed(&mut self, _image: &RgbImage, faces: &[BoundingBox], _hint: u32) -> Result<Vec<Embedding>, ProviderError> {
            Ok(self.pending.drain(..faces.len()).collect())
        }

        fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
            a.euclidean_distance(b)
        }
    }

    /// Blank frames; `None` entries are capture failures.
    struct FakeSource {
        script: VecDeque<Option<()>>,
        stop_when_empty: Option<&'static AtomicBool>,
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> Result<RgbImage, CameraError> {
            match self.script.pop_front() {
                Some(Some(())) => Ok(RgbImage::new(32, 32)),
                Some(None) => Err(CameraError::CaptureFailed("dequeue timed out".into())),
                None => {
                    if let Some(stop) = self.stop_when_empty {
                        stop.store(true, Ordering::SeqCst);
                    }
                    Err(CameraError::CaptureFailed("end of script".into()))
                }
            }
        }
    }

    fn db() -> IdentityDatabase {
        let record = |name: &str, values: &[f32]| IdentityRecord {
            name: name.into(),
            embedding: emb(values),
            bounding_box: face(0.0),
            thumbnail: Thumbnail::default(),
        };
        IdentityDatabase::from_records(vec![record("Alice", &[0.0, 0.0]), record("Bob", &[10.0, 0.0])])
    }

    fn matcher() -> FrameMatcher {
        FrameMatcher::new(Thresholds::new(0.55, 0.6).unwrap(), 1)
    }

    #[test]
    fn test_alice_confirmed_bob_not() {
        // Alice in 25 of 30 frames, Bob in 5.
        let frames: VecDeque<Vec<Embedding>> = (0..30)
            .map(|i| if i < 25 { vec![emb(&[0.05, 0.0])] } else { vec![emb(&[10.0, 0.1])] })
            .collect();
        let mut provider = FakeProvider { frames, pending: Vec::new() };
        let db = db();
        let tracker = ConsistencyTracker::new(20, TallyPolicy::PerDetection);
        let mut session = Session::new(&mut provider, &db, matcher(), tracker);
        let mut source = FakeSource { script: (0..30).map(|_| Some(())).collect(), stop_when_empty: None };

        let stop = AtomicBool::new(false);
        let summary = session.run(&mut source, &stop, Some(30));

        assert_eq!(summary.frames, 30);
        assert_eq!(summary.confirmed, vec!["Alice".to_string()]);
        assert_eq!(session.tracker().count("Alice"), 25);
        assert_eq!(session.tracker().count("Bob"), 5);
        assert!(summary.average_frame_time.is_some());
    }

    #[test]
    fn test_unknown_faces_never_confirmed() {
        let frames: VecDeque<Vec<Embedding>> = (0..10).map(|_| vec![emb(&[5.0, 5.0])]).collect();
        let mut provider = FakeProvider { frames, pending: Vec::new() };
        let db = db();
        let mut session = Session::new(&mut provider, &db, matcher(), ConsistencyTracker::new(1, TallyPolicy::PerDetection));
        let mut source = FakeSource { script: (0..10).map(|_| Some(())).collect(), stop_when_empty: None };

        let summary = session.run(&mut source, &AtomicBool::new(false), Some(10));

        assert!(summary.confirmed.is_empty());
        assert!(matches!(
            matcher().classify(&provider, &emb(&[5.0, 5.0]), &db),
            MatchOutcome::Unknown { .. }
        ));
    }

    #[test]
    fn test_capture_failures_skipped_and_stop_flag_honored() {
        static STOP: AtomicBool = AtomicBool::new(false);
        let frames: VecDeque<Vec<Embedding>> = (0..2).map(|_| vec![emb(&[0.0, 0.0])]).collect();
        let mut provider = FakeProvider { frames, pending: Vec::new() };
        let db = db();
        let mut session = Session::new(&mut provider, &db, matcher(), ConsistencyTracker::new(2, TallyPolicy::PerDetection));
        let mut source = FakeSource {
            script: VecDeque::from(vec![Some(()), None, Some(())]),
            stop_when_empty: Some(&STOP),
        };

        let summary = session.run(&mut source, &STOP, None);

        assert_eq!(summary.frames, 2);
        assert_eq!(summary.capture_failures, 2);
        assert_eq!(summary.confirmed, vec!["Alice".to_string()]);
    }

    #[test]
    fn test_average_frame_time_beyond_u32_frames() {
        let mut provider = FakeProvider { frames: VecDeque::new(), pending: Vec::new() };
        let db = db();
        let mut session = Session::new(&mut provider, &db, matcher(), ConsistencyTracker::new(1, TallyPolicy::PerFrame));
        // 2^32 + 2 frames would truncate to a divisor of 2.
        session.frames = (1u64 << 32) + 2;
        session.busy = Duration::from_secs(1 << 32);

        let avg = session.summary().average_frame_time.unwrap();
        assert!(avg < Duration::from_millis(1001), "average was {avg:?}");
        assert!(avg > Duration::from_millis(999));
    }

    #[test]
    fn test_stopped_before_start_processes_nothing() {
        let mut provider = FakeProvider { frames: VecDeque::new(), pending: Vec::new() };
        let db = db();
        let mut session = Session::new(&mut provider, &db, matcher(), ConsistencyTracker::new(1, TallyPolicy::PerFrame));
        let mut source = FakeSource { script: VecDeque::from(vec![Some(())]), stop_when_empty: None };

        let summary = session.run(&mut source, &AtomicBool::new(true), None);

        assert_eq!(summary.frames, 0);
        assert_eq!(summary.average_frame_time, None);
    }

    #[test]
    fn test_annotated_frame_written() {
        let dir = tempfile::tempdir().unwrap();
        let frames: VecDeque<Vec<Embedding>> = VecDeque::from(vec![vec![emb(&[0.0, 0.0])]]);
        let mut provider = FakeProvider { frames, pending: Vec::new() };
        let db = db();
        let mut session = Session::new(&mut provider, &db, matcher(), ConsistencyTracker::new(5, TallyPolicy::PerDetection))
            .with_annotated_dir(dir.path().join("frames"))
            .unwrap();
        let mut source = FakeSource { script: VecDeque::from(vec![Some(())]), stop_when_empty: None };

        session.run(&mut source, &AtomicBool::new(false), Some(1));

        assert!(dir.path().join("frames").join(ANNOTATED_FILE).exists());
    }
}
