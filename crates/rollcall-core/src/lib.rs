//! rollcall-core: face enrollment, per-frame identification and temporal
//! confirmation for attendance tracking.
//!
//! Faces are found with SCRFD and embedded with ArcFace, both via ONNX
//! Runtime, behind the [`EmbeddingProvider`] trait.

pub mod alignment;
pub mod annotate;
pub mod database;
pub mod detector;
pub mod matcher;
pub mod provider;
pub mod recognizer;
pub mod tracker;
pub mod types;

pub use annotate::{annotate, Annotation};
pub use database::{IdentityDatabase, SkipReason, Skipped};
pub use detector::FaceDetector;
pub use matcher::{DetectionEvent, FrameMatcher, MatchOutcome, ThresholdError, Thresholds};
pub use provider::{DistanceMetric, EmbeddingProvider, OnnxProvider, ProviderError};
pub use recognizer::FaceRecognizer;
pub use tracker::{ConsistencyTracker, TallyPolicy};
pub use types::{BoundingBox, Detection, Embedding, IdentityRecord, Thumbnail};
