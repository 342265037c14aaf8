//! The embedding provider seam: image in, faces (box + vector) out.
//!
//! Everything downstream (enrollment, frame matching) talks to
//! [`EmbeddingProvider`] only, so the ONNX models can be swapped for a
//! scripted fake in tests.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Detection, Embedding};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("provider returned {embeddings} embeddings for {faces} faces")]
    Mismatch { faces: usize, embeddings: usize },
}

/// How two embeddings are compared. Lower distance = more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cosine similarity`, in [0, 2].
    #[default]
    Cosine,
    /// L2 distance; in [0, 2] for normalized embeddings.
    Euclidean,
}

impl DistanceMetric {
    pub fn distance(self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            DistanceMetric::Cosine => a.cosine_distance(b),
            DistanceMetric::Euclidean => a.euclidean_distance(b),
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            other => Err(format!("unknown distance metric '{other}' (expected cosine or euclidean)")),
        }
    }
}

/// Black-box face detection and embedding.
///
/// Finding no face is a normal outcome (an empty vector), not an error.
pub trait EmbeddingProvider {
    /// Locate faces, most confident first.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ProviderError>;

    /// Embed each of `faces`. `quality_hint` is the number of jittered samples
    /// averaged per face; 1 means a single pass.
    fn embed(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
        quality_hint: u32,
    ) -> Result<Vec<Embedding>, ProviderError>;

    fn distance(&self, a: &Embedding, b: &Embedding) -> f32;

    /// Detect, then embed every face found.
    fn detections(
        &mut self,
        image: &RgbImage,
        quality_hint: u32,
    ) -> Result<Vec<Detection>, ProviderError> {
        let faces = self.detect(image)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.embed(image, &faces, quality_hint)?;
        if embeddings.len() != faces.len() {
            return Err(ProviderError::Mismatch {
                faces: faces.len(),
                embeddings: embeddings.len(),
            });
        }
        Ok(faces
            .into_iter()
            .zip(embeddings)
            .map(|(bounding_box, embedding)| Detection { bounding_box, embedding })
            .collect())
    }
}

/// SCRFD + ArcFace provider running on ONNX Runtime.
pub struct OnnxProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    metric: DistanceMetric,
}

impl OnnxProvider {
    /// Load both models from `model_dir` (`det_10g.onnx`, `w600k_r50.onnx`).
    pub fn load(model_dir: &Path, metric: DistanceMetric) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        tracing::info!(model_dir = %model_dir.display(), ?metric, "embedding provider ready");
        Ok(Self { detector, recognizer, metric })
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ProviderError> {
        Ok(self.detector.detect(image)?)
    }

    fn embed(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
        quality_hint: u32,
    ) -> Result<Vec<Embedding>, ProviderError> {
        faces
            .iter()
            .map(|face| Ok(self.recognizer.extract(image, face, quality_hint)?))
            .collect()
    }

    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        self.metric.distance(a, b)
    }
}
