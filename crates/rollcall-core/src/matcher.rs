//! Per-frame classification of detected faces against the identity database.
//!
//! Confidence is `(1 - min_distance) * 100`, clamped to [0, 100]. A face is
//! only given a name when its confidence clears both thresholds; everything
//! else is [`MatchOutcome::Unknown`].

use crate::database::IdentityDatabase;
use crate::provider::{EmbeddingProvider, ProviderError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ThresholdError {
    #[error("threshold {0} is outside [0, 1]")]
    OutOfRange(f32),
    #[error("threshold {threshold} must not exceed unknown_threshold {unknown_threshold}")]
    Inverted { threshold: f32, unknown_threshold: f32 },
}

/// The two acceptance bars, as fractions of 1.
///
/// Below `threshold` a face is unknown outright; between the two it is in
/// the ambiguous band and still unknown; at or above `unknown_threshold`
/// it takes the nearest enrolled name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    threshold: f32,
    unknown_threshold: f32,
}

impl Thresholds {
    pub fn new(threshold: f32, unknown_threshold: f32) -> Result<Self, ThresholdError> {
        for t in [threshold, unknown_threshold] {
            if !(0.0..=1.0).contains(&t) {
                return Err(ThresholdError::OutOfRange(t));
            }
        }
        if threshold > unknown_threshold {
            return Err(ThresholdError::Inverted { threshold, unknown_threshold });
        }
        Ok(Self { threshold, unknown_threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn unknown_threshold(&self) -> f32 {
        self.unknown_threshold
    }

    /// Apply the decision rule to a confidence percentage.
    pub fn accepts(&self, confidence: f32) -> bool {
        let c = confidence / 100.0;
        if c < self.threshold {
            return false;
        }
        c >= self.unknown_threshold
    }
}

/// Result of classifying one face.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Known { name: String, confidence: f32 },
    Unknown { confidence: f32 },
}

impl MatchOutcome {
    pub fn confidence(&self) -> f32 {
        match self {
            MatchOutcome::Known { confidence, .. } | MatchOutcome::Unknown { confidence } => *confidence,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            MatchOutcome::Known { name, .. } => Some(name),
            MatchOutcome::Unknown { .. } => None,
        }
    }

    /// Annotation text: `"<name> <confidence>%"`.
    pub fn label(&self) -> String {
        let name = self.name().unwrap_or("Unknown");
        format!("{name} {:.2}%", self.confidence())
    }
}

/// One classified face in one frame. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub bounding_box: BoundingBox,
    pub embedding: Embedding,
    pub outcome: MatchOutcome,
}

/// Confidence percentage for a distance; negative values (distance > 1) clamp to 0.
pub fn confidence_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    ((1.0 - distance) * 100.0).clamp(0.0, 100.0)
}

/// Nearest-neighbour classifier with dual-threshold unknown rejection.
#[derive(Debug, Clone, Copy)]
pub struct FrameMatcher {
    thresholds: Thresholds,
    quality_hint: u32,
}

impl FrameMatcher {
    pub fn new(thresholds: Thresholds, quality_hint: u32) -> Self {
        Self { thresholds, quality_hint }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Classify one embedding against every enrolled identity.
    ///
    /// An empty database has no finite nearest distance and always yields
    /// `Unknown` with zero confidence.
    pub fn classify<P>(&self, provider: &P, probe: &Embedding, db: &IdentityDatabase) -> MatchOutcome
    where
        P: EmbeddingProvider + ?Sized,
    {
        let mut best: Option<(usize, f32)> = None;
        for (i, record) in db.records().iter().enumerate() {
            let d = provider.distance(probe, &record.embedding);
            if d.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        let Some((idx, min_distance)) = best else {
            return MatchOutcome::Unknown { confidence: 0.0 };
        };

        let confidence = confidence_from_distance(min_distance);
        if self.thresholds.accepts(confidence) {
            MatchOutcome::Known { name: db.records()[idx].name.clone(), confidence }
        } else {
            MatchOutcome::Unknown { confidence }
        }
    }

    /// Detect and classify every face in `frame`.
    ///
    /// An empty result means no faces were detected.
    pub fn process_frame<P>(
        &self,
        provider: &mut P,
        frame: &RgbImage,
        db: &IdentityDatabase,
    ) -> Result<Vec<DetectionEvent>, ProviderError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let detections = provider.detections(frame, self.quality_hint)?;
        if detections.is_empty() {
            tracing::debug!("no faces detected");
            return Ok(Vec::new());
        }

        let events = detections
            .into_iter()
            .map(|d| {
                let outcome = self.classify(&*provider, &d.embedding, db);
                match &outcome {
                    MatchOutcome::Known { name, confidence } => {
                        tracing::debug!(name = %name, confidence = *confidence, "detected person");
                    }
                    MatchOutcome::Unknown { confidence } => {
                        tracing::debug!(confidence = *confidence, "unknown face detected");
                    }
                }
                DetectionEvent {
                    bounding_box: d.bounding_box,
                    embedding: d.embedding,
                    outcome,
                }
            })
            .collect();

        Ok(events)
    }
}
