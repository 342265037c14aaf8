use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Stored as origin + size in source-image pixels; the `top`/`right`/
/// `bottom`/`left` accessors give the edge form used by the identity
/// database and annotation code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    /// Clamp the box to integer pixel bounds `(left, top, right, bottom)` inside
    /// an image of the given size. Returns `None` when nothing remains.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let left = self.left().floor().clamp(0.0, width as f32) as u32;
        let top = self.top().floor().clamp(0.0, height as f32) as u32;
        let right = self.right().ceil().clamp(0.0, width as f32) as u32;
        let bottom = self.bottom().ceil().clamp(0.0, height as f32) as u32;
        if right <= left || bottom <= top {
            None
        } else {
            Some((left, top, right, bottom))
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance `1 - similarity`, in [0, 2]. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Element-wise mean of several embeddings, L2-normalized.
    ///
    /// Returns `None` for an empty slice.
    pub fn mean(embeddings: &[Embedding]) -> Option<Embedding> {
        let first = embeddings.first()?;
        let mut acc = vec![0.0f32; first.values.len()];
        for e in embeddings {
            for (slot, v) in acc.iter_mut().zip(e.values.iter()) {
                *slot += v;
            }
        }
        let n = embeddings.len() as f32;
        acc.iter_mut().for_each(|v| *v /= n);

        Some(Embedding {
            values: l2_normalize(acc),
            model_version: first.model_version.clone(),
        })
    }
}

/// L2-normalize a raw vector. Zero vectors are returned unchanged.
pub fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

/// One face found by the embedding provider: where it is and what it looks like.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub embedding: Embedding,
}

/// RGB8 crop of an enrolled face.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    /// Packed RGB bytes, `width * height * 3` long.
    pub pixels: Vec<u8>,
}

impl Thumbnail {
    /// Crop `bbox` out of `image`. An out-of-frame box yields an empty thumbnail.
    pub fn crop(image: &image::RgbImage, bbox: &BoundingBox) -> Self {
        let Some((left, top, right, bottom)) = bbox.pixel_bounds(image.width(), image.height())
        else {
            return Self::default();
        };
        let view = image::imageops::crop_imm(image, left, top, right - left, bottom - top);
        let crop = view.to_image();
        Self {
            width: crop.width(),
            height: crop.height(),
            pixels: crop.into_raw(),
        }
    }

    pub fn to_image(&self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

/// An enrolled identity: a name and the face it was enrolled from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    pub embedding: Embedding,
    pub bounding_box: BoundingBox,
    pub thumbnail: Thumbnail,
}
