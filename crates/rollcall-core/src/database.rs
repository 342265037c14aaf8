//! Identity database: enrolled faces built once from a folder of reference
//! images and persisted as a single JSON snapshot.

use crate::provider::EmbeddingProvider;
use crate::types::{IdentityRecord, Thumbnail};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed identity snapshot {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported identity snapshot version {found} (expected {SNAPSHOT_VERSION})")]
    Version { found: u32 },
}

/// Why an enrollment image did not produce a record.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The filename yields no identity name, e.g. `.png`.
    EmptyName,
    NoFace,
    Unreadable(String),
    ProviderFailed(String),
}

/// A filename that was left out of the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub filename: String,
    pub reason: SkipReason,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    records: Vec<IdentityRecord>,
}

/// Ordered collection of enrolled identities. Read-only once built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IdentityDatabase {
    records: Vec<IdentityRecord>,
}

impl IdentityDatabase {
    pub fn from_records(records: Vec<IdentityRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name.as_str())
    }

    /// Build a database from `(filename, image)` pairs.
    ///
    /// Only the first (most confident) face of each image is enrolled. Images
    /// with no face, or on which the provider fails, are reported in the
    /// returned skip list and do not abort the batch. A repeated name replaces
    /// the earlier record in place.
    pub fn build<P, I>(provider: &mut P, images: I, quality_hint: u32) -> (Self, Vec<Skipped>)
    where
        P: EmbeddingProvider + ?Sized,
        I: IntoIterator<Item = (String, RgbImage)>,
    {
        let mut db = Self::default();
        let mut skipped = Vec::new();

        for (filename, image) in images {
            let name = name_from_filename(&filename).trim();
            if name.is_empty() {
                tracing::warn!(file = %filename, "enrollment file has no name before its extension");
                skipped.push(Skipped { filename, reason: SkipReason::EmptyName });
                continue;
            }
            let name = name.to_string();

            let faces = match provider.detect(&image) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(file = %filename, error = %e, "enrollment: detection failed");
                    skipped.push(Skipped { filename, reason: SkipReason::ProviderFailed(e.to_string()) });
                    continue;
                }
            };

            let Some(face) = faces.into_iter().next() else {
                tracing::warn!(file = %filename, "no face found in enrollment image");
                skipped.push(Skipped { filename, reason: SkipReason::NoFace });
                continue;
            };

            let embedding = match provider.embed(&image, std::slice::from_ref(&face), quality_hint) {
                Ok(mut v) if !v.is_empty() => v.swap_remove(0),
                Ok(_) => {
                    tracing::warn!(file = %filename, "enrollment: provider returned no embedding");
                    skipped.push(Skipped { filename, reason: SkipReason::NoFace });
                    continue;
                }
                Err(e) => {
                    tracing::warn!(file = %filename, error = %e, "enrollment: embedding failed");
                    skipped.push(Skipped { filename, reason: SkipReason::ProviderFailed(e.to_string()) });
                    continue;
                }
            };

            let record = IdentityRecord {
                name,
                thumbnail: Thumbnail::crop(&image, &face),
                bounding_box: face,
                embedding,
            };
            tracing::debug!(name = %record.name, file = %filename, "enrolled identity");
            db.insert(record);
        }

        tracing::info!(enrolled = db.len(), skipped = skipped.len(), "identity database built");
        (db, skipped)
    }

    fn insert(&mut self, record: IdentityRecord) {
        match self.records.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => {
                tracing::warn!(name = %record.name, "duplicate enrollment name, keeping the later image");
                *existing = record;
            }
            None => self.records.push(record),
        }
    }

    /// Write the whole database to `path` (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), DatabaseError> {
        let io_err = |source| DatabaseError::Io { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let snapshot = Snapshot { version: SNAPSHOT_VERSION, records: self.records.clone() };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|source| DatabaseError::Malformed { path: path.to_path_buf(), source })?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;

        tracing::info!(path = %path.display(), records = self.len(), "identity database saved");
        Ok(())
    }

    /// Read a snapshot written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, DatabaseError> {
        let bytes = fs::read(path).map_err(|source| DatabaseError::Io { path: path.to_path_buf(), source })?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|source| DatabaseError::Malformed { path: path.to_path_buf(), source })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DatabaseError::Version { found: snapshot.version });
        }
        Ok(Self { records: snapshot.records })
    }

    /// Like [`load`](Self::load), but a missing or unreadable snapshot is an
    /// empty database.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(db) => {
                tracing::info!(path = %path.display(), records = db.len(), "identity database loaded");
                db
            }
            Err(DatabaseError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no identity database yet");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable identity database");
                Self::default()
            }
        }
    }

    /// Load the snapshot at `db_path`; if that yields nothing, enroll every
    /// image in `enroll_dir` and save the result.
    pub fn open_or_build<P>(
        db_path: &Path,
        enroll_dir: &Path,
        provider: &mut P,
        quality_hint: u32,
    ) -> Result<(Self, Vec<Skipped>), DatabaseError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let db = Self::load_or_empty(db_path);
        if !db.is_empty() {
            return Ok((db, Vec::new()));
        }
        Self::rebuild(db_path, enroll_dir, provider, quality_hint)
    }

    /// Enroll `enroll_dir` from scratch and overwrite the snapshot.
    pub fn rebuild<P>(
        db_path: &Path,
        enroll_dir: &Path,
        provider: &mut P,
        quality_hint: u32,
    ) -> Result<(Self, Vec<Skipped>), DatabaseError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let (images, mut skipped) = load_enrollment_images(enroll_dir)?;
        let (db, more) = Self::build(provider, images, quality_hint);
        skipped.extend(more);
        db.save(db_path)?;
        Ok((db, skipped))
    }
}

/// Identity name for an enrollment file: everything before the first `.`.
pub fn name_from_filename(filename: &str) -> &str {
    filename.split('.').next().unwrap_or(filename)
}

/// Decode every regular file in `dir`, sorted by file name.
///
/// Files that are not decodable images are returned as skipped.
pub fn load_enrollment_images(dir: &Path) -> Result<(Vec<(String, RgbImage)>, Vec<Skipped>), DatabaseError> {
    let io_err = |source| DatabaseError::Io { path: dir.to_path_buf(), source };

    let mut entries: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        entries.push((filename, entry.path()));
    }
    entries.sort();

    let mut images = Vec::with_capacity(entries.len());
    let mut skipped = Vec::new();
    for (filename, path) in entries {
        match image::open(&path) {
            Ok(img) => images.push((filename, img.to_rgb8())),
            Err(e) => {
                tracing::warn!(file = %filename, error = %e, "skipping unreadable enrollment image");
                skipped.push(Skipped { filename, reason: SkipReason::Unreadable(e.to_string()) });
            }
        }
    }

    Ok((images, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{emb, face_at, ScriptedProvider};
    use crate::types::Detection;

    fn det(x: f32, values: &[f32]) -> Detection {
        Detection { bounding_box: face_at(x, 1.0), embedding: emb(values) }
    }

    fn blank() -> RgbImage {
        RgbImage::from_pixel(16, 16, image::Rgb([10, 20, 30]))
    }

    #[test]
    fn test_name_from_filename() {
        assert_eq!(name_from_filename("Alice.png"), "Alice");
        assert_eq!(name_from_filename("Bob.Smith.jpg"), "Bob");
        assert_eq!(name_from_filename("Carol"), "Carol");
    }

    #[test]
    fn test_build_skips_image_without_face() {
        let mut provider = ScriptedProvider::new(vec![
            vec![det(1.0, &[1.0, 0.0])],
            vec![],
            vec![det(2.0, &[0.0, 1.0])],
        ]);
        let images = vec![
            ("Alice.png".to_string(), blank()),
            ("empty.png".to_string(), blank()),
            ("Bob.jpg".to_string(), blank()),
        ];

        let (db, skipped) = IdentityDatabase::build(&mut provider, images, 20);

        assert_eq!(db.len(), 2);
        assert_eq!(db.names().collect::<Vec<_>>(), vec!["Alice", "Bob"]);
        assert_eq!(skipped, vec![Skipped { filename: "empty.png".into(), reason: SkipReason::NoFace }]);
        assert_eq!(provider.embed_hints, vec![20, 20]);
    }

    #[test]
    fn test_build_skips_file_without_name() {
        let mut provider = ScriptedProvider::new(vec![vec![det(1.0, &[1.0, 0.0])]]);
        let images = vec![(".png".to_string(), blank()), ("Alice.png".to_string(), blank())];

        let (db, skipped) = IdentityDatabase::build(&mut provider, images, 1);

        assert_eq!(db.names().collect::<Vec<_>>(), vec!["Alice"]);
        assert_eq!(skipped, vec![Skipped { filename: ".png".into(), reason: SkipReason::EmptyName }]);
        assert_eq!(provider.embed_hints, vec![1]);
    }

    #[test]
    fn test_build_uses_first_detection_only() {
        let mut provider = ScriptedProvider::new(vec![vec![
            det(1.0, &[1.0, 0.0]),
            det(8.0, &[0.0, 1.0]),
        ]]);
        let (db, _) = IdentityDatabase::build(&mut provider, vec![("Alice.png".into(), blank())], 1);

        assert_eq!(db.len(), 1);
        assert_eq!(db.records()[0].embedding, emb(&[1.0, 0.0]));
        assert_eq!(db.records()[0].bounding_box, face_at(1.0, 1.0));
        assert_eq!((db.records()[0].thumbnail.width, db.records()[0].thumbnail.height), (4, 4));
    }

    #[test]
    fn test_duplicate_name_last_wins() {
        let mut provider = ScriptedProvider::new(vec![
            vec![det(1.0, &[1.0, 0.0])],
            vec![det(2.0, &[0.0, 1.0])],
        ]);
        let images = vec![("Alice.png".into(), blank()), ("Alice.jpg".into(), blank())];
        let (db, _) = IdentityDatabase::build(&mut provider, images, 1);

        assert_eq!(db.len(), 1);
        assert_eq!(db.records()[0].embedding, emb(&[0.0, 1.0]));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("faces.json");

        let mut provider = ScriptedProvider::new(vec![
            vec![det(1.0, &[0.123_456_7, -0.987_654_3, 1e-7])],
            vec![det(3.0, &[0.5, 0.25, -0.125])],
        ]);
        let images = vec![("Alice.png".into(), blank()), ("Bob.png".into(), blank())];
        let (db, _) = IdentityDatabase::build(&mut provider, images, 1);

        db.save(&path).unwrap();
        let loaded = IdentityDatabase::load(&path).unwrap();
        assert_eq!(loaded, db);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_or_empty_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(IdentityDatabase::load_or_empty(&missing).is_empty());

        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, b"not json").unwrap();
        assert!(matches!(IdentityDatabase::load(&garbage), Err(DatabaseError::Malformed { .. })));
        assert!(IdentityDatabase::load_or_empty(&garbage).is_empty());
    }

    #[test]
    fn test_open_or_build_from_folder_then_reuses_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let faces = dir.path().join("known_faces");
        fs::create_dir(&faces).unwrap();
        for name in ["Alice.png", "Bob.png", "Nobody.png"] {
            blank().save(faces.join(name)).unwrap();
        }
        fs::write(faces.join("notes.txt"), b"not an image").unwrap();
        let db_path = dir.path().join("faces.json");

        // Sorted order: Alice, Bob, Nobody (notes.txt fails to decode).
        let mut provider = ScriptedProvider::new(vec![
            vec![det(1.0, &[1.0, 0.0])],
            vec![det(1.0, &[0.0, 1.0])],
            vec![],
        ]);
        let (db, skipped) = IdentityDatabase::open_or_build(&db_path, &faces, &mut provider, 20).unwrap();
        assert_eq!(db.names().collect::<Vec<_>>(), vec!["Alice", "Bob"]);
        assert_eq!(skipped.len(), 2);
        assert!(skipped.iter().any(|s| s.filename == "notes.txt"
            && matches!(s.reason, SkipReason::Unreadable(_))));
        assert!(skipped.iter().any(|s| s.filename == "Nobody.png" && s.reason == SkipReason::NoFace));

        // Second open uses the snapshot and never calls the provider.
        let mut idle = ScriptedProvider::new(vec![]);
        let (again, skipped) = IdentityDatabase::open_or_build(&db_path, &faces, &mut idle, 20).unwrap();
        assert_eq!(again, db);
        assert!(skipped.is_empty());
        assert!(idle.embed_hints.is_empty());
    }
}
