use anyhow::{bail, Context, Result};
use chrono::format::{Item, StrftimeItems};
use rollcall_core::{DistanceMetric, TallyPolicy, Thresholds};
use rollcall_sheets::{AttendanceSynchronizer, RetryPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Session and sheet configuration.
///
/// Built from defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Identity database snapshot.
    pub db_path: PathBuf,
    /// Folder of single-face enrollment images, one per person.
    pub enroll_dir: PathBuf,
    /// Lower confidence bar, as a fraction of 100%.
    pub threshold: f32,
    /// Confidence a match must reach to be accepted.
    pub unknown_threshold: f32,
    /// Matched frames needed before a name is confirmed present.
    pub min_frames: u32,
    pub tally_policy: TallyPolicy,
    pub distance_metric: DistanceMetric,
    /// Jittered embeddings averaged per enrollment image.
    pub enroll_jitters: u32,
    /// Jittered embeddings averaged per live detection.
    pub live_jitters: u32,
    pub sheet: SheetConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    pub spreadsheet_id: Option<String>,
    /// Worksheet (tab) title.
    pub worksheet: String,
    /// OAuth bearer token for the Sheets API.
    pub access_token: Option<String>,
    /// Presence marker written into a cell.
    pub marker: String,
    /// `chrono` format of the date headers in row 1.
    pub date_format: String,
    pub max_attempts: u32,
    pub backoff_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_width: 640,
            capture_height: 480,
            model_dir: data_dir.join("models"),
            db_path: data_dir.join("faces_database.json"),
            enroll_dir: PathBuf::from("known_faces"),
            threshold: 0.40,
            unknown_threshold: 0.45,
            min_frames: 20,
            tally_policy: TallyPolicy::default(),
            distance_metric: DistanceMetric::default(),
            enroll_jitters: 20,
            live_jitters: 1,
            sheet: SheetConfig::default(),
        }
    }
}

impl Default for SheetConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            spreadsheet_id: None,
            worksheet: "Sheet1".to_string(),
            access_token: None,
            marker: rollcall_sheets::sync::DEFAULT_MARKER.to_string(),
            date_format: rollcall_sheets::sync::DEFAULT_DATE_FORMAT.to_string(),
            max_attempts: retry.max_attempts,
            backoff_secs: retry.backoff.as_secs(),
        }
    }
}

impl Config {
    /// Load configuration. `path` falls back to `ROLLCALL_CONFIG`; with
    /// neither, only defaults and environment overrides apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from));

        let mut config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        tracing::debug!(?config.db_path, ?config.model_dir, "configuration loaded");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Apply `ROLLCALL_*` overrides. Values that fail to parse are ignored
    /// with a warning.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = &var;
        env_string(var, "ROLLCALL_CAMERA_DEVICE", &mut self.camera_device);
        env_parse(var, "ROLLCALL_CAPTURE_WIDTH", &mut self.capture_width);
        env_parse(var, "ROLLCALL_CAPTURE_HEIGHT", &mut self.capture_height);
        env_path(var, "ROLLCALL_MODEL_DIR", &mut self.model_dir);
        env_path(var, "ROLLCALL_DB_PATH", &mut self.db_path);
        env_path(var, "ROLLCALL_ENROLL_DIR", &mut self.enroll_dir);
        env_parse(var, "ROLLCALL_THRESHOLD", &mut self.threshold);
        env_parse(var, "ROLLCALL_UNKNOWN_THRESHOLD", &mut self.unknown_threshold);
        env_parse(var, "ROLLCALL_MIN_FRAMES", &mut self.min_frames);
        env_parse(var, "ROLLCALL_TALLY_POLICY", &mut self.tally_policy);
        env_parse(var, "ROLLCALL_DISTANCE_METRIC", &mut self.distance_metric);
        env_parse(var, "ROLLCALL_ENROLL_JITTERS", &mut self.enroll_jitters);
        env_parse(var, "ROLLCALL_LIVE_JITTERS", &mut self.live_jitters);

        let sheet = &mut self.sheet;
        if let Some(id) = var("ROLLCALL_SPREADSHEET_ID") {
            sheet.spreadsheet_id = Some(id);
        }
        if let Some(token) = var("ROLLCALL_SHEETS_TOKEN") {
            sheet.access_token = Some(token);
        }
        env_string(var, "ROLLCALL_WORKSHEET", &mut sheet.worksheet);
        env_string(var, "ROLLCALL_MARKER", &mut sheet.marker);
        env_string(var, "ROLLCALL_DATE_FORMAT", &mut sheet.date_format);
        env_parse(var, "ROLLCALL_MAX_ATTEMPTS", &mut sheet.max_attempts);
        env_parse(var, "ROLLCALL_BACKOFF_SECS", &mut sheet.backoff_secs);
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.thresholds()?;
        if self.min_frames == 0 {
            bail!("min_frames must be at least 1");
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            bail!("capture resolution must be non-zero");
        }
        if self.sheet.marker.trim().is_empty() {
            bail!("sheet.marker must not be blank");
        }
        if self.sheet.date_format.trim().is_empty()
            || StrftimeItems::new(&self.sheet.date_format).any(|item| matches!(item, Item::Error))
        {
            bail!("sheet.date_format {:?} is not a valid date format", self.sheet.date_format);
        }
        if self.sheet.max_attempts == 0 {
            bail!("sheet.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Result<Thresholds> {
        Thresholds::new(self.threshold, self.unknown_threshold).context("invalid match thresholds")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sheet.max_attempts,
            backoff: Duration::from_secs(self.sheet.backoff_secs),
        }
    }

    pub fn synchronizer(&self) -> AttendanceSynchronizer {
        AttendanceSynchronizer::new(self.sheet.marker.clone(), self.sheet.date_format.clone())
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_string(var: &dyn Fn(&str) -> Option<String>, key: &str, slot: &mut String) {
    if let Some(v) = var(key) {
        *slot = v;
    }
}

fn env_path(var: &dyn Fn(&str) -> Option<String>, key: &str, slot: &mut PathBuf) {
    if let Some(v) = var(key) {
        *slot = PathBuf::from(v);
    }
}

fn env_parse<T: FromStr>(var: &dyn Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}
