use std::path::PathBuf;

use turnstile_core::{geofence::DEFAULT_MAX_ACCURACY_M, DEFAULT_MIN_SAMPLES, DEFAULT_THRESHOLD};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address the HTTP API binds to.
    pub bind_addr: String,
    /// Directory containing the ArcFace ONNX model.
    pub model_dir: PathBuf,
    /// Path to the SQLite template database.
    pub db_path: PathBuf,
    /// Path to the TOML site registry.
    pub sites_path: PathBuf,
    /// Path to the CSV attendance log.
    pub attendance_path: PathBuf,
    /// Default match threshold in [0, 1] score space.
    pub match_threshold: f32,
    /// Minimum usable samples per enrollment.
    pub min_enroll_samples: usize,
    /// Maximum acceptable GPS accuracy in meters.
    pub max_gps_accuracy_m: f64,
    /// Timeout in seconds for one embedding extraction.
    pub embed_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `TURNSTILE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("turnstile");

        let model_dir = std::env::var("TURNSTILE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let db_path = std::env::var("TURNSTILE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("templates.db"));

        let sites_path = std::env::var("TURNSTILE_SITES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("sites.toml"));

        let attendance_path = std::env::var("TURNSTILE_ATTENDANCE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.csv"));

        Self {
            bind_addr: std::env::var("TURNSTILE_BIND")
                .unwrap_or_else(|_| "127.0.0.1:8088".to_string()),
            model_dir,
            db_path,
            sites_path,
            attendance_path,
            match_threshold: env_f32("TURNSTILE_MATCH_THRESHOLD", DEFAULT_THRESHOLD),
            min_enroll_samples: env_usize("TURNSTILE_MIN_ENROLL_SAMPLES", DEFAULT_MIN_SAMPLES),
            max_gps_accuracy_m: env_f64("TURNSTILE_MAX_GPS_ACCURACY_M", DEFAULT_MAX_ACCURACY_M),
            embed_timeout_secs: env_u64("TURNSTILE_EMBED_TIMEOUT_SECS", 10),
        }
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
