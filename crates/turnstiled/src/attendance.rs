//! Append-only CSV attendance log.
//!
//! One row per admitted recognition:
//! `ts,code,type,period,score,lat,lng,distance_m,reason`.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveTime};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use turnstile_core::Reason;

const HEADER: &str = "ts,code,type,period,score,lat,lng,distance_m,reason";

/// One admitted attendance event.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub code: String,
    /// Event kind as claimed by the client, e.g. "checkin" or "checkout".
    pub kind: String,
    pub score: f32,
    pub lat: f64,
    pub lng: f64,
    pub distance_m: Option<f64>,
    pub reason: Reason,
}

pub struct AttendanceLog {
    path: PathBuf,
    // Appends are serialized so concurrent admits never interleave rows.
    lock: Mutex<()>,
}

impl AttendanceLog {
    pub fn new(path: PathBuf) -> Self {
        AttendanceLog { path, lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, creating the file (with header) on first use.
    pub async fn append(&self, record: &AttendanceRecord) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let new_file = !self.path.exists();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        if new_file {
            file.write_all(HEADER.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        file.write_all(Self::format_row(Local::now(), record).as_bytes())
            .await?;
        file.flush().await
    }

    /// Whole log as CSV text; just the header when nothing was logged yet.
    pub async fn read_csv(&self) -> std::io::Result<String> {
        let _guard = self.lock.lock().await;
        if !self.path.exists() {
            return Ok(format!("{HEADER}\n"));
        }
        tokio::fs::read_to_string(&self.path).await
    }

    fn format_row(ts: DateTime<Local>, r: &AttendanceRecord) -> String {
        let distance = r
            .distance_m
            .map(|d| format!("{d:.1}"))
            .unwrap_or_default();
        format!(
            "{},{},{},{},{:.3},{:.6},{:.6},{},{}\n",
            ts.format("%Y-%m-%dT%H:%M:%S"),
            csv_field(&r.code),
            csv_field(&r.kind),
            period(ts.time()),
            r.score,
            r.lat,
            r.lng,
            distance,
            r.reason,
        )
    }
}

/// RFC 4180 quoting for the client-influenced fields. Codes and kinds are
/// free-form strings; one containing a delimiter must not split the row.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains(['"', ',', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Coarse time-of-day bucket recorded with each attendance row.
pub fn period(t: NaiveTime) -> &'static str {
    let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
    if t >= at(5, 0) && t < at(11, 0) {
        "morning"
    } else if t >= at(11, 0) && t < at(13, 30) {
        "noon"
    } else if t >= at(13, 30) && t < at(17, 0) {
        "afternoon"
    } else {
        "evening"
    }
}
