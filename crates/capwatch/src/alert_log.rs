//! JSONL alert log: one line per emitted alert, append-only.
//!
//! When the file grows past the size limit it is rotated to `.1`, `.2`, and
//! so on, keeping at most `max_rotations` old files.

use crate::types::{CapacityAlert, WatchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default size before rotation (10 MB).
pub const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of rotated files kept.
pub const MAX_ROTATIONS: u32 = 5;

/// One line of the alert log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLogEntry {
    pub logged_at: DateTime<Utc>,
    #[serde(flatten)]
    pub alert: CapacityAlert,
}

/// Append-only alert log with rotation.
pub struct AlertLog {
    file: File,
    path: PathBuf,
    current_size: u64,
    max_size: u64,
    max_rotations: u32,
}

impl AlertLog {
    /// Open or create the log with the default limits.
    pub fn open(path: &Path) -> WatchResult<Self> {
        Self::with_limits(path, MAX_LOG_SIZE, MAX_ROTATIONS)
    }

    pub fn with_limits(path: &Path, max_size: u64, max_rotations: u32) -> WatchResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            current_size,
            max_size,
            max_rotations,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one alert as a JSON line.
    pub fn append(&mut self, alert: &CapacityAlert) -> WatchResult<()> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        let entry = AlertLogEntry {
            logged_at: Utc::now(),
            alert: alert.clone(),
        };
        let json = serde_json::to_string(&entry)?;
        writeln!(self.file, "{json}")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// Current log becomes `.1`, `.1` becomes `.2`, the oldest is dropped.
    fn rotate(&mut self) -> WatchResult<()> {
        self.file.flush()?;

        if self.max_rotations > 0 {
            let oldest = rotation_path(&self.path, self.max_rotations);
            if oldest.exists() {
                std::fs::remove_file(&oldest)?;
            }
            for i in (1..self.max_rotations).rev() {
                let from = rotation_path(&self.path, i);
                if from.exists() {
                    std::fs::rename(&from, rotation_path(&self.path, i + 1))?;
                }
            }
            std::fs::rename(&self.path, rotation_path(&self.path, 1))?;
        } else {
            std::fs::remove_file(&self.path)?;
        }

        self.file = open_append(&self.path)?;
        self.current_size = 0;
        tracing::debug!(path = %self.path.display(), "rotated alert log");
        Ok(())
    }
}

fn open_append(path: &Path) -> WatchResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// `alerts.jsonl.1`, `alerts.jsonl.2`, ...
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("alerts.jsonl")
    );
    base.with_file_name(name)
}
