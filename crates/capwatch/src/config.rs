//! Configuration loading and resolution.

use crate::feed::FeedLocale;
use crate::patterns::PatternLibrary;
use crate::reconciler::Thresholds;
use crate::types::{WatchError, WatchResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "CAPWATCH_CONFIG";

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "capwatch.json";

/// Operator-tunable settings. Every key is optional in the JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub near_full_absolute: u32,
    /// Percent of the limit, 0 to 100.
    pub near_full_percentage: f64,
    pub supported_languages: BTreeSet<String>,
    pub feed_locale: FeedLocale,
    pub workers: usize,
    /// SQLite history file. In-memory history when unset.
    pub store_path: Option<PathBuf>,
    /// JSONL alert log. No log when unset.
    pub alert_log_path: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            near_full_absolute: 3,
            near_full_percentage: 10.0,
            supported_languages: ["en", "fi", "sv"].iter().map(|l| l.to_string()).collect(),
            feed_locale: FeedLocale::Fi,
            workers: 4,
            store_path: None,
            alert_log_path: None,
        }
    }
}

impl WatchConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> WatchResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: WatchConfig = serde_json::from_str(&raw)
            .map_err(|e| WatchError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load from the resolved path, or defaults when there is none.
    pub fn load_or_default(explicit: Option<&Path>) -> WatchResult<Self> {
        match resolve_config_path(explicit) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> WatchResult<()> {
        if !(0.0..=100.0).contains(&self.near_full_percentage) {
            return Err(WatchError::Config(format!(
                "near_full_percentage must be within 0..=100, got {}",
                self.near_full_percentage
            )));
        }
        if self.workers == 0 {
            return Err(WatchError::Config("workers must be at least 1".to_string()));
        }
        if self.supported_languages.is_empty() {
            return Err(WatchError::Config(
                "supported_languages must not be empty".to_string(),
            ));
        }
        PatternLibrary::builtin().for_languages(&self.supported_languages)?;
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            near_full_absolute: self.near_full_absolute,
            near_full_percentage: self.near_full_percentage,
        }
    }

    /// The builtin pattern library restricted to the configured languages.
    pub fn pattern_library(&self) -> WatchResult<PatternLibrary> {
        PatternLibrary::builtin().for_languages(&self.supported_languages)
    }
}

/// Resolve the config file path.
///
/// Explicit path, then `CAPWATCH_CONFIG`, then `./capwatch.json`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    resolve_from(
        explicit,
        std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        Path::new("."),
    )
}

fn resolve_from(explicit: Option<&Path>, env: Option<PathBuf>, cwd: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env.filter(|p| !p.as_os_str().is_empty()) {
        return Some(path);
    }
    let local = cwd.join(DEFAULT_CONFIG_FILE);
    local.exists().then_some(local)
}
