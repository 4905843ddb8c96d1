//! Scan manifest: which events to check and where their page snapshots live.

use anyhow::{Context, Result};
use capwatch::{EventRef, FetchedPage};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// One manifest row. `html_path` is relative to the manifest file.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub title: String,
    pub url: String,
    pub html_path: PathBuf,
}

impl ManifestEntry {
    pub fn event(&self) -> EventRef {
        EventRef::new(&self.id, &self.title, &self.url)
    }
}

/// A manifest row whose snapshot could not be read.
#[derive(Debug)]
pub struct UnreadablePage {
    pub event: EventRef,
    pub error: anyhow::Error,
}

/// Parse the manifest file.
pub fn load(path: &Path) -> Result<Vec<ManifestEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid manifest: {}", path.display()))
}

/// Read every snapshot. Unreadable snapshots are returned separately so the
/// rest of the batch still runs.
pub fn read_pages(
    entries: Vec<ManifestEntry>,
    manifest_path: &Path,
) -> (Vec<FetchedPage>, Vec<UnreadablePage>) {
    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let mut pages = Vec::with_capacity(entries.len());
    let mut unreadable = Vec::new();

    for entry in entries {
        let path = base.join(&entry.html_path);
        match std::fs::read_to_string(&path) {
            Ok(html) => pages.push(FetchedPage {
                event: entry.event(),
                html,
            }),
            Err(e) => unreadable.push(UnreadablePage {
                event: entry.event(),
                error: anyhow::Error::new(e)
                    .context(format!("failed to read snapshot: {}", path.display())),
            }),
        }
    }
    (pages, unreadable)
}
