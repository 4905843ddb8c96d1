//! Command-line tests: run the `capwatch` binary against snapshots in a
//! temp dir and check stdout, stderr and the exit status.

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

// ─────────────────────── helpers ───────────────────────

fn capwatch(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_capwatch"))
        .args(args)
        .current_dir(dir)
        .env_remove("CAPWATCH_CONFIG")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn write_config(dir: &Path, with_store: bool) -> String {
    let path = dir.join("config.json");
    let body = if with_store {
        format!(
            r#"{{ "feed_locale": "en", "store_path": {} }}"#,
            serde_json::to_string(&dir.join("history.db")).unwrap()
        )
    } else {
        r#"{ "feed_locale": "en" }"#.to_string()
    };
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

/// One readable over-capacity page and one entry whose snapshot is missing.
fn write_manifest(dir: &Path) -> String {
    std::fs::write(
        dir.join("alpha.html"),
        r#"<html><body><ul class="main-header-meta"><li>76 / 72</li></ul></body></html>"#,
    )
    .unwrap();
    let path = dir.join("manifest.json");
    std::fs::write(
        &path,
        r#"[
            { "id": "alpha", "title": "Alpha Cup", "url": "https://example.org/a", "html_path": "alpha.html" },
            { "id": "ghost", "title": "Ghost Open", "url": "https://example.org/g", "html_path": "ghost.html" }
        ]"#,
    )
    .unwrap();
    path.to_string_lossy().into_owned()
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// ─────────────────────── scan ───────────────────────

#[test]
fn test_scan_prints_feed_and_reports_unreadable_page() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), false);
    let manifest = write_manifest(dir.path());

    let out = capwatch(dir.path(), &["--config", &config, "scan", &manifest]);
    assert!(out.status.success(), "stderr: {}", text(&out.stderr));

    let stdout = text(&out.stdout);
    assert!(stdout.contains("[Alpha Cup](https://example.org/a)"), "{stdout}");
    assert!(stdout.contains("76/72 (over by 4)"), "{stdout}");
    assert!(!stdout.contains("Ghost Open"));

    let stderr = text(&out.stderr);
    assert!(stderr.contains("ghost:"), "{stderr}");
    assert!(stderr.contains("ghost.html"), "{stderr}");
}

#[test]
fn test_scan_json_lists_every_event() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), false);
    let manifest = write_manifest(dir.path());

    let out = capwatch(dir.path(), &["--config", &config, "scan", &manifest, "--json"]);
    assert!(out.status.success(), "stderr: {}", text(&out.stderr));

    let reports: Vec<serde_json::Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["event_id"], "alpha");
    assert_eq!(reports[0]["status"], "ok");
    assert_eq!(reports[0]["result"]["remaining"], -4);
    assert_eq!(reports[1]["event_id"], "ghost");
    assert_eq!(reports[1]["status"], "error");
}

#[test]
fn test_scan_missing_manifest_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), false);

    let out = capwatch(dir.path(), &["--config", &config, "scan", "nope.json"]);
    assert!(!out.status.success());
    assert!(text(&out.stderr).contains("nope.json"));
}

#[test]
fn test_scan_unreadable_config_fails() {
    let dir = TempDir::new().unwrap();
    let manifest = write_manifest(dir.path());

    let out = capwatch(dir.path(), &["--config", "missing.json", "scan", &manifest]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
}

// ─────────────────────── show ───────────────────────

#[test]
fn test_show_reads_history_written_by_scan() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), true);
    let manifest = write_manifest(dir.path());

    let scan = capwatch(dir.path(), &["--config", &config, "scan", &manifest]);
    assert!(scan.status.success(), "stderr: {}", text(&scan.stderr));

    let out = capwatch(dir.path(), &["--config", &config, "show"]);
    assert!(out.status.success(), "stderr: {}", text(&out.stderr));
    let rows: Vec<serde_json::Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["event_id"], "alpha");
    assert_eq!(rows[0]["result"]["registered"], 76);

    let unknown = capwatch(dir.path(), &["--config", &config, "show", "ghost"]);
    assert!(!unknown.status.success());
    assert!(text(&unknown.stderr).contains("ghost"));
}

#[test]
fn test_second_scan_with_store_prints_nothing() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), true);
    let manifest = write_manifest(dir.path());

    capwatch(dir.path(), &["--config", &config, "scan", &manifest]);
    let again = capwatch(dir.path(), &["--config", &config, "scan", &manifest]);
    assert!(again.status.success());
    assert!(text(&again.stdout).trim().is_empty());
}

#[test]
fn test_show_without_store_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), false);

    let out = capwatch(dir.path(), &["--config", &config, "show"]);
    assert!(!out.status.success());
    assert!(text(&out.stderr).contains("store_path"));
}
