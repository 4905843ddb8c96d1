//! capwatch: scan pre-fetched registration pages and print capacity alerts.

mod manifest;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use capwatch::{
    render_feed, run_batch, AlertLog, CapacityAlert, EventReport, HistoryStore, MemoryStore,
    Reconciler, SqliteStore, WatchConfig,
};

#[derive(Parser)]
#[command(
    name = "capwatch",
    about = "Capacity extraction and change detection for tournament-registration pages",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, reconcile and print the alert feed for every manifest entry.
    Scan {
        /// JSON array of {id, title, url, html_path}.
        manifest: PathBuf,

        /// Print per-event reports as JSON instead of the feed.
        #[arg(long)]
        json: bool,
    },

    /// Print persisted capacity results from the history store.
    Show {
        /// Only this event.
        event_id: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = WatchConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Scan { manifest, json } => scan(&config, &manifest, json),
        Commands::Show { event_id } => show(&config, event_id.as_deref()),
    }
}

fn open_store(config: &WatchConfig) -> Result<Arc<dyn HistoryStore>> {
    let store: Arc<dyn HistoryStore> = match &config.store_path {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .with_context(|| format!("failed to open history store: {}", path.display()))?,
        ),
        None => {
            tracing::info!("no store_path configured, history kept in memory");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

fn scan(config: &WatchConfig, manifest_path: &Path, as_json: bool) -> Result<()> {
    let entries = manifest::load(manifest_path)?;
    let library = config.pattern_library()?;
    let reconciler = Reconciler::new(open_store(config)?, config.thresholds());

    let (pages, unreadable) = manifest::read_pages(entries, manifest_path);
    for page in &unreadable {
        eprintln!("{}: {:#}", page.event.id, page.error);
    }

    let reports = run_batch(pages, &library, &reconciler, config.workers);
    for report in &reports {
        if let Err(e) = &report.outcome {
            eprintln!("{}: {e}", report.event.id);
        }
    }

    let alerts: Vec<CapacityAlert> = reports.iter().filter_map(|r| r.alert().cloned()).collect();
    if let Some(path) = &config.alert_log_path {
        log_alerts(path, &alerts);
    }

    if as_json {
        let mut out: Vec<serde_json::Value> = reports.iter().map(report_json).collect();
        out.extend(unreadable.iter().map(|p| {
            json!({
                "event_id": p.event.id,
                "status": "error",
                "error": format!("{:#}", p.error),
            })
        }));
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !alerts.is_empty() {
        println!("{}", render_feed(&alerts, config.feed_locale));
    }
    Ok(())
}

fn log_alerts(path: &Path, alerts: &[CapacityAlert]) {
    let written = AlertLog::open(path).and_then(|mut log| {
        for alert in alerts {
            log.append(alert)?;
        }
        Ok(())
    });
    if let Err(e) = written {
        tracing::warn!(path = %path.display(), error = %e, "alert log not written");
        eprintln!("alert log {}: {e}", path.display());
    }
}

fn report_json(report: &EventReport) -> serde_json::Value {
    match &report.outcome {
        Ok(r) => json!({
            "event_id": report.event.id,
            "status": "ok",
            "result": r.updated,
            "alert": r.alert.as_ref().map(|a| a.reason),
        }),
        Err(e) => json!({
            "event_id": report.event.id,
            "status": "error",
            "error": e.to_string(),
            "result": e.result(),
        }),
    }
}

fn show(config: &WatchConfig, event_id: Option<&str>) -> Result<()> {
    let Some(path) = &config.store_path else {
        bail!("no store_path configured; nothing is persisted");
    };
    let store = SqliteStore::open(path)
        .with_context(|| format!("failed to open history store: {}", path.display()))?;

    let ids = match event_id {
        Some(id) => vec![id.to_string()],
        None => store.event_ids()?,
    };

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        match store.get_prior(&id)? {
            Some(result) => out.push(json!({ "event_id": id, "result": result })),
            None if event_id.is_some() => bail!("no history for event {id}"),
            None => {}
        }
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
