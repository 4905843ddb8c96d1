//! capwatch: capacity extraction and change detection for tournament-registration pages.

pub mod alert_log;
pub mod batch;
pub mod config;
pub mod feed;
pub mod normalizer;
pub mod patterns;
pub mod reconciler;
pub mod resolver;
pub mod store;
pub mod types;

pub use alert_log::AlertLog;
pub use batch::{process_page, run_batch, EventFailure, EventReport, FetchedPage};
pub use config::{resolve_config_path, WatchConfig};
pub use feed::{render_alert, render_feed, FeedLocale};
pub use normalizer::extract;
pub use patterns::{PatternLibrary, PhraseKind};
pub use reconciler::{
    classify, reconcile, CapacityState, ReconcileError, Reconciler, Reconciliation, Thresholds,
};
pub use resolver::{resolve, resolve_at};
pub use store::{HistoryStore, MemoryStore, SqliteStore};
pub use types::*;
