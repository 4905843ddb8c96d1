//! Batch runner: extract, resolve and reconcile many pages on a bounded
//! thread pool.

use crate::normalizer;
use crate::patterns::PatternLibrary;
use crate::reconciler::{ReconcileError, Reconciler, Reconciliation};
use crate::resolver;
use crate::store::HistoryStore;
use crate::types::{CapacityAlert, CapacityResult, EventRef, WatchError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A pre-fetched page for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    pub event: EventRef,
    pub html: String,
}

/// Why one event could not be reconciled.
#[derive(thiserror::Error, Debug)]
pub enum EventFailure {
    #[error(transparent)]
    Extraction(WatchError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl EventFailure {
    /// The in-memory result, when extraction got that far.
    pub fn result(&self) -> Option<&CapacityResult> {
        match self {
            EventFailure::Extraction(_) => None,
            EventFailure::Reconcile(e) => Some(&e.result),
        }
    }
}

/// Outcome for one event of a batch.
#[derive(Debug)]
pub struct EventReport {
    pub event: EventRef,
    pub outcome: Result<Reconciliation, EventFailure>,
}

impl EventReport {
    pub fn alert(&self) -> Option<&CapacityAlert> {
        self.outcome.as_ref().ok().and_then(|r| r.alert.as_ref())
    }

    /// The freshest result known for the event, persisted or not.
    pub fn result(&self) -> Option<&CapacityResult> {
        match &self.outcome {
            Ok(r) => Some(&r.updated),
            Err(e) => e.result(),
        }
    }
}

/// Process one page end to end.
pub fn process_page<S: HistoryStore>(
    page: &FetchedPage,
    library: &PatternLibrary,
    reconciler: &Reconciler<S>,
) -> Result<Reconciliation, EventFailure> {
    let candidates = normalizer::extract(&page.html, &page.event.url, library)
        .map_err(EventFailure::Extraction)?;
    let result = resolver::resolve(&candidates);
    Ok(reconciler.reconcile(&page.event, result)?)
}

/// Run every page through the pipeline on `workers` threads.
///
/// Reports come back in input order. A failing event never stops the others.
pub fn run_batch<S: HistoryStore>(
    pages: Vec<FetchedPage>,
    library: &PatternLibrary,
    reconciler: &Reconciler<S>,
    workers: usize,
) -> Vec<EventReport> {
    let run = |page: FetchedPage| {
        let outcome = process_page(&page, library, reconciler);
        if let Err(e) = &outcome {
            tracing::warn!(event_id = %page.event.id, url = %page.event.url, error = %e, "event failed");
        }
        EventReport {
            event: page.event,
            outcome,
        }
    };

    let total = pages.len();
    let reports = match rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
    {
        Ok(pool) => pool.install(|| pages.into_par_iter().map(run).collect::<Vec<_>>()),
        Err(e) => {
            tracing::warn!(error = %e, "thread pool unavailable, running sequentially");
            pages.into_iter().map(run).collect()
        }
    };

    tracing::info!(
        events = total,
        alerts = reports.iter().filter(|r| r.alert().is_some()).count(),
        failed = reports.iter().filter(|r| r.outcome.is_err()).count(),
        "batch finished"
    );
    reports
}
