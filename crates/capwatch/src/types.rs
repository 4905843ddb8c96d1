//! Core data types for capacity extraction and change detection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Note fragment that marks a waitlist mentioned without a player count.
pub const WAITLIST_COUNT_UNKNOWN: &str = "waitlist mentioned, count unknown";

/// Extraction path that produced a candidate.
///
/// Declaration order is resolver precedence: header metadata is the most
/// template-stable signal, free text the least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    HeaderMeta,
    Table,
    TextPhrase,
}

impl CandidateSource {
    /// All sources, highest precedence first.
    pub const PRECEDENCE: [CandidateSource; 3] = [
        CandidateSource::HeaderMeta,
        CandidateSource::Table,
        CandidateSource::TextPhrase,
    ];

    /// Short tag used to prefix note fragments.
    pub fn tag(self) -> &'static str {
        match self {
            CandidateSource::HeaderMeta => "header",
            CandidateSource::Table => "table",
            CandidateSource::TextPhrase => "text",
        }
    }
}

/// Waitlist indicator found on one extraction path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistSignal {
    /// A number was adjacent to the waitlist phrase, or a waitlist table had rows.
    Count(u32),
    /// The waitlist was mentioned but no count could be read.
    Mentioned,
}

/// One extraction attempt's output. Produced and consumed within one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityCandidate {
    pub registered: Option<u32>,
    pub limit: Option<u32>,
    pub queued: Option<WaitlistSignal>,
    pub source: CandidateSource,
    pub raw_note: String,
}

impl CapacityCandidate {
    /// Create an empty candidate for the given source.
    pub fn new(source: CandidateSource, raw_note: impl Into<String>) -> Self {
        Self {
            registered: None,
            limit: None,
            queued: None,
            source,
            raw_note: raw_note.into(),
        }
    }

    pub fn with_registered(mut self, registered: Option<u32>) -> Self {
        self.registered = registered;
        self
    }

    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_queued(mut self, queued: Option<WaitlistSignal>) -> Self {
        self.queued = queued;
        self
    }
}

/// Authoritative capacity record for one event at one point in time.
///
/// Build it with [`CapacityResult::new`], which derives `remaining` and keeps
/// `header_empty` consistent with `limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredResult")]
pub struct CapacityResult {
    pub registered: Option<u32>,
    pub limit: Option<u32>,
    /// `limit - registered` when both are known. Negative means overflow.
    pub remaining: Option<i64>,
    pub queued: Option<u32>,
    /// Human-readable diagnostics, in a fixed fragment order.
    pub note: String,
    /// The header metadata block exists but shows no numeric limit.
    pub header_empty: bool,
    pub extracted_at: DateTime<Utc>,
}

/// Persisted form of a result. Derived fields are recomputed on load.
#[derive(Deserialize)]
struct StoredResult {
    registered: Option<u32>,
    limit: Option<u32>,
    queued: Option<u32>,
    #[serde(default)]
    note: String,
    #[serde(default)]
    header_empty: bool,
    extracted_at: DateTime<Utc>,
}

impl From<StoredResult> for CapacityResult {
    fn from(s: StoredResult) -> Self {
        CapacityResult::new(s.registered, s.limit, s.queued, s.note, s.header_empty, s.extracted_at)
    }
}

impl CapacityResult {
    pub fn new(
        registered: Option<u32>,
        limit: Option<u32>,
        queued: Option<u32>,
        note: impl Into<String>,
        header_empty: bool,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        let remaining = match (registered, limit) {
            (Some(r), Some(l)) => Some(i64::from(l) - i64::from(r)),
            _ => None,
        };
        Self {
            registered,
            limit,
            remaining,
            queued,
            note: note.into(),
            header_empty: header_empty && limit.is_none(),
            extracted_at,
        }
    }

    /// Both registered count and limit are known.
    pub fn has_numbers(&self) -> bool {
        self.registered.is_some() && self.limit.is_some()
    }

    /// Neither registered count nor limit is known.
    pub fn has_no_numbers(&self) -> bool {
        self.registered.is_none() && self.limit.is_none()
    }

    /// More players registered than the limit allows.
    pub fn is_over(&self) -> bool {
        matches!(self.remaining, Some(r) if r < 0)
    }

    /// Three-way waitlist view recovered from `queued` and the note marker.
    pub fn waitlist(&self) -> Waitlist {
        match self.queued {
            None => Waitlist::NotMentioned,
            Some(0) if self.note.contains(WAITLIST_COUNT_UNKNOWN) => Waitlist::CountUnknown,
            Some(n) => Waitlist::Count(n),
        }
    }

    /// Same registered, limit and queued numbers, ignoring note and timestamp.
    pub fn same_numbers(&self, other: &CapacityResult) -> bool {
        self.registered == other.registered
            && self.limit == other.limit
            && self.queued == other.queued
    }
}

/// Waitlist state of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waitlist {
    NotMentioned,
    CountUnknown,
    Count(u32),
}

impl Waitlist {
    /// Players are (or may be) queued.
    pub fn is_active(self) -> bool {
        matches!(self, Waitlist::CountUnknown) || matches!(self, Waitlist::Count(n) if n > 0)
    }
}

/// Identity and display data of a monitored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub id: String,
    pub title: String,
    pub url: String,
}

impl EventRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Why an alert was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertReason {
    NewlyOverCapacity,
    StillNearFull,
    WaitlistStarted,
    LimitAppeared,
    LimitDisappeared,
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertReason::NewlyOverCapacity => "NEWLY_OVER_CAPACITY",
            AlertReason::StillNearFull => "STILL_NEAR_FULL",
            AlertReason::WaitlistStarted => "WAITLIST_STARTED",
            AlertReason::LimitAppeared => "LIMIT_APPEARED",
            AlertReason::LimitDisappeared => "LIMIT_DISAPPEARED",
        };
        f.write_str(s)
    }
}

/// An alert-worthy state transition for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityAlert {
    pub event_id: String,
    pub title: String,
    pub url: String,
    pub result: CapacityResult,
    pub reason: AlertReason,
}

impl CapacityAlert {
    pub fn new(event: &EventRef, result: CapacityResult, reason: AlertReason) -> Self {
        Self {
            event_id: event.id.clone(),
            title: event.title.clone(),
            url: event.url.clone(),
            result,
            reason,
        }
    }
}

/// Errors that can occur in the capacity engine.
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    #[error("Parse failure for {url}: {reason}")]
    ParseFailure { url: String, reason: String },

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for WatchError {
    fn from(err: rusqlite::Error) -> Self {
        WatchError::PersistenceUnavailable(err.to_string())
    }
}

/// Convenience result type.
pub type WatchResult<T> = Result<T, WatchError>;
