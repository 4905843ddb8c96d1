//! Capacity resolver: many candidates in, one authoritative result out.
//!
//! Each field is resolved independently by source precedence
//! (header metadata, then tables, then free text), so `registered` and
//! `limit` may come from different candidates. `remaining` is always
//! recomputed. Disagreements are reported in the note, never raised.

use crate::types::{
    CandidateSource, CapacityCandidate, CapacityResult, WaitlistSignal, WAITLIST_COUNT_UNKNOWN,
};
use chrono::{DateTime, Utc};

/// Resolve candidates into a result stamped with the current time.
pub fn resolve(candidates: &[CapacityCandidate]) -> CapacityResult {
    resolve_at(candidates, Utc::now())
}

/// Resolve candidates into a result stamped with `at`.
pub fn resolve_at(candidates: &[CapacityCandidate], at: DateTime<Utc>) -> CapacityResult {
    let ordered: Vec<&CapacityCandidate> = CandidateSource::PRECEDENCE
        .iter()
        .flat_map(|source| candidates.iter().filter(move |c| c.source == *source))
        .collect();

    let registered = ordered.iter().find_map(|c| c.registered);
    let limit = ordered.iter().find_map(|c| c.limit);
    let header_without_limit = ordered
        .iter()
        .any(|c| c.source == CandidateSource::HeaderMeta && c.limit.is_none());

    let max_count = ordered
        .iter()
        .filter_map(|c| match c.queued {
            Some(WaitlistSignal::Count(n)) => Some(n),
            _ => None,
        })
        .max();
    let mentioned = ordered
        .iter()
        .any(|c| c.queued == Some(WaitlistSignal::Mentioned));
    let queued = match (max_count, mentioned) {
        (Some(n), _) => Some(n),
        (None, true) => Some(0),
        (None, false) => None,
    };

    let mut fragments: Vec<String> = ordered
        .iter()
        .filter(|c| !c.raw_note.is_empty())
        .map(|c| format!("{}: {}", c.source.tag(), c.raw_note))
        .collect();

    if let Some(note) = ambiguity_note(&ordered) {
        tracing::warn!(note = %note, "candidates disagree on limit");
        fragments.push(note);
    }
    if let (Some(r), Some(l)) = (registered, limit) {
        if r > l {
            fragments.push(format!("registered exceeds limit by {}", r - l));
        }
    }
    if max_count.is_none() && mentioned {
        fragments.push(WAITLIST_COUNT_UNKNOWN.to_string());
    }
    if limit.is_none() {
        fragments.push("no limit element found".to_string());
    }

    CapacityResult::new(
        registered,
        limit,
        queued,
        fragments.join("; "),
        limit.is_none() && header_without_limit,
        at,
    )
}

/// `ambiguous limit: 84 (header, text), 80 (table)` when limits disagree.
fn ambiguity_note(ordered: &[&CapacityCandidate]) -> Option<String> {
    let mut limits: Vec<(u32, Vec<&'static str>)> = Vec::new();
    for c in ordered {
        let Some(limit) = c.limit else { continue };
        let tag = c.source.tag();
        match limits.iter_mut().find(|(value, _)| *value == limit) {
            Some((_, tags)) if !tags.contains(&tag) => tags.push(tag),
            Some(_) => {}
            None => limits.push((limit, vec![tag])),
        }
    }

    if limits.len() < 2 {
        return None;
    }
    let listed: Vec<String> = limits
        .iter()
        .map(|(value, tags)| format!("{value} ({})", tags.join(", ")))
        .collect();
    Some(format!("ambiguous limit: {}", listed.join(", ")))
}
