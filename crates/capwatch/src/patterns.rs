//! Phrase and selector table for capacity extraction.
//!
//! The table is loaded at compile time from `patterns.json` via
//! `include_str!`, so there is no runtime file I/O. Each phrase row names a
//! language, a kind (limit, registered, waitlist), a label used in notes and
//! a regex fragment. Fragments are compiled case-insensitively and anchored on
//! word boundaries. Supporting a new language or template means appending
//! rows to the JSON; the normalizer never branches on language.

use crate::types::{WatchError, WatchResult};
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::LazyLock;

const PATTERNS_JSON: &str = include_str!("patterns.json");

static BUILTIN: LazyLock<PatternLibrary> = LazyLock::new(|| {
    PatternLibrary::from_json(PATTERNS_JSON).expect("embedded pattern table is valid")
});

/// What a phrase signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseKind {
    Limit,
    Registered,
    Waitlist,
}

#[derive(Debug, Deserialize)]
struct PatternFile {
    selectors: SelectorRows,
    phrases: Vec<PhraseRow>,
}

#[derive(Debug, Deserialize)]
struct SelectorRows {
    header_meta: Vec<String>,
    registration_tables: Vec<String>,
    #[serde(default)]
    waitlist_tables: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PhraseRow {
    lang: String,
    kind: PhraseKind,
    label: String,
    pattern: String,
}

/// A compiled phrase row.
#[derive(Debug, Clone)]
pub struct PhrasePattern {
    pub lang: String,
    pub kind: PhraseKind,
    pub label: String,
    pub regex: Regex,
}

/// Compiled phrase patterns and structural selectors.
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    phrases: Vec<PhrasePattern>,
    header_meta: Vec<Selector>,
    registration_tables: Vec<Selector>,
    waitlist_tables: Vec<Selector>,
}

impl PatternLibrary {
    /// The embedded table with every language enabled.
    pub fn builtin() -> &'static PatternLibrary {
        &BUILTIN
    }

    /// Compile a pattern table from its JSON form.
    ///
    /// An invalid phrase regex is an error. An invalid selector is skipped
    /// with a warning so one bad row does not disable a whole path.
    pub fn from_json(json: &str) -> WatchResult<Self> {
        let file: PatternFile = serde_json::from_str(json)?;

        let phrases = file
            .phrases
            .into_iter()
            .map(|row| {
                let regex = Regex::new(&format!(r"(?i)\b(?:{})\b", row.pattern)).map_err(|e| {
                    WatchError::Config(format!("phrase '{}' ({}): {e}", row.label, row.lang))
                })?;
                Ok(PhrasePattern {
                    lang: row.lang,
                    kind: row.kind,
                    label: row.label,
                    regex,
                })
            })
            .collect::<WatchResult<Vec<_>>>()?;

        Ok(Self {
            phrases,
            header_meta: compile_selectors(&file.selectors.header_meta),
            registration_tables: compile_selectors(&file.selectors.registration_tables),
            waitlist_tables: compile_selectors(&file.selectors.waitlist_tables),
        })
    }

    /// A copy of this library restricted to the given language codes.
    pub fn for_languages(&self, languages: &BTreeSet<String>) -> WatchResult<Self> {
        let known = self.languages();
        if let Some(unknown) = languages.iter().find(|l| !known.contains(*l)) {
            return Err(WatchError::Config(format!(
                "unsupported language '{unknown}' (known: {})",
                known.iter().cloned().collect::<Vec<_>>().join(", ")
            )));
        }

        Ok(Self {
            phrases: self
                .phrases
                .iter()
                .filter(|p| languages.contains(&p.lang))
                .cloned()
                .collect(),
            header_meta: self.header_meta.clone(),
            registration_tables: self.registration_tables.clone(),
            waitlist_tables: self.waitlist_tables.clone(),
        })
    }

    /// Language codes that have at least one phrase row.
    pub fn languages(&self) -> BTreeSet<String> {
        self.phrases.iter().map(|p| p.lang.clone()).collect()
    }

    pub fn phrases(&self, kind: PhraseKind) -> impl Iterator<Item = &PhrasePattern> {
        self.phrases.iter().filter(move |p| p.kind == kind)
    }

    pub fn limit_phrases(&self) -> impl Iterator<Item = &PhrasePattern> {
        self.phrases(PhraseKind::Limit)
    }

    pub fn registered_phrases(&self) -> impl Iterator<Item = &PhrasePattern> {
        self.phrases(PhraseKind::Registered)
    }

    pub fn waitlist_phrases(&self) -> impl Iterator<Item = &PhrasePattern> {
        self.phrases(PhraseKind::Waitlist)
    }

    /// Selectors for the header metadata list.
    pub fn header_meta_selectors(&self) -> &[Selector] {
        &self.header_meta
    }

    /// Selectors for registration and result tables.
    pub fn registration_table_selectors(&self) -> &[Selector] {
        &self.registration_tables
    }

    /// Selectors for tables that list queued players.
    pub fn waitlist_table_selectors(&self) -> &[Selector] {
        &self.waitlist_tables
    }

    /// First phrase of `kind` found in `text`, with its label.
    pub fn first_match<'a>(&'a self, kind: PhraseKind, text: &str) -> Option<&'a str> {
        self.phrases(kind)
            .find(|p| p.regex.is_match(text))
            .map(|p| p.label.as_str())
    }
}

fn compile_selectors(rows: &[String]) -> Vec<Selector> {
    rows.iter()
        .filter_map(|row| match Selector::parse(row) {
            Ok(sel) => Some(sel),
            Err(e) => {
                tracing::warn!(selector = %row, error = ?e, "skipping invalid selector row");
                None
            }
        })
        .collect()
}
