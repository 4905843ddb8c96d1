//! HTML normalizer: raw registration-page markup to capacity candidates.
//!
//! Four independent passes run over one parsed document:
//!
//! 1. **Header metadata**: the compact fact list at the top of the event
//!    page. A `"51 / 84"` pair or a limit phrase with a number yields numbers;
//!    a block with no limit still yields a candidate so the resolver can
//!    report `header_empty`.
//! 2. **Tables**: registration/result tables. Capacity phrases in header
//!    cells yield a limit; data rows stand in for the registered count only
//!    when no explicit registered number exists anywhere else. Tables headed
//!    by a waitlist phrase count queued players instead.
//! 3. **Free-text phrases**: visible text outside the structural blocks is
//!    scanned for limit and registered phrases with an adjacent number.
//! 4. **Waitlist**: the full visible text is scanned for waitlist phrases,
//!    regardless of what the other passes found.
//!
//! Every candidate is returned; precedence is decided by the resolver. All
//! entry points are synchronous because `scraper` types are `!Send`.

use crate::patterns::{PatternLibrary, PhraseKind};
use crate::types::{CandidateSource, CapacityCandidate, WaitlistSignal, WatchError, WatchResult};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

/// Elements whose text is never visible.
const HIDDEN_TAGS: &[&str] = &["head", "script", "style", "noscript", "template"];

/// How far (in characters) to look around a phrase for its number.
const WINDOW_CHARS: usize = 32;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[A-Za-z!/?][^<>]*>").expect("tag regex is valid"));

/// `registered / limit`, not part of a date such as `18/05/2026`.
static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d/.])(\d{1,5})\s*/\s*(\d{1,5})(?:$|[^\d/.])").expect("pair regex is valid")
});

static TRAILING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s:=\-–(]*(\d{1,5})(?:\s*/\s*(\d{1,5}))?").expect("trailing regex is valid")
});

static LEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,5})(?:\s*/\s*(\d{1,5}))?[\s:=\-–)]*$").expect("leading regex is valid")
});

/// Separators allowed between a phrase and the number it owns.
static SEPARATOR_TAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s:=\-–]*$").expect("separator regex is valid"));

static ITEM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li, dt, dd").expect("item selector is valid"));
static HEADER_CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("caption, th, thead td").expect("header cell selector is valid"));
static CAPTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("caption").expect("caption selector is valid"));
static ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("row selector is valid"));
static TD_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("td selector is valid"));
static TH_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th").expect("th selector is valid"));

/// Extract every capacity candidate from a registration page.
///
/// `url` is used for diagnostics only. Fails with
/// [`WatchError::ParseFailure`] only when the input is not markup at all;
/// missing structural elements simply yield no candidates.
pub fn extract(
    html: &str,
    url: &str,
    library: &PatternLibrary,
) -> WatchResult<Vec<CapacityCandidate>> {
    check_markup(html, url)?;

    let document = Html::parse_document(html);
    let root = document.root_element();

    let mut structural = Vec::new();
    let header = extract_header(&document, library, &mut structural);
    let tables = collect_tables(&document, library, &mut structural);

    let free_text = visible_text_excluding(root, &structural);
    let phrases = extract_phrases(&free_text, library);
    let waitlist = extract_waitlist(&visible_text(root), library);

    let explicit_registered = header
        .iter()
        .chain(&phrases)
        .any(|c| c.registered.is_some());
    let table_candidates: Vec<_> = tables
        .iter()
        .map(|table| table_candidate(table, library, explicit_registered))
        .collect();

    tracing::debug!(
        url,
        header = header.len(),
        tables = table_candidates.len(),
        phrases = phrases.len(),
        waitlist = waitlist.len(),
        "extracted capacity candidates"
    );

    let mut candidates = header;
    candidates.extend(table_candidates);
    candidates.extend(phrases);
    candidates.extend(waitlist);
    Ok(candidates)
}

fn check_markup(html: &str, url: &str) -> WatchResult<()> {
    let reason = if html.trim().is_empty() {
        "empty input"
    } else if html.contains('\0') {
        "input contains NUL bytes"
    } else if !TAG_RE.is_match(html) {
        "no markup tags found"
    } else {
        return Ok(());
    };
    Err(WatchError::ParseFailure {
        url: url.to_string(),
        reason: reason.to_string(),
    })
}

// ── Header metadata ─────────────────────────────────────────────────────────

fn extract_header<'a>(
    document: &'a Html,
    library: &PatternLibrary,
    structural: &mut Vec<ElementRef<'a>>,
) -> Vec<CapacityCandidate> {
    let mut out = Vec::new();
    for sel in library.header_meta_selectors() {
        for block in document.select(sel) {
            if !structural.contains(&block) {
                structural.push(block);
                out.push(header_candidate(block, library));
            }
        }
    }
    out
}

fn header_candidate(block: ElementRef<'_>, library: &PatternLibrary) -> CapacityCandidate {
    let mut items = header_items(block);
    if items.is_empty() {
        items.push(visible_text(block));
    }

    let mut registered = None;
    let mut limit = None;
    let mut notes = Vec::new();

    for item in &items {
        if limit.is_none() {
            if let Some((r, l)) = registered_limit_pair(item) {
                registered = registered.or(Some(r));
                limit = Some(l);
                notes.push(format!("meta pair {r}/{l}"));
                continue;
            }
        }
        for hit in phrase_hits(item, library, PhraseKind::Limit) {
            if let (None, Some(number)) = (limit, hit.number) {
                let (r, l) = number.split_limit();
                registered = registered.or(r);
                limit = Some(l);
                notes.push(format!("meta phrase '{}' -> limit {l}", hit.label));
            }
        }
        for hit in phrase_hits(item, library, PhraseKind::Registered) {
            if let (None, Some(number)) = (registered, hit.number) {
                let (r, l) = number.split_registered();
                registered = Some(r);
                limit = limit.or(l);
                notes.push(format!("meta phrase '{}' -> registered {r}", hit.label));
            }
        }
    }

    if limit.is_none() {
        notes.push("meta list present, no numeric limit".to_string());
    }

    CapacityCandidate::new(CandidateSource::HeaderMeta, notes.join(", "))
        .with_registered(registered)
        .with_limit(limit)
}

/// One text per fact. A `dt` label is joined with the `dd` value after it.
fn header_items(block: ElementRef<'_>) -> Vec<String> {
    let mut items = Vec::new();
    for el in block.select(&ITEM_SEL) {
        let text = match el.value().name() {
            "dt" => {
                let value = next_element(el)
                    .filter(|dd| dd.value().name() == "dd")
                    .map(visible_text)
                    .unwrap_or_default();
                format!("{} {value}", visible_text(el)).trim().to_string()
            }
            "dd" if previous_element(el).is_some_and(|dt| dt.value().name() == "dt") => continue,
            _ => visible_text(el),
        };
        if !text.is_empty() {
            items.push(text);
        }
    }
    items
}

fn next_element(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

fn previous_element(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.prev_siblings().find_map(ElementRef::wrap)
}

fn registered_limit_pair(text: &str) -> Option<(u32, u32)> {
    let caps = PAIR_RE.captures(text)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

// ── Tables ──────────────────────────────────────────────────────────────────

enum TableKind {
    Registration,
    Waitlist,
}

struct FoundTable<'a> {
    element: ElementRef<'a>,
    kind: TableKind,
}

fn collect_tables<'a>(
    document: &'a Html,
    library: &PatternLibrary,
    structural: &mut Vec<ElementRef<'a>>,
) -> Vec<FoundTable<'a>> {
    let mut out = Vec::new();
    for sel in library.waitlist_table_selectors() {
        for element in document.select(sel) {
            if !structural.contains(&element) {
                structural.push(element);
                out.push(FoundTable {
                    element,
                    kind: TableKind::Waitlist,
                });
            }
        }
    }
    for sel in library.registration_table_selectors() {
        for element in document.select(sel) {
            if !structural.contains(&element) {
                structural.push(element);
                let kind = if headed_by_waitlist_phrase(element, library) {
                    TableKind::Waitlist
                } else {
                    TableKind::Registration
                };
                out.push(FoundTable { element, kind });
            }
        }
    }
    out
}

/// The table's caption or the heading right before it names a waitlist.
fn headed_by_waitlist_phrase(table: ElementRef<'_>, library: &PatternLibrary) -> bool {
    let caption = table.select(&CAPTION_SEL).next().map(visible_text);
    let heading = previous_element(table)
        .filter(|el| matches!(el.value().name(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6"))
        .map(visible_text);

    caption
        .into_iter()
        .chain(heading)
        .any(|text| library.first_match(PhraseKind::Waitlist, &text).is_some())
}

fn table_candidate(
    table: &FoundTable<'_>,
    library: &PatternLibrary,
    explicit_registered: bool,
) -> CapacityCandidate {
    let rows = count_data_rows(table.element);

    if let TableKind::Waitlist = table.kind {
        let queued = (rows > 0).then_some(WaitlistSignal::Count(rows));
        return CapacityCandidate::new(CandidateSource::Table, format!("waitlist table, {rows} rows"))
            .with_queued(queued);
    }

    let mut notes = Vec::new();
    let mut limit = None;
    let mut cell_registered = None;
    for cell in table.element.select(&HEADER_CELL_SEL) {
        let text = visible_text(cell);
        let hit = phrase_hits(&text, library, PhraseKind::Limit)
            .into_iter()
            .find_map(|h| h.number.map(|n| (h.label, n)));
        if let Some((label, number)) = hit {
            let (r, l) = number.split_limit();
            cell_registered = r;
            limit = Some(l);
            notes.push(format!("header cell '{label}' -> limit {l}"));
            break;
        }
    }

    let registered = if cell_registered.is_some() {
        cell_registered
    } else if explicit_registered {
        notes.push(format!("{rows} rows ignored, explicit registered count present"));
        None
    } else if rows > 0 {
        notes.push(format!("{rows} data rows"));
        Some(rows)
    } else {
        notes.push("no data rows".to_string());
        None
    };

    CapacityCandidate::new(CandidateSource::Table, notes.join(", "))
        .with_registered(registered)
        .with_limit(limit)
}

/// Rows of this table (not nested ones) with `td` cells and no `th`.
/// A lone spanning cell ("no registrations yet") is not a player row.
fn count_data_rows(table: ElementRef<'_>) -> u32 {
    let count = table
        .select(&ROW_SEL)
        .filter(|tr| {
            tr.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "table")
                == Some(table)
        })
        .filter(|tr| tr.select(&TH_SEL).next().is_none())
        .filter(|tr| {
            let cells: Vec<_> = tr.select(&TD_SEL).collect();
            match cells.as_slice() {
                [] => false,
                [only] => only.value().attr("colspan").is_none(),
                _ => true,
            }
        })
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

// ── Free text ───────────────────────────────────────────────────────────────

fn extract_phrases(text: &str, library: &PatternLibrary) -> Vec<CapacityCandidate> {
    let mut hits: Vec<(PhraseKind, PhraseHit<'_>)> = phrase_hits(text, library, PhraseKind::Limit)
        .into_iter()
        .map(|h| (PhraseKind::Limit, h))
        .chain(
            phrase_hits(text, library, PhraseKind::Registered)
                .into_iter()
                .map(|h| (PhraseKind::Registered, h)),
        )
        .collect();
    hits.sort_by_key(|(_, h)| h.start);

    hits.into_iter()
        .map(|(kind, hit)| {
            let (note, registered, limit) = match (kind, hit.number) {
                (_, None) => (format!("phrase '{}' without a number", hit.label), None, None),
                (PhraseKind::Registered, Some(number)) => {
                    let (r, l) = number.split_registered();
                    (format!("phrase '{}' -> registered {r}", hit.label), Some(r), l)
                }
                (_, Some(number)) => {
                    let (r, l) = number.split_limit();
                    (format!("phrase '{}' -> limit {l}", hit.label), r, Some(l))
                }
            };
            CapacityCandidate::new(CandidateSource::TextPhrase, note)
                .with_registered(registered)
                .with_limit(limit)
        })
        .collect()
}

fn extract_waitlist(text: &str, library: &PatternLibrary) -> Vec<CapacityCandidate> {
    phrase_hits(text, library, PhraseKind::Waitlist)
        .into_iter()
        .map(|hit| {
            let (signal, note) = match hit.number {
                Some(n) => (
                    WaitlistSignal::Count(n.first),
                    format!("phrase '{}' -> {} queued", hit.label, n.first),
                ),
                None => (
                    WaitlistSignal::Mentioned,
                    format!("phrase '{}' without a count", hit.label),
                ),
            };
            CapacityCandidate::new(CandidateSource::TextPhrase, note).with_queued(Some(signal))
        })
        .collect()
}

// ── Phrase + number matching ────────────────────────────────────────────────

/// One number, or an adjacent `first/second` pair, found next to a phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Number {
    first: u32,
    second: Option<u32>,
}

impl Number {
    /// Read next to a limit phrase: `84` is the limit, `51/84` is registered/limit.
    fn split_limit(self) -> (Option<u32>, u32) {
        match self.second {
            Some(limit) => (Some(self.first), limit),
            None => (None, self.first),
        }
    }

    /// Read next to a registered phrase: `51` is registered, `51/84` adds the limit.
    fn split_registered(self) -> (u32, Option<u32>) {
        (self.first, self.second)
    }
}

#[derive(Debug)]
struct PhraseHit<'a> {
    start: usize,
    label: &'a str,
    number: Option<Number>,
}

/// Every match of a `kind` phrase in `text`, in document order, with the
/// number that trails it (preferred) or leads it.
fn phrase_hits<'a>(text: &str, library: &'a PatternLibrary, kind: PhraseKind) -> Vec<PhraseHit<'a>> {
    let mut hits: Vec<PhraseHit<'a>> = Vec::new();
    for phrase in library.phrases(kind) {
        for m in phrase.regex.find_iter(text) {
            if hits.iter().any(|h| h.start == m.start()) {
                continue;
            }
            let number = number_after(text, m.end())
                .or_else(|| number_before(text, m.start(), library, kind));
            hits.push(PhraseHit {
                start: m.start(),
                label: &phrase.label,
                number,
            });
        }
    }
    hits.sort_by_key(|h| h.start);
    hits
}

fn number_after(text: &str, end: usize) -> Option<Number> {
    let window: String = text[end..].chars().take(WINDOW_CHARS).collect();
    let caps = TRAILING_RE.captures(&window)?;
    Some(Number {
        first: caps[1].parse().ok()?,
        second: caps.get(2).and_then(|m| m.as_str().parse().ok()),
    })
}

/// A number right before the phrase, unless a preceding phrase of another
/// kind owns it ("Registered: 51 Max players", "Max players: 84 Waitlist").
fn number_before(text: &str, start: usize, library: &PatternLibrary, kind: PhraseKind) -> Option<Number> {
    let prefix = &text[..start];
    let window = tail_chars(prefix, WINDOW_CHARS);
    let caps = LEADING_RE.captures(window)?;
    let whole = caps.get(0)?;

    let before = prefix[..prefix.len() - window.len() + whole.start()].trim_end();
    let before = tail_chars(before, WINDOW_CHARS * 2);
    let owned_by_other = [PhraseKind::Limit, PhraseKind::Registered, PhraseKind::Waitlist]
        .into_iter()
        .filter(|k| *k != kind)
        .flat_map(|k| library.phrases(k))
        .any(|p| {
            p.regex
                .find_iter(before)
                .any(|m| SEPARATOR_TAIL_RE.is_match(&before[m.end()..]))
        });
    if owned_by_other {
        return None;
    }

    Some(Number {
        first: caps[1].parse().ok()?,
        second: caps.get(2).and_then(|m| m.as_str().parse().ok()),
    })
}

/// The last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((idx, _)) if n > 0 => &s[idx..],
        _ if n == 0 => "",
        _ => s,
    }
}

// ── Text helpers ────────────────────────────────────────────────────────────

/// Visible text of an element, whitespace-collapsed.
fn visible_text(root: ElementRef<'_>) -> String {
    visible_text_excluding(root, &[])
}

/// Visible text of an element, skipping the subtrees rooted at `excluded`.
fn visible_text_excluding<'a>(root: ElementRef<'a>, excluded: &[ElementRef<'a>]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ElementRef::wrap(ancestor).is_some_and(|el| excluded.contains(&el))
                || ancestor
                    .value()
                    .as_element()
                    .map(|el| HIDDEN_TAGS.contains(&el.name()))
                    .unwrap_or(false)
        });
        if !hidden {
            parts.push(&**text);
        }
    }
    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
