//! Alert feed rendering.
//!
//! One markdown-ish line per alert, e.g.
//! `• [Spring Open](https://example.org/e1) — 76/72 (over by 4)`.
//! Reason codes stay internal; only the rendered text is shown to operators.

use crate::types::{CapacityAlert, CapacityResult, Waitlist};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Language of the rendered feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedLocale {
    En,
    #[default]
    Fi,
    Sv,
}

impl FeedLocale {
    fn left(self, n: i64) -> String {
        match self {
            FeedLocale::En => format!("{n} left"),
            FeedLocale::Fi => format!("jäljellä {n} paikkaa"),
            FeedLocale::Sv => format!("{n} platser kvar"),
        }
    }

    fn over_by(self, m: i64) -> String {
        match self {
            FeedLocale::En => format!("over by {m}"),
            FeedLocale::Fi => format!("yli {m}"),
            FeedLocale::Sv => format!("{m} över"),
        }
    }

    fn full(self) -> &'static str {
        match self {
            FeedLocale::En => "full",
            FeedLocale::Fi => "täynnä",
            FeedLocale::Sv => "fullt",
        }
    }

    fn spots_available(self, n: i64) -> String {
        match self {
            FeedLocale::En => format!("{n} spots available"),
            FeedLocale::Fi => format!("{n} paikkaa vapaana"),
            FeedLocale::Sv => format!("{n} platser lediga"),
        }
    }

    fn no_limit(self) -> &'static str {
        match self {
            FeedLocale::En => "no limit shown",
            FeedLocale::Fi => "ei osallistujarajaa näkyvissä",
            FeedLocale::Sv => "ingen gräns visas",
        }
    }

    fn in_queue(self, n: u32) -> String {
        match self {
            FeedLocale::En => format!("{n} in queue"),
            FeedLocale::Fi => format!("{n} jonossa"),
            FeedLocale::Sv => format!("{n} i kö"),
        }
    }

    fn waitlist(self) -> &'static str {
        match self {
            FeedLocale::En => "waitlist",
            FeedLocale::Fi => "jonotuslista",
            FeedLocale::Sv => "väntelista",
        }
    }
}

/// Render one alert as a feed line.
pub fn render_alert(alert: &CapacityAlert, locale: FeedLocale) -> String {
    let mut line = format!(
        "• [{}]({}) — {}",
        alert.title,
        alert.url,
        capacity_text(&alert.result, locale)
    );

    match alert.result.waitlist() {
        Waitlist::Count(n) if n > 0 => {
            let _ = write!(line, " · {}", locale.in_queue(n));
        }
        Waitlist::CountUnknown => {
            let _ = write!(line, " · {}", locale.waitlist());
        }
        _ => {}
    }
    line
}

/// Render alerts one per line, in input order.
pub fn render_feed(alerts: &[CapacityAlert], locale: FeedLocale) -> String {
    alerts
        .iter()
        .map(|a| render_alert(a, locale))
        .collect::<Vec<_>>()
        .join("\n")
}

fn capacity_text(result: &CapacityResult, locale: FeedLocale) -> String {
    if result.registered.is_none() && result.limit.is_none() {
        return match result.remaining {
            Some(n) => locale.spots_available(n),
            None => locale.no_limit().to_string(),
        };
    }

    let counts = format!("{}/{}", or_unknown(result.registered), or_unknown(result.limit));
    match result.remaining {
        Some(n) if n > 0 => format!("{counts} ({})", locale.left(n)),
        Some(0) => format!("{counts} ({})", locale.full()),
        Some(n) => format!("{counts} ({})", locale.over_by(-n)),
        None => counts,
    }
}

fn or_unknown(n: Option<u32>) -> String {
    n.map_or_else(|| "?".to_string(), |n| n.to_string())
}
