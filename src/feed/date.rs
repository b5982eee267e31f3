//! Best-effort publication timestamps for feed items.
//!
//! Feeds in the wild carry dates in every dialect of RFC 822 imaginable, and
//! some publishers localize the weekday and month names. [`DateNormalizer`]
//! folds the known dialects back to something chrono can read. It never
//! fails loudly: anything it cannot make sense of becomes `None`.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};
use std::collections::HashMap;

/// Layouts tried in order once named zones have been rewritten to offsets.
///
/// chrono's `%d` accepts a single-digit day, and `%a`/`%b` match names
/// case-insensitively, which covers the relaxed single-digit variants.
const LAYOUTS: &[&str] = &[
    // RFC 822
    "%d %b %y %H:%M %z",
    "%a, %d %b %y %H:%M %z",
    // RFC 1123
    "%a, %d %b %Y %H:%M:%S %z",
    // Relaxed: no weekday, no seconds
    "%d %b %Y %H:%M:%S %z",
    "%a, %d %b %Y %H:%M %z",
    "%d %b %Y %H:%M %z",
];

/// ISO 8601 shapes RFC 3339 rejects: offsets without a colon, a space
/// instead of `T`. `%.f` also matches when there is no fraction.
const ISO_LAYOUTS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Offset-less ISO 8601, read as UTC.
const NAIVE_LAYOUTS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Full English names some publishers spell out, folded to the
/// abbreviations the RFC 822 layouts expect.
const LONG_NAMES: &[(&str, &str)] = &[
    ("monday", "Mon"),
    ("tuesday", "Tue"),
    ("wednesday", "Wed"),
    ("thursday", "Thu"),
    ("friday", "Fri"),
    ("saturday", "Sat"),
    ("sunday", "Sun"),
    ("january", "Jan"),
    ("february", "Feb"),
    ("march", "Mar"),
    ("april", "Apr"),
    ("june", "Jun"),
    ("july", "Jul"),
    ("august", "Aug"),
    ("september", "Sep"),
    ("october", "Oct"),
    ("november", "Nov"),
    ("december", "Dec"),
];

const NAMED_ZONES: &[(&str, &str)] = &[
    ("UT", "+0000"),
    ("UTC", "+0000"),
    ("GMT", "+0000"),
    ("Z", "+0000"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
];

/// Token substitutions for one locale.
///
/// Both lists are applied in order against the lowercased date string, each
/// token replaced at most once. Tokens must be lowercase.
#[derive(Debug, Clone, Default)]
pub struct LocaleTable {
    pub days: Vec<(String, String)>,
    pub months: Vec<(String, String)>,
}

impl LocaleTable {
    fn from_pairs(days: &[(&str, &str)], months: &[(&str, &str)]) -> Self {
        let own = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(token, canonical)| (token.to_string(), canonical.to_string()))
                .collect()
        };
        Self {
            days: own(days),
            months: own(months),
        }
    }

    /// Russian abbreviations as emitted by most Russian-language publishers.
    pub fn russian() -> Self {
        Self::from_pairs(
            &[
                ("вс", "Sun"),
                ("пн", "Mon"),
                ("вт", "Tue"),
                ("ср", "Wed"),
                ("чт", "Thu"),
                ("пт", "Fri"),
                ("сб", "Sat"),
            ],
            &[
                ("янв", "Jan"),
                ("фев", "Feb"),
                ("мар", "Mar"),
                ("апр", "Apr"),
                ("май", "May"),
                ("июн", "Jun"),
                ("июл", "Jul"),
                ("авг", "Aug"),
                ("сен", "Sep"),
                ("окт", "Oct"),
                ("ноя", "Nov"),
                ("дек", "Dec"),
            ],
        )
    }

    /// Input with none of the table's words comes back untouched, so
    /// case-sensitive literals like the ISO `T` survive.
    fn apply(&self, raw: &str) -> String {
        let lower = raw.to_lowercase();
        let mut out = lower.clone();
        for (token, canonical) in self.days.iter().chain(self.months.iter()) {
            out = out.replacen(token.as_str(), canonical, 1);
        }
        if out == lower {
            raw.to_string()
        } else {
            out
        }
    }
}

/// The dates a feed item carries after parsing.
///
/// Raw date strings never reach this point: the feed parser hands every one
/// of them to [`DateNormalizer::parse_utc`] while it reads the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemDates {
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Resolves item timestamps, with optional locale-aware name substitution.
#[derive(Debug, Clone)]
pub struct DateNormalizer {
    locale: Option<String>,
    tables: HashMap<String, LocaleTable>,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DateNormalizer {
    /// Creates a normalizer with the built-in locale tables.
    ///
    /// `locale` selects the substitution table; `None`, `"en"` or a tag with
    /// no table means dates are parsed as-is.
    pub fn new(locale: Option<&str>) -> Self {
        let mut tables = HashMap::new();
        tables.insert("ru".to_string(), LocaleTable::russian());
        Self {
            locale: locale.map(|l| l.trim().to_lowercase()),
            tables,
        }
    }

    /// Registers (or replaces) the table for `tag`.
    pub fn with_table(mut self, tag: &str, table: LocaleTable) -> Self {
        self.tables.insert(tag.to_lowercase(), table);
        self
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Picks the item's timestamp: publish date, else update date.
    pub fn resolve(&self, dates: &ItemDates) -> Option<DateTime<Utc>> {
        dates.published.or(dates.updated)
    }

    /// Parses a textual date, keeping its original offset.
    ///
    /// Offset-less ISO timestamps are read as UTC. An hour of `24` means
    /// midnight at the end of that day.
    pub fn parse_raw(&self, raw: &str) -> Option<DateTime<FixedOffset>> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let localized = match self.table() {
            Some(table) => table.apply(trimmed),
            None => trimmed.to_string(),
        };
        let compact = fold_long_names(&localized);

        parse_normalized(&compact).or_else(|| {
            let rolled = roll_hour_24(&compact)?;
            parse_normalized(&rolled).map(|dt| dt + Duration::days(1))
        })
    }

    /// Timestamp hook for the feed parser.
    ///
    /// Installing a hook replaces the parser's own date handling, so this
    /// has to read everything it would have read too.
    pub fn parse_utc(&self, raw: &str) -> Option<DateTime<Utc>> {
        self.parse_raw(raw).map(|dt| dt.with_timezone(&Utc))
    }

    fn table(&self) -> Option<&LocaleTable> {
        self.locale.as_deref().and_then(|tag| self.tables.get(tag))
    }
}

fn parse_normalized(compact: &str) -> Option<DateTime<FixedOffset>> {
    let numeric = rewrite_named_zone(compact);

    for layout in LAYOUTS {
        if let Ok(dt) = DateTime::parse_from_str(&numeric, layout) {
            return Some(dt);
        }
    }

    // A wrong weekday makes chrono reject the whole string; drop it and
    // trust the calendar date.
    if let Some((_, rest)) = numeric.split_once(", ") {
        for layout in LAYOUTS.iter().filter(|l| !l.starts_with("%a")) {
            if let Ok(dt) = DateTime::parse_from_str(rest, layout) {
                return Some(dt);
            }
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(compact).or_else(|_| DateTime::parse_from_rfc3339(compact)) {
        return Some(dt);
    }

    ISO_LAYOUTS
        .iter()
        .find_map(|layout| DateTime::parse_from_str(compact, layout).ok())
        .or_else(|| {
            NAIVE_LAYOUTS
                .iter()
                .find_map(|layout| NaiveDateTime::parse_from_str(compact, layout).ok())
                .map(|naive| naive.and_utc().fixed_offset())
        })
}

/// Collapses whitespace and swaps full English day/month names for their
/// abbreviations.
fn fold_long_names(s: &str) -> String {
    s.split_whitespace()
        .map(|token| {
            let (word, tail) = match token.strip_suffix(',') {
                Some(word) => (word, ","),
                None => (token, ""),
            };
            let lower = word.to_lowercase();
            match LONG_NAMES.iter().find(|(long, _)| *long == lower) {
                Some((_, short)) => format!("{short}{tail}"),
                None => token.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rewrites a `24:MM:SS` time to `00:MM:SS`; the caller adds the day.
fn roll_hour_24(s: &str) -> Option<String> {
    let at = s.find(" 24:").or_else(|| s.find("T24:"))?;
    let mut rolled = s.to_string();
    rolled.replace_range(at + 1..at + 3, "00");
    Some(rolled)
}

fn rewrite_named_zone(s: &str) -> String {
    let Some((head, last)) = s.rsplit_once(' ') else {
        return s.to_string();
    };
    let upper = last.to_ascii_uppercase();
    match NAMED_ZONES.iter().find(|(name, _)| *name == upper) {
        Some((_, offset)) => format!("{head} {offset}"),
        None => s.to_string(),
    }
}
