use crate::feed::date::{DateNormalizer, ItemDates};
use crate::util::{collapse_whitespace, strip_control_chars, truncate_excerpt};
use chrono::{DateTime, Utc};
use feed_rs::parser;

/// Excerpts are cut to this many bytes of plain text.
pub const EXCERPT_MAX_BYTES: usize = 512;

/// Line width handed to the HTML renderer; wide enough that it never wraps
/// an excerpt before whitespace is collapsed.
const HTML_RENDER_WIDTH: usize = 2000;

/// One item of a fetched feed, before the update detector has judged it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    pub title: String,
    pub excerpt: String,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// A parsed feed: its display title and its items in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFeed {
    pub title: String,
    pub items: Vec<CandidateItem>,
}

/// Parses RSS/Atom/JSON Feed bytes.
///
/// The date normalizer is installed as the parser's timestamp hook, so
/// localized or sloppy dates are recovered while parsing.
pub fn parse_feed(
    bytes: &[u8],
    dates: &DateNormalizer,
) -> Result<FetchedFeed, parser::ParseFeedError> {
    let hook = dates.clone();
    let feed = parser::Builder::new()
        .timestamp_parser(move |raw| hook.parse_utc(raw))
        .build()
        .parse(bytes)?;

    let title = feed
        .title
        .map(|t| clean_line(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled Feed".to_string());

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry.links.first().map(|l| l.href.clone());
            let title = entry
                .title
                .map(|t| clean_line(&t.content))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            let body = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            let published = dates.resolve(&ItemDates {
                published: entry.published,
                updated: entry.updated,
            });

            CandidateItem {
                title,
                excerpt: body.as_deref().map(excerpt_from_html).unwrap_or_default(),
                link,
                published,
            }
        })
        .collect();

    Ok(FetchedFeed { title, items })
}

/// HTML body -> single-paragraph plain text excerpt.
pub fn excerpt_from_html(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), HTML_RENDER_WIDTH);
    let text = clean_line(&text);
    truncate_excerpt(&text, EXCERPT_MAX_BYTES).into_owned()
}

fn clean_line(s: &str) -> String {
    collapse_whitespace(&strip_control_chars(s))
}
