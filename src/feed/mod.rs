//! Everything between a feed address and a list of candidate items.
//!
//! - [`date`] - best-effort publication timestamps, locale aware
//! - [`fetcher`] - the [`Source`] trait and its HTTP implementation
//! - [`parser`] - RSS/Atom/JSON Feed parsing into [`CandidateItem`]s
//! - [`opml`] - OPML subscription list import

pub mod date;
mod fetcher;
pub mod opml;
mod parser;

pub use date::{DateNormalizer, ItemDates, LocaleTable};
pub use fetcher::{FetchError, FetchFailure, HttpSource, Source, DEFAULT_TIMEOUT};
pub use opml::{OpmlEntry, OpmlError};
pub use parser::{excerpt_from_html, parse_feed, CandidateItem, FetchedFeed, EXCERPT_MAX_BYTES};
