//! Small text and address helpers shared by the fetcher, the notifier and the
//! subscription commands.
//!
//! - **Addresses**: SSRF-safe validation of feed URLs and extraction of URLs
//!   from free-form command arguments
//! - **Text**: excerpt truncation on character boundaries, slug derivation,
//!   whitespace collapsing and control-character stripping

mod address;
mod text;

pub use address::{extract_addresses, validate_address, AddressError};
pub use text::{collapse_whitespace, slugify, strip_control_chars, truncate_excerpt};
