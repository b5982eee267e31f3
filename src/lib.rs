//! feedrelay watches RSS/Atom/JSON feeds and relays new items to their
//! subscribers.
//!
//! - [`engine`] - update cycles, change detection, feed health, scheduling
//! - [`feed`] - fetching, parsing, date normalization, OPML import
//! - [`notify`] - rendering and dispatch of notifications
//! - [`storage`] - SQLite persistence of feeds, subscribers, subscriptions
//! - [`subscriptions`] - subscriber-facing commands
//! - [`config`] - TOML configuration

pub mod config;
pub mod engine;
pub mod feed;
pub mod notify;
pub mod storage;
pub mod subscriptions;
pub mod util;
