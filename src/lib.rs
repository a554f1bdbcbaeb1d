//! Blog feed ingestion client.
//!
//! Fetches an RSS/Atom feed through an ordered chain of relays with
//! exponential backoff, normalizes entries into [`feed::Post`] records and
//! keeps the last good list in an expiring local cache.

pub mod config;
pub mod feed;
pub mod output;
pub mod storage;
pub mod util;
