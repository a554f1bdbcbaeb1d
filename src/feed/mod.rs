//! Blog feed ingestion: relays, retries, parsing and the caching client.
//!
//! - `parser` - RSS (streaming `quick-xml`) and Atom (`feed-rs`) into [`Post`]s
//! - `relay` - relay URL templates and per-attempt cache busting
//! - `retry` - exponential backoff policy and executor
//! - `fetcher` - sequential acquisition across the relay chain
//! - `client` - [`FeedClient`]: warm-cache reads, single-flight refreshes,
//!   stale fallback and the empty-state retry loop
//!
//! # Example
//!
//! ```ignore
//! use folio_feed::feed::{FeedClient, FeedSettings, Relay};
//! use folio_feed::storage::MemoryStore;
//!
//! let settings = FeedSettings::new(feed_url, vec![Relay::Direct]);
//! let client = FeedClient::new(reqwest::Client::new(), settings, MemoryStore::new());
//!
//! if let Some(posts) = client.load_cached() {
//!     render(&posts);
//! }
//! let refreshed = client.load().await?;
//! ```

mod client;
mod error;
mod fetcher;
mod parser;
mod post;
mod relay;
mod retry;

pub use client::{FeedClient, FeedSettings, FeedState, Refresh, RefreshTask};
pub use error::FeedError;
pub use fetcher::{acquire, Acquired, FetchError};
pub use parser::{parse_feed, ParseError, DEFAULT_SUMMARY_CHARS};
pub use post::{Enclosure, Post};
pub use relay::{Relay, RelayError, CACHE_BUST_PARAM, URL_PLACEHOLDER};
pub use retry::{retry, RetryPolicy};
