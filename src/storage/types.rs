use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feed::Post;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored document could not be decoded; callers treat it as empty.
    #[error("Cache document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

// ============================================================================
// Cache Entry
// ============================================================================

/// The last successful fetch: its posts and when they were fetched.
///
/// Serialized as `{"posts": [...], "fetched_at": <unix millis>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub posts: Vec<Post>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(posts: Vec<Post>, fetched_at: DateTime<Utc>) -> Self {
        Self { posts, fetched_at }
    }

    /// Age of the entry at `now`. Entries stamped in the future count as age zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// True while `now - fetched_at < ttl`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age_at(now) < ttl
    }
}
