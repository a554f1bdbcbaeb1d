use std::sync::Arc;

use thiserror::Error;

use crate::feed::fetcher::FetchError;

/// Why a refresh produced no fresh posts.
///
/// Cloneable so a single in-flight acquisition can hand the same outcome to
/// every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Every relay failed every attempt.
    #[error("All {attempts} attempts across {relays} relays failed; last error: {last}")]
    Exhausted {
        relays: usize,
        attempts: u32,
        #[source]
        last: Arc<FetchError>,
    },
    /// No relays are configured.
    #[error("No relays configured")]
    NoRelays,
    /// The body could not be parsed as a feed.
    #[error("Feed parse error: {0}")]
    Parse(String),
    /// The feed parsed but contained no posts.
    #[error("Feed contained no posts")]
    NoPosts,
    /// The acquisition task ended without producing a result.
    #[error("Feed acquisition interrupted: {0}")]
    Interrupted(String),
}

impl FeedError {
    /// Error from the very last fetch attempt, when the failure was network-side.
    pub fn last_fetch_error(&self) -> Option<&FetchError> {
        match self {
            FeedError::Exhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}
