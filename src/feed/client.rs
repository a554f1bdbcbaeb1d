use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::feed::error::FeedError;
use crate::feed::fetcher::acquire;
use crate::feed::parser::{parse_feed, DEFAULT_SUMMARY_CHARS};
use crate::feed::post::Post;
use crate::feed::relay::Relay;
use crate::feed::retry::RetryPolicy;
use crate::storage::{CacheEntry, CacheStore};

/// Everything the client needs to know about where and how to fetch.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub feed_url: Url,
    /// Tried in order; see [`acquire`](crate::feed::acquire).
    pub relays: Vec<Relay>,
    /// Attempts per relay and backoff between them.
    pub retry: RetryPolicy,
    /// Bound on a single attempt, request and body together.
    pub attempt_timeout: Duration,
    /// How long a cache entry may be served without touching the network.
    pub cache_ttl: Duration,
    /// Wait before trying again when a refresh failed with nothing to show.
    pub empty_retry_delay: Duration,
    /// Ceiling on those retries. `None` keeps trying until cancelled.
    pub max_empty_retries: Option<u32>,
    pub summary_chars: usize,
}

impl FeedSettings {
    /// Settings with the standard timings for `feed_url` and `relays`.
    pub fn new(feed_url: Url, relays: Vec<Relay>) -> Self {
        Self {
            feed_url,
            relays,
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(30 * 60),
            empty_retry_delay: Duration::from_secs(5),
            max_empty_retries: None,
            summary_chars: DEFAULT_SUMMARY_CHARS,
        }
    }
}

/// Snapshot of what a presentation layer should show.
#[derive(Debug, Clone, Default)]
pub struct FeedState {
    /// Posts currently on display, possibly stale.
    pub posts: Arc<Vec<Post>>,
    /// An acquisition is in flight.
    pub loading: bool,
    /// Non-fatal annotation from the last failed refresh.
    pub error: Option<String>,
    /// When the displayed posts were fetched.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Set while the empty-state retry loop is waiting.
    pub retry_in: Option<Duration>,
}

/// Where the posts returned by a refresh came from.
#[derive(Debug, Clone)]
pub enum Refresh {
    /// Warm cache; no network activity happened.
    Cached(Arc<Vec<Post>>),
    /// A new acquisition succeeded and the cache was replaced.
    Fetched(Arc<Vec<Post>>),
    /// The acquisition failed; previously displayed posts are kept.
    Stale {
        posts: Arc<Vec<Post>>,
        error: FeedError,
    },
}

impl Refresh {
    pub fn posts(&self) -> &Arc<Vec<Post>> {
        match self {
            Refresh::Cached(posts) | Refresh::Fetched(posts) => posts,
            Refresh::Stale { posts, .. } => posts,
        }
    }

    pub fn error(&self) -> Option<&FeedError> {
        match self {
            Refresh::Stale { error, .. } => Some(error),
            _ => None,
        }
    }
}

type SharedAcquisition = Shared<BoxFuture<'static, Result<Arc<Vec<Post>>, FeedError>>>;

struct Inner<S> {
    http: reqwest::Client,
    settings: FeedSettings,
    store: S,
    state: watch::Sender<FeedState>,
    in_flight: Mutex<Option<SharedAcquisition>>,
    acquisitions: AtomicU64,
}

/// Fetches, caches and serves the blog feed.
///
/// Cheap to clone; clones share the cache store, the published state and the
/// in-flight acquisition.
pub struct FeedClient<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for FeedClient<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CacheStore> FeedClient<S> {
    /// Creates a client and seeds its state from whatever the store holds.
    ///
    /// An expired entry is still shown (as stale data) until a refresh
    /// replaces it; it is just never returned by [`load_cached`](Self::load_cached).
    pub fn new(http: reqwest::Client, settings: FeedSettings, store: S) -> Self {
        let mut initial = FeedState::default();
        match store.get() {
            Ok(Some(entry)) if !entry.posts.is_empty() => {
                tracing::debug!(
                    posts = entry.posts.len(),
                    age_secs = entry.age_at(Utc::now()).as_secs(),
                    "Seeded state from cache"
                );
                initial.fetched_at = Some(entry.fetched_at);
                initial.posts = Arc::new(entry.posts);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable feed cache"),
        }

        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                http,
                settings,
                store,
                state,
                in_flight: Mutex::new(None),
                acquisitions: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.inner.settings
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Current state snapshot.
    pub fn state(&self) -> FeedState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.inner.state.subscribe()
    }

    /// Number of network acquisitions started by this client (and its clones).
    pub fn acquisitions_started(&self) -> u64 {
        self.inner.acquisitions.load(Ordering::Relaxed)
    }

    /// Returns the cached posts if the cache holds an entry younger than the TTL.
    ///
    /// A pure read: state is not touched and store errors read as `None`.
    pub fn load_cached(&self) -> Option<Arc<Vec<Post>>> {
        self.fresh_entry().map(|entry| Arc::new(entry.posts))
    }

    /// Produces an up-to-date post list.
    ///
    /// With a warm cache and `force_bypass_cache == false` this returns
    /// [`Refresh::Cached`] without any network activity. Otherwise it joins
    /// the in-flight acquisition or starts one.
    ///
    /// # Errors
    ///
    /// Only when the acquisition failed and no posts at all are on display.
    /// With posts on display a failure yields [`Refresh::Stale`] and the error
    /// is recorded in [`FeedState::error`].
    pub async fn refresh(&self, force_bypass_cache: bool) -> Result<Refresh, FeedError> {
        if !force_bypass_cache {
            if let Some(entry) = self.fresh_entry() {
                let posts = Arc::new(entry.posts);
                tracing::debug!(posts = posts.len(), "Serving warm cache");
                self.inner.publish(|s| {
                    s.posts = Arc::clone(&posts);
                    s.fetched_at = Some(entry.fetched_at);
                    s.error = None;
                });
                return Ok(Refresh::Cached(posts));
            }
        }

        match self.acquisition().await {
            Ok(posts) => Ok(Refresh::Fetched(posts)),
            Err(error) => {
                let held = self.state().posts;
                if held.is_empty() {
                    Err(error)
                } else {
                    tracing::warn!(
                        error = %error,
                        posts = held.len(),
                        "Refresh failed, keeping stale posts"
                    );
                    Ok(Refresh::Stale {
                        posts: held,
                        error,
                    })
                }
            }
        }
    }

    /// Refreshes, and while that leaves nothing to show, tries again after
    /// `empty_retry_delay`.
    ///
    /// Exactly one further attempt is scheduled per failure. The loop ends on
    /// the first success (fresh, cached or stale), when `max_empty_retries` is
    /// reached, or when the future is dropped (see [`spawn`](Self::spawn)).
    pub async fn load(&self) -> Result<Refresh, FeedError> {
        let mut retries = 0u32;
        loop {
            let error = match self.refresh(false).await {
                Ok(refresh) => return Ok(refresh),
                Err(e) => e,
            };

            let settings = &self.inner.settings;
            if settings.max_empty_retries.is_some_and(|max| retries >= max) {
                tracing::error!(error = %error, retries = retries, "Giving up on feed");
                return Err(error);
            }

            retries += 1;
            let delay = settings.empty_retry_delay;
            tracing::warn!(
                error = %error,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                "No posts to show, scheduling retry"
            );

            self.inner.publish(|s| s.retry_in = Some(delay));
            tokio::time::sleep(delay).await;
            self.inner.publish(|s| s.retry_in = None);
        }
    }

    /// Runs [`load`](Self::load) on the tokio runtime.
    ///
    /// Dropping or cancelling the returned handle stops the retry loop. An
    /// acquisition already under way still runs to completion and commits.
    pub fn spawn(&self) -> RefreshTask {
        let client = self.clone();
        RefreshTask {
            handle: Some(tokio::spawn(async move { client.load().await })),
        }
    }

    fn fresh_entry(&self) -> Option<CacheEntry> {
        match self.inner.store.get() {
            Ok(Some(entry))
                if !entry.posts.is_empty()
                    && entry.is_fresh_at(Utc::now(), self.inner.settings.cache_ttl) =>
            {
                Some(entry)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read feed cache");
                None
            }
        }
    }

    /// Returns the in-flight acquisition, starting one if none is running.
    fn acquisition(&self) -> SharedAcquisition {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(running) = slot.as_ref() {
            tracing::debug!("Joining in-flight feed acquisition");
            return running.clone();
        }

        // Runs on its own task so a caller that stops waiting cannot strand it
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = InFlightGuard {
                inner: Arc::clone(&inner),
            };
            inner.acquire_and_commit().await
        });

        let acquisition = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "Feed acquisition task failed");
                    Err(FeedError::Interrupted(e.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(acquisition.clone());
        acquisition
    }
}

/// Releases the single-flight slot when an acquisition task ends, however it
/// ends, and clears a `loading` flag it left behind.
struct InFlightGuard<S: CacheStore> {
    inner: Arc<Inner<S>>,
}

impl<S: CacheStore> Drop for InFlightGuard<S> {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.state.send_if_modified(|s| {
            let was_loading = s.loading;
            s.loading = false;
            was_loading
        });
    }
}

impl<S: CacheStore> Inner<S> {
    fn publish(&self, modify: impl FnOnce(&mut FeedState)) {
        self.state.send_modify(modify);
    }

    async fn acquire_and_commit(&self) -> Result<Arc<Vec<Post>>, FeedError> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.publish(|s| s.loading = true);

        let result = self.acquire_posts().await;
        match &result {
            Ok(posts) => {
                let fetched_at = Utc::now();
                let entry = CacheEntry::new(posts.as_ref().clone(), fetched_at);
                if let Err(e) = self.store.set(&entry) {
                    tracing::warn!(error = %e, "Failed to write feed cache");
                }
                self.publish(|s| {
                    s.posts = Arc::clone(posts);
                    s.fetched_at = Some(fetched_at);
                    s.loading = false;
                    s.error = None;
                });
            }
            Err(e) => {
                self.publish(|s| {
                    s.loading = false;
                    s.error = Some(e.to_string());
                });
            }
        }
        result
    }

    async fn acquire_posts(&self) -> Result<Arc<Vec<Post>>, FeedError> {
        let settings = &self.settings;
        let acquired = acquire(
            &self.http,
            &settings.feed_url,
            &settings.relays,
            &settings.retry,
            settings.attempt_timeout,
        )
        .await?;

        let posts = parse_feed(&acquired.body, settings.summary_chars)
            .map_err(|e| FeedError::Parse(e.to_string()))?;
        if posts.is_empty() {
            return Err(FeedError::NoPosts);
        }

        tracing::info!(
            posts = posts.len(),
            relay = acquired.relay,
            attempts = acquired.total_attempts,
            "Feed refreshed"
        );
        Ok(Arc::new(posts))
    }
}

/// Handle to a background [`FeedClient::load`].
///
/// The task is aborted when the handle is cancelled or dropped.
pub struct RefreshTask {
    handle: Option<JoinHandle<Result<Refresh, FeedError>>>,
}

impl RefreshTask {
    /// Stops the task, including any pending retry.
    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the task. `None` if it was cancelled.
    pub async fn join(mut self) -> Option<Result<Refresh, FeedError>> {
        let handle = self.handle.take()?;
        match handle.await {
            Ok(result) => Some(result),
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                tracing::error!(error = %e, "Feed refresh task panicked");
                None
            }
        }
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
