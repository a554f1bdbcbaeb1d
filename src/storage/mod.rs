//! Persistence for the last successfully fetched post list.
//!
//! The client owns a [`CacheStore`] and only ever reads or replaces a whole
//! [`CacheEntry`]; there is no partial update path.
//!
//! - [`MemoryStore`] keeps the entry in process (tests, embedding)
//! - [`FileStore`] keeps it in a JSON document replaced atomically on disk

mod file;
mod memory;
mod types;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use types::{CacheEntry, CacheError};

/// Whole-value storage for the cached post list.
///
/// Implementations must make `set` atomic: a concurrent or later `get` sees
/// either the previous entry or the new one, never a mix.
pub trait CacheStore: Send + Sync + 'static {
    /// Returns the stored entry regardless of age, or `None` when empty.
    fn get(&self) -> Result<Option<CacheEntry>, CacheError>;

    /// Replaces the stored entry.
    fn set(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Removes the stored entry, if any.
    fn clear(&self) -> Result<(), CacheError>;
}
