use std::sync::{PoisonError, RwLock};

use super::{CacheEntry, CacheError, CacheStore};

/// In-process cache store.
///
/// The entry is swapped whole under a lock, so readers never observe a torn
/// value. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entry: RwLock<Option<CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `entry`.
    pub fn with_entry(entry: CacheEntry) -> Self {
        Self {
            entry: RwLock::new(Some(entry)),
        }
    }
}

impl CacheStore for MemoryStore {
    fn get(&self) -> Result<Option<CacheEntry>, CacheError> {
        let guard = self.entry.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }

    fn set(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let mut guard = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(entry.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut guard = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
        Ok(())
    }
}
