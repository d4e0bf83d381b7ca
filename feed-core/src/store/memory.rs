use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{CacheEntry, CacheStore, PutOutcome};
use crate::error::StoreError;

/// In-process store. Entries live until overwritten, invalidated or the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<PutOutcome, StoreError> {
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut slot) => {
                if slot.get().stored_at > entry.stored_at {
                    return Ok(PutOutcome::Discarded);
                }
                slot.insert(entry);
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        Ok(PutOutcome::Written)
    }

    async fn invalidate(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
