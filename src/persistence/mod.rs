//! The `persistence` module stores the per-target dispatch backlog.
//!
//! Entries are keyed by `(priority, sequence)` so that iterating a store
//! yields the drain order directly. Two stores exist: an ordered in-memory
//! map (the default) and a `sled` tree per target that survives restarts.

pub mod sled_store;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::broker::message::Message;
use crate::dispatch::priority::Priority;
use crate::utils::error::StoreError;

pub use sled_store::SledBacklogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BacklogKey {
    pub priority: Priority,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub message: Message,
    pub priority: Priority,
    pub sequence: u64,
}

impl BacklogEntry {
    pub fn key(&self) -> BacklogKey {
        BacklogKey {
            priority: self.priority,
            sequence: self.sequence,
        }
    }
}

/// Ordered storage for one target's held-back messages.
pub trait BacklogStore: Send + fmt::Debug {
    fn push(&mut self, entry: BacklogEntry) -> Result<(), StoreError>;

    /// All entries in `(priority, sequence)` ascending order.
    fn entries(&self) -> Result<Vec<BacklogEntry>, StoreError>;

    fn remove(&mut self, key: BacklogKey) -> Result<bool, StoreError>;

    fn clear(&mut self) -> Result<(), StoreError>;

    /// Releases the underlying storage for good.
    fn destroy(self: Box<Self>) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryBacklogStore {
    entries: BTreeMap<BacklogKey, BacklogEntry>,
}

impl BacklogStore for MemoryBacklogStore {
    fn push(&mut self, entry: BacklogEntry) -> Result<(), StoreError> {
        self.entries.insert(entry.key(), entry);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<BacklogEntry>, StoreError> {
        Ok(self.entries.values().cloned().collect())
    }

    fn remove(&mut self, key: BacklogKey) -> Result<bool, StoreError> {
        Ok(self.entries.remove(&key).is_some())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }

    fn destroy(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Where backlogs live; opens one store per target.
#[derive(Clone, Default)]
pub enum BacklogStorage {
    #[default]
    Memory,
    Sled(sled::Db),
}

impl BacklogStorage {
    pub fn open_sled(path: &str) -> Result<Self, StoreError> {
        Ok(BacklogStorage::Sled(sled::open(path)?))
    }

    pub fn open(&self, target: &str) -> Result<Box<dyn BacklogStore>, StoreError> {
        match self {
            BacklogStorage::Memory => Ok(Box::new(MemoryBacklogStore::default())),
            BacklogStorage::Sled(db) => Ok(Box::new(SledBacklogStore::open(db, target)?)),
        }
    }
}

impl fmt::Debug for BacklogStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacklogStorage::Memory => f.write_str("BacklogStorage::Memory"),
            BacklogStorage::Sled(_) => f.write_str("BacklogStorage::Sled(sled::Db)"),
        }
    }
}
