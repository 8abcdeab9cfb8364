//! Per-target backlog bookkeeping on top of a [`BacklogStore`].
//!
//! The store keeps the ordered entries; `Backlog` hands out sequence
//! numbers and tracks how many entries sit at each priority so the link
//! tracker can ask "is anything queued at these priorities" without
//! touching storage.

use crate::broker::message::Message;
use crate::dispatch::priority::Priority;
use crate::persistence::{BacklogEntry, BacklogKey, BacklogStore};
use crate::utils::error::StoreError;

#[derive(Debug)]
pub struct Backlog {
    store: Box<dyn BacklogStore>,
    counts: [usize; Priority::COUNT],
    next_sequence: u64,
}

impl Backlog {
    /// Wraps a store, continuing the sequence after any entries it holds.
    pub fn open(store: Box<dyn BacklogStore>) -> Result<Self, StoreError> {
        let mut counts = [0; Priority::COUNT];
        let mut next_sequence = 0;
        for entry in store.entries()? {
            counts[entry.priority.index()] += 1;
            next_sequence = next_sequence.max(entry.sequence + 1);
        }
        Ok(Self {
            store,
            counts,
            next_sequence,
        })
    }

    pub fn push(&mut self, message: Message) -> Result<BacklogKey, StoreError> {
        let entry = BacklogEntry {
            priority: message.priority,
            sequence: self.next_sequence,
            message,
        };
        let key = entry.key();
        self.store.push(entry)?;
        self.next_sequence += 1;
        self.counts[key.priority.index()] += 1;
        Ok(key)
    }

    /// Entries in drain order.
    pub fn entries(&self) -> Result<Vec<BacklogEntry>, StoreError> {
        self.store.entries()
    }

    pub fn remove(&mut self, key: BacklogKey) -> Result<bool, StoreError> {
        let removed = self.store.remove(key)?;
        if removed {
            self.counts[key.priority.index()] -= 1;
        }
        Ok(removed)
    }

    /// Discards every entry, returning how many were dropped.
    pub fn clear(&mut self) -> Result<usize, StoreError> {
        let dropped = self.len();
        self.store.clear()?;
        self.counts = [0; Priority::COUNT];
        Ok(dropped)
    }

    pub fn len(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bit `p` is set when at least one entry waits at priority `p`.
    pub fn priority_mask(&self) -> u16 {
        Priority::all()
            .filter(|p| self.counts[p.index()] > 0)
            .fold(0, |mask, p| mask | p.bit())
    }

    pub fn destroy(self) -> Result<(), StoreError> {
        self.store.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{BacklogStorage, MemoryBacklogStore};

    fn msg(p: u8) -> Message {
        Message::new("t", format!("m{p}")).with_priority(Priority::new(p).unwrap())
    }

    #[test]
    fn test_assigns_sequences_and_tracks_mask() {
        let mut backlog = Backlog::open(Box::new(MemoryBacklogStore::default())).unwrap();
        assert!(backlog.is_empty());
        assert_eq!(backlog.priority_mask(), 0);

        let first = backlog.push(msg(2)).unwrap();
        backlog.push(msg(7)).unwrap();
        let third = backlog.push(msg(2)).unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(third.sequence, 2);
        assert_eq!(backlog.len(), 3);
        assert_eq!(backlog.priority_mask(), (1 << 2) | (1 << 7));

        assert!(backlog.remove(first).unwrap());
        assert_eq!(backlog.priority_mask(), (1 << 2) | (1 << 7));
        assert!(backlog.remove(third).unwrap());
        assert_eq!(backlog.priority_mask(), 1 << 7);

        assert_eq!(backlog.clear().unwrap(), 1);
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_reopened_sled_backlog_continues_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BacklogStorage::open_sled(dir.path().to_str().unwrap()).unwrap();
        {
            let mut backlog = Backlog::open(storage.open("peer").unwrap()).unwrap();
            backlog.push(msg(4)).unwrap();
            backlog.push(msg(1)).unwrap();
        }
        let mut backlog = Backlog::open(storage.open("peer").unwrap()).unwrap();
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog.push(msg(4)).unwrap().sequence, 2);

        let order: Vec<u64> = backlog.entries().unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }
}
