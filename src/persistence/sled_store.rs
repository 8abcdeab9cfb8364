use sled::{Db, Tree};

use crate::dispatch::priority::Priority;
use crate::persistence::{BacklogEntry, BacklogKey, BacklogStore};
use crate::utils::error::StoreError;

const KEY_LEN: usize = 9;

/// Backlog of one target kept in its own sled tree (`backlog/<target>`).
///
/// Keys are one priority byte followed by the big-endian sequence number,
/// so the tree's natural byte order is the drain order.
#[derive(Clone)]
pub struct SledBacklogStore {
    db: Db,
    tree_name: String,
    tree: Tree,
}

impl SledBacklogStore {
    pub fn open(db: &Db, target: &str) -> Result<Self, StoreError> {
        let tree_name = format!("backlog/{target}");
        let tree = db.open_tree(&tree_name)?;
        Ok(Self {
            db: db.clone(),
            tree_name,
            tree,
        })
    }
}

pub(crate) fn encode_key(key: BacklogKey) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    out[0] = key.priority.value();
    out[1..].copy_from_slice(&key.sequence.to_be_bytes());
    out
}

pub(crate) fn decode_key(raw: &[u8]) -> Result<BacklogKey, StoreError> {
    if raw.len() != KEY_LEN {
        return Err(StoreError::CorruptKey(raw.len()));
    }
    let priority = Priority::new(raw[0]).ok_or(StoreError::CorruptKey(raw.len()))?;
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&raw[1..]);
    Ok(BacklogKey {
        priority,
        sequence: u64::from_be_bytes(seq),
    })
}

impl BacklogStore for SledBacklogStore {
    fn push(&mut self, entry: BacklogEntry) -> Result<(), StoreError> {
        let serialized = serde_json::to_vec(&entry)?;
        self.tree.insert(encode_key(entry.key()), serialized)?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<BacklogEntry>, StoreError> {
        let mut out = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (key, value) = item?;
            decode_key(&key)?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    fn remove(&mut self, key: BacklogKey) -> Result<bool, StoreError> {
        Ok(self.tree.remove(encode_key(key))?.is_some())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.tree.clear()?;
        Ok(())
    }

    fn destroy(self: Box<Self>) -> Result<(), StoreError> {
        self.db.drop_tree(self.tree_name.as_bytes())?;
        Ok(())
    }
}

impl std::fmt::Debug for SledBacklogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledBacklogStore")
            .field("db", &"sled::Db")
            .field("tree", &self.tree_name)
            .finish()
    }
}
