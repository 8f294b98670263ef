use std::sync::{Arc, Mutex};

use log::debug;

use crate::{
    error::{Error, Result},
    storage::{RecordStore, Uid},
    transaction::SUPER_XID,
    utils::get_u64,
};

use super::node::{Node, Route, NO_SIBLING};

/// A persistent long-to-long multimap.
///
/// Every node lives as one record; the tree is referenced through a
/// one-record handle holding the current root uid, which stays stable
/// across root splits. Node mutations go through the record
/// before/after protocol under the super xid, so index structure is
/// redone unconditionally at recovery.
///
/// Searches descend without locks and cross right-sibling links to
/// chase keys that a concurrent split moved; structural changes are
/// serialised per tree handle.
pub struct BPlusTree {
    records: Arc<RecordStore>,
    handle_uid: Uid,
    insert_lock: Mutex<()>,
}

impl BPlusTree {
    /// Build an empty tree: one empty leaf plus the handle record
    /// pointing at it. Returns the handle's uid.
    pub fn create(records: &Arc<RecordStore>) -> Result<Uid> {
        let root_uid = records.insert(SUPER_XID, &Node::new_leaf().encode())?;
        let handle_uid = records.insert(SUPER_XID, &root_uid.to_le_bytes())?;
        debug!("created index, handle {:#x}", handle_uid);
        Ok(handle_uid)
    }

    pub fn open(records: Arc<RecordStore>, handle_uid: Uid) -> Self {
        Self {
            records,
            handle_uid,
            insert_lock: Mutex::new(()),
        }
    }

    pub fn handle_uid(&self) -> Uid {
        self.handle_uid
    }

    fn root_uid(&self) -> Result<Uid> {
        let handle = self
            .records
            .read(self.handle_uid)?
            .ok_or(Error::NullEntry)?;
        let _shared = handle.read_lock();
        Ok(get_u64(&handle.payload()))
    }

    fn load(&self, node_uid: Uid) -> Result<Node> {
        let record = self.records.read(node_uid)?.ok_or(Error::NullEntry)?;
        let _shared = record.read_lock();
        Ok(Node::decode(&record.payload()))
    }

    /// All row ids under `key`, in ascending key order.
    pub fn search(&self, key: i64) -> Result<Vec<Uid>> {
        self.search_range(key, key)
    }

    /// All row ids with keys in `[low, high]`.
    pub fn search_range(&self, low: i64, high: i64) -> Result<Vec<Uid>> {
        // descend to the first leaf that can hold `low`
        let mut cur = self.root_uid()?;
        loop {
            let node = self.load(cur)?;
            if node.is_leaf {
                break;
            }
            cur = match node.route_search(low) {
                Route::Child(child) => child,
                Route::Sibling(NO_SIBLING) => return Ok(Vec::new()),
                Route::Sibling(sibling) => sibling,
            };
        }

        // then walk the leaf chain
        let mut out = Vec::new();
        loop {
            let node = self.load(cur)?;
            let past_high = node.collect_range(low, high, &mut out);
            if past_high || node.sibling == NO_SIBLING {
                break;
            }
            cur = node.sibling;
        }
        Ok(out)
    }

    /// Register `row_uid` under `key`. Duplicate keys accumulate.
    pub fn insert(&self, key: i64, row_uid: Uid) -> Result<()> {
        let _structural = self.insert_lock.lock().unwrap();
        let root = self.root_uid()?;
        if let Some((right_uid, split_key)) = self.insert_below(root, row_uid, key)? {
            self.grow_root(root, split_key, right_uid)?;
        }
        Ok(())
    }

    /// Insert into the subtree rooted at `node_uid`; a split pair
    /// bubbles back up for the caller to thread into the parent level.
    fn insert_below(&self, node_uid: Uid, row_uid: Uid, key: i64) -> Result<Option<(Uid, i64)>> {
        let mut cur = node_uid;
        loop {
            let node = self.load(cur)?;
            if node.is_leaf {
                return self.place_entry(cur, row_uid, key);
            }
            match node.route_insert(key) {
                Route::Child(child) => {
                    return match self.insert_below(child, row_uid, key)? {
                        None => Ok(None),
                        Some((right_uid, split_key)) => {
                            self.place_entry(cur, right_uid, split_key)
                        }
                    };
                }
                Route::Sibling(NO_SIBLING) => return Err(Error::NullEntry),
                Route::Sibling(sibling) => cur = sibling,
            }
        }
    }

    /// Put `(child, key)` into the node chain starting at `node_uid`,
    /// following sibling links while the key belongs further right,
    /// splitting when the landing node fills up. A split pair bubbles
    /// back to the caller.
    fn place_entry(&self, node_uid: Uid, child: u64, key: i64) -> Result<Option<(Uid, i64)>> {
        let mut cur = node_uid;
        loop {
            let record = self.records.read(cur)?.ok_or(Error::NullEntry)?;
            let guard = record.write_lock();
            let mut node = Node::decode(&record.payload());

            if !node.insert_entry(child, key) {
                let sibling = node.sibling;
                drop(guard);
                cur = sibling;
                continue;
            }

            let split = if node.needs_split() {
                let (right, split_key) = node.split();
                let right_uid = self.records.insert(SUPER_XID, &right.encode())?;
                node.sibling = right_uid;
                Some((right_uid, split_key))
            } else {
                None
            };

            record.before_write();
            record.write_payload(0, &node.encode());
            record.after_write(SUPER_XID, self.records.wal())?;
            drop(guard);
            return Ok(split);
        }
    }

    /// The root split: build a new root over the two halves and swing
    /// the handle to it.
    fn grow_root(&self, old_root: Uid, split_key: i64, right_uid: Uid) -> Result<()> {
        let new_root = Node::new_root(old_root, split_key, right_uid);
        let new_root_uid = self.records.insert(SUPER_XID, &new_root.encode())?;

        let handle = self
            .records
            .read(self.handle_uid)?
            .ok_or(Error::NullEntry)?;
        let guard = handle.write_lock();
        handle.before_write();
        handle.write_payload(0, &new_root_uid.to_le_bytes());
        handle.after_write(SUPER_XID, self.records.wal())?;
        drop(guard);
        debug!("index root split, new root {:#x}", new_root_uid);
        Ok(())
    }
}
