use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::{debug, info};

use crate::{
    error::{Error, Result},
    storage::{RecordRef, RecordStore, Uid},
    transaction::{IsolationLevel, LockManager, Transaction, TxnIdStore, Xid, SUPER_XID},
    utils::get_u64,
};

use super::visibility::{is_visible, version_skipped, Version};

/// Offsets inside a versioned payload: `[xmin:8][xmax:8][user…]`.
const XMAX_OFFSET: usize = 8;
const USER_OFFSET: usize = 16;

/// The MVCC layer: wraps every stored row with its creator and deleter
/// transaction ids and applies the isolation rules on read. Owns the
/// active-transaction table and the record lock manager.
pub struct VersionStore {
    records: Arc<RecordStore>,
    tids: Arc<TxnIdStore>,
    locks: LockManager,
    active: Mutex<HashMap<Xid, Arc<Transaction>>>,
}

impl VersionStore {
    pub fn new(records: Arc<RecordStore>, tids: Arc<TxnIdStore>) -> Arc<Self> {
        let mut active = HashMap::new();
        active.insert(SUPER_XID, Arc::new(Transaction::superior()));
        Arc::new(Self {
            records,
            tids,
            locks: LockManager::new(),
            active: Mutex::new(active),
        })
    }

    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    pub fn txn_ids(&self) -> &Arc<TxnIdStore> {
        &self.tids
    }

    /// Start a transaction. REPEATABLE READ captures the set of
    /// transactions active at this instant; holding the table lock
    /// across the id allocation keeps the snapshot atomic.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let mut active = self.active.lock().unwrap();
        let xid = self.tids.begin()?;
        let snapshot = if level == IsolationLevel::RepeatableRead {
            active.keys().copied().collect()
        } else {
            Default::default()
        };
        active.insert(xid, Arc::new(Transaction::new(xid, level, snapshot)));
        debug!("begin xid {} at {:?}", xid, level);
        Ok(xid)
    }

    fn tx(&self, xid: Xid) -> Result<Arc<Transaction>> {
        self.active
            .lock()
            .unwrap()
            .get(&xid)
            .cloned()
            .ok_or(Error::NoTransaction)
    }

    /// Store `user_bytes` as a fresh version created by `xid`.
    pub fn insert(&self, xid: Xid, user_bytes: &[u8]) -> Result<Uid> {
        let tx = self.tx(xid)?;
        tx.check_error()?;

        let mut payload = Vec::with_capacity(USER_OFFSET + user_bytes.len());
        payload.extend_from_slice(&xid.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(user_bytes);
        self.records.insert(xid, &payload)
    }

    /// Read the version at `uid` as seen by `xid`; `None` when it does
    /// not exist or is invisible at `xid`'s isolation level.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let tx = self.tx(xid)?;
        tx.check_error()?;

        let record = match self.records.read(uid)? {
            Some(record) => record,
            None => return Ok(None),
        };
        let _shared = record.read_lock();
        let payload = record.payload();
        let version = parse_version(&payload);
        if !is_visible(&self.tids, &tx, &version)? {
            return Ok(None);
        }
        Ok(Some(payload[USER_OFFSET..].to_vec()))
    }

    /// Delete the version at `uid` on behalf of `xid`.
    ///
    /// Returns false when there is nothing visible to delete (or `xid`
    /// already deleted it). Blocks while another transaction holds the
    /// record. Deadlock and an unseeable committed delete both latch
    /// onto the transaction, auto-abort it and surface as errors.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let tx = self.tx(xid)?;
        tx.check_error()?;

        let record = match self.records.read(uid)? {
            Some(record) => record,
            None => return Ok(false),
        };

        if !self.visible_now(&tx, &record)? {
            return Ok(false);
        }

        match self.locks.acquire(xid, uid) {
            Ok(None) => {}
            Ok(Some(latch)) => latch.wait(),
            Err(err) => {
                tx.latch_error(&err);
                self.intern_abort(xid, true)?;
                return Err(err);
            }
        }

        // the wait may have outlived the version we first looked at
        let version = {
            let _shared = record.read_lock();
            parse_version(&record.payload())
        };
        if version.xmax == xid {
            return Ok(false);
        }
        if version_skipped(&self.tids, &tx, &version)? {
            let err = Error::ConcurrentUpdate;
            tx.latch_error(&err);
            self.intern_abort(xid, true)?;
            return Err(err);
        }
        if !is_visible(&self.tids, &tx, &version)? {
            return Ok(false);
        }

        let guard = record.write_lock();
        record.before_write();
        record.write_payload(XMAX_OFFSET, &xid.to_le_bytes());
        if let Err(e) = record.after_write(xid, self.records.wal()) {
            record.undo_write();
            drop(guard);
            return Err(e);
        }
        drop(guard);
        debug!("xid {} deleted version {:#x}", xid, uid);
        Ok(true)
    }

    /// Commit `xid`. A latched internal abort resurfaces here instead.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        let tx = self.tx(xid)?;
        tx.check_error()?;

        self.active.lock().unwrap().remove(&xid);
        self.locks.release_all(xid);
        self.tids.commit(xid)?;
        debug!("commit xid {}", xid);
        Ok(())
    }

    /// Roll back `xid`. A no-op beyond bookkeeping when the
    /// transaction was already auto-aborted.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.intern_abort(xid, false)
    }

    fn intern_abort(&self, xid: Xid, auto: bool) -> Result<()> {
        let tx = {
            let mut active = self.active.lock().unwrap();
            let tx = active.get(&xid).cloned().ok_or(Error::NoTransaction)?;
            if !auto {
                active.remove(&xid);
            }
            tx
        };

        if auto {
            if tx.mark_auto_aborted() {
                return Ok(());
            }
        } else if tx.is_auto_aborted() {
            return Ok(());
        }

        self.locks.release_all(xid);
        self.tids.abort(xid)?;
        info!("abort xid {} (auto: {})", xid, auto);
        Ok(())
    }

    fn visible_now(&self, tx: &Transaction, record: &RecordRef) -> Result<bool> {
        let _shared = record.read_lock();
        let version = parse_version(&record.payload());
        is_visible(&self.tids, tx, &version)
    }
}

fn parse_version(payload: &[u8]) -> Version {
    Version {
        xmin: get_u64(payload),
        xmax: get_u64(&payload[XMAX_OFFSET..]),
    }
}
