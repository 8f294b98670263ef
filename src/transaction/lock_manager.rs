use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Condvar, Mutex},
};

use log::debug;

use crate::error::{Error, Result};

use super::Xid;

/// A single-use latch a waiter parks on. Created locked; the previous
/// owner's release unlocks it, at which point the parked transaction
/// owns the record.
pub struct ParkLatch {
    granted: Mutex<bool>,
    cond: Condvar,
}

impl ParkLatch {
    fn new() -> Self {
        Self {
            granted: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Block until ownership is transferred to the parked transaction.
    pub fn wait(&self) {
        let mut granted = self.granted.lock().unwrap();
        while !*granted {
            granted = self.cond.wait(granted).unwrap();
        }
    }

    fn grant(&self) {
        *self.granted.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

/// Exclusive per-record (per-uid) locks with explicit deadlock
/// detection over the waits-for graph.
///
/// The graph edges are implicit: a waiting transaction points at the
/// owner of the uid it waits on. The victim of a detected cycle is the
/// transaction that asked last; its tentative wait is rolled back
/// before the error is returned.
pub struct LockManager {
    tables: Mutex<LockTables>,
}

#[derive(Default)]
struct LockTables {
    /// uids held by each transaction
    held: HashMap<Xid, HashSet<u64>>,
    /// current owner of each locked uid
    owner: HashMap<u64, Xid>,
    /// FIFO wait queue per uid
    waiters: HashMap<u64, VecDeque<Xid>>,
    /// the single uid each blocked transaction waits on
    waiting_for: HashMap<Xid, u64>,
    /// park latch per blocked transaction
    park: HashMap<Xid, Arc<ParkLatch>>,
    /// DFS bookkeeping, reused across detection runs
    stamps: HashMap<Xid, u64>,
    stamp: u64,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(LockTables::default()),
        }
    }

    /// Try to take `uid` for `xid`.
    ///
    /// Returns `None` when the lock is held (reentrant) or was free and
    /// is now owned. Returns a latch when another transaction owns the
    /// uid: the caller must `wait()` on it and owns the uid once the
    /// wait returns. Fails with `Deadlock` when granting the wait would
    /// close a cycle.
    pub fn acquire(&self, xid: Xid, uid: u64) -> Result<Option<Arc<ParkLatch>>> {
        let mut t = self.tables.lock().unwrap();

        if t.held.get(&xid).map_or(false, |s| s.contains(&uid)) {
            return Ok(None);
        }

        if !t.owner.contains_key(&uid) {
            t.owner.insert(uid, xid);
            t.held.entry(xid).or_default().insert(uid);
            return Ok(None);
        }

        // Tentatively enqueue, then check for a cycle.
        t.waiting_for.insert(xid, uid);
        t.waiters.entry(uid).or_default().push_back(xid);

        if t.has_cycle() {
            t.waiting_for.remove(&xid);
            let queue = t.waiters.get_mut(&uid).unwrap();
            queue.retain(|&w| w != xid);
            if queue.is_empty() {
                t.waiters.remove(&uid);
            }
            debug!("deadlock: xid {} asking for uid {:#x}", xid, uid);
            return Err(Error::Deadlock);
        }

        let latch = Arc::new(ParkLatch::new());
        t.park.insert(xid, latch.clone());
        Ok(Some(latch))
    }

    /// Drop every lock `xid` holds, handing each uid to the first live
    /// waiter in queue order, and clear all of `xid`'s bookkeeping.
    pub fn release_all(&self, xid: Xid) {
        let mut t = self.tables.lock().unwrap();
        if let Some(uids) = t.held.remove(&xid) {
            for uid in uids {
                t.select_successor(uid);
            }
        }
        t.waiting_for.remove(&xid);
        t.park.remove(&xid);
    }

    #[cfg(test)]
    pub(crate) fn holds(&self, xid: Xid, uid: u64) -> bool {
        let t = self.tables.lock().unwrap();
        t.owner.get(&uid) == Some(&xid) && t.held.get(&xid).map_or(false, |s| s.contains(&uid))
    }
}

impl LockTables {
    /// Hand `uid` to the first waiter that is still parked, waking it.
    /// Stale queue entries (no park latch) are skipped.
    fn select_successor(&mut self, uid: u64) {
        self.owner.remove(&uid);

        let mut queue = match self.waiters.remove(&uid) {
            Some(q) => q,
            None => return,
        };

        while let Some(next) = queue.pop_front() {
            if let Some(latch) = self.park.remove(&next) {
                self.owner.insert(uid, next);
                self.held.entry(next).or_default().insert(uid);
                self.waiting_for.remove(&next);
                latch.grant();
                break;
            }
        }

        if !queue.is_empty() {
            self.waiters.insert(uid, queue);
        }
    }

    /// Walk the implicit edges `xid -> owner[waiting_for[xid]]` from
    /// every lock-holding transaction. Revisiting a node stamped in the
    /// current walk is a back-edge, i.e. a cycle.
    fn has_cycle(&mut self) -> bool {
        self.stamps.clear();
        self.stamp = 0;

        let roots: Vec<Xid> = self.held.keys().copied().collect();
        for root in roots {
            if self.stamps.contains_key(&root) {
                continue;
            }
            self.stamp += 1;
            let walk = self.stamp;

            let mut cur = root;
            loop {
                match self.stamps.get(&cur) {
                    Some(&s) if s == walk => return true,
                    Some(_) => break,
                    None => {}
                }
                self.stamps.insert(cur, walk);

                let uid = match self.waiting_for.get(&cur) {
                    Some(&uid) => uid,
                    None => break,
                };
                cur = match self.owner.get(&uid) {
                    Some(&owner) => owner,
                    None => break,
                };
            }
        }
        false
    }
}
