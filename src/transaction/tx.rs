use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use crate::error::Error;

use super::{Xid, SUPER_XID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
}

/// Per-transaction state held in the version store's active table.
///
/// The snapshot is captured once at begin (REPEATABLE READ only) and
/// never changes. The error latch records a deadlock or concurrent
/// update that internally aborted the transaction; every later
/// operation on it rethrows the latched kind.
pub struct Transaction {
    xid: Xid,
    level: IsolationLevel,
    snapshot: HashSet<Xid>,
    err: Mutex<Option<Error>>,
    auto_aborted: AtomicBool,
}

impl Transaction {
    pub fn new(xid: Xid, level: IsolationLevel, snapshot: HashSet<Xid>) -> Self {
        Self {
            xid,
            level,
            snapshot,
            err: Mutex::new(None),
            auto_aborted: AtomicBool::new(false),
        }
    }

    /// The always-committed maintenance transaction; no snapshot.
    pub fn superior() -> Self {
        Self::new(SUPER_XID, IsolationLevel::ReadCommitted, HashSet::new())
    }

    pub fn xid(&self) -> Xid {
        self.xid
    }

    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    /// Membership test against the begin-time snapshot. Always false
    /// for the super xid and at READ COMMITTED (which takes none).
    pub fn in_snapshot(&self, xid: Xid) -> bool {
        if xid == SUPER_XID || self.level == IsolationLevel::ReadCommitted {
            return false;
        }
        self.snapshot.contains(&xid)
    }

    /// Rethrow a previously latched abort error, if any.
    pub fn check_error(&self) -> crate::Result<()> {
        match &*self.err.lock().unwrap() {
            Some(Error::Deadlock) => Err(Error::Deadlock),
            Some(Error::ConcurrentUpdate) => Err(Error::ConcurrentUpdate),
            Some(_) | None => Ok(()),
        }
    }

    pub fn latch_error(&self, err: &Error) {
        let latched = match err {
            Error::Deadlock => Error::Deadlock,
            Error::ConcurrentUpdate => Error::ConcurrentUpdate,
            _ => return,
        };
        *self.err.lock().unwrap() = Some(latched);
    }

    pub fn mark_auto_aborted(&self) -> bool {
        self.auto_aborted.swap(true, Ordering::SeqCst)
    }

    pub fn is_auto_aborted(&self) -> bool {
        self.auto_aborted.load(Ordering::SeqCst)
    }
}
