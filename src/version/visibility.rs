use crate::{
    error::Result,
    transaction::{IsolationLevel, Transaction, TxnIdStore, Xid},
};

/// The two version stamps carried in front of every stored row.
/// `xmax == 0` means no one has deleted the version.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    pub xmin: Xid,
    pub xmax: Xid,
}

impl Version {
    pub fn is_live(&self) -> bool {
        self.xmax == 0
    }
}

/// Can transaction `t` see version `v`?
pub fn is_visible(tids: &TxnIdStore, t: &Transaction, v: &Version) -> Result<bool> {
    match t.level() {
        IsolationLevel::ReadCommitted => read_committed(tids, t, v),
        IsolationLevel::RepeatableRead => repeatable_read(tids, t, v),
    }
}

/// READ COMMITTED: own uncommitted writes, plus whatever is committed
/// right now. A version stays visible while its deleter is still in
/// flight, and a transaction keeps seeing versions it deleted itself.
fn read_committed(tids: &TxnIdStore, t: &Transaction, v: &Version) -> Result<bool> {
    if v.xmin == t.xid() && v.xmax == 0 {
        return Ok(true);
    }
    if !tids.is_committed(v.xmin)? {
        return Ok(false);
    }
    Ok(v.xmax == 0 || v.xmax == t.xid() || !tids.is_committed(v.xmax)?)
}

/// REPEATABLE READ: the world as of begin. A creator that was active at
/// begin, or that began later, is invisible; a deleter that was active
/// at begin, began later, or never committed does not count as a
/// delete.
fn repeatable_read(tids: &TxnIdStore, t: &Transaction, v: &Version) -> Result<bool> {
    if v.xmin == t.xid() && v.xmax == 0 {
        return Ok(true);
    }
    if v.xmin >= t.xid() || t.in_snapshot(v.xmin) || !tids.is_committed(v.xmin)? {
        return Ok(false);
    }
    if v.xmax == 0 || v.xmax == t.xid() {
        return Ok(true);
    }
    Ok(!tids.is_committed(v.xmax)? || v.xmax > t.xid() || t.in_snapshot(v.xmax))
}

/// The delete-time skip test. A REPEATABLE READ transaction must not
/// overwrite a delete it cannot see: if the version's deleter committed
/// but began after `t` or was active at `t`'s begin, the delete raises
/// ConcurrentUpdate instead. Never fires at READ COMMITTED.
pub fn version_skipped(tids: &TxnIdStore, t: &Transaction, v: &Version) -> Result<bool> {
    if t.level() == IsolationLevel::ReadCommitted {
        return Ok(false);
    }
    if v.xmax == 0 {
        return Ok(false);
    }
    Ok(tids.is_committed(v.xmax)? && (v.xmax > t.xid() || t.in_snapshot(v.xmax)))
}
