use std::{path::Path, sync::Mutex};

use log::info;

use crate::{
    error::{Error, Result},
    utils::{get_u64, DbFile},
};

use super::Xid;

/// The always-committed maintenance transaction.
pub const SUPER_XID: Xid = 0;

const COUNTER_LEN: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
}

impl TxnStatus {
    fn to_byte(self) -> u8 {
        match self {
            TxnStatus::Active => 0,
            TxnStatus::Committed => 1,
            TxnStatus::Aborted => 2,
        }
    }
}

/// Durable transaction-id allocator.
///
/// # Format
///
/// - 8 bytes: id counter `C`, little-endian
/// - `C` bytes: one status byte per handed-out id, id `n` at offset
///   `8 + n - 1`
///
/// A crash between the two `begin` writes leaves a status byte beyond
/// the counter; it is harmless because the id was never handed out and
/// `open` only trusts bytes covered by `C`.
pub struct TxnIdStore {
    inner: Mutex<Inner>,
}

struct Inner {
    file: DbFile,
    counter: u64,
}

impl TxnIdStore {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = DbFile::create(path)?;
        file.write_at_sync(0, &0u64.to_le_bytes())?;
        Ok(Self {
            inner: Mutex::new(Inner { file, counter: 0 }),
        })
    }

    /// Open an existing status file. The file length must be exactly
    /// `8 + C`; anything else is corruption.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = DbFile::open(path)?;
        let mut buf = [0u8; 8];
        file.read_at(0, &mut buf)?;
        let counter = get_u64(&buf);
        if file.len()? != COUNTER_LEN + counter {
            return Err(Error::BadXidFile);
        }
        info!("xid store opened, {} ids handed out", counter);
        Ok(Self {
            inner: Mutex::new(Inner { file, counter }),
        })
    }

    /// Allocate the next transaction id, durably marked ACTIVE. Both
    /// the status byte and the bumped counter are forced before the id
    /// escapes this call.
    pub fn begin(&self) -> Result<Xid> {
        let mut inner = self.inner.lock().unwrap();
        let xid = inner.counter + 1;
        inner
            .file
            .write_at_sync(COUNTER_LEN + xid - 1, &[TxnStatus::Active.to_byte()])?;
        inner.file.write_at_sync(0, &xid.to_le_bytes())?;
        inner.counter = xid;
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.set_status(xid, TxnStatus::Committed)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.set_status(xid, TxnStatus::Aborted)
    }

    fn set_status(&self, xid: Xid, status: TxnStatus) -> Result<()> {
        debug_assert_ne!(xid, SUPER_XID);
        let inner = self.inner.lock().unwrap();
        inner
            .file
            .write_at_sync(COUNTER_LEN + xid - 1, &[status.to_byte()])
    }

    pub fn status(&self, xid: Xid) -> Result<TxnStatus> {
        if xid == SUPER_XID {
            return Ok(TxnStatus::Committed);
        }
        let inner = self.inner.lock().unwrap();
        let mut buf = [0u8; 1];
        inner.file.read_at(COUNTER_LEN + xid - 1, &mut buf)?;
        Ok(match buf[0] {
            0 => TxnStatus::Active,
            1 => TxnStatus::Committed,
            _ => TxnStatus::Aborted,
        })
    }

    pub fn is_active(&self, xid: Xid) -> Result<bool> {
        Ok(self.status(xid)? == TxnStatus::Active)
    }

    pub fn is_committed(&self, xid: Xid) -> Result<bool> {
        Ok(self.status(xid)? == TxnStatus::Committed)
    }

    pub fn is_aborted(&self, xid: Xid) -> Result<bool> {
        Ok(self.status(xid)? == TxnStatus::Aborted)
    }
}
