use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    error::Result,
    utils::{get_u16, HandyRwLock},
};

use super::{page_cache::PagePin, recovery, uid_offset, Uid, WalLog};

/// Byte offsets inside a record: `[valid:1][size:2][payload:size]`.
const VALID_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 1;
pub(crate) const RECORD_HEADER: usize = 3;

pub(crate) const VALID_LIVE: u8 = 0;
pub(crate) const VALID_DEAD: u8 = 1;

/// Handle to one record inside a pinned page.
///
/// The handle keeps its page pinned for as long as it lives. The
/// record latch serialises logical access (the version layer's
/// reads/writes); the page latch is only ever taken briefly inside the
/// byte accessors, so the two never deadlock.
///
/// In-place updates follow a strict protocol: `before_write` snapshots
/// the payload, the caller mutates it, `after_write` appends the
/// UPDATE log frame (old and new image) — or `undo_write` rolls the
/// payload back without logging when the caller gives up.
pub struct Record {
    uid: Uid,
    page: PagePin,
    offset: usize,
    size: usize,
    latch: RwLock<()>,
    old_image: Mutex<Option<Vec<u8>>>,
}

impl Record {
    /// Parse the record header at `uid`'s offset. The page stays
    /// pinned by the returned handle.
    pub(crate) fn parse(uid: Uid, page: PagePin) -> Self {
        let offset = uid_offset(uid) as usize;
        let size = page.read_with(|d| get_u16(&d[offset + SIZE_OFFSET..])) as usize;
        Self {
            uid,
            page,
            offset,
            size,
            latch: RwLock::new(()),
            old_image: Mutex::new(None),
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Payload length in bytes; immutable for the record's lifetime.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_valid(&self) -> bool {
        self.page.read_with(|d| d[self.offset + VALID_OFFSET]) == VALID_LIVE
    }

    pub fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.latch.rl()
    }

    pub fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.latch.wl()
    }

    /// Copy of the payload bytes.
    pub fn payload(&self) -> Vec<u8> {
        let start = self.offset + RECORD_HEADER;
        self.page.read_with(|d| d[start..start + self.size].to_vec())
    }

    /// Overwrite payload bytes starting at `at`. The caller must hold
    /// the record write lock and have called `before_write`.
    pub fn write_payload(&self, at: usize, bytes: &[u8]) {
        debug_assert!(at + bytes.len() <= self.size);
        let start = self.offset + RECORD_HEADER + at;
        self.page.write_with(|d| {
            d[start..start + bytes.len()].copy_from_slice(bytes);
        });
    }

    /// Snapshot the current payload as the old image of an update.
    pub fn before_write(&self) {
        *self.old_image.lock().unwrap() = Some(self.payload());
    }

    /// Append the UPDATE log frame for the mutation bracketed by
    /// `before_write`, forcing it to disk. The caller's pin keeps the
    /// page from reaching disk before the frame does.
    pub fn after_write(&self, xid: u64, wal: &WalLog) -> Result<()> {
        let old = self
            .old_image
            .lock()
            .unwrap()
            .take()
            .expect("after_write without before_write");
        let frame = recovery::update_frame(xid, self.uid, &old, &self.payload());
        wal.append(&frame)
    }

    /// Roll the payload back to the `before_write` snapshot without
    /// logging.
    pub fn undo_write(&self) {
        if let Some(old) = self.old_image.lock().unwrap().take() {
            let start = self.offset + RECORD_HEADER;
            self.page.write_with(|d| {
                d[start..start + old.len()].copy_from_slice(&old);
            });
        }
    }
}
