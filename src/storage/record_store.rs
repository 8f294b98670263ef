use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};

use super::{
    cache::{CacheSource, RcCache},
    page::{Page, PAGE_SIZE},
    record::{Record, RECORD_HEADER, VALID_LIVE},
    recovery, uid_of, uid_page, FreeSpaceIndex, PageCache, Uid, WalLog,
};

/// Largest user payload a page can carry: page header, valid byte and
/// size field all come out of the page first.
pub const MAX_USER_PAYLOAD: usize = PAGE_SIZE - 2 - 1 - 2;

/// Bounded retries when placement races lose or pages fill up.
const PLACE_ATTEMPTS: usize = 5;

/// Carves variable-length records out of pages.
///
/// Records are immutable in size after insert and are never physically
/// removed; deletion is a flipped valid flag (recovery undo) or a
/// version-layer tombstone. Record handles are cached by uid with the
/// same one-loader-per-key discipline as the page pool, since building
/// one costs a page fetch and a header parse.
pub struct RecordStore {
    pages: Arc<PageCache>,
    wal: Arc<WalLog>,
    free: FreeSpaceIndex,
    records: RcCache<Uid, Arc<Record>>,
}

/// A pinned record handle; returns its cache pin when dropped.
pub struct RecordRef {
    store: Arc<RecordStore>,
    record: Arc<Record>,
}

struct RecordSource<'a> {
    pages: &'a Arc<PageCache>,
}

impl<'a> CacheSource<Uid, Arc<Record>> for RecordSource<'a> {
    fn load(&self, uid: &Uid) -> Result<Arc<Record>> {
        let pin = self.pages.get(uid_page(*uid))?;
        Ok(Arc::new(Record::parse(*uid, pin)))
    }

    fn on_unpinned(&self, _uid: &Uid, _record: &Arc<Record>) -> Result<()> {
        Ok(())
    }

    fn on_evict(&self, _uid: &Uid, _record: &Arc<Record>) -> Result<()> {
        // the record's page pin is returned when the last handle drops
        Ok(())
    }
}

impl RecordStore {
    pub fn new(pages: Arc<PageCache>, wal: Arc<WalLog>, record_cache_cap: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            wal,
            free: FreeSpaceIndex::new(),
            records: RcCache::new(record_cache_cap),
        })
    }

    pub fn pages(&self) -> &Arc<PageCache> {
        &self.pages
    }

    pub fn wal(&self) -> &Arc<WalLog> {
        &self.wal
    }

    /// Re-index every page's free space. Called once at open, after
    /// recovery has settled the file.
    pub fn rebuild_free_space(&self) -> Result<()> {
        self.free.rebuild(&self.pages)
    }

    /// Place `payload` as a fresh record, logging before the page is
    /// touched. Returns the record's uid.
    pub fn insert(self: &Arc<Self>, xid: u64, payload: &[u8]) -> Result<Uid> {
        if payload.len() > MAX_USER_PAYLOAD {
            return Err(Error::DataTooLarge);
        }

        let mut record_bytes = Vec::with_capacity(RECORD_HEADER + payload.len());
        record_bytes.push(VALID_LIVE);
        record_bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        record_bytes.extend_from_slice(payload);

        for _ in 0..PLACE_ATTEMPTS {
            let (page_no, _) = match self.free.select(record_bytes.len()) {
                Some(found) => found,
                None => {
                    let no = self.pages.new_page(&Page::blank_image())?;
                    self.free.add(no, PAGE_SIZE - 2);
                    continue;
                }
            };

            let pin = self.pages.get(page_no)?;
            let offset = pin.fso();
            if PAGE_SIZE - (offset as usize) < record_bytes.len() {
                // stale free-space info; put the page back as-is
                self.free.add(page_no, pin.free_bytes());
                continue;
            }

            // WAL rule: the INSERT frame is durable before the page
            // mutates. The page left the free index above, so no other
            // writer can move its FSO under us.
            let frame = recovery::insert_frame(xid, page_no, offset, &record_bytes);
            self.wal.append(&frame)?;

            let new_fso = offset + record_bytes.len() as u16;
            pin.write_with(|d| {
                d[offset as usize..offset as usize + record_bytes.len()]
                    .copy_from_slice(&record_bytes);
                Page::set_fso(d, new_fso);
            });

            self.free.add(page_no, PAGE_SIZE - new_fso as usize);
            let uid = uid_of(page_no, offset);
            debug!("inserted {} bytes as record {:#x}", payload.len(), uid);
            return Ok(uid);
        }

        Err(Error::DatabaseBusy)
    }

    /// Fetch the record at `uid`. Returns `None` when the record has
    /// been logically deleted.
    pub fn read(self: &Arc<Self>, uid: Uid) -> Result<Option<RecordRef>> {
        let source = RecordSource { pages: &self.pages };
        let record = self.records.get(uid, &source)?;
        if !record.is_valid() {
            self.records.release(&uid, &source)?;
            return Ok(None);
        }
        Ok(Some(RecordRef {
            store: self.clone(),
            record,
        }))
    }

    /// Fetch the record at `uid` whether or not it is logically
    /// deleted. Structure walks (the catalog's table chain) use this so
    /// a dead link record still yields its successor pointer.
    pub fn read_any(self: &Arc<Self>, uid: Uid) -> Result<RecordRef> {
        let source = RecordSource { pages: &self.pages };
        let record = self.records.get(uid, &source)?;
        Ok(RecordRef {
            store: self.clone(),
            record,
        })
    }

    /// Flush everything and close the underlying page pool and log.
    pub fn close(&self) -> Result<()> {
        let source = RecordSource { pages: &self.pages };
        self.records.clear(&source)?;
        self.pages.close()?;
        self.wal.sync()
    }
}

impl RecordRef {
    pub fn record(&self) -> &Arc<Record> {
        &self.record
    }
}

impl std::ops::Deref for RecordRef {
    type Target = Record;

    fn deref(&self) -> &Record {
        &self.record
    }
}

impl Drop for RecordRef {
    fn drop(&mut self) {
        let source = RecordSource {
            pages: &self.store.pages,
        };
        let _ = self.store.records.release(&self.record.uid(), &source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_store() -> (tempfile::TempDir, Arc<RecordStore>) {
        let dir = tempfile::tempdir().unwrap();
        let pages = PageCache::create(dir.path().join("t.db"), 0).unwrap();
        pages.new_page(&[0u8; PAGE_SIZE]).unwrap(); // page 1 reserved
        let wal = Arc::new(WalLog::create(dir.path().join("t.log")).unwrap());
        let store = RecordStore::new(pages, wal, 0);
        (dir, store)
    }

    #[test]
    fn test_insert_then_read_back() {
        let (_dir, store) = fresh_store();
        let uid = store.insert(7, b"hello record").unwrap();
        let rec = store.read(uid).unwrap().expect("record must be live");
        assert_eq!(rec.payload(), b"hello record");
        assert_eq!(rec.size(), 12);
    }

    #[test]
    fn test_fso_advances_past_each_record() {
        let (_dir, store) = fresh_store();
        let uid = store.insert(7, b"abc").unwrap();
        let page = store.pages().get(uid_page(uid)).unwrap();
        let offset = (uid & 0xffff) as u16;
        assert_eq!(page.fso(), offset + 3 + 3);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let (_dir, store) = fresh_store();
        // total record length PAGE_SIZE-2 fits, one byte more does not
        let max = vec![0u8; MAX_USER_PAYLOAD];
        store.insert(7, &max).unwrap();
        let over = vec![0u8; MAX_USER_PAYLOAD + 1];
        match store.insert(7, &over) {
            Err(Error::DataTooLarge) => {}
            other => panic!("expected DataTooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_update_protocol_roundtrip() {
        let (_dir, store) = fresh_store();
        let uid = store.insert(7, b"xxxx").unwrap();
        let rec = store.read(uid).unwrap().unwrap();
        {
            let _w = rec.write_lock();
            rec.before_write();
            rec.write_payload(0, b"yyyy");
            rec.after_write(7, store.wal()).unwrap();
        }
        assert_eq!(rec.payload(), b"yyyy");

        // undo path restores the snapshot
        {
            let _w = rec.write_lock();
            rec.before_write();
            rec.write_payload(0, b"zzzz");
            rec.undo_write();
        }
        assert_eq!(rec.payload(), b"yyyy");
    }
}
