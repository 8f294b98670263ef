use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use log::{debug, warn};

use crate::{
    error::Result,
    utils::DbFile,
};

use super::{
    cache::{CacheSource, RcCache},
    page::{Page, PAGE_SIZE},
};

/// Reference-counted pool of pages over the single data file.
///
/// Misses load from disk with exactly one reader per page number;
/// concurrent requesters share the loaded page. A full pool with no
/// unpinned page refuses further misses. Pages write back when their
/// last pin is returned (if dirty) and when evicted or flushed.
pub struct PageCache {
    file: DbFile,
    cache: RcCache<u32, Arc<Page>>,
    // serialises file extension so new pages get distinct numbers
    grow: Mutex<()>,
}

/// A pinned page. The pin is returned when the handle drops.
pub struct PagePin {
    cache: Arc<PageCache>,
    page: Arc<Page>,
}

struct PageSource<'a> {
    file: &'a DbFile,
}

impl<'a> PageSource<'a> {
    fn write_back(&self, page: &Arc<Page>) -> Result<()> {
        if page.is_dirty() {
            flush_to(self.file, page)?;
        }
        Ok(())
    }
}

impl<'a> CacheSource<u32, Arc<Page>> for PageSource<'a> {
    fn load(&self, no: &u32) -> Result<Arc<Page>> {
        debug!("page miss, reading page {} from disk", no);
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file.read_at((*no as u64 - 1) * PAGE_SIZE as u64, &mut buf)?;
        Ok(Arc::new(Page::new(*no, buf)))
    }

    fn on_unpinned(&self, _no: &u32, page: &Arc<Page>) -> Result<()> {
        self.write_back(page)
    }

    fn on_evict(&self, _no: &u32, page: &Arc<Page>) -> Result<()> {
        self.write_back(page)
    }
}

fn flush_to(file: &DbFile, page: &Page) -> Result<()> {
    let image = page.snapshot();
    file.write_at_sync((page.no() as u64 - 1) * PAGE_SIZE as u64, &image)?;
    page.clear_dirty();
    Ok(())
}

impl PageCache {
    /// `capacity` is the maximum number of resident pages; 0 means
    /// unbounded.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Arc<Self>> {
        let file = DbFile::open(path)?;
        Ok(Arc::new(Self {
            file,
            cache: RcCache::new(capacity),
            grow: Mutex::new(()),
        }))
    }

    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Arc<Self>> {
        let file = DbFile::create(path)?;
        Ok(Arc::new(Self {
            file,
            cache: RcCache::new(capacity),
            grow: Mutex::new(()),
        }))
    }

    /// Pin `page_no`, loading it on a miss.
    pub fn get(self: &Arc<Self>, page_no: u32) -> Result<PagePin> {
        let source = PageSource { file: &self.file };
        let page = self.cache.get(page_no, &source)?;
        Ok(PagePin {
            cache: self.clone(),
            page,
        })
    }

    fn release(&self, page_no: u32) -> Result<()> {
        let source = PageSource { file: &self.file };
        self.cache.release(&page_no, &source)
    }

    /// Append one page to the data file, filled with `initial` and
    /// zero-padded. The page is written through synchronously and not
    /// kept in the pool.
    pub fn new_page(&self, initial: &[u8]) -> Result<u32> {
        debug_assert!(initial.len() <= PAGE_SIZE);
        let _grow = self.grow.lock().unwrap();
        let len = self.file.len()?;
        let page_no = (len / PAGE_SIZE as u64) as u32 + 1;
        let mut image = vec![0u8; PAGE_SIZE];
        image[..initial.len()].copy_from_slice(initial);
        self.file.write_at_sync(len, &image)?;
        debug!("extended data file with page {}", page_no);
        Ok(page_no)
    }

    /// Write one page's bytes at its slot in the file.
    pub fn flush(&self, page: &Page) -> Result<()> {
        flush_to(&self.file, page)
    }

    /// Shrink the file to `max_pg` pages, dropping any torn tail the
    /// log cannot describe. Recovery-only; runs before pages are
    /// cached.
    pub fn truncate_by_page_no(&self, max_pg: u32) -> Result<()> {
        let _grow = self.grow.lock().unwrap();
        let want = max_pg as u64 * PAGE_SIZE as u64;
        if want < self.file.len()? {
            warn!("truncating data file to {} pages", max_pg);
            self.file.set_len(want)?;
        }
        Ok(())
    }

    pub fn page_count(&self) -> Result<u32> {
        Ok((self.file.len()? / PAGE_SIZE as u64) as u32)
    }

    /// Flush everything and drop the pool. No pins may be outstanding.
    pub fn close(&self) -> Result<()> {
        let source = PageSource { file: &self.file };
        self.cache.clear(&source)?;
        self.file.sync()
    }
}

impl PagePin {
    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }
}

impl std::ops::Deref for PagePin {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl Drop for PagePin {
    fn drop(&mut self) {
        if let Err(e) = self.cache.release(self.page.no()) {
            warn!("page {} release failed: {}", self.page.no(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_cache(cap: usize) -> (tempfile::TempDir, Arc<PageCache>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = PageCache::create(dir.path().join("t.db"), cap).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_new_page_numbers_from_one() {
        let (_dir, cache) = fresh_cache(0);
        assert_eq!(cache.new_page(&Page::blank_image()).unwrap(), 1);
        assert_eq!(cache.new_page(&Page::blank_image()).unwrap(), 2);
        assert_eq!(cache.page_count().unwrap(), 2);
    }

    #[test]
    fn test_write_back_on_unpin_then_reload() {
        let (_dir, cache) = fresh_cache(1);
        cache.new_page(&Page::blank_image()).unwrap();
        cache.new_page(&Page::blank_image()).unwrap();

        {
            let pin = cache.get(1).unwrap();
            pin.write_with(|d| d[1000] = 0xaa);
        }
        // capacity 1: getting page 2 evicts page 1
        let _p2 = cache.get(2).unwrap();
        drop(_p2);
        let pin = cache.get(1).unwrap();
        assert_eq!(pin.read_with(|d| d[1000]), 0xaa);
    }

    #[test]
    fn test_truncate_drops_tail_pages() {
        let (_dir, cache) = fresh_cache(0);
        for _ in 0..4 {
            cache.new_page(&Page::blank_image()).unwrap();
        }
        cache.truncate_by_page_no(2).unwrap();
        assert_eq!(cache.page_count().unwrap(), 2);
    }
}
