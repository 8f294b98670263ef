use std::{collections::BTreeMap, sync::Mutex};

use log::debug;

use crate::error::Result;

use super::{page::PAGE_SIZE, PageCache};

const BUCKETS: usize = 40;

/// In-memory index of page free space, bucketed into 40 size classes
/// for first-fit placement. Not persisted; rebuilt from page headers at
/// open.
///
/// `select` removes the page it returns; after placing a record the
/// caller re-inserts the page with its updated free count. Pages are
/// bucketed by `floor(free * 40 / PAGE_SIZE)` and selection starts at
/// `ceil(required * 40 / PAGE_SIZE)`, so every candidate is guaranteed
/// to fit. A full page lands in bucket 0, which selection never
/// reaches.
pub struct FreeSpaceIndex {
    buckets: Mutex<BTreeMap<usize, Vec<(u32, usize)>>>,
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn add(&self, page_no: u32, free_bytes: usize) {
        let bucket = free_bytes * BUCKETS / PAGE_SIZE;
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(bucket).or_default().push((page_no, free_bytes));
    }

    /// Take any page with at least `required` free bytes, preferring
    /// the snuggest bucket. The returned page leaves the index.
    pub fn select(&self, required: usize) -> Option<(u32, usize)> {
        let first = (required * BUCKETS + PAGE_SIZE - 1) / PAGE_SIZE;
        let mut buckets = self.buckets.lock().unwrap();
        let bucket_no = buckets
            .range(first..)
            .find(|(_, pages)| !pages.is_empty())
            .map(|(&n, _)| n)?;
        let pages = buckets.get_mut(&bucket_no).unwrap();
        let entry = pages.pop();
        if pages.is_empty() {
            buckets.remove(&bucket_no);
        }
        entry
    }

    /// Scan every record page's free-space offset and re-index it.
    pub fn rebuild(&self, pages: &std::sync::Arc<PageCache>) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.clear();
        drop(buckets);

        let count = pages.page_count()?;
        for no in 2..=count {
            let pin = pages.get(no)?;
            self.add(no, pin.free_bytes());
        }
        debug!("free-space index rebuilt over {} pages", count.saturating_sub(1));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_removes_and_fits() {
        let index = FreeSpaceIndex::new();
        index.add(2, 1000);
        index.add(3, 4000);

        let (page, free) = index.select(900).unwrap();
        assert_eq!(page, 2);
        assert_eq!(free, 1000);
        // removed: selecting again skips to the larger page
        let (page, _) = index.select(900).unwrap();
        assert_eq!(page, 3);
        assert!(index.select(900).is_none());
    }

    #[test]
    fn test_full_page_is_never_selected() {
        let index = FreeSpaceIndex::new();
        index.add(2, 0);
        assert!(index.select(1).is_none());
    }

    #[test]
    fn test_candidate_always_fits() {
        let index = FreeSpaceIndex::new();
        // bucket floor(300*40/8192) = 1, but select(400) must not
        // return it: ceil(400*40/8192) = 2
        index.add(2, 300);
        assert!(index.select(400).is_none());
        index.add(3, 500);
        let (page, free) = index.select(400).unwrap();
        assert_eq!(page, 3);
        assert!(free >= 400);
    }
}
