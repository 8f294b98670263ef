use std::sync::{
    atomic::{AtomicBool, Ordering},
    RwLock,
};

use rand::Rng;

use crate::utils::{get_u16, get_u64, put_u16, HandyRwLock};

pub const PAGE_SIZE: usize = 8192;

/// Offset of the free-space pointer in an ordinary page.
const FSO_OFFSET: usize = 0;
/// First byte usable by records.
pub(crate) const PAGE_HEADER: u16 = 2;

/// Start-witness regions on page 1. A fresh random value is written to
/// the first region at open and copied into the second at clean close;
/// inequality at open means the previous shutdown was dirty.
const WITNESS_OPEN: usize = 100;
const WITNESS_CLOSE: usize = 108;
const WITNESS_LEN: usize = 8;

/// One fixed-size block of the data file, pinned in the page cache.
/// The byte latch is the page's `RwLock`; the cache's bookkeeping never
/// holds it.
pub struct Page {
    no: u32,
    data: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
}

impl Page {
    pub fn new(no: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            no,
            data: RwLock::new(data.into_boxed_slice()),
            dirty: AtomicBool::new(false),
        }
    }

    /// A blank record page: FSO pointing just past its own header.
    pub fn blank_image() -> Vec<u8> {
        let mut image = vec![0u8; PAGE_SIZE];
        put_u16(&mut image[FSO_OFFSET..], PAGE_HEADER);
        image
    }

    pub fn no(&self) -> u32 {
        self.no
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Run `f` over the page bytes under the shared latch.
    pub fn read_with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.rl())
    }

    /// Run `f` over the page bytes under the exclusive latch and mark
    /// the page dirty.
    pub fn write_with<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let r = f(&mut self.data.wl());
        self.mark_dirty();
        r
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.rl().to_vec()
    }

    pub fn fso(&self) -> u16 {
        self.read_with(|d| get_u16(&d[FSO_OFFSET..]))
    }

    pub fn free_bytes(&self) -> usize {
        PAGE_SIZE - self.fso() as usize
    }

    pub(crate) fn set_fso(data: &mut [u8], fso: u16) {
        put_u16(&mut data[FSO_OFFSET..], fso);
    }

    pub(crate) fn get_fso(data: &[u8]) -> u16 {
        get_u16(&data[FSO_OFFSET..])
    }
}

/// Stamp page 1 with a fresh open witness; the close region is zeroed
/// until a clean shutdown copies the value over.
pub fn stamp_open_witness(page: &Page) {
    let value: [u8; WITNESS_LEN] = rand::thread_rng().gen();
    page.write_with(|d| {
        d[WITNESS_OPEN..WITNESS_OPEN + WITNESS_LEN].copy_from_slice(&value);
        for b in &mut d[WITNESS_CLOSE..WITNESS_CLOSE + WITNESS_LEN] {
            *b = 0;
        }
    });
}

/// Copy the open value into the close region, recording a clean stop.
pub fn stamp_close_witness(page: &Page) {
    page.write_with(|d| {
        let (open, rest) = d[WITNESS_OPEN..].split_at_mut(WITNESS_LEN);
        rest[..WITNESS_LEN].copy_from_slice(open);
    });
}

/// True when the two witness regions agree, i.e. the previous run
/// closed cleanly.
pub fn witness_is_clean(page: &Page) -> bool {
    page.read_with(|d| {
        get_u64(&d[WITNESS_OPEN..]) == get_u64(&d[WITNESS_CLOSE..])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_image_fso() {
        let page = Page::new(2, Page::blank_image());
        assert_eq!(page.fso(), PAGE_HEADER);
        assert_eq!(page.free_bytes(), PAGE_SIZE - 2);
    }

    #[test]
    fn test_witness_cycle() {
        let page = Page::new(1, vec![0u8; PAGE_SIZE]);
        stamp_open_witness(&page);
        assert!(!witness_is_clean(&page));
        stamp_close_witness(&page);
        assert!(witness_is_clean(&page));
        stamp_open_witness(&page);
        assert!(!witness_is_clean(&page));
    }
}
