//! Crash recovery: three passes over the write-ahead log, run at open
//! when the start witness shows an unclean shutdown.
//!
//! Committed and aborted transactions are replayed as logged (aborts
//! never physically undid their page writes; visibility hides them), so
//! redo restores everything that might have missed the data file.
//! Transactions still marked ACTIVE were abandoned mid-flight: their
//! frames are applied backwards — inserts re-materialised as dead
//! records, updates rolled back to the old image — and the transaction
//! is marked aborted. The whole procedure is idempotent under replay.

use std::{collections::HashMap, sync::Arc};

use log::info;

use crate::{
    error::Result,
    transaction::TxnIdStore,
    utils::{get_u16, get_u32, get_u64},
};

use super::{
    page::Page,
    record::{RECORD_HEADER, VALID_DEAD},
    uid_offset, uid_page, PageCache, Uid, WalLog,
};

const FRAME_INSERT: u8 = 0;
const FRAME_UPDATE: u8 = 1;

/// `[type=0:1][xid:8][page_no:4][offset:2][record_bytes…]`
pub fn insert_frame(xid: u64, page_no: u32, offset: u16, record_bytes: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(15 + record_bytes.len());
    frame.push(FRAME_INSERT);
    frame.extend_from_slice(&xid.to_le_bytes());
    frame.extend_from_slice(&page_no.to_le_bytes());
    frame.extend_from_slice(&offset.to_le_bytes());
    frame.extend_from_slice(record_bytes);
    frame
}

/// `[type=1:1][xid:8][uid:8][old:L][new:L]`
pub fn update_frame(xid: u64, uid: Uid, old: &[u8], new: &[u8]) -> Vec<u8> {
    debug_assert_eq!(old.len(), new.len());
    let mut frame = Vec::with_capacity(17 + old.len() * 2);
    frame.push(FRAME_UPDATE);
    frame.extend_from_slice(&xid.to_le_bytes());
    frame.extend_from_slice(&uid.to_le_bytes());
    frame.extend_from_slice(old);
    frame.extend_from_slice(new);
    frame
}

enum Frame<'a> {
    Insert {
        xid: u64,
        page_no: u32,
        offset: u16,
        record_bytes: &'a [u8],
    },
    Update {
        xid: u64,
        uid: Uid,
        old: &'a [u8],
        new: &'a [u8],
    },
}

impl<'a> Frame<'a> {
    fn parse(payload: &'a [u8]) -> Option<Self> {
        match *payload.first()? {
            FRAME_INSERT if payload.len() > 15 => Some(Frame::Insert {
                xid: get_u64(&payload[1..]),
                page_no: get_u32(&payload[9..]),
                offset: get_u16(&payload[13..]),
                record_bytes: &payload[15..],
            }),
            FRAME_UPDATE if payload.len() > 17 && (payload.len() - 17) % 2 == 0 => {
                let half = (payload.len() - 17) / 2;
                Some(Frame::Update {
                    xid: get_u64(&payload[1..]),
                    uid: get_u64(&payload[9..]),
                    old: &payload[17..17 + half],
                    new: &payload[17 + half..],
                })
            }
            _ => None,
        }
    }

    fn xid(&self) -> u64 {
        match self {
            Frame::Insert { xid, .. } | Frame::Update { xid, .. } => *xid,
        }
    }

    fn page_no(&self) -> u32 {
        match self {
            Frame::Insert { page_no, .. } => *page_no,
            Frame::Update { uid, .. } => uid_page(*uid),
        }
    }
}

/// Write `record_bytes` at `offset`, advancing FSO far enough to cover
/// the record (never backwards).
fn apply_insert(
    pages: &Arc<PageCache>,
    page_no: u32,
    offset: u16,
    record_bytes: &[u8],
) -> Result<()> {
    let pin = pages.get(page_no)?;
    pin.write_with(|d| {
        d[offset as usize..offset as usize + record_bytes.len()].copy_from_slice(record_bytes);
        let covered = offset + record_bytes.len() as u16;
        if Page::get_fso(d) < covered {
            Page::set_fso(d, covered);
        }
    });
    Ok(())
}

/// Overwrite the payload region of the record at `uid`.
fn apply_update(pages: &Arc<PageCache>, uid: Uid, image: &[u8]) -> Result<()> {
    let pin = pages.get(uid_page(uid))?;
    let start = uid_offset(uid) as usize + RECORD_HEADER;
    pin.write_with(|d| {
        d[start..start + image.len()].copy_from_slice(image);
    });
    Ok(())
}

/// The analyse / redo / undo driver.
pub fn run(wal: &WalLog, pages: &Arc<PageCache>, tids: &TxnIdStore) -> Result<()> {
    let (payloads, _) = wal.scan()?;
    let frames: Vec<Frame> = payloads.iter().filter_map(|p| Frame::parse(p)).collect();
    info!("recovery: replaying {} log frames", frames.len());

    // pass 1 - analyse: drop file pages the log cannot describe
    let max_pg = frames.iter().map(|f| f.page_no()).max().unwrap_or(1).max(1);
    pages.truncate_by_page_no(max_pg)?;

    // pass 2 - redo everything from settled transactions
    let mut redone = 0usize;
    for frame in &frames {
        if tids.is_active(frame.xid())? {
            continue;
        }
        match frame {
            Frame::Insert {
                page_no,
                offset,
                record_bytes,
                ..
            } => apply_insert(pages, *page_no, *offset, record_bytes)?,
            Frame::Update { uid, new, .. } => apply_update(pages, *uid, new)?,
        }
        redone += 1;
    }

    // pass 3 - undo abandoned transactions, newest frame first
    let mut abandoned: HashMap<u64, Vec<&Frame>> = HashMap::new();
    for frame in &frames {
        if tids.is_active(frame.xid())? {
            abandoned.entry(frame.xid()).or_default().push(frame);
        }
    }
    for (xid, history) in &abandoned {
        for frame in history.iter().rev() {
            match frame {
                Frame::Insert {
                    page_no,
                    offset,
                    record_bytes,
                    ..
                } => {
                    let mut dead = record_bytes.to_vec();
                    dead[0] = VALID_DEAD;
                    apply_insert(pages, *page_no, *offset, &dead)?;
                }
                Frame::Update { uid, old, .. } => apply_update(pages, *uid, old)?,
            }
        }
        tids.abort(*xid)?;
    }

    info!(
        "recovery done: {} frames redone, {} transactions rolled back",
        redone,
        abandoned.len()
    );
    Ok(())
}
