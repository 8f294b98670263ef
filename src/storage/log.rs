use std::path::Path;

use log::{info, warn};

use crate::{
    error::Result,
    utils::{get_u32, DbFile},
};

/// Space reserved at the head of the file for a total-length
/// placeholder. Readers walk frame by frame and ignore it.
const HEADER_LEN: u64 = 4;

const CHECKSUM_SEED: u32 = 13331;

/// Append-only write-ahead log.
///
/// # Format
///
/// - 4 bytes: placeholder header
/// - frames: `[payload_len:4][checksum:4][payload]`
///
/// A torn tail (truncated frame or checksum mismatch) is the normal
/// signature of a crash mid-append; `open` discards everything from the
/// first bad frame on.
pub struct WalLog {
    file: DbFile,
}

fn checksum(payload: &[u8]) -> u32 {
    payload.iter().fold(0u32, |sum, &b| {
        sum.wrapping_mul(CHECKSUM_SEED).wrapping_add(b as u32)
    })
}

impl WalLog {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = DbFile::create(path)?;
        file.write_at_sync(0, &[0u8; HEADER_LEN as usize])?;
        Ok(Self { file })
    }

    /// Open an existing log, dropping any torn tail so that appends
    /// resume after the last intact frame.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let log = Self {
            file: DbFile::open(path)?,
        };
        let (frames, good_end) = log.scan()?;
        if good_end < log.file.len()? {
            warn!(
                "log has a torn tail, keeping {} frames ({} bytes)",
                frames.len(),
                good_end
            );
            log.file.set_len(good_end)?;
        }
        Ok(log)
    }

    /// Append one frame, forced to stable storage before returning.
    pub fn append(&self, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(8 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&checksum(payload).to_le_bytes());
        frame.extend_from_slice(payload);
        self.file.append_sync(&frame)?;
        Ok(())
    }

    /// All intact frame payloads in file order, and the byte offset
    /// just past the last intact frame.
    pub fn scan(&self) -> Result<(Vec<Vec<u8>>, u64)> {
        let len = self.file.len()?;
        let mut raw = vec![0u8; (len - HEADER_LEN.min(len)) as usize];
        if len > HEADER_LEN {
            self.file.read_at(HEADER_LEN, &mut raw)?;
        }

        let mut frames = Vec::new();
        let mut pos = 0usize;
        loop {
            if pos + 8 > raw.len() {
                break;
            }
            let payload_len = get_u32(&raw[pos..]) as usize;
            let expect = get_u32(&raw[pos + 4..]);
            if pos + 8 + payload_len > raw.len() {
                break;
            }
            let payload = &raw[pos + 8..pos + 8 + payload_len];
            if checksum(payload) != expect {
                break;
            }
            frames.push(payload.to_vec());
            pos += 8 + payload_len;
        }
        info!("log scan found {} intact frames", frames.len());
        Ok((frames, HEADER_LEN + pos as u64))
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_scan_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = WalLog::create(dir.path().join("t.log")).unwrap();
        log.append(b"alpha").unwrap();
        log.append(b"beta").unwrap();
        let (frames, _) = log.scan().unwrap();
        assert_eq!(frames, vec![b"alpha".to_vec(), b"beta".to_vec()]);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        {
            let log = WalLog::create(&path).unwrap();
            log.append(b"keep me").unwrap();
        }
        // simulate a torn append
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[9, 0, 0, 0, 1, 2]).unwrap();
        drop(f);

        let log = WalLog::open(&path).unwrap();
        let (frames, _) = log.scan().unwrap();
        assert_eq!(frames, vec![b"keep me".to_vec()]);
        // appends resume cleanly after the trim
        log.append(b"and me").unwrap();
        let (frames, _) = log.scan().unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_corrupt_checksum_stops_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        {
            let log = WalLog::create(&path).unwrap();
            log.append(b"first").unwrap();
            log.append(b"second").unwrap();
        }
        // flip one payload byte of the second frame
        let mut bytes = std::fs::read(&path).unwrap();
        let second_payload = 4 + 8 + 5 + 8;
        bytes[second_payload] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let log = WalLog::open(&path).unwrap();
        let (frames, _) = log.scan().unwrap();
        assert_eq!(frames, vec![b"first".to_vec()]);
    }
}
