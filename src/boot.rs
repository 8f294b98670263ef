use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::{Error, Result};

/// An atomically replaceable 8-byte cell holding the uid of the head of
/// the table list.
///
/// Updates write a scratch file and rename it over the live one, so a
/// crash at any point leaves either the old or the new value intact; a
/// leftover scratch file is deleted at open.
pub struct BootCell {
    path: PathBuf,
    tmp_path: PathBuf,
}

fn paths(base: &Path) -> (PathBuf, PathBuf) {
    let mut path = base.as_os_str().to_owned();
    let mut tmp = path.clone();
    path.push(".bt");
    tmp.push(".bt_tmp");
    (PathBuf::from(path), PathBuf::from(tmp))
}

impl BootCell {
    pub fn create<P: AsRef<Path>>(base: P) -> Result<Self> {
        let (path, tmp_path) = paths(base.as_ref());
        if path.exists() {
            return Err(Error::FileExists(path.display().to_string()));
        }
        let cell = Self { path, tmp_path };
        write_sync(&cell.path, 0)?;
        Ok(cell)
    }

    /// Open an existing cell, discarding any half-finished update.
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let (path, tmp_path) = paths(base.as_ref());
        if tmp_path.exists() {
            debug!("removing stale boot scratch file");
            fs::remove_file(&tmp_path)?;
        }
        if !path.exists() {
            return Err(Error::FileNotExists(path.display().to_string()));
        }
        Ok(Self { path, tmp_path })
    }

    pub fn load(&self) -> Result<u64> {
        let bytes = fs::read(&self.path)?;
        if bytes.len() != 8 {
            return Err(Error::InvalidPkgData);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Replace the cell value: scratch write, fsync, rename.
    pub fn store(&self, value: u64) -> Result<()> {
        write_sync(&self.tmp_path, value)?;
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}

fn write_sync(path: &Path, value: u64) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&value.to_le_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("db");
        let cell = BootCell::create(&base).unwrap();
        assert_eq!(cell.load().unwrap(), 0);
        cell.store(0xfeed).unwrap();
        assert_eq!(cell.load().unwrap(), 0xfeed);

        let reopened = BootCell::open(&base).unwrap();
        assert_eq!(reopened.load().unwrap(), 0xfeed);
    }

    #[test]
    fn test_stale_scratch_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("db");
        {
            let cell = BootCell::create(&base).unwrap();
            cell.store(7).unwrap();
        }
        // a crash between scratch write and rename leaves this behind
        fs::write(dir.path().join("db.bt_tmp"), &99u64.to_le_bytes()).unwrap();

        let cell = BootCell::open(&base).unwrap();
        assert_eq!(cell.load().unwrap(), 7);
        assert!(!dir.path().join("db.bt_tmp").exists());
    }
}
