use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::Mutex,
};

use crate::error::{Error, Result};

/// A file behind a mutex, exposing positioned reads and writes. Every
/// on-disk structure in the engine (data file, log, xid file) goes
/// through one of these; the lock serialises the seek+access pairs.
pub struct DbFile {
    file: Mutex<File>,
}

impl DbFile {
    /// Open an existing file for read/write. Missing file and missing
    /// permissions are distinct startup errors.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        if !p.exists() {
            return Err(Error::FileNotExists(p.display().to_string()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(p)
            .map_err(|_| Error::FileCannotRW(p.display().to_string()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Create a new file, refusing to clobber an existing one.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        if p.exists() {
            return Err(Error::FileExists(p.display().to_string()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(p)
            .map_err(|_| Error::FileCannotRW(p.display().to_string()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Write at `offset` and force the bytes to stable storage before
    /// returning.
    pub fn write_at_sync(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.sync_data()?;
        Ok(())
    }

    pub fn append_sync(&self, buf: &[u8]) -> Result<u64> {
        let mut file = self.file.lock().unwrap();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(buf)?;
        file.sync_data()?;
        Ok(offset)
    }

    pub fn len(&self) -> Result<u64> {
        let file = self.file.lock().unwrap();
        Ok(file.metadata()?.len())
    }

    pub fn set_len(&self, len: u64) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.set_len(len)?;
        file.sync_data()?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.sync_data()?;
        Ok(())
    }
}
