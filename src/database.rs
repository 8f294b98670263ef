use std::{path::Path, sync::Arc};

use log::{info, warn};

use crate::{
    boot::BootCell,
    catalog::TableManager,
    error::Result,
    storage::{
        recovery, stamp_close_witness, stamp_open_witness, witness_is_clean, PageCache,
        RecordStore, WalLog, PAGE_SIZE,
    },
    transaction::TxnIdStore,
    version::VersionStore,
};

/// The coordinator: owns the wiring of every subsystem and drives the
/// open / recover / close lifecycle.
///
/// All files share a base path `p`: `p.db` (data), `p.log` (WAL),
/// `p.xid` (transaction statuses), `p.bt` / `p.bt_tmp` (boot cell).
pub struct Database {
    tables: Arc<TableManager>,
}

fn suffixed(base: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    std::path::PathBuf::from(name)
}

impl Database {
    /// Build a fresh database at `base` and close it cleanly. Refuses
    /// to clobber existing files.
    pub fn create<P: AsRef<Path>>(base: P, page_capacity: usize) -> Result<()> {
        let base = base.as_ref();
        TxnIdStore::create(suffixed(base, ".xid"))?;
        WalLog::create(suffixed(base, ".log"))?;
        let pages = PageCache::create(suffixed(base, ".db"), page_capacity)?;
        // page 1: the witness page, born clean (both regions zero)
        pages.new_page(&[])?;
        BootCell::create(base)?;
        info!("created database at {}", base.display());
        Ok(())
    }

    /// Open an existing database, recovering first when the previous
    /// run did not close cleanly.
    pub fn open<P: AsRef<Path>>(base: P, page_capacity: usize) -> Result<Self> {
        let base = base.as_ref();
        let tids = Arc::new(TxnIdStore::open(suffixed(base, ".xid"))?);
        let wal = Arc::new(WalLog::open(suffixed(base, ".log"))?);
        let pages = PageCache::open(suffixed(base, ".db"), page_capacity)?;

        {
            let witness = pages.get(1)?;
            if !witness_is_clean(&witness) {
                warn!("unclean shutdown detected, running recovery");
                recovery::run(&wal, &pages, &tids)?;
            }
            stamp_open_witness(&witness);
            pages.flush(&witness)?;
        }

        let records = RecordStore::new(pages, wal, 0);
        records.rebuild_free_space()?;
        let version = VersionStore::new(records, tids);
        let boot = BootCell::open(base)?;
        let tables = Arc::new(TableManager::open(version, boot)?);

        info!("database open at {}", base.display());
        Ok(Self { tables })
    }

    pub fn tables(&self) -> &Arc<TableManager> {
        &self.tables
    }

    pub fn version(&self) -> &Arc<VersionStore> {
        self.tables.version_store()
    }

    /// Flush everything, stamp the clean witness, close the files.
    pub fn close(&self) -> Result<()> {
        let records = self.version().records().clone();
        {
            let witness = records.pages().get(1)?;
            stamp_close_witness(&witness);
        }
        records.close()?;
        info!("database closed");
        Ok(())
    }

    /// A page capacity from a byte budget; 0 stays unbounded.
    pub fn capacity_for(memory_bytes: u64) -> usize {
        (memory_bytes as usize) / PAGE_SIZE
    }
}
