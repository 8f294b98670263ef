use std::path::PathBuf;

use micro_db::Database;
use tempfile::TempDir;

/// Per-test scratch database. The directory lives as long as the
/// returned guard.
pub struct Scratch {
    pub dir: TempDir,
    pub base: PathBuf,
}

pub fn setup() -> Scratch {
    micro_db::utils::init_log();
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("test");
    Scratch { dir, base }
}

/// A freshly created and opened database.
pub fn fresh_db() -> (Scratch, Database) {
    let scratch = setup();
    Database::create(&scratch.base, 0).unwrap();
    let db = Database::open(&scratch.base, 0).unwrap();
    (scratch, db)
}

impl Scratch {
    pub fn reopen(&self) -> Database {
        Database::open(&self.base, 0).unwrap()
    }
}
