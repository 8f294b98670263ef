//! micro-db: a small embedded relational database.
//!
//! Tables live on local disk behind a paged, reference-counted buffer
//! cache; every mutation is written ahead to a checksummed log and
//! replayed in three passes after a crash. Rows are multi-versioned
//! with per-transaction visibility under READ COMMITTED and REPEATABLE
//! READ, guarded by a deadlock-detecting lock manager, and indexed by
//! persistent B+trees. A thread-per-connection TCP server speaks a
//! hex-line packet protocol and a restricted SQL dialect on top.

pub mod boot;
pub mod btree;
pub mod catalog;
pub mod database;
pub mod error;
pub mod parser;
pub mod server;
pub mod storage;
pub mod transaction;
pub mod utils;
pub mod version;

pub use database::Database;
pub use error::{Error, Result};
