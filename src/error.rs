use std::io;

use thiserror::Error;

/// Every failure the engine can report. The serving layer forwards
/// these verbatim inside an error packet; fatal startup conditions
/// terminate the process after they are logged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cache is full")]
    CacheFull,

    #[error("file already exists: {0}")]
    FileExists(String),

    #[error("file not exists: {0}")]
    FileNotExists(String),

    #[error("file cannot be read or written: {0}")]
    FileCannotRW(String),

    #[error("bad log file")]
    BadLogFile,

    #[error("bad xid file")]
    BadXidFile,

    #[error("database is busy")]
    DatabaseBusy,

    #[error("deadlock")]
    Deadlock,

    #[error("concurrent update")]
    ConcurrentUpdate,

    #[error("null entry")]
    NullEntry,

    #[error("data too large")]
    DataTooLarge,

    #[error("nested transaction not supported")]
    NestedTransaction,

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("duplicated table: {0}")]
    DuplicatedTable(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("field not indexed: {0}")]
    FieldNotIndexed(String),

    #[error("invalid values")]
    InvalidValues,

    #[error("invalid field type: {0}")]
    InvalidField(String),

    #[error("invalid logic operator: {0}")]
    InvalidLogOp(String),

    #[error("invalid command")]
    InvalidCommand,

    #[error("invalid memory budget")]
    InvalidMem,

    #[error("invalid package data")]
    InvalidPkgData,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for the two conditions that internally abort the offending
    /// transaction and latch onto it, poisoning every later operation.
    pub fn aborts_transaction(&self) -> bool {
        matches!(self, Error::Deadlock | Error::ConcurrentUpdate)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
