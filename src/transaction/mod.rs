mod id_store;
mod lock_manager;
mod tx;

pub use id_store::{TxnIdStore, TxnStatus, SUPER_XID};
pub use lock_manager::{LockManager, ParkLatch};
pub use tx::{IsolationLevel, Transaction};

/// 64-bit transaction identifier. Id 0 is the always-committed super
/// transaction used for maintenance writes.
pub type Xid = u64;
