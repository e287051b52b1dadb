//! Storage engine module: in-memory B+Tree indexes made durable by a
//! write-ahead log

pub mod btree;
pub mod engine;
pub mod transaction;
pub mod wal;

// Re-export core types
pub use btree::BPlusTree;
pub use engine::StorageEngine;
pub use transaction::{Overlay, TxnState};
pub use wal::{ReplayedState, TxnId, WalManager, WalRecord};

// Create alias for compatibility
pub use engine::StorageEngine as Database;
