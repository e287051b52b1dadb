//! TinySQL - embedded key-value engine with table-scoped B+Tree indexes,
//! a text write-ahead log and single-writer transactions

pub mod config;
pub mod error;
pub mod executor;
pub mod sql;
pub mod storage;

pub use config::{Config, StorageConfig};
pub use error::{TinyError, TinyResult};
pub use executor::{ExecutionError, ExecutionResult, QueryResult, Row};
pub use sql::{KeyValue, ParseError, Statement, parse};
pub use storage::{Database, StorageEngine, TxnId};
