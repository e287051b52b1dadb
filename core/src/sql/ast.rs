//! Statements understood by the engine

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Statement {
    Insert { table: String, pairs: Vec<KeyValue> },
    /// An empty key list selects every key.
    Select { table: String, keys: Vec<String> },
    Update { table: String, pairs: Vec<KeyValue> },
    Delete { table: String, keys: Vec<String> },
    Drop { table: String },
    Begin,
    Commit,
    Rollback,
}

impl Statement {
    /// Table the statement targets, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::Insert { table, .. }
            | Statement::Select { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. }
            | Statement::Drop { table } => Some(table),
            Statement::Begin | Statement::Commit | Statement::Rollback => None,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Select { .. })
    }
}
