//! Transaction management

use crate::storage::TxnId;
use std::collections::{BTreeMap, BTreeSet};

/// Buffered effects of one transaction, not yet applied to live indexes.
///
/// A key is never both pending-upsert and pending-delete for the same table:
/// each operation removes the key from the opposite set. Dropping a table
/// discards everything buffered for it so far.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Overlay {
    dropped: BTreeSet<String>,
    changes: BTreeMap<String, BTreeMap<String, String>>,
    deletes: BTreeMap<String, BTreeSet<String>>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an upsert.
    pub fn set(&mut self, table: &str, key: &str, value: &str) {
        if let Some(keys) = self.deletes.get_mut(table) {
            keys.remove(key);
            if keys.is_empty() {
                self.deletes.remove(table);
            }
        }

        self.changes
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Buffer a deletion, cancelling any pending upsert of the key.
    pub fn delete(&mut self, table: &str, key: &str) {
        if let Some(kv) = self.changes.get_mut(table) {
            kv.remove(key);
            if kv.is_empty() {
                self.changes.remove(table);
            }
        }

        self.deletes
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string());
    }

    /// Mark a table for dropping and forget its pending changes.
    pub fn drop_table(&mut self, table: &str) {
        self.changes.remove(table);
        self.deletes.remove(table);
        self.dropped.insert(table.to_string());
    }

    pub fn is_dropped(&self, table: &str) -> bool {
        self.dropped.contains(table)
    }

    pub fn is_deleted(&self, table: &str, key: &str) -> bool {
        self.deletes
            .get(table)
            .is_some_and(|keys| keys.contains(key))
    }

    pub fn pending_value(&self, table: &str, key: &str) -> Option<&str> {
        self.changes
            .get(table)
            .and_then(|kv| kv.get(key))
            .map(String::as_str)
    }

    /// Pending upserts for one table.
    pub fn changes_for(&self, table: &str) -> Option<&BTreeMap<String, String>> {
        self.changes.get(table)
    }

    pub fn has_changes(&self, table: &str) -> bool {
        self.changes.contains_key(table)
    }

    pub fn is_empty(&self) -> bool {
        self.dropped.is_empty() && self.changes.is_empty() && self.deletes.is_empty()
    }

    pub fn dropped_tables(&self) -> impl Iterator<Item = &String> {
        self.dropped.iter()
    }

    pub fn changes(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, String>)> {
        self.changes.iter()
    }

    pub fn deletes(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.deletes.iter()
    }
}

/// Transaction slot of the engine. At most one transaction is active.
#[derive(Debug, Default)]
pub enum TxnState {
    #[default]
    Idle,
    Active { id: TxnId, overlay: Overlay },
}

impl TxnState {
    pub fn is_active(&self) -> bool {
        matches!(self, TxnState::Active { .. })
    }

    pub fn id(&self) -> Option<&TxnId> {
        match self {
            TxnState::Idle => None,
            TxnState::Active { id, .. } => Some(id),
        }
    }
}
