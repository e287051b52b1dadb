//! Main storage engine coordinating the indexes, the WAL and transactions

use crate::config::Config;
use crate::error::TinyResult;
use crate::executor::{ExecutionError, ExecutionResult, QueryResult, Row};
use crate::sql::{self, KeyValue, Statement};
use crate::storage::wal::validate_field;
use crate::storage::{BPlusTree, Overlay, TxnId, TxnState, WalManager};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

type Index = BPlusTree<String, String>;

/// Reject a write statement whose pairs could never be logged.
///
/// Runs before any pair is applied, so a bad pair anywhere in the list
/// leaves the statement without effect.
fn check_pairs(table: &str, pairs: &[KeyValue]) -> ExecutionResult<()> {
    validate_field("table", table)?;
    for pair in pairs {
        validate_field("key", &pair.key)?;
        validate_field("value", &pair.value)?;
    }
    Ok(())
}

/// Main storage engine
///
/// Every statement runs to completion under a single lock, so the table map,
/// the transaction slot and the order of WAL records always agree.
pub struct StorageEngine {
    state: Mutex<EngineState>,
    wal_path: PathBuf,
}

struct EngineState {
    tables: HashMap<String, Index>,
    wal: WalManager,
    txn: TxnState,
}

impl StorageEngine {
    /// Open the database described by `config`, replaying its WAL.
    pub fn open(config: &Config) -> TinyResult<Self> {
        std::fs::create_dir_all(&config.storage.data_dir)?;

        let wal_path = config.wal_path();
        let wal = WalManager::new(&wal_path, config.storage.sync_on_write)?;
        let replayed = wal.replay()?;

        let tables: HashMap<String, Index> = replayed
            .tables
            .into_iter()
            .map(|(name, entries)| (name, BPlusTree::from_entries(entries)))
            .collect();

        info!(
            path = %wal_path.display(),
            tables = tables.len(),
            "Storage engine opened"
        );

        Ok(Self {
            state: Mutex::new(EngineState {
                tables,
                wal,
                txn: TxnState::Idle,
            }),
            wal_path,
        })
    }

    /// Open a database whose WAL lives in `data_dir`, with default settings.
    pub fn open_in<P: AsRef<Path>>(data_dir: P) -> TinyResult<Self> {
        Self::open(&Config::with_data_dir(data_dir))
    }

    /// Execute a parsed statement.
    pub fn execute(&self, statement: &Statement) -> ExecutionResult<QueryResult> {
        let mut state = self.state.lock();
        debug!(?statement, "Executing statement");
        state.execute(statement)
    }

    /// Parse and execute one line of input, rendering the outcome as text.
    pub fn execute_str(&self, input: &str) -> String {
        match sql::parse(input) {
            Ok(statement) => match self.execute(&statement) {
                Ok(result) => result.to_string(),
                Err(e) => e.to_string(),
            },
            Err(e) => format!("Parse error: {}", e),
        }
    }

    /// Names of the committed tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of committed keys in a table.
    pub fn table_len(&self, table: &str) -> Option<usize> {
        self.state.lock().tables.get(table).map(BPlusTree::len)
    }

    pub fn active_transaction(&self) -> Option<TxnId> {
        self.state.lock().txn.id().cloned()
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    /// Force the WAL to disk.
    pub fn flush(&self) -> TinyResult<()> {
        self.state.lock().wal.flush()
    }
}

impl EngineState {
    fn execute(&mut self, statement: &Statement) -> ExecutionResult<QueryResult> {
        match statement {
            Statement::Begin => self.begin(),
            Statement::Commit => self.commit(),
            Statement::Rollback => self.rollback(),
            Statement::Insert { table, pairs } => match self.txn_view() {
                Some(mut txn) => txn.insert(table, pairs),
                None => self.insert(table, pairs),
            },
            Statement::Select { table, keys } => match self.txn_view() {
                Some(txn) => txn.select(table, keys),
                None => self.select(table, keys),
            },
            Statement::Update { table, pairs } => match self.txn_view() {
                Some(mut txn) => txn.update(table, pairs),
                None => self.update(table, pairs),
            },
            Statement::Delete { table, keys } => match self.txn_view() {
                Some(mut txn) => txn.delete(table, keys),
                None => self.delete(table, keys),
            },
            Statement::Drop { table } => match self.txn_view() {
                Some(mut txn) => txn.drop_table(table),
                None => self.drop_table(table),
            },
        }
    }

    fn txn_view(&mut self) -> Option<TxnView<'_>> {
        match &mut self.txn {
            TxnState::Active { id, overlay } => Some(TxnView {
                tables: &self.tables,
                id,
                overlay,
            }),
            TxnState::Idle => None,
        }
    }

    // Autocommit operations

    fn insert(&mut self, table: &str, pairs: &[KeyValue]) -> ExecutionResult<QueryResult> {
        check_pairs(table, pairs)?;

        let created = !self.tables.contains_key(table);
        let index = self.tables.entry(table.to_string()).or_default();

        let mut count = 0;
        for pair in pairs {
            if index.contains_key(&pair.key) {
                continue;
            }

            if let Err(e) = self.wal.append(None, table, &pair.key, &pair.value) {
                // Nothing reached the log for a table created by this statement
                if created && index.is_empty() {
                    self.tables.remove(table);
                }
                return Err(e.into());
            }

            index.insert(pair.key.clone(), pair.value.clone());
            count += 1;
        }

        Ok(QueryResult::Inserted {
            table: table.to_string(),
            count,
        })
    }

    fn select(&self, table: &str, keys: &[String]) -> ExecutionResult<QueryResult> {
        let index = self
            .tables
            .get(table)
            .ok_or_else(|| ExecutionError::TableNotFound(table.to_string()))?;

        let rows = if keys.is_empty() {
            index
                .range_query("", "")
                .into_iter()
                .map(|(key, value)| Row::committed(key, value))
                .collect()
        } else {
            keys.iter()
                .filter_map(|key| index.get(key).map(|value| Row::committed(key, value)))
                .collect()
        };

        Ok(QueryResult::rows(rows))
    }

    fn update(&mut self, table: &str, pairs: &[KeyValue]) -> ExecutionResult<QueryResult> {
        let index = self
            .tables
            .get_mut(table)
            .ok_or_else(|| ExecutionError::TableNotFound(table.to_string()))?;
        check_pairs(table, pairs)?;

        let mut count = 0;
        for pair in pairs {
            if !index.contains_key(&pair.key) {
                continue;
            }
            self.wal.append(None, table, &pair.key, &pair.value)?;
            index.insert(pair.key.clone(), pair.value.clone());
            count += 1;
        }

        if count == 0 {
            return Err(ExecutionError::NoKeysToUpdate);
        }

        Ok(QueryResult::Updated {
            table: table.to_string(),
            count,
        })
    }

    fn delete(&mut self, table: &str, keys: &[String]) -> ExecutionResult<QueryResult> {
        let index = self
            .tables
            .get_mut(table)
            .ok_or_else(|| ExecutionError::TableNotFound(table.to_string()))?;

        let mut count = 0;
        for key in keys {
            if !index.contains_key(key) {
                continue;
            }
            self.wal.delete(None, table, key)?;
            index.delete(key);
            count += 1;
        }

        if count == 0 {
            return Err(ExecutionError::NoKeysToDelete(table.to_string()));
        }

        Ok(QueryResult::Deleted {
            table: table.to_string(),
            count,
        })
    }

    fn drop_table(&mut self, table: &str) -> ExecutionResult<QueryResult> {
        if !self.tables.contains_key(table) {
            return Err(ExecutionError::TableNotFound(table.to_string()));
        }

        self.wal.drop_table(None, table)?;
        self.tables.remove(table);

        Ok(QueryResult::Dropped {
            table: table.to_string(),
        })
    }

    // Transaction control

    fn begin(&mut self) -> ExecutionResult<QueryResult> {
        if self.txn.is_active() {
            return Err(ExecutionError::TransactionAlreadyActive);
        }

        let id = TxnId::generate();
        self.wal.begin_tx(&id)?;
        self.txn = TxnState::Active {
            id: id.clone(),
            overlay: Overlay::new(),
        };

        info!(txn = %id, "Transaction started");
        Ok(QueryResult::Begun(id))
    }

    fn commit(&mut self) -> ExecutionResult<QueryResult> {
        let TxnState::Active { id, overlay } = mem::take(&mut self.txn) else {
            return Err(ExecutionError::NoActiveTransaction);
        };

        if overlay.is_empty() {
            debug!(txn = %id, "Committing transaction with no buffered changes");
        }

        // The live indexes change only once COMMIT_TX is in the log
        if let Err(e) = self.log_commit(&id, &overlay) {
            warn!(txn = %id, error = %e, "Commit failed, transaction is still active");
            self.txn = TxnState::Active { id, overlay };
            return Err(e.into());
        }

        self.apply_overlay(&overlay);

        info!(txn = %id, "Transaction committed");
        Ok(QueryResult::Committed(id))
    }

    /// Write the transaction's tagged records and its commit marker, in the
    /// order they are applied: dropped tables, upserts, deletes.
    fn log_commit(&self, id: &TxnId, overlay: &Overlay) -> TinyResult<()> {
        for table in overlay.dropped_tables() {
            self.wal.drop_table(Some(id), table)?;
        }

        for (table, kv) in overlay.changes() {
            for (key, value) in kv {
                self.wal.append(Some(id), table, key, value)?;
            }
        }

        for (table, keys) in overlay.deletes() {
            if overlay.is_dropped(table) {
                continue;
            }
            let Some(index) = self.tables.get(table) else {
                continue;
            };
            for key in keys.iter().filter(|k| index.contains_key(k)) {
                self.wal.delete(Some(id), table, key)?;
            }
        }

        self.wal.commit_tx(id)
    }

    fn apply_overlay(&mut self, overlay: &Overlay) {
        for table in overlay.dropped_tables() {
            self.tables.remove(table);
        }

        for (table, kv) in overlay.changes() {
            let index = self.tables.entry(table.clone()).or_default();
            for (key, value) in kv {
                index.insert(key.clone(), value.clone());
            }
        }

        for (table, keys) in overlay.deletes() {
            if let Some(index) = self.tables.get_mut(table) {
                for key in keys {
                    index.delete(key);
                }
            }
        }
    }

    fn rollback(&mut self) -> ExecutionResult<QueryResult> {
        let TxnState::Active { id, .. } = &self.txn else {
            return Err(ExecutionError::NoActiveTransaction);
        };

        self.wal.rollback_tx(id)?;
        let id = id.clone();
        self.txn = TxnState::Idle;

        info!(txn = %id, "Transaction rolled back");
        Ok(QueryResult::RolledBack(id))
    }
}

/// Statement execution inside the active transaction.
///
/// Reads see the committed indexes with the overlay layered on top; writes
/// only touch the overlay.
struct TxnView<'a> {
    tables: &'a HashMap<String, Index>,
    id: &'a TxnId,
    overlay: &'a mut Overlay,
}

impl TxnView<'_> {
    /// Committed index of a table, unless the transaction dropped it.
    fn base(&self, table: &str) -> Option<&Index> {
        if self.overlay.is_dropped(table) {
            None
        } else {
            self.tables.get(table)
        }
    }

    fn is_visible(&self, table: &str) -> bool {
        self.base(table).is_some() || self.overlay.has_changes(table)
    }

    fn lookup(&self, table: &str, key: &str) -> Option<Row> {
        if let Some(value) = self.overlay.pending_value(table, key) {
            return Some(Row::pending(key, value, self.id.clone()));
        }
        if self.overlay.is_deleted(table, key) {
            return None;
        }
        self.base(table)?
            .get(&key.to_string())
            .map(|value| Row::committed(key, value))
    }

    fn scan(&self, table: &str) -> Vec<Row> {
        let mut merged: BTreeMap<&str, Row> = BTreeMap::new();

        if let Some(index) = self.base(table) {
            for (key, value) in index.iter() {
                if !self.overlay.is_deleted(table, key) {
                    merged.insert(key, Row::committed(key, value));
                }
            }
        }

        if let Some(changes) = self.overlay.changes_for(table) {
            for (key, value) in changes {
                merged.insert(key, Row::pending(key, value, self.id.clone()));
            }
        }

        merged.into_values().collect()
    }

    fn ensure_table(&self, table: &str) -> ExecutionResult<()> {
        if self.overlay.is_dropped(table) && !self.overlay.has_changes(table) {
            return Err(ExecutionError::TableDroppedInTransaction(table.to_string()));
        }
        if !self.is_visible(table) {
            return Err(ExecutionError::TableNotFound(table.to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, table: &str, pairs: &[KeyValue]) -> ExecutionResult<QueryResult> {
        check_pairs(table, pairs)?;

        let mut count = 0;
        for pair in pairs {
            if self.lookup(table, &pair.key).is_some() {
                continue;
            }
            self.overlay.set(table, &pair.key, &pair.value);
            count += 1;
        }

        Ok(QueryResult::Inserted {
            table: table.to_string(),
            count,
        })
    }

    fn select(&self, table: &str, keys: &[String]) -> ExecutionResult<QueryResult> {
        if !self.is_visible(table) {
            return Err(ExecutionError::TableNotFound(table.to_string()));
        }

        let rows = if keys.is_empty() {
            self.scan(table)
        } else {
            keys.iter().filter_map(|key| self.lookup(table, key)).collect()
        };

        Ok(QueryResult::rows(rows))
    }

    fn update(&mut self, table: &str, pairs: &[KeyValue]) -> ExecutionResult<QueryResult> {
        self.ensure_table(table)?;
        check_pairs(table, pairs)?;

        let mut count = 0;
        for pair in pairs {
            if self.lookup(table, &pair.key).is_none() {
                continue;
            }
            self.overlay.set(table, &pair.key, &pair.value);
            count += 1;
        }

        if count == 0 {
            return Err(ExecutionError::NoKeysToUpdate);
        }

        Ok(QueryResult::Updated {
            table: table.to_string(),
            count,
        })
    }

    fn delete(&mut self, table: &str, keys: &[String]) -> ExecutionResult<QueryResult> {
        self.ensure_table(table)?;

        let mut count = 0;
        for key in keys {
            if self.lookup(table, key).is_none() {
                continue;
            }
            self.overlay.delete(table, key);
            count += 1;
        }

        if count == 0 {
            return Err(ExecutionError::NoKeysToDelete(table.to_string()));
        }

        Ok(QueryResult::Deleted {
            table: table.to_string(),
            count,
        })
    }

    fn drop_table(&mut self, table: &str) -> ExecutionResult<QueryResult> {
        if !self.is_visible(table) {
            return Err(ExecutionError::TableNotFound(table.to_string()));
        }

        self.overlay.drop_table(table);

        Ok(QueryResult::Dropped {
            table: table.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::parse;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn run(engine: &StorageEngine, input: &str) -> ExecutionResult<QueryResult> {
        engine.execute(&parse(input).unwrap())
    }

    #[test]
    fn test_autocommit_insert_select() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open_in(dir.path()).unwrap();

        assert_eq!(
            engine.execute_str("INSERT (b, 2), (a, 1) INTO T"),
            "Inserted 2 key(s) into table 'T'"
        );
        assert_eq!(engine.execute_str("SELECT * FROM T"), "a: 1\nb: 2");
        assert_eq!(engine.execute_str("SELECT b, zz FROM T"), "b: 2");
        assert_eq!(engine.execute_str("SELECT zz FROM T"), "No results");
    }

    #[test]
    fn test_insert_skips_existing_keys() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open_in(dir.path()).unwrap();

        engine.execute_str("INSERT (key_x, val_x), (key_y, val_y) INTO t");
        assert_eq!(
            engine.execute_str("INSERT (key_x, val_x_new), (key_z, val_z) INTO t"),
            "Inserted 1 key(s) into table 't'"
        );
        assert_eq!(engine.execute_str("SELECT key_x FROM t"), "key_x: val_x");
        assert_eq!(
            engine.execute_str("INSERT (key_x, again) INTO t"),
            "Inserted 0 key(s) into table 't'"
        );
    }

    #[test]
    fn test_update_only_existing_keys() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open_in(dir.path()).unwrap();

        engine.execute_str("INSERT (k1, v1) INTO t");
        assert_eq!(
            engine.execute_str("UPDATE t SET (k1, v2), (missing, v)"),
            "Updated 1 key(s) in table 't'"
        );
        assert_eq!(engine.execute_str("SELECT k1 FROM t"), "k1: v2");
        assert_eq!(engine.execute_str("UPDATE t SET (missing, v)"), "No keys found to update");
        assert_eq!(engine.execute_str("UPDATE nope SET (k, v)"), "Table 'nope' not found");
    }

    #[test]
    fn test_delete_and_drop() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open_in(dir.path()).unwrap();

        engine.execute_str("INSERT (a, 1), (b, 2) INTO t");
        assert_eq!(engine.execute_str("DELETE a, zz FROM t"), "Deleted 1 key(s) from table 't'");
        assert_eq!(
            engine.execute_str("DELETE zz FROM t"),
            "No key(s) found to delete in table 't'"
        );
        assert_eq!(engine.execute_str("DROP t"), "Table 't' dropped");
        assert_eq!(engine.execute_str("SELECT * FROM t"), "Table 't' not found");
        assert_eq!(engine.execute_str("DROP t"), "Table 't' not found");
    }

    #[test]
    fn test_emptied_table_still_exists() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open_in(dir.path()).unwrap();

        engine.execute_str("INSERT (a, 1) INTO t");
        engine.execute_str("DELETE a FROM t");
        assert_eq!(engine.execute_str("SELECT * FROM t"), "No results");
        assert_eq!(engine.table_names(), vec!["t".to_string()]);
    }

    #[test]
    fn test_transaction_state_errors() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open_in(dir.path()).unwrap();

        assert!(matches!(run(&engine, "COMMIT"), Err(ExecutionError::NoActiveTransaction)));
        assert!(matches!(run(&engine, "ROLLBACK"), Err(ExecutionError::NoActiveTransaction)));

        let Ok(QueryResult::Begun(id)) = run(&engine, "BEGIN") else {
            panic!("Expected transaction to start");
        };
        assert_eq!(engine.active_transaction(), Some(id.clone()));
        assert!(matches!(
            run(&engine, "BEGIN"),
            Err(ExecutionError::TransactionAlreadyActive)
        ));
        assert_eq!(engine.active_transaction(), Some(id));
    }

    #[test]
    fn test_pending_rows_are_tagged() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open_in(dir.path()).unwrap();

        engine.execute_str("INSERT (a, 1) INTO t");
        engine.execute_str("BEGIN");
        let id = engine.active_transaction().unwrap();
        engine.execute_str("INSERT (b, 2) INTO t");

        assert_eq!(
            engine.execute_str("SELECT * FROM t"),
            format!("a: 1\nb: [{}] 2", id)
        );
    }

    #[test]
    fn test_writes_to_dropped_table_rejected() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open_in(dir.path()).unwrap();

        engine.execute_str("INSERT (a, 1) INTO t");
        engine.execute_str("BEGIN");
        engine.execute_str("DROP t");

        assert!(matches!(
            run(&engine, "UPDATE t SET (a, 2)"),
            Err(ExecutionError::TableDroppedInTransaction(_))
        ));
        assert!(matches!(
            run(&engine, "DELETE a FROM t"),
            Err(ExecutionError::TableDroppedInTransaction(_))
        ));
        assert!(matches!(run(&engine, "SELECT * FROM t"), Err(ExecutionError::TableNotFound(_))));
    }

    #[test]
    fn test_whitespace_rejected_before_logging() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open_in(dir.path()).unwrap();

        let bad = Statement::Insert {
            table: "t".into(),
            pairs: vec![KeyValue::new("a b", "1")],
        };
        assert!(matches!(engine.execute(&bad), Err(ExecutionError::Storage(_))));
        assert!(engine.table_names().is_empty());

        engine.execute_str("BEGIN");
        assert!(matches!(engine.execute(&bad), Err(ExecutionError::Storage(_))));
        assert!(engine.execute_str("COMMIT").ends_with("committed."));
        assert!(engine.table_names().is_empty());
    }

    #[test]
    fn test_bad_pair_leaves_statement_without_effect() {
        let dir = tempdir().unwrap();
        let engine = StorageEngine::open_in(dir.path()).unwrap();
        engine.execute_str("INSERT (a, 1), (b, 2) INTO t");
        let log_before = std::fs::read_to_string(engine.wal_path()).unwrap();

        let insert = Statement::Insert {
            table: "t".into(),
            pairs: vec![KeyValue::new("c", "3"), KeyValue::new("d e", "4")],
        };
        let update = Statement::Update {
            table: "t".into(),
            pairs: vec![KeyValue::new("a", "9"), KeyValue::new("b", "x y")],
        };

        assert!(matches!(engine.execute(&insert), Err(ExecutionError::Storage(_))));
        assert!(matches!(engine.execute(&update), Err(ExecutionError::Storage(_))));
        assert_eq!(engine.execute_str("SELECT * FROM t"), "a: 1\nb: 2");
        assert_eq!(std::fs::read_to_string(engine.wal_path()).unwrap(), log_before);

        engine.execute_str("BEGIN");
        assert!(matches!(engine.execute(&insert), Err(ExecutionError::Storage(_))));
        assert!(matches!(engine.execute(&update), Err(ExecutionError::Storage(_))));
        assert_eq!(engine.execute_str("SELECT * FROM t"), "a: 1\nb: 2");
        engine.execute_str("COMMIT");

        assert_eq!(engine.execute_str("SELECT * FROM t"), "a: 1\nb: 2");
        let log = std::fs::read_to_string(engine.wal_path()).unwrap();
        assert!(log.starts_with(&log_before));
        assert!(log.lines().skip(2).all(|l| !l.starts_with("SET")));
    }
}
