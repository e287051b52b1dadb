//! Write-Ahead Logging implementation
//!
//! The log is newline-delimited text, one record per line, fields separated
//! by single spaces. Autocommit and transactional forms of SET, DELETE and
//! DROP TABLE differ only in their field count, so no field may contain
//! whitespace.

use crate::error::{TinyError, TinyResult};
use crate::storage::Overlay;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transaction ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TxnId(String);

impl TxnId {
    /// Generate a fresh id of the form `tx_<uuid>`.
    pub fn generate() -> Self {
        Self(format!("tx_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TxnId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// WAL record types. A `txn_id` of `None` marks an autocommit record.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    Set {
        txn_id: Option<TxnId>,
        table: String,
        key: String,
        value: String,
    },
    Delete {
        txn_id: Option<TxnId>,
        table: String,
        key: String,
    },
    DropTable {
        txn_id: Option<TxnId>,
        table: String,
    },
    BeginTx {
        txn_id: TxnId,
    },
    CommitTx {
        txn_id: TxnId,
    },
    RollbackTx {
        txn_id: TxnId,
    },
}

impl WalRecord {
    /// Decode one log line. Returns `None` for blank lines, unknown commands
    /// and records with the wrong number of fields.
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let command = parts.first()?.to_ascii_uppercase();
        let tx = |id: &str| Some(TxnId::from(id));

        let record = match (command.as_str(), parts.as_slice()) {
            ("SET", [_, table, key, value]) => WalRecord::Set {
                txn_id: None,
                table: table.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            },
            ("SET", [_, id, table, key, value]) => WalRecord::Set {
                txn_id: tx(id),
                table: table.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            },
            ("DELETE", [_, table, key]) => WalRecord::Delete {
                txn_id: None,
                table: table.to_string(),
                key: key.to_string(),
            },
            ("DELETE", [_, id, table, key]) => WalRecord::Delete {
                txn_id: tx(id),
                table: table.to_string(),
                key: key.to_string(),
            },
            ("DROP", [_, kw, table]) if kw.eq_ignore_ascii_case("TABLE") => {
                WalRecord::DropTable {
                    txn_id: None,
                    table: table.to_string(),
                }
            }
            ("DROP", [_, kw, id, table]) if kw.eq_ignore_ascii_case("TABLE") => {
                WalRecord::DropTable {
                    txn_id: tx(id),
                    table: table.to_string(),
                }
            }
            ("BEGIN_TX", [_, id]) => WalRecord::BeginTx { txn_id: TxnId::from(*id) },
            ("COMMIT_TX", [_, id]) => WalRecord::CommitTx { txn_id: TxnId::from(*id) },
            ("ROLLBACK_TX", [_, id]) => WalRecord::RollbackTx { txn_id: TxnId::from(*id) },
            _ => return None,
        };

        Some(record)
    }

    /// Reject records whose fields would not survive the text framing.
    fn validate(&self) -> TinyResult<()> {
        let txn_id = match self {
            WalRecord::Set {
                txn_id,
                table,
                key,
                value,
            } => {
                validate_field("table", table)?;
                validate_field("key", key)?;
                validate_field("value", value)?;
                txn_id.as_ref()
            }
            WalRecord::Delete { txn_id, table, key } => {
                validate_field("table", table)?;
                validate_field("key", key)?;
                txn_id.as_ref()
            }
            WalRecord::DropTable { txn_id, table } => {
                validate_field("table", table)?;
                txn_id.as_ref()
            }
            WalRecord::BeginTx { txn_id }
            | WalRecord::CommitTx { txn_id }
            | WalRecord::RollbackTx { txn_id } => Some(txn_id),
        };

        match txn_id {
            Some(id) => validate_field("transaction id", id.as_str()),
            None => Ok(()),
        }
    }
}

/// Check that a field survives the text framing: non-empty, no whitespace.
pub fn validate_field(what: &str, field: &str) -> TinyResult<()> {
    if field.is_empty() || field.chars().any(char::is_whitespace) {
        return Err(TinyError::InvalidInput(format!(
            "{} {:?} must be non-empty and contain no whitespace",
            what, field
        )));
    }
    Ok(())
}

impl fmt::Display for WalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalRecord::Set {
                txn_id: None,
                table,
                key,
                value,
            } => write!(f, "SET {} {} {}", table, key, value),
            WalRecord::Set {
                txn_id: Some(id),
                table,
                key,
                value,
            } => write!(f, "SET {} {} {} {}", id, table, key, value),
            WalRecord::Delete {
                txn_id: None,
                table,
                key,
            } => write!(f, "DELETE {} {}", table, key),
            WalRecord::Delete {
                txn_id: Some(id),
                table,
                key,
            } => write!(f, "DELETE {} {} {}", id, table, key),
            WalRecord::DropTable { txn_id: None, table } => write!(f, "DROP TABLE {}", table),
            WalRecord::DropTable {
                txn_id: Some(id),
                table,
            } => write!(f, "DROP TABLE {} {}", id, table),
            WalRecord::BeginTx { txn_id } => write!(f, "BEGIN_TX {}", txn_id),
            WalRecord::CommitTx { txn_id } => write!(f, "COMMIT_TX {}", txn_id),
            WalRecord::RollbackTx { txn_id } => write!(f, "ROLLBACK_TX {}", txn_id),
        }
    }
}

/// Committed state rebuilt from the log.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplayedState {
    /// Table name to its entries, in key order.
    pub tables: BTreeMap<String, Vec<(String, String)>>,
    /// Records read.
    pub records: usize,
    /// Lines that could not be decoded.
    pub skipped: usize,
    /// Transactions with neither a commit nor a rollback marker.
    pub uncommitted: usize,
}

/// WAL manager
pub struct WalManager {
    file: Mutex<File>,
    path: PathBuf,
    sync_on_write: bool,
}

impl WalManager {
    /// Open (or create) the log for appending.
    pub fn new<P: AsRef<Path>>(path: P, sync_on_write: bool) -> TinyResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        Self::truncate_torn_tail(&mut file, &path)?;

        Ok(Self {
            file: Mutex::new(file),
            path,
            sync_on_write,
        })
    }

    /// Cut off a final line that lacks its terminator. Such a line is a
    /// partial write from a crash, and appending after it would corrupt the
    /// next record.
    fn truncate_torn_tail(file: &mut File, path: &Path) -> TinyResult<()> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(());
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        if last[0] == b'\n' {
            return Ok(());
        }

        let mut data = Vec::with_capacity(len as usize);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut data)?;
        let keep = data
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);

        warn!(
            path = %path.display(),
            dropped_bytes = len - keep as u64,
            "Truncating incomplete WAL record"
        );
        file.set_len(keep as u64)?;
        Ok(())
    }

    /// Write a WAL record
    pub fn write(&self, record: &WalRecord) -> TinyResult<()> {
        record.validate()?;

        let line = format!("{}\n", record);
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        if self.sync_on_write {
            file.sync_data()?;
        }

        debug!(record = %record, "WAL append");
        Ok(())
    }

    /// Log a SET.
    pub fn append(&self, txn_id: Option<&TxnId>, table: &str, key: &str, value: &str) -> TinyResult<()> {
        self.write(&WalRecord::Set {
            txn_id: txn_id.cloned(),
            table: table.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Log a DELETE.
    pub fn delete(&self, txn_id: Option<&TxnId>, table: &str, key: &str) -> TinyResult<()> {
        self.write(&WalRecord::Delete {
            txn_id: txn_id.cloned(),
            table: table.to_string(),
            key: key.to_string(),
        })
    }

    /// Log a DROP TABLE.
    pub fn drop_table(&self, txn_id: Option<&TxnId>, table: &str) -> TinyResult<()> {
        self.write(&WalRecord::DropTable {
            txn_id: txn_id.cloned(),
            table: table.to_string(),
        })
    }

    pub fn begin_tx(&self, txn_id: &TxnId) -> TinyResult<()> {
        self.write(&WalRecord::BeginTx {
            txn_id: txn_id.clone(),
        })
    }

    pub fn commit_tx(&self, txn_id: &TxnId) -> TinyResult<()> {
        self.write(&WalRecord::CommitTx {
            txn_id: txn_id.clone(),
        })
    }

    pub fn rollback_tx(&self, txn_id: &TxnId) -> TinyResult<()> {
        self.write(&WalRecord::RollbackTx {
            txn_id: txn_id.clone(),
        })
    }

    /// Rebuild committed state from the log.
    ///
    /// Autocommit records apply immediately. Transactional records are
    /// buffered per transaction and applied on its COMMIT_TX (dropped tables,
    /// then upserts, then deletes) or discarded on ROLLBACK_TX. A transaction
    /// without either marker never becomes visible.
    pub fn replay(&self) -> TinyResult<ReplayedState> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ReplayedState::default());
            }
            Err(e) => return Err(TinyError::Io(e)),
        };

        let mut committed: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut pending: HashMap<TxnId, Overlay> = HashMap::new();
        let mut records = 0;
        let mut skipped = 0;

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let Some(record) = WalRecord::parse(&line) else {
                warn!(line = line_no + 1, content = %line, "Skipping malformed WAL record");
                skipped += 1;
                continue;
            };
            records += 1;

            match record {
                WalRecord::Set {
                    txn_id: None,
                    table,
                    key,
                    value,
                } => {
                    committed.entry(table).or_default().insert(key, value);
                }
                WalRecord::Set {
                    txn_id: Some(id),
                    table,
                    key,
                    value,
                } => {
                    pending.entry(id).or_default().set(&table, &key, &value);
                }
                WalRecord::Delete {
                    txn_id: None,
                    table,
                    key,
                } => {
                    if let Some(kv) = committed.get_mut(&table) {
                        kv.remove(&key);
                    }
                }
                WalRecord::Delete {
                    txn_id: Some(id),
                    table,
                    key,
                } => {
                    pending.entry(id).or_default().delete(&table, &key);
                }
                WalRecord::DropTable { txn_id: None, table } => {
                    committed.remove(&table);
                }
                WalRecord::DropTable {
                    txn_id: Some(id),
                    table,
                } => {
                    pending.entry(id).or_default().drop_table(&table);
                }
                WalRecord::BeginTx { txn_id } => {
                    pending.entry(txn_id).or_default();
                }
                WalRecord::CommitTx { txn_id } => {
                    if let Some(overlay) = pending.remove(&txn_id) {
                        Self::apply_committed(&mut committed, &overlay);
                    }
                }
                WalRecord::RollbackTx { txn_id } => {
                    pending.remove(&txn_id);
                }
            }
        }

        if !pending.is_empty() {
            warn!(
                count = pending.len(),
                "Discarding effects of transactions without a commit marker"
            );
        }

        let state = ReplayedState {
            tables: committed
                .into_iter()
                .map(|(table, kv)| (table, kv.into_iter().collect()))
                .collect(),
            records,
            skipped,
            uncommitted: pending.len(),
        };

        info!(
            path = %self.path.display(),
            tables = state.tables.len(),
            records = state.records,
            skipped = state.skipped,
            "WAL replay complete"
        );

        Ok(state)
    }

    fn apply_committed(committed: &mut BTreeMap<String, BTreeMap<String, String>>, overlay: &Overlay) {
        for table in overlay.dropped_tables() {
            committed.remove(table);
        }

        for (table, kv) in overlay.changes() {
            committed
                .entry(table.clone())
                .or_default()
                .extend(kv.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        for (table, keys) in overlay.deletes() {
            if let Some(kv) = committed.get_mut(table) {
                for key in keys {
                    kv.remove(key);
                }
            }
        }
    }

    /// Flush WAL to disk
    pub fn flush(&self) -> TinyResult<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn entries(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn open_wal(dir: &tempfile::TempDir) -> WalManager {
        WalManager::new(dir.path().join("test.log"), false).unwrap()
    }

    #[test]
    fn test_wal_append_and_replay() {
        let dir = tempdir().unwrap();
        let wal = open_wal(&dir);

        wal.append(None, "users", "alpha", "1").unwrap();
        wal.append(None, "users", "beta", "2").unwrap();
        wal.append(None, "users", "gamma", "3").unwrap();
        wal.delete(None, "users", "beta").unwrap();

        let state = wal.replay().unwrap();
        assert_eq!(state.tables.len(), 1);
        assert_eq!(state.tables["users"], entries(&[("alpha", "1"), ("gamma", "3")]));
        assert_eq!(state.records, 4);
    }

    #[test]
    fn test_overwrite_keeps_last_value() {
        let dir = tempdir().unwrap();
        let wal = open_wal(&dir);

        wal.append(None, "T", "k", "v1").unwrap();
        wal.append(None, "T", "k", "v2").unwrap();

        let state = wal.replay().unwrap();
        assert_eq!(state.tables["T"], entries(&[("k", "v2")]));
    }

    #[test]
    fn test_drop_table_removes_all_keys() {
        let dir = tempdir().unwrap();
        let wal = open_wal(&dir);

        wal.append(None, "a", "k", "v").unwrap();
        wal.append(None, "b", "k", "v").unwrap();
        wal.drop_table(None, "a").unwrap();

        let state = wal.replay().unwrap();
        assert!(!state.tables.contains_key("a"));
        assert!(state.tables.contains_key("b"));
    }

    #[test]
    fn test_missing_file_is_empty_database() {
        let dir = tempdir().unwrap();
        let wal = open_wal(&dir);
        fs::remove_file(wal.path()).unwrap();

        let state = wal.replay().unwrap();
        assert!(state.tables.is_empty());
    }

    #[test]
    fn test_uncommitted_transaction_is_invisible() {
        let dir = tempdir().unwrap();
        let wal = open_wal(&dir);
        let tx = TxnId::generate();

        wal.begin_tx(&tx).unwrap();
        wal.append(Some(&tx), "T", "k", "v").unwrap();

        let state = wal.replay().unwrap();
        assert!(!state.tables.contains_key("T"));
        assert_eq!(state.uncommitted, 1);
    }

    #[test]
    fn test_committed_transaction_applies() {
        let dir = tempdir().unwrap();
        let wal = open_wal(&dir);
        let tx = TxnId::generate();

        wal.append(None, "T", "old", "1").unwrap();
        wal.begin_tx(&tx).unwrap();
        wal.append(Some(&tx), "T", "new", "2").unwrap();
        wal.delete(Some(&tx), "T", "old").unwrap();
        wal.commit_tx(&tx).unwrap();

        let state = wal.replay().unwrap();
        assert_eq!(state.tables["T"], entries(&[("new", "2")]));
        assert_eq!(state.uncommitted, 0);
    }

    #[test]
    fn test_rollback_restores_prior_state() {
        let dir = tempdir().unwrap();
        let wal = open_wal(&dir);
        let tx = TxnId::generate();

        wal.append(None, "T", "a", "1").unwrap();
        wal.append(None, "T", "b", "2").unwrap();
        let before = wal.replay().unwrap().tables;

        wal.begin_tx(&tx).unwrap();
        wal.append(Some(&tx), "T", "c", "3").unwrap();
        wal.delete(Some(&tx), "T", "a").unwrap();
        wal.drop_table(Some(&tx), "T").unwrap();
        wal.rollback_tx(&tx).unwrap();

        assert_eq!(wal.replay().unwrap().tables, before);
    }

    #[test]
    fn test_commit_applies_drop_before_upserts() {
        let dir = tempdir().unwrap();
        let wal = open_wal(&dir);
        let tx = TxnId::generate();

        wal.append(None, "T", "k1", "v1").unwrap();
        wal.begin_tx(&tx).unwrap();
        wal.drop_table(Some(&tx), "T").unwrap();
        wal.append(Some(&tx), "T", "k2", "v2").unwrap();
        wal.commit_tx(&tx).unwrap();

        let state = wal.replay().unwrap();
        assert_eq!(state.tables["T"], entries(&[("k2", "v2")]));
    }

    #[test]
    fn test_interleaved_transactions_are_independent() {
        let dir = tempdir().unwrap();
        let wal = open_wal(&dir);
        let committed = TxnId::from("tx_a");
        let rolled_back = TxnId::from("tx_b");

        wal.begin_tx(&committed).unwrap();
        wal.begin_tx(&rolled_back).unwrap();
        wal.append(Some(&committed), "T", "keep", "1").unwrap();
        wal.append(Some(&rolled_back), "T", "lose", "2").unwrap();
        wal.rollback_tx(&rolled_back).unwrap();
        wal.commit_tx(&committed).unwrap();

        let state = wal.replay().unwrap();
        assert_eq!(state.tables["T"], entries(&[("keep", "1")]));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        fs::write(
            &path,
            "SET T a 1\nSET T b\nFROB T a\n\nset T c 3\nDROP T\nDELETE T a\n",
        )
        .unwrap();

        let wal = WalManager::new(&path, false).unwrap();
        let state = wal.replay().unwrap();
        assert_eq!(state.tables["T"], entries(&[("c", "3")]));
        assert_eq!(state.skipped, 3);
    }

    #[test]
    fn test_torn_tail_is_truncated_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.log");
        fs::write(&path, "SET T a 1\nSET T b 2\nSET T c").unwrap();

        let wal = WalManager::new(&path, false).unwrap();
        wal.append(None, "T", "d", "4").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "SET T a 1\nSET T b 2\nSET T d 4\n");
        let state = wal.replay().unwrap();
        assert_eq!(state.tables["T"], entries(&[("a", "1"), ("b", "2"), ("d", "4")]));
    }

    #[test]
    fn test_whitespace_in_fields_is_rejected() {
        let dir = tempdir().unwrap();
        let wal = open_wal(&dir);

        assert!(matches!(
            wal.append(None, "T", "two words", "v"),
            Err(TinyError::InvalidInput(_))
        ));
        assert!(matches!(wal.append(None, "T", "k", ""), Err(TinyError::InvalidInput(_))));
        assert!(matches!(
            wal.begin_tx(&TxnId::from("tx 1")),
            Err(TinyError::InvalidInput(_))
        ));

        assert_eq!(fs::read_to_string(wal.path()).unwrap(), "");
    }

    #[test]
    fn test_record_text_format() {
        let tx = TxnId::from("tx_1");
        let cases = vec![
            (
                WalRecord::Set {
                    txn_id: None,
                    table: "T".into(),
                    key: "k".into(),
                    value: "v".into(),
                },
                "SET T k v",
            ),
            (
                WalRecord::Set {
                    txn_id: Some(tx.clone()),
                    table: "T".into(),
                    key: "k".into(),
                    value: "v".into(),
                },
                "SET tx_1 T k v",
            ),
            (
                WalRecord::Delete {
                    txn_id: Some(tx.clone()),
                    table: "T".into(),
                    key: "k".into(),
                },
                "DELETE tx_1 T k",
            ),
            (
                WalRecord::DropTable {
                    txn_id: None,
                    table: "T".into(),
                },
                "DROP TABLE T",
            ),
            (
                WalRecord::DropTable {
                    txn_id: Some(tx.clone()),
                    table: "T".into(),
                },
                "DROP TABLE tx_1 T",
            ),
            (WalRecord::CommitTx { txn_id: tx.clone() }, "COMMIT_TX tx_1"),
        ];

        for (record, text) in cases {
            assert_eq!(record.to_string(), text);
            assert_eq!(WalRecord::parse(text), Some(record));
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = TxnId::generate();
        let b = TxnId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("tx_"));
        assert!(!a.as_str().chars().any(char::is_whitespace));
    }
}
