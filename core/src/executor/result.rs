use crate::storage::TxnId;
use serde::Serialize;
use std::fmt;

/// One key/value pair returned by a SELECT.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
	pub key: String,
	pub value: String,
	/// Id of the active transaction when the value is only buffered in its
	/// overlay and not yet committed.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pending: Option<TxnId>,
}

impl Row {
	pub fn committed(key: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			value: value.into(),
			pending: None,
		}
	}

	pub fn pending(key: impl Into<String>, value: impl Into<String>, txn_id: TxnId) -> Self {
		Self {
			key: key.into(),
			value: value.into(),
			pending: Some(txn_id),
		}
	}
}

impl fmt::Display for Row {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.pending {
			Some(id) => write!(f, "{}: [{}] {}", self.key, id, self.value),
			None => write!(f, "{}: {}", self.key, self.value),
		}
	}
}

/// Successful outcome of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
	Inserted { table: String, count: usize },
	Updated { table: String, count: usize },
	Deleted { table: String, count: usize },
	Dropped { table: String },
	Rows(Vec<Row>),
	Begun(TxnId),
	Committed(TxnId),
	RolledBack(TxnId),
}

impl QueryResult {
	pub fn rows(rows: Vec<Row>) -> Self {
		Self::Rows(rows)
	}

	/// Number of keys written or returned.
	pub fn affected(&self) -> usize {
		match self {
			Self::Inserted { count, .. } | Self::Updated { count, .. } | Self::Deleted { count, .. } => {
				*count
			}
			Self::Rows(rows) => rows.len(),
			Self::Dropped { .. } | Self::Begun(_) | Self::Committed(_) | Self::RolledBack(_) => 0,
		}
	}
}

impl fmt::Display for QueryResult {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Inserted { table, count } => {
				write!(f, "Inserted {} key(s) into table '{}'", count, table)
			}
			Self::Updated { table, count } => {
				write!(f, "Updated {} key(s) in table '{}'", count, table)
			}
			Self::Deleted { table, count } => {
				write!(f, "Deleted {} key(s) from table '{}'", count, table)
			}
			Self::Dropped { table } => write!(f, "Table '{}' dropped", table),
			Self::Rows(rows) if rows.is_empty() => f.write_str("No results"),
			Self::Rows(rows) => {
				for (i, row) in rows.iter().enumerate() {
					if i > 0 {
						f.write_str("\n")?;
					}
					write!(f, "{}", row)?;
				}
				Ok(())
			}
			Self::Begun(id) => write!(f, "Transaction started: {}", id),
			Self::Committed(id) => write!(f, "Transaction {} committed.", id),
			Self::RolledBack(id) => write!(f, "Transaction {} rolled back.", id),
		}
	}
}
