use crate::error::TinyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
	#[error("Table '{0}' not found")]
	TableNotFound(String),

	#[error("Transaction already active")]
	TransactionAlreadyActive,

	#[error("No active transaction")]
	NoActiveTransaction,

	#[error("Table '{0}' was dropped in the current transaction")]
	TableDroppedInTransaction(String),

	#[error("No keys found to update")]
	NoKeysToUpdate,

	#[error("No key(s) found to delete in table '{0}'")]
	NoKeysToDelete(String),

	#[error("{0}")]
	Storage(#[from] TinyError),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_error_messages() {
		assert_eq!(
			ExecutionError::TableNotFound("users".into()).to_string(),
			"Table 'users' not found"
		);
		assert_eq!(
			ExecutionError::NoKeysToDelete("users".into()).to_string(),
			"No key(s) found to delete in table 'users'"
		);
		assert_eq!(
			ExecutionError::TableDroppedInTransaction("users".into()).to_string(),
			"Table 'users' was dropped in the current transaction"
		);
		assert_eq!(
			ExecutionError::Storage(TinyError::InvalidInput("bad".into())).to_string(),
			"Invalid input: bad"
		);
	}
}
