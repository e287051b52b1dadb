use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
	#[error("empty input")]
	EmptyInput,

	#[error("unsupported statement: {0}")]
	UnsupportedStatement(String),

	#[error("expected {expected}, found {found}")]
	UnexpectedToken { expected: String, found: String },

	#[error("unexpected tokens after statement: {0}")]
	TrailingInput(String),
}

pub type ParseResult<T> = Result<T, ParseError>;
