use thiserror::Error;

pub type TinyResult<T> = Result<T, TinyError>;

#[derive(Error, Debug)]
pub enum TinyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
