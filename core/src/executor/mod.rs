//! Statement results and errors returned by the engine

mod error;
mod result;

pub use error::{ExecutionError, ExecutionResult};
pub use result::{QueryResult, Row};
