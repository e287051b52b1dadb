//! Statement parser
//!
//! Turns one line of input into a [`Statement`]. Keywords are matched
//! case-insensitively; keys, values and table names are case-sensitive words
//! that never contain whitespace.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;

pub use ast::{KeyValue, Statement};
pub use error::{ParseError, ParseResult};
pub use parser::Parser;

pub fn parse(input: &str) -> ParseResult<Statement> {
    Parser::new(input).parse()
}

#[cfg(test)]
mod tests;
