//! Expert query language: syntax tree, parser and parse cache.
//!
//! # Syntax Overview
//!
//! - **Comparisons**: `field = 'value'`, `@submitted_on >= '2024-01-01'`
//! - **Operators**: `=`, `!=`, `<`, `<=`, `>`, `>=`, `BETWEEN(a, b)`, `IN(a, b)`, `NOT IN(a, b)`
//! - **Functions**: `NOW()` (with optional `+ 1d` / `- 2w` / `3m` / `1y`), `MYSELF()`, `OPEN()`
//! - **Combinators**: `AND` binds tighter than `OR`; parentheses group

mod ast;
mod cache;
mod lexer;
mod parser;

use std::fmt;

pub use ast::{
    Comparison, ComparisonType, Expr, Literal, Metadata, Period, PeriodUnit, Searchable,
    ValueWrapper,
};
pub use cache::ParserCache;
pub use parser::parse_expert_query;

/// Malformed query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    /// Byte offset into the query text.
    pub position: usize,
    /// The text starting at `position`, truncated.
    pub snippet: String,
}

impl SyntaxError {
    pub(crate) fn new(message: &str, input: &str, position: usize) -> Self {
        let snippet: String = input
            .get(position..)
            .unwrap_or_default()
            .chars()
            .take(20)
            .collect();
        Self {
            message: message.to_string(),
            position,
            snippet,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.snippet.is_empty() {
            write!(f, "{} at end of query (position {})", self.message, self.position)
        } else {
            write!(f, "{} at position {} near '{}'", self.message, self.position, self.snippet)
        }
    }
}

impl std::error::Error for SyntaxError {}
