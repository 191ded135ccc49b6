//! Memoized parsing keyed by raw query text.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{parse_expert_query, Expr, SyntaxError};

/// Parses each distinct query text at most once.
///
/// Entries are never invalidated. Failed parses are not cached.
#[derive(Debug, Default)]
pub struct ParserCache {
    parsed: HashMap<String, Arc<Expr>>,
}

impl ParserCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&mut self, raw_query: &str) -> Result<Arc<Expr>, SyntaxError> {
        if let Some(expr) = self.parsed.get(raw_query) {
            debug!(query = raw_query, "parser cache hit");
            return Ok(Arc::clone(expr));
        }

        debug!(query = raw_query, "parser cache miss");
        let expr = Arc::new(parse_expert_query(raw_query)?);
        self.parsed.insert(raw_query.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }
}
