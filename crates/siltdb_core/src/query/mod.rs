//! Query engine: AST, planning, verification, projection, pagination.
//!
//! Execution runs in two stages. The planner reduces the AST to a sorted
//! candidate key set using index probes and sorted-set algebra; the
//! verifier then re-fetches every candidate and evaluates the full AST
//! against the live document. Pagination applies to the verified result,
//! projection last.

mod ast;
mod eval;
mod plan;

pub use ast::{DataType, QueryNode};
pub use eval::matches;

use crate::document;
use crate::error::{DbError, DbResult};
use crate::keys;
use crate::keyspace::Keyspace;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Candidates processed between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 64;

/// A shared cancellation flag for long reads.
///
/// The boundary trips the token when its client disconnects; the
/// verification loop polls it between candidate batches and aborts with
/// [`DbError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a new, untripped token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether the token has been tripped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Options applied around a query's filter stage.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Paths to keep in each result document; `None` or empty keeps all.
    pub projection: Option<Vec<String>>,
    /// Maximum number of results; `None` is unbounded.
    pub limit: Option<usize>,
    /// Results to skip before collecting; past-the-end yields empty.
    pub offset: Option<usize>,
    /// Cooperative cancellation for the verification loop.
    pub cancel: Option<CancelToken>,
}

/// Executes a query against the keyspace.
pub(crate) fn execute(
    ks: &Keyspace,
    node: &QueryNode,
    options: &QueryOptions,
    geo_precision: usize,
) -> DbResult<Vec<Value>> {
    node.validate()?;

    let candidates = plan::candidates(ks, node, geo_precision)?;

    let mut verified = Vec::new();
    for (i, key) in candidates.iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            if let Some(token) = &options.cancel {
                if token.is_cancelled() {
                    return Err(DbError::Cancelled);
                }
            }
        }

        // Re-fetch and re-evaluate: index candidates over-approximate, and
        // a candidate may have been deleted since the probe.
        let Some(bytes) = ks.get(&keys::doc_key(key)) else {
            continue;
        };
        let doc = document::decode(&bytes)?;
        if eval::matches(&doc, node) {
            verified.push(doc);
        }
    }

    let offset = options.offset.unwrap_or(0);
    let paged: Vec<Value> = if offset >= verified.len() {
        Vec::new()
    } else {
        verified
            .into_iter()
            .skip(offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect()
    };

    match &options.projection {
        Some(paths) if !paths.is_empty() => {
            Ok(paged.iter().map(|doc| crate::path::project(doc, paths)).collect())
        }
        _ => Ok(paged),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_trips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());

        let clone = token.clone();
        assert!(clone.is_cancelled(), "clones share the flag");
    }

    #[test]
    fn default_options_are_unbounded() {
        let options = QueryOptions::default();
        assert!(options.projection.is_none());
        assert!(options.limit.is_none());
        assert!(options.offset.is_none());
        assert!(options.cancel.is_none());
    }
}
