//! Query Module
//!
//! Answers count and top-K questions against both indices of a run.
//!
//! Each index is asked independently: a prefix missing from one dump, or an
//! index that was never built, is reported inline for that index and never
//! hides the other index's answer.

mod command;
mod report;

pub use command::{Query, QueryKind};
pub use report::{IndexOutcome, QueryAnswer, QueryReport};

use std::sync::Arc;
use std::time::Instant;

use crate::error::{KeyscopeError, Result};
use crate::index::{IndexPair, PrefixLookup};
use crate::run::Run;

/// Dispatches queries to a run's indices
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryEngine;

impl QueryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Execute a query against both indices of `run`
    pub fn execute(&self, run: &Run, query: &Query) -> QueryReport {
        let started = Instant::now();
        let indices = run.indices();

        let outcomes = IndexPair::LABELS
            .iter()
            .enumerate()
            .map(|(slot, &label)| {
                let index = indices.as_ref().map(|pair| pair.labeled()[slot].1);
                let asked = Instant::now();
                let result = match index {
                    Some(index) => Self::ask(index, query),
                    None => Err(KeyscopeError::IndexNotReady(format!(
                        "{} of run {}",
                        label,
                        run.id()
                    ))),
                };
                IndexOutcome {
                    label,
                    result,
                    elapsed: asked.elapsed(),
                }
            })
            .collect();

        let report = QueryReport {
            query: query.clone(),
            outcomes,
            elapsed: started.elapsed(),
        };

        tracing::info!("Run {}: {} in {:?}", run.id(), query, report.elapsed);
        report
    }

    fn ask(index: &Arc<dyn PrefixLookup>, query: &Query) -> Result<QueryAnswer> {
        match query {
            Query::Count { prefix } => index.count_for_prefix(prefix).map(QueryAnswer::Count),
            Query::TopK { prefix, n } => index.top_n_by_prefix(prefix, *n).map(QueryAnswer::TopK),
        }
    }
}
