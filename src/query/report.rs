//! Query Reports
//!
//! Per-index outcomes of one query and their text rendering.
//!
//! ## Count
//! ```text
//! Total keys with prefix *user*: in first database: 12, in second database: 9
//! time: 0 ms
//! ```
//!
//! ## Top-K
//! ```text
//! Total keys with prefix *user*: in first database: *12*
//! >Top 2 key-prefixes that start with: "user":
//! >1. user:session : 8 keys.
//! >2. user:profile : 3 keys.
//! >... and 1 more...
//! `query time: 0 ms`
//! ```

use std::fmt;
use std::time::Duration;

use crate::error::{KeyscopeError, Result};
use crate::index::PrefixBreakdown;

use super::Query;

/// Answer from one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAnswer {
    Count(u64),
    TopK(PrefixBreakdown),
}

/// What one index said, or why it could not answer
#[derive(Debug)]
pub struct IndexOutcome {
    /// "first database" or "second database"
    pub label: &'static str,
    pub result: Result<QueryAnswer>,
    pub elapsed: Duration,
}

impl IndexOutcome {
    pub fn count(&self) -> Option<u64> {
        match &self.result {
            Ok(QueryAnswer::Count(count)) => Some(*count),
            _ => None,
        }
    }

    pub fn breakdown(&self) -> Option<&PrefixBreakdown> {
        match &self.result {
            Ok(QueryAnswer::TopK(breakdown)) => Some(breakdown),
            _ => None,
        }
    }

    /// True when this index does not hold the prefix
    pub fn is_not_found(&self) -> bool {
        matches!(self.result, Err(KeyscopeError::PrefixNotFound(_)))
    }
}

/// Result of one query against both indices of a run
#[derive(Debug)]
pub struct QueryReport {
    pub query: Query,
    /// One entry per index, first dump first
    pub outcomes: Vec<IndexOutcome>,
    /// Wall time of the whole query
    pub elapsed: Duration,
}

impl QueryReport {
    pub fn first(&self) -> Option<&IndexOutcome> {
        self.outcomes.first()
    }

    pub fn second(&self) -> Option<&IndexOutcome> {
        self.outcomes.get(1)
    }

    /// True when every index answered
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    fn fmt_count(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        write!(f, "Total keys with prefix *{}*: ", prefix)?;
        for (i, outcome) in self.outcomes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "in {}: ", outcome.label)?;
            match &outcome.result {
                Ok(QueryAnswer::Count(count)) => write!(f, "{}", count)?,
                Ok(QueryAnswer::TopK(breakdown)) => write!(f, "{}", breakdown.total)?,
                Err(KeyscopeError::PrefixNotFound(_)) => f.write_str("prefix does not exist")?,
                Err(e) => write!(f, "unavailable ({})", e)?,
            }
        }
        write!(f, "\ntime: {} ms", self.elapsed.as_millis())
    }

    fn fmt_top_k(&self, f: &mut fmt::Formatter<'_>, prefix: &str, n: usize) -> fmt::Result {
        for (i, outcome) in self.outcomes.iter().enumerate() {
            if i > 0 {
                f.write_str("\n\n")?;
            }

            let breakdown = match &outcome.result {
                Ok(QueryAnswer::TopK(breakdown)) => breakdown,
                Ok(QueryAnswer::Count(count)) => {
                    write!(f, "Total keys with prefix *{}*: in {}: *{}*", prefix, outcome.label, count)?;
                    continue;
                }
                Err(KeyscopeError::PrefixNotFound(_)) => {
                    write!(f, ">No keys found for {} in {}", prefix, outcome.label)?;
                    continue;
                }
                Err(e) => {
                    write!(f, ">Query failed in {}: {}", outcome.label, e)?;
                    continue;
                }
            };

            writeln!(
                f,
                "Total keys with prefix *{}*: in {}: *{}*",
                prefix, outcome.label, breakdown.total
            )?;
            if breakdown.is_short() {
                writeln!(
                    f,
                    "`WARN: Found {} prefixes only, less than the requested number ({})`",
                    breakdown.found(),
                    n
                )?;
            }
            writeln!(
                f,
                ">Top {} key-prefixes that start with: \"{}\":",
                breakdown.found(),
                prefix
            )?;
            for (rank, (path, count)) in breakdown.top.iter().enumerate() {
                writeln!(f, ">{}. {} : {} keys.", rank + 1, path, count)?;
            }
            if breakdown.omitted() > 0 {
                writeln!(f, ">... and {} more...", breakdown.omitted())?;
            }
            write!(f, "`query time: {} ms`", outcome.elapsed.as_millis())?;
        }
        Ok(())
    }
}

impl fmt::Display for QueryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.query {
            Query::Count { prefix } => self.fmt_count(f, prefix),
            Query::TopK { prefix, n } => self.fmt_top_k(f, prefix, *n),
        }
    }
}
