//! Query definitions
//!
//! Represents questions asked of a run's two indices.

use std::fmt;

/// Query kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Count,
    TopK,
}

/// A typed query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Keys under a prefix in each dump
    Count { prefix: String },

    /// The `n` heaviest child prefixes in each dump
    TopK { prefix: String, n: usize },
}

impl Query {
    pub fn count(prefix: impl Into<String>) -> Self {
        Query::Count {
            prefix: prefix.into(),
        }
    }

    pub fn top_k(prefix: impl Into<String>, n: usize) -> Self {
        Query::TopK {
            prefix: prefix.into(),
            n,
        }
    }

    /// Get the query kind
    pub fn kind(&self) -> QueryKind {
        match self {
            Query::Count { .. } => QueryKind::Count,
            Query::TopK { .. } => QueryKind::TopK,
        }
    }

    pub fn prefix(&self) -> &str {
        match self {
            Query::Count { prefix } | Query::TopK { prefix, .. } => prefix,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Count { prefix } => write!(f, "count {:?}", prefix),
            Query::TopK { prefix, n } => write!(f, "top {} of {:?}", n, prefix),
        }
    }
}
