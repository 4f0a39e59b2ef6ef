//! Index Module
//!
//! Prefix-counting tries over path-like keys.
//!
//! ## Responsibilities
//! - Tokenize keys into delimiter-separated segments
//! - Count, per prefix, how many keys pass through it
//! - Rank a prefix's children by count
//! - Compact single-child chains without changing any answer
//! - Build one index per sorted key file, two at a time
//!
//! ## Counting Rule
//! Inserting a key bumps the count of every node on its path, root included,
//! but never materializes the key's final segment:
//!
//! ```text
//! keys: a/b/c, a/b/d, a/e
//!
//!   (root) 3
//!      └── a 3
//!          └── b 2        "a/e" is not a node
//! ```

mod builder;
mod compact;
mod prefix;
mod tokenizer;

pub use builder::{IndexBuilder, IndexPair};
pub use compact::CompactPrefixIndex;
pub use prefix::{PrefixIndex, PrefixNode};
pub use tokenizer::Tokenizer;

use crate::error::Result;

/// Arena slot of a node
pub type NodeId = usize;

/// Arena slot of the root node
pub const ROOT: NodeId = 0;

// =============================================================================
// Query Seam
// =============================================================================

/// Read-only prefix queries shared by plain and compacted indices
pub trait PrefixLookup: Send + Sync {
    /// Number of keys strictly extending `prefix`
    ///
    /// Returns `PrefixNotFound` when `prefix` is not a node; this is
    /// "zero with unknown existence", not a failure of the index.
    fn count_for_prefix(&self, prefix: &str) -> Result<u64>;

    /// Total, branch count and the `n` heaviest children of `prefix`
    fn top_n_by_prefix(&self, prefix: &str, n: usize) -> Result<PrefixBreakdown>;

    /// Full paths of the direct children of `prefix`
    fn children(&self, prefix: &str) -> Result<Vec<String>>;

    /// Number of nodes held, root included
    fn node_count(&self) -> usize;

    /// Number of key lines inserted
    fn keys_inserted(&self) -> u64;

    /// Whether single-child chains have been merged
    fn is_compact(&self) -> bool;
}

// =============================================================================
// Top-N Result
// =============================================================================

/// Result of a top-N query on one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixBreakdown {
    /// The queried prefix, trailing delimiter removed
    pub prefix: String,
    /// Keys passing through the prefix
    pub total: u64,
    /// Direct children of the prefix
    pub branches: usize,
    /// At most `requested` children as (full path, count), by descending count
    pub top: Vec<(String, u64)>,
    /// The `n` asked for
    pub requested: usize,
}

impl PrefixBreakdown {
    /// Flat list form: total, branch count, then the ranked children
    ///
    /// Holds at most `requested + 2` entries; fewer when the prefix has fewer
    /// children than requested.
    pub fn entries(&self) -> Vec<(String, u64)> {
        let mut entries = Vec::with_capacity(self.top.len() + 2);
        entries.push((format!("{} total keys", self.prefix), self.total));
        entries.push((format!("{} total children", self.prefix), self.branches as u64));
        entries.extend(self.top.iter().cloned());
        entries
    }

    /// Children actually returned
    pub fn found(&self) -> usize {
        self.top.len()
    }

    /// True when fewer children exist than were requested
    pub fn is_short(&self) -> bool {
        self.found() < self.requested
    }

    /// Children left out of `top`; zero unless branches exceed the request
    pub fn omitted(&self) -> usize {
        self.branches.saturating_sub(self.found())
    }
}

/// Rank (label, count) pairs by strictly descending count, keep `n`, and
/// render each label as a full path under `prefix`
///
/// The sort is stable, so ties stay in label order.
pub(crate) fn rank_children<'a>(
    tokenizer: &Tokenizer,
    prefix: &str,
    children: impl Iterator<Item = (&'a str, u64)>,
    n: usize,
) -> Vec<(String, u64)> {
    let mut ranked: Vec<(&str, u64)> = children.collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(n);
    ranked
        .into_iter()
        .map(|(label, count)| (tokenizer.join(prefix, label), count))
        .collect()
}
