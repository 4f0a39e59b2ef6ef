//! Compact Prefix Index
//!
//! Path-compressed copy of a [`PrefixIndex`].
//!
//! ## Compaction Rule
//! Walking down from the root, a non-root node with exactly one child whose
//! count equals its own is merged with that child; merging repeats from the
//! merged node. Each surviving edge carries the run of segment labels it
//! absorbed:
//!
//! ```text
//!   before                      after
//!   (root) 4                    (root) 4
//!     └── a 4                     └── [a, b, c] 4
//!         └── b 4                     ├── x 1
//!             └── c 4                 └── y 3
//!                 ├── x 1
//!                 └── y 3
//! ```
//!
//! Every node along a merged chain has the same count and a single child, so
//! queries that stop inside an edge are answered exactly as the uncompacted
//! index would answer them.

use std::collections::BTreeMap;

use crate::error::{KeyscopeError, Result};

use super::{rank_children, NodeId, PrefixBreakdown, PrefixIndex, PrefixLookup, Tokenizer, ROOT};

/// A merged run of segments leading to a compact node
#[derive(Debug, Clone, PartialEq, Eq)]
struct CompactEdge {
    /// Absorbed segment labels, in path order; never empty
    segments: Vec<Box<str>>,
    /// Node at the end of the run
    target: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CompactNode {
    count: u64,
    /// Outgoing edges keyed by their first segment
    edges: BTreeMap<Box<str>, CompactEdge>,
}

/// Where a prefix lands in the compacted tree
enum Position<'a> {
    /// Exactly on a node
    Node(NodeId),
    /// Strictly inside an edge; `next` is the segment that follows
    Within { target: NodeId, next: &'a str },
}

/// Path-compressed prefix index
#[derive(Debug, Clone)]
pub struct CompactPrefixIndex {
    tokenizer: Tokenizer,
    nodes: Vec<CompactNode>,
    keys_inserted: u64,
}

impl CompactPrefixIndex {
    /// Build the compacted form of `index`
    ///
    /// `index` is only read; the result shares no nodes with it.
    pub fn build(index: &PrefixIndex) -> Self {
        let mut nodes = vec![CompactNode {
            count: index.root().count,
            edges: BTreeMap::new(),
        }];

        // (source node in `index`, destination node in `nodes`)
        let mut pending: Vec<(NodeId, NodeId)> = vec![(ROOT, ROOT)];

        while let Some((source, destination)) = pending.pop() {
            for (label, &child) in &index.node(source).children {
                let mut segments = vec![label.clone()];
                let mut tail = child;

                // Absorb single children with an equal count
                loop {
                    let node = index.node(tail);
                    if node.children.len() != 1 {
                        break;
                    }
                    let Some((only_label, &only_child)) = node.children.iter().next() else {
                        break;
                    };
                    if index.node(only_child).count != node.count {
                        break;
                    }
                    segments.push(only_label.clone());
                    tail = only_child;
                }

                let target = nodes.len();
                nodes.push(CompactNode {
                    count: index.node(tail).count,
                    edges: BTreeMap::new(),
                });
                nodes[destination]
                    .edges
                    .insert(label.clone(), CompactEdge { segments, target });
                pending.push((tail, target));
            }
        }

        tracing::debug!(
            "Compacted index from {} to {} nodes",
            index.node_count(),
            nodes.len()
        );

        Self {
            tokenizer: *index.tokenizer(),
            nodes,
            keys_inserted: index.keys_inserted(),
        }
    }

    /// Follow `prefix` through the edges
    fn locate(&self, prefix: &str) -> Option<Position<'_>> {
        let tokens = self.tokenizer.tokenize(prefix);
        let mut rest = tokens.as_slice();
        let mut current = ROOT;

        while let Some(first) = rest.first() {
            let edge = self.nodes[current].edges.get(&**first)?;
            let matched = edge
                .segments
                .iter()
                .zip(rest)
                .take_while(|(segment, token)| ***segment == ***token)
                .count();

            if matched < edge.segments.len() {
                if matched == rest.len() {
                    return Some(Position::Within {
                        target: edge.target,
                        next: &edge.segments[matched],
                    });
                }
                return None;
            }

            rest = &rest[matched..];
            current = edge.target;
        }

        Some(Position::Node(current))
    }

    fn locate_or_err(&self, prefix: &str) -> Result<Position<'_>> {
        self.locate(prefix)
            .ok_or_else(|| KeyscopeError::PrefixNotFound(prefix.to_string()))
    }

    /// Concatenated label of the edge leaving `prefix` towards `next`
    ///
    /// Mostly useful for inspecting how far a chain was merged.
    pub fn edge_label(&self, prefix: &str, next: &str) -> Option<String> {
        let Position::Node(id) = self.locate(prefix)? else {
            return None;
        };
        let edge = self.nodes[id].edges.get(next)?;
        let delimiter = self.tokenizer.delimiter().to_string();
        Some(
            edge.segments
                .iter()
                .map(|segment| &**segment)
                .collect::<Vec<_>>()
                .join(&delimiter),
        )
    }
}

impl PrefixLookup for CompactPrefixIndex {
    fn count_for_prefix(&self, prefix: &str) -> Result<u64> {
        match self.locate_or_err(prefix)? {
            Position::Node(id) | Position::Within { target: id, .. } => Ok(self.nodes[id].count),
        }
    }

    fn top_n_by_prefix(&self, prefix: &str, n: usize) -> Result<PrefixBreakdown> {
        let prefix = self.tokenizer.normalize_prefix(prefix);

        let breakdown = match self.locate_or_err(prefix)? {
            Position::Node(id) => {
                let node = &self.nodes[id];
                // The first node of a merged chain carries the chain's count
                let top = rank_children(
                    &self.tokenizer,
                    prefix,
                    node.edges
                        .iter()
                        .map(|(first, edge)| (&**first, self.nodes[edge.target].count)),
                    n,
                );
                PrefixBreakdown {
                    prefix: prefix.to_string(),
                    total: node.count,
                    branches: node.edges.len(),
                    top,
                    requested: n,
                }
            }
            Position::Within { target, next } => {
                let count = self.nodes[target].count;
                let top = rank_children(&self.tokenizer, prefix, std::iter::once((next, count)), n);
                PrefixBreakdown {
                    prefix: prefix.to_string(),
                    total: count,
                    branches: 1,
                    top,
                    requested: n,
                }
            }
        };

        Ok(breakdown)
    }

    fn children(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = self.tokenizer.normalize_prefix(prefix);
        let children = match self.locate_or_err(prefix)? {
            Position::Node(id) => self.nodes[id]
                .edges
                .keys()
                .map(|first| self.tokenizer.join(prefix, first))
                .collect(),
            Position::Within { next, .. } => vec![self.tokenizer.join(prefix, next)],
        };
        Ok(children)
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn keys_inserted(&self) -> u64 {
        self.keys_inserted
    }

    fn is_compact(&self) -> bool {
        true
    }
}
