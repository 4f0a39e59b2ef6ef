//! Prefix Index
//!
//! Arena-backed trie counting keys per segment prefix.

use std::collections::BTreeMap;

use crate::error::{KeyscopeError, Result};

use super::{rank_children, NodeId, PrefixBreakdown, PrefixLookup, Tokenizer, ROOT};

/// One trie node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixNode {
    /// Keys whose segments strictly extend this node's path
    pub count: u64,
    /// Segment label → child slot, in label order
    pub children: BTreeMap<Box<str>, NodeId>,
}

/// Trie over the keys of one dump
///
/// ## Storage
/// Nodes live in a flat arena; `children` maps labels to arena slots and
/// slot 0 is the root. Built once, then read-only.
#[derive(Debug, Clone)]
pub struct PrefixIndex {
    tokenizer: Tokenizer,
    nodes: Vec<PrefixNode>,
    keys_inserted: u64,
}

impl PrefixIndex {
    /// Create an empty index splitting keys on `delimiter`
    pub fn new(delimiter: char) -> Self {
        Self {
            tokenizer: Tokenizer::new(delimiter),
            nodes: vec![PrefixNode::default()],
            keys_inserted: 0,
        }
    }

    /// Build an index from keys in iteration order
    pub fn from_keys<'a>(delimiter: char, keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut index = Self::new(delimiter);
        for key in keys {
            index.insert(key);
        }
        index
    }

    /// Insert one key
    ///
    /// Every node on the key's path (root included) gains one count; the
    /// walk descends through every segment except the last, which is never
    /// stored as a node.
    pub fn insert(&mut self, key: &str) {
        self.keys_inserted += 1;

        let tokens = self.tokenizer.tokenize(key);
        let Some((_, parents)) = tokens.split_last() else {
            return;
        };

        let mut current = ROOT;
        self.nodes[current].count += 1;
        for token in parents {
            current = self.child_or_insert(current, token);
            self.nodes[current].count += 1;
        }
    }

    /// Find or create the child of `parent` labeled `label`
    fn child_or_insert(&mut self, parent: NodeId, label: &str) -> NodeId {
        if let Some(&child) = self.nodes[parent].children.get(label) {
            return child;
        }
        let child = self.nodes.len();
        self.nodes.push(PrefixNode::default());
        self.nodes[parent].children.insert(label.into(), child);
        child
    }

    /// Walk to the node of `prefix`, if it exists
    fn locate(&self, prefix: &str) -> Option<NodeId> {
        let mut current = ROOT;
        for token in self.tokenizer.tokenize(prefix) {
            current = *self.nodes[current].children.get(&*token)?;
        }
        Some(current)
    }

    fn locate_or_err(&self, prefix: &str) -> Result<NodeId> {
        self.locate(prefix)
            .ok_or_else(|| KeyscopeError::PrefixNotFound(prefix.to_string()))
    }

    // =========================================================================
    // Accessors (for compaction and tests)
    // =========================================================================

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn root(&self) -> &PrefixNode {
        &self.nodes[ROOT]
    }

    pub fn node(&self, id: NodeId) -> &PrefixNode {
        &self.nodes[id]
    }

    /// Every node path in the index, root excluded, depth-first in label order
    pub fn prefixes(&self) -> Vec<String> {
        let mut paths = Vec::with_capacity(self.nodes.len().saturating_sub(1));
        let mut stack: Vec<(NodeId, String)> = vec![(ROOT, String::new())];

        while let Some((id, path)) = stack.pop() {
            for (label, &child) in self.nodes[id].children.iter().rev() {
                stack.push((child, self.tokenizer.join(&path, label)));
            }
            if id != ROOT {
                paths.push(path);
            }
        }

        paths
    }
}

impl PrefixLookup for PrefixIndex {
    fn count_for_prefix(&self, prefix: &str) -> Result<u64> {
        let id = self.locate_or_err(prefix)?;
        Ok(self.nodes[id].count)
    }

    fn top_n_by_prefix(&self, prefix: &str, n: usize) -> Result<PrefixBreakdown> {
        let prefix = self.tokenizer.normalize_prefix(prefix);
        let node = &self.nodes[self.locate_or_err(prefix)?];

        let top = rank_children(
            &self.tokenizer,
            prefix,
            node.children
                .iter()
                .map(|(label, &child)| (&**label, self.nodes[child].count)),
            n,
        );

        Ok(PrefixBreakdown {
            prefix: prefix.to_string(),
            total: node.count,
            branches: node.children.len(),
            top,
            requested: n,
        })
    }

    fn children(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = self.tokenizer.normalize_prefix(prefix);
        let node = &self.nodes[self.locate_or_err(prefix)?];
        Ok(node
            .children
            .keys()
            .map(|label| self.tokenizer.join(prefix, label))
            .collect())
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn keys_inserted(&self) -> u64 {
        self.keys_inserted
    }

    fn is_compact(&self) -> bool {
        false
    }
}
