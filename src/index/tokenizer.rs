//! Key Tokenizer
//!
//! Splits path-like keys into segments.

use std::borrow::Cow;

/// Splits keys on a single delimiter character
///
/// Empty pieces are dropped, but a segment that follows one or more empty
/// pieces keeps a single leading delimiter. This separates a segment at the
/// root (`":user"`) from the same text continuing a path (`"user"`):
///
/// ```text
/// "a:b:c"   → ["a", "b", "c"]
/// ":a:b"    → [":a", "b"]
/// "a::b"    → ["a", ":b"]
/// "a:b:"    → ["a", "b"]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tokenizer {
    delimiter: char,
}

impl Tokenizer {
    pub fn new(delimiter: char) -> Self {
        Self { delimiter }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Split a key into its ordered, non-empty segments
    pub fn tokenize<'a>(&self, key: &'a str) -> Vec<Cow<'a, str>> {
        let mut tokens = Vec::new();
        let mut previous_empty = false;

        for piece in key.split(self.delimiter) {
            if piece.is_empty() {
                previous_empty = true;
                continue;
            }
            if previous_empty {
                let mut label = String::with_capacity(piece.len() + self.delimiter.len_utf8());
                label.push(self.delimiter);
                label.push_str(piece);
                tokens.push(Cow::Owned(label));
            } else {
                tokens.push(Cow::Borrowed(piece));
            }
            previous_empty = false;
        }

        tokens
    }

    /// Drop one trailing delimiter from a query prefix
    pub fn normalize_prefix<'a>(&self, prefix: &'a str) -> &'a str {
        prefix.strip_suffix(self.delimiter).unwrap_or(prefix)
    }

    /// Render the full path of a child under `prefix`
    pub fn join(&self, prefix: &str, label: &str) -> String {
        if prefix.is_empty() {
            return label.to_string();
        }
        let mut path = String::with_capacity(prefix.len() + label.len() + 1);
        path.push_str(prefix);
        path.push(self.delimiter);
        path.push_str(label);
        path
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(':')
    }
}
