//! Tests for PrefixIndex
//!
//! These tests verify:
//! - The counting rule (final segment never materialized)
//! - Root count and per-node counts against a brute-force recount
//! - Top-N ordering, ties, shortfall and omitted children
//! - Children listing

use keyscope::index::{PrefixIndex, PrefixLookup, Tokenizer};
use keyscope::KeyscopeError;

// =============================================================================
// Helper Functions
// =============================================================================

fn index_of(delimiter: char, keys: &[&str]) -> PrefixIndex {
    PrefixIndex::from_keys(delimiter, keys.iter().copied())
}

/// Keys whose segments strictly extend the segments of `prefix`
fn brute_force_count(delimiter: char, keys: &[&str], prefix: &str) -> u64 {
    let tokenizer = Tokenizer::new(delimiter);
    let prefix_tokens = tokenizer.tokenize(prefix);
    keys.iter()
        .filter(|key| {
            let tokens = tokenizer.tokenize(key);
            tokens.len() > prefix_tokens.len() && tokens[..prefix_tokens.len()] == prefix_tokens[..]
        })
        .count() as u64
}

const SESSION_KEYS: &[&str] = &[
    "user:1:session:a",
    "user:1:session:b",
    "user:1:profile",
    "user:2:session:c",
    "user:3:profile",
    "order:9:items",
    "order:9:total",
    "order:10:items",
    "config",
    ":internal:lock",
    "cache::warm:1",
];

// =============================================================================
// Scenario Tests
// =============================================================================

#[test]
fn test_scenario_counts() {
    let index = index_of('/', &["a/b/c", "a/b/d", "a/e"]);

    assert_eq!(index.count_for_prefix("a").unwrap(), 3);
    assert_eq!(index.count_for_prefix("a/b").unwrap(), 2);
    assert!(matches!(
        index.count_for_prefix("a/e"),
        Err(KeyscopeError::PrefixNotFound(_))
    ));
}

#[test]
fn test_scenario_top_n() {
    let index = index_of('/', &["a/b/c", "a/b/d", "a/e"]);

    let breakdown = index.top_n_by_prefix("a", 2).unwrap();

    assert_eq!(breakdown.total, 3);
    assert_eq!(breakdown.branches, 1);
    assert_eq!(breakdown.top, vec![("a/b".to_string(), 2)]);
    assert_eq!(breakdown.found(), 1);
    assert!(breakdown.is_short());
    assert_eq!(breakdown.omitted(), 0);
}

#[test]
fn test_final_segment_is_never_a_node() {
    let index = index_of(':', &["a:b"]);

    assert_eq!(index.count_for_prefix("a").unwrap(), 1);
    assert!(index.count_for_prefix("a:b").is_err());
    // root + "a"
    assert_eq!(index.node_count(), 2);
}

// =============================================================================
// Counting Property Tests
// =============================================================================

#[test]
fn test_root_counts_keys_with_at_least_one_segment() {
    let index = index_of(':', &["solo", "a:b", "", ":::", "x:y:z"]);

    assert_eq!(index.count_for_prefix("").unwrap(), 3);
    assert_eq!(index.root().count, 3);
    assert_eq!(index.keys_inserted(), 5);
}

#[test]
fn test_every_node_matches_brute_force_count() {
    let index = index_of(':', SESSION_KEYS);

    let prefixes = index.prefixes();
    assert!(!prefixes.is_empty());

    for prefix in prefixes {
        assert_eq!(
            index.count_for_prefix(&prefix).unwrap(),
            brute_force_count(':', SESSION_KEYS, &prefix),
            "count mismatch for {:?}",
            prefix
        );
    }
}

#[test]
fn test_leading_delimiter_segments_are_distinct() {
    let index = index_of(':', SESSION_KEYS);

    assert_eq!(index.count_for_prefix(":internal").unwrap(), 1);
    assert!(index.count_for_prefix("internal").is_err());
    assert_eq!(index.count_for_prefix("cache::warm").unwrap(), 1);
}

#[test]
fn test_count_ignores_trailing_delimiter() {
    let index = index_of(':', SESSION_KEYS);

    assert_eq!(
        index.count_for_prefix("user:").unwrap(),
        index.count_for_prefix("user").unwrap()
    );
}

#[test]
fn test_missing_prefix_is_not_found() {
    let index = index_of(':', SESSION_KEYS);

    let err = index.count_for_prefix("nope:nothing").unwrap_err();
    assert!(matches!(err, KeyscopeError::PrefixNotFound(ref p) if p == "nope:nothing"));
    assert!(!err.is_retryable());
}

#[test]
fn test_empty_index() {
    let index = PrefixIndex::new(':');

    assert_eq!(index.count_for_prefix("").unwrap(), 0);
    assert_eq!(index.node_count(), 1);
    assert!(index.prefixes().is_empty());
    assert!(index.count_for_prefix("a").is_err());
}

// =============================================================================
// Top-N Tests
// =============================================================================

#[test]
fn test_top_n_orders_by_descending_count() {
    let index = index_of(':', SESSION_KEYS);

    let breakdown = index.top_n_by_prefix("user", 10).unwrap();

    assert_eq!(breakdown.total, 5);
    assert_eq!(breakdown.branches, 3);
    assert_eq!(
        breakdown.top,
        vec![
            ("user:1".to_string(), 3),
            ("user:2".to_string(), 1),
            ("user:3".to_string(), 1),
        ]
    );
}

#[test]
fn test_top_n_ties_keep_label_order() {
    let index = index_of(':', &["k:c:1", "k:a:1", "k:b:1"]);

    let breakdown = index.top_n_by_prefix("k", 3).unwrap();

    let labels: Vec<&str> = breakdown.top.iter().map(|(path, _)| path.as_str()).collect();
    assert_eq!(labels, vec!["k:a", "k:b", "k:c"]);
}

#[test]
fn test_top_n_truncates_and_reports_omitted() {
    let index = index_of(':', SESSION_KEYS);

    let breakdown = index.top_n_by_prefix("user", 1).unwrap();

    assert_eq!(breakdown.top, vec![("user:1".to_string(), 3)]);
    assert!(!breakdown.is_short());
    assert_eq!(breakdown.omitted(), 2);
}

#[test]
fn test_top_n_entries_hold_at_most_n_plus_two() {
    let index = index_of(':', SESSION_KEYS);

    for n in 0..5 {
        let entries = index.top_n_by_prefix("user", n).unwrap().entries();
        assert!(entries.len() <= n + 2);
        assert_eq!(entries[0], ("user total keys".to_string(), 5));
        assert_eq!(entries[1], ("user total children".to_string(), 3));
    }
}

#[test]
fn test_top_n_at_root_renders_bare_labels() {
    let index = index_of(':', SESSION_KEYS);

    let breakdown = index.top_n_by_prefix("", 2).unwrap();

    assert_eq!(breakdown.total, 11);
    assert_eq!(breakdown.branches, 4);
    assert_eq!(
        breakdown.top,
        vec![("user".to_string(), 5), ("order".to_string(), 3)]
    );
    assert_eq!(breakdown.omitted(), 2);
}

#[test]
fn test_top_n_strips_trailing_delimiter_from_prefix() {
    let index = index_of(':', SESSION_KEYS);

    let breakdown = index.top_n_by_prefix("order:", 5).unwrap();

    assert_eq!(breakdown.prefix, "order");
    assert_eq!(
        breakdown.top,
        vec![("order:9".to_string(), 2), ("order:10".to_string(), 1)]
    );
}

#[test]
fn test_top_n_missing_prefix() {
    let index = index_of(':', SESSION_KEYS);
    assert!(matches!(
        index.top_n_by_prefix("ghost", 3),
        Err(KeyscopeError::PrefixNotFound(_))
    ));
}

// =============================================================================
// Children Tests
// =============================================================================

#[test]
fn test_children_lists_full_paths_in_label_order() {
    let index = index_of(':', SESSION_KEYS);

    assert_eq!(
        index.children("user:1").unwrap(),
        vec!["user:1:session".to_string()]
    );
    assert_eq!(
        index.children("order").unwrap(),
        vec!["order:10".to_string(), "order:9".to_string()]
    );
}
