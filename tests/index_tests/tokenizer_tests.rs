//! Tests for Tokenizer

use keyscope::index::Tokenizer;

// =============================================================================
// Tokenize Tests
// =============================================================================

#[test]
fn test_tokenize_plain_path() {
    let tokenizer = Tokenizer::new(':');
    assert_eq!(tokenizer.tokenize("a:b:c"), vec!["a", "b", "c"]);
}

#[test]
fn test_tokenize_single_segment() {
    let tokenizer = Tokenizer::new(':');
    assert_eq!(tokenizer.tokenize("abc"), vec!["abc"]);
}

#[test]
fn test_tokenize_leading_delimiter_is_kept_once() {
    let tokenizer = Tokenizer::new(':');
    assert_eq!(tokenizer.tokenize(":a:b"), vec![":a", "b"]);
    assert_eq!(tokenizer.tokenize("::a"), vec![":a"]);
}

#[test]
fn test_tokenize_consecutive_delimiters() {
    let tokenizer = Tokenizer::new(':');
    assert_eq!(tokenizer.tokenize("a::b"), vec!["a", ":b"]);
    assert_eq!(tokenizer.tokenize("a:::b:c"), vec!["a", ":b", "c"]);
}

#[test]
fn test_tokenize_trailing_delimiters_produce_nothing() {
    let tokenizer = Tokenizer::new(':');
    assert_eq!(tokenizer.tokenize("a:b:"), vec!["a", "b"]);
    assert_eq!(tokenizer.tokenize("a:b::"), vec!["a", "b"]);
}

#[test]
fn test_tokenize_empty_and_delimiter_only_keys() {
    let tokenizer = Tokenizer::new(':');
    assert!(tokenizer.tokenize("").is_empty());
    assert!(tokenizer.tokenize(":::").is_empty());
}

#[test]
fn test_tokenize_custom_delimiter() {
    let tokenizer = Tokenizer::new('/');
    assert_eq!(tokenizer.tokenize("a:b/c"), vec!["a:b", "c"]);
    assert_eq!(tokenizer.tokenize("/x"), vec!["/x"]);
}

#[test]
fn test_tokenize_multibyte_delimiter() {
    let tokenizer = Tokenizer::new('→');
    assert_eq!(tokenizer.tokenize("a→→b"), vec!["a", "→b"]);
}

#[test]
fn test_default_delimiter_is_colon() {
    assert_eq!(Tokenizer::default().delimiter(), ':');
}

// =============================================================================
// Prefix Helper Tests
// =============================================================================

#[test]
fn test_normalize_prefix_strips_one_trailing_delimiter() {
    let tokenizer = Tokenizer::new(':');
    assert_eq!(tokenizer.normalize_prefix("a:"), "a");
    assert_eq!(tokenizer.normalize_prefix("a::"), "a:");
    assert_eq!(tokenizer.normalize_prefix("a"), "a");
    assert_eq!(tokenizer.normalize_prefix(""), "");
}

#[test]
fn test_join_at_root_has_no_leading_delimiter() {
    let tokenizer = Tokenizer::new(':');
    assert_eq!(tokenizer.join("", "user"), "user");
    assert_eq!(tokenizer.join("user", "42"), "user:42");
}
