//! # keyscope
//!
//! Compares the key-spaces of two key-value database dumps:
//! - Concurrent fetch of both dumps (local paths, `file://`, HTTP)
//! - Key extraction through an external tool, then an external merge sort
//! - One prefix-counting trie per dump, optionally path-compressed
//! - Count and top-K queries answered side by side for both dumps
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │            (RunRegistry · Pipeline · QueryEngine)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Pipeline   │          │ QueryEngine │
//!   │ (per stage) │          │ (read-only) │
//!   └──────┬──────┘          └──────▲──────┘
//!          │                        │
//!          ▼                        │
//!   fetch ─► extract ─► sort ─► index (IndexPair on the Run)
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod index;
pub mod pipeline;
pub mod run;
pub mod query;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorKind, KeyscopeError, Result};
pub use config::{Config, ExtractorCommand};
pub use engine::Engine;
pub use index::{CompactPrefixIndex, PrefixBreakdown, PrefixIndex, PrefixLookup};
pub use query::{Query, QueryReport};
pub use run::{RunId, Stage, StageState};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of keyscope
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
