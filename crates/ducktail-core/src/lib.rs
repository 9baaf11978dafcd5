//! Core infrastructure for ducktail.
//!
//! This crate provides the language-agnostic engine:
//! - Module store with per-module versions and content hashes
//! - Parser state machine driving parse and resolve cycles
//! - Immutable symbol snapshots (declarations, references, unbound uses)
//! - Edit algebra and transactional rewrite sessions
//! - Inspection engine and quick-fix contract
//! - Host interaction traits
//! - Error types, error codes and JSON output types
//! - Language adapter trait for the parse-tree provider

pub mod adapter;
pub mod error;
pub mod facts;
pub mod inspection;
pub mod interaction;
pub mod output;
pub mod patch;
pub mod session;
pub mod state;
pub mod store;
pub mod text;
pub mod types;
