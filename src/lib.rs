//! Ducktail: symbol resolution and transactional rewrites for VBA projects
//!
//! Opens a directory of exported modules as one project, resolves every
//! identifier to its declaration, runs inspections and applies quick fixes
//! and refactorings through versioned rewrite sessions.

// Engine - re-exported from ducktail-core
pub use ducktail_core::error;
pub use ducktail_core::facts;
pub use ducktail_core::inspection;
pub use ducktail_core::output;
pub use ducktail_core::session;
pub use ducktail_core::state;
pub use ducktail_core::store;
pub use ducktail_core::types;

// VBA language support
pub use ducktail_basic as basic;

pub mod cli;
pub mod config;
pub mod workspace;
