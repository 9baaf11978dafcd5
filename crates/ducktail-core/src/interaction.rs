//! Host interaction traits: module text, active selection, user warnings.
//!
//! These are the seams to whatever environment hosts the modules (an
//! editor, a document, or a directory of exported files for the CLI).
//!
//! The traits are object-safe, allowing them to be used as `Arc<dyn ...>`.

use parking_lot::Mutex;
use std::fmt;
use thiserror::Error;

use crate::types::ModuleId;

/// Error type for host operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host has no such module
    #[error("host has no module {0}")]
    ModuleNotFound(ModuleId),

    /// IO error while reading or writing the host's copy
    #[error("IO error: {0}")]
    Io(String),

    /// Other host error
    #[error("{0}")]
    Other(String),
}

impl HostError {
    /// Create a new IO error
    pub fn io(err: impl fmt::Display) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Read and write access to the host's copy of module text.
pub trait ModuleHost: Send + Sync {
    /// Current host-side text of a module.
    fn module_text(&self, module: &ModuleId) -> Result<String, HostError>;

    /// Overwrite the host-side text of a module, creating it if needed.
    fn replace_module_text(&self, module: &ModuleId, text: &str) -> Result<(), HostError>;
}

/// The caret position in the host, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSelection {
    pub module: ModuleId,
    /// Byte offset of the caret.
    pub offset: u64,
}

/// Where the user currently is.
pub trait SelectionService: Send + Sync {
    fn active_selection(&self) -> Option<ActiveSelection>;
}

/// A selection service pinned to one position, for non-interactive callers.
#[derive(Debug, Clone, Default)]
pub struct FixedSelection(pub Option<ActiveSelection>);

impl SelectionService for FixedSelection {
    fn active_selection(&self) -> Option<ActiveSelection> {
        self.0.clone()
    }
}

/// User-facing warning channel.
pub trait MessageSink: Send + Sync {
    fn notify_warn(&self, message: &str, caption: &str);
}

/// Forwards warnings to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMessageSink;

impl MessageSink for TracingMessageSink {
    fn notify_warn(&self, message: &str, caption: &str) {
        tracing::warn!(caption, "{}", message);
    }
}

/// Keeps every warning, for tests and batch reports.
#[derive(Debug, Default)]
pub struct CollectingMessageSink {
    messages: Mutex<Vec<(String, String)>>,
}

impl CollectingMessageSink {
    pub fn new() -> Self {
        CollectingMessageSink::default()
    }

    /// Every `(caption, message)` pair received so far.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }
}

impl MessageSink for CollectingMessageSink {
    fn notify_warn(&self, message: &str, caption: &str) {
        self.messages
            .lock()
            .push((caption.to_string(), message.to_string()));
    }
}
