//! Error types and error code constants for ducktail.
//!
//! `DuckError` is the single error type rendered by the CLI. Each subsystem
//! keeps its own `thiserror` enum (`StoreError`, `SessionError`, `FixError`,
//! `HostError`, ...) and is bridged in with `impl From<X> for DuckError`.
//!
//! ## Error Code Mapping
//!
//! - `2`: Invalid arguments (bad input from caller)
//! - `3`: Resolution errors (module or symbol not found)
//! - `4`: Apply errors (stale session, overlapping edits, host write failed)
//! - `5`: Analysis blocked (syntax or resolver errors in the project)
//! - `10`: Internal errors (bugs, unexpected state)

use std::fmt;

use thiserror::Error;

use crate::inspection::FixError;
use crate::interaction::HostError;
use crate::session::SessionError;
use crate::store::StoreError;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Error codes for JSON output and process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    InvalidArguments = 2,
    ResolutionError = 3,
    ApplyError = 4,
    AnalysisBlocked = 5,
    InternalError = 10,
}

impl OutputErrorCode {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for CLI output.
#[derive(Debug, Error)]
pub enum DuckError {
    /// Invalid arguments from caller.
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        message: String,
        details: Option<serde_json::Value>,
    },

    /// No module with that name in the workspace.
    #[error("module not found: {module}")]
    ModuleNotFound { module: String },

    /// Nothing matched the requested name.
    #[error("no symbol named '{name}'")]
    SymbolNotFound { name: String },

    /// The project has syntax or resolver errors, so no current snapshot.
    #[error("analysis blocked ({state}): {} diagnostic(s)", diagnostics.len())]
    AnalysisBlocked {
        state: String,
        diagnostics: Vec<String>,
    },

    /// A module changed underneath a session.
    #[error("stale: {module} moved from {expected} to {actual}; re-run against fresh text")]
    Stale {
        module: String,
        expected: String,
        actual: String,
    },

    /// Failed to apply changes.
    #[error("apply error: {message}")]
    ApplyError {
        message: String,
        module: Option<String>,
    },

    /// Internal error (bug or unexpected state).
    #[error("internal error: {message}")]
    InternalError { message: String },
}

impl From<&DuckError> for OutputErrorCode {
    fn from(err: &DuckError) -> Self {
        match err {
            DuckError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            DuckError::ModuleNotFound { .. } => OutputErrorCode::ResolutionError,
            DuckError::SymbolNotFound { .. } => OutputErrorCode::ResolutionError,
            DuckError::AnalysisBlocked { .. } => OutputErrorCode::AnalysisBlocked,
            DuckError::Stale { .. } => OutputErrorCode::ApplyError,
            DuckError::ApplyError { .. } => OutputErrorCode::ApplyError,
            DuckError::InternalError { .. } => OutputErrorCode::InternalError,
        }
    }
}

impl From<DuckError> for OutputErrorCode {
    fn from(err: DuckError) -> Self {
        OutputErrorCode::from(&err)
    }
}

// ============================================================================
// Bridges
// ============================================================================

impl From<SessionError> for DuckError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Stale {
                module,
                expected,
                actual,
            } => DuckError::Stale {
                module: module.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
            SessionError::ModuleNotFound { module } => DuckError::ModuleNotFound {
                module: module.to_string(),
            },
            SessionError::Closed { .. } => DuckError::InternalError {
                message: err.to_string(),
            },
            SessionError::StaleTarget { ref module, .. }
            | SessionError::OverlappingEdits { ref module, .. }
            | SessionError::InvalidEdit { ref module, .. }
            | SessionError::ModuleExists { ref module } => DuckError::ApplyError {
                module: Some(module.to_string()),
                message: err.to_string(),
            },
        }
    }
}

impl From<StoreError> for DuckError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ModuleNotFound { module } => DuckError::ModuleNotFound {
                module: module.to_string(),
            },
            StoreError::VersionMismatch {
                module,
                expected,
                actual,
            } => DuckError::Stale {
                module: module.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
            StoreError::ModuleExists { ref module } => DuckError::InvalidArguments {
                message: format!("module {} already exists", module),
                details: None,
            },
        }
    }
}

impl From<FixError> for DuckError {
    fn from(err: FixError) -> Self {
        match err {
            FixError::Session(session) => DuckError::from(session),
            FixError::StaleResult { .. } => DuckError::ApplyError {
                message: err.to_string(),
                module: None,
            },
            FixError::Unsupported { .. }
            | FixError::ScopeNotSupported { .. }
            | FixError::NotApplicable { .. } => DuckError::InvalidArguments {
                message: err.to_string(),
                details: None,
            },
        }
    }
}

impl From<HostError> for DuckError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::ModuleNotFound(module) => DuckError::ModuleNotFound {
                module: module.to_string(),
            },
            other => DuckError::ApplyError {
                message: other.to_string(),
                module: None,
            },
        }
    }
}

impl From<std::io::Error> for DuckError {
    fn from(err: std::io::Error) -> Self {
        DuckError::InternalError {
            message: format!("IO error: {}", err),
        }
    }
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl DuckError {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        DuckError::InvalidArguments {
            message: message.into(),
            details: None,
        }
    }

    pub fn module_not_found(module: impl Into<String>) -> Self {
        DuckError::ModuleNotFound {
            module: module.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        DuckError::InternalError {
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> OutputErrorCode {
        OutputErrorCode::from(self)
    }
}

// ============================================================================
// Tests
// ============================================================================
