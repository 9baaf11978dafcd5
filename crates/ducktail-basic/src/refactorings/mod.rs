//! Multi-step refactorings.
//!
//! A refactoring checks whether it can run against the current snapshot,
//! builds a model of what it will do, then stages every edit through one
//! [`RewriteSession`](ducktail_core::session::RewriteSession).

pub mod extract_interface;

use thiserror::Error;

use ducktail_core::error::DuckError;
use ducktail_core::session::SessionError;
use ducktail_core::state::ParserState;
use ducktail_core::types::{ModuleId, ModuleKind};

pub use extract_interface::{ExtractInterface, InterfaceMember, InterfaceModel, InterfaceParameter};

// ============================================================================
// Error Types
// ============================================================================

/// Reasons a refactoring cannot be planned or applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefactorError {
    /// The parser has no current snapshot to plan against.
    #[error("parser is {state}, not ready")]
    NotReady { state: ParserState },

    /// Nothing is selected in the host.
    #[error("no active selection")]
    NoSelection,

    /// The selected module cannot take part in this refactoring.
    #[error("{module} is a {kind:?} module")]
    UnsupportedModule { module: ModuleId, kind: ModuleKind },

    /// The module has nothing to extract.
    #[error("{module} has no public members")]
    NoPublicMembers { module: ModuleId },

    /// The module already implements an interface.
    #[error("{module} already implements {interface}")]
    AlreadyImplements { module: ModuleId, interface: String },

    /// The module changed since the snapshot was taken.
    #[error("{module} was modified since the last parse")]
    Modified { module: ModuleId },

    /// The generated module name is taken.
    #[error("a module named '{name}' already exists")]
    NameConflict { name: String },

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<RefactorError> for DuckError {
    fn from(err: RefactorError) -> Self {
        match err {
            RefactorError::NotReady { state } => DuckError::AnalysisBlocked {
                state: state.to_string(),
                diagnostics: Vec::new(),
            },
            RefactorError::Modified { ref module } => DuckError::ApplyError {
                message: err.to_string(),
                module: Some(module.to_string()),
            },
            RefactorError::Session(session) => DuckError::from(session),
            other => DuckError::InvalidArguments {
                message: other.to_string(),
                details: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ducktail_core::error::OutputErrorCode;

    #[test]
    fn error_codes() {
        let blocked = DuckError::from(RefactorError::NotReady {
            state: ParserState::SyntaxError,
        });
        assert_eq!(OutputErrorCode::from(&blocked), OutputErrorCode::AnalysisBlocked);

        let modified = DuckError::from(RefactorError::Modified {
            module: ModuleId::new("VBAProject", "Widget"),
        });
        assert_eq!(OutputErrorCode::from(&modified), OutputErrorCode::ApplyError);

        let conflict = DuckError::from(RefactorError::NameConflict {
            name: "IWidget".to_string(),
        });
        assert_eq!(OutputErrorCode::from(&conflict), OutputErrorCode::InvalidArguments);
    }
}
