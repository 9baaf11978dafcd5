//! Inspections over VBA snapshots.
//!
//! Each inspection is a unit struct implementing
//! [`ducktail_core::inspection::Inspection`]; [`all`] lists them in the
//! order they are registered.

pub mod option_explicit;
pub mod undeclared_variable;
pub mod unresolved_identifier;
pub mod untyped_function_usage;
pub mod variable_not_used;

use std::sync::Arc;

use ducktail_core::inspection::Inspection;

pub use option_explicit::OptionExplicit;
pub use undeclared_variable::UndeclaredVariable;
pub use unresolved_identifier::UnresolvedIdentifier;
pub use untyped_function_usage::UntypedFunctionUsage;
pub use variable_not_used::VariableNotUsed;

/// Every inspection this crate ships.
pub fn all() -> Vec<Arc<dyn Inspection>> {
    vec![
        Arc::new(OptionExplicit),
        Arc::new(UndeclaredVariable),
        Arc::new(UnresolvedIdentifier),
        Arc::new(UntypedFunctionUsage),
        Arc::new(VariableNotUsed),
    ]
}
