//! Quick fixes for this crate's inspections.

pub mod add_option_explicit;
pub mod remove_unused_declaration;
pub mod untyped_function_usage;

use std::sync::Arc;

use ducktail_core::inspection::QuickFix;

pub use add_option_explicit::AddOptionExplicitQuickFix;
pub use remove_unused_declaration::RemoveUnusedDeclarationQuickFix;
pub use untyped_function_usage::UntypedFunctionUsageQuickFix;

/// Every quick fix this crate ships.
pub fn all() -> Vec<Arc<dyn QuickFix>> {
    vec![
        Arc::new(AddOptionExplicitQuickFix),
        Arc::new(RemoveUnusedDeclarationQuickFix),
        Arc::new(UntypedFunctionUsageQuickFix),
    ]
}
