//! Delete the declaring line of a variable nobody reads.
//!
//! Only single-declarator statements of never-referenced variables are
//! removed; anything else is declined with [`FixError::NotApplicable`].

use ducktail_core::facts::Snapshot;
use ducktail_core::inspection::{FixError, FixScope, InspectionResult, QuickFix};
use ducktail_core::session::RewriteSession;
use ducktail_core::types::QualifiedSelection;

use crate::inspections::variable_not_used;

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveUnusedDeclarationQuickFix;

impl RemoveUnusedDeclarationQuickFix {
    fn not_applicable(&self, reason: impl Into<String>) -> FixError {
        FixError::NotApplicable {
            fix: self.name().to_string(),
            reason: reason.into(),
        }
    }
}

impl QuickFix for RemoveUnusedDeclarationQuickFix {
    fn name(&self) -> &'static str {
        "RemoveUnusedDeclarationQuickFix"
    }

    fn supported_inspections(&self) -> &[&'static str] {
        &[variable_not_used::NAME]
    }

    fn description(&self, result: &InspectionResult, snapshot: &Snapshot) -> String {
        match result.declaration.and_then(|id| snapshot.declaration(id)) {
            Some(declaration) => format!("Remove unused declaration '{}'", declaration.name),
            None => "Remove unused declaration".to_string(),
        }
    }

    fn scopes(&self) -> &[FixScope] {
        &[FixScope::Procedure, FixScope::Module, FixScope::Project]
    }

    fn fix(
        &self,
        result: &InspectionResult,
        snapshot: &Snapshot,
        session: &mut RewriteSession<'_>,
    ) -> Result<(), FixError> {
        let declaration = result
            .declaration
            .and_then(|id| snapshot.declaration(id))
            .ok_or_else(|| self.not_applicable("result has no declaration"))?;
        let context = declaration
            .context
            .ok_or_else(|| self.not_applicable("declaration has no statement"))?;
        if !snapshot.references_to(declaration.id).is_empty() {
            return Err(self.not_applicable(format!("'{}' is still assigned", declaration.name)));
        }
        let shared = snapshot
            .declarations_in_module(result.module())
            .iter()
            .any(|d| d.id != declaration.id && d.context == Some(context));
        if shared {
            return Err(self.not_applicable(format!(
                "'{}' shares its statement with other declarations",
                declaration.name
            )));
        }

        let statement = QualifiedSelection::new(
            result.module().clone(),
            result.target.version,
            context,
        );
        session
            .check_out(result.module())?
            .remove_lines(&statement)?;
        Ok(())
    }
}
