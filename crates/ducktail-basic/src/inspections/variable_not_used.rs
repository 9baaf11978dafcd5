//! Declared variables whose value is never read.

use ducktail_core::facts::DeclarationKind;
use ducktail_core::inspection::{
    Inspection, InspectionContext, InspectionMeta, InspectionResult, Interest, Severity,
};

pub const NAME: &str = "VariableNotUsed";

#[derive(Debug, Clone, Copy, Default)]
pub struct VariableNotUsed;

impl Inspection for VariableNotUsed {
    fn name(&self) -> &'static str {
        NAME
    }

    fn meta(&self) -> InspectionMeta {
        InspectionMeta {
            description: "Variable is declared but never read",
            default_severity: Severity::Warning,
        }
    }

    fn interest(&self) -> Interest {
        Interest::user_declarations()
    }

    fn inspect<'a>(
        &'a self,
        ctx: &'a InspectionContext<'a>,
    ) -> Box<dyn Iterator<Item = InspectionResult> + 'a> {
        let snapshot = ctx.snapshot();
        Box::new(
            snapshot
                .user_declarations()
                .filter(|d| d.kind == DeclarationKind::Variable && !d.is_implicit)
                .filter(move |d| {
                    !snapshot
                        .references_to(d.id)
                        .iter()
                        .any(|r| !r.is_assignment)
                })
                .filter_map(move |declaration| {
                    let module = declaration.module.as_ref()?;
                    let target = ctx.selection(module, declaration.selection?)?;
                    let description = format!("Variable '{}' is not used", declaration.name);
                    Some(
                        ctx.result(self, target, description)
                            .with_declaration(declaration.id)
                            .with_enclosing(declaration.parent),
                    )
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{snapshot_of, user};
    use ducktail_core::types::ModuleKind;

    fn run(text: &str) -> (Vec<InspectionResult>, std::sync::Arc<ducktail_core::facts::Snapshot>) {
        let snapshot = snapshot_of(&[("Module1", ModuleKind::Standard, text)]);
        let results = {
            let ctx = InspectionContext::new(&snapshot);
            VariableNotUsed.inspect(&ctx).collect()
        };
        (results, snapshot)
    }

    #[test]
    fn flags_never_read_locals() {
        let (results, snapshot) = run(
            "Option Explicit\nSub Main()\n    Dim unused As Long\n    Dim used As Long\n    Debug.Print used\nEnd Sub\n",
        );
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].declaration,
            Some(user(&snapshot, "Module1.Main.unused").id)
        );
        assert_eq!(
            results[0].enclosing,
            Some(user(&snapshot, "Module1.Main").id)
        );
    }

    #[test]
    fn assignment_only_still_counts_as_unused() {
        let (results, _) = run("Option Explicit\nSub Main()\n    Dim x As Long\n    x = 5\nEnd Sub\n");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].description, "Variable 'x' is not used");
    }

    #[test]
    fn module_fields_are_checked() {
        let (results, _) = run("Option Explicit\nPrivate cache As Collection\n");
        assert_eq!(results.len(), 1);
    }
}
