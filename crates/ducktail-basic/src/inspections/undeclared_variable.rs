//! Variables that exist only because a module lacks `Option Explicit`.

use ducktail_core::inspection::{
    Inspection, InspectionContext, InspectionMeta, InspectionResult, Interest, Severity,
};

pub const NAME: &str = "UndeclaredVariable";

#[derive(Debug, Clone, Copy, Default)]
pub struct UndeclaredVariable;

impl Inspection for UndeclaredVariable {
    fn name(&self) -> &'static str {
        NAME
    }

    fn meta(&self) -> InspectionMeta {
        InspectionMeta {
            description: "Variable is used but not declared",
            default_severity: Severity::Error,
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
                .filter(|d| d.is_implicit)
                .filter_map(move |declaration| {
                    let module = declaration.module.as_ref()?;
                    let target = ctx.selection(module, declaration.selection?)?;
                    let description =
                        format!("Local variable '{}' is not declared", declaration.name);
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

    #[test]
    fn flags_each_implicit_variable_once() {
        let snapshot = snapshot_of(&[(
            "Module1",
            ModuleKind::Standard,
            "Sub Main()\n    total = 1\n    total = total + 1\nEnd Sub\n",
        )]);
        let ctx = InspectionContext::new(&snapshot);
        let results: Vec<InspectionResult> = UndeclaredVariable.inspect(&ctx).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, Severity::Error);
        let main = user(&snapshot, "Module1.Main");
        assert_eq!(results[0].enclosing, Some(main.id));
    }

    #[test]
    fn declared_variables_are_clean() {
        let snapshot = snapshot_of(&[(
            "Module1",
            ModuleKind::Standard,
            "Sub Main()\n    Dim total As Long\n    total = 1\nEnd Sub\n",
        )]);
        let ctx = InspectionContext::new(&snapshot);
        assert_eq!(UndeclaredVariable.inspect(&ctx).count(), 0);
    }
}
