//! Calls to `Variant`-returning library functions that have a `String`
//! twin (`Format` / `Format$`).

use ducktail_core::facts::{Declaration, DeclarationKind, Snapshot};
use ducktail_core::inspection::{
    Inspection, InspectionContext, InspectionMeta, InspectionResult, Interest, Severity,
};

pub const NAME: &str = "UntypedFunctionUsage";

#[derive(Debug, Clone, Copy, Default)]
pub struct UntypedFunctionUsage;

/// Whether `declaration` is an untyped library function whose parent also
/// exposes a `$`-suffixed String version.
pub fn has_typed_twin(snapshot: &Snapshot, declaration: &Declaration) -> bool {
    if declaration.is_user_defined
        || declaration.kind != DeclarationKind::Function
        || declaration.name.ends_with('$')
        || !declaration
            .type_name
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("Variant"))
    {
        return false;
    }
    let Some(parent) = declaration.parent else {
        return false;
    };
    let twin = format!("{}$", declaration.name);
    snapshot
        .children_of(parent)
        .iter()
        .any(|d| d.name_is(&twin))
}

impl Inspection for UntypedFunctionUsage {
    fn name(&self) -> &'static str {
        NAME
    }

    fn meta(&self) -> InspectionMeta {
        InspectionMeta {
            description: "Use of a Variant-returning function that has a String-returning version",
            default_severity: Severity::Hint,
        }
    }

    fn interest(&self) -> Interest {
        Interest::library_references()
    }

    fn inspect<'a>(
        &'a self,
        ctx: &'a InspectionContext<'a>,
    ) -> Box<dyn Iterator<Item = InspectionResult> + 'a> {
        let snapshot = ctx.snapshot();
        Box::new(snapshot.references().iter().filter_map(move |reference| {
            if reference.identifier.ends_with('$') {
                return None;
            }
            let declaration = snapshot.declaration(reference.declaration)?;
            if !has_typed_twin(snapshot, declaration) {
                return None;
            }
            let target = ctx.selection(&reference.module, reference.range)?;
            let description = format!(
                "Replace function '{}' with existing typed function '{}$'",
                reference.identifier, declaration.name
            );
            Some(
                ctx.result(self, target, description)
                    .with_declaration(declaration.id)
                    .with_enclosing(reference.enclosing),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::snapshot_of;
    use ducktail_core::types::ModuleKind;

    fn run(text: &str) -> Vec<InspectionResult> {
        let snapshot = snapshot_of(&[("Module1", ModuleKind::Standard, text)]);
        let ctx = InspectionContext::new(&snapshot);
        UntypedFunctionUsage.inspect(&ctx).collect()
    }

    #[test]
    fn flags_untyped_call() {
        let results = run("Option Explicit\nSub Main()\n    Debug.Print Format(1, \"0\")\nEnd Sub\n");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].inspection, NAME);
        assert_eq!(results[0].severity, Severity::Hint);
        let text = "Option Explicit\nSub Main()\n    Debug.Print Format(1, \"0\")\nEnd Sub\n";
        let span = results[0].target.range.span;
        assert_eq!(&text[span.start as usize..span.end as usize], "Format");
    }

    #[test]
    fn typed_call_is_clean() {
        let results = run("Option Explicit\nSub Main()\n    Debug.Print Format$(1, \"0\")\nEnd Sub\n");
        assert!(results.is_empty());
    }

    #[test]
    fn functions_without_twin_are_clean() {
        let results = run("Option Explicit\nSub Main()\n    Debug.Print Len(\"abc\")\nEnd Sub\n");
        assert!(results.is_empty());
    }

    #[test]
    fn user_function_with_library_name_is_clean() {
        let results = run(
            "Option Explicit\nFunction Format(ByVal v As Variant) As Variant\n    Format = v\nEnd Function\n\
             Sub Main()\n    Debug.Print Format(1)\nEnd Sub\n",
        );
        assert!(results.is_empty());
    }
}
