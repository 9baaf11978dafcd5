//! Insert `Option Explicit` at the top of the declarations section.

use ducktail_core::facts::Snapshot;
use ducktail_core::inspection::{FixError, FixScope, InspectionResult, QuickFix};
use ducktail_core::session::RewriteSession;
use ducktail_core::text::newline_of;

use crate::inspections::option_explicit;

#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptionExplicitQuickFix;

impl QuickFix for AddOptionExplicitQuickFix {
    fn name(&self) -> &'static str {
        "AddOptionExplicitQuickFix"
    }

    fn supported_inspections(&self) -> &[&'static str] {
        &[option_explicit::NAME]
    }

    fn description(&self, result: &InspectionResult, _snapshot: &Snapshot) -> String {
        format!("Add Option Explicit to '{}'", result.module().name)
    }

    fn scopes(&self) -> &[FixScope] {
        &[FixScope::Module, FixScope::Project]
    }

    fn fix(
        &self,
        result: &InspectionResult,
        _snapshot: &Snapshot,
        session: &mut RewriteSession<'_>,
    ) -> Result<(), FixError> {
        let rewriter = session.check_out(result.module())?;
        let line = format!("Option Explicit{}", newline_of(rewriter.base_text()));
        rewriter.insert_before(&result.target, &line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspections::OptionExplicit;
    use crate::test_helpers::Fixture;
    use ducktail_core::inspection::{FixRunner, Inspection, InspectionContext};
    use ducktail_core::types::ModuleKind;

    fn results(fixture: &Fixture) -> (std::sync::Arc<Snapshot>, Vec<InspectionResult>) {
        let snapshot = fixture.snapshot();
        let results = {
            let ctx = InspectionContext::new(&snapshot);
            OptionExplicit.inspect(&ctx).collect()
        };
        (snapshot, results)
    }

    #[test]
    fn inserts_after_the_header() {
        let text = "VERSION 1.0 CLASS\r\nBEGIN\r\n  MultiUse = -1  'True\r\nEND\r\nAttribute VB_Name = \"Widget\"\r\nPrivate mName As String\r\n";
        let fixture = Fixture::new(&[("Widget", ModuleKind::Class, text)]);
        let (snapshot, found) = results(&fixture);
        assert_eq!(found.len(), 1);
        FixRunner::new(&fixture.manager)
            .apply(&AddOptionExplicitQuickFix, &found[0], &snapshot)
            .unwrap();
        assert_eq!(
            fixture.text("Widget"),
            "VERSION 1.0 CLASS\r\nBEGIN\r\n  MultiUse = -1  'True\r\nEND\r\nAttribute VB_Name = \"Widget\"\r\nOption Explicit\r\nPrivate mName As String\r\n"
        );
        let (_, remaining) = results(&fixture);
        assert!(remaining.is_empty());
    }

    #[test]
    fn project_scope_covers_every_module() {
        let fixture = Fixture::new(&[
            ("A", ModuleKind::Standard, "Sub Main()\nEnd Sub\n"),
            ("B", ModuleKind::Standard, "Sub Other()\nEnd Sub\n"),
            ("C", ModuleKind::Standard, "Option Explicit\n"),
        ]);
        let (snapshot, found) = results(&fixture);
        assert_eq!(found.len(), 2);
        let outcome = FixRunner::new(&fixture.manager)
            .apply_in_scope(
                &AddOptionExplicitQuickFix,
                &found[0],
                &found,
                FixScope::Project,
                &snapshot,
            )
            .unwrap();
        assert_eq!(outcome.modules.len(), 2);
        assert_eq!(fixture.text("A"), "Option Explicit\nSub Main()\nEnd Sub\n");
        assert_eq!(fixture.text("B"), "Option Explicit\nSub Other()\nEnd Sub\n");
    }

    #[test]
    fn procedure_scope_is_not_offered() {
        let fixture = Fixture::new(&[("A", ModuleKind::Standard, "Sub Main()\nEnd Sub\n")]);
        let (snapshot, found) = results(&fixture);
        let err = FixRunner::new(&fixture.manager)
            .apply_in_scope(
                &AddOptionExplicitQuickFix,
                &found[0],
                &found,
                FixScope::Procedure,
                &snapshot,
            )
            .unwrap_err();
        assert!(matches!(err, FixError::ScopeNotSupported { .. }));
    }
}
