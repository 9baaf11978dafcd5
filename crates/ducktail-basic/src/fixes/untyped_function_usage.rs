//! Switch a Variant-returning library call to its String twin.
//!
//! Breaks code that passes `Null` to the function; the String versions
//! raise an error where the Variant versions return `Null`.

use ducktail_core::facts::Snapshot;
use ducktail_core::inspection::{FixError, FixScope, InspectionResult, QuickFix};
use ducktail_core::session::RewriteSession;
use ducktail_core::text::extract_span;

use crate::inspections::untyped_function_usage;

#[derive(Debug, Clone, Copy, Default)]
pub struct UntypedFunctionUsageQuickFix;

impl QuickFix for UntypedFunctionUsageQuickFix {
    fn name(&self) -> &'static str {
        "UntypedFunctionUsageQuickFix"
    }

    fn supported_inspections(&self) -> &[&'static str] {
        &[untyped_function_usage::NAME]
    }

    fn description(&self, result: &InspectionResult, snapshot: &Snapshot) -> String {
        let span = result.target.range.span;
        let Some(text) = snapshot.module_text(result.module()) else {
            return "Use the String-returning function".to_string();
        };
        let name = extract_span(text, &span).unwrap_or_default();
        let call = if text
            .get(span.end as usize..)
            .is_some_and(|rest| rest.starts_with('('))
        {
            "("
        } else {
            ""
        };
        format!("Replace '{name}{call}' with '{name}${call}'")
    }

    fn scopes(&self) -> &[FixScope] {
        &[FixScope::Procedure, FixScope::Module, FixScope::Project]
    }

    fn fix(
        &self,
        result: &InspectionResult,
        _snapshot: &Snapshot,
        session: &mut RewriteSession<'_>,
    ) -> Result<(), FixError> {
        session
            .check_out(result.module())?
            .insert_after(&result.target, "$")?;
        Ok(())
    }
}
