//! Modules without `Option Explicit`.

use ducktail_core::inspection::{
    Inspection, InspectionContext, InspectionMeta, InspectionResult, Interest, Severity,
};
use ducktail_core::types::TokenRange;

pub const NAME: &str = "OptionExplicit";

#[derive(Debug, Clone, Copy, Default)]
pub struct OptionExplicit;

impl Inspection for OptionExplicit {
    fn name(&self) -> &'static str {
        NAME
    }

    fn meta(&self) -> InspectionMeta {
        InspectionMeta {
            description: "Module does not require variables to be declared",
            default_severity: Severity::Warning,
        }
    }

    fn interest(&self) -> Interest {
        Interest::modules()
    }

    fn inspect<'a>(
        &'a self,
        ctx: &'a InspectionContext<'a>,
    ) -> Box<dyn Iterator<Item = InspectionResult> + 'a> {
        let snapshot = ctx.snapshot();
        Box::new(
            snapshot
                .all_module_facts()
                .filter(|facts| !facts.has_option("Explicit"))
                .filter_map(move |facts| {
                    let module = snapshot.module_declaration(&facts.module)?;
                    let first_token = module.context.map(|c| c.start_token).unwrap_or(0);
                    let target = ctx.selection(
                        &facts.module,
                        TokenRange::empty_at(first_token, facts.body_start),
                    )?;
                    let description =
                        format!("Option Explicit is not specified in '{}'", module.name);
                    Some(ctx.result(self, target, description).with_declaration(module.id))
                }),
        )
    }
}
