//! Identifiers that bind to nothing, or to more than one thing with no
//! way to choose.
//!
//! Late-bound member accesses and library ties that priority settled are
//! not reported.

use ducktail_core::facts::UnboundReason;
use ducktail_core::inspection::{
    Inspection, InspectionContext, InspectionMeta, InspectionResult, Interest, Severity,
};

pub const NAME: &str = "UnresolvedIdentifier";

#[derive(Debug, Clone, Copy, Default)]
pub struct UnresolvedIdentifier;

impl Inspection for UnresolvedIdentifier {
    fn name(&self) -> &'static str {
        NAME
    }

    fn meta(&self) -> InspectionMeta {
        InspectionMeta {
            description: "Identifier could not be resolved",
            default_severity: Severity::Warning,
        }
    }

    fn interest(&self) -> Interest {
        Interest::unbound()
    }

    fn inspect<'a>(
        &'a self,
        ctx: &'a InspectionContext<'a>,
    ) -> Box<dyn Iterator<Item = InspectionResult> + 'a> {
        let snapshot = ctx.snapshot();
        Box::new(snapshot.unbound().iter().filter_map(move |unbound| {
            let description = match &unbound.reason {
                UnboundReason::NotFound => format!("'{}' is not defined", unbound.name),
                UnboundReason::LibraryUnavailable { libraries } => format!(
                    "'{}' is not defined; unavailable libraries: {}",
                    unbound.name,
                    libraries.join(", ")
                ),
                UnboundReason::Ambiguous {
                    chosen: None,
                    candidates,
                } => {
                    let names: Vec<&str> = candidates
                        .iter()
                        .filter_map(|id| snapshot.declaration(*id))
                        .map(|d| d.qualified_name.as_str())
                        .collect();
                    format!("'{}' is ambiguous: {}", unbound.name, names.join(", "))
                }
                UnboundReason::Ambiguous { chosen: Some(_), .. } | UnboundReason::LateBound => {
                    return None
                }
            };
            let target = ctx.selection(&unbound.module, unbound.range)?;
            Some(
                ctx.result(self, target, description)
                    .with_enclosing(unbound.enclosing),
            )
        }))
    }
}
