//! VBA language support for ducktail.
//!
//! This crate plugs the VBA dialect into the core engine:
//! - Lexer and recursive-descent parser producing module syntax trees
//! - Declaration collection and the reference resolver
//! - Library models for referenced type libraries
//! - Inspections, quick fixes and the extract-interface refactoring
//! - Library reference reconciliation and unit-test discovery
//!
//! [`BasicAdapter`] is the [`LanguageAdapter`](ducktail_core::adapter::LanguageAdapter)
//! to hand to a [`ParseCoordinator`](ducktail_core::state::ParseCoordinator);
//! [`default_engine`] wires every inspection and fix into an engine.

pub mod adapter;
pub mod declarations;
pub mod fixes;
pub mod inspections;
pub mod lexer;
pub mod library;
pub mod parser;
pub mod references;
pub mod refactorings;
pub mod resolver;
pub mod syntax;
pub mod testing;

#[cfg(test)]
mod test_helpers;

use ducktail_core::inspection::{InspectionEngine, InspectionSettings};

pub use adapter::BasicAdapter;
pub use library::{BuiltinLibraries, LibraryProvider};

/// An inspection engine with every inspection and quick fix of this crate.
pub fn default_engine(settings: InspectionSettings) -> InspectionEngine {
    let mut engine = InspectionEngine::new().with_settings(settings);
    for inspection in inspections::all() {
        engine.register(inspection);
    }
    for fix in fixes::all() {
        engine.register_fix(fix);
    }
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use ducktail_core::inspection::Severity;

    #[test]
    fn default_engine_registers_fixes_for_their_inspections() {
        let engine = default_engine(InspectionSettings::default());
        assert_eq!(engine.inspections().len(), 5);
        for inspection in engine.inspections() {
            let fixes = engine.fixes_for(inspection.name());
            for fix in &fixes {
                assert!(fix.supports(inspection.name()));
            }
        }
        assert_eq!(engine.fixes_for("UntypedFunctionUsage").len(), 1);
        assert!(engine.fix_named("AddOptionExplicitQuickFix").is_some());
    }

    #[test]
    fn settings_are_kept() {
        let mut settings = InspectionSettings::default();
        settings
            .severity
            .insert("OptionExplicit".to_string(), Severity::Error);
        let engine = default_engine(settings.clone());
        assert_eq!(engine.settings(), &settings);
    }
}
