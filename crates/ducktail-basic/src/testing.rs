//! Unit-test discovery.
//!
//! Test modules carry `'@TestModule`; their test procedures carry
//! `'@TestMethod`. Tests talk to the add-in's assert classes, so projects
//! that declare one need the add-in library referenced.

use serde::Serialize;
use tracing::info;

use ducktail_core::adapter::LanguageAdapter;
use ducktail_core::facts::{DeclarationId, DeclarationKind, Snapshot};
use ducktail_core::state::ParseCoordinator;
use ducktail_core::types::{LibraryReference, ModuleId, TokenRange};

use crate::library::ASSERT_LIBRARY;

pub const TEST_MODULE_ANNOTATION: &str = "TestModule";
pub const TEST_METHOD_ANNOTATION: &str = "TestMethod";

const ASSERT_TYPES: &[&str] = &["Rubberduck.AssertClass", "Rubberduck.PermissiveAssertClass"];

/// One discovered test procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestMethod {
    pub module: ModuleId,
    pub name: String,
    pub declaration: DeclarationId,
    pub selection: Option<TokenRange>,
}

/// Every `'@TestMethod` procedure in a `'@TestModule` module, in module
/// then declaration order.
pub fn discover_tests(snapshot: &Snapshot) -> Vec<TestMethod> {
    let mut tests: Vec<TestMethod> = snapshot
        .user_declarations()
        .filter(|d| d.kind == DeclarationKind::Procedure)
        .filter(|d| d.has_annotation(TEST_METHOD_ANNOTATION))
        .filter_map(|d| {
            let module = d.module.as_ref()?;
            let facts = snapshot.module_facts(module)?;
            facts
                .has_annotation(TEST_MODULE_ANNOTATION)
                .then(|| TestMethod {
                    module: module.clone(),
                    name: d.name.clone(),
                    declaration: d.id,
                    selection: d.selection,
                })
        })
        .collect();
    tests.sort_by(|a, b| a.module.cmp(&b.module).then(a.declaration.cmp(&b.declaration)));
    tests
}

/// Projects declaring something typed as one of the add-in's assert classes.
pub fn projects_requiring_assert_library(snapshot: &Snapshot) -> Vec<String> {
    let mut projects: Vec<String> = snapshot
        .user_declarations()
        .filter(|d| {
            d.type_name
                .as_deref()
                .is_some_and(|t| ASSERT_TYPES.iter().any(|a| a.eq_ignore_ascii_case(t)))
        })
        .filter_map(|d| d.module.as_ref().map(|m| m.project.clone()))
        .collect();
    projects.sort();
    projects.dedup();
    projects
}

/// Reference the add-in library from every project that needs it and lacks
/// it. Returns the projects that changed.
pub fn ensure_assert_library<A: LanguageAdapter>(coordinator: &ParseCoordinator<A>) -> Vec<String> {
    let snapshot = coordinator.current_snapshot().snapshot;
    let mut changed = Vec::new();
    for project in projects_requiring_assert_library(&snapshot) {
        let mut references = coordinator.store().references(&project);
        if references
            .iter()
            .any(|r| r.name.eq_ignore_ascii_case(ASSERT_LIBRARY))
        {
            continue;
        }
        let priority = references.iter().map(|r| r.priority + 1).max().unwrap_or(1);
        references.push(LibraryReference::new(ASSERT_LIBRARY, "", priority));
        info!(project = %project, "assert library referenced");
        coordinator.on_references_changed(&project, references);
        changed.push(project);
    }
    changed
}
