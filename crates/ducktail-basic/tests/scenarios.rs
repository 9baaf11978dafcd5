//! End-to-end scenarios over a store, a coordinator and a rewriting manager.
//!
//! # Organization
//!
//! - Quick fix round trip with state notifications
//! - Background worker reparsing after a commit
//! - Cross-module resolution
//! - Racing sessions on one module
//! - Implicit variables
//! - Deterministic resolution

use std::sync::Arc;

use ducktail_basic::{default_engine, BasicAdapter};
use ducktail_core::facts::{DeclarationKind, ScopeLevel, Snapshot};
use ducktail_core::inspection::{FixRunner, InspectionSettings};
use ducktail_core::session::{RewritingManager, SessionError};
use ducktail_core::state::{ParseCoordinator, ParserState};
use ducktail_core::store::ModuleStore;
use ducktail_core::types::{ModuleId, ModuleKind, QualifiedSelection, Version};
use tokio_util::sync::CancellationToken;

const PROJECT: &str = "VBAProject";

fn id(name: &str) -> ModuleId {
    ModuleId::new(PROJECT, name)
}

struct Project {
    store: Arc<ModuleStore>,
    coordinator: Arc<ParseCoordinator<BasicAdapter>>,
    manager: RewritingManager,
}

fn project(modules: &[(&str, &str)]) -> Project {
    let store = Arc::new(ModuleStore::new());
    for (name, text) in modules {
        store
            .add_module(id(name), ModuleKind::Standard, text)
            .unwrap();
    }
    let coordinator = Arc::new(ParseCoordinator::new(
        Arc::new(BasicAdapter::new()),
        Arc::clone(&store),
    ));
    let manager = RewritingManager::new(Arc::clone(&store));
    manager.add_listener(coordinator.clone());
    assert_eq!(coordinator.parse(), ParserState::Ready);
    Project {
        store,
        coordinator,
        manager,
    }
}

fn text(project: &Project, name: &str) -> String {
    project.store.get(&id(name)).unwrap().text.to_string()
}

fn snapshot(project: &Project) -> Arc<Snapshot> {
    project.coordinator.current_snapshot().snapshot
}

// ============================================================================
// Quick fix round trip
// ============================================================================

mod fix_round_trip {
    use super::*;

    #[test]
    fn format_becomes_format_dollar() {
        let project = project(&[(
            "Module1",
            "Option Explicit\nSub Main()\n    Debug.Print Format(1,\"0\")\nEnd Sub\n",
        )]);
        let mut changes = project.coordinator.subscribe();
        let engine = default_engine(InspectionSettings::default());
        let snapshot = snapshot(&project);

        let results = engine.run(&snapshot);
        let result = results
            .iter()
            .find(|r| r.inspection == "UntypedFunctionUsage")
            .unwrap();
        let fix = engine.fixes_for(&result.inspection).remove(0);
        let outcome = FixRunner::new(&project.manager)
            .apply(fix.as_ref(), result, &snapshot)
            .unwrap();

        assert_eq!(outcome.modules, vec![(id("Module1"), Version(2))]);
        assert_eq!(
            text(&project, "Module1"),
            "Option Explicit\nSub Main()\n    Debug.Print Format$(1,\"0\")\nEnd Sub\n"
        );

        assert_eq!(project.coordinator.parse(), ParserState::Ready);
        let mut states = Vec::new();
        while let Ok(change) = changes.try_recv() {
            states.push(change.state);
        }
        assert_eq!(
            states,
            vec![
                ParserState::Pending,
                ParserState::Parsing,
                ParserState::ResolvingDeclarations,
                ParserState::ResolvingReferences,
                ParserState::Ready,
            ]
        );

        let after = engine.run(&project.coordinator.current_snapshot().snapshot);
        assert!(!after.iter().any(|r| r.inspection == "UntypedFunctionUsage"));
    }
}

// ============================================================================
// Background worker
// ============================================================================

mod background_worker {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn commit_wakes_worker_and_publishes_next_generation() {
        let project = project(&[(
            "Module1",
            "Option Explicit\nSub Main()\n    Debug.Print Format(1,\"0\")\nEnd Sub\n",
        )]);
        let mut changes = project.coordinator.subscribe();
        let cancel = CancellationToken::new();
        let handle = project.coordinator.spawn_worker(cancel.clone());

        let engine = default_engine(InspectionSettings::default());
        let before = snapshot(&project);
        let results = engine.run(&before);
        let result = results
            .iter()
            .find(|r| r.inspection == "UntypedFunctionUsage")
            .unwrap();
        let fix = engine.fixes_for(&result.inspection).remove(0);
        FixRunner::new(&project.manager)
            .apply(fix.as_ref(), result, &before)
            .unwrap();

        loop {
            let change = changes.recv().await.unwrap();
            if change.state == ParserState::Ready {
                assert_eq!(change.generation, 2);
                break;
            }
        }

        let view = project.coordinator.current_snapshot();
        assert!(!view.stale);
        assert!(!engine
            .run(&view.snapshot)
            .iter()
            .any(|r| r.inspection == "UntypedFunctionUsage"));

        cancel.cancel();
        handle.await.unwrap();
    }
}

// ============================================================================
// Cross-module resolution
// ============================================================================

mod cross_module {
    use super::*;

    #[test]
    fn qualified_call_binds_once() {
        let project = project(&[
            ("A", "Option Explicit\nSub Main()\n    B.Foo\nEnd Sub\n"),
            ("B", "Option Explicit\nPublic Sub Foo()\nEnd Sub\n"),
        ]);
        let snapshot = snapshot(&project);
        let foo = snapshot
            .find_qualified("VBAProject.B.Foo")
            .unwrap();
        let references = snapshot.references_to(foo.id);
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].module, id("A"));
        assert_eq!(
            snapshot.declaration(references[0].enclosing.unwrap()).unwrap().name,
            "Main"
        );
    }

    #[test]
    fn unqualified_call_binds_once() {
        let project = project(&[
            ("A", "Option Explicit\nSub Main()\n    Foo\nEnd Sub\n"),
            ("B", "Option Explicit\nPublic Sub Foo()\nEnd Sub\n"),
        ]);
        let snapshot = snapshot(&project);
        let foo = snapshot.find_qualified("VBAProject.B.Foo").unwrap();
        let references = snapshot.references_to(foo.id);
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].module, id("A"));
        assert_eq!(references[0].identifier, "Foo");
        assert!(snapshot.unbound().is_empty());
    }
}

// ============================================================================
// Racing sessions
// ============================================================================

mod racing_sessions {
    use super::*;

    #[test]
    fn first_committer_wins() {
        let project = project(&[("M2", "Sub A()\nEnd Sub\n")]);
        for _ in 0..4 {
            let current = text(&project, "M2");
            project
                .coordinator
                .on_text_changed(&id("M2"), &current)
                .unwrap();
        }
        assert_eq!(project.store.version(&id("M2")), Some(Version(5)));
        assert_eq!(project.coordinator.parse(), ParserState::Ready);

        let snapshot = snapshot(&project);
        let procedure = snapshot.find_qualified("VBAProject.M2.A").unwrap();
        let name = QualifiedSelection::new(id("M2"), Version(5), procedure.selection.unwrap());

        let mut first = project.manager.open_session();
        let mut second = project.manager.open_session();
        first.check_out(&id("M2")).unwrap();
        second.check_out(&id("M2")).unwrap();

        first
            .check_out(&id("M2"))
            .unwrap()
            .replace(&name, "First")
            .unwrap();
        let outcome = first.commit().unwrap();
        assert_eq!(outcome.modules, vec![(id("M2"), Version(6))]);

        second
            .check_out(&id("M2"))
            .unwrap()
            .replace(&name, "Second")
            .unwrap();
        let err = second.commit().unwrap_err();
        assert!(matches!(err, SessionError::Stale { .. }));

        assert_eq!(text(&project, "M2"), "Sub First()\nEnd Sub\n");
        assert_eq!(project.store.version(&id("M2")), Some(Version(6)));
    }
}

// ============================================================================
// Implicit variables
// ============================================================================

mod implicit_variables {
    use super::*;

    #[test]
    fn undeclared_use_synthesizes_a_local() {
        let project = project(&[(
            "Module1",
            "Sub Main()\n    counter = 1\n    Debug.Print counter\nEnd Sub\n",
        )]);
        let snapshot = snapshot(&project);
        let counter = snapshot
            .find_qualified("VBAProject.Module1.Main.counter")
            .unwrap();
        assert!(counter.is_implicit);
        assert_eq!(counter.kind, DeclarationKind::Variable);
        assert_eq!(counter.scope, ScopeLevel::Procedure);
        assert_eq!(counter.type_name.as_deref(), Some("Variant"));
        assert_eq!(snapshot.references_to(counter.id).len(), 2);

        let engine = default_engine(InspectionSettings::default());
        let results = engine.run(&snapshot);
        assert!(results.iter().any(|r| r.inspection == "UndeclaredVariable"));
        assert!(results.iter().any(|r| r.inspection == "OptionExplicit"));
    }
}

// ============================================================================
// Determinism
// ============================================================================

mod determinism {
    use super::*;

    const MODULES: &[(&str, &str)] = &[
        (
            "A",
            "Sub Main()\n    total = Helper(2)\n    Debug.Print Format(total)\n    Missing.Call\nEnd Sub\n",
        ),
        (
            "B",
            "Option Explicit\nPublic Function Helper(ByVal n As Long) As Long\n    Helper = n * 2\nEnd Function\n",
        ),
    ];

    #[test]
    fn same_texts_same_snapshot() {
        let first = snapshot(&project(MODULES));
        let second = snapshot(&project(MODULES));
        assert_eq!(first.declarations(), second.declarations());
        assert_eq!(first.references(), second.references());
        assert_eq!(first.unbound(), second.unbound());
        assert!(!first.unbound().is_empty());
    }
}
