//! Test fixture: a store, a coordinator over [`BasicAdapter`] and a
//! rewriting manager wired together, parsed to Ready.

use std::sync::Arc;

use ducktail_core::facts::{Declaration, Snapshot};
use ducktail_core::session::RewritingManager;
use ducktail_core::state::{ParseCoordinator, ParserState};
use ducktail_core::store::ModuleStore;
use ducktail_core::types::{ModuleId, ModuleKind};

use crate::adapter::BasicAdapter;

pub const PROJECT: &str = "VBAProject";

pub fn module_id(name: &str) -> ModuleId {
    ModuleId::new(PROJECT, name)
}

pub struct Fixture {
    pub coordinator: Arc<ParseCoordinator<BasicAdapter>>,
    pub manager: RewritingManager,
}

impl Fixture {
    /// Load `modules` into project [`PROJECT`] and parse.
    ///
    /// # Panics
    ///
    /// If the modules do not reach Ready.
    pub fn new(modules: &[(&str, ModuleKind, &str)]) -> Self {
        let store = Arc::new(ModuleStore::new());
        for (name, kind, text) in modules {
            store
                .add_module(module_id(name), *kind, text)
                .expect("add module");
        }
        let coordinator = Arc::new(ParseCoordinator::new(
            Arc::new(BasicAdapter::new()),
            Arc::clone(&store),
        ));
        let manager = RewritingManager::new(store);
        manager.add_listener(coordinator.clone());
        let fixture = Fixture {
            coordinator,
            manager,
        };
        assert_eq!(
            fixture.coordinator.parse(),
            ParserState::Ready,
            "syntax: {:?} resolver: {:?}",
            fixture.coordinator.syntax_errors(),
            fixture.coordinator.resolver_errors()
        );
        fixture
    }

    /// Reparse and return the fresh snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.coordinator.parse();
        self.coordinator.current_snapshot().snapshot
    }

    pub fn text(&self, name: &str) -> String {
        self.manager
            .store()
            .get(&module_id(name))
            .map(|m| m.text.to_string())
            .unwrap_or_default()
    }
}

/// Parse `modules` and return the resulting snapshot.
pub fn snapshot_of(modules: &[(&str, ModuleKind, &str)]) -> Arc<Snapshot> {
    Fixture::new(modules).snapshot()
}

/// A user declaration by dotted path below the project (`Module1.Main.x`).
pub fn user<'s>(snapshot: &'s Snapshot, path: &str) -> &'s Declaration {
    let qualified = format!("{}.{}", PROJECT, path);
    snapshot
        .find_qualified(&qualified)
        .unwrap_or_else(|| panic!("no declaration {qualified}"))
}
