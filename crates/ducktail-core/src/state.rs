//! Parser state machine: parse/resolve cycles and snapshot publication.
//!
//! [`ParseCoordinator`] owns the parse cache and the published [`Snapshot`].
//! A cycle walks `Pending → Parsing → ResolvingDeclarations →
//! ResolvingReferences → Ready`, or stops in `SyntaxError` /
//! `ResolverError` with the previous snapshot still published.
//!
//! # Supersession
//!
//! Text changes never wait for a cycle. They land in the [`ModuleStore`]
//! immediately; the cycle notices that the store revision moved and starts
//! over. Parse trees and declaration summaries are cached per
//! (module, version), so the restart only reparses what actually changed.
//!
//! # Notifications
//!
//! Every transition is sent to every subscriber while the state lock is
//! held, so subscribers observe transitions in the order they happened and
//! never miss a published `Ready`.

use parking_lot::{Mutex, MutexGuard, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{
    LanguageAdapter, ParseDiagnostic, ParsedUnit, ResolveRequest, ResolverDiagnostic, SourceModule,
};
use crate::facts::{Snapshot, SnapshotBuilder};
use crate::session::CommitListener;
use crate::store::{ModuleStore, ModuleText, StoreError};
use crate::types::{LibraryReference, ModuleId, ModuleKind, Version};

// ============================================================================
// Parser State
// ============================================================================

/// Lifecycle state of the parser state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserState {
    Pending,
    Parsing,
    ResolvingDeclarations,
    ResolvingReferences,
    Ready,
    ResolverError,
    SyntaxError,
    /// Suspended by a caller; snapshot reads are stale until released.
    Busy,
}

impl ParserState {
    /// A cycle is running.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ParserState::Parsing
                | ParserState::ResolvingDeclarations
                | ParserState::ResolvingReferences
        )
    }

    /// The cycle stopped on an error.
    pub fn is_error(&self) -> bool {
        matches!(self, ParserState::ResolverError | ParserState::SyntaxError)
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(&self, next: ParserState) -> bool {
        use ParserState::*;
        if next == Busy || *self == Busy {
            return true;
        }
        match (*self, next) {
            (Pending, Parsing) => true,
            (Parsing, SyntaxError | ResolvingDeclarations | Pending) => true,
            (ResolvingDeclarations, ResolvingReferences | Pending) => true,
            (ResolvingReferences, Ready | ResolverError | Pending) => true,
            (Ready | SyntaxError | ResolverError, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParserState::Pending => "pending",
            ParserState::Parsing => "parsing",
            ParserState::ResolvingDeclarations => "resolving_declarations",
            ParserState::ResolvingReferences => "resolving_references",
            ParserState::Ready => "ready",
            ParserState::ResolverError => "resolver_error",
            ParserState::SyntaxError => "syntax_error",
            ParserState::Busy => "busy",
        };
        f.write_str(name)
    }
}

/// One state-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: ParserState,
    /// Generation of the snapshot published when the change was sent.
    pub generation: u64,
}

/// The published snapshot plus whether it lags the module store.
#[derive(Debug, Clone)]
pub struct SnapshotView {
    pub snapshot: Arc<Snapshot>,
    pub state: ParserState,
    pub stale: bool,
}

// ============================================================================
// Coordinator
// ============================================================================

struct CachedModule<A: LanguageAdapter> {
    kind: ModuleKind,
    version: Version,
    text: Arc<str>,
    tree: Arc<A::Tree>,
    declarations: Option<Arc<A::ModuleDeclarations>>,
}

struct Status {
    state: ParserState,
    /// State to restore when the last suspension ends.
    resume: Option<ParserState>,
    suspensions: usize,
    /// Store revision of the last completed cycle.
    settled_revision: Option<u64>,
    subscribers: Vec<mpsc::UnboundedSender<StateChange>>,
}

/// Drives parse/resolve cycles for one module store.
pub struct ParseCoordinator<A: LanguageAdapter> {
    adapter: Arc<A>,
    store: Arc<ModuleStore>,
    status: Mutex<Status>,
    snapshot: RwLock<Arc<Snapshot>>,
    published_revision: Mutex<Option<u64>>,
    cache: Mutex<HashMap<ModuleId, CachedModule<A>>>,
    syntax_errors: RwLock<Vec<ParseDiagnostic>>,
    resolver_errors: RwLock<Vec<ResolverDiagnostic>>,
    cycle_lock: Mutex<()>,
    wake: Notify,
}

impl<A: LanguageAdapter> ParseCoordinator<A> {
    pub fn new(adapter: Arc<A>, store: Arc<ModuleStore>) -> Self {
        ParseCoordinator {
            adapter,
            store,
            status: Mutex::new(Status {
                state: ParserState::Pending,
                resume: None,
                suspensions: 0,
                settled_revision: None,
                subscribers: Vec::new(),
            }),
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            published_revision: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
            syntax_errors: RwLock::new(Vec::new()),
            resolver_errors: RwLock::new(Vec::new()),
            cycle_lock: Mutex::new(()),
            wake: Notify::new(),
        }
    }

    pub fn store(&self) -> &Arc<ModuleStore> {
        &self.store
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    // ------------------------------------------------------------------------
    // State and notifications
    // ------------------------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> ParserState {
        self.status.lock().state
    }

    /// Subscribe to every future state change.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.status.lock().subscribers.push(tx);
        rx
    }

    fn transition(&self, status: &mut MutexGuard<'_, Status>, next: ParserState) {
        if status.state == next {
            return;
        }
        if !status.state.can_transition_to(next) {
            warn!(from = %status.state, to = %next, "unexpected parser state transition");
        }
        debug!(from = %status.state, to = %next, "parser state");
        status.state = next;
        let change = StateChange {
            state: next,
            generation: self.snapshot.read().generation(),
        };
        status.subscribers.retain(|tx| tx.send(change).is_ok());
    }

    fn set_state(&self, next: ParserState) {
        let mut status = self.status.lock();
        if status.suspensions > 0 {
            status.resume = Some(next);
            return;
        }
        self.transition(&mut status, next);
    }

    /// Mark the machine Pending after a store mutation and wake the worker.
    fn invalidate(&self) {
        {
            let mut status = self.status.lock();
            if status.suspensions > 0 {
                status.resume = Some(ParserState::Pending);
            } else if !status.state.is_in_flight() {
                self.transition(&mut status, ParserState::Pending);
            }
        }
        self.wake.notify_one();
    }

    /// Suspend the machine: reports Busy and blocks cycles until the guard
    /// is dropped.
    pub fn suspend(&self) -> BusyGuard<'_, A> {
        let cycle = self.cycle_lock.lock();
        let mut status = self.status.lock();
        status.suspensions += 1;
        if status.suspensions == 1 {
            status.resume = Some(status.state);
            self.transition(&mut status, ParserState::Busy);
        }
        drop(status);
        BusyGuard {
            coordinator: self,
            _cycle: cycle,
        }
    }

    fn resume(&self) {
        let mut status = self.status.lock();
        status.suspensions = status.suspensions.saturating_sub(1);
        if status.suspensions == 0 {
            let next = status.resume.take().unwrap_or(ParserState::Pending);
            self.transition(&mut status, next);
        }
    }

    // ------------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------------

    /// New text for an existing module.
    pub fn on_text_changed(&self, id: &ModuleId, text: &str) -> Result<Version, StoreError> {
        let version = self.store.replace_text(id, text)?;
        info!(module = %id, %version, "module text changed");
        self.invalidate();
        Ok(version)
    }

    /// Add a module to the project set.
    pub fn add_module(
        &self,
        id: ModuleId,
        kind: ModuleKind,
        text: &str,
    ) -> Result<Version, StoreError> {
        let version = self.store.add_module(id, kind, text)?;
        self.invalidate();
        Ok(version)
    }

    /// Remove a module from the project set.
    pub fn remove_module(&self, id: &ModuleId) -> Result<(), StoreError> {
        self.store.remove_module(id)?;
        self.invalidate();
        Ok(())
    }

    /// Replace a project's library references and request a reparse.
    pub fn on_references_changed(&self, project: &str, references: Vec<LibraryReference>) {
        self.store.set_references(project, references);
        info!(project, "library references changed");
        self.invalidate();
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// The last published snapshot; never waits for a running cycle.
    pub fn current_snapshot(&self) -> SnapshotView {
        let snapshot = Arc::clone(&self.snapshot.read());
        let state = self.state();
        let published = *self.published_revision.lock();
        let stale = state != ParserState::Ready || published != Some(self.store.revision());
        SnapshotView {
            snapshot,
            state,
            stale,
        }
    }

    /// Syntax errors of the last cycle that stopped in `SyntaxError`.
    pub fn syntax_errors(&self) -> Vec<ParseDiagnostic> {
        self.syntax_errors.read().clone()
    }

    /// Invariant violations of the last cycle that stopped in `ResolverError`.
    pub fn resolver_errors(&self) -> Vec<ResolverDiagnostic> {
        self.resolver_errors.read().clone()
    }

    /// Modules whose store version differs from the published snapshot.
    pub fn modified_modules(&self) -> Vec<ModuleId> {
        let snapshot = Arc::clone(&self.snapshot.read());
        self.store
            .versions()
            .into_iter()
            .filter(|(id, v)| snapshot.module_version(id) != Some(*v))
            .map(|(id, _)| id)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Cycles
    // ------------------------------------------------------------------------

    /// Run cycles until the machine settles, returning the final state.
    pub fn parse(&self) -> ParserState {
        let _cycle = self.cycle_lock.lock();
        loop {
            let revision = self.store.revision();
            {
                let status = self.status.lock();
                if status.settled_revision == Some(revision) {
                    return status.state;
                }
            }

            match self.run_cycle(revision) {
                CycleOutcome::Settled(state) => {
                    self.status.lock().settled_revision = Some(revision);
                    return state;
                }
                CycleOutcome::Superseded => {
                    debug!(revision, "cycle superseded");
                    self.set_state(ParserState::Pending);
                }
            }
        }
    }

    fn run_cycle(&self, revision: u64) -> CycleOutcome {
        if self.state() != ParserState::Pending {
            self.set_state(ParserState::Pending);
        }
        self.set_state(ParserState::Parsing);
        let modules = self.store.modules();

        let failures = self.parse_modules(&modules);
        if self.store.revision() != revision {
            return CycleOutcome::Superseded;
        }
        if !failures.is_empty() {
            for failure in &failures {
                warn!(module = %failure.module, line = failure.line, col = failure.col, "{}", failure.message);
            }
            *self.syntax_errors.write() = failures;
            self.set_state(ParserState::SyntaxError);
            return CycleOutcome::Settled(ParserState::SyntaxError);
        }
        self.syntax_errors.write().clear();

        self.set_state(ParserState::ResolvingDeclarations);
        let units = self.collect_declarations();

        self.set_state(ParserState::ResolvingReferences);
        let references: BTreeMap<String, Vec<LibraryReference>> = self
            .store
            .projects()
            .into_iter()
            .map(|p| {
                let refs = self.store.references(&p);
                (p, refs)
            })
            .collect();
        let request = ResolveRequest {
            units: &units,
            references: &references,
        };
        let mut builder = SnapshotBuilder::new();
        if let Err(errors) = self.adapter.resolve(&request, &mut builder) {
            return self.fail_resolution(errors);
        }

        let generation = self.snapshot.read().generation() + 1;
        let versions = units.iter().map(|u| (u.id.clone(), u.version)).collect();
        let snapshot = match builder.build(generation, versions) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return self.fail_resolution(vec![ResolverDiagnostic {
                    module: units
                        .first()
                        .map(|u| u.id.clone())
                        .unwrap_or_else(|| ModuleId::new("", "")),
                    name: String::new(),
                    range: None,
                    message: e.to_string(),
                }]);
            }
        };

        {
            // Check the revision and publish under the status lock. A text
            // change before the lock is caught here; one after it sees
            // Ready and moves the machine to Pending.
            let mut status = self.status.lock();
            if self.store.revision() != revision {
                return CycleOutcome::Superseded;
            }
            *self.snapshot.write() = Arc::new(snapshot);
            *self.published_revision.lock() = Some(revision);
            self.resolver_errors.write().clear();
            if status.suspensions > 0 {
                status.resume = Some(ParserState::Ready);
            } else {
                self.transition(&mut status, ParserState::Ready);
            }
        }
        info!(
            generation,
            modules = units.len(),
            language = self.adapter.language(),
            "snapshot published"
        );
        CycleOutcome::Settled(ParserState::Ready)
    }

    fn fail_resolution(&self, errors: Vec<ResolverDiagnostic>) -> CycleOutcome {
        for error in &errors {
            warn!(module = %error.module, name = %error.name, "{}", error.message);
        }
        *self.resolver_errors.write() = errors;
        self.set_state(ParserState::ResolverError);
        CycleOutcome::Settled(ParserState::ResolverError)
    }

    /// Parse every module without a cached tree for its current version.
    fn parse_modules(&self, modules: &[ModuleText]) -> Vec<ParseDiagnostic> {
        let stale: Vec<&ModuleText> = {
            let mut cache = self.cache.lock();
            cache.retain(|id, _| modules.iter().any(|m| &m.id == id));
            modules
                .iter()
                .filter(|m| cache.get(&m.id).map(|c| c.version) != Some(m.version))
                .collect()
        };
        debug!(total = modules.len(), reparse = stale.len(), "parsing modules");

        let results: Vec<(&ModuleText, Result<A::Tree, ParseDiagnostic>)> = stale
            .par_iter()
            .map(|m| {
                let source = SourceModule {
                    id: &m.id,
                    kind: m.kind,
                    version: m.version,
                    text: &m.text,
                };
                (*m, self.adapter.parse(&source))
            })
            .collect();

        let mut failures = Vec::new();
        let mut cache = self.cache.lock();
        for (module, result) in results {
            match result {
                Ok(tree) => {
                    cache.insert(
                        module.id.clone(),
                        CachedModule {
                            kind: module.kind,
                            version: module.version,
                            text: Arc::clone(&module.text),
                            tree: Arc::new(tree),
                            declarations: None,
                        },
                    );
                }
                Err(diagnostic) => failures.push(diagnostic),
            }
        }
        failures.sort_by(|a, b| (&a.module, a.line, a.col).cmp(&(&b.module, b.line, b.col)));
        failures
    }

    /// Fill in missing declaration summaries and return every unit in id order.
    fn collect_declarations(&self) -> Vec<ParsedUnit<A::Tree, A::ModuleDeclarations>> {
        let pending: Vec<(ModuleId, ModuleKind, Version, Arc<str>, Arc<A::Tree>)> = self
            .cache
            .lock()
            .iter()
            .filter(|(_, c)| c.declarations.is_none())
            .map(|(id, c)| {
                (
                    id.clone(),
                    c.kind,
                    c.version,
                    Arc::clone(&c.text),
                    Arc::clone(&c.tree),
                )
            })
            .collect();

        let collected: Vec<(ModuleId, Version, A::ModuleDeclarations)> = pending
            .par_iter()
            .map(|(id, kind, version, text, tree)| {
                let source = SourceModule {
                    id,
                    kind: *kind,
                    version: *version,
                    text,
                };
                (
                    id.clone(),
                    *version,
                    self.adapter.collect_declarations(&source, tree),
                )
            })
            .collect();

        let mut cache = self.cache.lock();
        for (id, version, declarations) in collected {
            if let Some(entry) = cache.get_mut(&id) {
                if entry.version == version {
                    entry.declarations = Some(Arc::new(declarations));
                }
            }
        }

        let mut units: Vec<ParsedUnit<A::Tree, A::ModuleDeclarations>> = cache
            .iter()
            .filter_map(|(id, c)| {
                c.declarations.as_ref().map(|d| ParsedUnit {
                    id: id.clone(),
                    kind: c.kind,
                    version: c.version,
                    text: Arc::clone(&c.text),
                    tree: Arc::clone(&c.tree),
                    declarations: Arc::clone(d),
                })
            })
            .collect();
        units.sort_by(|a, b| a.id.cmp(&b.id));
        units
    }

    // ------------------------------------------------------------------------
    // Background worker
    // ------------------------------------------------------------------------

    /// Run cycles on the blocking pool whenever an input arrives, until
    /// `cancel` fires.
    pub fn spawn_worker(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        coordinator.wake.notify_one();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("parser worker stopping");
                        break;
                    }
                    _ = coordinator.wake.notified() => {
                        let worker = Arc::clone(&coordinator);
                        match tokio::task::spawn_blocking(move || worker.parse()).await {
                            Ok(state) => debug!(%state, "parser worker settled"),
                            Err(e) => warn!(error = %e, "parser cycle panicked"),
                        }
                    }
                }
            }
        })
    }
}

impl<A: LanguageAdapter> CommitListener for ParseCoordinator<A> {
    fn modules_committed(&self, modules: &[(ModuleId, Version)]) {
        debug!(modules = modules.len(), "rewrite committed");
        self.invalidate();
    }
}

enum CycleOutcome {
    Settled(ParserState),
    Superseded,
}

/// Keeps the coordinator Busy until dropped.
pub struct BusyGuard<'a, A: LanguageAdapter> {
    coordinator: &'a ParseCoordinator<A>,
    _cycle: MutexGuard<'a, ()>,
}

impl<A: LanguageAdapter> Drop for BusyGuard<'_, A> {
    fn drop(&mut self) {
        self.coordinator.resume();
    }
}

// ============================================================================
// Tests
// ============================================================================
