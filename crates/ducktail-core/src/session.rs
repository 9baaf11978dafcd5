//! Rewrite sessions: transactional, multi-module text edits.
//!
//! A [`RewriteSession`] collects edits from any number of fixes or
//! refactorings and commits them as one unit:
//! - Module rewriters are checked out lazily; the base version of a module is
//!   captured the first time it is checked out
//! - Edits are measured against that base text and never touch the store
//!   before commit
//! - Commit is all-or-nothing across every touched module
//! - Sessions are single-use; rollback always succeeds
//!
//! # Concurrency Model
//!
//! Sessions never lock modules while they are open. They use Optimistic
//! Concurrency Control instead:
//!
//! 1. On first checkout: record the module's current version as its base
//! 2. On commit: verify every base version still matches, under the store's
//!    write lock, and apply the whole batch there
//! 3. If any version moved: return [`SessionError::Stale`], write nothing;
//!    the caller replans against a fresh snapshot
//!
//! Racing sessions on one module therefore resolve first-committer-wins,
//! while sessions on disjoint modules never contend. See [`with_retry`] for
//! automatic replanning.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::interaction::{MessageSink, ModuleHost};
use crate::patch::{apply_edits, Conflict, Edit, Span};
use crate::store::{BatchChange, CommitBatch, ModuleStore, StoreError};
use crate::text;
use crate::types::{ModuleId, ModuleKind, QualifiedSelection, Version};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during session operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session was already committed or rolled back.
    #[error("{session} is {state} and cannot be used")]
    Closed {
        session: SessionId,
        state: SessionState,
    },

    /// The module does not exist in the store.
    #[error("module not found: {module}")]
    ModuleNotFound { module: ModuleId },

    /// A staged new module already exists.
    #[error("module already exists: {module}")]
    ModuleExists { module: ModuleId },

    /// An edit target was measured against a different module or version
    /// than the rewriter's base.
    #[error("target {target} does not belong to {module} at {base}")]
    StaleTarget {
        module: ModuleId,
        base: Version,
        target: QualifiedSelection,
    },

    /// A module changed after this session checked it out.
    ///
    /// Nothing was written. The caller should:
    /// 1. Wait for a fresh snapshot
    /// 2. Re-plan its edits against it
    /// 3. Commit a new session
    ///
    /// See `with_retry()` helper for automatic retry logic.
    #[error("session is stale: {module} is at {actual}, session based on {expected}")]
    Stale {
        module: ModuleId,
        expected: Version,
        actual: Version,
    },

    /// Two edits of one module overlap.
    #[error("overlapping edits in {module}")]
    OverlappingEdits {
        module: ModuleId,
        conflicts: Vec<Conflict>,
    },

    /// An edit falls outside its module's base text.
    #[error("invalid edit in {module}: {reason}")]
    InvalidEdit { module: ModuleId, reason: String },
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Re-run `operation` while it fails with [`SessionError::Stale`].
///
/// The operation must re-plan from a fresh snapshot on every attempt.
/// Backs off exponentially between attempts.
pub fn with_retry<T, F>(mut operation: F, max_retries: usize) -> SessionResult<T>
where
    F: FnMut() -> SessionResult<T>,
{
    let mut attempts = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(SessionError::Stale { .. }) if attempts < max_retries => {
                attempts += 1;
                // Exponential backoff: 10ms, 20ms, 40ms, ...
                let delay_ms = 10 * (1 << attempts.min(6));
                std::thread::sleep(Duration::from_millis(delay_ms));
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Session Identity and State
// ============================================================================

/// Session identifier, unique per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// Lifecycle of a rewrite session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Committed,
    RolledBack,
    Stale,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Open => "open",
            SessionState::Committed => "committed",
            SessionState::RolledBack => "rolled back",
            SessionState::Stale => "stale",
        };
        f.write_str(name)
    }
}

/// Receives the new module versions after every successful commit.
pub trait CommitListener: Send + Sync {
    fn modules_committed(&self, modules: &[(ModuleId, Version)]);
}

/// What a successful commit did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub session: SessionId,
    /// New version of every module written or created.
    pub modules: Vec<(ModuleId, Version)>,
    /// Host write-through failures; the store is already updated.
    pub host_failures: Vec<(ModuleId, String)>,
}

// ============================================================================
// Module Rewriter
// ============================================================================

/// Pending edits for one module, against the text it was checked out at.
#[derive(Debug, Clone)]
pub struct ModuleRewriter {
    module: ModuleId,
    kind: ModuleKind,
    base_version: Version,
    base_text: Arc<str>,
    edits: Vec<Edit>,
    next_edit_id: u32,
}

impl ModuleRewriter {
    fn new(module: ModuleId, kind: ModuleKind, base_version: Version, base_text: Arc<str>) -> Self {
        ModuleRewriter {
            module,
            kind,
            base_version,
            base_text,
            edits: Vec::new(),
            next_edit_id: 0,
        }
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn base_version(&self) -> Version {
        self.base_version
    }

    pub fn base_text(&self) -> &str {
        &self.base_text
    }

    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    pub fn has_edits(&self) -> bool {
        !self.edits.is_empty()
    }

    fn check(&self, target: &QualifiedSelection) -> SessionResult<Span> {
        if target.module != self.module || target.version != self.base_version {
            return Err(SessionError::StaleTarget {
                module: self.module.clone(),
                base: self.base_version,
                target: target.clone(),
            });
        }
        let span = target.range.span;
        if span.end as usize > self.base_text.len() {
            return Err(SessionError::InvalidEdit {
                module: self.module.clone(),
                reason: format!(
                    "{} is past the end of the text ({} bytes)",
                    span,
                    self.base_text.len()
                ),
            });
        }
        Ok(span)
    }

    fn push(&mut self, build: impl FnOnce(u32) -> Edit) {
        let edit = build(self.next_edit_id);
        self.next_edit_id += 1;
        self.edits.push(edit);
    }

    /// Insert `text` before the first token of `target`.
    pub fn insert_before(&mut self, target: &QualifiedSelection, text: &str) -> SessionResult<()> {
        let span = self.check(target)?;
        self.push(|id| Edit::insert(id, span.start, text));
        Ok(())
    }

    /// Insert `text` after the last token of `target`.
    pub fn insert_after(&mut self, target: &QualifiedSelection, text: &str) -> SessionResult<()> {
        let span = self.check(target)?;
        self.push(|id| Edit::insert(id, span.end, text));
        Ok(())
    }

    /// Replace the tokens of `target` with `text`.
    pub fn replace(&mut self, target: &QualifiedSelection, text: &str) -> SessionResult<()> {
        let span = self.check(target)?;
        self.push(|id| Edit::replace(id, span, text));
        Ok(())
    }

    /// Remove the tokens of `target`.
    pub fn remove(&mut self, target: &QualifiedSelection) -> SessionResult<()> {
        let span = self.check(target)?;
        self.push(|id| Edit::delete(id, span));
        Ok(())
    }

    /// Remove every line `target` touches, newlines included.
    pub fn remove_lines(&mut self, target: &QualifiedSelection) -> SessionResult<()> {
        let span = self.check(target)?;
        let first = text::line_bounds(&self.base_text, span.start as usize);
        let last_offset = span.end.saturating_sub(1).max(span.start) as usize;
        let last = text::line_bounds(&self.base_text, last_offset);
        self.push(|id| Edit::delete(id, Span::new(first.start, last.end)));
        Ok(())
    }

    /// Insert `text` at the start of the line containing `target`.
    pub fn insert_line_before(
        &mut self,
        target: &QualifiedSelection,
        text: &str,
    ) -> SessionResult<()> {
        let span = self.check(target)?;
        let line = text::line_bounds(&self.base_text, span.start as usize);
        self.push(|id| Edit::insert(id, line.start, text));
        Ok(())
    }

    /// Append `text` at the end of the module.
    pub fn append(&mut self, text: &str) {
        let end = self.base_text.len() as u64;
        self.push(|id| Edit::insert(id, end, text));
    }

    /// The text this rewriter would commit.
    pub fn preview(&self) -> Result<String, Vec<Conflict>> {
        apply_edits(&self.base_text, &self.edits)
    }
}

// ============================================================================
// Rewriting Manager
// ============================================================================

/// Opens sessions over one module store and fans out commit notifications.
pub struct RewritingManager {
    store: Arc<ModuleStore>,
    next_id: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn CommitListener>>>,
    host: Option<Arc<dyn ModuleHost>>,
    messages: Option<Arc<dyn MessageSink>>,
}

impl RewritingManager {
    pub fn new(store: Arc<ModuleStore>) -> Self {
        RewritingManager {
            store,
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
            host: None,
            messages: None,
        }
    }

    /// Write committed text through to `host`.
    pub fn with_host(mut self, host: Arc<dyn ModuleHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Report host write failures to `sink`.
    pub fn with_message_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.messages = Some(sink);
        self
    }

    /// Register a listener for successful commits.
    pub fn add_listener(&self, listener: Arc<dyn CommitListener>) {
        self.listeners.write().push(listener);
    }

    pub fn store(&self) -> &Arc<ModuleStore> {
        &self.store
    }

    /// Open a new, empty session.
    pub fn open_session(&self) -> RewriteSession<'_> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(session = %id, "session opened");
        RewriteSession {
            id,
            manager: self,
            state: SessionState::Open,
            rewriters: BTreeMap::new(),
            new_modules: Vec::new(),
        }
    }

    fn write_through(&self, modules: &[(ModuleId, Version)]) -> Vec<(ModuleId, String)> {
        let Some(host) = &self.host else {
            return Vec::new();
        };
        let mut failures = Vec::new();
        for (module, _) in modules {
            let Some(current) = self.store.get(module) else {
                continue;
            };
            if let Err(e) = host.replace_module_text(module, &current.text) {
                failures.push((module.clone(), e.to_string()));
            }
        }
        for (module, message) in &failures {
            warn!(module = %module, "host write failed: {}", message);
            if let Some(sink) = &self.messages {
                sink.notify_warn(
                    &format!("Could not write {} back to the host: {}", module, message),
                    "Rewrite",
                );
            }
        }
        failures
    }
}

// ============================================================================
// Rewrite Session
// ============================================================================

/// A single-use transaction of module edits.
pub struct RewriteSession<'m> {
    id: SessionId,
    manager: &'m RewritingManager,
    state: SessionState,
    rewriters: BTreeMap<ModuleId, ModuleRewriter>,
    new_modules: Vec<(ModuleId, ModuleKind, String)>,
}

impl RewriteSession<'_> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.state != SessionState::Open {
            return Err(SessionError::Closed {
                session: self.id,
                state: self.state,
            });
        }
        Ok(())
    }

    /// The rewriter for `module`, created on first checkout.
    ///
    /// The base version is captured here, the first time the module is
    /// checked out in this session; later checkouts return the same rewriter.
    pub fn check_out(&mut self, module: &ModuleId) -> SessionResult<&mut ModuleRewriter> {
        self.ensure_open()?;
        if !self.rewriters.contains_key(module) {
            let current =
                self.manager
                    .store
                    .get(module)
                    .ok_or_else(|| SessionError::ModuleNotFound {
                        module: module.clone(),
                    })?;
            debug!(session = %self.id, module = %module, version = %current.version, "module checked out");
            self.rewriters.insert(
                module.clone(),
                ModuleRewriter::new(module.clone(), current.kind, current.version, current.text),
            );
        }
        self.rewriters
            .get_mut(module)
            .ok_or_else(|| SessionError::ModuleNotFound {
                module: module.clone(),
            })
    }

    /// The rewriter for `module` if it was checked out.
    pub fn rewriter(&self, module: &ModuleId) -> Option<&ModuleRewriter> {
        self.rewriters.get(module)
    }

    /// Modules checked out so far, with their base versions.
    pub fn base_versions(&self) -> Vec<(ModuleId, Version)> {
        self.rewriters
            .values()
            .map(|r| (r.module.clone(), r.base_version))
            .collect()
    }

    /// Stage a new module, created by the commit.
    pub fn add_module(&mut self, module: ModuleId, kind: ModuleKind, text: String) -> SessionResult<()> {
        self.ensure_open()?;
        if self.manager.store.version(&module).is_some()
            || self.new_modules.iter().any(|(m, _, _)| m == &module)
        {
            return Err(SessionError::ModuleExists { module });
        }
        self.new_modules.push((module, kind, text));
        Ok(())
    }

    /// Whether the session would change anything.
    pub fn has_changes(&self) -> bool {
        !self.new_modules.is_empty() || self.rewriters.values().any(ModuleRewriter::has_edits)
    }

    /// Commit every edit and staged module, or nothing.
    pub fn commit(&mut self) -> SessionResult<CommitOutcome> {
        self.ensure_open()?;

        // Cheap early check; the batch re-verifies under the write lock.
        for rewriter in self.rewriters.values() {
            let actual = self.manager.store.version(&rewriter.module);
            if actual != Some(rewriter.base_version) {
                self.state = SessionState::Stale;
                return Err(match actual {
                    Some(actual) => SessionError::Stale {
                        module: rewriter.module.clone(),
                        expected: rewriter.base_version,
                        actual,
                    },
                    None => SessionError::ModuleNotFound {
                        module: rewriter.module.clone(),
                    },
                });
            }
        }

        let mut batch = CommitBatch::new();
        for rewriter in self.rewriters.values() {
            if !rewriter.has_edits() {
                batch = batch.with_change(BatchChange::Verify {
                    module: rewriter.module.clone(),
                    expected: rewriter.base_version,
                });
                continue;
            }
            let text = match rewriter.preview() {
                Ok(text) => text,
                Err(conflicts) => {
                    self.state = SessionState::RolledBack;
                    let overlapping = conflicts
                        .iter()
                        .any(|c| matches!(c, Conflict::OverlappingSpans { .. }));
                    return Err(if overlapping {
                        SessionError::OverlappingEdits {
                            module: rewriter.module.clone(),
                            conflicts,
                        }
                    } else {
                        SessionError::InvalidEdit {
                            module: rewriter.module.clone(),
                            reason: conflicts
                                .iter()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>()
                                .join("; "),
                        }
                    });
                }
            };
            batch = batch.with_change(BatchChange::Replace {
                module: rewriter.module.clone(),
                expected: rewriter.base_version,
                text,
            });
        }
        for (module, kind, text) in &self.new_modules {
            batch = batch.with_change(BatchChange::Create {
                module: module.clone(),
                kind: *kind,
                text: text.clone(),
            });
        }

        let modules = match self.manager.store.commit_batch(batch) {
            Ok(modules) => modules,
            Err(StoreError::VersionMismatch {
                module,
                expected,
                actual,
            }) => {
                self.state = SessionState::Stale;
                return Err(SessionError::Stale {
                    module,
                    expected,
                    actual,
                });
            }
            Err(StoreError::ModuleExists { module }) => {
                self.state = SessionState::RolledBack;
                return Err(SessionError::ModuleExists { module });
            }
            Err(StoreError::ModuleNotFound { module }) => {
                self.state = SessionState::Stale;
                return Err(SessionError::ModuleNotFound { module });
            }
        };

        self.state = SessionState::Committed;
        info!(session = %self.id, modules = modules.len(), "session committed");

        let host_failures = if modules.is_empty() {
            Vec::new()
        } else {
            for listener in self.manager.listeners.read().iter() {
                listener.modules_committed(&modules);
            }
            self.manager.write_through(&modules)
        };

        Ok(CommitOutcome {
            session: self.id,
            modules,
            host_failures,
        })
    }

    /// Discard every edit. Always succeeds; a closed session stays closed.
    pub fn rollback(&mut self) {
        if self.state == SessionState::Open {
            debug!(session = %self.id, "session rolled back");
            self.state = SessionState::RolledBack;
        }
        self.rewriters.clear();
        self.new_modules.clear();
    }
}

impl Drop for RewriteSession<'_> {
    fn drop(&mut self) {
        if self.state == SessionState::Open && self.has_changes() {
            debug!(session = %self.id, "session dropped without commit; edits discarded");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::CollectingMessageSink;
    use crate::types::{TokenRange, Version};
    use parking_lot::Mutex;

    const M2_TEXT: &str = "Sub A()\n    x = 1\n    y = 2\nEnd Sub\n";

    fn m(name: &str) -> ModuleId {
        ModuleId::new("VBAProject", name)
    }

    fn selection(module: &str, version: u64, text: &str, needle: &str) -> QualifiedSelection {
        let start = text.find(needle).expect("needle present") as u64;
        QualifiedSelection::new(
            m(module),
            Version(version),
            TokenRange {
                start_token: 0,
                end_token: 0,
                span: Span::new(start, start + needle.len() as u64),
            },
        )
    }

    fn setup() -> Arc<ModuleStore> {
        let store = Arc::new(ModuleStore::new());
        store
            .add_module(m("M1"), ModuleKind::Standard, "Sub B()\nEnd Sub\n")
            .unwrap();
        store
            .add_module(m("M2"), ModuleKind::Standard, M2_TEXT)
            .unwrap();
        store
    }

    #[derive(Default)]
    struct RecordingListener {
        calls: Mutex<Vec<Vec<(ModuleId, Version)>>>,
    }

    impl CommitListener for RecordingListener {
        fn modules_committed(&self, modules: &[(ModuleId, Version)]) {
            self.calls.lock().push(modules.to_vec());
        }
    }

    mod checkout_tests {
        use super::*;

        #[test]
        fn checkout_is_idempotent() {
            let manager = RewritingManager::new(setup());
            let mut session = manager.open_session();
            session
                .check_out(&m("M2"))
                .unwrap()
                .insert_after(&selection("M2", 1, M2_TEXT, "x"), "1")
                .unwrap();
            let again = session.check_out(&m("M2")).unwrap();
            assert_eq!(again.edits().len(), 1);
            assert_eq!(session.base_versions(), vec![(m("M2"), Version(1))]);
        }

        #[test]
        fn base_version_is_captured_at_first_checkout() {
            let store = setup();
            let manager = RewritingManager::new(Arc::clone(&store));
            let mut session = manager.open_session();
            store.replace_text(&m("M2"), M2_TEXT).unwrap();
            assert_eq!(
                session.check_out(&m("M2")).unwrap().base_version(),
                Version(2)
            );
        }

        #[test]
        fn checkout_of_unknown_module_fails() {
            let manager = RewritingManager::new(setup());
            let mut session = manager.open_session();
            assert!(matches!(
                session.check_out(&m("Nope")),
                Err(SessionError::ModuleNotFound { .. })
            ));
        }

        #[test]
        fn target_from_other_version_is_rejected() {
            let manager = RewritingManager::new(setup());
            let mut session = manager.open_session();
            let rewriter = session.check_out(&m("M2")).unwrap();
            let err = rewriter
                .replace(&selection("M2", 7, M2_TEXT, "x"), "z")
                .unwrap_err();
            assert!(matches!(err, SessionError::StaleTarget { .. }));
            let err = rewriter
                .replace(&selection("M1", 1, M2_TEXT, "x"), "z")
                .unwrap_err();
            assert!(matches!(err, SessionError::StaleTarget { .. }));
        }
    }

    mod commit_tests {
        use super::*;

        #[test]
        fn commit_applies_edits_and_bumps_version() {
            let store = setup();
            let manager = RewritingManager::new(Arc::clone(&store));
            let listener = Arc::new(RecordingListener::default());
            manager.add_listener(listener.clone());

            let mut session = manager.open_session();
            let rewriter = session.check_out(&m("M2")).unwrap();
            rewriter
                .replace(&selection("M2", 1, M2_TEXT, "y"), "z")
                .unwrap();
            rewriter
                .replace(&selection("M2", 1, M2_TEXT, "x"), "w")
                .unwrap();
            let outcome = session.commit().unwrap();

            assert_eq!(outcome.modules, vec![(m("M2"), Version(2))]);
            assert_eq!(session.state(), SessionState::Committed);
            assert_eq!(
                &*store.get(&m("M2")).unwrap().text,
                "Sub A()\n    w = 1\n    z = 2\nEnd Sub\n"
            );
            assert_eq!(listener.calls.lock().len(), 1);
        }

        #[test]
        fn overlapping_edits_fail_and_write_nothing() {
            let store = setup();
            let manager = RewritingManager::new(Arc::clone(&store));
            let mut session = manager.open_session();
            let rewriter = session.check_out(&m("M2")).unwrap();
            rewriter
                .replace(&selection("M2", 1, M2_TEXT, "x = 1"), "x = 3")
                .unwrap();
            rewriter
                .replace(&selection("M2", 1, M2_TEXT, "= 1"), "= 4")
                .unwrap();

            let err = session.commit().unwrap_err();
            assert!(matches!(err, SessionError::OverlappingEdits { .. }));
            assert_eq!(&*store.get(&m("M2")).unwrap().text, M2_TEXT);
            assert_eq!(store.version(&m("M2")), Some(Version(1)));
        }

        #[test]
        fn multi_module_commit_is_atomic() {
            let store = setup();
            let manager = RewritingManager::new(Arc::clone(&store));
            let mut session = manager.open_session();
            session
                .check_out(&m("M1"))
                .unwrap()
                .append("' tail\n");
            session
                .check_out(&m("M2"))
                .unwrap()
                .append("' tail\n");
            store.replace_text(&m("M2"), "changed\n").unwrap();

            let err = session.commit().unwrap_err();
            assert!(matches!(err, SessionError::Stale { .. }));
            assert_eq!(session.state(), SessionState::Stale);
            assert_eq!(&*store.get(&m("M1")).unwrap().text, "Sub B()\nEnd Sub\n");
        }

        #[test]
        fn untouched_checkout_still_guards_commit() {
            let store = setup();
            let manager = RewritingManager::new(Arc::clone(&store));
            let mut session = manager.open_session();
            session.check_out(&m("M1")).unwrap().append("' x\n");
            session.check_out(&m("M2")).unwrap();
            store.replace_text(&m("M2"), "changed\n").unwrap();
            assert!(matches!(
                session.commit(),
                Err(SessionError::Stale { .. })
            ));
        }

        #[test]
        fn staged_module_is_created_with_commit() {
            let store = setup();
            let manager = RewritingManager::new(Arc::clone(&store));
            let mut session = manager.open_session();
            session
                .add_module(m("IThing"), ModuleKind::Class, "Public Sub Run()\nEnd Sub\n".into())
                .unwrap();
            let outcome = session.commit().unwrap();
            assert_eq!(outcome.modules, vec![(m("IThing"), Version(1))]);
            assert_eq!(store.get(&m("IThing")).unwrap().kind, ModuleKind::Class);
        }

        #[test]
        fn staging_existing_module_fails() {
            let manager = RewritingManager::new(setup());
            let mut session = manager.open_session();
            assert!(matches!(
                session.add_module(m("M1"), ModuleKind::Class, String::new()),
                Err(SessionError::ModuleExists { .. })
            ));
        }

        #[test]
        fn empty_commit_changes_nothing() {
            let store = setup();
            let manager = RewritingManager::new(Arc::clone(&store));
            let listener = Arc::new(RecordingListener::default());
            manager.add_listener(listener.clone());
            let mut session = manager.open_session();
            let outcome = session.commit().unwrap();
            assert!(outcome.modules.is_empty());
            assert!(listener.calls.lock().is_empty());
        }
    }

    mod race_tests {
        use super::*;

        #[test]
        fn first_committer_wins() {
            let store = setup();
            for _ in 0..4 {
                store.replace_text(&m("M2"), M2_TEXT).unwrap();
            }
            assert_eq!(store.version(&m("M2")), Some(Version(5)));
            let manager = RewritingManager::new(Arc::clone(&store));

            let mut s1 = manager.open_session();
            let mut s2 = manager.open_session();
            s1.check_out(&m("M2"))
                .unwrap()
                .replace(&selection("M2", 5, M2_TEXT, "x"), "first")
                .unwrap();
            s2.check_out(&m("M2"))
                .unwrap()
                .replace(&selection("M2", 5, M2_TEXT, "y"), "second")
                .unwrap();

            assert_eq!(s1.commit().unwrap().modules, vec![(m("M2"), Version(6))]);
            let err = s2.commit().unwrap_err();
            assert_eq!(
                err,
                SessionError::Stale {
                    module: m("M2"),
                    expected: Version(5),
                    actual: Version(6),
                }
            );
            let text = store.get(&m("M2")).unwrap().text;
            assert!(text.contains("first = 1"));
            assert!(!text.contains("second"));
        }

        #[test]
        fn with_retry_replans_after_stale() {
            let store = setup();
            let manager = RewritingManager::new(Arc::clone(&store));
            let mut attempts = 0;
            let outcome = with_retry(
                || {
                    attempts += 1;
                    let mut session = manager.open_session();
                    session.check_out(&m("M2"))?.append("' retried\n");
                    if attempts == 1 {
                        store.replace_text(&m("M2"), M2_TEXT).unwrap();
                    }
                    session.commit()
                },
                3,
            )
            .unwrap();
            assert_eq!(attempts, 2);
            assert_eq!(outcome.modules, vec![(m("M2"), Version(3))]);
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn closed_session_rejects_further_use() {
            let manager = RewritingManager::new(setup());
            let mut session = manager.open_session();
            session.check_out(&m("M1")).unwrap().append("' x\n");
            session.commit().unwrap();

            assert!(matches!(
                session.check_out(&m("M2")),
                Err(SessionError::Closed { .. })
            ));
            assert!(matches!(
                session.commit(),
                Err(SessionError::Closed {
                    state: SessionState::Committed,
                    ..
                })
            ));
        }

        #[test]
        fn rollback_discards_and_closes() {
            let store = setup();
            let manager = RewritingManager::new(Arc::clone(&store));
            let mut session = manager.open_session();
            session.check_out(&m("M1")).unwrap().append("' x\n");
            session.rollback();
            session.rollback();

            assert_eq!(session.state(), SessionState::RolledBack);
            assert!(matches!(
                session.commit(),
                Err(SessionError::Closed { .. })
            ));
            assert_eq!(store.version(&m("M1")), Some(Version(1)));
        }
    }

    mod rewriter_tests {
        use super::*;

        #[test]
        fn remove_lines_takes_whole_lines() {
            let manager = RewritingManager::new(setup());
            let mut session = manager.open_session();
            let rewriter = session.check_out(&m("M2")).unwrap();
            rewriter
                .remove_lines(&selection("M2", 1, M2_TEXT, "y = 2"))
                .unwrap();
            assert_eq!(
                rewriter.preview().unwrap(),
                "Sub A()\n    x = 1\nEnd Sub\n"
            );
        }

        #[test]
        fn insert_line_before_uses_line_start() {
            let manager = RewritingManager::new(setup());
            let mut session = manager.open_session();
            let rewriter = session.check_out(&m("M2")).unwrap();
            rewriter
                .insert_line_before(&selection("M2", 1, M2_TEXT, "y"), "    Dim y\n")
                .unwrap();
            assert!(rewriter.preview().unwrap().contains("x = 1\n    Dim y\n    y = 2"));
        }
    }

    mod host_tests {
        use super::*;
        use crate::interaction::HostError;

        struct FailingHost;

        impl ModuleHost for FailingHost {
            fn module_text(&self, module: &ModuleId) -> Result<String, HostError> {
                Err(HostError::ModuleNotFound(module.clone()))
            }

            fn replace_module_text(&self, _: &ModuleId, _: &str) -> Result<(), HostError> {
                Err(HostError::Other("read-only".into()))
            }
        }

        #[test]
        fn host_failures_are_reported_not_rolled_back() {
            let store = setup();
            let sink = Arc::new(CollectingMessageSink::new());
            let manager = RewritingManager::new(Arc::clone(&store))
                .with_host(Arc::new(FailingHost))
                .with_message_sink(sink.clone());
            let mut session = manager.open_session();
            session.check_out(&m("M1")).unwrap().append("' x\n");

            let outcome = session.commit().unwrap();
            assert_eq!(outcome.host_failures.len(), 1);
            assert_eq!(store.version(&m("M1")), Some(Version(2)));
            assert_eq!(sink.messages().len(), 1);
        }
    }
}
