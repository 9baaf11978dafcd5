//! Inspection engine and quick-fix contract.
//!
//! Inspections are read-only analyses over one [`Snapshot`]. The engine:
//! - skips inspections that are disabled or whose [`Interest`] finds nothing
//!   in the snapshot
//! - runs the rest in parallel on the rayon pool
//! - applies severity overrides and drops `DoNotShow` results
//! - stable-sorts results by (module, byte position, inspection name)
//!
//! Quick fixes turn one result, or every matching result in a
//! [`FixScope`], into edits of a single [`RewriteSession`]. Fixes only ever
//! address text through the result's [`QualifiedSelection`], so a result
//! from an older snapshot is rejected by the session instead of applied to
//! moved text.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::facts::{DeclarationId, Reference, Snapshot};
use crate::session::{CommitOutcome, RewriteSession, RewritingManager, SessionError};
use crate::types::{ModuleId, QualifiedSelection, TokenRange};

// ============================================================================
// Severity and Interest
// ============================================================================

/// How loudly a result is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    DoNotShow,
    Hint,
    Suggestion,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::DoNotShow => "do_not_show",
            Severity::Hint => "hint",
            Severity::Suggestion => "suggestion",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "do_not_show" | "off" => Ok(Severity::DoNotShow),
            "hint" => Ok(Severity::Hint),
            "suggestion" => Ok(Severity::Suggestion),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// The snapshot shapes an inspection looks at.
///
/// An inspection whose interest matches nothing in a snapshot is not run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub user_declarations: bool,
    pub library_references: bool,
    pub unbound: bool,
    pub modules: bool,
}

impl Interest {
    pub fn user_declarations() -> Self {
        Interest {
            user_declarations: true,
            ..Interest::default()
        }
    }

    pub fn library_references() -> Self {
        Interest {
            library_references: true,
            ..Interest::default()
        }
    }

    pub fn unbound() -> Self {
        Interest {
            unbound: true,
            ..Interest::default()
        }
    }

    pub fn modules() -> Self {
        Interest {
            modules: true,
            ..Interest::default()
        }
    }

    pub fn union(self, other: Interest) -> Self {
        Interest {
            user_declarations: self.user_declarations || other.user_declarations,
            library_references: self.library_references || other.library_references,
            unbound: self.unbound || other.unbound,
            modules: self.modules || other.modules,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Interest::default()
    }
}

/// Description and default severity of an inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectionMeta {
    pub description: &'static str,
    pub default_severity: Severity,
}

// ============================================================================
// Results
// ============================================================================

/// One finding, bound to the snapshot it was produced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectionResult {
    pub inspection: String,
    pub severity: Severity,
    pub target: QualifiedSelection,
    pub description: String,
    pub declaration: Option<DeclarationId>,
    /// Innermost member enclosing the target, if any.
    pub enclosing: Option<DeclarationId>,
    pub snapshot_generation: u64,
    /// Names of the quick fixes that accept this result.
    pub fixes: Vec<String>,
}

impl InspectionResult {
    pub fn with_declaration(mut self, declaration: DeclarationId) -> Self {
        self.declaration = Some(declaration);
        self
    }

    pub fn with_enclosing(mut self, enclosing: Option<DeclarationId>) -> Self {
        self.enclosing = enclosing;
        self
    }

    /// Whether the result was produced from `snapshot`.
    pub fn is_current(&self, snapshot: &Snapshot) -> bool {
        self.snapshot_generation == snapshot.generation()
    }

    pub fn module(&self) -> &ModuleId {
        &self.target.module
    }
}

// ============================================================================
// Inspection Context
// ============================================================================

/// Read-only view handed to every inspection of one run.
pub struct InspectionContext<'a> {
    snapshot: &'a Snapshot,
}

impl<'a> InspectionContext<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        InspectionContext { snapshot }
    }

    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }

    /// A selection of `range` in `module` at the snapshot's version.
    pub fn selection(&self, module: &ModuleId, range: TokenRange) -> Option<QualifiedSelection> {
        let version = self.snapshot.module_version(module)?;
        Some(QualifiedSelection::new(module.clone(), version, range))
    }

    /// Start a result for `inspection` at `target` with its default severity.
    pub fn result(
        &self,
        inspection: &dyn Inspection,
        target: QualifiedSelection,
        description: impl Into<String>,
    ) -> InspectionResult {
        InspectionResult {
            inspection: inspection.name().to_string(),
            severity: inspection.meta().default_severity,
            target,
            description: description.into(),
            declaration: None,
            enclosing: None,
            snapshot_generation: self.snapshot.generation(),
            fixes: Vec::new(),
        }
    }

    /// Whether `reference` binds to a library declaration.
    pub fn is_library_reference(&self, reference: &Reference) -> bool {
        self.snapshot
            .declaration(reference.declaration)
            .map(|d| !d.is_user_defined)
            .unwrap_or(false)
    }

    /// Whether anything in the snapshot matches `interest`.
    pub fn wants(&self, interest: Interest) -> bool {
        (interest.user_declarations && self.snapshot.user_declarations().next().is_some())
            || (interest.library_references
                && self
                    .snapshot
                    .references()
                    .iter()
                    .any(|r| self.is_library_reference(r)))
            || (interest.unbound && !self.snapshot.unbound().is_empty())
            || (interest.modules && self.snapshot.all_module_facts().next().is_some())
    }
}

/// A read-only analysis over a snapshot.
pub trait Inspection: Send + Sync {
    /// Stable name, used in configuration and output.
    fn name(&self) -> &'static str;

    fn meta(&self) -> InspectionMeta;

    fn interest(&self) -> Interest;

    fn inspect<'a>(
        &'a self,
        ctx: &'a InspectionContext<'a>,
    ) -> Box<dyn Iterator<Item = InspectionResult> + 'a>;
}

// ============================================================================
// Settings
// ============================================================================

/// Severity overrides and disabled inspections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionSettings {
    pub severity: BTreeMap<String, Severity>,
    pub disabled: BTreeSet<String>,
}

impl InspectionSettings {
    pub fn is_disabled(&self, inspection: &str) -> bool {
        self.disabled
            .iter()
            .any(|d| d.eq_ignore_ascii_case(inspection))
            || self.severity_for(inspection) == Some(Severity::DoNotShow)
    }

    pub fn severity_for(&self, inspection: &str) -> Option<Severity> {
        self.severity
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(inspection))
            .map(|(_, severity)| *severity)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Runs registered inspections and annotates results with their fixes.
#[derive(Default)]
pub struct InspectionEngine {
    inspections: Vec<Arc<dyn Inspection>>,
    fixes: Vec<Arc<dyn QuickFix>>,
    settings: InspectionSettings,
}

impl InspectionEngine {
    pub fn new() -> Self {
        InspectionEngine::default()
    }

    pub fn with_settings(mut self, settings: InspectionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn register(&mut self, inspection: Arc<dyn Inspection>) {
        self.inspections.push(inspection);
    }

    pub fn register_fix(&mut self, fix: Arc<dyn QuickFix>) {
        self.fixes.push(fix);
    }

    pub fn inspections(&self) -> &[Arc<dyn Inspection>] {
        &self.inspections
    }

    pub fn settings(&self) -> &InspectionSettings {
        &self.settings
    }

    /// Fixes that accept results of `inspection`, in registration order.
    pub fn fixes_for(&self, inspection: &str) -> Vec<Arc<dyn QuickFix>> {
        self.fixes
            .iter()
            .filter(|f| f.supports(inspection))
            .cloned()
            .collect()
    }

    /// Find a registered fix by name (case-insensitive).
    pub fn fix_named(&self, name: &str) -> Option<Arc<dyn QuickFix>> {
        self.fixes
            .iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Run every enabled inspection against `snapshot`.
    pub fn run(&self, snapshot: &Snapshot) -> Vec<InspectionResult> {
        let ctx = InspectionContext::new(snapshot);
        let batches: Vec<Vec<InspectionResult>> = self
            .inspections
            .par_iter()
            .filter(|inspection| !self.settings.is_disabled(inspection.name()))
            .filter(|inspection| ctx.wants(inspection.interest()))
            .map(|inspection| {
                let severity = self
                    .settings
                    .severity_for(inspection.name())
                    .unwrap_or(inspection.meta().default_severity);
                if severity == Severity::DoNotShow {
                    return Vec::new();
                }
                let results: Vec<InspectionResult> = inspection
                    .inspect(&ctx)
                    .map(|mut result| {
                        result.severity = severity;
                        result
                    })
                    .collect();
                debug!(
                    inspection = inspection.name(),
                    results = results.len(),
                    "inspection finished"
                );
                results
            })
            .collect();

        let mut results: Vec<InspectionResult> = batches.into_iter().flatten().collect();
        for result in &mut results {
            result.fixes = self
                .fixes_for(&result.inspection)
                .iter()
                .map(|f| f.name().to_string())
                .collect();
        }
        results.sort_by(|a, b| {
            let (am, astart, _) = a.target.sort_key();
            let (bm, bstart, _) = b.target.sort_key();
            am.cmp(bm)
                .then(astart.cmp(&bstart))
                .then_with(|| a.inspection.cmp(&b.inspection))
        });
        info!(
            generation = snapshot.generation(),
            results = results.len(),
            "inspections complete"
        );
        results
    }
}

// ============================================================================
// Quick Fixes
// ============================================================================

/// Errors from applying quick fixes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FixError {
    /// The fix does not handle results of this inspection.
    #[error("{fix} does not fix {inspection} results")]
    Unsupported { fix: String, inspection: String },

    /// The fix cannot run at the requested scope.
    #[error("{fix} cannot be applied at {scope} scope")]
    ScopeNotSupported { fix: String, scope: FixScope },

    /// The result was produced from an older snapshot.
    #[error("result from snapshot {result} is not current (now {current})")]
    StaleResult { result: u64, current: u64 },

    /// The result's shape is one the fix declines to touch.
    #[error("{fix} is not applicable here: {reason}")]
    NotApplicable { fix: String, reason: String },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// How far a fix reaches beyond the result it was invoked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixScope {
    Procedure,
    Module,
    Project,
}

impl fmt::Display for FixScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FixScope::Procedure => "procedure",
            FixScope::Module => "module",
            FixScope::Project => "project",
        };
        f.write_str(name)
    }
}

/// Turns an inspection result into session edits.
pub trait QuickFix: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspections whose results this fix accepts.
    fn supported_inspections(&self) -> &[&'static str];

    /// Human-readable description of what fixing `result` does.
    fn description(&self, result: &InspectionResult, snapshot: &Snapshot) -> String;

    /// Scopes beyond a single occurrence. Single is always allowed.
    fn scopes(&self) -> &[FixScope];

    /// Record the edits for `result` in `session`. Must not commit.
    fn fix(
        &self,
        result: &InspectionResult,
        snapshot: &Snapshot,
        session: &mut RewriteSession<'_>,
    ) -> Result<(), FixError>;

    fn supports(&self, inspection: &str) -> bool {
        self.supported_inspections()
            .iter()
            .any(|i| i.eq_ignore_ascii_case(inspection))
    }
}

/// Applies quick fixes through one session per invocation.
pub struct FixRunner<'m> {
    manager: &'m RewritingManager,
}

impl<'m> FixRunner<'m> {
    pub fn new(manager: &'m RewritingManager) -> Self {
        FixRunner { manager }
    }

    /// Fix one result and commit.
    pub fn apply(
        &self,
        fix: &dyn QuickFix,
        result: &InspectionResult,
        snapshot: &Snapshot,
    ) -> Result<CommitOutcome, FixError> {
        check_fix(fix, result, snapshot)?;
        let mut session = self.manager.open_session();
        if let Err(e) = fix.fix(result, snapshot, &mut session) {
            session.rollback();
            return Err(e);
        }
        Ok(session.commit()?)
    }

    /// Fix every result in `results` that shares `anchor`'s inspection and
    /// lies within `scope` of it, in one session.
    ///
    /// Results the fix declines (`NotApplicable`) are skipped; any other
    /// failure rolls the whole batch back.
    pub fn apply_in_scope(
        &self,
        fix: &dyn QuickFix,
        anchor: &InspectionResult,
        results: &[InspectionResult],
        scope: FixScope,
        snapshot: &Snapshot,
    ) -> Result<CommitOutcome, FixError> {
        check_fix(fix, anchor, snapshot)?;
        if !fix.scopes().contains(&scope) {
            return Err(FixError::ScopeNotSupported {
                fix: fix.name().to_string(),
                scope,
            });
        }

        let mut session = self.manager.open_session();
        let mut applied = 0usize;
        for result in results
            .iter()
            .filter(|r| r.inspection == anchor.inspection)
            .filter(|r| in_scope(anchor, r, scope))
        {
            check_fix(fix, result, snapshot)?;
            match fix.fix(result, snapshot, &mut session) {
                Ok(()) => applied += 1,
                Err(FixError::NotApplicable { reason, .. }) => {
                    debug!(selection = %result.target, "fix skipped: {}", reason);
                }
                Err(e) => {
                    session.rollback();
                    return Err(e);
                }
            }
        }
        info!(fix = fix.name(), %scope, applied, "scoped fix staged");
        Ok(session.commit()?)
    }
}

fn check_fix(
    fix: &dyn QuickFix,
    result: &InspectionResult,
    snapshot: &Snapshot,
) -> Result<(), FixError> {
    if !fix.supports(&result.inspection) {
        return Err(FixError::Unsupported {
            fix: fix.name().to_string(),
            inspection: result.inspection.clone(),
        });
    }
    if !result.is_current(snapshot) {
        return Err(FixError::StaleResult {
            result: result.snapshot_generation,
            current: snapshot.generation(),
        });
    }
    Ok(())
}

fn in_scope(anchor: &InspectionResult, candidate: &InspectionResult, scope: FixScope) -> bool {
    match scope {
        FixScope::Procedure => {
            anchor.module() == candidate.module()
                && anchor.enclosing.is_some()
                && anchor.enclosing == candidate.enclosing
        }
        FixScope::Module => anchor.module() == candidate.module(),
        FixScope::Project => anchor.module().project == candidate.module().project,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{Declaration, DeclarationKind, SnapshotBuilder};
    use crate::patch::Span;
    use crate::store::ModuleStore;
    use crate::types::{ModuleKind, Version};

    const TEXT: &str = "Dim a\nDim b\n";

    fn module() -> ModuleId {
        ModuleId::new("P", "M")
    }

    fn range(start: u64, end: u64) -> TokenRange {
        TokenRange {
            start_token: start as u32,
            end_token: end as u32,
            span: Span::new(start, end),
        }
    }

    fn snapshot(generation: u64) -> Snapshot {
        let mut builder = SnapshotBuilder::new();
        let project = builder.add_declaration(Declaration::new("P", DeclarationKind::Project));
        let m = builder.add_declaration(
            Declaration::new("M", DeclarationKind::StandardModule)
                .with_parent(project)
                .with_module(module()),
        );
        for (name, start) in [("a", 4u64), ("b", 10)] {
            builder.add_declaration(
                Declaration::new(name, DeclarationKind::Variable)
                    .with_parent(m)
                    .with_module(module())
                    .with_selection(range(start, start + 1)),
            );
        }
        let mut versions = BTreeMap::new();
        versions.insert(module(), Version(1));
        builder.build(generation, versions).unwrap()
    }

    /// Flags every user variable.
    struct EveryVariable;

    impl Inspection for EveryVariable {
        fn name(&self) -> &'static str {
            "EveryVariable"
        }

        fn meta(&self) -> InspectionMeta {
            InspectionMeta {
                description: "flags variables",
                default_severity: Severity::Warning,
            }
        }

        fn interest(&self) -> Interest {
            Interest::user_declarations()
        }

        fn inspect<'a>(
            &'a self,
            ctx: &'a InspectionContext<'a>,
        ) -> Box<dyn Iterator<Item = InspectionResult> + 'a> {
            Box::new(
                ctx.snapshot()
                    .user_declarations()
                    .filter(|d| d.kind == DeclarationKind::Variable)
                    .filter_map(move |d| {
                        let module = d.module.as_ref()?;
                        let target = ctx.selection(module, d.selection?)?;
                        Some(
                            ctx.result(self, target, format!("variable {}", d.name))
                                .with_declaration(d.id),
                        )
                    }),
            )
        }
    }

    /// Only interested in unbound uses.
    struct NeverRuns;

    impl Inspection for NeverRuns {
        fn name(&self) -> &'static str {
            "NeverRuns"
        }

        fn meta(&self) -> InspectionMeta {
            InspectionMeta {
                description: "unbound",
                default_severity: Severity::Error,
            }
        }

        fn interest(&self) -> Interest {
            Interest::unbound()
        }

        fn inspect<'a>(
            &'a self,
            _ctx: &'a InspectionContext<'a>,
        ) -> Box<dyn Iterator<Item = InspectionResult> + 'a> {
            panic!("inspection with no matching interest must not run")
        }
    }

    /// Uppercases the flagged name.
    struct Upcase;

    impl QuickFix for Upcase {
        fn name(&self) -> &'static str {
            "Upcase"
        }

        fn supported_inspections(&self) -> &[&'static str] {
            &["EveryVariable"]
        }

        fn description(&self, result: &InspectionResult, _: &Snapshot) -> String {
            format!("upcase {}", result.description)
        }

        fn scopes(&self) -> &[FixScope] {
            &[FixScope::Module]
        }

        fn fix(
            &self,
            result: &InspectionResult,
            snapshot: &Snapshot,
            session: &mut RewriteSession<'_>,
        ) -> Result<(), FixError> {
            let text = snapshot.declaration(result.declaration.unwrap()).unwrap().name.to_uppercase();
            session
                .check_out(result.module())?
                .replace(&result.target, &text)?;
            Ok(())
        }
    }

    fn engine() -> InspectionEngine {
        let mut engine = InspectionEngine::new();
        engine.register(Arc::new(EveryVariable));
        engine.register(Arc::new(NeverRuns));
        engine.register_fix(Arc::new(Upcase));
        engine
    }

    mod engine_tests {
        use super::*;

        #[test]
        fn results_are_sorted_and_annotated() {
            let results = engine().run(&snapshot(3));
            assert_eq!(results.len(), 2);
            assert_eq!(results[0].description, "variable a");
            assert_eq!(results[1].description, "variable b");
            assert_eq!(results[0].fixes, vec!["Upcase".to_string()]);
            assert_eq!(results[0].snapshot_generation, 3);
        }

        #[test]
        fn severity_override_applies() {
            let mut settings = InspectionSettings::default();
            settings
                .severity
                .insert("everyvariable".into(), Severity::Hint);
            let results = engine().with_settings(settings).run(&snapshot(1));
            assert!(results.iter().all(|r| r.severity == Severity::Hint));
        }

        #[test]
        fn disabled_inspection_is_skipped() {
            let mut settings = InspectionSettings::default();
            settings.disabled.insert("EveryVariable".into());
            assert!(engine().with_settings(settings).run(&snapshot(1)).is_empty());
        }

        #[test]
        fn is_current_checks_generation() {
            let results = engine().run(&snapshot(3));
            assert!(results[0].is_current(&snapshot(3)));
            assert!(!results[0].is_current(&snapshot(4)));
        }

        #[test]
        fn severity_parses_from_config_names() {
            assert_eq!("warning".parse::<Severity>().unwrap(), Severity::Warning);
            assert_eq!("do-not-show".parse::<Severity>().unwrap(), Severity::DoNotShow);
            assert!("loud".parse::<Severity>().is_err());
        }
    }

    mod runner_tests {
        use super::*;

        fn manager() -> RewritingManager {
            let store = Arc::new(ModuleStore::new());
            store
                .add_module(module(), ModuleKind::Standard, TEXT)
                .unwrap();
            RewritingManager::new(store)
        }

        #[test]
        fn single_fix_commits_one_session() {
            let manager = manager();
            let snapshot = snapshot(1);
            let results = engine().run(&snapshot);
            let outcome = FixRunner::new(&manager)
                .apply(&Upcase, &results[0], &snapshot)
                .unwrap();
            assert_eq!(outcome.modules, vec![(module(), Version(2))]);
            assert_eq!(&*manager.store().get(&module()).unwrap().text, "Dim A\nDim b\n");
        }

        #[test]
        fn module_scope_fixes_every_result() {
            let manager = manager();
            let snapshot = snapshot(1);
            let results = engine().run(&snapshot);
            FixRunner::new(&manager)
                .apply_in_scope(&Upcase, &results[0], &results, FixScope::Module, &snapshot)
                .unwrap();
            assert_eq!(&*manager.store().get(&module()).unwrap().text, "Dim A\nDim B\n");
        }

        #[test]
        fn unsupported_scope_is_rejected() {
            let manager = manager();
            let snapshot = snapshot(1);
            let results = engine().run(&snapshot);
            let err = FixRunner::new(&manager)
                .apply_in_scope(&Upcase, &results[0], &results, FixScope::Project, &snapshot)
                .unwrap_err();
            assert!(matches!(err, FixError::ScopeNotSupported { .. }));
        }

        #[test]
        fn stale_result_is_rejected() {
            let manager = manager();
            let results = engine().run(&snapshot(1));
            let err = FixRunner::new(&manager)
                .apply(&Upcase, &results[0], &snapshot(2))
                .unwrap_err();
            assert!(matches!(err, FixError::StaleResult { .. }));
        }

        #[test]
        fn moved_module_fails_with_stale_target() {
            let manager = manager();
            let snapshot = snapshot(1);
            let results = engine().run(&snapshot);
            manager.store().replace_text(&module(), TEXT).unwrap();
            let err = FixRunner::new(&manager)
                .apply(&Upcase, &results[0], &snapshot)
                .unwrap_err();
            assert!(matches!(
                err,
                FixError::Session(SessionError::StaleTarget { .. })
            ));
        }
    }
}
