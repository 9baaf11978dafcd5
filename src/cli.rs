//! Command implementations shared by the `duck` binary and tests.
//!
//! Each `run_*` function works on an opened [`Workspace`] and returns the
//! JSON response for its command. Nothing here prints.

use std::fmt::Write as _;

use clap::ValueEnum;
use tracing::info;

use ducktail_basic::library::ASSERT_LIBRARY;
use ducktail_basic::refactorings::extract_interface::ExtractInterface;
use ducktail_basic::testing::{discover_tests, projects_requiring_assert_library};
use ducktail_core::error::DuckError;
use ducktail_core::inspection::{FixRunner, FixScope, InspectionResult};
use ducktail_core::interaction::{ActiveSelection, FixedSelection};
use ducktail_core::output::{
    ApplyResponse, InspectResponse, Location, ModuleChange, ResultInfo, SymbolInfo,
    SymbolsResponse, TestInfo, TestsResponse, UnboundInfo,
};
use ducktail_core::session::CommitOutcome;

use crate::workspace::Workspace;

// ============================================================================
// Arguments
// ============================================================================

/// How many results one `duck fix` invocation covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FixTarget {
    /// Only the first matching result.
    #[default]
    Single,
    /// Every matching result in the same procedure.
    Procedure,
    /// Every matching result in the same module.
    Module,
    /// Every matching result in the project.
    Project,
}

impl FixTarget {
    fn scope(self) -> Option<FixScope> {
        match self {
            FixTarget::Single => None,
            FixTarget::Procedure => Some(FixScope::Procedure),
            FixTarget::Module => Some(FixScope::Module),
            FixTarget::Project => Some(FixScope::Project),
        }
    }
}

/// Output format for `duck inspect`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum InspectFormat {
    #[default]
    Json,
    /// One `module:line:col: severity: description [inspection]` line per result.
    Text,
}

/// What `duck fix` should apply.
#[derive(Debug, Clone, Default)]
pub struct FixRequest {
    pub inspection: String,
    /// Quick fix by name; the first registered fix for the inspection otherwise.
    pub fix: Option<String>,
    /// Anchor on the first result in this module.
    pub module: Option<String>,
    pub target: FixTarget,
}

// ============================================================================
// Inspect
// ============================================================================

/// Run every enabled inspection.
pub fn run_inspect(workspace: &Workspace) -> Result<InspectResponse, DuckError> {
    let snapshot = workspace.ready_snapshot()?;
    let results = workspace.engine().run(&snapshot);
    info!(results = results.len(), "inspection complete");
    let infos = results
        .iter()
        .map(|r| ResultInfo::from_result(r, &snapshot))
        .collect();
    Ok(InspectResponse::new(snapshot.generation(), infos))
}

/// Render inspection results as compiler-style lines.
pub fn format_inspect_text(response: &InspectResponse) -> String {
    let mut out = String::new();
    for result in &response.results {
        let _ = writeln!(
            out,
            "{}:{}:{}: {}: {} [{}]",
            result.location.module,
            result.location.line,
            result.location.col,
            result.severity,
            result.description,
            result.inspection
        );
    }
    out
}

// ============================================================================
// Fix
// ============================================================================

/// Apply a quick fix to the results of one inspection.
pub fn run_fix(workspace: &Workspace, request: &FixRequest) -> Result<ApplyResponse, DuckError> {
    let snapshot = workspace.ready_snapshot()?;
    let engine = workspace.engine();
    let results: Vec<InspectionResult> = engine
        .run(&snapshot)
        .into_iter()
        .filter(|r| r.inspection.eq_ignore_ascii_case(&request.inspection))
        .collect();

    let module = request
        .module
        .as_deref()
        .map(|name| workspace.module(name))
        .transpose()?;
    let anchor = results
        .iter()
        .find(|r| module.as_ref().is_none_or(|m| r.module() == m))
        .ok_or_else(|| {
            DuckError::invalid_args(format!("no {} results to fix", request.inspection))
        })?;

    let fix = match &request.fix {
        Some(name) => engine
            .fix_named(name)
            .ok_or_else(|| DuckError::invalid_args(format!("unknown quick fix '{}'", name)))?,
        None => engine
            .fixes_for(&anchor.inspection)
            .into_iter()
            .next()
            .ok_or_else(|| {
                DuckError::invalid_args(format!("no quick fix for {}", anchor.inspection))
            })?,
    };

    if !workspace.is_dry_run() {
        workspace.ensure_unchanged()?;
    }

    let runner = FixRunner::new(workspace.manager());
    let (outcome, count) = match request.target.scope() {
        None => (runner.apply(fix.as_ref(), anchor, &snapshot)?, 1),
        Some(scope) => {
            let count = results
                .iter()
                .filter(|r| covers(anchor, r, scope))
                .count();
            let outcome = runner.apply_in_scope(fix.as_ref(), anchor, &results, scope, &snapshot)?;
            (outcome, count)
        }
    };

    Ok(apply_response(workspace, fix.name(), count, &outcome))
}

fn covers(anchor: &InspectionResult, candidate: &InspectionResult, scope: FixScope) -> bool {
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

fn apply_response(
    workspace: &Workspace,
    applied: &str,
    count: usize,
    outcome: &CommitOutcome,
) -> ApplyResponse {
    let failures = outcome
        .host_failures
        .iter()
        .map(|(module, message)| format!("{}: {}", module, message))
        .collect();
    ApplyResponse::new(
        applied,
        workspace.is_dry_run(),
        count,
        ModuleChange::from_outcome(outcome, workspace.store()),
    )
    .with_host_failures(failures)
}

// ============================================================================
// Symbols
// ============================================================================

/// List user declarations and unresolved names, optionally for one module.
pub fn run_symbols(
    workspace: &Workspace,
    module: Option<&str>,
) -> Result<SymbolsResponse, DuckError> {
    let module = module.map(|name| workspace.module(name)).transpose()?;
    let snapshot = workspace.ready_snapshot()?;

    let symbols = snapshot
        .user_declarations()
        .filter(|d| module.is_none() || d.module == module)
        .map(|d| SymbolInfo::from_declaration(d, &snapshot))
        .collect();
    let unbound = snapshot
        .unbound()
        .iter()
        .filter(|u| module.as_ref().is_none_or(|m| &u.module == m))
        .map(|u| UnboundInfo::from_unbound(u, &snapshot))
        .collect();
    Ok(SymbolsResponse::new(snapshot.generation(), symbols, unbound))
}

// ============================================================================
// Extract Interface
// ============================================================================

/// Extract `I<Module>` from a module's public members.
pub fn run_extract_interface(
    workspace: &Workspace,
    module: &str,
) -> Result<ApplyResponse, DuckError> {
    let module = workspace.module(module)?;
    workspace.ready_snapshot()?;
    if !workspace.is_dry_run() {
        workspace.ensure_unchanged()?;
    }

    let selection = FixedSelection(Some(ActiveSelection { module, offset: 0 }));
    let refactoring = ExtractInterface::new(&**workspace.coordinator(), &selection);
    let model = refactoring.plan()?;
    let outcome = refactoring.apply(&model, workspace.manager())?;
    Ok(apply_response(
        workspace,
        "ExtractInterface",
        model.members.len(),
        &outcome,
    ))
}

// ============================================================================
// Tests
// ============================================================================

/// Discover unit tests and projects missing the assert library.
pub fn run_tests(workspace: &Workspace) -> Result<TestsResponse, DuckError> {
    let snapshot = workspace.ready_snapshot()?;
    let tests = discover_tests(&snapshot)
        .into_iter()
        .map(|t| TestInfo {
            location: t.selection.and_then(|range| {
                snapshot
                    .module_text(&t.module)
                    .map(|text| Location::from_span(&t.module, text, range.span))
            }),
            module: t.module.to_string(),
            method: t.name,
        })
        .collect();
    let missing = projects_requiring_assert_library(&snapshot)
        .into_iter()
        .filter(|project| {
            !workspace
                .store()
                .references(project)
                .iter()
                .any(|r| r.name.eq_ignore_ascii_case(ASSERT_LIBRARY))
        })
        .collect();
    Ok(TestsResponse::new(tests, missing))
}
