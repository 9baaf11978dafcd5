//! JSON output types and serialization for CLI responses.
//!
//! ## Design Principles
//!
//! 1. **Status first:** every response has `status` as its first field
//! 2. **Versioned:** `schema_version` travels with every response
//! 3. **Deterministic:** same input gives the same bytes (results are
//!    already sorted by the engine; modules and declarations are sorted here)
//! 4. **Nullable vs absent:** `null` means "no value", a missing field means
//!    "not applicable"

use std::io::{self, Write};

use serde::Serialize;

use crate::adapter::{ParseDiagnostic, ResolverDiagnostic};
use crate::error::{DuckError, OutputErrorCode};
use crate::facts::{Declaration, Snapshot, UnboundReference};
use crate::inspection::InspectionResult;
use crate::session::CommitOutcome;
use crate::store::ModuleStore;

pub use crate::types::Location;

/// Current schema version for all responses.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// Shared Pieces
// ============================================================================

/// One inspection result with a human-facing location.
#[derive(Debug, Clone, Serialize)]
pub struct ResultInfo {
    pub inspection: String,
    pub severity: String,
    pub description: String,
    pub location: Location,
    /// Quick fixes that accept the result.
    pub fixes: Vec<String>,
}

impl ResultInfo {
    /// Locate `result` using the text its snapshot was resolved from.
    pub fn from_result(result: &InspectionResult, snapshot: &Snapshot) -> Self {
        let location = match snapshot.module_text(&result.target.module) {
            Some(text) => Location::from_span(&result.target.module, text, result.target.range.span),
            None => Location::new(result.target.module.to_string(), 0, 0),
        };
        ResultInfo {
            inspection: result.inspection.clone(),
            severity: result.severity.to_string(),
            description: result.description.clone(),
            location,
            fixes: result.fixes.clone(),
        }
    }
}

/// A module written by a commit.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleChange {
    pub module: String,
    pub version: u64,
    /// Short content hash of the new text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ModuleChange {
    /// Describe every module of `outcome`, hashing from `store`.
    pub fn from_outcome(outcome: &CommitOutcome, store: &ModuleStore) -> Vec<ModuleChange> {
        let mut changes: Vec<ModuleChange> = outcome
            .modules
            .iter()
            .map(|(module, version)| ModuleChange {
                module: module.to_string(),
                version: version.0,
                hash: store.get(module).map(|m| m.hash.short().to_string()),
            })
            .collect();
        changes.sort_by(|a, b| a.module.cmp(&b.module));
        changes
    }
}

/// A declaration as listed by `duck symbols`.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolInfo {
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub kind: crate::facts::DeclarationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub accessibility: crate::facts::Accessibility,
    pub is_implicit: bool,
    /// Where the name is declared (user declarations only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub references: usize,
}

impl SymbolInfo {
    pub fn from_declaration(declaration: &Declaration, snapshot: &Snapshot) -> Self {
        let location = declaration.module.as_ref().and_then(|module| {
            let text = snapshot.module_text(module)?;
            let selection = declaration.selection?;
            Some(Location::from_span(module, text, selection.span))
        });
        SymbolInfo {
            id: declaration.id.to_string(),
            name: declaration.name.clone(),
            qualified_name: declaration.qualified_name.clone(),
            kind: declaration.kind,
            type_name: declaration.type_name.clone(),
            accessibility: declaration.accessibility,
            is_implicit: declaration.is_implicit,
            location,
            references: snapshot.references_to(declaration.id).len(),
        }
    }
}

/// An unbound use with a human-facing location.
#[derive(Debug, Clone, Serialize)]
pub struct UnboundInfo {
    pub name: String,
    pub location: Location,
    #[serde(flatten)]
    pub reason: crate::facts::UnboundReason,
}

impl UnboundInfo {
    pub fn from_unbound(unbound: &UnboundReference, snapshot: &Snapshot) -> Self {
        let location = match snapshot.module_text(&unbound.module) {
            Some(text) => Location::from_span(&unbound.module, text, unbound.range.span),
            None => Location::new(unbound.module.to_string(), 0, 0),
        };
        UnboundInfo {
            name: unbound.name.clone(),
            location,
            reason: unbound.reason.clone(),
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Response for `duck inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct InspectResponse {
    pub status: String,
    pub schema_version: String,
    pub generation: u64,
    pub results: Vec<ResultInfo>,
}

impl InspectResponse {
    pub fn new(generation: u64, results: Vec<ResultInfo>) -> Self {
        InspectResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            generation,
            results,
        }
    }
}

/// Response for `duck fix` and `duck extract-interface`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResponse {
    pub status: String,
    pub schema_version: String,
    /// What was applied (fix or refactoring name).
    pub applied: String,
    pub dry_run: bool,
    /// Results or members the change covered.
    pub count: usize,
    pub modules: Vec<ModuleChange>,
    /// Modules that could not be written back to the host.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host_failures: Vec<String>,
}

impl ApplyResponse {
    pub fn new(applied: impl Into<String>, dry_run: bool, count: usize, modules: Vec<ModuleChange>) -> Self {
        ApplyResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            applied: applied.into(),
            dry_run,
            count,
            modules,
            host_failures: Vec::new(),
        }
    }

    pub fn with_host_failures(mut self, failures: Vec<String>) -> Self {
        self.host_failures = failures;
        self
    }
}

/// Response for `duck symbols`.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolsResponse {
    pub status: String,
    pub schema_version: String,
    pub generation: u64,
    pub symbols: Vec<SymbolInfo>,
    pub unbound: Vec<UnboundInfo>,
}

impl SymbolsResponse {
    pub fn new(generation: u64, symbols: Vec<SymbolInfo>, unbound: Vec<UnboundInfo>) -> Self {
        SymbolsResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            generation,
            symbols,
            unbound,
        }
    }
}

/// One discovered unit test.
#[derive(Debug, Clone, Serialize)]
pub struct TestInfo {
    pub module: String,
    pub method: String,
    pub location: Option<Location>,
}

/// Response for `duck tests`.
#[derive(Debug, Clone, Serialize)]
pub struct TestsResponse {
    pub status: String,
    pub schema_version: String,
    pub tests: Vec<TestInfo>,
    /// Projects whose tests need the assert library referenced.
    pub missing_assert_library: Vec<String>,
}

impl TestsResponse {
    pub fn new(tests: Vec<TestInfo>, missing_assert_library: Vec<String>) -> Self {
        TestsResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            tests,
            missing_assert_library,
        }
    }
}

/// Error information for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn from_error(err: &DuckError) -> Self {
        let details = match err {
            DuckError::InvalidArguments { details, .. } => details.clone(),
            DuckError::AnalysisBlocked { diagnostics, state } => Some(serde_json::json!({
                "state": state,
                "diagnostics": diagnostics,
            })),
            DuckError::ApplyError {
                module: Some(module),
                ..
            } => Some(serde_json::json!({ "module": module })),
            DuckError::Stale {
                module,
                expected,
                actual,
            } => Some(serde_json::json!({
                "module": module,
                "expected": expected,
                "actual": actual,
            })),
            _ => None,
        };
        ErrorInfo {
            code: OutputErrorCode::from(err).code(),
            message: err.to_string(),
            details,
        }
    }
}

/// Response for any failed command.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub schema_version: String,
    pub error: ErrorInfo,
}

impl ErrorResponse {
    pub fn from_error(err: &DuckError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

/// Flatten parse and resolver diagnostics into display strings.
pub fn diagnostic_lines(
    syntax: &[ParseDiagnostic],
    resolver: &[ResolverDiagnostic],
) -> Vec<String> {
    syntax
        .iter()
        .map(ToString::to_string)
        .chain(resolver.iter().map(ToString::to_string))
        .collect()
}

// ============================================================================
// Response Emission
// ============================================================================

/// Emit a response as pretty-printed JSON to a writer.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

/// Emit a response as compact JSON (single line) to a writer.
pub fn emit_response_compact<T: Serialize>(
    response: &T,
    writer: &mut impl Write,
) -> io::Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

// ============================================================================
// Tests
// ============================================================================
