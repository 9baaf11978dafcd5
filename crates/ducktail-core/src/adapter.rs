//! Language adapter trait: the parse-tree provider seam.
//!
//! The core never looks inside a parse tree. It hands module text to a
//! [`LanguageAdapter`], caches whatever tree and declaration summary come
//! back, and asks the adapter to resolve the whole project into a
//! [`SnapshotBuilder`].
//!
//! # Passes
//!
//! 1. **Parse** (`parse`): one module in isolation. Must be pure: the same
//!    text always yields an equivalent tree. Runs in parallel.
//! 2. **Declaration collection** (`collect_declarations`): one module in
//!    isolation, producing the adapter's per-module declaration summary.
//!    Cached per (module, version) together with the tree.
//! 3. **Reference resolution** (`resolve`): the whole project set at once,
//!    allocating declaration ids and binding every use.
//!
//! # ID Ownership
//!
//! Adapters do not invent ids; the [`SnapshotBuilder`] allocates them as
//! declarations are added. Adapter-side summaries use local indices.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::facts::SnapshotBuilder;
use crate::types::{LibraryReference, ModuleId, ModuleKind, TokenRange, Version};

// ============================================================================
// Adapter Data Types
// ============================================================================

/// One module handed to the adapter.
#[derive(Debug, Clone, Copy)]
pub struct SourceModule<'a> {
    pub id: &'a ModuleId,
    pub kind: ModuleKind,
    pub version: Version,
    pub text: &'a str,
}

/// A syntax error reported by [`LanguageAdapter::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub module: ModuleId,
    /// 1-indexed line.
    pub line: u32,
    /// 1-indexed column.
    pub col: u32,
    pub message: String,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.module, self.line, self.col, self.message
        )
    }
}

/// An invariant violation found while resolving (duplicate declarations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverDiagnostic {
    pub module: ModuleId,
    pub name: String,
    pub range: Option<TokenRange>,
    pub message: String,
}

impl fmt::Display for ResolverDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.module, self.message)
    }
}

/// A parsed module with its cached declaration summary.
#[derive(Debug)]
pub struct ParsedUnit<T, D> {
    pub id: ModuleId,
    pub kind: ModuleKind,
    pub version: Version,
    pub text: Arc<str>,
    pub tree: Arc<T>,
    pub declarations: Arc<D>,
}

impl<T, D> Clone for ParsedUnit<T, D> {
    fn clone(&self) -> Self {
        ParsedUnit {
            id: self.id.clone(),
            kind: self.kind,
            version: self.version,
            text: Arc::clone(&self.text),
            tree: Arc::clone(&self.tree),
            declarations: Arc::clone(&self.declarations),
        }
    }
}

/// Everything the resolution pass sees.
#[derive(Debug)]
pub struct ResolveRequest<'a, T, D> {
    /// Every module of every project, ordered by module id.
    pub units: &'a [ParsedUnit<T, D>],
    /// Library references per project, each in priority order.
    pub references: &'a BTreeMap<String, Vec<LibraryReference>>,
}

impl<T, D> ResolveRequest<'_, T, D> {
    /// Projects in the request, sorted and deduplicated.
    pub fn projects(&self) -> Vec<&str> {
        let mut projects: Vec<&str> = self
            .units
            .iter()
            .map(|u| u.id.project.as_str())
            .chain(self.references.keys().map(String::as_str))
            .collect();
        projects.sort_unstable();
        projects.dedup();
        projects
    }
}

// ============================================================================
// Language Adapter Trait
// ============================================================================

/// Pluggable language support for the parser state machine.
pub trait LanguageAdapter: Send + Sync + 'static {
    /// Parse tree (plus token stream) of one module.
    type Tree: Send + Sync + 'static;
    /// Per-module output of declaration collection.
    type ModuleDeclarations: Send + Sync + 'static;

    /// Short language name for logs and output.
    fn language(&self) -> &'static str;

    /// Parse one module.
    fn parse(&self, source: &SourceModule<'_>) -> Result<Self::Tree, ParseDiagnostic>;

    /// Collect one module's declarations.
    fn collect_declarations(
        &self,
        source: &SourceModule<'_>,
        tree: &Self::Tree,
    ) -> Self::ModuleDeclarations;

    /// Resolve every module into `builder`.
    ///
    /// Returns the invariant violations found instead; the caller then keeps
    /// its previous snapshot.
    fn resolve(
        &self,
        request: &ResolveRequest<'_, Self::Tree, Self::ModuleDeclarations>,
        builder: &mut SnapshotBuilder,
    ) -> Result<(), Vec<ResolverDiagnostic>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_lists_projects_once() {
        let units: Vec<ParsedUnit<(), ()>> = vec![
            ParsedUnit {
                id: ModuleId::new("B", "M"),
                kind: ModuleKind::Standard,
                version: Version(1),
                text: Arc::from(""),
                tree: Arc::new(()),
                declarations: Arc::new(()),
            },
            ParsedUnit {
                id: ModuleId::new("A", "M"),
                kind: ModuleKind::Standard,
                version: Version(1),
                text: Arc::from(""),
                tree: Arc::new(()),
                declarations: Arc::new(()),
            },
        ];
        let mut references = BTreeMap::new();
        references.insert("A".to_string(), vec![LibraryReference::builtin("VBA", 0)]);
        let request = ResolveRequest {
            units: &units,
            references: &references,
        };
        assert_eq!(request.projects(), vec!["A", "B"]);
    }

    #[test]
    fn diagnostics_display_location() {
        let diag = ParseDiagnostic {
            module: ModuleId::new("P", "M"),
            line: 3,
            col: 7,
            message: "expected 'End Sub'".into(),
        };
        assert_eq!(diag.to_string(), "P.M:3:7: expected 'End Sub'");
    }
}
