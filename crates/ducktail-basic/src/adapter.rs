//! The VBA [`LanguageAdapter`].
//!
//! Bridges the core parser state machine to this crate's lexer, parser,
//! declaration collector and resolver.

use std::sync::Arc;

use ducktail_core::adapter::{
    LanguageAdapter, ParseDiagnostic, ResolveRequest, ResolverDiagnostic, SourceModule,
};
use ducktail_core::facts::SnapshotBuilder;
use ducktail_core::text::byte_offset_to_position;
use tracing::trace;

use crate::declarations::{self, ModuleDeclarations};
use crate::library::{BuiltinLibraries, LibraryProvider};
use crate::parser::parse_module;
use crate::resolver;
use crate::syntax::ModuleTree;

/// VBA language support.
#[derive(Clone)]
pub struct BasicAdapter {
    libraries: Arc<dyn LibraryProvider>,
}

impl Default for BasicAdapter {
    fn default() -> Self {
        BasicAdapter::new()
    }
}

impl BasicAdapter {
    /// Adapter backed by the built-in library models.
    pub fn new() -> Self {
        BasicAdapter {
            libraries: Arc::new(BuiltinLibraries::new()),
        }
    }

    /// Use a different source of library models.
    pub fn with_libraries(mut self, libraries: Arc<dyn LibraryProvider>) -> Self {
        self.libraries = libraries;
        self
    }

    pub fn libraries(&self) -> &Arc<dyn LibraryProvider> {
        &self.libraries
    }
}

impl std::fmt::Debug for BasicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAdapter").finish_non_exhaustive()
    }
}

impl LanguageAdapter for BasicAdapter {
    type Tree = ModuleTree;
    type ModuleDeclarations = ModuleDeclarations;

    fn language(&self) -> &'static str {
        "vba"
    }

    fn parse(&self, source: &SourceModule<'_>) -> Result<ModuleTree, ParseDiagnostic> {
        trace!(module = %source.id, version = %source.version, "parsing");
        parse_module(source.text).map_err(|e| {
            let (line, col) = byte_offset_to_position(source.text, e.offset);
            ParseDiagnostic {
                module: source.id.clone(),
                line,
                col,
                message: e.message,
            }
        })
    }

    fn collect_declarations(
        &self,
        source: &SourceModule<'_>,
        tree: &ModuleTree,
    ) -> ModuleDeclarations {
        declarations::collect(source, tree)
    }

    fn resolve(
        &self,
        request: &ResolveRequest<'_, ModuleTree, ModuleDeclarations>,
        builder: &mut SnapshotBuilder,
    ) -> Result<(), Vec<ResolverDiagnostic>> {
        resolver::resolve(request, self.libraries.as_ref(), builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ducktail_core::types::{ModuleId, ModuleKind, Version};

    #[test]
    fn parse_error_reports_line_and_column() {
        let adapter = BasicAdapter::new();
        let id = ModuleId::new("VBAProject", "Broken");
        let source = SourceModule {
            id: &id,
            kind: ModuleKind::Standard,
            version: Version::INITIAL,
            text: "Sub Main()\n    x = (1 +\nEnd Sub\n",
        };
        let diag = adapter.parse(&source).unwrap_err();
        assert_eq!(diag.module, id);
        assert_eq!(diag.line, 2);
    }

    #[test]
    fn parse_is_pure() {
        let adapter = BasicAdapter::new();
        let id = ModuleId::new("VBAProject", "M");
        let source = SourceModule {
            id: &id,
            kind: ModuleKind::Standard,
            version: Version::INITIAL,
            text: "Option Explicit\nSub Main()\n    Debug.Print 1\nEnd Sub\n",
        };
        assert_eq!(adapter.parse(&source).unwrap(), adapter.parse(&source).unwrap());
        assert_eq!(adapter.language(), "vba");
    }
}
