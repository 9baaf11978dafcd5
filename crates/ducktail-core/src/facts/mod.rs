//! Snapshot model: declarations, references and unbound references.
//!
//! This module provides the resolved program model the rest of ducktail reads:
//! - [`Declaration`]: every named program element (user code and libraries)
//! - [`Reference`]: one resolved use of a declaration
//! - [`UnboundReference`]: a use that resolved nowhere, ambiguously, or late
//! - [`Snapshot`]: the immutable, versioned aggregate of all of the above
//!
//! Snapshots are built once through [`SnapshotBuilder`] and never mutated;
//! the parser state machine swaps whole snapshots behind an `Arc`.
//!
//! # Declaration Forest
//!
//! Declarations live in an arena indexed by [`DeclarationId`]. A parent must
//! be added before its children, so a parent id is always smaller than the
//! child id and the parent relation cannot form a cycle. Every chain ends at
//! a [`DeclarationKind::Project`] declaration: the user project, or the
//! project declaration of a loaded library.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{ModuleId, ModuleKind, TokenRange, Version};

// ============================================================================
// ID Types
// ============================================================================

/// Stable declaration identifier within one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeclarationId(pub u32);

impl DeclarationId {
    pub fn new(id: u32) -> Self {
        DeclarationId(id)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decl_{}", self.0)
    }
}

/// Stable reference identifier within one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceId(pub u32);

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref_{}", self.0)
    }
}

// ============================================================================
// Declaration
// ============================================================================

/// Kind of declared program element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationKind {
    Project,
    StandardModule,
    ClassModule,
    DocumentModule,
    UserForm,
    /// A library module whose members are globally visible.
    LibraryModule,
    /// A library class (type) such as `Collection`.
    LibraryClass,
    Procedure,
    Function,
    PropertyGet,
    PropertyLet,
    PropertySet,
    Parameter,
    Variable,
    Constant,
    UserDefinedType,
    UserDefinedTypeMember,
    Enumeration,
    EnumerationMember,
    Event,
    LineLabel,
}

impl DeclarationKind {
    /// Module-like containers (user or library).
    pub fn is_module(&self) -> bool {
        matches!(
            self,
            DeclarationKind::StandardModule
                | DeclarationKind::ClassModule
                | DeclarationKind::DocumentModule
                | DeclarationKind::UserForm
                | DeclarationKind::LibraryModule
                | DeclarationKind::LibraryClass
        )
    }

    /// Procedures, functions and property accessors.
    pub fn is_member(&self) -> bool {
        matches!(
            self,
            DeclarationKind::Procedure
                | DeclarationKind::Function
                | DeclarationKind::PropertyGet
                | DeclarationKind::PropertyLet
                | DeclarationKind::PropertySet
        )
    }

    /// Kinds that can appear after `As` in a declaration.
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            DeclarationKind::ClassModule
                | DeclarationKind::DocumentModule
                | DeclarationKind::UserForm
                | DeclarationKind::LibraryClass
                | DeclarationKind::UserDefinedType
                | DeclarationKind::Enumeration
        )
    }

    /// Kinds whose uses read or write a value.
    pub fn is_value(&self) -> bool {
        matches!(
            self,
            DeclarationKind::Variable
                | DeclarationKind::Parameter
                | DeclarationKind::Constant
                | DeclarationKind::EnumerationMember
                | DeclarationKind::UserDefinedTypeMember
        )
    }
}

/// Scope level a declaration is visible at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Project,
    Module,
    Procedure,
    Block,
}

/// Declared accessibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessibility {
    Public,
    Private,
    Friend,
    Global,
    /// No explicit modifier, or a synthesized declaration.
    Implicit,
}

impl Accessibility {
    /// Whether the declaration is visible outside its module.
    ///
    /// Members without a modifier are public in this language.
    pub fn is_public(&self) -> bool {
        !matches!(self, Accessibility::Private)
    }
}

/// Where a declaration's type came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSource {
    /// Written out with `As Type`.
    Declared,
    /// Derived from a type-hint suffix or a literal.
    Inferred,
    /// Defaulted because nothing was written.
    Implicit,
}

/// Flags that only apply to some declaration kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers {
    pub by_val: bool,
    pub optional: bool,
    pub param_array: bool,
    pub is_array: bool,
    pub is_static: bool,
    pub with_events: bool,
    /// Module or library class usable by name without `New`.
    pub has_default_instance: bool,
}

/// A declared program element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub id: DeclarationId,
    pub name: String,
    /// Dotted path from the project root (`VBAProject.Module1.DoWork.x`).
    pub qualified_name: String,
    pub kind: DeclarationKind,
    /// Owning declaration; `None` only for projects.
    pub parent: Option<DeclarationId>,
    /// User module the declaration lives in; `None` for library declarations.
    pub module: Option<ModuleId>,
    pub type_name: Option<String>,
    pub type_source: TypeSource,
    pub scope: ScopeLevel,
    pub accessibility: Accessibility,
    /// The declared name.
    pub selection: Option<TokenRange>,
    /// The whole declaring construct.
    pub context: Option<TokenRange>,
    pub is_user_defined: bool,
    /// Synthesized from an undeclared use.
    pub is_implicit: bool,
    /// Library name for library declarations.
    pub library: Option<String>,
    /// Annotation names (`@TestMethod`) attached to the declaration.
    pub annotations: Vec<String>,
    pub modifiers: Modifiers,
}

impl Declaration {
    /// Create a declaration with defaults; id, parent and qualified name are
    /// filled in by [`SnapshotBuilder::add_declaration`].
    pub fn new(name: impl Into<String>, kind: DeclarationKind) -> Self {
        let scope = match kind {
            DeclarationKind::Project => ScopeLevel::Project,
            DeclarationKind::Parameter | DeclarationKind::LineLabel => ScopeLevel::Procedure,
            _ => ScopeLevel::Module,
        };
        Declaration {
            id: DeclarationId(0),
            name: name.into(),
            qualified_name: String::new(),
            kind,
            parent: None,
            module: None,
            type_name: None,
            type_source: TypeSource::Implicit,
            scope,
            accessibility: Accessibility::Implicit,
            selection: None,
            context: None,
            is_user_defined: false,
            is_implicit: false,
            library: None,
            annotations: Vec::new(),
            modifiers: Modifiers::default(),
        }
    }

    pub fn with_parent(mut self, parent: DeclarationId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_module(mut self, module: ModuleId) -> Self {
        self.module = Some(module);
        self.is_user_defined = true;
        self
    }

    pub fn with_type(mut self, type_name: impl Into<String>, source: TypeSource) -> Self {
        self.type_name = Some(type_name.into());
        self.type_source = source;
        self
    }

    pub fn with_scope(mut self, scope: ScopeLevel) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_accessibility(mut self, accessibility: Accessibility) -> Self {
        self.accessibility = accessibility;
        self
    }

    pub fn with_selection(mut self, selection: TokenRange) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_context(mut self, context: TokenRange) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_library(mut self, library: impl Into<String>) -> Self {
        self.library = Some(library.into());
        self.is_user_defined = false;
        self
    }

    pub fn with_annotations(mut self, annotations: Vec<String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Mark as synthesized from an undeclared use.
    pub fn implicit(mut self) -> Self {
        self.is_implicit = true;
        self
    }

    /// Case-insensitive name match.
    pub fn name_is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Whether the declaration carries the annotation (case-insensitive).
    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations
            .iter()
            .any(|a| a.eq_ignore_ascii_case(annotation))
    }
}

// ============================================================================
// References
// ============================================================================

/// One resolved use of a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: ReferenceId,
    pub declaration: DeclarationId,
    /// Identifier as written at the use site.
    pub identifier: String,
    pub module: ModuleId,
    pub range: TokenRange,
    /// Innermost enclosing member, or the module for module-level uses.
    pub enclosing: Option<DeclarationId>,
    pub is_assignment: bool,
    pub is_set_assignment: bool,
}

/// Why a use did not bind to exactly one declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnboundReason {
    /// Nothing matched at any precedence level.
    NotFound,
    /// Several declarations matched at the winning level. `chosen` is the
    /// one the reference was bound to, if a tie-break applied.
    Ambiguous {
        chosen: Option<DeclarationId>,
        candidates: Vec<DeclarationId>,
    },
    /// Member access on an object whose type is not statically known.
    LateBound,
    /// Nothing matched and some referenced libraries could not be loaded.
    LibraryUnavailable { libraries: Vec<String> },
}

/// A use that did not bind to exactly one declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnboundReference {
    pub name: String,
    pub module: ModuleId,
    pub range: TokenRange,
    pub enclosing: Option<DeclarationId>,
    #[serde(flatten)]
    pub reason: UnboundReason,
}

/// A library reference that failed to load during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryFailure {
    pub project: String,
    pub library: String,
    pub message: String,
}

/// Module-level facts that are not declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleFacts {
    pub module: ModuleId,
    pub kind: ModuleKind,
    pub version: Version,
    /// Option statements as written after `Option` (`Explicit`, `Private Module`).
    pub options: Vec<String>,
    /// Interface names from `Implements` clauses.
    pub implements: Vec<String>,
    /// Module annotations (`@TestModule`).
    pub annotations: Vec<String>,
    /// Byte offset where the declarations section starts, after any header
    /// and attribute lines.
    pub body_start: u64,
    /// Byte offset of the line after the last `Option` statement, or
    /// `body_start` when there is none.
    pub options_end: u64,
    /// Byte offset just past the declarations section.
    pub declarations_end: u64,
    /// Text the facts were computed from.
    #[serde(skip)]
    pub text: Arc<str>,
}

impl ModuleFacts {
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o.eq_ignore_ascii_case(option))
    }

    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations
            .iter()
            .any(|a| a.eq_ignore_ascii_case(annotation))
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Violations of the snapshot's structural invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("{declaration} has parent {parent} which is not declared before it")]
    ParentNotDeclared {
        declaration: DeclarationId,
        parent: DeclarationId,
    },

    #[error("{declaration} has no parent but is not a project")]
    Orphan { declaration: DeclarationId },

    #[error("reference {reference} points at unknown {declaration}")]
    DanglingReference {
        reference: ReferenceId,
        declaration: DeclarationId,
    },
}

/// Incrementally assembles a [`Snapshot`].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    declarations: Vec<Declaration>,
    references: Vec<Reference>,
    unbound: Vec<UnboundReference>,
    library_failures: Vec<LibraryFailure>,
    module_facts: BTreeMap<ModuleId, ModuleFacts>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        SnapshotBuilder::default()
    }

    /// Add a declaration, assigning its id and qualified name.
    pub fn add_declaration(&mut self, mut declaration: Declaration) -> DeclarationId {
        let id = DeclarationId(self.declarations.len() as u32);
        declaration.id = id;
        declaration.qualified_name = match declaration
            .parent
            .and_then(|p| self.declarations.get(p.index()))
        {
            Some(parent) => format!("{}.{}", parent.qualified_name, declaration.name),
            None => declaration.name.clone(),
        };
        self.declarations.push(declaration);
        id
    }

    pub fn declaration(&self, id: DeclarationId) -> Option<&Declaration> {
        self.declarations.get(id.index())
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Add a resolved reference, assigning its id.
    pub fn add_reference(&mut self, mut reference: Reference) -> ReferenceId {
        let id = ReferenceId(self.references.len() as u32);
        reference.id = id;
        self.references.push(reference);
        id
    }

    pub fn add_unbound(&mut self, unbound: UnboundReference) {
        self.unbound.push(unbound);
    }

    pub fn add_library_failure(&mut self, failure: LibraryFailure) {
        self.library_failures.push(failure);
    }

    pub fn add_module_facts(&mut self, facts: ModuleFacts) {
        self.module_facts.insert(facts.module.clone(), facts);
    }

    /// Validate invariants and freeze into a snapshot.
    pub fn build(
        self,
        generation: u64,
        module_versions: BTreeMap<ModuleId, Version>,
    ) -> Result<Snapshot, SnapshotError> {
        for decl in &self.declarations {
            match decl.parent {
                Some(parent) if parent >= decl.id => {
                    return Err(SnapshotError::ParentNotDeclared {
                        declaration: decl.id,
                        parent,
                    });
                }
                None if decl.kind != DeclarationKind::Project => {
                    return Err(SnapshotError::Orphan {
                        declaration: decl.id,
                    });
                }
                _ => {}
            }
        }

        let count = self.declarations.len() as u32;
        for reference in &self.references {
            if reference.declaration.0 >= count {
                return Err(SnapshotError::DanglingReference {
                    reference: reference.id,
                    declaration: reference.declaration,
                });
            }
        }

        let mut by_module: BTreeMap<ModuleId, Vec<DeclarationId>> = BTreeMap::new();
        let mut children: HashMap<DeclarationId, Vec<DeclarationId>> = HashMap::new();
        for decl in &self.declarations {
            if let Some(module) = &decl.module {
                by_module.entry(module.clone()).or_default().push(decl.id);
            }
            if let Some(parent) = decl.parent {
                children.entry(parent).or_default().push(decl.id);
            }
        }

        let mut refs_by_declaration: HashMap<DeclarationId, Vec<ReferenceId>> = HashMap::new();
        let mut refs_by_module: BTreeMap<ModuleId, Vec<ReferenceId>> = BTreeMap::new();
        for reference in &self.references {
            refs_by_declaration
                .entry(reference.declaration)
                .or_default()
                .push(reference.id);
            refs_by_module
                .entry(reference.module.clone())
                .or_default()
                .push(reference.id);
        }

        Ok(Snapshot {
            generation,
            declarations: self.declarations,
            references: self.references,
            unbound: self.unbound,
            library_failures: self.library_failures,
            module_versions,
            module_facts: self.module_facts,
            by_module,
            children,
            refs_by_declaration,
            refs_by_module,
        })
    }
}

/// Immutable, versioned symbol table of a whole project set.
#[derive(Debug, Clone)]
pub struct Snapshot {
    generation: u64,
    declarations: Vec<Declaration>,
    references: Vec<Reference>,
    unbound: Vec<UnboundReference>,
    library_failures: Vec<LibraryFailure>,
    module_versions: BTreeMap<ModuleId, Version>,
    module_facts: BTreeMap<ModuleId, ModuleFacts>,

    // Indexes
    by_module: BTreeMap<ModuleId, Vec<DeclarationId>>,
    children: HashMap<DeclarationId, Vec<DeclarationId>>,
    refs_by_declaration: HashMap<DeclarationId, Vec<ReferenceId>>,
    refs_by_module: BTreeMap<ModuleId, Vec<ReferenceId>>,
}

impl Snapshot {
    /// The snapshot published before any cycle completed.
    pub fn empty() -> Self {
        Snapshot {
            generation: 0,
            declarations: Vec::new(),
            references: Vec::new(),
            unbound: Vec::new(),
            library_failures: Vec::new(),
            module_versions: BTreeMap::new(),
            module_facts: BTreeMap::new(),
            by_module: BTreeMap::new(),
            children: HashMap::new(),
            refs_by_declaration: HashMap::new(),
            refs_by_module: BTreeMap::new(),
        }
    }

    /// Monotonic publication counter.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn declaration(&self, id: DeclarationId) -> Option<&Declaration> {
        self.declarations.get(id.index())
    }

    /// All declarations in id order.
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// Declarations from user code.
    pub fn user_declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.declarations.iter().filter(|d| d.is_user_defined)
    }

    /// Declarations of one module in id order.
    pub fn declarations_in_module(&self, module: &ModuleId) -> Vec<&Declaration> {
        self.by_module
            .get(module)
            .map(|ids| ids.iter().filter_map(|id| self.declaration(*id)).collect())
            .unwrap_or_default()
    }

    /// The module declaration for a user module.
    pub fn module_declaration(&self, module: &ModuleId) -> Option<&Declaration> {
        self.declarations_in_module(module)
            .into_iter()
            .find(|d| d.kind.is_module())
    }

    /// Direct children of a declaration.
    pub fn children_of(&self, id: DeclarationId) -> Vec<&Declaration> {
        self.children
            .get(&id)
            .map(|ids| ids.iter().filter_map(|c| self.declaration(*c)).collect())
            .unwrap_or_default()
    }

    /// Walk the parent chain up to the project declaration.
    pub fn project_of(&self, id: DeclarationId) -> Option<&Declaration> {
        let mut current = self.declaration(id)?;
        while let Some(parent) = current.parent {
            current = self.declaration(parent)?;
        }
        Some(current)
    }

    /// Find a declaration by dotted qualified name (case-insensitive).
    pub fn find_qualified(&self, qualified_name: &str) -> Option<&Declaration> {
        self.declarations
            .iter()
            .find(|d| d.qualified_name.eq_ignore_ascii_case(qualified_name))
    }

    /// The innermost member declaration of `module` whose construct covers
    /// byte `offset`.
    pub fn member_at(&self, module: &ModuleId, offset: u64) -> Option<&Declaration> {
        self.declarations_in_module(module)
            .into_iter()
            .filter(|d| d.kind.is_member())
            .find(|d| {
                d.context
                    .map(|c| c.span.start <= offset && offset <= c.span.end)
                    .unwrap_or(false)
            })
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// References bound to one declaration, in id order.
    pub fn references_to(&self, id: DeclarationId) -> Vec<&Reference> {
        self.refs_by_declaration
            .get(&id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|r| self.references.get(r.0 as usize))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// References located in one module, in id order.
    pub fn references_in_module(&self, module: &ModuleId) -> Vec<&Reference> {
        self.refs_by_module
            .get(module)
            .map(|ids| {
                ids.iter()
                    .filter_map(|r| self.references.get(r.0 as usize))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn unbound(&self) -> &[UnboundReference] {
        &self.unbound
    }

    pub fn library_failures(&self) -> &[LibraryFailure] {
        &self.library_failures
    }

    /// The version each module had when this snapshot was resolved.
    pub fn module_version(&self, module: &ModuleId) -> Option<Version> {
        self.module_versions.get(module).copied()
    }

    pub fn module_versions(&self) -> &BTreeMap<ModuleId, Version> {
        &self.module_versions
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleId> {
        self.module_versions.keys()
    }

    pub fn module_facts(&self, module: &ModuleId) -> Option<&ModuleFacts> {
        self.module_facts.get(module)
    }

    /// The text `module` had when this snapshot was resolved.
    pub fn module_text(&self, module: &ModuleId) -> Option<&str> {
        self.module_facts.get(module).map(|f| &*f.text)
    }

    /// Every user module's facts, ordered by module id.
    pub fn all_module_facts(&self) -> impl Iterator<Item = &ModuleFacts> {
        self.module_facts.values()
    }

    /// Whether two snapshots hold the same declarations, references and
    /// unbound uses, ignoring the generation counter.
    pub fn same_content(&self, other: &Snapshot) -> bool {
        self.declarations == other.declarations
            && self.references == other.references
            && self.unbound == other.unbound
            && self.module_versions == other.module_versions
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Span;

    fn range(start: u64, end: u64) -> TokenRange {
        TokenRange {
            start_token: start as u32,
            end_token: end as u32,
            span: Span::new(start, end),
        }
    }

    fn module() -> ModuleId {
        ModuleId::new("VBAProject", "Module1")
    }

    fn sample() -> (SnapshotBuilder, DeclarationId, DeclarationId, DeclarationId) {
        let mut builder = SnapshotBuilder::new();
        let project = builder.add_declaration(Declaration::new("VBAProject", DeclarationKind::Project));
        let module_decl = builder.add_declaration(
            Declaration::new("Module1", DeclarationKind::StandardModule)
                .with_parent(project)
                .with_module(module()),
        );
        let proc = builder.add_declaration(
            Declaration::new("DoWork", DeclarationKind::Procedure)
                .with_parent(module_decl)
                .with_module(module())
                .with_context(range(0, 40)),
        );
        (builder, project, module_decl, proc)
    }

    mod builder_tests {
        use super::*;

        #[test]
        fn qualified_names_follow_parents() {
            let (builder, _, _, proc) = sample();
            assert_eq!(
                builder.declaration(proc).unwrap().qualified_name,
                "VBAProject.Module1.DoWork"
            );
        }

        #[test]
        fn orphan_declaration_rejected() {
            let mut builder = SnapshotBuilder::new();
            let id = builder.add_declaration(Declaration::new("x", DeclarationKind::Variable));
            let err = builder.build(1, BTreeMap::new()).unwrap_err();
            assert_eq!(err, SnapshotError::Orphan { declaration: id });
        }

        #[test]
        fn forward_parent_rejected() {
            let mut builder = SnapshotBuilder::new();
            builder.add_declaration(Declaration::new("P", DeclarationKind::Project));
            builder.add_declaration(
                Declaration::new("x", DeclarationKind::Variable).with_parent(DeclarationId(5)),
            );
            assert!(matches!(
                builder.build(1, BTreeMap::new()),
                Err(SnapshotError::ParentNotDeclared { .. })
            ));
        }

        #[test]
        fn dangling_reference_rejected() {
            let (mut builder, _, _, _) = sample();
            builder.add_reference(Reference {
                id: ReferenceId(0),
                declaration: DeclarationId(99),
                identifier: "x".into(),
                module: module(),
                range: range(1, 2),
                enclosing: None,
                is_assignment: false,
                is_set_assignment: false,
            });
            assert!(matches!(
                builder.build(1, BTreeMap::new()),
                Err(SnapshotError::DanglingReference { .. })
            ));
        }
    }

    mod query_tests {
        use super::*;

        #[test]
        fn indexes_are_populated() {
            let (mut builder, project, module_decl, proc) = sample();
            builder.add_reference(Reference {
                id: ReferenceId(0),
                declaration: proc,
                identifier: "DoWork".into(),
                module: module(),
                range: range(50, 56),
                enclosing: Some(module_decl),
                is_assignment: false,
                is_set_assignment: false,
            });
            let mut versions = BTreeMap::new();
            versions.insert(module(), Version(3));
            let snapshot = builder.build(7, versions).unwrap();

            assert_eq!(snapshot.generation(), 7);
            assert_eq!(snapshot.declarations_in_module(&module()).len(), 2);
            assert_eq!(snapshot.references_to(proc).len(), 1);
            assert_eq!(snapshot.references_in_module(&module()).len(), 1);
            assert_eq!(snapshot.children_of(module_decl)[0].id, proc);
            assert_eq!(snapshot.project_of(proc).unwrap().id, project);
            assert_eq!(snapshot.module_version(&module()), Some(Version(3)));
            assert_eq!(
                snapshot.module_declaration(&module()).unwrap().id,
                module_decl
            );
        }

        #[test]
        fn member_at_uses_context_range() {
            let (builder, _, _, proc) = sample();
            let snapshot = builder.build(1, BTreeMap::new()).unwrap();
            assert_eq!(snapshot.member_at(&module(), 10).unwrap().id, proc);
            assert!(snapshot.member_at(&module(), 100).is_none());
        }

        #[test]
        fn find_qualified_ignores_case() {
            let (builder, _, _, proc) = sample();
            let snapshot = builder.build(1, BTreeMap::new()).unwrap();
            assert_eq!(
                snapshot.find_qualified("vbaproject.module1.dowork").unwrap().id,
                proc
            );
        }

        #[test]
        fn module_facts_are_kept_with_text() {
            let (mut builder, ..) = sample();
            builder.add_module_facts(ModuleFacts {
                module: module(),
                kind: ModuleKind::Standard,
                version: Version(2),
                options: vec!["Explicit".into()],
                implements: Vec::new(),
                annotations: vec!["TestModule".into()],
                body_start: 0,
                options_end: 16,
                declarations_end: 16,
                text: Arc::from("Option Explicit\n"),
            });
            let snapshot = builder.build(1, BTreeMap::new()).unwrap();
            let facts = snapshot.module_facts(&module()).unwrap();
            assert!(facts.has_option("explicit"));
            assert!(facts.has_annotation("testmodule"));
            assert_eq!(snapshot.module_text(&module()), Some("Option Explicit\n"));
        }

        #[test]
        fn same_content_ignores_generation() {
            let (a, ..) = sample();
            let (b, ..) = sample();
            let a = a.build(1, BTreeMap::new()).unwrap();
            let b = b.build(2, BTreeMap::new()).unwrap();
            assert!(a.same_content(&b));
        }
    }

    #[test]
    fn private_is_the_only_non_public_accessibility() {
        assert!(Accessibility::Public.is_public());
        assert!(Accessibility::Implicit.is_public());
        assert!(Accessibility::Global.is_public());
        assert!(!Accessibility::Private.is_public());
    }
}
