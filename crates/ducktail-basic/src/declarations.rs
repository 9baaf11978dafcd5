//! Declaration collection: one module at a time, cached per version.
//!
//! Produces a [`ModuleDeclarations`] summary: a flat list of declaration
//! seeds whose parents are local indices (seed 0 is the module itself), the
//! collisions found in any one scope, and the module-level facts the
//! resolver and inspections need.

use std::collections::HashMap;

use ducktail_core::adapter::{ResolverDiagnostic, SourceModule};
use ducktail_core::facts::{
    Accessibility, Declaration, DeclarationKind, Modifiers, ScopeLevel, TypeSource,
};
use ducktail_core::types::{ModuleId, ModuleKind, TokenRange};

use crate::lexer::hint_type;
use crate::syntax::*;

/// A declaration whose parent is a seed index of the same module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationSeed {
    pub declaration: Declaration,
    /// `None` only for the module seed, whose parent is the project.
    pub parent: Option<usize>,
}

/// Per-module output of declaration collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDeclarations {
    pub module: ModuleId,
    pub kind: ModuleKind,
    pub seeds: Vec<DeclarationSeed>,
    /// Seed index of each procedure, in `ModuleTree::procedures` order.
    pub procedures: Vec<usize>,
    pub collisions: Vec<ResolverDiagnostic>,
    pub options: Vec<String>,
    pub implements: Vec<String>,
    pub annotations: Vec<String>,
    pub body_start: u64,
    pub options_end: u64,
    pub declarations_end: u64,
    /// Usable by name without `New`.
    pub predeclared: bool,
}

impl ModuleDeclarations {
    pub fn module_seed(&self) -> &Declaration {
        &self.seeds[0].declaration
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o.eq_ignore_ascii_case(option))
    }

    /// Seed indices whose parent is `parent`.
    pub fn children(&self, parent: usize) -> impl Iterator<Item = usize> + '_ {
        self.seeds
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.parent == Some(parent))
            .map(|(i, _)| i)
    }
}

pub fn module_declaration_kind(kind: ModuleKind) -> DeclarationKind {
    match kind {
        ModuleKind::Standard => DeclarationKind::StandardModule,
        ModuleKind::Class => DeclarationKind::ClassModule,
        ModuleKind::Document => DeclarationKind::DocumentModule,
        ModuleKind::UserForm => DeclarationKind::UserForm,
    }
}

/// Type of a name from `As`, else its hint, else `Variant`.
fn typed(declaration: Declaration, ident: &Ident, as_type: Option<&TypeRef>) -> Declaration {
    if let Some(ty) = as_type {
        return declaration.with_type(ty.name(), TypeSource::Declared);
    }
    match ident.hint().and_then(hint_type) {
        Some(hinted) => declaration.with_type(hinted, TypeSource::Inferred),
        None => declaration.with_type("Variant", TypeSource::Implicit),
    }
}

/// Collect the declarations of one parsed module.
pub fn collect(source: &SourceModule<'_>, tree: &ModuleTree) -> ModuleDeclarations {
    let mut collector = Collector {
        module: source.id.clone(),
        seeds: Vec::new(),
        procedures: Vec::new(),
        names: HashMap::new(),
        collisions: Vec::new(),
    };

    let predeclared = source.kind.has_default_instance()
        || tree
            .attribute("VB_PredeclaredId")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        || tree
            .annotations
            .iter()
            .any(|a| a.name.eq_ignore_ascii_case("PredeclaredId"));
    let private_module = tree.has_option("Private Module");

    let mut module = Declaration::new(source.id.name.clone(), module_declaration_kind(source.kind))
        .with_scope(ScopeLevel::Project)
        .with_accessibility(if private_module {
            Accessibility::Private
        } else {
            Accessibility::Public
        })
        .with_annotations(tree.annotations.iter().map(|a| a.name.clone()).collect())
        .with_modifiers(Modifiers {
            has_default_instance: predeclared,
            ..Modifiers::default()
        });
    let body = tree.tokens.iter().filter(|t| t.span.start >= tree.body_start);
    if let (Some(first), Some(last)) = (body.clone().next(), body.last()) {
        module = module.with_context(TokenRange::between(first, last));
    }
    collector.push(module, None);

    for item in &tree.items {
        collector.item(item);
    }

    ModuleDeclarations {
        module: source.id.clone(),
        kind: source.kind,
        seeds: collector.seeds,
        procedures: collector.procedures,
        collisions: collector.collisions,
        options: tree.options.iter().map(|o| o.text.clone()).collect(),
        implements: tree.implements.iter().map(|i| i.interface.name()).collect(),
        annotations: tree.annotations.iter().map(|a| a.name.clone()).collect(),
        body_start: tree.body_start,
        options_end: tree.options_end,
        declarations_end: tree.declarations_end,
        predeclared,
    }
}

/// Name slot within one parent scope; labels live in their own namespace.
type NameKey = (usize, String, bool);

struct Collector {
    module: ModuleId,
    seeds: Vec<DeclarationSeed>,
    procedures: Vec<usize>,
    names: HashMap<NameKey, Vec<DeclarationKind>>,
    collisions: Vec<ResolverDiagnostic>,
}

impl Collector {
    fn push(&mut self, declaration: Declaration, parent: Option<usize>) -> usize {
        let declaration = declaration.with_module(self.module.clone());
        if let Some(parent) = parent {
            self.check_collision(&declaration, parent);
        }
        self.seeds.push(DeclarationSeed {
            declaration,
            parent,
        });
        self.seeds.len() - 1
    }

    fn check_collision(&mut self, declaration: &Declaration, parent: usize) {
        let key = (
            parent,
            declaration.name.to_ascii_lowercase(),
            declaration.kind == DeclarationKind::LineLabel,
        );
        let existing = self.names.entry(key).or_default();
        let is_accessor = |k: &DeclarationKind| {
            matches!(
                k,
                DeclarationKind::PropertyGet
                    | DeclarationKind::PropertyLet
                    | DeclarationKind::PropertySet
            )
        };
        let clashes = existing
            .iter()
            .any(|k| !(is_accessor(k) && is_accessor(&declaration.kind) && *k != declaration.kind));
        existing.push(declaration.kind);
        if clashes {
            let scope = &self.seeds[parent].declaration.name;
            self.collisions.push(ResolverDiagnostic {
                module: self.module.clone(),
                name: declaration.name.clone(),
                range: declaration.selection,
                message: format!("'{}' is already declared in '{}'", declaration.name, scope),
            });
        }
    }

    fn item(&mut self, item: &ModuleItem) {
        match item {
            ModuleItem::Variables {
                accessibility,
                declarators,
                range,
                annotations,
            } => {
                let names: Vec<String> = annotations.iter().map(|a| a.name.clone()).collect();
                for declarator in declarators {
                    let declaration = self
                        .variable(declarator, *range, false)
                        .with_accessibility(*accessibility)
                        .with_annotations(names.clone());
                    self.push(declaration, Some(0));
                }
            }
            ModuleItem::Constants {
                accessibility,
                constants,
                range,
                annotations,
            } => {
                let names: Vec<String> = annotations.iter().map(|a| a.name.clone()).collect();
                for constant in constants {
                    let declaration = self
                        .constant(constant, *range)
                        .with_accessibility(*accessibility)
                        .with_annotations(names.clone());
                    self.push(declaration, Some(0));
                }
            }
            ModuleItem::Type {
                accessibility,
                name,
                members,
                range,
            } => {
                let declaration = Declaration::new(name.bare(), DeclarationKind::UserDefinedType)
                    .with_accessibility(*accessibility)
                    .with_selection(name.range)
                    .with_context(*range);
                let ty = self.push(declaration, Some(0));
                for member in members {
                    let declaration = typed(
                        Declaration::new(member.name.bare(), DeclarationKind::UserDefinedTypeMember),
                        &member.name,
                        member.as_type.as_ref(),
                    )
                    .with_accessibility(*accessibility)
                    .with_selection(member.name.range)
                    .with_context(member.range)
                    .with_modifiers(Modifiers {
                        is_array: member.is_array,
                        ..Modifiers::default()
                    });
                    self.push(declaration, Some(ty));
                }
            }
            ModuleItem::Enum {
                accessibility,
                name,
                members,
                range,
            } => {
                let declaration = Declaration::new(name.bare(), DeclarationKind::Enumeration)
                    .with_accessibility(*accessibility)
                    .with_selection(name.range)
                    .with_context(*range);
                let enumeration = self.push(declaration, Some(0));
                for member in members {
                    let declaration =
                        Declaration::new(member.name.bare(), DeclarationKind::EnumerationMember)
                            .with_type(name.bare(), TypeSource::Declared)
                            .with_accessibility(*accessibility)
                            .with_selection(member.name.range)
                            .with_context(member.range);
                    self.push(declaration, Some(enumeration));
                }
            }
            ModuleItem::Event {
                accessibility,
                name,
                params,
                range,
            } => {
                let declaration = Declaration::new(name.bare(), DeclarationKind::Event)
                    .with_accessibility(*accessibility)
                    .with_selection(name.range)
                    .with_context(*range);
                let event = self.push(declaration, Some(0));
                self.parameters(params, event);
            }
            ModuleItem::Declare(external) => {
                let kind = if external.is_function {
                    DeclarationKind::Function
                } else {
                    DeclarationKind::Procedure
                };
                let mut declaration = Declaration::new(external.name.bare(), kind)
                    .with_accessibility(external.accessibility)
                    .with_selection(external.name.range)
                    .with_context(external.range);
                if external.is_function {
                    declaration =
                        typed(declaration, &external.name, external.return_type.as_ref());
                }
                let procedure = self.push(declaration, Some(0));
                self.parameters(&external.params, procedure);
            }
            ModuleItem::Procedure(procedure) => self.procedure(procedure),
        }
    }

    fn variable(&self, declarator: &Declarator, statement: TokenRange, local: bool) -> Declaration {
        let declaration = Declaration::new(declarator.name.bare(), DeclarationKind::Variable)
            .with_selection(declarator.name.range)
            .with_context(statement)
            .with_scope(if local {
                ScopeLevel::Procedure
            } else {
                ScopeLevel::Module
            })
            .with_modifiers(Modifiers {
                is_array: declarator.is_array,
                with_events: declarator.with_events,
                ..Modifiers::default()
            });
        typed(declaration, &declarator.name, declarator.as_type.as_ref())
    }

    fn constant(&self, constant: &ConstDeclarator, statement: TokenRange) -> Declaration {
        let declaration = Declaration::new(constant.name.bare(), DeclarationKind::Constant)
            .with_selection(constant.name.range)
            .with_context(statement);
        typed(declaration, &constant.name, constant.as_type.as_ref())
    }

    fn parameters(&mut self, params: &[Parameter], parent: usize) {
        for param in params {
            let declaration = typed(
                Declaration::new(param.name.bare(), DeclarationKind::Parameter),
                &param.name,
                param.as_type.as_ref(),
            )
            .with_accessibility(Accessibility::Implicit)
            .with_selection(param.name.range)
            .with_context(param.range)
            .with_modifiers(Modifiers {
                by_val: param.by_val,
                optional: param.optional,
                param_array: param.param_array,
                is_array: param.is_array,
                ..Modifiers::default()
            });
            self.push(declaration, Some(parent));
        }
    }

    fn procedure(&mut self, procedure: &Procedure) {
        let kind = match procedure.kind {
            ProcedureKind::Sub => DeclarationKind::Procedure,
            ProcedureKind::Function => DeclarationKind::Function,
            ProcedureKind::PropertyGet => DeclarationKind::PropertyGet,
            ProcedureKind::PropertyLet => DeclarationKind::PropertyLet,
            ProcedureKind::PropertySet => DeclarationKind::PropertySet,
        };
        let mut declaration = Declaration::new(procedure.name.bare(), kind)
            .with_accessibility(procedure.accessibility)
            .with_selection(procedure.name.range)
            .with_context(procedure.range)
            .with_annotations(procedure.annotations.iter().map(|a| a.name.clone()).collect())
            .with_modifiers(Modifiers {
                is_static: procedure.is_static,
                ..Modifiers::default()
            });
        if procedure.kind.returns_value() {
            declaration = typed(declaration, &procedure.name, procedure.return_type.as_ref());
        }
        let index = self.push(declaration, Some(0));
        self.procedures.push(index);
        self.parameters(&procedure.params, index);
        self.locals(&procedure.body, index);
    }

    fn locals(&mut self, body: &[Statement], procedure: usize) {
        for statement in body {
            match statement {
                Statement::Dim {
                    is_static,
                    declarators,
                    range,
                } => {
                    for declarator in declarators {
                        let mut declaration = self.variable(declarator, *range, true);
                        declaration.modifiers.is_static = *is_static;
                        self.push(declaration, Some(procedure));
                    }
                }
                Statement::Const { constants, range } => {
                    for constant in constants {
                        let declaration = self
                            .constant(constant, *range)
                            .with_scope(ScopeLevel::Procedure);
                        self.push(declaration, Some(procedure));
                    }
                }
                Statement::Label { name, range } => {
                    let declaration = Declaration::new(name.bare(), DeclarationKind::LineLabel)
                        .with_selection(name.range)
                        .with_context(*range);
                    self.push(declaration, Some(procedure));
                }
                Statement::If {
                    arms, else_body, ..
                } => {
                    for arm in arms {
                        self.locals(&arm.body, procedure);
                    }
                    self.locals(else_body, procedure);
                }
                Statement::Select { cases, .. } => {
                    for case in cases {
                        self.locals(&case.body, procedure);
                    }
                }
                Statement::For { body, .. }
                | Statement::ForEach { body, .. }
                | Statement::Do { body, .. }
                | Statement::While { body, .. }
                | Statement::With { body, .. } => self.locals(body, procedure),
                _ => {}
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
