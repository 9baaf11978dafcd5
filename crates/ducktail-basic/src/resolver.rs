//! Reference resolution over a whole project set.
//!
//! Registers every declaration (projects, user modules, referenced
//! libraries) and then binds each identifier use in fixed precedence:
//!
//! 1. procedure-local scope (parameters, locals, implicit locals)
//! 2. the enclosing module's members, enum members included
//! 3. other modules of the project: module names, public members of
//!    standard modules
//! 4. referenced non-built-in libraries
//! 5. built-in libraries
//!
//! Uses that bind to nothing become [`UnboundReference`]s; inside a
//! procedure of a module without `Option Explicit`, a value use instead
//! synthesizes an implicit `Variant` local.

use std::collections::HashMap;

use ducktail_core::adapter::{ParsedUnit, ResolveRequest, ResolverDiagnostic};
use ducktail_core::facts::{
    Accessibility, Declaration, DeclarationId, DeclarationKind, LibraryFailure, Modifiers,
    ModuleFacts, Reference, ReferenceId, ScopeLevel, SnapshotBuilder, TypeSource,
    UnboundReason, UnboundReference,
};
use ducktail_core::types::{LibraryReference, ModuleId};
use tracing::{debug, warn};

use crate::declarations::ModuleDeclarations;
use crate::lexer::is_intrinsic_type;
use crate::library::{LibraryModel, LibraryModuleKind, LibraryProvider, VBA_LIBRARY};
use crate::syntax::*;

pub type Unit = ParsedUnit<ModuleTree, ModuleDeclarations>;

/// Resolve every unit of `request` into `builder`.
///
/// Fails with the collected duplicate declarations, if any; nothing is
/// added to the builder in that case.
pub fn resolve(
    request: &ResolveRequest<'_, ModuleTree, ModuleDeclarations>,
    provider: &dyn LibraryProvider,
    builder: &mut SnapshotBuilder,
) -> Result<(), Vec<ResolverDiagnostic>> {
    let collisions: Vec<ResolverDiagnostic> = request
        .units
        .iter()
        .flat_map(|u| u.declarations.collisions.iter().cloned())
        .collect();
    if !collisions.is_empty() {
        return Err(collisions);
    }

    let mut projects = HashMap::new();
    for project in request.projects() {
        let id = builder.add_declaration(
            Declaration::new(project, DeclarationKind::Project)
                .with_accessibility(Accessibility::Public),
        );
        projects.insert(project.to_string(), id);
    }

    let mut unit_ids = Vec::with_capacity(request.units.len());
    for unit in request.units {
        let project = projects[&unit.id.project];
        let mut ids: Vec<DeclarationId> = Vec::with_capacity(unit.declarations.seeds.len());
        for seed in &unit.declarations.seeds {
            let parent = seed.parent.map(|p| ids[p]).unwrap_or(project);
            ids.push(builder.add_declaration(seed.declaration.clone().with_parent(parent)));
        }
        unit_ids.push(ids);
    }

    let libraries = load_libraries(request, provider, builder);

    let mut resolver = Resolver::new(builder, request.units, unit_ids, projects, libraries);
    for (index, unit) in request.units.iter().enumerate() {
        resolver.unit(index, unit);
    }

    for unit in request.units {
        let declarations = &unit.declarations;
        builder.add_module_facts(ModuleFacts {
            module: unit.id.clone(),
            kind: unit.kind,
            version: unit.version,
            options: declarations.options.clone(),
            implements: declarations.implements.clone(),
            annotations: declarations.annotations.clone(),
            body_start: declarations.body_start,
            options_end: declarations.options_end,
            declarations_end: declarations.declarations_end,
            text: unit.text.clone(),
        });
    }
    Ok(())
}

// ============================================================================
// Libraries
// ============================================================================

#[derive(Debug)]
struct LoadedLibrary {
    name: String,
    root: DeclarationId,
    /// Library modules and classes by lowercase name.
    modules: HashMap<String, Vec<DeclarationId>>,
    /// Members of global modules by lowercase name (hint suffix kept).
    globals: HashMap<String, Vec<DeclarationId>>,
}

impl LoadedLibrary {
    fn lookup(&self, name: &str) -> Vec<DeclarationId> {
        let mut found = Vec::new();
        if self.name.eq_ignore_ascii_case(name) {
            found.push(self.root);
        }
        for map in [&self.modules, &self.globals] {
            if let Some(ids) = map.get(name) {
                found.extend(ids.iter().copied());
            }
        }
        found
    }
}

#[derive(Debug, Clone, Copy)]
struct LibraryUse {
    library: usize,
    builtin: bool,
}

#[derive(Debug, Default)]
struct ProjectLibraries {
    /// Loaded references in priority, then registration, order.
    loaded: Vec<LibraryUse>,
    failed: Vec<String>,
}

#[derive(Debug, Default)]
struct Libraries {
    loaded: Vec<LoadedLibrary>,
    by_project: HashMap<String, ProjectLibraries>,
}

fn register_library(model: &LibraryModel, builder: &mut SnapshotBuilder) -> LoadedLibrary {
    let root = builder.add_declaration(
        Declaration::new(&model.name, DeclarationKind::Project)
            .with_library(&model.name)
            .with_accessibility(Accessibility::Public),
    );
    let mut library = LoadedLibrary {
        name: model.name.clone(),
        root,
        modules: HashMap::new(),
        globals: HashMap::new(),
    };
    for module in &model.modules {
        let kind = match module.kind {
            LibraryModuleKind::Module => DeclarationKind::LibraryModule,
            LibraryModuleKind::Class => DeclarationKind::LibraryClass,
        };
        let module_id = builder.add_declaration(
            Declaration::new(&module.name, kind)
                .with_parent(root)
                .with_library(&model.name)
                .with_accessibility(Accessibility::Public)
                .with_modifiers(Modifiers {
                    has_default_instance: module.predeclared,
                    ..Modifiers::default()
                }),
        );
        library
            .modules
            .entry(module.name.to_ascii_lowercase())
            .or_default()
            .push(module_id);
        for member in &module.members {
            let mut declaration = Declaration::new(&member.name, member.kind)
                .with_parent(module_id)
                .with_library(&model.name)
                .with_accessibility(Accessibility::Public);
            if let Some(return_type) = &member.return_type {
                declaration = declaration.with_type(return_type, TypeSource::Declared);
            }
            let member_id = builder.add_declaration(declaration);
            if module.kind == LibraryModuleKind::Module {
                library
                    .globals
                    .entry(member.name.to_ascii_lowercase())
                    .or_default()
                    .push(member_id);
            }
        }
    }
    library
}

/// Load each referenced library once, in project then priority order.
fn load_libraries(
    request: &ResolveRequest<'_, ModuleTree, ModuleDeclarations>,
    provider: &dyn LibraryProvider,
    builder: &mut SnapshotBuilder,
) -> Libraries {
    let mut libraries = Libraries::default();
    let mut by_name: HashMap<String, Result<usize, String>> = HashMap::new();

    for project in request.projects() {
        let mut references: Vec<LibraryReference> =
            request.references.get(project).cloned().unwrap_or_default();
        if !references
            .iter()
            .any(|r| r.name.eq_ignore_ascii_case(VBA_LIBRARY))
        {
            references.insert(0, LibraryReference::builtin(VBA_LIBRARY, 0));
        }

        let mut uses = ProjectLibraries::default();
        for reference in &references {
            let key = reference.name.to_ascii_lowercase();
            let loaded = match by_name.get(&key) {
                Some(loaded) => loaded.clone(),
                None => {
                    let loaded = match provider.load(reference) {
                        Ok(model) => {
                            libraries.loaded.push(register_library(&model, builder));
                            debug!(library = %model.name, modules = model.modules.len(), "library loaded");
                            Ok(libraries.loaded.len() - 1)
                        }
                        Err(e) => Err(e.to_string()),
                    };
                    by_name.insert(key, loaded.clone());
                    loaded
                }
            };
            match loaded {
                Ok(library) => {
                    if !uses.loaded.iter().any(|u| u.library == library) {
                        uses.loaded.push(LibraryUse {
                            library,
                            builtin: reference.is_builtin,
                        });
                    }
                }
                Err(message) => {
                    warn!(project, library = %reference.name, "{}", message);
                    builder.add_library_failure(LibraryFailure {
                        project: project.to_string(),
                        library: reference.name.clone(),
                        message,
                    });
                    uses.failed.push(reference.name.clone());
                }
            }
        }
        libraries.by_project.insert(project.to_string(), uses);
    }
    libraries
}

// ============================================================================
// Resolution
// ============================================================================

/// How a name is used at its site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Use {
    Value,
    /// Callee of a call statement or `AddressOf` operand.
    Call,
    Assign { set: bool },
}

/// What a resolved expression denotes, for member access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Project(DeclarationId),
    Library(usize),
    /// A module, class, user type or enum whose children are its members.
    Members(DeclarationId),
    /// Variant, Object, or anything whose type is unknown.
    LateBound,
    /// A value without members (`Long`, a literal, a Sub).
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookup {
    Found(DeclarationId),
    Ambiguous {
        chosen: Option<DeclarationId>,
        candidates: Vec<DeclarationId>,
    },
    Missing,
}

struct Ctx<'u> {
    module: &'u ModuleId,
    module_decl: DeclarationId,
    project: &'u str,
    procedure: Option<DeclarationId>,
    explicit: bool,
    with_targets: Vec<Target>,
}

impl Ctx<'_> {
    fn enclosing(&self) -> Option<DeclarationId> {
        self.procedure.or(Some(self.module_decl))
    }
}

type Scope = HashMap<String, Vec<DeclarationId>>;

/// Lowercased names to try against libraries: the hinted name first.
fn library_names(ident: &Ident) -> Vec<String> {
    let mut names = Vec::with_capacity(2);
    if ident.hint().is_some() {
        names.push(ident.name.to_ascii_lowercase());
    }
    names.push(ident.bare().to_ascii_lowercase());
    names
}

fn is_accessor(kind: DeclarationKind) -> bool {
    matches!(
        kind,
        DeclarationKind::PropertyGet | DeclarationKind::PropertyLet | DeclarationKind::PropertySet
    )
}

struct Resolver<'b> {
    builder: &'b mut SnapshotBuilder,
    /// Mirror of the builder's declarations, indexed by id.
    table: Vec<Declaration>,
    children: HashMap<DeclarationId, Vec<DeclarationId>>,
    module_ids: HashMap<ModuleId, DeclarationId>,
    unit_ids: Vec<Vec<DeclarationId>>,
    /// Level 2: per user module.
    module_scope: HashMap<DeclarationId, Scope>,
    /// Level 3: per project.
    project_scope: HashMap<String, Scope>,
    libraries: Libraries,
}

impl<'b> Resolver<'b> {
    fn new(
        builder: &'b mut SnapshotBuilder,
        units: &[Unit],
        unit_ids: Vec<Vec<DeclarationId>>,
        projects: HashMap<String, DeclarationId>,
        libraries: Libraries,
    ) -> Self {
        let table = builder.declarations().to_vec();
        let mut children: HashMap<DeclarationId, Vec<DeclarationId>> = HashMap::new();
        for declaration in &table {
            if let Some(parent) = declaration.parent {
                children.entry(parent).or_default().push(declaration.id);
            }
        }

        let mut module_ids = HashMap::new();
        let mut module_scope: HashMap<DeclarationId, Scope> = HashMap::new();
        let mut project_scope: HashMap<String, Scope> = HashMap::new();
        for (project, id) in &projects {
            project_scope
                .entry(project.clone())
                .or_default()
                .entry(project.to_ascii_lowercase())
                .or_default()
                .push(*id);
        }

        for (unit, ids) in units.iter().zip(&unit_ids) {
            let module_decl = ids[0];
            module_ids.insert(unit.id.clone(), module_decl);
            let seeds = &unit.declarations.seeds;
            let standard = seeds[0].declaration.kind == DeclarationKind::StandardModule;
            let scope = module_scope.entry(module_decl).or_default();
            let project = project_scope.entry(unit.id.project.clone()).or_default();
            project
                .entry(unit.id.name.to_ascii_lowercase())
                .or_default()
                .push(module_decl);

            for (index, seed) in seeds.iter().enumerate() {
                let visible_in_module = match seed.parent {
                    Some(0) => seed.declaration.kind != DeclarationKind::Event,
                    Some(parent) => seeds[parent].declaration.kind == DeclarationKind::Enumeration,
                    None => false,
                };
                if !visible_in_module {
                    continue;
                }
                let name = seed.declaration.name.to_ascii_lowercase();
                scope.entry(name.clone()).or_default().push(ids[index]);
                if standard && seed.declaration.accessibility.is_public() {
                    project.entry(name).or_default().push(ids[index]);
                }
            }
        }

        Resolver {
            builder,
            table,
            children,
            module_ids,
            unit_ids,
            module_scope,
            project_scope,
            libraries,
        }
    }

    fn decl(&self, id: DeclarationId) -> &Declaration {
        &self.table[id.0 as usize]
    }

    fn children_named(&self, parent: DeclarationId, name: &str) -> Vec<DeclarationId> {
        self.children
            .get(&parent)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| self.decl(*id).name_is(name))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Pick among same-named declarations of one level.
    fn choose(&self, ids: Vec<DeclarationId>, usage: Use, strict: bool) -> Lookup {
        if ids.len() == 1 {
            return Lookup::Found(ids[0]);
        }
        let first_parent = self.decl(ids[0]).parent;
        let accessors = ids
            .iter()
            .all(|id| is_accessor(self.decl(*id).kind) && self.decl(*id).parent == first_parent);
        if accessors {
            let wanted = match usage {
                Use::Assign { set: true } => DeclarationKind::PropertySet,
                Use::Assign { set: false } => DeclarationKind::PropertyLet,
                _ => DeclarationKind::PropertyGet,
            };
            let chosen = ids
                .iter()
                .copied()
                .find(|id| self.decl(*id).kind == wanted)
                .unwrap_or(ids[0]);
            return Lookup::Found(chosen);
        }
        if strict {
            Lookup::Ambiguous {
                chosen: None,
                candidates: ids,
            }
        } else {
            Lookup::Found(ids[0])
        }
    }

    fn lookup_name(&self, ctx: &Ctx<'_>, ident: &Ident, usage: Use) -> Lookup {
        let bare = ident.bare().to_ascii_lowercase();

        if let Some(procedure) = ctx.procedure {
            let locals: Vec<DeclarationId> = self
                .children_named(procedure, &bare)
                .into_iter()
                .filter(|id| self.decl(*id).kind != DeclarationKind::LineLabel)
                .collect();
            if !locals.is_empty() {
                return self.choose(locals, usage, false);
            }
            // Assigning to the procedure's own name sets its return value.
            if matches!(usage, Use::Assign { .. }) && self.decl(procedure).name_is(&bare) {
                return Lookup::Found(procedure);
            }
        }

        if let Some(ids) = self
            .module_scope
            .get(&ctx.module_decl)
            .and_then(|scope| scope.get(&bare))
        {
            return self.choose(ids.clone(), usage, false);
        }

        if let Some(ids) = self
            .project_scope
            .get(ctx.project)
            .and_then(|scope| scope.get(&bare))
        {
            return self.choose(ids.clone(), usage, true);
        }

        self.lookup_library(ctx.project, &library_names(ident), |_| true)
    }

    /// Levels 4 and 5; `names` are tried in order, lowercased.
    fn lookup_library(
        &self,
        project: &str,
        names: &[String],
        accept: impl Fn(&Declaration) -> bool,
    ) -> Lookup {
        let Some(uses) = self.libraries.by_project.get(project) else {
            return Lookup::Missing;
        };
        for name in names {
            for builtin in [false, true] {
                let matches: Vec<DeclarationId> = uses
                    .loaded
                    .iter()
                    .filter(|u| u.builtin == builtin)
                    .flat_map(|u| self.libraries.loaded[u.library].lookup(name))
                    .filter(|id| accept(self.decl(*id)))
                    .collect();
                match matches.len() {
                    0 => continue,
                    1 => return Lookup::Found(matches[0]),
                    _ => {
                        return Lookup::Ambiguous {
                            chosen: Some(matches[0]),
                            candidates: matches,
                        }
                    }
                }
            }
        }
        Lookup::Missing
    }

    /// A type name as written after `As` or `New`.
    fn lookup_type(&self, module: &ModuleId, name: &str) -> Lookup {
        let name = name.to_ascii_lowercase();
        let is_type = |id: &DeclarationId| self.decl(*id).kind.is_type();

        if let Some(ids) = self
            .module_ids
            .get(module)
            .and_then(|m| self.module_scope.get(m))
            .and_then(|scope| scope.get(&name))
        {
            let types: Vec<DeclarationId> = ids.iter().copied().filter(is_type).collect();
            if !types.is_empty() {
                return self.choose(types, Use::Value, false);
            }
        }
        if let Some(ids) = self
            .project_scope
            .get(&module.project)
            .and_then(|scope| scope.get(&name))
        {
            let types: Vec<DeclarationId> = ids.iter().copied().filter(is_type).collect();
            if !types.is_empty() {
                return self.choose(types, Use::Value, true);
            }
        }
        self.lookup_library(&module.project, &[name], |d| {
            d.kind == DeclarationKind::LibraryClass
        })
    }

    fn lookup_member(&self, ctx: &Ctx<'_>, target: Target, ident: &Ident, usage: Use) -> Lookup {
        let name = ident.bare().to_ascii_lowercase();
        match target {
            Target::Project(project) => {
                let project_name = &self.decl(project).name;
                let modules: Vec<DeclarationId> = self
                    .project_scope
                    .get(project_name)
                    .and_then(|scope| scope.get(&name))
                    .map(|ids| {
                        ids.iter()
                            .copied()
                            .filter(|id| self.decl(*id).kind.is_module())
                            .collect()
                    })
                    .unwrap_or_default();
                if modules.is_empty() {
                    Lookup::Missing
                } else {
                    self.choose(modules, usage, true)
                }
            }
            Target::Library(index) => {
                let library = &self.libraries.loaded[index];
                let mut found = Vec::new();
                if ident.hint().is_some() {
                    found = library.lookup(&ident.name.to_ascii_lowercase());
                }
                if found.is_empty() {
                    found = library.lookup(&name);
                }
                found.retain(|id| *id != library.root);
                if found.is_empty() {
                    Lookup::Missing
                } else {
                    self.choose(found, usage, false)
                }
            }
            Target::Members(owner) => {
                let outside = self.decl(owner).module.as_ref() != Some(ctx.module)
                    && self.decl(owner).is_user_defined;
                let mut found = Vec::new();
                if ident.hint().is_some() {
                    found = self.children_named(owner, &ident.name.to_ascii_lowercase());
                }
                if found.is_empty() {
                    found = self.children_named(owner, &name);
                }
                found.retain(|id| {
                    let member = self.decl(*id);
                    let local = matches!(
                        member.kind,
                        DeclarationKind::LineLabel | DeclarationKind::Event
                    );
                    !local && !(outside && member.accessibility == Accessibility::Private)
                });
                if found.is_empty() {
                    Lookup::Missing
                } else {
                    self.choose(found, usage, false)
                }
            }
            Target::LateBound | Target::Opaque => Lookup::Missing,
        }
    }

    // ------------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------------

    fn target_of(&self, id: DeclarationId) -> Target {
        let declaration = self.decl(id);
        match declaration.kind {
            DeclarationKind::Project => match &declaration.library {
                Some(_) => self
                    .libraries
                    .loaded
                    .iter()
                    .position(|l| l.root == id)
                    .map(Target::Library)
                    .unwrap_or(Target::LateBound),
                None => Target::Project(id),
            },
            kind if kind.is_module() => Target::Members(id),
            DeclarationKind::UserDefinedType | DeclarationKind::Enumeration => Target::Members(id),
            DeclarationKind::Procedure
            | DeclarationKind::PropertyLet
            | DeclarationKind::PropertySet
            | DeclarationKind::LineLabel
            | DeclarationKind::Event => Target::Opaque,
            _ => match &declaration.type_name {
                Some(type_name) => self.type_target(type_name, declaration),
                None => Target::LateBound,
            },
        }
    }

    /// Target for a value of type `type_name` declared by `declaration`.
    fn type_target(&self, type_name: &str, declaration: &Declaration) -> Target {
        let (qualifier, name) = match type_name.rsplit_once('.') {
            Some((qualifier, name)) => (Some(qualifier), name),
            None => (None, type_name),
        };
        if qualifier.is_none() {
            if name.eq_ignore_ascii_case("variant") || name.eq_ignore_ascii_case("object") {
                return Target::LateBound;
            }
            if is_intrinsic_type(name) {
                return Target::Opaque;
            }
        }

        let library_name = qualifier.or(declaration.library.as_deref());
        if let Some(library_name) = library_name {
            let found = self
                .libraries
                .loaded
                .iter()
                .find(|l| l.name.eq_ignore_ascii_case(library_name))
                .and_then(|l| l.modules.get(&name.to_ascii_lowercase()))
                .and_then(|ids| ids.first().copied());
            if let Some(id) = found {
                return Target::Members(id);
            }
            if declaration.library.is_some() {
                return Target::LateBound;
            }
        }

        let Some(module) = &declaration.module else {
            return Target::LateBound;
        };
        match self.lookup_type(module, name) {
            Lookup::Found(id)
            | Lookup::Ambiguous {
                chosen: Some(id), ..
            } => Target::Members(id),
            _ => Target::LateBound,
        }
    }

    // ------------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------------

    fn reference(&mut self, ctx: &Ctx<'_>, ident: &Ident, declaration: DeclarationId, usage: Use) {
        self.builder.add_reference(Reference {
            id: ReferenceId(0),
            declaration,
            identifier: ident.name.clone(),
            module: ctx.module.clone(),
            range: ident.range,
            enclosing: ctx.enclosing(),
            is_assignment: matches!(usage, Use::Assign { .. }),
            is_set_assignment: matches!(usage, Use::Assign { set: true }),
        });
    }

    fn unbound(&mut self, ctx: &Ctx<'_>, ident: &Ident, reason: UnboundReason) {
        self.builder.add_unbound(UnboundReference {
            name: ident.name.clone(),
            module: ctx.module.clone(),
            range: ident.range,
            enclosing: ctx.enclosing(),
            reason,
        });
    }

    fn declare_implicit(&mut self, ctx: &Ctx<'_>, procedure: DeclarationId, ident: &Ident) -> DeclarationId {
        let declaration = Declaration::new(ident.bare(), DeclarationKind::Variable)
            .with_parent(procedure)
            .with_module(ctx.module.clone())
            .with_type("Variant", TypeSource::Implicit)
            .with_scope(ScopeLevel::Procedure)
            .with_accessibility(Accessibility::Implicit)
            .with_selection(ident.range)
            .implicit();
        let id = self.builder.add_declaration(declaration);
        if let Some(added) = self.builder.declaration(id) {
            self.table.push(added.clone());
        }
        self.children.entry(procedure).or_default().push(id);
        debug!(module = %ctx.module, name = %ident.bare(), "implicit variable declared");
        id
    }

    /// Record the outcome of a lookup and return what the name denotes.
    fn bind(&mut self, ctx: &Ctx<'_>, ident: &Ident, lookup: Lookup, usage: Use, implicit_ok: bool) -> Target {
        match lookup {
            Lookup::Found(id) => {
                self.reference(ctx, ident, id, usage);
                self.target_of(id)
            }
            Lookup::Ambiguous {
                chosen: Some(id),
                candidates,
            } => {
                self.reference(ctx, ident, id, usage);
                self.unbound(
                    ctx,
                    ident,
                    UnboundReason::Ambiguous {
                        chosen: Some(id),
                        candidates,
                    },
                );
                self.target_of(id)
            }
            Lookup::Ambiguous {
                chosen: None,
                candidates,
            } => {
                self.unbound(
                    ctx,
                    ident,
                    UnboundReason::Ambiguous {
                        chosen: None,
                        candidates,
                    },
                );
                Target::LateBound
            }
            Lookup::Missing => {
                if implicit_ok && usage != Use::Call && !ctx.explicit {
                    if let Some(procedure) = ctx.procedure {
                        let id = self.declare_implicit(ctx, procedure, ident);
                        self.reference(ctx, ident, id, usage);
                        return Target::LateBound;
                    }
                }
                let failed = self
                    .libraries
                    .by_project
                    .get(ctx.project)
                    .map(|p| p.failed.clone())
                    .unwrap_or_default();
                let reason = if failed.is_empty() {
                    UnboundReason::NotFound
                } else {
                    UnboundReason::LibraryUnavailable { libraries: failed }
                };
                self.unbound(ctx, ident, reason);
                Target::LateBound
            }
        }
    }

    // ------------------------------------------------------------------------
    // Walking
    // ------------------------------------------------------------------------

    fn unit(&mut self, index: usize, unit: &Unit) {
        let ids = self.unit_ids[index].clone();
        let declarations = &unit.declarations;
        let mut ctx = Ctx {
            module: &unit.id,
            module_decl: ids[0],
            project: &unit.id.project,
            procedure: None,
            explicit: declarations.has_option("Explicit"),
            with_targets: Vec::new(),
        };

        for clause in &unit.tree.implements {
            self.type_ref(&mut ctx, &clause.interface);
        }

        let mut procedures = declarations.procedures.iter();
        for item in &unit.tree.items {
            match item {
                ModuleItem::Variables { declarators, .. } => {
                    for declarator in declarators {
                        self.declarator(&mut ctx, declarator);
                    }
                }
                ModuleItem::Constants { constants, .. } => {
                    for constant in constants {
                        self.constant(&mut ctx, constant);
                    }
                }
                ModuleItem::Type { members, .. } => {
                    for member in members {
                        self.declarator(&mut ctx, member);
                    }
                }
                ModuleItem::Enum { members, .. } => {
                    for member in members {
                        if let Some(value) = &member.value {
                            self.expr(&mut ctx, value, Use::Value);
                        }
                    }
                }
                ModuleItem::Event { params, .. } => self.parameters(&mut ctx, params),
                ModuleItem::Declare(external) => {
                    self.parameters(&mut ctx, &external.params);
                    if let Some(ty) = &external.return_type {
                        self.type_ref(&mut ctx, ty);
                    }
                }
                ModuleItem::Procedure(procedure) => {
                    let Some(seed) = procedures.next() else {
                        continue;
                    };
                    ctx.procedure = Some(ids[*seed]);
                    self.parameters(&mut ctx, &procedure.params);
                    if let Some(ty) = &procedure.return_type {
                        self.type_ref(&mut ctx, ty);
                    }
                    self.block(&mut ctx, &procedure.body);
                    ctx.procedure = None;
                }
            }
        }
        debug!(module = %unit.id, version = %unit.version, "module resolved");
    }

    fn declarator(&mut self, ctx: &mut Ctx<'_>, declarator: &Declarator) {
        for bound in &declarator.bounds {
            self.expr(ctx, bound, Use::Value);
        }
        if let Some(ty) = &declarator.as_type {
            self.type_ref(ctx, ty);
        }
    }

    fn constant(&mut self, ctx: &mut Ctx<'_>, constant: &ConstDeclarator) {
        if let Some(ty) = &constant.as_type {
            self.type_ref(ctx, ty);
        }
        self.expr(ctx, &constant.value, Use::Value);
    }

    fn parameters(&mut self, ctx: &mut Ctx<'_>, params: &[Parameter]) {
        for param in params {
            if let Some(ty) = &param.as_type {
                self.type_ref(ctx, ty);
            }
            if let Some(default) = &param.default {
                self.expr(ctx, default, Use::Value);
            }
        }
    }

    fn type_ref(&mut self, ctx: &mut Ctx<'_>, ty: &TypeRef) -> Target {
        if let Some(length) = &ty.fixed_length {
            self.expr(ctx, length, Use::Value);
        }
        if ty.intrinsic {
            return match ty.name().to_ascii_lowercase().as_str() {
                "variant" | "object" | "any" => Target::LateBound,
                _ => Target::Opaque,
            };
        }
        let Some((first, rest)) = ty.path.split_first() else {
            return Target::LateBound;
        };
        if rest.is_empty() {
            let lookup = self.lookup_type(ctx.module, first.bare());
            return self.bind(ctx, first, lookup, Use::Value, false);
        }
        let lookup = self.lookup_name(ctx, first, Use::Value);
        let mut target = self.bind(ctx, first, lookup, Use::Value, false);
        for part in rest {
            target = self.member(ctx, target, part, Use::Value);
        }
        target
    }

    fn label(&mut self, ctx: &Ctx<'_>, label: &Ident) {
        let Some(procedure) = ctx.procedure else {
            return;
        };
        let labels: Vec<DeclarationId> = self
            .children_named(procedure, label.bare())
            .into_iter()
            .filter(|id| self.decl(*id).kind == DeclarationKind::LineLabel)
            .collect();
        let lookup = match labels.first() {
            Some(id) => Lookup::Found(*id),
            None => Lookup::Missing,
        };
        self.bind(ctx, label, lookup, Use::Value, false);
    }

    fn block(&mut self, ctx: &mut Ctx<'_>, body: &[Statement]) {
        for statement in body {
            self.statement(ctx, statement);
        }
    }

    fn statement(&mut self, ctx: &mut Ctx<'_>, statement: &Statement) {
        match statement {
            Statement::Dim { declarators, .. } => {
                for declarator in declarators {
                    self.declarator(ctx, declarator);
                }
            }
            Statement::Const { constants, .. } => {
                for constant in constants {
                    self.constant(ctx, constant);
                }
            }
            Statement::Assign {
                kind, target, value, ..
            } => {
                self.expr(ctx, value, Use::Value);
                let set = *kind == AssignKind::Set;
                self.expr(ctx, target, Use::Assign { set });
            }
            Statement::Call { callee, args, .. } => {
                self.expr(ctx, callee, Use::Call);
                self.args(ctx, args);
            }
            Statement::If {
                arms, else_body, ..
            } => {
                for arm in arms {
                    self.expr(ctx, &arm.condition, Use::Value);
                    self.block(ctx, &arm.body);
                }
                self.block(ctx, else_body);
            }
            Statement::For {
                counter,
                start,
                end,
                step,
                body,
                ..
            } => {
                self.expr(ctx, counter, Use::Assign { set: false });
                self.expr(ctx, start, Use::Value);
                self.expr(ctx, end, Use::Value);
                if let Some(step) = step {
                    self.expr(ctx, step, Use::Value);
                }
                self.block(ctx, body);
            }
            Statement::ForEach {
                element,
                collection,
                body,
                ..
            } => {
                self.expr(ctx, element, Use::Assign { set: false });
                self.expr(ctx, collection, Use::Value);
                self.block(ctx, body);
            }
            Statement::Do {
                condition, body, ..
            } => {
                if let Some(condition) = condition {
                    self.expr(ctx, condition, Use::Value);
                }
                self.block(ctx, body);
            }
            Statement::While {
                condition, body, ..
            } => {
                self.expr(ctx, condition, Use::Value);
                self.block(ctx, body);
            }
            Statement::With { object, body, .. } => {
                let target = self.expr(ctx, object, Use::Value);
                ctx.with_targets.push(target);
                self.block(ctx, body);
                ctx.with_targets.pop();
            }
            Statement::Select { subject, cases, .. } => {
                self.expr(ctx, subject, Use::Value);
                for case in cases {
                    for test in &case.tests {
                        self.expr(ctx, test, Use::Value);
                    }
                    self.block(ctx, &case.body);
                }
            }
            Statement::GoTo { label, .. } => self.label(ctx, label),
            Statement::OnError {
                label: Some(label), ..
            }
            | Statement::Resume {
                label: Some(label), ..
            } => self.label(ctx, label),
            Statement::ReDim { targets, .. } => {
                for target in targets {
                    for bound in &target.bounds {
                        self.expr(ctx, bound, Use::Value);
                    }
                    if let Some(ty) = &target.as_type {
                        self.type_ref(ctx, ty);
                    }
                    self.expr(ctx, &target.target, Use::Assign { set: false });
                }
            }
            Statement::Erase { targets, .. } => {
                for target in targets {
                    self.expr(ctx, target, Use::Value);
                }
            }
            Statement::RaiseEvent { name, args, .. } => {
                let events: Vec<DeclarationId> = self
                    .children_named(ctx.module_decl, name.bare())
                    .into_iter()
                    .filter(|id| self.decl(*id).kind == DeclarationKind::Event)
                    .collect();
                let lookup = match events.first() {
                    Some(id) => Lookup::Found(*id),
                    None => Lookup::Missing,
                };
                self.bind(ctx, name, lookup, Use::Call, false);
                self.args(ctx, args);
            }
            Statement::OnError { label: None, .. }
            | Statement::Resume { label: None, .. }
            | Statement::Label { .. }
            | Statement::Exit { .. }
            | Statement::Control { .. } => {}
        }
    }

    fn args(&mut self, ctx: &mut Ctx<'_>, args: &[Arg]) {
        for arg in args {
            self.expr(ctx, &arg.value, Use::Value);
        }
    }

    fn member(&mut self, ctx: &mut Ctx<'_>, target: Target, member: &Ident, usage: Use) -> Target {
        if target == Target::LateBound {
            self.unbound(ctx, member, UnboundReason::LateBound);
            return Target::LateBound;
        }
        let lookup = self.lookup_member(ctx, target, member, usage);
        if lookup == Lookup::Missing {
            self.unbound(ctx, member, UnboundReason::NotFound);
            return Target::LateBound;
        }
        self.bind(ctx, member, lookup, usage, false)
    }

    fn expr(&mut self, ctx: &mut Ctx<'_>, expr: &Expr, usage: Use) -> Target {
        match expr {
            Expr::Name(ident) => {
                let lookup = self.lookup_name(ctx, ident, usage);
                self.bind(ctx, ident, lookup, usage, true)
            }
            Expr::Member { object, member, .. } => {
                let target = self.expr(ctx, object, Use::Value);
                self.member(ctx, target, member, usage)
            }
            Expr::WithMember { member, .. } => {
                let target = ctx.with_targets.last().copied().unwrap_or(Target::LateBound);
                self.member(ctx, target, member, usage)
            }
            Expr::Bang { object, .. } => {
                self.expr(ctx, object, Use::Value);
                Target::LateBound
            }
            Expr::Call { callee, args, .. } => {
                let target = self.expr(ctx, callee, usage);
                self.args(ctx, args);
                target
            }
            Expr::Literal { .. } => Target::Opaque,
            Expr::Me { .. } => Target::Members(ctx.module_decl),
            Expr::New { ty, .. } => self.type_ref(ctx, ty),
            Expr::TypeOf { value, ty, .. } => {
                self.expr(ctx, value, Use::Value);
                self.type_ref(ctx, ty);
                Target::Opaque
            }
            Expr::Unary { op, operand, .. } => {
                let usage = if op.eq_ignore_ascii_case("AddressOf") {
                    Use::Call
                } else {
                    Use::Value
                };
                self.expr(ctx, operand, usage);
                Target::Opaque
            }
            Expr::Binary { left, right, .. } => {
                self.expr(ctx, left, Use::Value);
                self.expr(ctx, right, Use::Value);
                Target::Opaque
            }
            Expr::Paren { inner, .. } => self.expr(ctx, inner, Use::Value),
        }
    }
}
