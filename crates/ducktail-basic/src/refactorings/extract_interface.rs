//! Extract-interface refactoring.
//!
//! Given the module under the caret, this:
//!
//! 1. Checks the parser is Ready and the module is current, extractable and
//!    not already implementing anything
//! 2. Builds an [`InterfaceModel`] from the module's public members
//! 3. In one session, adds class `I<Module>` holding empty member stubs,
//!    inserts `Implements I<Module>` after the module's `Option` lines and
//!    appends `Private` implementations that delegate to the public members
//!
//! Members whose names contain an underscore are skipped; the host cannot
//! implement them through an interface.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use ducktail_core::adapter::LanguageAdapter;
use ducktail_core::facts::{Declaration, DeclarationKind, Snapshot};
use ducktail_core::interaction::SelectionService;
use ducktail_core::session::{CommitOutcome, RewriteSession, RewritingManager};
use ducktail_core::state::{ParseCoordinator, ParserState};
use ducktail_core::text::newline_of;
use ducktail_core::types::{ModuleId, ModuleKind, QualifiedSelection, TokenRange, Version};

use super::RefactorError;

/// Types that are assigned without `Set`.
const VALUE_TYPES: &[&str] = &[
    "Boolean", "Byte", "Currency", "Date", "Decimal", "Double", "Integer", "Long", "LongLong",
    "LongPtr", "Single", "String", "Variant",
];

// ============================================================================
// Model
// ============================================================================

/// One parameter of an extracted member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceParameter {
    pub name: String,
    pub type_name: Option<String>,
    pub by_val: bool,
    pub optional: bool,
    pub param_array: bool,
    pub is_array: bool,
}

impl InterfaceParameter {
    fn from_declaration(declaration: &Declaration) -> Self {
        InterfaceParameter {
            name: declaration.name.clone(),
            type_name: declaration.type_name.clone(),
            by_val: declaration.modifiers.by_val,
            optional: declaration.modifiers.optional,
            param_array: declaration.modifiers.param_array,
            is_array: declaration.modifiers.is_array,
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if self.param_array {
            out.push_str("ParamArray ");
        } else {
            if self.optional {
                out.push_str("Optional ");
            }
            out.push_str(if self.by_val { "ByVal " } else { "ByRef " });
        }
        out.push_str(&self.name);
        if self.is_array || self.param_array {
            out.push_str("()");
        }
        if let Some(type_name) = &self.type_name {
            out.push_str(" As ");
            out.push_str(type_name);
        }
        out
    }
}

/// One public member carried over to the interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceMember {
    pub name: String,
    pub kind: DeclarationKind,
    pub parameters: Vec<InterfaceParameter>,
    /// Return type for functions and property getters.
    pub return_type: Option<String>,
    /// The return value is an object reference and needs `Set`.
    pub returns_object: bool,
}

impl InterfaceMember {
    fn from_declaration(snapshot: &Snapshot, declaration: &Declaration) -> Self {
        let parameters = snapshot
            .children_of(declaration.id)
            .into_iter()
            .filter(|d| d.kind == DeclarationKind::Parameter)
            .map(InterfaceParameter::from_declaration)
            .collect();
        let return_type = match declaration.kind {
            DeclarationKind::Function | DeclarationKind::PropertyGet => {
                declaration.type_name.clone()
            }
            _ => None,
        };
        let returns_object = return_type
            .as_deref()
            .is_some_and(|t| is_object_type(snapshot, t));
        InterfaceMember {
            name: declaration.name.clone(),
            kind: declaration.kind,
            parameters,
            return_type,
            returns_object,
        }
    }

    fn keywords(&self) -> (&'static str, &'static str) {
        match self.kind {
            DeclarationKind::Function => ("Function", "End Function"),
            DeclarationKind::PropertyGet => ("Property Get", "End Property"),
            DeclarationKind::PropertyLet => ("Property Let", "End Property"),
            DeclarationKind::PropertySet => ("Property Set", "End Property"),
            _ => ("Sub", "End Sub"),
        }
    }

    /// `Property Get Name(...) As T`, with `prefix` before the name.
    fn signature(&self, prefix: &str) -> String {
        let (keyword, _) = self.keywords();
        let params: Vec<String> = self.parameters.iter().map(InterfaceParameter::render).collect();
        let mut out = format!("{} {}{}({})", keyword, prefix, self.name, params.join(", "));
        if let Some(return_type) = &self.return_type {
            out.push_str(" As ");
            out.push_str(return_type);
        }
        out
    }

    fn stub(&self, nl: &str) -> String {
        let (_, end) = self.keywords();
        format!("{nl}Public {}{nl}{}{nl}", self.signature(""), end)
    }

    /// A `Private` member that forwards to the public one.
    fn delegate(&self, interface: &str, nl: &str) -> String {
        let (_, end) = self.keywords();
        let prefix = format!("{}_", interface);
        let names: Vec<&str> = self.parameters.iter().map(|p| p.name.as_str()).collect();
        let call_with = |args: &[&str]| {
            if args.is_empty() {
                self.name.clone()
            } else {
                format!("{}({})", self.name, args.join(", "))
            }
        };
        let body = match self.kind {
            DeclarationKind::Procedure if names.is_empty() => self.name.clone(),
            DeclarationKind::Procedure => format!("{} {}", self.name, names.join(", ")),
            DeclarationKind::Function | DeclarationKind::PropertyGet => {
                let call = if self.kind == DeclarationKind::Function && names.is_empty() {
                    format!("{}()", self.name)
                } else {
                    call_with(names.as_slice())
                };
                let set = if self.returns_object { "Set " } else { "" };
                format!("{set}{prefix}{} = {call}", self.name)
            }
            DeclarationKind::PropertyLet | DeclarationKind::PropertySet => {
                let (value, index) = names.split_last().map_or(("", &[][..]), |(v, i)| (*v, i));
                let set = if self.kind == DeclarationKind::PropertySet { "Set " } else { "" };
                format!("{set}{} = {value}", call_with(index))
            }
            _ => self.name.clone(),
        };
        format!(
            "{nl}Private {}{nl}    {}{nl}{}{nl}",
            self.signature(&prefix),
            body,
            end
        )
    }
}

/// Everything [`ExtractInterface::apply`] will do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceModel {
    /// Module the interface is extracted from.
    pub source: ModuleId,
    pub source_version: Version,
    /// Class module to create.
    pub interface: ModuleId,
    pub members: Vec<InterfaceMember>,
    /// Byte offset the `Implements` line goes in front of.
    pub implements_at: u64,
    #[serde(skip)]
    newline: &'static str,
}

impl InterfaceModel {
    /// Full text of the new class module.
    pub fn interface_text(&self) -> String {
        let nl = self.newline;
        let mut text = format!(
            "VERSION 1.0 CLASS{nl}BEGIN{nl}  MultiUse = -1  'True{nl}END{nl}\
             Attribute VB_Name = \"{}\"{nl}Attribute VB_Exposed = False{nl}Option Explicit{nl}",
            self.interface.name
        );
        for member in &self.members {
            text.push_str(&member.stub(nl));
        }
        text
    }

    /// Text appended to the source module.
    pub fn implementation_text(&self) -> String {
        self.members
            .iter()
            .map(|m| m.delegate(&self.interface.name, self.newline))
            .collect()
    }

    /// Record every edit in `session` without committing.
    pub fn stage(&self, session: &mut RewriteSession<'_>) -> Result<(), RefactorError> {
        session.add_module(self.interface.clone(), ModuleKind::Class, self.interface_text())?;
        let rewriter = session.check_out(&self.source)?;
        let at = QualifiedSelection::new(
            self.source.clone(),
            self.source_version,
            TokenRange::empty_at(0, self.implements_at),
        );
        rewriter.insert_before(
            &at,
            &format!("Implements {}{}", self.interface.name, self.newline),
        )?;
        let mut tail = String::new();
        if !rewriter.base_text().is_empty() && !rewriter.base_text().ends_with('\n') {
            tail.push_str(self.newline);
        }
        tail.push_str(&self.implementation_text());
        rewriter.append(&tail);
        Ok(())
    }
}

// ============================================================================
// Refactoring
// ============================================================================

/// Extracts an interface from the module under the active selection.
pub struct ExtractInterface<'a, A: LanguageAdapter> {
    coordinator: &'a ParseCoordinator<A>,
    selection: &'a dyn SelectionService,
}

impl<'a, A: LanguageAdapter> ExtractInterface<'a, A> {
    pub fn new(coordinator: &'a ParseCoordinator<A>, selection: &'a dyn SelectionService) -> Self {
        ExtractInterface {
            coordinator,
            selection,
        }
    }

    /// Whether [`plan`](Self::plan) would succeed right now.
    pub fn can_execute(&self) -> bool {
        self.target().is_ok()
    }

    /// Build the model for the selected module.
    pub fn plan(&self) -> Result<InterfaceModel, RefactorError> {
        let (snapshot, module) = self.target()?;
        let name = format!("I{}", module.name);
        if self.coordinator.store().find(&module.project, &name).is_some() {
            return Err(RefactorError::NameConflict { name });
        }
        let facts = snapshot
            .module_facts(&module)
            .ok_or_else(|| RefactorError::Modified {
                module: module.clone(),
            })?;
        let members = extractable_members(&snapshot, &module)
            .into_iter()
            .map(|d| InterfaceMember::from_declaration(&snapshot, d))
            .collect();
        Ok(InterfaceModel {
            interface: ModuleId::new(module.project.clone(), name),
            source_version: facts.version,
            implements_at: facts.options_end,
            newline: newline_of(&facts.text),
            source: module,
            members,
        })
    }

    /// Stage `model` in one session and commit it.
    pub fn apply(
        &self,
        model: &InterfaceModel,
        manager: &RewritingManager,
    ) -> Result<CommitOutcome, RefactorError> {
        let mut session = manager.open_session();
        if let Err(e) = model.stage(&mut session) {
            session.rollback();
            return Err(e);
        }
        let outcome = session.commit()?;
        info!(
            module = %model.source,
            interface = %model.interface,
            members = model.members.len(),
            "interface extracted"
        );
        Ok(outcome)
    }

    fn target(&self) -> Result<(Arc<Snapshot>, ModuleId), RefactorError> {
        let view = self.coordinator.current_snapshot();
        if view.state != ParserState::Ready {
            return Err(RefactorError::NotReady { state: view.state });
        }
        let module = self
            .selection
            .active_selection()
            .ok_or(RefactorError::NoSelection)?
            .module;
        let snapshot = view.snapshot;

        let Some(facts) = snapshot.module_facts(&module) else {
            return Err(RefactorError::Modified { module });
        };
        if !matches!(
            facts.kind,
            ModuleKind::Class | ModuleKind::UserForm | ModuleKind::Standard
        ) {
            return Err(RefactorError::UnsupportedModule {
                kind: facts.kind,
                module,
            });
        }
        if let Some(interface) = facts.implements.first() {
            return Err(RefactorError::AlreadyImplements {
                interface: interface.clone(),
                module,
            });
        }
        if self.coordinator.modified_modules().contains(&module) {
            return Err(RefactorError::Modified { module });
        }
        if extractable_members(&snapshot, &module).is_empty() {
            return Err(RefactorError::NoPublicMembers { module });
        }
        Ok((snapshot, module))
    }
}

fn extractable_members<'s>(snapshot: &'s Snapshot, module: &ModuleId) -> Vec<&'s Declaration> {
    let Some(module) = snapshot.module_declaration(module) else {
        return Vec::new();
    };
    snapshot
        .children_of(module.id)
        .into_iter()
        .filter(|d| d.kind.is_member() && d.accessibility.is_public() && !d.name.contains('_'))
        .collect()
}

fn is_object_type(snapshot: &Snapshot, type_name: &str) -> bool {
    if VALUE_TYPES.iter().any(|t| t.eq_ignore_ascii_case(type_name)) {
        return false;
    }
    !snapshot.user_declarations().any(|d| {
        matches!(
            d.kind,
            DeclarationKind::Enumeration | DeclarationKind::UserDefinedType
        ) && d.name_is(type_name)
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{module_id, Fixture};
    use ducktail_core::interaction::{ActiveSelection, FixedSelection};

    const WIDGET: &str = "VERSION 1.0 CLASS\nBEGIN\n  MultiUse = -1  'True\nEND\n\
        Attribute VB_Name = \"Widget\"\nOption Explicit\nPrivate mName As String\n\
        Public Property Get Name() As String\n    Name = mName\nEnd Property\n\
        Public Property Let Name(ByVal value As String)\n    mName = value\nEnd Property\n\
        Public Sub Greet(ByVal who As String, Optional times As Long)\n    Debug.Print who\nEnd Sub\n\
        Public Function Items() As Collection\n    Set Items = New Collection\nEnd Function\n\
        Private Sub Helper()\nEnd Sub\n";

    fn caret(name: &str) -> FixedSelection {
        FixedSelection(Some(ActiveSelection {
            module: module_id(name),
            offset: 0,
        }))
    }

    mod plan_tests {
        use super::*;

        #[test]
        fn public_members_become_the_model() {
            let fixture = Fixture::new(&[("Widget", ModuleKind::Class, WIDGET)]);
            let selection = caret("Widget");
            let refactoring = ExtractInterface::new(&*fixture.coordinator, &selection);
            assert!(refactoring.can_execute());

            let model = refactoring.plan().unwrap();
            assert_eq!(model.interface, module_id("IWidget"));
            let members: Vec<(&str, DeclarationKind)> = model
                .members
                .iter()
                .map(|m| (m.name.as_str(), m.kind))
                .collect();
            assert_eq!(
                members,
                vec![
                    ("Name", DeclarationKind::PropertyGet),
                    ("Name", DeclarationKind::PropertyLet),
                    ("Greet", DeclarationKind::Procedure),
                    ("Items", DeclarationKind::Function),
                ]
            );
            assert!(model.members[3].returns_object);
            assert!(!model.members[0].returns_object);
        }

        #[test]
        fn refuses_unsuitable_targets() {
            let fixture = Fixture::new(&[
                ("Sheet1", ModuleKind::Document, "Option Explicit\nPublic Sub Go()\nEnd Sub\n"),
                ("Helpers", ModuleKind::Standard, "Option Explicit\nPrivate Sub Go()\nEnd Sub\n"),
                (
                    "Impl",
                    ModuleKind::Class,
                    "Option Explicit\nImplements Helpers\nPublic Sub Go()\nEnd Sub\n",
                ),
            ]);

            let none = FixedSelection(None);
            let err = ExtractInterface::new(&*fixture.coordinator, &none)
                .plan()
                .unwrap_err();
            assert_eq!(err, RefactorError::NoSelection);

            let sheet = caret("Sheet1");
            let err = ExtractInterface::new(&*fixture.coordinator, &sheet)
                .plan()
                .unwrap_err();
            assert!(matches!(err, RefactorError::UnsupportedModule { .. }));

            let helpers = caret("Helpers");
            let err = ExtractInterface::new(&*fixture.coordinator, &helpers)
                .plan()
                .unwrap_err();
            assert!(matches!(err, RefactorError::NoPublicMembers { .. }));

            let implementing = caret("Impl");
            let refactoring = ExtractInterface::new(&*fixture.coordinator, &implementing);
            assert!(!refactoring.can_execute());
            assert!(matches!(
                refactoring.plan().unwrap_err(),
                RefactorError::AlreadyImplements { .. }
            ));
        }

        #[test]
        fn refuses_modified_modules() {
            let fixture = Fixture::new(&[("Widget", ModuleKind::Class, WIDGET)]);
            fixture
                .manager
                .store()
                .replace_text(&module_id("Widget"), &format!("{WIDGET}' edited\n"))
                .unwrap();
            let selection = caret("Widget");
            let err = ExtractInterface::new(&*fixture.coordinator, &selection)
                .plan()
                .unwrap_err();
            assert!(matches!(err, RefactorError::Modified { .. }));
        }

        #[test]
        fn refuses_taken_names() {
            let fixture = Fixture::new(&[
                ("Widget", ModuleKind::Class, WIDGET),
                ("IWidget", ModuleKind::Class, "Option Explicit\n"),
            ]);
            let selection = caret("Widget");
            let err = ExtractInterface::new(&*fixture.coordinator, &selection)
                .plan()
                .unwrap_err();
            assert_eq!(
                err,
                RefactorError::NameConflict {
                    name: "IWidget".to_string()
                }
            );
        }
    }

    mod apply_tests {
        use super::*;

        #[test]
        fn creates_interface_and_delegates() {
            let fixture = Fixture::new(&[("Widget", ModuleKind::Class, WIDGET)]);
            let selection = caret("Widget");
            let refactoring = ExtractInterface::new(&*fixture.coordinator, &selection);
            let model = refactoring.plan().unwrap();
            let outcome = refactoring.apply(&model, &fixture.manager).unwrap();
            assert_eq!(outcome.modules.len(), 2);

            assert_eq!(
                fixture.text("IWidget"),
                "VERSION 1.0 CLASS\nBEGIN\n  MultiUse = -1  'True\nEND\n\
                 Attribute VB_Name = \"IWidget\"\nAttribute VB_Exposed = False\nOption Explicit\n\
                 \nPublic Property Get Name() As String\nEnd Property\n\
                 \nPublic Property Let Name(ByVal value As String)\nEnd Property\n\
                 \nPublic Sub Greet(ByVal who As String, Optional ByRef times As Long)\nEnd Sub\n\
                 \nPublic Function Items() As Collection\nEnd Function\n"
            );

            let widget = fixture.text("Widget");
            assert!(widget.contains("Option Explicit\nImplements IWidget\nPrivate mName As String\n"));
            assert!(widget.ends_with(
                "End Sub\n\
                 \nPrivate Property Get IWidget_Name() As String\n    IWidget_Name = Name\nEnd Property\n\
                 \nPrivate Property Let IWidget_Name(ByVal value As String)\n    Name = value\nEnd Property\n\
                 \nPrivate Sub IWidget_Greet(ByVal who As String, Optional ByRef times As Long)\n    Greet who, times\nEnd Sub\n\
                 \nPrivate Function IWidget_Items() As Collection\n    Set IWidget_Items = Items()\nEnd Function\n"
            ));

            let snapshot = fixture.snapshot();
            assert_eq!(fixture.coordinator.state(), ParserState::Ready);
            let facts = snapshot.module_facts(&module_id("Widget")).unwrap();
            assert_eq!(facts.implements, vec!["IWidget".to_string()]);
            assert!(snapshot.module_facts(&module_id("IWidget")).is_some());
        }

        #[test]
        fn stale_model_commits_nothing() {
            let fixture = Fixture::new(&[("Widget", ModuleKind::Class, WIDGET)]);
            let selection = caret("Widget");
            let refactoring = ExtractInterface::new(&*fixture.coordinator, &selection);
            let model = refactoring.plan().unwrap();
            fixture
                .coordinator
                .on_text_changed(&module_id("Widget"), &format!("{WIDGET}' edited\n"))
                .unwrap();

            let err = refactoring.apply(&model, &fixture.manager).unwrap_err();
            assert!(matches!(err, RefactorError::Session(_)));
            assert!(fixture.text("IWidget").is_empty());
        }
    }
}
