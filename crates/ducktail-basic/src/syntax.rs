//! Syntax tree for VBA modules.
//!
//! Every node carries the [`TokenRange`] it was parsed from, so declarations
//! and references can be turned into edit targets without re-lexing.

use ducktail_core::facts::Accessibility;
use ducktail_core::types::{Token, TokenRange};

use crate::lexer::split_hint;

// ============================================================================
// Names and Types
// ============================================================================

/// An identifier as written, including any type-hint suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub range: TokenRange,
}

impl Ident {
    /// Name without the type-hint suffix (and without `[...]` brackets).
    pub fn bare(&self) -> &str {
        let (bare, _) = split_hint(&self.name);
        bare.trim_start_matches('[').trim_end_matches(']')
    }

    /// The type-hint suffix, if any.
    pub fn hint(&self) -> Option<char> {
        if self.name.starts_with('[') {
            return None;
        }
        split_hint(&self.name).1
    }
}

/// A type name after `As`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    /// Dotted path (`Scripting.Dictionary`), one element for simple names.
    pub path: Vec<Ident>,
    /// Built-in value type keyword (`Long`, `String`).
    pub intrinsic: bool,
    /// Length of a fixed-length string (`String * 20`).
    pub fixed_length: Option<Box<Expr>>,
    pub range: TokenRange,
}

impl TypeRef {
    /// Dotted name as written.
    pub fn name(&self) -> String {
        self.path
            .iter()
            .map(|p| p.bare())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// `'@Name args` comment annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub name: String,
    pub args: Vec<String>,
    /// The comment token.
    pub range: TokenRange,
}

// ============================================================================
// Module Level
// ============================================================================

/// `Attribute VB_Name = "Module1"` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleAttribute {
    pub name: String,
    pub value: String,
}

/// `Option Explicit`, `Option Private Module`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionStatement {
    /// Words after `Option`, single-space separated.
    pub text: String,
    pub range: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplementsClause {
    pub interface: TypeRef,
    pub range: TokenRange,
}

/// One name in a `Dim`/`Public`/`Static` statement or a `Type` member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declarator {
    pub name: Ident,
    pub is_array: bool,
    /// Array bound expressions (`1 To 10` contributes both ends).
    pub bounds: Vec<Expr>,
    pub as_type: Option<TypeRef>,
    /// `As New Foo`.
    pub is_new: bool,
    pub with_events: bool,
    pub range: TokenRange,
}

/// One name in a `Const` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstDeclarator {
    pub name: Ident,
    pub as_type: Option<TypeRef>,
    pub value: Expr,
    pub range: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: Ident,
    pub value: Option<Expr>,
    pub range: TokenRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureKind {
    Sub,
    Function,
    PropertyGet,
    PropertyLet,
    PropertySet,
}

impl ProcedureKind {
    /// Kinds that produce a value.
    pub fn returns_value(&self) -> bool {
        matches!(self, ProcedureKind::Function | ProcedureKind::PropertyGet)
    }

    /// Keywords that open the procedure (`Property Get`).
    pub fn keyword(&self) -> &'static str {
        match self {
            ProcedureKind::Sub => "Sub",
            ProcedureKind::Function => "Function",
            ProcedureKind::PropertyGet => "Property Get",
            ProcedureKind::PropertyLet => "Property Let",
            ProcedureKind::PropertySet => "Property Set",
        }
    }

    /// Keyword that closes the procedure (`End Property`).
    pub fn end_keyword(&self) -> &'static str {
        match self {
            ProcedureKind::Sub => "End Sub",
            ProcedureKind::Function => "End Function",
            _ => "End Property",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: Ident,
    pub by_val: bool,
    pub optional: bool,
    pub param_array: bool,
    pub is_array: bool,
    pub as_type: Option<TypeRef>,
    pub default: Option<Expr>,
    pub range: TokenRange,
}

/// A `Sub`, `Function` or `Property` procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub kind: ProcedureKind,
    pub accessibility: Accessibility,
    pub is_static: bool,
    pub name: Ident,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeRef>,
    pub body: Vec<Statement>,
    /// Signature line through the closing `End ...`.
    pub range: TokenRange,
    /// Signature line only (modifiers through return type).
    pub signature: TokenRange,
    pub annotations: Vec<Annotation>,
}

/// A `Declare Sub|Function` external procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProcedure {
    pub accessibility: Accessibility,
    pub is_function: bool,
    pub name: Ident,
    pub library: String,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeRef>,
    pub range: TokenRange,
}

/// Something declared at module level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleItem {
    Variables {
        accessibility: Accessibility,
        declarators: Vec<Declarator>,
        range: TokenRange,
        annotations: Vec<Annotation>,
    },
    Constants {
        accessibility: Accessibility,
        constants: Vec<ConstDeclarator>,
        range: TokenRange,
        annotations: Vec<Annotation>,
    },
    Type {
        accessibility: Accessibility,
        name: Ident,
        members: Vec<Declarator>,
        range: TokenRange,
    },
    Enum {
        accessibility: Accessibility,
        name: Ident,
        members: Vec<EnumMember>,
        range: TokenRange,
    },
    Event {
        accessibility: Accessibility,
        name: Ident,
        params: Vec<Parameter>,
        range: TokenRange,
    },
    Declare(ExternalProcedure),
    Procedure(Procedure),
}

impl ModuleItem {
    pub fn range(&self) -> TokenRange {
        match self {
            ModuleItem::Variables { range, .. }
            | ModuleItem::Constants { range, .. }
            | ModuleItem::Type { range, .. }
            | ModuleItem::Enum { range, .. }
            | ModuleItem::Event { range, .. } => *range,
            ModuleItem::Declare(external) => external.range,
            ModuleItem::Procedure(procedure) => procedure.range,
        }
    }
}

/// A parsed module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleTree {
    pub tokens: Vec<Token>,
    pub attributes: Vec<ModuleAttribute>,
    pub options: Vec<OptionStatement>,
    pub implements: Vec<ImplementsClause>,
    /// Module-level annotations (`@TestModule`, `@Folder`).
    pub annotations: Vec<Annotation>,
    pub items: Vec<ModuleItem>,
    /// Byte offset after the export header and attribute lines.
    pub body_start: u64,
    /// Byte offset of the line after the last `Option` statement.
    pub options_end: u64,
    /// Byte offset just past the last module-level declaration.
    pub declarations_end: u64,
}

impl ModuleTree {
    pub fn has_option(&self, text: &str) -> bool {
        self.options.iter().any(|o| o.text.eq_ignore_ascii_case(text))
    }

    pub fn procedures(&self) -> impl Iterator<Item = &Procedure> {
        self.items.iter().filter_map(|item| match item {
            ModuleItem::Procedure(procedure) => Some(procedure),
            _ => None,
        })
    }

    /// Value of a header attribute (`VB_PredeclaredId`), quotes stripped.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.trim_matches('"'))
    }
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignKind {
    /// `x = 1`
    Implicit,
    /// `Let x = 1`
    Let,
    /// `Set x = obj`
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalBlock {
    pub condition: Expr,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseClause {
    /// Empty for `Case Else`.
    pub tests: Vec<Expr>,
    pub body: Vec<Statement>,
}

/// `ReDim [Preserve] arr(1 To n) [As T]` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReDimTarget {
    pub target: Expr,
    pub bounds: Vec<Expr>,
    pub as_type: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `Dim` or `Static` locals.
    Dim {
        is_static: bool,
        declarators: Vec<Declarator>,
        range: TokenRange,
    },
    Const {
        constants: Vec<ConstDeclarator>,
        range: TokenRange,
    },
    Assign {
        kind: AssignKind,
        target: Expr,
        value: Expr,
        range: TokenRange,
    },
    /// A call statement; `explicit` when written with `Call`.
    Call {
        callee: Expr,
        args: Vec<Arg>,
        explicit: bool,
        range: TokenRange,
    },
    If {
        /// `If` arm followed by the `ElseIf` arms.
        arms: Vec<ConditionalBlock>,
        else_body: Vec<Statement>,
        range: TokenRange,
    },
    For {
        counter: Expr,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Vec<Statement>,
        range: TokenRange,
    },
    ForEach {
        element: Expr,
        collection: Expr,
        body: Vec<Statement>,
        range: TokenRange,
    },
    Do {
        condition: Option<Expr>,
        body: Vec<Statement>,
        range: TokenRange,
    },
    While {
        condition: Expr,
        body: Vec<Statement>,
        range: TokenRange,
    },
    With {
        object: Expr,
        body: Vec<Statement>,
        range: TokenRange,
    },
    Select {
        subject: Expr,
        cases: Vec<CaseClause>,
        range: TokenRange,
    },
    Exit {
        range: TokenRange,
    },
    GoTo {
        label: Ident,
        range: TokenRange,
    },
    Label {
        name: Ident,
        range: TokenRange,
    },
    OnError {
        label: Option<Ident>,
        range: TokenRange,
    },
    Resume {
        label: Option<Ident>,
        range: TokenRange,
    },
    ReDim {
        preserve: bool,
        targets: Vec<ReDimTarget>,
        range: TokenRange,
    },
    Erase {
        targets: Vec<Expr>,
        range: TokenRange,
    },
    RaiseEvent {
        name: Ident,
        args: Vec<Arg>,
        range: TokenRange,
    },
    /// `Stop`, `End`, `Return`.
    Control {
        keyword: String,
        range: TokenRange,
    },
}

impl Statement {
    pub fn range(&self) -> TokenRange {
        match self {
            Statement::Dim { range, .. }
            | Statement::Const { range, .. }
            | Statement::Assign { range, .. }
            | Statement::Call { range, .. }
            | Statement::If { range, .. }
            | Statement::For { range, .. }
            | Statement::ForEach { range, .. }
            | Statement::Do { range, .. }
            | Statement::While { range, .. }
            | Statement::With { range, .. }
            | Statement::Select { range, .. }
            | Statement::Exit { range }
            | Statement::GoTo { range, .. }
            | Statement::Label { range, .. }
            | Statement::OnError { range, .. }
            | Statement::Resume { range, .. }
            | Statement::ReDim { range, .. }
            | Statement::Erase { range, .. }
            | Statement::RaiseEvent { range, .. }
            | Statement::Control { range, .. } => *range,
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Call argument; `name` is set for `name:=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub name: Option<Ident>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Name(Ident),
    /// `object.member`
    Member {
        object: Box<Expr>,
        member: Ident,
        range: TokenRange,
    },
    /// `.member` inside a `With` block.
    WithMember {
        member: Ident,
        range: TokenRange,
    },
    /// `object!key`
    Bang {
        object: Box<Expr>,
        key: Ident,
        range: TokenRange,
    },
    /// Call or index: `f(a, b)`.
    Call {
        callee: Box<Expr>,
        args: Vec<Arg>,
        range: TokenRange,
    },
    Literal {
        range: TokenRange,
    },
    Me {
        range: TokenRange,
    },
    New {
        ty: TypeRef,
        range: TokenRange,
    },
    TypeOf {
        value: Box<Expr>,
        ty: TypeRef,
        range: TokenRange,
    },
    Unary {
        op: String,
        operand: Box<Expr>,
        range: TokenRange,
    },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
        range: TokenRange,
    },
    Paren {
        inner: Box<Expr>,
        range: TokenRange,
    },
}

impl Expr {
    pub fn range(&self) -> TokenRange {
        match self {
            Expr::Name(ident) => ident.range,
            Expr::Member { range, .. }
            | Expr::WithMember { range, .. }
            | Expr::Bang { range, .. }
            | Expr::Call { range, .. }
            | Expr::Literal { range }
            | Expr::Me { range }
            | Expr::New { range, .. }
            | Expr::TypeOf { range, .. }
            | Expr::Unary { range, .. }
            | Expr::Binary { range, .. }
            | Expr::Paren { range, .. } => *range,
        }
    }
}
