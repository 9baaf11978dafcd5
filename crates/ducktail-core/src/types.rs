//! Common types shared across the store, snapshot, session and output modules.
//!
//! Identifiers here are deliberately small and cheap to clone: they are keys
//! into the module store, the parse cache and every snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::patch::Span;

// ============================================================================
// Module Identity
// ============================================================================

/// Stable identity of one source module inside a project.
///
/// Displays as `Project.Module`. Ordering is by project, then module name,
/// which gives every per-module iteration a deterministic order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    /// Owning project name.
    pub project: String,
    /// Module name, unique within the project.
    pub name: String,
}

impl ModuleId {
    /// Create a new module id.
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        ModuleId {
            project: project.into(),
            name: name.into(),
        }
    }

    /// Case-insensitive name comparison, matching how the language binds names.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project, self.name)
    }
}

/// What sort of component a module is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// A procedural (standard) module.
    Standard,
    /// A class module.
    Class,
    /// A host document module (always has a default instance).
    Document,
    /// A user form (always has a default instance).
    UserForm,
}

impl ModuleKind {
    /// Whether the module can be used by name as an object without `New`.
    pub fn has_default_instance(&self) -> bool {
        matches!(self, ModuleKind::Document | ModuleKind::UserForm)
    }

    /// Conventional export file extension for the kind.
    pub fn extension(&self) -> &'static str {
        match self {
            ModuleKind::Standard => "bas",
            ModuleKind::Class => "cls",
            ModuleKind::Document => "doccls",
            ModuleKind::UserForm => "frm",
        }
    }

    /// Map an export file extension back to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "bas" => Some(ModuleKind::Standard),
            "cls" => Some(ModuleKind::Class),
            "doccls" => Some(ModuleKind::Document),
            "frm" => Some(ModuleKind::UserForm),
            _ => None,
        }
    }
}

/// Monotonic per-module version stamp.
///
/// Starts at 1 when a module is added and advances by exactly one for every
/// text replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// The version assigned to a freshly added module.
    pub const INITIAL: Version = Version(1);

    /// The version that follows this one.
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// Language-agnostic token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Identifier,
    Keyword,
    NumberLiteral,
    StringLiteral,
    DateLiteral,
    Operator,
    Punctuation,
    Comment,
    Whitespace,
    Newline,
    LineContinuation,
}

impl TokenKind {
    /// Tokens the parser never looks at.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::Comment | TokenKind::LineContinuation
        )
    }
}

/// One token of a module's token stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Position in the token stream.
    pub index: u32,
    /// Token classification.
    pub kind: TokenKind,
    /// Byte range in the module text.
    pub span: Span,
}

/// An inclusive range of tokens plus the byte span they cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRange {
    /// First token index (inclusive).
    pub start_token: u32,
    /// Last token index (inclusive).
    pub end_token: u32,
    /// Bytes covered by the tokens.
    pub span: Span,
}

impl TokenRange {
    /// Range covering exactly one token.
    pub fn single(token: &Token) -> Self {
        TokenRange {
            start_token: token.index,
            end_token: token.index,
            span: token.span,
        }
    }

    /// Range covering `first` through `last` (inclusive).
    pub fn between(first: &Token, last: &Token) -> Self {
        TokenRange {
            start_token: first.index,
            end_token: last.index,
            span: Span::new(first.span.start, last.span.end.max(first.span.start)),
        }
    }

    /// Zero-width range at `offset`, just before token `token`.
    pub fn empty_at(token: u32, offset: u64) -> Self {
        TokenRange {
            start_token: token,
            end_token: token,
            span: Span::new(offset, offset),
        }
    }

    /// Smallest range covering both ranges.
    pub fn cover(&self, other: &TokenRange) -> TokenRange {
        TokenRange {
            start_token: self.start_token.min(other.start_token),
            end_token: self.end_token.max(other.end_token),
            span: Span::new(
                self.span.start.min(other.span.start),
                self.span.end.max(other.span.end),
            ),
        }
    }

    /// Whether this range fully contains `other`.
    pub fn contains(&self, other: &TokenRange) -> bool {
        self.start_token <= other.start_token && other.end_token <= self.end_token
    }
}

/// A token range bound to the module version it was measured against.
///
/// Fixes and refactorings address text only through this type so that a
/// position from one parse can never be applied to another version's text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedSelection {
    pub module: ModuleId,
    pub version: Version,
    pub range: TokenRange,
}

impl QualifiedSelection {
    pub fn new(module: ModuleId, version: Version, range: TokenRange) -> Self {
        QualifiedSelection {
            module,
            version,
            range,
        }
    }

    /// Sort key used by the inspection engine: module, then byte position.
    pub fn sort_key(&self) -> (&ModuleId, u64, u64) {
        (&self.module, self.range.span.start, self.range.span.end)
    }
}

impl fmt::Display for QualifiedSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} {}", self.module, self.version, self.range.span)
    }
}

// ============================================================================
// Library References
// ============================================================================

/// One entry of a project's library reference set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryReference {
    /// Library name as code refers to it (`VBA`, `Scripting`).
    pub name: String,
    /// Where the library was loaded from; empty for built-ins.
    #[serde(default)]
    pub path: String,
    /// Resolution priority; lower wins.
    pub priority: u32,
    /// Built-in references cannot be removed.
    #[serde(default)]
    pub is_builtin: bool,
}

impl LibraryReference {
    /// Create a non-built-in reference.
    pub fn new(name: impl Into<String>, path: impl Into<String>, priority: u32) -> Self {
        LibraryReference {
            name: name.into(),
            path: path.into(),
            priority,
            is_builtin: false,
        }
    }

    /// Create a built-in reference.
    pub fn builtin(name: impl Into<String>, priority: u32) -> Self {
        LibraryReference {
            name: name.into(),
            path: String::new(),
            priority,
            is_builtin: true,
        }
    }
}

// ============================================================================
// Location Type
// ============================================================================

/// Human-facing location in a module, used by JSON output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    /// Qualified module name (`Project.Module`).
    pub module: String,
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed, UTF-8 bytes).
    pub col: u32,
    /// Byte offset from module start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_start: Option<u64>,
    /// Byte offset end, exclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_end: Option<u64>,
}

impl Location {
    /// Create a new location without byte offsets.
    pub fn new(module: impl Into<String>, line: u32, col: u32) -> Self {
        Location {
            module: module.into(),
            line,
            col,
            byte_start: None,
            byte_end: None,
        }
    }

    /// Build a location for `span` inside `text`.
    pub fn from_span(module: &ModuleId, text: &str, span: Span) -> Self {
        let (line, col) = crate::text::byte_offset_to_position(text, span.start as usize);
        Location {
            module: module.to_string(),
            line,
            col,
            byte_start: Some(span.start),
            byte_end: Some(span.end),
        }
    }

    fn sort_key(&self) -> (&str, u32, u32) {
        (&self.module, self.line, self.col)
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Location {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
