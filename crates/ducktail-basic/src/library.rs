//! Referenced libraries and their exposed members.
//!
//! A [`LibraryProvider`] turns a project's [`LibraryReference`] into a
//! [`LibraryModel`]: modules whose members are globally visible (the `VBA`
//! library's `Strings`, `Interaction`, ...) and classes usable as types
//! (`Collection`, `Scripting.Dictionary`). [`BuiltinLibraries`] carries the
//! models this crate knows without reading type libraries.

use std::path::Path;

use ducktail_core::facts::DeclarationKind;
use ducktail_core::types::LibraryReference;
use serde::Serialize;
use thiserror::Error;

/// Name of the always-present built-in library.
pub const VBA_LIBRARY: &str = "VBA";
/// Name of the unit-testing add-in library.
pub const ASSERT_LIBRARY: &str = "Rubberduck";

// ============================================================================
// Errors
// ============================================================================

/// A library that could not be loaded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LibraryLoadError {
    #[error("library '{name}' is not available")]
    Unknown { name: String },

    #[error("cannot load library from '{path}': {reason}")]
    Load { path: String, reason: String },
}

// ============================================================================
// Library Model
// ============================================================================

/// Whether a library module's members are global or need an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryModuleKind {
    Module,
    Class,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryMember {
    pub name: String,
    pub kind: DeclarationKind,
    pub return_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryModuleDef {
    pub name: String,
    pub kind: LibraryModuleKind,
    /// Class usable by name without `New` (`Debug`).
    pub predeclared: bool,
    pub members: Vec<LibraryMember>,
}

impl LibraryModuleDef {
    pub fn module(name: &str) -> Self {
        LibraryModuleDef {
            name: name.to_string(),
            kind: LibraryModuleKind::Module,
            predeclared: false,
            members: Vec::new(),
        }
    }

    pub fn class(name: &str) -> Self {
        LibraryModuleDef {
            kind: LibraryModuleKind::Class,
            ..LibraryModuleDef::module(name)
        }
    }

    pub fn predeclared(mut self) -> Self {
        self.predeclared = true;
        self
    }

    fn members(mut self, kind: DeclarationKind, return_type: Option<&str>, names: &[&str]) -> Self {
        self.members.extend(names.iter().map(|name| LibraryMember {
            name: name.to_string(),
            kind,
            return_type: return_type.map(str::to_string),
        }));
        self
    }

    pub fn functions(self, return_type: &str, names: &[&str]) -> Self {
        self.members(DeclarationKind::Function, Some(return_type), names)
    }

    /// Variant-returning functions, each with a String-returning `$` twin.
    pub fn string_functions(mut self, names: &[&str]) -> Self {
        for name in names.iter().copied() {
            let hinted = format!("{}$", name);
            self = self
                .functions("Variant", &[name])
                .functions("String", &[hinted.as_str()]);
        }
        self
    }

    pub fn subs(self, names: &[&str]) -> Self {
        self.members(DeclarationKind::Procedure, None, names)
    }

    pub fn properties(self, return_type: &str, names: &[&str]) -> Self {
        self.members(DeclarationKind::PropertyGet, Some(return_type), names)
    }

    pub fn constants(self, return_type: &str, names: &[&str]) -> Self {
        self.members(DeclarationKind::Constant, Some(return_type), names)
    }

    pub fn find(&self, name: &str) -> Option<&LibraryMember> {
        self.members.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }
}

/// Everything one library exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryModel {
    pub name: String,
    pub modules: Vec<LibraryModuleDef>,
}

impl LibraryModel {
    pub fn new(name: &str) -> Self {
        LibraryModel {
            name: name.to_string(),
            modules: Vec::new(),
        }
    }

    pub fn with_module(mut self, module: LibraryModuleDef) -> Self {
        self.modules.push(module);
        self
    }

    pub fn find_module(&self, name: &str) -> Option<&LibraryModuleDef> {
        self.modules.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }
}

// ============================================================================
// Providers
// ============================================================================

/// Source of library models.
pub trait LibraryProvider: Send + Sync {
    /// Load the library a project reference names.
    fn load(&self, reference: &LibraryReference) -> Result<LibraryModel, LibraryLoadError>;

    /// Load a library from a file.
    fn load_path(&self, path: &Path) -> Result<LibraryModel, LibraryLoadError>;
}

/// Known libraries, looked up by name or by well-known file stem.
#[derive(Debug, Clone)]
pub struct BuiltinLibraries {
    libraries: Vec<LibraryModel>,
}

impl Default for BuiltinLibraries {
    fn default() -> Self {
        BuiltinLibraries::new()
    }
}

impl BuiltinLibraries {
    pub fn new() -> Self {
        BuiltinLibraries {
            libraries: vec![vba_library(), scripting_library(), assert_library()],
        }
    }

    /// Register an additional library model.
    pub fn with_library(mut self, library: LibraryModel) -> Self {
        self.libraries.push(library);
        self
    }

    fn named(&self, name: &str) -> Option<&LibraryModel> {
        self.libraries.iter().find(|l| l.name.eq_ignore_ascii_case(name))
    }
}

/// Library name for a well-known library file stem.
fn library_for_stem(stem: &str) -> Option<&'static str> {
    match stem.to_ascii_lowercase().as_str() {
        "vbe7" | "vbe6" | "msvbvm60" => Some(VBA_LIBRARY),
        "scrrun" => Some("Scripting"),
        "rubberduck" => Some(ASSERT_LIBRARY),
        _ => None,
    }
}

impl LibraryProvider for BuiltinLibraries {
    fn load(&self, reference: &LibraryReference) -> Result<LibraryModel, LibraryLoadError> {
        if let Some(model) = self.named(&reference.name) {
            return Ok(model.clone());
        }
        if reference.path.is_empty() {
            return Err(LibraryLoadError::Unknown {
                name: reference.name.clone(),
            });
        }
        self.load_path(Path::new(&reference.path))
    }

    fn load_path(&self, path: &Path) -> Result<LibraryModel, LibraryLoadError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let known = library_for_stem(stem).and_then(|name| self.named(name));
        match known.or_else(|| self.named(stem)) {
            Some(model) => Ok(model.clone()),
            None if !path.exists() => Err(LibraryLoadError::Load {
                path: path.display().to_string(),
                reason: "file not found".into(),
            }),
            None => Err(LibraryLoadError::Load {
                path: path.display().to_string(),
                reason: "unrecognized type library".into(),
            }),
        }
    }
}

// ============================================================================
// Built-in Models
// ============================================================================

fn vba_library() -> LibraryModel {
    LibraryModel::new(VBA_LIBRARY)
        .with_module(
            LibraryModuleDef::module("Strings")
                .string_functions(&[
                    "Chr", "ChrW", "Format", "LCase", "Left", "LTrim", "Mid", "Right", "RTrim",
                    "Space", "String", "Trim", "UCase",
                ])
                .functions("Integer", &["Asc", "AscW"])
                .functions("Long", &["InStr", "InStrRev", "Len", "StrComp"])
                .functions("String", &["Join", "Replace", "StrConv", "StrReverse"])
                .functions("Variant", &["Split"]),
        )
        .with_module(
            LibraryModuleDef::module("Conversion")
                .functions("Boolean", &["CBool"])
                .functions("Byte", &["CByte"])
                .functions("Currency", &["CCur"])
                .functions("Date", &["CDate"])
                .functions("Double", &["CDbl", "Val"])
                .functions("Variant", &["CDec", "CVar", "CVErr", "Fix", "Int"])
                .functions("Integer", &["CInt"])
                .functions("Long", &["CLng"])
                .functions("LongLong", &["CLngLng"])
                .functions("LongPtr", &["CLngPtr"])
                .functions("Single", &["CSng"])
                .functions("String", &["CStr"])
                .string_functions(&["Error", "Hex", "Oct", "Str"]),
        )
        .with_module(
            LibraryModuleDef::module("Interaction")
                .functions("Long", &["MsgBox", "Shell"])
                .functions("String", &["InputBox"])
                .functions("Object", &["CreateObject", "GetObject"])
                .functions("Variant", &["IIf", "Choose", "Switch", "CallByName"])
                .functions("Integer", &["DoEvents"])
                .string_functions(&["Environ", "Command"])
                .subs(&["Beep", "AppActivate", "SendKeys"]),
        )
        .with_module(
            LibraryModuleDef::module("DateTime")
                .string_functions(&["Date", "Time"])
                .functions("Date", &["Now", "DateAdd", "DateSerial", "DateValue", "TimeSerial", "TimeValue"])
                .functions("Variant", &["DateDiff", "DatePart", "Day", "Month", "Year", "Hour", "Minute", "Second", "Weekday"])
                .functions("Single", &["Timer"])
                .functions("String", &["MonthName", "WeekdayName"]),
        )
        .with_module(
            LibraryModuleDef::module("Information")
                .functions(
                    "Boolean",
                    &["IsArray", "IsDate", "IsEmpty", "IsError", "IsMissing", "IsNull", "IsNumeric", "IsObject"],
                )
                .functions("String", &["TypeName"])
                .functions("Integer", &["VarType"])
                .functions("Long", &["LBound", "UBound"])
                .functions("Variant", &["Array"])
                .properties("ErrObject", &["Err"]),
        )
        .with_module(
            LibraryModuleDef::module("Math")
                .functions("Variant", &["Abs", "Round", "Sgn"])
                .functions("Double", &["Atn", "Cos", "Exp", "Log", "Sin", "Sqr", "Tan"])
                .functions("Single", &["Rnd"])
                .subs(&["Randomize"]),
        )
        .with_module(
            LibraryModuleDef::module("FileSystem")
                .string_functions(&["Dir", "CurDir"])
                .functions("Long", &["FileLen", "LOF"])
                .functions("Date", &["FileDateTime"])
                .functions("Integer", &["FreeFile"])
                .functions("Boolean", &["EOF"])
                .subs(&["Kill", "MkDir", "RmDir", "ChDir", "FileCopy"]),
        )
        .with_module(
            LibraryModuleDef::module("Constants")
                .constants(
                    "String",
                    &["vbCr", "vbLf", "vbCrLf", "vbNewLine", "vbTab", "vbNullString", "vbNullChar"],
                )
                .constants(
                    "Long",
                    &[
                        "vbOK", "vbCancel", "vbYes", "vbNo", "vbOKOnly", "vbOKCancel", "vbYesNo",
                        "vbCritical", "vbExclamation", "vbInformation", "vbQuestion",
                        "vbBinaryCompare", "vbTextCompare", "vbObjectError",
                    ],
                ),
        )
        .with_module(
            LibraryModuleDef::class("Collection")
                .subs(&["Add", "Remove"])
                .functions("Long", &["Count"])
                .functions("Variant", &["Item"]),
        )
        .with_module(
            LibraryModuleDef::class("ErrObject")
                .properties("Long", &["Number"])
                .properties("String", &["Description", "Source"])
                .subs(&["Raise", "Clear"]),
        )
        .with_module(
            LibraryModuleDef::class("Debug")
                .predeclared()
                .subs(&["Print", "Assert"]),
        )
}

fn scripting_library() -> LibraryModel {
    LibraryModel::new("Scripting")
        .with_module(
            LibraryModuleDef::class("Dictionary")
                .subs(&["Add", "Remove", "RemoveAll"])
                .functions("Boolean", &["Exists"])
                .functions("Variant", &["Items", "Keys"])
                .properties("Long", &["Count", "CompareMode"])
                .properties("Variant", &["Item"]),
        )
        .with_module(
            LibraryModuleDef::class("FileSystemObject")
                .functions("Boolean", &["FileExists", "FolderExists"])
                .functions("String", &["BuildPath", "GetBaseName", "GetExtensionName", "GetFileName"])
                .functions("TextStream", &["OpenTextFile", "CreateTextFile"])
                .subs(&["CopyFile", "DeleteFile", "MoveFile", "CreateFolder"]),
        )
        .with_module(
            LibraryModuleDef::class("TextStream")
                .functions("String", &["ReadLine", "ReadAll"])
                .subs(&["Write", "WriteLine", "Close"])
                .properties("Boolean", &["AtEndOfStream"]),
        )
}

fn assert_library() -> LibraryModel {
    let members = |class: LibraryModuleDef| {
        class.subs(&[
            "IsTrue", "IsFalse", "AreEqual", "AreNotEqual", "AreSame", "AreNotSame", "IsNothing",
            "IsNotNothing", "Fail", "Inconclusive", "Succeed",
        ])
    };
    LibraryModel::new(ASSERT_LIBRARY)
        .with_module(members(LibraryModuleDef::class("AssertClass")))
        .with_module(members(LibraryModuleDef::class("PermissiveAssertClass")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vba_has_hinted_twins() {
        let vba = vba_library();
        let strings = vba.find_module("strings").unwrap();
        let format = strings.find("Format").unwrap();
        assert_eq!(format.return_type.as_deref(), Some("Variant"));
        let hinted = strings.find("Format$").unwrap();
        assert_eq!(hinted.return_type.as_deref(), Some("String"));
        assert!(strings.find("Len$").is_none());
    }

    #[test]
    fn debug_is_predeclared_class() {
        let vba = vba_library();
        let debug = vba.find_module("Debug").unwrap();
        assert_eq!(debug.kind, LibraryModuleKind::Class);
        assert!(debug.predeclared);
        assert!(debug.find("print").is_some());
    }

    #[test]
    fn load_by_name_and_stem() {
        let libraries = BuiltinLibraries::new();
        let scripting = libraries
            .load(&LibraryReference::new("Scripting", "", 2))
            .unwrap();
        assert_eq!(scripting.name, "Scripting");
        let by_path = libraries
            .load_path(Path::new("C:/Windows/System32/scrrun.dll"))
            .unwrap();
        assert_eq!(by_path.name, "Scripting");
    }

    #[test]
    fn unknown_library_fails() {
        let libraries = BuiltinLibraries::new();
        let err = libraries
            .load(&LibraryReference::new("Excel", "", 2))
            .unwrap_err();
        assert_eq!(
            err,
            LibraryLoadError::Unknown {
                name: "Excel".into()
            }
        );
        let err = libraries
            .load(&LibraryReference::new("Excel", "/nowhere/EXCEL.EXE", 2))
            .unwrap_err();
        assert!(matches!(err, LibraryLoadError::Load { .. }));
    }

    #[test]
    fn extra_library_is_found() {
        let libraries = BuiltinLibraries::new().with_library(
            LibraryModel::new("Excel").with_module(LibraryModuleDef::class("Range")),
        );
        assert!(libraries.load(&LibraryReference::new("Excel", "", 3)).is_ok());
    }
}
