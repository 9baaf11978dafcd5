//! Command workflows over a temporary directory of exported modules.
//!
//! # Organization
//!
//! - Inspect: JSON and text output
//! - Fix: write-through, dry run, drift, bad requests
//! - Extract interface: new class file and `Implements` line
//! - Symbols and tests discovery
//! - Analysis blocked by syntax errors

use std::fs;
use std::path::Path;

use ducktail::cli::{
    format_inspect_text, run_extract_interface, run_fix, run_inspect, run_symbols, run_tests,
    FixRequest, FixTarget,
};
use ducktail::config::{Config, ReferenceConfig};
use ducktail::error::{DuckError, OutputErrorCode};
use ducktail::workspace::Workspace;
use tempfile::TempDir;

fn workspace_with(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, text) in files {
        fs::write(dir.path().join(name), text).unwrap();
    }
    dir
}

fn open(dir: &TempDir, dry_run: bool) -> Workspace {
    Workspace::open(dir.path(), &Config::default(), dry_run).unwrap()
}

fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

// ============================================================================
// Inspect
// ============================================================================

mod inspect {
    use super::*;

    #[test]
    fn reports_missing_option_explicit() {
        let dir = workspace_with(&[("A.bas", "Sub Main()\nEnd Sub\n")]);
        let response = run_inspect(&open(&dir, true)).unwrap();
        assert_eq!(response.status, "ok");
        let result = response
            .results
            .iter()
            .find(|r| r.inspection == "OptionExplicit")
            .unwrap();
        assert_eq!(result.location.module, "VBAProject.A");
        assert!(result
            .fixes
            .contains(&"AddOptionExplicitQuickFix".to_string()));

        let text = format_inspect_text(&response);
        assert!(text.contains("VBAProject.A:"));
        assert!(text.contains("[OptionExplicit]"));
    }

    #[test]
    fn disabled_inspections_are_skipped() {
        let dir = workspace_with(&[("A.bas", "Sub Main()\nEnd Sub\n")]);
        let mut config = Config::default();
        config
            .inspections
            .disabled
            .insert("OptionExplicit".to_string());
        let workspace = Workspace::open(dir.path(), &config, true).unwrap();
        let response = run_inspect(&workspace).unwrap();
        assert!(!response
            .results
            .iter()
            .any(|r| r.inspection == "OptionExplicit"));
    }
}

// ============================================================================
// Fix
// ============================================================================

mod fix {
    use super::*;

    fn option_explicit(target: FixTarget) -> FixRequest {
        FixRequest {
            inspection: "OptionExplicit".to_string(),
            target,
            ..FixRequest::default()
        }
    }

    #[test]
    fn project_scope_writes_every_file() {
        let dir = workspace_with(&[
            ("A.bas", "Sub Main()\nEnd Sub\n"),
            ("B.bas", "Sub Other()\nEnd Sub\n"),
        ]);
        let workspace = open(&dir, false);
        let response = run_fix(&workspace, &option_explicit(FixTarget::Project)).unwrap();

        assert_eq!(response.applied, "AddOptionExplicitQuickFix");
        assert!(!response.dry_run);
        assert_eq!(response.count, 2);
        assert_eq!(response.modules.len(), 2);
        assert!(response.modules.iter().all(|m| m.version == 2));
        assert!(response.host_failures.is_empty());
        assert_eq!(read(dir.path(), "A.bas"), "Option Explicit\nSub Main()\nEnd Sub\n");
        assert_eq!(read(dir.path(), "B.bas"), "Option Explicit\nSub Other()\nEnd Sub\n");
    }

    #[test]
    fn single_fix_anchors_on_requested_module() {
        let dir = workspace_with(&[
            ("A.bas", "Sub Main()\nEnd Sub\n"),
            ("B.bas", "Sub Other()\nEnd Sub\n"),
        ]);
        let workspace = open(&dir, false);
        let request = FixRequest {
            module: Some("B".to_string()),
            ..option_explicit(FixTarget::Single)
        };
        let response = run_fix(&workspace, &request).unwrap();
        assert_eq!(response.count, 1);
        assert_eq!(read(dir.path(), "A.bas"), "Sub Main()\nEnd Sub\n");
        assert_eq!(read(dir.path(), "B.bas"), "Option Explicit\nSub Other()\nEnd Sub\n");
    }

    #[test]
    fn dry_run_leaves_files_alone() {
        let dir = workspace_with(&[("A.bas", "Sub Main()\nEnd Sub\n")]);
        let workspace = open(&dir, true);
        let response = run_fix(&workspace, &option_explicit(FixTarget::Single)).unwrap();
        assert!(response.dry_run);
        assert_eq!(response.modules.len(), 1);
        assert_eq!(response.modules[0].version, 2);
        assert_eq!(read(dir.path(), "A.bas"), "Sub Main()\nEnd Sub\n");
    }

    #[test]
    fn outside_edits_make_the_fix_stale() {
        let dir = workspace_with(&[("A.bas", "Sub Main()\nEnd Sub\n")]);
        let workspace = open(&dir, false);
        fs::write(dir.path().join("A.bas"), "Sub Edited()\nEnd Sub\n").unwrap();

        let err = run_fix(&workspace, &option_explicit(FixTarget::Single)).unwrap_err();
        assert!(matches!(err, DuckError::Stale { .. }));
        assert_eq!(OutputErrorCode::from(&err).code(), 4);
        assert_eq!(read(dir.path(), "A.bas"), "Sub Edited()\nEnd Sub\n");
    }

    #[test]
    fn no_results_is_invalid_arguments() {
        let dir = workspace_with(&[("A.bas", "Option Explicit\nSub Main()\nEnd Sub\n")]);
        let err = run_fix(&open(&dir, true), &option_explicit(FixTarget::Single)).unwrap_err();
        assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::InvalidArguments);
    }

    #[test]
    fn unsupported_scope_is_reported() {
        let dir = workspace_with(&[("A.bas", "Sub Main()\nEnd Sub\n")]);
        let err = run_fix(&open(&dir, true), &option_explicit(FixTarget::Procedure)).unwrap_err();
        assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::InvalidArguments);
    }

    #[test]
    fn unknown_fix_name_is_rejected() {
        let dir = workspace_with(&[("A.bas", "Sub Main()\nEnd Sub\n")]);
        let request = FixRequest {
            fix: Some("NoSuchQuickFix".to_string()),
            ..option_explicit(FixTarget::Single)
        };
        let err = run_fix(&open(&dir, true), &request).unwrap_err();
        assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::InvalidArguments);
    }
}

// ============================================================================
// Extract Interface
// ============================================================================

mod extract_interface {
    use super::*;

    const ACCOUNT: &str = "Option Explicit\nPrivate mBalance As Currency\n\
        Public Sub Deposit(ByVal amount As Currency)\n    mBalance = mBalance + amount\nEnd Sub\n\
        Public Property Get Balance() As Currency\n    Balance = mBalance\nEnd Property\n";

    #[test]
    fn writes_interface_class_and_implements_line() {
        let dir = workspace_with(&[("Account.cls", ACCOUNT)]);
        let workspace = open(&dir, false);
        let response = run_extract_interface(&workspace, "account").unwrap();

        assert_eq!(response.applied, "ExtractInterface");
        assert_eq!(response.count, 2);
        assert_eq!(response.modules.len(), 2);

        let interface = read(dir.path(), "IAccount.cls");
        assert!(interface.contains("Attribute VB_Name = \"IAccount\""));
        assert!(interface.contains("Deposit"));
        assert!(interface.contains("Balance"));

        let account = read(dir.path(), "Account.cls");
        assert!(account.starts_with("Option Explicit\nImplements IAccount\n"));
        assert!(account.contains("IAccount_Deposit"));
    }

    #[test]
    fn dry_run_creates_no_file() {
        let dir = workspace_with(&[("Account.cls", ACCOUNT)]);
        let workspace = open(&dir, true);
        let response = run_extract_interface(&workspace, "Account").unwrap();
        assert!(response.dry_run);
        assert!(!dir.path().join("IAccount.cls").exists());
        assert_eq!(read(dir.path(), "Account.cls"), ACCOUNT);
    }

    #[test]
    fn unknown_module_is_a_resolution_error() {
        let dir = workspace_with(&[("Account.cls", ACCOUNT)]);
        let err = run_extract_interface(&open(&dir, true), "Ledger").unwrap_err();
        assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::ResolutionError);
    }
}

// ============================================================================
// Symbols and Tests
// ============================================================================

mod discovery {
    use super::*;

    const TESTS: &str = "'@TestModule\nOption Explicit\nPrivate Assert As Rubberduck.AssertClass\n\
        '@TestMethod\nPublic Sub AddsNumbers()\n    Assert.AreEqual 2, 1 + 1\nEnd Sub\n";

    #[test]
    fn symbols_filter_by_module() {
        let dir = workspace_with(&[
            ("A.bas", "Option Explicit\nSub Main()\n    B.Foo\nEnd Sub\n"),
            ("B.bas", "Option Explicit\nPublic Sub Foo()\nEnd Sub\n"),
        ]);
        let workspace = open(&dir, true);
        let response = run_symbols(&workspace, Some("B")).unwrap();
        let foo = response.symbols.iter().find(|s| s.name == "Foo").unwrap();
        assert_eq!(foo.references, 1);
        assert!(!response.symbols.iter().any(|s| s.name == "Main"));
    }

    #[test]
    fn tests_report_missing_assert_library() {
        let dir = workspace_with(&[("Tests.bas", TESTS)]);
        let response = run_tests(&open(&dir, true)).unwrap();
        assert_eq!(response.tests.len(), 1);
        assert_eq!(response.tests[0].method, "AddsNumbers");
        assert_eq!(response.tests[0].module, "VBAProject.Tests");
        assert!(response.tests[0].location.is_some());
        assert_eq!(response.missing_assert_library, vec!["VBAProject".to_string()]);
    }

    #[test]
    fn configured_assert_library_satisfies_tests() {
        let dir = workspace_with(&[("Tests.bas", TESTS)]);
        let config = Config {
            references: vec![ReferenceConfig {
                name: "Rubberduck".to_string(),
                path: String::new(),
                priority: 1,
            }],
            ..Config::default()
        };
        let workspace = Workspace::open(dir.path(), &config, true).unwrap();
        let response = run_tests(&workspace).unwrap();
        assert!(response.missing_assert_library.is_empty());
    }
}

// ============================================================================
// Analysis Blocked
// ============================================================================

mod blocked {
    use super::*;

    #[test]
    fn syntax_errors_exit_with_code_five() {
        let dir = workspace_with(&[("A.bas", "Sub A()\n  x = \nEnd Sub\n")]);
        let err = run_inspect(&open(&dir, true)).unwrap_err();
        assert_eq!(OutputErrorCode::from(&err).code(), 5);
    }
}
