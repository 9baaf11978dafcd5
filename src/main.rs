//! Binary entry point for the duck CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Run every inspection over the modules in the current directory
//! duck inspect
//!
//! # Apply the default quick fix to every OptionExplicit result
//! duck fix --inspection OptionExplicit --scope project
//!
//! # Preview extracting IAccount from the Account class
//! duck extract-interface --module Account --dry-run
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use ducktail::cli::{
    format_inspect_text, run_extract_interface, run_fix, run_inspect, run_symbols, run_tests,
    FixRequest, FixTarget, InspectFormat,
};
use ducktail::config::Config;
use ducktail::workspace::Workspace;
use ducktail_core::error::{DuckError, OutputErrorCode};
use ducktail_core::output::{emit_response, ErrorResponse};

// ============================================================================
// CLI Structure
// ============================================================================

/// Inspections and refactorings for exported VBA projects.
///
/// Reads `.bas`, `.cls`, `.frm` and `.doccls` files from the workspace.
/// All output is JSON unless a text format is requested.
#[derive(Parser, Debug)]
#[command(name = "duck", version, about = "Inspections and refactorings for VBA projects")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Workspace root directory (default: current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Config file (default: ducktail.toml in the workspace).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Emit log lines as JSON.
    #[arg(long, global = true)]
    log_json: bool,
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every enabled inspection.
    Inspect {
        #[arg(long, value_enum, default_value = "json")]
        format: InspectFormat,
    },
    /// Apply a quick fix to results of one inspection.
    Fix {
        /// Inspection whose results to fix.
        #[arg(long)]
        inspection: String,
        /// Quick fix name (default: the first fix for the inspection).
        #[arg(long)]
        fix: Option<String>,
        /// Fix the first result in this module.
        #[arg(long)]
        module: Option<String>,
        /// How far the fix reaches from the first result.
        #[arg(long, value_enum, default_value = "single")]
        scope: FixTarget,
        /// Report the change without writing files.
        #[arg(long)]
        dry_run: bool,
    },
    /// List declarations and unresolved names.
    Symbols {
        /// Only this module.
        #[arg(long)]
        module: Option<String>,
    },
    /// Extract an interface class from a module's public members.
    ExtractInterface {
        /// Module to extract from.
        #[arg(long)]
        module: String,
        /// Report the change without writing files.
        #[arg(long)]
        dry_run: bool,
    },
    /// List unit tests.
    Tests,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.global.log_level, cli.global.log_json);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let error_code = OutputErrorCode::from(&err);
            let response = ErrorResponse::from_error(&err);

            // Errors go to stdout as JSON so callers parse one stream.
            let _ = emit_response(&response, &mut io::stdout());
            let _ = io::stdout().flush();

            ExitCode::from(error_code.code())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Execute the CLI command.
fn execute(cli: Cli) -> Result<(), DuckError> {
    let global = &cli.global;
    let mut stdout = io::stdout();
    match cli.command {
        Command::Inspect { format } => {
            let workspace = open_workspace(global, true)?;
            let response = run_inspect(&workspace)?;
            match format {
                InspectFormat::Json => emit_response(&response, &mut stdout)?,
                InspectFormat::Text => write!(stdout, "{}", format_inspect_text(&response))?,
            }
        }
        Command::Fix {
            inspection,
            fix,
            module,
            scope,
            dry_run,
        } => {
            let workspace = open_workspace(global, dry_run)?;
            let request = FixRequest {
                inspection,
                fix,
                module,
                target: scope,
            };
            emit_response(&run_fix(&workspace, &request)?, &mut stdout)?;
        }
        Command::Symbols { module } => {
            let workspace = open_workspace(global, true)?;
            emit_response(&run_symbols(&workspace, module.as_deref())?, &mut stdout)?;
        }
        Command::ExtractInterface { module, dry_run } => {
            let workspace = open_workspace(global, dry_run)?;
            emit_response(&run_extract_interface(&workspace, &module)?, &mut stdout)?;
        }
        Command::Tests => {
            let workspace = open_workspace(global, true)?;
            emit_response(&run_tests(&workspace)?, &mut stdout)?;
        }
    }
    stdout.flush()?;
    Ok(())
}

/// Load configuration and open the workspace.
///
/// Read-only commands open with `dry_run` so nothing can reach the files.
fn open_workspace(global: &GlobalArgs, dry_run: bool) -> Result<Workspace, DuckError> {
    let root = match &global.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };
    let config = match &global.config {
        Some(path) => Config::load(path)?,
        None => Config::load_from_workspace(&root)?,
    };
    Ok(Workspace::open(&root, &config, dry_run)?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod cli_parsing {
        use super::*;

        #[test]
        fn parse_inspect_text() {
            let cli = Cli::try_parse_from(["duck", "inspect", "--format", "text"]).unwrap();
            assert!(matches!(
                cli.command,
                Command::Inspect {
                    format: InspectFormat::Text
                }
            ));
        }

        #[test]
        fn parse_fix_with_scope() {
            let args = [
                "duck",
                "fix",
                "--inspection",
                "OptionExplicit",
                "--scope",
                "project",
                "--dry-run",
            ];
            let cli = Cli::try_parse_from(args).unwrap();
            match cli.command {
                Command::Fix {
                    inspection,
                    scope,
                    dry_run,
                    fix,
                    module,
                } => {
                    assert_eq!(inspection, "OptionExplicit");
                    assert_eq!(scope, FixTarget::Project);
                    assert!(dry_run);
                    assert!(fix.is_none());
                    assert!(module.is_none());
                }
                other => panic!("unexpected command: {:?}", other),
            }
        }

        #[test]
        fn fix_scope_defaults_to_single() {
            let cli = Cli::try_parse_from(["duck", "fix", "--inspection", "VariableNotUsed"]).unwrap();
            assert!(matches!(
                cli.command,
                Command::Fix {
                    scope: FixTarget::Single,
                    ..
                }
            ));
        }

        #[test]
        fn parse_global_flags_after_subcommand() {
            let args = [
                "duck",
                "tests",
                "--workspace",
                "/tmp/project",
                "--log-level",
                "debug",
                "--log-json",
            ];
            let cli = Cli::try_parse_from(args).unwrap();
            assert_eq!(cli.global.workspace, Some(PathBuf::from("/tmp/project")));
            assert!(matches!(cli.global.log_level, LogLevel::Debug));
            assert!(cli.global.log_json);
        }

        #[test]
        fn extract_interface_requires_module() {
            assert!(Cli::try_parse_from(["duck", "extract-interface"]).is_err());
        }

        #[test]
        fn unknown_scope_is_rejected() {
            let result = Cli::try_parse_from(["duck", "fix", "--inspection", "X", "--scope", "everywhere"]);
            assert!(result.is_err());
        }
    }

    mod log_levels {
        use super::*;

        #[test]
        fn levels_map_to_tracing() {
            assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
            assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
            assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        }
    }

    mod workspace_opening {
        use super::*;

        #[test]
        fn missing_config_file_is_invalid_arguments() {
            let dir = tempfile::tempdir().unwrap();
            let global = GlobalArgs {
                workspace: Some(dir.path().to_path_buf()),
                config: Some(dir.path().join("absent.toml")),
                log_level: LogLevel::Warn,
                log_json: false,
            };
            let err = open_workspace(&global, true).err().unwrap();
            assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::InvalidArguments);
        }
    }
}
