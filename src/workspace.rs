//! A directory of exported VBA modules, opened as one project.
//!
//! Module files (`.bas`, `.cls`, `.frm`, `.doccls`) are collected from the
//! workspace root, loaded into a [`ModuleStore`] and written back through
//! [`FileHost`] when a rewrite session commits.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use ducktail_basic::references::{ReferenceModel, ReferenceReconciler};
use ducktail_basic::{default_engine, BasicAdapter};
use ducktail_core::error::DuckError;
use ducktail_core::facts::Snapshot;
use ducktail_core::inspection::InspectionEngine;
use ducktail_core::interaction::{HostError, ModuleHost, TracingMessageSink};
use ducktail_core::output::diagnostic_lines;
use ducktail_core::patch::ContentHash;
use ducktail_core::session::RewritingManager;
use ducktail_core::state::{ParseCoordinator, ParserState};
use ducktail_core::store::{ModuleStore, StoreError};
use ducktail_core::types::{ModuleId, ModuleKind};

use crate::config::Config;

// ============================================================================
// Error Types
// ============================================================================

/// Errors opening a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace root {path} is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Two files export the same module name.
    #[error("module {name} is exported by both {first} and {second}")]
    DuplicateModule {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<WorkspaceError> for DuckError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::NotADirectory { .. } | WorkspaceError::DuplicateModule { .. } => {
                DuckError::invalid_args(err.to_string())
            }
            WorkspaceError::Io { .. } => DuckError::internal(err.to_string()),
            WorkspaceError::Store(e) => DuckError::from(e),
        }
    }
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

// ============================================================================
// File Collection
// ============================================================================

/// One exported module file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFile {
    /// Path relative to the workspace root.
    pub path: PathBuf,
    pub name: String,
    pub kind: ModuleKind,
    pub text: String,
}

/// Collect module files under `root`, sorted by relative path.
///
/// Hidden directories (`.git`, `.vscode`, ...) are skipped.
pub fn collect_module_files(root: &Path) -> WorkspaceResult<Vec<ModuleFile>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name().to_str()));

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(kind) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ModuleKind::from_extension)
        else {
            continue;
        };
        let text = fs::read_to_string(path).map_err(|source| WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        let name = module_name(&text, path);
        files.push(ModuleFile {
            path: relative,
            name,
            kind,
            text,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn is_hidden(name: Option<&str>) -> bool {
    name.is_some_and(|n| n.starts_with('.'))
}

/// The `Attribute VB_Name` of an exported module, else the file stem.
pub fn module_name(text: &str, path: &Path) -> String {
    text.lines()
        .map(str::trim)
        .find_map(vb_name_attribute)
        .map(str::to_string)
        .unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string()
        })
}

fn vb_name_attribute(line: &str) -> Option<&str> {
    let (keyword, rest) = line.split_once(char::is_whitespace)?;
    if !keyword.eq_ignore_ascii_case("attribute") {
        return None;
    }
    let (key, value) = rest.split_once('=')?;
    if !key.trim().eq_ignore_ascii_case("vb_name") {
        return None;
    }
    let value = value.trim().trim_matches('"');
    (!value.is_empty()).then_some(value)
}

// ============================================================================
// File Host
// ============================================================================

#[derive(Debug, Clone)]
struct HostFile {
    path: PathBuf,
    /// Hash of the file as last read or written.
    hash: ContentHash,
}

/// Module host backed by exported files.
///
/// A write is refused when the file changed on disk since it was loaded,
/// so edits made outside duck are never overwritten.
pub struct FileHost {
    root: PathBuf,
    store: Arc<ModuleStore>,
    files: RwLock<BTreeMap<ModuleId, HostFile>>,
}

impl FileHost {
    pub fn new(root: impl Into<PathBuf>, store: Arc<ModuleStore>) -> Self {
        FileHost {
            root: root.into(),
            store,
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record that `module` was loaded from `path` with `text`.
    pub fn track(&self, module: ModuleId, path: PathBuf, text: &str) {
        let hash = ContentHash::compute(text.as_bytes());
        self.files.write().insert(module, HostFile { path, hash });
    }

    pub fn path_of(&self, module: &ModuleId) -> Option<PathBuf> {
        self.files.read().get(module).map(|f| f.path.clone())
    }

    /// Modules whose files no longer match what was loaded or last written.
    pub fn drifted(&self) -> Vec<ModuleId> {
        self.files
            .read()
            .iter()
            .filter(|(_, file)| match fs::read(&file.path) {
                Ok(bytes) => ContentHash::compute(&bytes) != file.hash,
                Err(_) => true,
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn path_for_new(&self, module: &ModuleId) -> PathBuf {
        let kind = self
            .store
            .get(module)
            .map(|m| m.kind)
            .unwrap_or(ModuleKind::Standard);
        self.root
            .join(format!("{}.{}", module.name, kind.extension()))
    }
}

impl ModuleHost for FileHost {
    fn module_text(&self, module: &ModuleId) -> Result<String, HostError> {
        let path = self
            .path_of(module)
            .ok_or_else(|| HostError::ModuleNotFound(module.clone()))?;
        Ok(fs::read_to_string(path)?)
    }

    fn replace_module_text(&self, module: &ModuleId, text: &str) -> Result<(), HostError> {
        let existing = self.files.read().get(module).cloned();
        let path = match existing {
            Some(file) => {
                let on_disk = fs::read(&file.path)?;
                if ContentHash::compute(&on_disk) != file.hash {
                    return Err(HostError::Other(format!(
                        "{} changed on disk since it was loaded",
                        file.path.display()
                    )));
                }
                file.path
            }
            None => {
                let path = self.path_for_new(module);
                if path.exists() {
                    return Err(HostError::Other(format!(
                        "{} already exists",
                        path.display()
                    )));
                }
                path
            }
        };
        fs::write(&path, text)?;
        debug!(module = %module, path = %path.display(), "module written");
        self.track(module.clone(), path, text);
        Ok(())
    }
}

// ============================================================================
// Workspace
// ============================================================================

/// A loaded workspace: store, coordinator, rewriting manager and engine.
pub struct Workspace {
    root: PathBuf,
    project: String,
    store: Arc<ModuleStore>,
    host: Arc<FileHost>,
    coordinator: Arc<ParseCoordinator<BasicAdapter>>,
    manager: RewritingManager,
    engine: InspectionEngine,
    dry_run: bool,
}

impl Workspace {
    /// Load every module under `root` into one project.
    ///
    /// With `dry_run`, commits update the in-memory store only and no file
    /// is written.
    pub fn open(root: &Path, config: &Config, dry_run: bool) -> WorkspaceResult<Self> {
        if !root.is_dir() {
            return Err(WorkspaceError::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        let project = config.project.name.clone();
        let store = Arc::new(ModuleStore::new());
        let host = Arc::new(FileHost::new(root, Arc::clone(&store)));

        let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
        for file in collect_module_files(root)? {
            let key = file.name.to_ascii_lowercase();
            if let Some(first) = seen.get(&key) {
                return Err(WorkspaceError::DuplicateModule {
                    name: file.name,
                    first: first.clone(),
                    second: file.path,
                });
            }
            let id = ModuleId::new(project.clone(), file.name.clone());
            store.add_module(id.clone(), file.kind, &file.text)?;
            host.track(id, root.join(&file.path), &file.text);
            seen.insert(key, file.path);
        }

        let coordinator = Arc::new(ParseCoordinator::new(
            Arc::new(BasicAdapter::new()),
            Arc::clone(&store),
        ));
        let mut manager =
            RewritingManager::new(Arc::clone(&store)).with_message_sink(Arc::new(TracingMessageSink));
        if !dry_run {
            manager = manager.with_host(host.clone());
        }
        manager.add_listener(coordinator.clone());

        let workspace = Workspace {
            root: root.to_path_buf(),
            project,
            store,
            host,
            coordinator,
            manager,
            engine: default_engine(config.inspections.clone()),
            dry_run,
        };
        workspace.apply_references(config);
        info!(
            root = %workspace.root.display(),
            project = %workspace.project,
            modules = workspace.store.len(),
            dry_run,
            "workspace opened"
        );
        Ok(workspace)
    }

    fn apply_references(&self, config: &Config) {
        if config.references.is_empty() {
            return;
        }
        let selected: Vec<ReferenceModel> = config
            .ordered_references()
            .into_iter()
            .map(|r| ReferenceModel {
                path: r.path.clone(),
                ..ReferenceModel::named(r.name.clone())
            })
            .collect();
        let provider = Arc::clone(self.coordinator.adapter().libraries());
        ReferenceReconciler::new(&*self.coordinator, provider.as_ref(), &TracingMessageSink)
            .reconcile(&self.project, &selected);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn store(&self) -> &Arc<ModuleStore> {
        &self.store
    }

    pub fn host(&self) -> &Arc<FileHost> {
        &self.host
    }

    pub fn coordinator(&self) -> &Arc<ParseCoordinator<BasicAdapter>> {
        &self.coordinator
    }

    pub fn manager(&self) -> &RewritingManager {
        &self.manager
    }

    pub fn engine(&self) -> &InspectionEngine {
        &self.engine
    }

    /// Bring the snapshot up to date and return it.
    ///
    /// Fails with `AnalysisBlocked` when the project has syntax or resolver
    /// errors.
    pub fn ready_snapshot(&self) -> Result<Arc<Snapshot>, DuckError> {
        let state = self.coordinator.parse();
        if state != ParserState::Ready {
            let diagnostics = diagnostic_lines(
                &self.coordinator.syntax_errors(),
                &self.coordinator.resolver_errors(),
            );
            warn!(%state, count = diagnostics.len(), "analysis blocked");
            return Err(DuckError::AnalysisBlocked {
                state: state.to_string(),
                diagnostics,
            });
        }
        Ok(self.coordinator.current_snapshot().snapshot)
    }

    /// Id of the module named `name` (case-insensitive).
    pub fn module(&self, name: &str) -> Result<ModuleId, DuckError> {
        self.store
            .find(&self.project, name)
            .map(|m| m.id)
            .ok_or_else(|| DuckError::module_not_found(name))
    }

    /// Fail when any module file changed on disk since the workspace opened.
    pub fn ensure_unchanged(&self) -> Result<(), DuckError> {
        let drifted = self.host.drifted();
        match drifted.first() {
            None => Ok(()),
            Some(module) => {
                let actual = self
                    .host
                    .path_of(module)
                    .and_then(|p| fs::read(p).ok())
                    .map(|bytes| ContentHash::compute(&bytes).short().to_string())
                    .unwrap_or_else(|| "missing".to_string());
                let expected = self
                    .store
                    .get(module)
                    .map(|m| m.hash.short().to_string())
                    .unwrap_or_default();
                Err(DuckError::Stale {
                    module: module.to_string(),
                    expected,
                    actual,
                })
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
