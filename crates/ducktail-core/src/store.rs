//! Module store: the single owner of module text, versions and library references.
//!
//! Every mutation bumps a store-wide revision counter. The parser state
//! machine compares revisions to detect that a cycle was superseded, and
//! rewrite sessions compare per-module versions to detect staleness.
//!
//! Multi-module commits go through [`ModuleStore::commit_batch`], which
//! verifies every expected version and applies every change under one write
//! lock, so a batch is observed either entirely or not at all.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::patch::ContentHash;
use crate::types::{LibraryReference, ModuleId, ModuleKind, Version};

// ============================================================================
// Error Types
// ============================================================================

/// Errors from module store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("module not found: {module}")]
    ModuleNotFound { module: ModuleId },

    #[error("module already exists: {module}")]
    ModuleExists { module: ModuleId },

    /// A batch expected a version the store no longer holds.
    #[error("module {module} is at {actual}, expected {expected}")]
    VersionMismatch {
        module: ModuleId,
        expected: Version,
        actual: Version,
    },
}

// ============================================================================
// Module Text
// ============================================================================

/// Read-only view of one module at one version.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleText {
    pub id: ModuleId,
    pub kind: ModuleKind,
    #[serde(skip)]
    pub text: Arc<str>,
    pub version: Version,
    pub hash: ContentHash,
}

#[derive(Debug)]
struct ModuleEntry {
    kind: ModuleKind,
    text: Arc<str>,
    version: Version,
    hash: ContentHash,
}

impl ModuleEntry {
    fn new(kind: ModuleKind, text: &str, version: Version) -> Self {
        ModuleEntry {
            kind,
            text: Arc::from(text),
            version,
            hash: ContentHash::compute(text.as_bytes()),
        }
    }

    fn view(&self, id: &ModuleId) -> ModuleText {
        ModuleText {
            id: id.clone(),
            kind: self.kind,
            text: Arc::clone(&self.text),
            version: self.version,
            hash: self.hash.clone(),
        }
    }
}

// ============================================================================
// Commit Batches
// ============================================================================

/// One change of a [`CommitBatch`].
#[derive(Debug, Clone)]
pub enum BatchChange {
    /// Replace the text of an existing module that must be at `expected`.
    Replace {
        module: ModuleId,
        expected: Version,
        text: String,
    },
    /// Fail the batch unless the module is still at `expected`.
    Verify { module: ModuleId, expected: Version },
    /// Create a module that must not exist yet.
    Create {
        module: ModuleId,
        kind: ModuleKind,
        text: String,
    },
}

impl BatchChange {
    pub fn module(&self) -> &ModuleId {
        match self {
            BatchChange::Replace { module, .. }
            | BatchChange::Verify { module, .. }
            | BatchChange::Create { module, .. } => module,
        }
    }
}

/// A set of changes applied atomically.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub changes: Vec<BatchChange>,
}

impl CommitBatch {
    pub fn new() -> Self {
        CommitBatch::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn with_change(mut self, change: BatchChange) -> Self {
        self.changes.push(change);
        self
    }
}

// ============================================================================
// Module Store
// ============================================================================

#[derive(Debug, Default)]
struct StoreInner {
    modules: BTreeMap<ModuleId, ModuleEntry>,
    references: BTreeMap<String, Vec<LibraryReference>>,
    revision: u64,
}

/// Thread-safe owner of all module text.
#[derive(Debug, Default)]
pub struct ModuleStore {
    inner: RwLock<StoreInner>,
}

impl ModuleStore {
    pub fn new() -> Self {
        ModuleStore::default()
    }

    /// Add a module at [`Version::INITIAL`].
    pub fn add_module(
        &self,
        id: ModuleId,
        kind: ModuleKind,
        text: &str,
    ) -> Result<Version, StoreError> {
        let mut inner = self.inner.write();
        if inner.modules.contains_key(&id) {
            return Err(StoreError::ModuleExists { module: id });
        }
        debug!(module = %id, ?kind, "module added");
        inner
            .modules
            .insert(id, ModuleEntry::new(kind, text, Version::INITIAL));
        inner.revision += 1;
        Ok(Version::INITIAL)
    }

    /// Remove a module.
    pub fn remove_module(&self, id: &ModuleId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.modules.remove(id).is_none() {
            return Err(StoreError::ModuleNotFound { module: id.clone() });
        }
        debug!(module = %id, "module removed");
        inner.revision += 1;
        Ok(())
    }

    /// Replace a module's text unconditionally, returning the new version.
    pub fn replace_text(&self, id: &ModuleId, text: &str) -> Result<Version, StoreError> {
        let mut inner = self.inner.write();
        let entry = inner
            .modules
            .get_mut(id)
            .ok_or_else(|| StoreError::ModuleNotFound { module: id.clone() })?;
        let version = entry.version.next();
        *entry = ModuleEntry::new(entry.kind, text, version);
        debug!(module = %id, %version, "module text replaced");
        inner.revision += 1;
        Ok(version)
    }

    /// Apply every change of `batch` or none of them.
    ///
    /// Returns the new version of each changed module, in batch order.
    /// `Verify` entries are checked but not reported.
    pub fn commit_batch(&self, batch: CommitBatch) -> Result<Vec<(ModuleId, Version)>, StoreError> {
        let mut inner = self.inner.write();

        for change in &batch.changes {
            match change {
                BatchChange::Replace {
                    module, expected, ..
                }
                | BatchChange::Verify { module, expected } => {
                    let entry = inner
                        .modules
                        .get(module)
                        .ok_or_else(|| StoreError::ModuleNotFound {
                            module: module.clone(),
                        })?;
                    if entry.version != *expected {
                        return Err(StoreError::VersionMismatch {
                            module: module.clone(),
                            expected: *expected,
                            actual: entry.version,
                        });
                    }
                }
                BatchChange::Create { module, .. } => {
                    if inner.modules.contains_key(module) {
                        return Err(StoreError::ModuleExists {
                            module: module.clone(),
                        });
                    }
                }
            }
        }

        let mut versions = Vec::with_capacity(batch.changes.len());
        for change in batch.changes {
            match change {
                BatchChange::Replace {
                    module,
                    expected,
                    text,
                } => {
                    let version = expected.next();
                    let kind = inner
                        .modules
                        .get(&module)
                        .map(|e| e.kind)
                        .unwrap_or(ModuleKind::Standard);
                    inner
                        .modules
                        .insert(module.clone(), ModuleEntry::new(kind, &text, version));
                    versions.push((module, version));
                }
                BatchChange::Create { module, kind, text } => {
                    inner
                        .modules
                        .insert(module.clone(), ModuleEntry::new(kind, &text, Version::INITIAL));
                    versions.push((module, Version::INITIAL));
                }
                BatchChange::Verify { .. } => {}
            }
        }
        if !versions.is_empty() {
            inner.revision += 1;
        }
        debug!(modules = versions.len(), "batch committed");
        Ok(versions)
    }

    /// Current view of one module.
    pub fn get(&self, id: &ModuleId) -> Option<ModuleText> {
        self.inner.read().modules.get(id).map(|e| e.view(id))
    }

    /// Current version of one module.
    pub fn version(&self, id: &ModuleId) -> Option<Version> {
        self.inner.read().modules.get(id).map(|e| e.version)
    }

    /// Every module, ordered by id.
    pub fn modules(&self) -> Vec<ModuleText> {
        self.inner
            .read()
            .modules
            .iter()
            .map(|(id, e)| e.view(id))
            .collect()
    }

    /// Current version of every module, ordered by id.
    pub fn versions(&self) -> BTreeMap<ModuleId, Version> {
        self.inner
            .read()
            .modules
            .iter()
            .map(|(id, e)| (id.clone(), e.version))
            .collect()
    }

    /// Find a module by project and case-insensitive name.
    pub fn find(&self, project: &str, name: &str) -> Option<ModuleText> {
        self.inner
            .read()
            .modules
            .iter()
            .find(|(id, _)| id.project == project && id.name_matches(name))
            .map(|(id, e)| e.view(id))
    }

    /// Names of every project with at least one module or reference set.
    pub fn projects(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut projects: Vec<String> = inner
            .modules
            .keys()
            .map(|id| id.project.clone())
            .chain(inner.references.keys().cloned())
            .collect();
        projects.sort();
        projects.dedup();
        projects
    }

    /// The project's library references, ordered by priority.
    pub fn references(&self, project: &str) -> Vec<LibraryReference> {
        self.inner
            .read()
            .references
            .get(project)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace the project's reference set.
    ///
    /// The stored order is priority order; equal priorities keep the given
    /// (registration) order.
    pub fn set_references(&self, project: &str, mut references: Vec<LibraryReference>) {
        references.sort_by_key(|r| r.priority);
        let mut inner = self.inner.write();
        debug!(project, count = references.len(), "library references replaced");
        inner.references.insert(project.to_string(), references);
        inner.revision += 1;
    }

    /// Store-wide mutation counter.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    pub fn len(&self) -> usize {
        self.inner.read().modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> ModuleId {
        ModuleId::new("VBAProject", name)
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn add_starts_at_initial_version() {
            let store = ModuleStore::new();
            let v = store
                .add_module(module("M1"), ModuleKind::Standard, "Sub A()\nEnd Sub\n")
                .unwrap();
            assert_eq!(v, Version::INITIAL);
            assert_eq!(store.version(&module("M1")), Some(Version(1)));
        }

        #[test]
        fn duplicate_add_fails() {
            let store = ModuleStore::new();
            store.add_module(module("M1"), ModuleKind::Standard, "").unwrap();
            let err = store
                .add_module(module("M1"), ModuleKind::Class, "")
                .unwrap_err();
            assert_eq!(err, StoreError::ModuleExists { module: module("M1") });
        }

        #[test]
        fn replace_bumps_version_by_one() {
            let store = ModuleStore::new();
            store.add_module(module("M1"), ModuleKind::Standard, "a").unwrap();
            assert_eq!(store.replace_text(&module("M1"), "b").unwrap(), Version(2));
            assert_eq!(store.replace_text(&module("M1"), "c").unwrap(), Version(3));
            let view = store.get(&module("M1")).unwrap();
            assert_eq!(&*view.text, "c");
            assert_eq!(view.hash, ContentHash::compute(b"c"));
        }

        #[test]
        fn replace_missing_module_fails() {
            let store = ModuleStore::new();
            assert!(matches!(
                store.replace_text(&module("Nope"), "x"),
                Err(StoreError::ModuleNotFound { .. })
            ));
        }

        #[test]
        fn every_mutation_bumps_revision() {
            let store = ModuleStore::new();
            let r0 = store.revision();
            store.add_module(module("M1"), ModuleKind::Standard, "").unwrap();
            store.replace_text(&module("M1"), "x").unwrap();
            store.set_references("VBAProject", vec![LibraryReference::builtin("VBA", 0)]);
            store.remove_module(&module("M1")).unwrap();
            assert_eq!(store.revision(), r0 + 4);
        }

        #[test]
        fn find_is_case_insensitive() {
            let store = ModuleStore::new();
            store.add_module(module("Module1"), ModuleKind::Standard, "").unwrap();
            assert!(store.find("VBAProject", "MODULE1").is_some());
            assert!(store.find("Other", "Module1").is_none());
        }
    }

    mod batch_tests {
        use super::*;

        #[test]
        fn batch_applies_all_changes() {
            let store = ModuleStore::new();
            store.add_module(module("A"), ModuleKind::Standard, "a").unwrap();
            store.add_module(module("B"), ModuleKind::Class, "b").unwrap();

            let batch = CommitBatch::new()
                .with_change(BatchChange::Replace {
                    module: module("A"),
                    expected: Version(1),
                    text: "a2".into(),
                })
                .with_change(BatchChange::Create {
                    module: module("IB"),
                    kind: ModuleKind::Class,
                    text: "i".into(),
                });
            let versions = store.commit_batch(batch).unwrap();
            assert_eq!(
                versions,
                vec![(module("A"), Version(2)), (module("IB"), Version(1))]
            );
            assert_eq!(&*store.get(&module("A")).unwrap().text, "a2");
            assert_eq!(store.get(&module("IB")).unwrap().kind, ModuleKind::Class);
        }

        #[test]
        fn version_mismatch_writes_nothing() {
            let store = ModuleStore::new();
            store.add_module(module("A"), ModuleKind::Standard, "a").unwrap();
            store.add_module(module("B"), ModuleKind::Standard, "b").unwrap();
            store.replace_text(&module("B"), "b2").unwrap();

            let batch = CommitBatch::new()
                .with_change(BatchChange::Replace {
                    module: module("A"),
                    expected: Version(1),
                    text: "changed".into(),
                })
                .with_change(BatchChange::Replace {
                    module: module("B"),
                    expected: Version(1),
                    text: "changed".into(),
                });
            let err = store.commit_batch(batch).unwrap_err();
            assert_eq!(
                err,
                StoreError::VersionMismatch {
                    module: module("B"),
                    expected: Version(1),
                    actual: Version(2),
                }
            );
            assert_eq!(&*store.get(&module("A")).unwrap().text, "a");
            assert_eq!(store.version(&module("A")), Some(Version(1)));
        }

        #[test]
        fn verify_entry_guards_untouched_module() {
            let store = ModuleStore::new();
            store.add_module(module("A"), ModuleKind::Standard, "a").unwrap();
            store.add_module(module("B"), ModuleKind::Standard, "b").unwrap();
            store.replace_text(&module("B"), "b2").unwrap();

            let batch = CommitBatch::new()
                .with_change(BatchChange::Replace {
                    module: module("A"),
                    expected: Version(1),
                    text: "a2".into(),
                })
                .with_change(BatchChange::Verify {
                    module: module("B"),
                    expected: Version(1),
                });
            assert!(matches!(
                store.commit_batch(batch),
                Err(StoreError::VersionMismatch { .. })
            ));
            assert_eq!(&*store.get(&module("A")).unwrap().text, "a");
        }

        #[test]
        fn create_existing_module_fails() {
            let store = ModuleStore::new();
            store.add_module(module("A"), ModuleKind::Standard, "a").unwrap();
            let batch = CommitBatch::new().with_change(BatchChange::Create {
                module: module("A"),
                kind: ModuleKind::Class,
                text: String::new(),
            });
            assert!(matches!(
                store.commit_batch(batch),
                Err(StoreError::ModuleExists { .. })
            ));
        }
    }

    #[test]
    fn references_are_kept_in_priority_order() {
        let store = ModuleStore::new();
        store.set_references(
            "P",
            vec![
                LibraryReference::new("Scripting", "scrrun.dll", 2),
                LibraryReference::builtin("VBA", 0),
                LibraryReference::new("Excel", "excel.exe", 1),
            ],
        );
        let names: Vec<_> = store
            .references("P")
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["VBA", "Excel", "Scripting"]);
        assert_eq!(store.projects(), vec!["P".to_string()]);
    }
}
