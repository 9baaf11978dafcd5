//! Project library reference management.
//!
//! [`ReferenceReconciler`] replaces a project's non-built-in references
//! with a user selection; [`library_info_from_path`] describes a library
//! file for that selection.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use ducktail_core::adapter::LanguageAdapter;
use ducktail_core::interaction::MessageSink;
use ducktail_core::state::ParseCoordinator;
use ducktail_core::types::LibraryReference;

use crate::library::LibraryProvider;

/// File extensions worth handing to a [`LibraryProvider`].
pub const LIBRARY_EXTENSIONS: &[&str] = &["olb", "tlb", "dll", "ocx", "exe"];

const ADD_FAILED_CAPTION: &str = "Add reference failed";

/// A library as offered for selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceModel {
    pub name: String,
    pub path: String,
    /// The library was read successfully.
    pub is_loaded: bool,
    /// Reading was attempted and failed.
    pub is_broken: bool,
}

impl ReferenceModel {
    /// A library known only by name.
    pub fn named(name: impl Into<String>) -> Self {
        ReferenceModel {
            name: name.into(),
            path: String::new(),
            is_loaded: false,
            is_broken: false,
        }
    }

    fn to_reference(&self, priority: u32) -> LibraryReference {
        LibraryReference::new(self.name.clone(), self.path.clone(), priority)
    }
}

/// Describe the library at `path`.
///
/// Files without a library extension are not read and come back unloaded;
/// files the provider cannot read come back broken.
pub fn library_info_from_path(provider: &dyn LibraryProvider, path: &Path) -> ReferenceModel {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let mut model = ReferenceModel {
        path: path.display().to_string(),
        ..ReferenceModel::named(stem)
    };
    let is_library = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| LIBRARY_EXTENSIONS.iter().any(|l| l.eq_ignore_ascii_case(ext)));
    if !is_library {
        return model;
    }
    match provider.load_path(path) {
        Ok(library) => {
            model.name = library.name;
            model.is_loaded = true;
        }
        Err(e) => {
            warn!(path = %model.path, error = %e, "library could not be read");
            model.is_broken = true;
        }
    }
    model
}

/// Applies a reference selection to one project.
pub struct ReferenceReconciler<'a, A: LanguageAdapter> {
    coordinator: &'a ParseCoordinator<A>,
    provider: &'a dyn LibraryProvider,
    messages: &'a dyn MessageSink,
}

impl<'a, A: LanguageAdapter> ReferenceReconciler<'a, A> {
    pub fn new(
        coordinator: &'a ParseCoordinator<A>,
        provider: &'a dyn LibraryProvider,
        messages: &'a dyn MessageSink,
    ) -> Self {
        ReferenceReconciler {
            coordinator,
            provider,
            messages,
        }
    }

    /// Replace `project`'s non-built-in references with `selected`, in
    /// order, and request a reparse.
    ///
    /// Built-in references stay. Selections that fail to load are reported
    /// through the message sink and left out. Returns the stored set.
    pub fn reconcile(&self, project: &str, selected: &[ReferenceModel]) -> Vec<LibraryReference> {
        let current = self.coordinator.store().references(project);
        let removed = current.iter().filter(|r| !r.is_builtin).count();
        let mut references: Vec<LibraryReference> =
            current.into_iter().filter(|r| r.is_builtin).collect();
        // The resolver always has VBA at priority 0.
        let first = references.iter().map(|r| r.priority + 1).max().unwrap_or(1);

        let mut added = 0u32;
        for model in selected {
            if references.iter().any(|r| r.name.eq_ignore_ascii_case(&model.name)) {
                continue;
            }
            let reference = model.to_reference(first + added);
            match self.provider.load(&reference) {
                Ok(_) => {
                    references.push(reference);
                    added += 1;
                }
                Err(e) => {
                    warn!(project, library = %model.name, error = %e, "reference not added");
                    self.messages.notify_warn(&e.to_string(), ADD_FAILED_CAPTION);
                }
            }
        }

        info!(project, removed, added, "references reconciled");
        self.coordinator
            .on_references_changed(project, references.clone());
        self.coordinator.store().references(project)
    }
}
