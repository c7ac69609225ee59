//! Tool directory loader.
//!
//! Every top-level `*.toml` file in the tools directory is a module declaring
//! one or more tools. Modules load in file-name order and each one is parsed
//! in isolation: a module that fails to parse or validate is reported as a
//! [`LoadDiagnostic`] and skipped, never aborting the scan. A tool whose name
//! was already taken by an earlier declaration is rejected individually and
//! the first declaration wins.
//!
//! Loading is free of side effects: no process is spawned and no tool is
//! invoked until a request arrives.

mod command;
mod manifest;
mod template;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::descriptor::ToolDescriptor;

pub use command::CommandTool;
pub use template::TemplateTool;

const MODULE_EXTENSION: &str = "toml";

/// Scans a tools directory and produces descriptors plus diagnostics.
#[derive(Debug, Clone)]
pub struct ToolLoader {
    directory: PathBuf,
}

impl ToolLoader {
    /// Creates a loader for `directory`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Returns the directory being scanned.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Loads every module in the directory.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the directory itself is missing, not a
    /// directory, or unreadable. Failures inside individual modules are
    /// reported through [`LoadReport::diagnostics`] instead.
    pub fn load(&self) -> Result<LoadReport, LoadError> {
        let dir = &self.directory;
        info!(path = %dir.display(), "scanning tools directory");

        let metadata = std::fs::metadata(dir).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                LoadError::NotFound { path: dir.clone() }
            } else {
                LoadError::Unreadable {
                    path: dir.clone(),
                    source,
                }
            }
        })?;
        if !metadata.is_dir() {
            return Err(LoadError::NotADirectory { path: dir.clone() });
        }

        let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Unreadable {
            path: dir.clone(),
            source,
        })?;

        let mut modules = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "failed to read directory entry, skipping");
                    continue;
                }
            };
            let path = entry.path();
            if is_module(&path) {
                modules.push(path);
            } else {
                debug!(path = %path.display(), "ignoring non-module entry");
            }
        }
        modules.sort();

        let mut report = LoadReport {
            descriptors: Vec::new(),
            diagnostics: Vec::new(),
            modules_scanned: modules.len(),
        };
        let mut owners: HashMap<String, PathBuf> = HashMap::new();

        for module in modules {
            let descriptors = match manifest::load_module(&module) {
                Ok(descriptors) => descriptors,
                Err(failure) => {
                    warn!(module = %module.display(), error = %failure, "skipping tool module");
                    report
                        .diagnostics
                        .push(LoadDiagnostic::new(module, None, failure));
                    continue;
                }
            };

            for descriptor in descriptors {
                let name = descriptor.name().as_str().to_owned();
                if let Some(owner) = owners.get(&name) {
                    warn!(
                        tool = %name,
                        module = %module.display(),
                        first = %owner.display(),
                        "duplicate tool name rejected"
                    );
                    report.diagnostics.push(LoadDiagnostic::new(
                        module.clone(),
                        Some(name.clone()),
                        LoadFailure::DuplicateName { name },
                    ));
                    continue;
                }
                debug!(tool = %name, module = %module.display(), "tool registered");
                owners.insert(name, module.clone());
                report.descriptors.push(descriptor);
            }
        }

        info!(
            modules = report.modules_scanned,
            tools = report.descriptors.len(),
            diagnostics = report.diagnostics.len(),
            "tool loading complete"
        );
        Ok(report)
    }
}

fn is_module(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_none_or(|name| name.starts_with('.'));
    !hidden
        && path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MODULE_EXTENSION))
}

/// Outcome of a directory scan.
#[derive(Debug)]
pub struct LoadReport {
    descriptors: Vec<ToolDescriptor>,
    diagnostics: Vec<LoadDiagnostic>,
    modules_scanned: usize,
}

impl LoadReport {
    /// Descriptors that loaded successfully, in registration order.
    #[must_use]
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Per-module failures.
    #[must_use]
    pub fn diagnostics(&self) -> &[LoadDiagnostic] {
        &self.diagnostics
    }

    /// Number of candidate module files examined.
    #[must_use]
    pub const fn modules_scanned(&self) -> usize {
        self.modules_scanned
    }

    /// Splits the report into descriptors and diagnostics.
    #[must_use]
    pub fn into_parts(self) -> (Vec<ToolDescriptor>, Vec<LoadDiagnostic>) {
        (self.descriptors, self.diagnostics)
    }
}

/// A module, or one tool inside it, that could not be loaded.
#[derive(Debug, Error)]
#[error("{}: {failure}", module.display())]
pub struct LoadDiagnostic {
    module: PathBuf,
    tool: Option<String>,
    #[source]
    failure: LoadFailure,
}

impl LoadDiagnostic {
    /// Creates a diagnostic.
    #[must_use]
    pub fn new(module: PathBuf, tool: Option<String>, failure: LoadFailure) -> Self {
        Self {
            module,
            tool,
            failure,
        }
    }

    /// Module the failure belongs to.
    #[must_use]
    pub fn module(&self) -> &Path {
        &self.module
    }

    /// Tool the failure concerns, when it is narrower than the whole module.
    #[must_use]
    pub fn tool(&self) -> Option<&str> {
        self.tool.as_deref()
    }

    /// What went wrong.
    #[must_use]
    pub fn failure(&self) -> &LoadFailure {
        &self.failure
    }
}

/// Reasons a module or tool is rejected during loading.
#[derive(Debug, Error)]
pub enum LoadFailure {
    /// Module file could not be read.
    #[error("failed to read module: {0}")]
    Io(#[from] io::Error),

    /// Module is not valid manifest TOML.
    #[error("failed to parse module: {0}")]
    Parse(#[from] toml::de::Error),

    /// Module parsed but declares nothing.
    #[error("module declares no tools")]
    NoTools,

    /// A tool declaration is malformed.
    #[error("invalid tool `{tool}`: {reason}")]
    InvalidTool {
        /// Declared tool name.
        tool: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Tool name already registered by an earlier declaration.
    #[error("tool `{name}` is already registered")]
    DuplicateName {
        /// Colliding name.
        name: String,
    },
}

/// The tools directory itself could not be used.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Directory does not exist.
    #[error("tools directory `{}` does not exist", path.display())]
    NotFound {
        /// Configured path.
        path: PathBuf,
    },

    /// Path exists but is not a directory.
    #[error("tools path `{}` is not a directory", path.display())]
    NotADirectory {
        /// Configured path.
        path: PathBuf,
    },

    /// Directory could not be listed.
    #[error("tools directory `{}` is unreadable: {source}", path.display())]
    Unreadable {
        /// Configured path.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },
}
