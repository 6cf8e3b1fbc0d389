//! Where mock scripts come from.
//!
//! A [`MockSource`] yields a [`SourceTree`]: a flat list of script files with
//! their path components relative to the mocks root. The route table is built
//! from the tree only, so tests can assemble trees in memory.

use crate::errors::LoadError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extension of mock scripts.
pub const SCRIPT_EXTENSION: &str = "js";

/// One script file of a mocks tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path components relative to the mocks root, file name last.
    pub components: Vec<String>,
    pub contents: Arc<str>,
}

impl SourceFile {
    /// `/`-separated relative path, used in diagnostics and route listings.
    pub fn display_path(&self) -> String {
        self.components.join("/")
    }
}

/// Snapshot of a mocks tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTree {
    files: Vec<SourceFile>,
}

impl SourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file at a `/`-separated relative path.
    pub fn insert(&mut self, relative: &str, contents: impl Into<String>) -> &mut Self {
        let components = relative
            .split('/')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        self.files.push(SourceFile {
            components,
            contents: Arc::from(contents.into()),
        });
        self
    }

    /// Builder-style [`SourceTree::insert`].
    pub fn with_file(mut self, relative: &str, contents: impl Into<String>) -> Self {
        self.insert(relative, contents);
        self
    }

    /// Read every `*.js` file below `root`. Directories are walked in name
    /// order; symlinked directories are not followed.
    pub fn from_dir(root: &Path) -> Result<Self, LoadError> {
        if !root.is_dir() {
            return Err(LoadError::MissingRoot(root.to_path_buf()));
        }
        let mut tree = SourceTree::new();
        collect_scripts(root, &mut Vec::new(), &mut tree)?;
        Ok(tree)
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LoadError + '_ {
    move |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn collect_scripts(
    dir: &Path,
    prefix: &mut Vec<String>,
    tree: &mut SourceTree,
) -> Result<(), LoadError> {
    let mut entries = std::fs::read_dir(dir)
        .map_err(io_error(dir))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(dir))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!(path = %path.display(), "Skipping non UTF-8 file name");
            continue;
        };
        let file_type = entry.file_type().map_err(io_error(&path))?;

        if file_type.is_dir() {
            prefix.push(name);
            collect_scripts(&path, prefix, tree)?;
            prefix.pop();
        } else if path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION) {
            let bytes = std::fs::read(&path).map_err(io_error(&path))?;
            let mut components = prefix.clone();
            components.push(name);
            let contents = String::from_utf8(bytes).map_err(|_| LoadError::NotUtf8 {
                path: components.join("/"),
            })?;
            tree.files.push(SourceFile {
                components,
                contents: Arc::from(contents),
            });
        }
    }
    Ok(())
}

/// Provider of mock trees, consulted on startup and on every reload.
pub trait MockSource: Send + Sync {
    fn load(&self) -> Result<SourceTree, LoadError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Mocks read from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl MockSource for DirectorySource {
    fn load(&self) -> Result<SourceTree, LoadError> {
        SourceTree::from_dir(&self.root)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

impl MockSource for SourceTree {
    fn load(&self) -> Result<SourceTree, LoadError> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory tree ({} files)", self.files.len())
    }
}
