//! Workspace discovery and the directories weft manages inside it.
//!
//! A workspace is the outermost module of a tree. Its dependencies live in
//! `DEPS/<name>` and build output in `BUILD`; both are owned by weft and must
//! be plain directories.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::{BUILD_DIR_NAME, DEPS_DIR_NAME, MANIFEST_FILENAME, WARNING_FILENAME};

const WARNING_TEXT: &str = "\
This directory is managed by weft.

Every subdirectory is a dependency module checked out by `weft sync`.
Changes made here may be overwritten by the next sync. Commit and push them
from the module's own repository instead.
";

/// Errors that can occur while locating or preparing a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
  #[error("'{}' is not inside a module", .path.display())]
  NotInModule { path: PathBuf },

  #[error("the {name} directory in '{}' must not be a symlink", .root.display())]
  ManagedSymlink { root: PathBuf, name: &'static str },

  #[error("'{}' contains a file named {name}, which overlaps with a directory managed by weft", .root.display())]
  ManagedNotDir { root: PathBuf, name: &'static str },

  #[error("failed to access '{}': {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn is_in_deps_dir(path: &Path) -> bool {
  path
    .parent()
    .and_then(Path::file_name)
    .is_some_and(|name| name == DEPS_DIR_NAME)
}

/// Walk upward from `path` to the root of the enclosing module.
///
/// A module root contains a `MODULE` file or a `.git` directory, or sits
/// directly inside a `DEPS` directory.
pub fn find_module_root(path: &Path) -> Result<PathBuf, WorkspaceError> {
  let mut current = Some(path);
  while let Some(dir) = current {
    if dir.join(MANIFEST_FILENAME).is_file() || dir.join(".git").is_dir() || is_in_deps_dir(dir) {
      return Ok(dir.to_path_buf());
    }
    current = dir.parent();
  }
  Err(WorkspaceError::NotInModule {
    path: path.to_path_buf(),
  })
}

/// The outermost module root enclosing `path`, skipping modules under `DEPS`.
pub fn find_workspace_root(path: &Path) -> Result<PathBuf, WorkspaceError> {
  let mut root = find_module_root(path)?;
  while is_in_deps_dir(&root) {
    // DEPS/<name> -> the module containing DEPS
    let outer = root
      .parent()
      .and_then(Path::parent)
      .ok_or_else(|| WorkspaceError::NotInModule { path: root.clone() })?;
    root = find_module_root(outer)?;
  }
  Ok(root)
}

/// Fail if `BUILD` or `DEPS` exist under `root` as anything but a directory.
pub fn check_managed_dirs(root: &Path) -> Result<(), WorkspaceError> {
  check_managed_dir(root, BUILD_DIR_NAME)?;
  check_managed_dir(root, DEPS_DIR_NAME)
}

fn check_managed_dir(root: &Path, name: &'static str) -> Result<(), WorkspaceError> {
  let dir = root.join(name);
  let meta = match fs::symlink_metadata(&dir) {
    Ok(meta) => meta,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(WorkspaceError::Io { path: dir, source: e }),
  };
  if meta.file_type().is_symlink() {
    return Err(WorkspaceError::ManagedSymlink {
      root: root.to_path_buf(),
      name,
    });
  }
  if !meta.is_dir() {
    return Err(WorkspaceError::ManagedNotDir {
      root: root.to_path_buf(),
      name,
    });
  }
  Ok(())
}

/// Create `DEPS` under `root` and return its path.
///
/// A warning file explaining the directory is written on a best-effort basis.
pub fn ensure_deps_dir(root: &Path) -> Result<PathBuf, WorkspaceError> {
  check_managed_dir(root, DEPS_DIR_NAME)?;
  let deps = root.join(DEPS_DIR_NAME);
  fs::create_dir_all(&deps).map_err(|e| WorkspaceError::Io {
    path: deps.clone(),
    source: e,
  })?;

  let warning = deps.join(WARNING_FILENAME);
  if !warning.exists()
    && let Err(e) = fs::write(&warning, WARNING_TEXT)
  {
    warn!(path = %warning.display(), error = %e, "failed to write warning file");
  }
  Ok(deps)
}

/// Module name to path for the workspace module and every module in `DEPS`.
///
/// This mapping is what downstream build-file generation consumes. The
/// workspace module always maps to `root`, even if `DEPS` holds a directory of
/// the same name.
pub fn module_paths(root: &Path) -> Result<BTreeMap<String, PathBuf>, WorkspaceError> {
  let root_name = module_name(root);
  let mut paths = BTreeMap::new();
  paths.insert(root_name.clone(), root.to_path_buf());

  let deps = root.join(DEPS_DIR_NAME);
  let entries = match fs::read_dir(&deps) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(paths),
    Err(e) => return Err(WorkspaceError::Io { path: deps, source: e }),
  };
  for entry in entries {
    let entry = entry.map_err(|e| WorkspaceError::Io {
      path: deps.clone(),
      source: e,
    })?;
    let path = entry.path();
    let name = entry.file_name().to_string_lossy().into_owned();
    if name == root_name {
      warn!(path = %path.display(), "dependency directory shadows the workspace module, ignoring it");
      continue;
    }
    if path.is_dir() {
      paths.insert(name, path);
    }
  }
  Ok(paths)
}

fn module_name(root: &Path) -> String {
  root
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| root.to_string_lossy().into_owned())
}

/// A located workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
  root: PathBuf,
  name: String,
}

impl Workspace {
  /// Use `root` as the workspace root as-is.
  pub fn open(root: &Path) -> Result<Self, WorkspaceError> {
    let root = dunce::canonicalize(root).map_err(|e| WorkspaceError::Io {
      path: root.to_path_buf(),
      source: e,
    })?;
    debug!(root = %root.display(), "opened workspace");
    Ok(Self {
      name: module_name(&root),
      root,
    })
  }

  /// Locate the workspace enclosing `path`.
  pub fn discover(path: &Path) -> Result<Self, WorkspaceError> {
    let start = dunce::canonicalize(path).map_err(|e| WorkspaceError::Io {
      path: path.to_path_buf(),
      source: e,
    })?;
    Self::open(&find_workspace_root(&start)?)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Name of the workspace module; the requester of its own dependencies.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn deps_dir(&self) -> PathBuf {
    self.root.join(DEPS_DIR_NAME)
  }

  pub fn build_dir(&self) -> PathBuf {
    self.root.join(BUILD_DIR_NAME)
  }
}
