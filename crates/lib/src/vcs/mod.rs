//! Version-control backends.
//!
//! Every module's working copy is driven through the [`Backend`] trait, which
//! exposes one uniform operation set regardless of the underlying tool:
//!
//! - [`git`] - mutable-checkout backend driving the `git` CLI
//! - [`jj`] - immutable-change backend driving the `jj` CLI (history queries go
//!   through the backing git repository)
//! - `memory` - in-memory backend with canned histories, for deterministic tests
//!   (built for tests and under the `test-support` feature)
//!
//! Operations a backend cannot perform return [`VcsError::Unsupported`] rather
//! than being absent, so the engine stays backend-agnostic and decides for
//! itself where an unsupported operation can be routed around.

mod command;
pub mod git;
pub mod jj;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use git::GitBackend;
pub use jj::JujutsuBackend;

/// The kind of version-control system backing a module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
  /// A git working copy that can be moved to any commit.
  #[default]
  Git,
  /// A Jujutsu working copy. Arbitrary checkout is not supported.
  #[serde(alias = "jujutsu")]
  Jj,
}

impl ModuleType {
  pub fn as_str(self) -> &'static str {
    match self {
      ModuleType::Git => "git",
      ModuleType::Jj => "jj",
    }
  }

  /// Whether working copies of this type can be moved with [`Backend::checkout`].
  pub fn supports_checkout(self) -> bool {
    matches!(self, ModuleType::Git)
  }
}

impl fmt::Display for ModuleType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Errors produced by backend operations.
#[derive(Debug, Error)]
pub enum VcsError {
  /// Filesystem or process-spawn failure.
  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },

  /// A subprocess exited with a nonzero status.
  #[error("command '{command}' failed{}:\n{stderr}", .code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
  Subprocess {
    command: String,
    code: Option<i32>,
    stderr: String,
  },

  /// A reference could not be resolved to a commit.
  #[error("cannot resolve '{rev}' in {}", .path.display())]
  UnresolvedRef { rev: String, path: PathBuf },

  /// Two commits share no history.
  #[error("'{left}' and '{right}' have no common ancestor")]
  NoCommonAncestor { left: String, right: String },

  /// The backend does not implement this operation.
  #[error("{backend} working copies do not support {operation}")]
  Unsupported {
    backend: ModuleType,
    operation: &'static str,
  },
}

impl VcsError {
  pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
    VcsError::Io {
      context: context.into(),
      source,
    }
  }

  /// Whether this error only reports a missing capability.
  pub fn is_unsupported(&self) -> bool {
    matches!(self, VcsError::Unsupported { .. })
  }
}

/// Metadata about a single commit, used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
  pub id: String,
  pub author: String,
  pub title: String,
}

/// Uniform operations over one working copy.
///
/// All operations block; callers that need concurrency run them on a blocking
/// worker. Identifiers returned by [`head`](Backend::head) and
/// [`rev_parse`](Backend::rev_parse) are full commit ids and can be compared
/// for equality.
pub trait Backend: Send + Sync + fmt::Debug {
  /// The kind of system backing this working copy.
  fn kind(&self) -> ModuleType;

  /// Root of the working copy.
  fn path(&self) -> &Path;

  /// URL of the default remote.
  fn url(&self) -> Result<String, VcsError>;

  /// Commit currently checked out.
  fn head(&self) -> Result<String, VcsError>;

  /// Resolve `rev` to a commit id, failing with [`VcsError::UnresolvedRef`].
  fn rev_parse(&self, rev: &str) -> Result<String, VcsError>;

  /// Whether the working copy has uncommitted changes.
  fn is_dirty(&self) -> Result<bool, VcsError>;

  /// Whether `ancestor` precedes (or equals) `rev` in history.
  fn is_ancestor(&self, ancestor: &str, rev: &str) -> Result<bool, VcsError>;

  /// Fetch from the default remote, reporting whether anything new arrived.
  ///
  /// A dirty working copy is left alone: the fetch is skipped with a warning
  /// and reported as bringing nothing new.
  fn fetch(&self) -> Result<bool, VcsError>;

  /// Move the working copy to `rev`.
  fn checkout(&self, rev: &str) -> Result<(), VcsError>;

  /// Best common ancestor of two commits.
  fn merge_base(&self, left: &str, right: &str) -> Result<String, VcsError>;

  /// Commits reachable from `head` but not from `base`, newest first.
  fn commits_between(&self, base: &str, head: &str) -> Result<Vec<String>, VcsError>;

  /// Author and title of a commit.
  fn commit_info(&self, rev: &str) -> Result<CommitInfo, VcsError>;

  fn supports_checkout(&self) -> bool {
    self.kind().supports_checkout()
  }
}

/// Creates and opens working copies.
///
/// The synchronizer only ever reaches backends through a provider, which is
/// what lets tests substitute the in-memory provider for the real tools.
pub trait VcsProvider: Send + Sync {
  /// Clone `url` into `path`. On failure nothing is left at `path`.
  fn clone_repo(&self, kind: ModuleType, url: &str, path: &Path) -> Result<Arc<dyn Backend>, VcsError>;

  /// Open an existing working copy.
  fn open(&self, kind: ModuleType, path: &Path) -> Result<Arc<dyn Backend>, VcsError>;
}

/// Provider backed by the `git` and `jj` executables on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVcs;

impl VcsProvider for SystemVcs {
  fn clone_repo(&self, kind: ModuleType, url: &str, path: &Path) -> Result<Arc<dyn Backend>, VcsError> {
    match kind {
      ModuleType::Git => Ok(Arc::new(GitBackend::clone_into(url, path)?)),
      ModuleType::Jj => Ok(Arc::new(JujutsuBackend::clone_into(url, path)?)),
    }
  }

  fn open(&self, kind: ModuleType, path: &Path) -> Result<Arc<dyn Backend>, VcsError> {
    match kind {
      ModuleType::Git => Ok(Arc::new(GitBackend::open(path))),
      ModuleType::Jj => Ok(Arc::new(JujutsuBackend::open(path))),
    }
  }
}

/// Create the parent directory of a clone destination.
pub(crate) fn ensure_parent(path: &Path) -> Result<(), VcsError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .map_err(|e| VcsError::io(format!("failed to create directory '{}'", parent.display()), e))?;
  }
  Ok(())
}

/// Remove a partially created working copy so a retry starts clean.
pub(crate) fn remove_partial(path: &Path) {
  if path.exists()
    && let Err(e) = std::fs::remove_dir_all(path)
  {
    tracing::warn!(path = %path.display(), error = %e, "failed to remove partial clone");
  }
}
