//! Types for workspace synchronization.
//!
//! This module defines the options, error type, and report of a sync run.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::manifest::ManifestError;
use crate::resolve::{Resolution, VersionConflict};
use crate::vcs::{CommitInfo, VcsError};
use crate::workspace::WorkspaceError;

/// Errors that abort a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Workspace(#[from] WorkspaceError),

  #[error(transparent)]
  Manifest(#[from] ManifestError),

  /// A backend operation on one module failed.
  #[error("module '{module}': {source}")]
  Vcs {
    module: String,
    #[source]
    source: VcsError,
  },

  /// The requests for a module cannot be satisfied by one commit.
  #[error("{0}")]
  VersionConflict(Box<VersionConflict>),

  /// A worker task panicked or was cancelled.
  #[error("sync task failed: {0}")]
  TaskFailed(String),

  /// Checkouts kept changing the requested versions.
  #[error("dependency versions did not settle after {rounds} rounds")]
  NotConverged { rounds: usize },
}

impl SyncError {
  pub(crate) fn vcs(module: &str, source: VcsError) -> Self {
    SyncError::Vcs {
      module: module.to_string(),
      source,
    }
  }

  /// The conflict detail, if this run failed on a version conflict.
  pub fn as_conflict(&self) -> Option<&VersionConflict> {
    match self {
      SyncError::VersionConflict(conflict) => Some(conflict),
      _ => None,
    }
  }
}

/// Configuration for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
  /// Maximum number of modules operated on concurrently.
  pub parallelism: usize,

  /// Fetch already materialized modules. Missing modules are cloned either way.
  pub fetch: bool,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      fetch: true,
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// How one module's working copy moved during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleChange {
  pub module: String,
  /// Head before the run; `None` when the module was cloned by this run.
  pub before: Option<String>,
  pub after: String,
  /// Commits gained when the move was a fast-forward, newest first.
  pub commits: Vec<CommitInfo>,
}

impl ModuleChange {
  pub fn is_clone(&self) -> bool {
    self.before.is_none()
  }
}

/// Outcome of a successful sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
  pub workspace: PathBuf,
  /// Module name to working-copy path, including the workspace module.
  pub paths: BTreeMap<String, PathBuf>,
  /// Resolution record per requested module.
  pub resolutions: BTreeMap<String, Resolution>,
  /// Modules whose head moved, in name order.
  pub changes: Vec<ModuleChange>,
  /// Discovery/resolution/checkout rounds it took to settle.
  pub rounds: usize,
}

impl SyncReport {
  pub fn is_unchanged(&self) -> bool {
    self.changes.is_empty()
  }
}
