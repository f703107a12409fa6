//! Shared helpers for sync integration tests.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use weft_lib::consts::{DEPS_DIR_NAME, MANIFEST_FILENAME};
use weft_lib::manifest::{DependencyDecl, Manifest};
use weft_lib::sync::{SyncError, SyncOptions, SyncReport, sync_workspace};
use weft_lib::vcs::ModuleType;
use weft_lib::vcs::memory::{MemoryVcs, Operation};
use weft_lib::workspace::Workspace;

/// URL of the in-memory remote for `name`.
pub fn url(name: &str) -> String {
  format!("mem://{name}")
}

/// A git dependency on `name` at `rev`.
pub fn dep(name: &str, rev: &str) -> DependencyDecl {
  DependencyDecl::new(&url(name), rev)
}

/// A Jujutsu dependency on `name` at `rev`.
pub fn jj_dep(name: &str, rev: &str) -> DependencyDecl {
  dep(name, rev).with_kind(ModuleType::Jj)
}

/// Manifest YAML declaring `deps`.
pub fn manifest(deps: Vec<DependencyDecl>) -> String {
  deps
    .into_iter()
    .fold(Manifest::new(), Manifest::with_dependency)
    .to_yaml()
    .unwrap()
}

/// A workspace module named `app` in a temp directory, backed by a memory provider.
pub struct TestWorkspace {
  pub temp: TempDir,
  pub root: PathBuf,
  pub vcs: MemoryVcs,
}

impl TestWorkspace {
  pub fn new() -> Self {
    Self::named("app")
  }

  pub fn named(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join(name);
    std::fs::create_dir_all(&root).unwrap();
    let root = dunce::canonicalize(&root).unwrap();
    Self {
      temp,
      root,
      vcs: MemoryVcs::new(),
    }
  }

  /// Declare the workspace module's own dependencies.
  pub fn require(&self, deps: Vec<DependencyDecl>) {
    std::fs::write(self.root.join(MANIFEST_FILENAME), manifest(deps)).unwrap();
  }

  /// Add a commit to the remote `name` whose manifest declares `deps`.
  pub fn publish(&self, name: &str, id: &str, parents: &[&str], deps: Vec<DependencyDecl>) {
    let content = manifest(deps);
    self
      .vcs
      .commit(&url(name), id, parents, &[(MANIFEST_FILENAME, content.as_str())]);
  }

  pub fn module_path(&self, name: &str) -> PathBuf {
    self.root.join(DEPS_DIR_NAME).join(name)
  }

  pub fn head(&self, name: &str) -> Option<String> {
    self.vcs.head_of(&self.module_path(name))
  }

  pub async fn sync(&self) -> Result<SyncReport, SyncError> {
    let workspace = Workspace::open(&self.root).unwrap();
    let options = SyncOptions {
      parallelism: 4,
      fetch: true,
    };
    sync_workspace(&workspace, Arc::new(self.vcs.clone()), &options).await
  }

  /// Number of clones recorded into `name`'s working copy.
  pub fn clones_of(&self, name: &str) -> usize {
    let path = self.module_path(name);
    self
      .vcs
      .operations()
      .iter()
      .filter(|op| matches!(op, Operation::Clone { path: p, .. } if *p == path))
      .count()
  }
}
