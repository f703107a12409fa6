//! Mutable-checkout backend driving the `git` CLI.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::command::{git_commit_info, git_commits_between, git_is_ancestor, git_merge_base, git_rev_parse, run};
use super::{Backend, CommitInfo, ModuleType, VcsError, ensure_parent, remove_partial};

const GIT: &str = "git";

/// A module working copy managed by git.
#[derive(Debug, Clone)]
pub struct GitBackend {
  path: PathBuf,
}

impl GitBackend {
  /// Wrap an existing working copy.
  pub fn open(path: &Path) -> Self {
    Self {
      path: path.to_path_buf(),
    }
  }

  /// Clone `url` into `path`.
  ///
  /// On any failure the destination is removed so the clone can be retried.
  pub fn clone_into(url: &str, path: &Path) -> Result<Self, VcsError> {
    info!(url, path = %path.display(), "cloning repository");
    ensure_parent(path)?;

    let dest = path.to_string_lossy();
    if let Err(e) = run(GIT, &["clone", "--quiet", url, &dest], None) {
      remove_partial(path);
      return Err(e);
    }

    Ok(Self::open(path))
  }

  fn git(&self, args: &[&str]) -> Result<String, VcsError> {
    run(GIT, args, Some(&self.path))
  }

  /// Snapshot of every remote-tracking ref and tag, used to detect fetched history.
  fn remote_refs(&self) -> Result<String, VcsError> {
    self.git(&["for-each-ref", "--format=%(objectname) %(refname)", "refs/remotes", "refs/tags"])
  }
}

impl Backend for GitBackend {
  fn kind(&self) -> ModuleType {
    ModuleType::Git
  }

  fn path(&self) -> &Path {
    &self.path
  }

  fn url(&self) -> Result<String, VcsError> {
    self.git(&["config", "--get", "remote.origin.url"])
  }

  fn head(&self) -> Result<String, VcsError> {
    self.rev_parse("HEAD")
  }

  fn rev_parse(&self, rev: &str) -> Result<String, VcsError> {
    git_rev_parse(&self.path, rev, &self.path)
  }

  fn is_dirty(&self) -> Result<bool, VcsError> {
    let status = self.git(&["status", "--porcelain", "--untracked-files=no"])?;
    Ok(!status.trim().is_empty())
  }

  fn is_ancestor(&self, ancestor: &str, rev: &str) -> Result<bool, VcsError> {
    git_is_ancestor(&self.path, ancestor, rev)
  }

  fn fetch(&self) -> Result<bool, VcsError> {
    if self.is_dirty()? {
      warn!(path = %self.path.display(), "module has uncommitted changes, not fetching");
      return Ok(false);
    }

    let before = self.remote_refs()?;
    self.git(&["fetch", "--quiet", "--tags", "origin"])?;
    let after = self.remote_refs()?;
    Ok(before != after)
  }

  fn checkout(&self, rev: &str) -> Result<(), VcsError> {
    info!(path = %self.path.display(), rev, "checking out");
    self.git(&["checkout", "--quiet", "--detach", rev])?;
    Ok(())
  }

  fn merge_base(&self, left: &str, right: &str) -> Result<String, VcsError> {
    git_merge_base(&self.path, left, right)
  }

  fn commits_between(&self, base: &str, head: &str) -> Result<Vec<String>, VcsError> {
    git_commits_between(&self.path, base, head)
  }

  fn commit_info(&self, rev: &str) -> Result<CommitInfo, VcsError> {
    git_commit_info(&self.path, rev, &self.path)
  }
}
