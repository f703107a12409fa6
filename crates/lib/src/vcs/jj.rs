//! Immutable-change backend driving the `jj` CLI.
//!
//! Jujutsu keeps its history in a backing git repository, so history queries
//! (rev-parse, ancestry, merge base, commit metadata) run `git` against that
//! repository while clone and fetch go through `jj`.
//!
//! Two limitations are inherent to the storage model:
//! - there is no notion of uncommitted changes, so [`Backend::is_dirty`] is
//!   always `false`
//! - arbitrary checkout is not supported and fails with
//!   [`VcsError::Unsupported`]; the synchronizer routes around it

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{debug, info};

use super::command::{
  capture, git_commit_info, git_commits_between, git_is_ancestor, git_merge_base, git_rev_parse, into_error, run,
};
use super::{Backend, CommitInfo, ModuleType, VcsError, ensure_parent, remove_partial};

const JJ: &str = "jj";

/// A module working copy managed by Jujutsu.
#[derive(Debug)]
pub struct JujutsuBackend {
  path: PathBuf,
  git_dir: OnceLock<PathBuf>,
}

impl JujutsuBackend {
  /// Wrap an existing working copy.
  pub fn open(path: &Path) -> Self {
    Self {
      path: path.to_path_buf(),
      git_dir: OnceLock::new(),
    }
  }

  /// Clone `url` into `path` with `jj git clone --colocate`.
  ///
  /// Colocation keeps the backing repository's `HEAD` on the working-copy
  /// parent, which is what [`Backend::head`] reports. On any failure the
  /// destination is removed so the clone can be retried.
  pub fn clone_into(url: &str, path: &Path) -> Result<Self, VcsError> {
    info!(url, path = %path.display(), "cloning repository with jj");
    ensure_parent(path)?;

    let dest = path.to_string_lossy();
    if let Err(e) = run(JJ, &["git", "clone", "--colocate", url, &dest], None) {
      remove_partial(path);
      return Err(e);
    }

    Ok(Self::open(path))
  }

  fn jj(&self, args: &[&str]) -> Result<String, VcsError> {
    run(JJ, args, Some(&self.path))
  }

  /// Location of the backing git repository, looked up once.
  fn git_dir(&self) -> Result<&Path, VcsError> {
    if let Some(dir) = self.git_dir.get() {
      return Ok(dir.as_path());
    }
    let root = PathBuf::from(self.jj(&["git", "root"])?.trim());
    debug!(path = %self.path.display(), git_dir = %root.display(), "located backing git repository");
    Ok(self.git_dir.get_or_init(|| root).as_path())
  }

  fn git(&self, args: &[&str]) -> Result<String, VcsError> {
    run("git", args, Some(self.git_dir()?))
  }
}

impl Backend for JujutsuBackend {
  fn kind(&self) -> ModuleType {
    ModuleType::Jj
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
    git_rev_parse(self.git_dir()?, rev, &self.path)
  }

  fn is_dirty(&self) -> Result<bool, VcsError> {
    // Every change in a jj working copy is already a commit.
    Ok(false)
  }

  fn is_ancestor(&self, ancestor: &str, rev: &str) -> Result<bool, VcsError> {
    git_is_ancestor(self.git_dir()?, ancestor, rev)
  }

  fn fetch(&self) -> Result<bool, VcsError> {
    let output = capture(JJ, &["git", "fetch"], Some(&self.path))?;
    if !output.success() {
      return Err(into_error(JJ, &["git", "fetch"], output));
    }
    // jj reports "Nothing changed." on stderr when the fetch brought nothing.
    let report = format!("{}{}", output.stdout, output.stderr);
    Ok(!report.trim().is_empty() && !report.contains("Nothing changed"))
  }

  fn checkout(&self, _rev: &str) -> Result<(), VcsError> {
    Err(VcsError::Unsupported {
      backend: ModuleType::Jj,
      operation: "checkout",
    })
  }

  fn merge_base(&self, left: &str, right: &str) -> Result<String, VcsError> {
    git_merge_base(self.git_dir()?, left, right)
  }

  fn commits_between(&self, base: &str, head: &str) -> Result<Vec<String>, VcsError> {
    git_commits_between(self.git_dir()?, base, head)
  }

  fn commit_info(&self, rev: &str) -> Result<CommitInfo, VcsError> {
    git_commit_info(self.git_dir()?, rev, &self.path)
  }
}
