//! In-memory backend with canned histories.
//!
//! [`MemoryVcs`] simulates remote repositories as commit graphs held in memory.
//! Working copies are real directories: cloning or checking out a commit writes
//! that commit's files (typically just a `MODULE` manifest) to disk, so the
//! manifest reader and workspace code run unmodified against it. Ancestry,
//! merge-base and range queries are answered from the canned graph.
//!
//! Every mutating operation is recorded and can be inspected with
//! [`MemoryVcs::operations`], which is how tests assert idempotence.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use super::{Backend, CommitInfo, ModuleType, VcsError, VcsProvider};

const DEFAULT_BRANCH: &str = "main";

/// A mutating operation performed through the memory provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
  Clone { url: String, path: PathBuf },
  Fetch { path: PathBuf },
  Checkout { path: PathBuf, rev: String },
}

#[derive(Debug, Clone)]
struct Commit {
  parents: Vec<String>,
  author: String,
  title: String,
  files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
struct History {
  commits: BTreeMap<String, Commit>,
  refs: BTreeMap<String, String>,
}

impl History {
  fn resolve(&self, rev: &str) -> Option<String> {
    if self.commits.contains_key(rev) {
      return Some(rev.to_string());
    }
    let name = rev.strip_prefix("origin/").unwrap_or(rev);
    self.refs.get(name).cloned()
  }

  /// All commits reachable from `id`, including `id`, in breadth-first order.
  fn ancestors(&self, id: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::from([id.to_string()]);
    while let Some(current) = queue.pop_front() {
      if !seen.insert(current.clone()) {
        continue;
      }
      if let Some(commit) = self.commits.get(&current) {
        queue.extend(commit.parents.iter().cloned());
      }
      order.push(current);
    }
    order
  }
}

#[derive(Debug)]
struct WorkingCopy {
  kind: ModuleType,
  url: String,
  head: String,
  history: History,
  dirty: bool,
}

#[derive(Debug, Default)]
struct State {
  remotes: BTreeMap<String, History>,
  copies: BTreeMap<PathBuf, WorkingCopy>,
  failing_clones: BTreeSet<String>,
  operations: Vec<Operation>,
}

/// Provider whose remotes and working copies live in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryVcs {
  state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
  state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryVcs {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a commit to the remote at `url` and move its default branch to it.
  ///
  /// `files` is the complete tree of the commit.
  pub fn commit(&self, url: &str, id: &str, parents: &[&str], files: &[(&str, &str)]) {
    let mut state = lock(&self.state);
    let remote = state.remotes.entry(url.to_string()).or_default();
    remote.commits.insert(
      id.to_string(),
      Commit {
        parents: parents.iter().map(|p| p.to_string()).collect(),
        author: "Test Author".to_string(),
        title: format!("commit {id}"),
        files: files.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
      },
    );
    remote.refs.insert(DEFAULT_BRANCH.to_string(), id.to_string());
  }

  /// Point a named ref on the remote at `id`.
  pub fn set_ref(&self, url: &str, name: &str, id: &str) {
    let mut state = lock(&self.state);
    let remote = state.remotes.entry(url.to_string()).or_default();
    remote.refs.insert(name.to_string(), id.to_string());
  }

  /// Make every clone of `url` fail.
  pub fn fail_clones_of(&self, url: &str) {
    lock(&self.state).failing_clones.insert(url.to_string());
  }

  /// Mark the working copy at `path` as having uncommitted changes.
  pub fn set_dirty(&self, path: &Path, dirty: bool) {
    if let Some(copy) = lock(&self.state).copies.get_mut(path) {
      copy.dirty = dirty;
    }
  }

  /// Head of the working copy at `path`, if one exists.
  pub fn head_of(&self, path: &Path) -> Option<String> {
    lock(&self.state).copies.get(path).map(|copy| copy.head.clone())
  }

  /// Operations performed so far, in order.
  pub fn operations(&self) -> Vec<Operation> {
    lock(&self.state).operations.clone()
  }

  /// Forget recorded operations.
  pub fn clear_operations(&self) {
    lock(&self.state).operations.clear();
  }

  fn backend(&self, kind: ModuleType, path: &Path) -> Arc<dyn Backend> {
    Arc::new(MemoryBackend {
      kind,
      path: path.to_path_buf(),
      state: Arc::clone(&self.state),
    })
  }
}

impl VcsProvider for MemoryVcs {
  fn clone_repo(&self, kind: ModuleType, url: &str, path: &Path) -> Result<Arc<dyn Backend>, VcsError> {
    {
      let mut state = lock(&self.state);
      let remote = match state.remotes.get(url) {
        Some(remote) if !state.failing_clones.contains(url) => remote.clone(),
        _ => {
          return Err(VcsError::Subprocess {
            command: format!("{} clone {}", kind, url),
            code: Some(128),
            stderr: format!("fatal: repository '{url}' not found"),
          });
        }
      };
      let head = remote.refs.get(DEFAULT_BRANCH).cloned().ok_or_else(|| VcsError::UnresolvedRef {
        rev: DEFAULT_BRANCH.to_string(),
        path: path.to_path_buf(),
      })?;

      fs::create_dir_all(path).map_err(|e| VcsError::io(format!("failed to create '{}'", path.display()), e))?;
      write_tree(path, None, &remote, &head)?;

      state.copies.insert(
        path.to_path_buf(),
        WorkingCopy {
          kind,
          url: url.to_string(),
          head,
          history: remote,
          dirty: false,
        },
      );
      state.operations.push(Operation::Clone {
        url: url.to_string(),
        path: path.to_path_buf(),
      });
    }
    Ok(self.backend(kind, path))
  }

  fn open(&self, kind: ModuleType, path: &Path) -> Result<Arc<dyn Backend>, VcsError> {
    if !lock(&self.state).copies.contains_key(path) {
      return Err(VcsError::io(
        format!("failed to open '{}'", path.display()),
        std::io::Error::new(std::io::ErrorKind::NotFound, "no working copy"),
      ));
    }
    Ok(self.backend(kind, path))
  }
}

/// Write the files of `id`, removing files that only existed in `previous`.
fn write_tree(path: &Path, previous: Option<&str>, history: &History, id: &str) -> Result<(), VcsError> {
  let commit = history.commits.get(id).ok_or_else(|| VcsError::UnresolvedRef {
    rev: id.to_string(),
    path: path.to_path_buf(),
  })?;

  if let Some(old) = previous.and_then(|p| history.commits.get(p)) {
    for name in old.files.keys().filter(|name| !commit.files.contains_key(*name)) {
      let file = path.join(name);
      fs::remove_file(&file).map_err(|e| VcsError::io(format!("failed to remove '{}'", file.display()), e))?;
    }
  }

  for (name, content) in &commit.files {
    let file = path.join(name);
    if let Some(parent) = file.parent() {
      fs::create_dir_all(parent).map_err(|e| VcsError::io(format!("failed to create '{}'", parent.display()), e))?;
    }
    fs::write(&file, content).map_err(|e| VcsError::io(format!("failed to write '{}'", file.display()), e))?;
  }
  Ok(())
}

/// A working copy owned by a [`MemoryVcs`].
#[derive(Debug)]
pub struct MemoryBackend {
  kind: ModuleType,
  path: PathBuf,
  state: Arc<Mutex<State>>,
}

impl MemoryBackend {
  fn with_copy<T>(&self, f: impl FnOnce(&mut WorkingCopy) -> Result<T, VcsError>) -> Result<T, VcsError> {
    let mut state = lock(&self.state);
    let copy = state.copies.get_mut(&self.path).ok_or_else(|| {
      VcsError::io(
        format!("failed to open '{}'", self.path.display()),
        std::io::Error::new(std::io::ErrorKind::NotFound, "no working copy"),
      )
    })?;
    f(copy)
  }

  fn unresolved(&self, rev: &str) -> VcsError {
    VcsError::UnresolvedRef {
      rev: rev.to_string(),
      path: self.path.clone(),
    }
  }

  fn resolve_in(&self, copy: &WorkingCopy, rev: &str) -> Result<String, VcsError> {
    if rev == "HEAD" {
      return Ok(copy.head.clone());
    }
    copy.history.resolve(rev).ok_or_else(|| self.unresolved(rev))
  }
}

impl Backend for MemoryBackend {
  fn kind(&self) -> ModuleType {
    self.kind
  }

  fn path(&self) -> &Path {
    &self.path
  }

  fn url(&self) -> Result<String, VcsError> {
    self.with_copy(|copy| Ok(copy.url.clone()))
  }

  fn head(&self) -> Result<String, VcsError> {
    self.with_copy(|copy| Ok(copy.head.clone()))
  }

  fn rev_parse(&self, rev: &str) -> Result<String, VcsError> {
    self.with_copy(|copy| self.resolve_in(copy, rev))
  }

  fn is_dirty(&self) -> Result<bool, VcsError> {
    if self.kind == ModuleType::Jj {
      return Ok(false);
    }
    self.with_copy(|copy| Ok(copy.dirty))
  }

  fn is_ancestor(&self, ancestor: &str, rev: &str) -> Result<bool, VcsError> {
    self.with_copy(|copy| {
      let ancestor = self.resolve_in(copy, ancestor)?;
      let rev = self.resolve_in(copy, rev)?;
      Ok(copy.history.ancestors(&rev).contains(&ancestor))
    })
  }

  fn fetch(&self) -> Result<bool, VcsError> {
    let dirty = self.is_dirty()?;
    if dirty {
      warn!(path = %self.path.display(), "module has uncommitted changes, not fetching");
      return Ok(false);
    }

    let mut state = lock(&self.state);
    let url = match state.copies.get(&self.path) {
      Some(copy) => copy.url.clone(),
      None => return Err(self.unresolved("HEAD")),
    };
    let remote = state.remotes.get(&url).cloned().unwrap_or_default();
    state.operations.push(Operation::Fetch {
      path: self.path.clone(),
    });

    let copy = state.copies.get_mut(&self.path).ok_or_else(|| self.unresolved("HEAD"))?;
    let mut changed = false;
    for (id, commit) in remote.commits {
      if !copy.history.commits.contains_key(&id) {
        copy.history.commits.insert(id, commit);
        changed = true;
      }
    }
    if copy.history.refs != remote.refs {
      copy.history.refs = remote.refs;
      changed = true;
    }
    Ok(changed)
  }

  fn checkout(&self, rev: &str) -> Result<(), VcsError> {
    if !self.kind.supports_checkout() {
      return Err(VcsError::Unsupported {
        backend: self.kind,
        operation: "checkout",
      });
    }

    let mut state = lock(&self.state);
    let copy = state.copies.get_mut(&self.path).ok_or_else(|| self.unresolved(rev))?;
    let target = self.resolve_in(copy, rev)?;
    write_tree(&self.path, Some(&copy.head), &copy.history, &target)?;
    copy.head = target.clone();
    state.operations.push(Operation::Checkout {
      path: self.path.clone(),
      rev: target,
    });
    Ok(())
  }

  fn merge_base(&self, left: &str, right: &str) -> Result<String, VcsError> {
    self.with_copy(|copy| {
      let left_id = self.resolve_in(copy, left)?;
      let right_id = self.resolve_in(copy, right)?;
      let right_ancestors: BTreeSet<String> = copy.history.ancestors(&right_id).into_iter().collect();
      // Breadth-first order from `left` reaches the nearest common ancestor first.
      copy
        .history
        .ancestors(&left_id)
        .into_iter()
        .find(|id| right_ancestors.contains(id))
        .ok_or_else(|| VcsError::NoCommonAncestor {
          left: left.to_string(),
          right: right.to_string(),
        })
    })
  }

  fn commits_between(&self, base: &str, head: &str) -> Result<Vec<String>, VcsError> {
    self.with_copy(|copy| {
      let base_id = self.resolve_in(copy, base)?;
      let head_id = self.resolve_in(copy, head)?;
      let excluded: BTreeSet<String> = copy.history.ancestors(&base_id).into_iter().collect();
      Ok(
        copy
          .history
          .ancestors(&head_id)
          .into_iter()
          .filter(|id| !excluded.contains(id))
          .collect(),
      )
    })
  }

  fn commit_info(&self, rev: &str) -> Result<CommitInfo, VcsError> {
    self.with_copy(|copy| {
      let id = self.resolve_in(copy, rev)?;
      let commit = copy.history.commits.get(&id).ok_or_else(|| self.unresolved(rev))?;
      Ok(CommitInfo {
        id,
        author: commit.author.clone(),
        title: commit.title.clone(),
      })
    })
  }
}
