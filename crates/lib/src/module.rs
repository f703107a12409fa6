//! The module record: one dependency entry in the graph.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::vcs::ModuleType;

/// Derive a module name from its source URL.
///
/// The name is the last path segment with any trailing `.git` removed, so
/// `https://example.com/org/lib.git`, `git@example.com:org/lib` and
/// `/srv/repos/lib/` all name `lib`. Returns `None` when nothing usable is left.
pub fn name_from_url(url: &str) -> Option<String> {
  let trimmed = url.trim().trim_end_matches('/');
  let last = trimmed.rsplit(['/', ':', '\\']).next().unwrap_or(trimmed);
  let name = last.strip_suffix(".git").unwrap_or(last);
  if name.is_empty() || name == "." || name == ".." {
    None
  } else {
    Some(name.to_string())
  }
}

/// Lifecycle of a module within one sync run.
///
/// `Pending -> Materializing -> Materialized -> Resolved -> Synced`, with
/// `Failed` reachable from any step. A later discovery round moves `Synced`
/// modules back to `Materialized` so they are resolved again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
  Pending,
  Materializing,
  Materialized,
  Resolved,
  Synced,
  Failed,
}

impl fmt::Display for ModuleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ModuleState::Pending => "pending",
      ModuleState::Materializing => "materializing",
      ModuleState::Materialized => "materialized",
      ModuleState::Resolved => "resolved",
      ModuleState::Synced => "synced",
      ModuleState::Failed => "failed",
    };
    f.write_str(s)
  }
}

/// A version requested for a module, and who asked for it.
///
/// Ordered by requester first, so iterating a request set is deterministic and
/// independent of discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VersionRequest {
  pub requester: String,
  pub rev: String,
}

impl VersionRequest {
  pub fn new(requester: &str, rev: &str) -> Self {
    Self {
      requester: requester.to_string(),
      rev: rev.to_string(),
    }
  }
}

impl fmt::Display for VersionRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} requests {}", self.requester, self.rev)
  }
}

/// One module in the dependency graph.
#[derive(Debug, Clone, Serialize)]
pub struct Module {
  pub name: String,
  pub url: String,
  pub kind: ModuleType,
  /// Working-copy location, a pure function of the name.
  pub path: PathBuf,
  pub state: ModuleState,
  /// The version chosen for this module once resolution has run.
  pub resolved: Option<String>,
  pub requests: BTreeSet<VersionRequest>,
  /// The first version ever requested; used to materialize the module before
  /// the rest of the graph is known.
  pub initial_rev: String,
}

impl Module {
  /// Create a pending module carrying its first request.
  pub fn pending(name: &str, url: &str, kind: ModuleType, deps_dir: &Path, request: VersionRequest) -> Self {
    let initial_rev = request.rev.clone();
    Self {
      name: name.to_string(),
      url: url.to_string(),
      kind,
      path: module_path(deps_dir, name),
      state: ModuleState::Pending,
      resolved: None,
      requests: BTreeSet::from([request]),
      initial_rev,
    }
  }

  /// Replace every request made by `requester` with `request`.
  ///
  /// Returns whether the request set changed.
  pub fn merge_request(&mut self, request: VersionRequest) -> bool {
    if self.requests.contains(&request) {
      return false;
    }
    self.requests.retain(|r| r.requester != request.requester);
    self.requests.insert(request);
    true
  }

  /// Drop every request made by `requester`. Returns whether anything was removed.
  pub fn withdraw_requests(&mut self, requester: &str) -> bool {
    let before = self.requests.len();
    self.requests.retain(|r| r.requester != requester);
    before != self.requests.len()
  }

  /// Distinct requested identifiers.
  pub fn requested_revs(&self) -> BTreeSet<&str> {
    self.requests.iter().map(|r| r.rev.as_str()).collect()
  }
}

/// Working-copy path of the module `name` under `deps_dir`.
pub fn module_path(deps_dir: &Path, name: &str) -> PathBuf {
  deps_dir.join(name)
}
