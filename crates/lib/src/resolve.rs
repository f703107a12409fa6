//! Version resolution.
//!
//! Collapses the versions requested for one module into the single commit
//! that satisfies every requester. Commit ancestry stands in for a version
//! ordering: a request for an ancestor is satisfied by checking out a
//! descendant, so the resolved version is the most-descendant request.
//!
//! Resolution is a pure reduction over the complete request set and only runs
//! once the whole graph is known. Requests are visited in `(requester, rev)`
//! order so the reported conflict, if any, does not depend on discovery order.
//!
//! Backends that cannot check out arbitrary commits are pinned instead: their
//! resolved version is the head left by fetch, and every request must be that
//! head or one of its ancestors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::module::VersionRequest;
use crate::vcs::{Backend, ModuleType, VcsError};

/// How the requests for a module failed to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictKind {
  /// Two requested commits where neither is an ancestor of the other.
  Divergent {
    left: VersionRequest,
    right: VersionRequest,
    /// Best common ancestor, if the histories share one.
    merge_base: Option<String>,
    /// Commits on each side since the merge base.
    left_ahead: Option<usize>,
    right_ahead: Option<usize>,
  },
  /// A request that the pinned head of a checkout-less module does not contain.
  HeadMismatch { head: String, request: VersionRequest },
  /// Checkout required over uncommitted changes.
  LocalChanges { head: String, resolved: String },
}

/// A module whose requests cannot be satisfied by one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionConflict {
  pub module: String,
  pub conflict: ConflictKind,
  /// Every request for the module, for manual resolution.
  pub requests: Vec<VersionRequest>,
}

impl fmt::Display for VersionConflict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "version conflict in module '{}': ", self.module)?;
    match &self.conflict {
      ConflictKind::Divergent {
        left,
        right,
        merge_base,
        left_ahead,
        right_ahead,
      } => {
        write!(
          f,
          "'{}' requests {} and '{}' requests {}, and neither is an ancestor of the other",
          left.requester, left.rev, right.requester, right.rev
        )?;
        match merge_base {
          Some(base) => {
            write!(f, "\n  histories diverge at {base}")?;
            if let (Some(l), Some(r)) = (left_ahead, right_ahead) {
              write!(f, " ({l} and {r} commits since)")?;
            }
          }
          None => write!(f, "\n  histories share no common ancestor")?,
        }
      }
      ConflictKind::HeadMismatch { head, request } => {
        write!(
          f,
          "'{}' requests {}, which is not contained in the checked out head {head} and the working copy cannot be moved",
          request.requester, request.rev
        )?;
      }
      ConflictKind::LocalChanges { head, resolved } => {
        write!(
          f,
          "working copy at {head} has uncommitted changes but must move to {resolved}; commit or discard them and retry"
        )?;
      }
    }
    write!(f, "\n  requested versions:")?;
    for request in &self.requests {
      write!(f, "\n    {} requests {}", request.requester, request.rev)?;
    }
    Ok(())
  }
}

/// Errors produced while resolving one module.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error(transparent)]
  Vcs(#[from] VcsError),

  #[error("{0}")]
  Conflict(Box<VersionConflict>),
}

/// The outcome of resolving one module, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
  pub module: String,
  pub kind: ModuleType,
  /// Commit the module is synchronized to.
  pub resolved: String,
  /// Every `(requester, identifier)` pair that produced it.
  pub requests: Vec<VersionRequest>,
}

/// Resolve the requests for `module` against its working copy.
pub fn resolve_module(
  module: &str,
  backend: &dyn Backend,
  requests: &BTreeSet<VersionRequest>,
) -> Result<Resolution, ResolveError> {
  let resolved = if backend.supports_checkout() {
    reduce_by_ancestry(module, backend, requests)?
  } else {
    pin_to_head(module, backend, requests)?
  };

  debug!(module, resolved = %resolved, requests = requests.len(), "resolved module");
  Ok(Resolution {
    module: module.to_string(),
    kind: backend.kind(),
    resolved,
    requests: requests.iter().cloned().collect(),
  })
}

/// Resolve each distinct requested identifier once.
fn rev_parse_all<'a>(
  backend: &dyn Backend,
  requests: &'a BTreeSet<VersionRequest>,
) -> Result<Vec<(&'a VersionRequest, String)>, VcsError> {
  let mut ids: BTreeMap<&str, String> = BTreeMap::new();
  let mut resolved = Vec::with_capacity(requests.len());
  for request in requests {
    let id = match ids.get(request.rev.as_str()) {
      Some(id) => id.clone(),
      None => {
        let id = backend.rev_parse(&request.rev)?;
        ids.insert(&request.rev, id.clone());
        id
      }
    };
    resolved.push((request, id));
  }
  Ok(resolved)
}

fn reduce_by_ancestry(
  module: &str,
  backend: &dyn Backend,
  requests: &BTreeSet<VersionRequest>,
) -> Result<String, ResolveError> {
  let revs: BTreeSet<&str> = requests.iter().map(|r| r.rev.as_str()).collect();
  if revs.len() <= 1 {
    let rev = revs.into_iter().next().unwrap_or("HEAD");
    return Ok(backend.rev_parse(rev)?);
  }

  // Distinct commits ordered ancestor first. Each insertion compares against
  // the chain from the descendant end, so the chain stays totally ordered and
  // any incomparable pair surfaces as a conflict.
  let mut chain: Vec<(&VersionRequest, String)> = Vec::new();
  for (request, id) in rev_parse_all(backend, requests)? {
    if chain.iter().any(|(_, known)| *known == id) {
      continue;
    }

    let mut position = 0;
    for index in (0..chain.len()).rev() {
      let (known_request, known) = &chain[index];
      if backend.is_ancestor(known, &id)? {
        trace!(module, ancestor = %known, descendant = %id, "request supersedes");
        position = index + 1;
        break;
      }
      if !backend.is_ancestor(&id, known)? {
        return Err(divergent(module, backend, known_request, known, request, &id, requests));
      }
    }
    chain.insert(position, (request, id));
  }

  chain
    .pop()
    .map(|(_, id)| id)
    .ok_or_else(|| ResolveError::Vcs(backend_unresolved(backend)))
}

fn pin_to_head(module: &str, backend: &dyn Backend, requests: &BTreeSet<VersionRequest>) -> Result<String, ResolveError> {
  let head = backend.head()?;
  for (request, id) in rev_parse_all(backend, requests)? {
    if id != head && !backend.is_ancestor(&id, &head)? {
      return Err(ResolveError::Conflict(Box::new(VersionConflict {
        module: module.to_string(),
        conflict: ConflictKind::HeadMismatch {
          head,
          request: request.clone(),
        },
        requests: requests.iter().cloned().collect(),
      })));
    }
  }
  Ok(head)
}

fn divergent(
  module: &str,
  backend: &dyn Backend,
  left: &VersionRequest,
  left_id: &str,
  right: &VersionRequest,
  right_id: &str,
  requests: &BTreeSet<VersionRequest>,
) -> ResolveError {
  let merge_base = match backend.merge_base(left_id, right_id) {
    Ok(base) => Some(base),
    Err(VcsError::NoCommonAncestor { .. }) => None,
    Err(e) => return ResolveError::Vcs(e),
  };
  let ahead = |head: &str| {
    merge_base
      .as_deref()
      .and_then(|base| backend.commits_between(base, head).ok())
      .map(|commits| commits.len())
  };

  ResolveError::Conflict(Box::new(VersionConflict {
    module: module.to_string(),
    conflict: ConflictKind::Divergent {
      left: left.clone(),
      right: right.clone(),
      left_ahead: ahead(left_id),
      right_ahead: ahead(right_id),
      merge_base,
    },
    requests: requests.iter().cloned().collect(),
  }))
}

fn backend_unresolved(backend: &dyn Backend) -> VcsError {
  VcsError::UnresolvedRef {
    rev: "HEAD".to_string(),
    path: backend.path().to_path_buf(),
  }
}
