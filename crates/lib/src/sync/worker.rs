//! Per-module blocking work and the concurrent wave runner.
//!
//! Each job owns everything it needs, so a wave can run its jobs on blocking
//! workers without touching the graph. Results come back keyed by module name
//! and are folded into the graph by the single driver task.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::types::{ModuleChange, SyncError};
use crate::module::VersionRequest;
use crate::resolve::{ConflictKind, Resolution, ResolveError, VersionConflict, resolve_module};
use crate::vcs::{Backend, ModuleType, VcsError, VcsProvider};

/// Run `work` for every job, at most `semaphore` permits at a time.
///
/// Every job runs to completion; the caller decides what a failure means.
pub(crate) async fn run_wave<J, T>(
  jobs: Vec<(String, J)>,
  semaphore: &Arc<Semaphore>,
  work: fn(J) -> Result<T, SyncError>,
) -> Result<BTreeMap<String, Result<T, SyncError>>, SyncError>
where
  J: Send + 'static,
  T: Send + 'static,
{
  let mut join_set = JoinSet::new();

  for (name, job) in jobs {
    let semaphore = semaphore.clone();
    join_set.spawn(async move {
      let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|e| SyncError::TaskFailed(e.to_string()))?;
      let result = tokio::task::spawn_blocking(move || work(job))
        .await
        .map_err(|e| SyncError::TaskFailed(e.to_string()))?;
      Ok::<_, SyncError>((name, result))
    });
  }

  let mut results = BTreeMap::new();
  while let Some(join_result) = join_set.join_next().await {
    match join_result {
      Ok(Ok((name, result))) => {
        results.insert(name, result);
      }
      Ok(Err(e)) => {
        error!(error = %e, "sync worker failed");
        return Err(e);
      }
      Err(e) => {
        error!(error = %e, "sync task panicked");
        return Err(SyncError::TaskFailed(e.to_string()));
      }
    }
  }
  Ok(results)
}

/// Bring one newly discovered module onto disk.
pub(crate) struct MaterializeJob {
  pub name: String,
  pub kind: ModuleType,
  pub url: String,
  pub path: PathBuf,
  /// First request; a fresh clone is checked out here so its manifest can be read.
  pub initial_rev: String,
  /// Every identifier known to be requested so far.
  pub requested: Vec<String>,
  pub fetch: bool,
  pub provider: Arc<dyn VcsProvider>,
}

pub(crate) struct Materialized {
  pub backend: Arc<dyn Backend>,
  /// Head before this run touched the module; `None` for a fresh clone.
  pub head_before: Option<String>,
}

pub(crate) fn materialize(job: MaterializeJob) -> Result<Materialized, SyncError> {
  if job.path.exists() {
    return refresh(job);
  }

  info!(module = %job.name, url = %job.url, kind = %job.kind, "cloning module");
  let backend = job
    .provider
    .clone_repo(job.kind, &job.url, &job.path)
    .map_err(|e| SyncError::vcs(&job.name, e))?;

  if backend.supports_checkout()
    && let Err(e) = checkout_initial(backend.as_ref(), &job.initial_rev)
  {
    warn!(module = %job.name, path = %job.path.display(), "removing incomplete clone");
    if let Err(remove_err) = std::fs::remove_dir_all(&job.path) {
      warn!(path = %job.path.display(), error = %remove_err, "failed to remove clone");
    }
    return Err(SyncError::vcs(&job.name, e));
  }

  Ok(Materialized {
    backend,
    head_before: None,
  })
}

fn checkout_initial(backend: &dyn Backend, rev: &str) -> Result<(), VcsError> {
  let target = backend.rev_parse(rev)?;
  if backend.head()? != target {
    backend.checkout(&target)?;
  }
  Ok(())
}

/// Reopen an existing working copy and fetch when new history may be needed.
///
/// The working copy is left at its current head; resolution decides where it goes.
fn refresh(job: MaterializeJob) -> Result<Materialized, SyncError> {
  let backend = job
    .provider
    .open(job.kind, &job.path)
    .map_err(|e| SyncError::vcs(&job.name, e))?;
  let head = backend.head().map_err(|e| SyncError::vcs(&job.name, e))?;

  if !job.fetch {
    debug!(module = %job.name, "offline, not fetching");
  } else if !backend.supports_checkout() && contains_all(backend.as_ref(), &head, &job.requested) {
    debug!(module = %job.name, head = %head, "head already contains every request, not fetching");
  } else {
    let fetched = backend.fetch().map_err(|e| SyncError::vcs(&job.name, e))?;
    debug!(module = %job.name, new_history = fetched, "fetched module");
  }

  Ok(Materialized {
    backend,
    head_before: Some(head),
  })
}

/// Whether every rev resolves to `head` or one of its ancestors.
fn contains_all(backend: &dyn Backend, head: &str, revs: &[String]) -> bool {
  revs.iter().all(|rev| match backend.rev_parse(rev) {
    Ok(id) => id == head || backend.is_ancestor(&id, head).unwrap_or(false),
    Err(_) => false,
  })
}

pub(crate) struct ResolveJob {
  pub name: String,
  pub backend: Arc<dyn Backend>,
  pub requests: BTreeSet<VersionRequest>,
}

pub(crate) fn resolve(job: ResolveJob) -> Result<Resolution, SyncError> {
  resolve_module(&job.name, job.backend.as_ref(), &job.requests).map_err(|e| match e {
    ResolveError::Conflict(conflict) => SyncError::VersionConflict(conflict),
    ResolveError::Vcs(source) => SyncError::vcs(&job.name, source),
  })
}

pub(crate) struct CheckoutJob {
  pub name: String,
  pub backend: Arc<dyn Backend>,
  pub resolved: String,
  pub requests: BTreeSet<VersionRequest>,
}

/// Move a module to its resolved version. Returns whether the head moved.
pub(crate) fn checkout(job: CheckoutJob) -> Result<bool, SyncError> {
  let backend = job.backend.as_ref();
  let head = backend.head().map_err(|e| SyncError::vcs(&job.name, e))?;
  if head == job.resolved {
    return Ok(false);
  }
  if !backend.supports_checkout() {
    debug!(module = %job.name, head = %head, "checkout not supported, keeping head");
    return Ok(false);
  }

  if backend.is_dirty().map_err(|e| SyncError::vcs(&job.name, e))? {
    return Err(SyncError::VersionConflict(Box::new(VersionConflict {
      module: job.name,
      conflict: ConflictKind::LocalChanges {
        head,
        resolved: job.resolved,
      },
      requests: job.requests.into_iter().collect(),
    })));
  }

  info!(module = %job.name, from = %head, to = %job.resolved, "checking out");
  backend
    .checkout(&job.resolved)
    .map_err(|e| SyncError::vcs(&job.name, e))?;
  Ok(true)
}

pub(crate) struct DescribeJob {
  pub name: String,
  pub backend: Arc<dyn Backend>,
  pub before: Option<String>,
}

/// Summarize how a module moved; `None` when it did not.
pub(crate) fn describe(job: DescribeJob) -> Result<Option<ModuleChange>, SyncError> {
  let backend = job.backend.as_ref();
  let vcs = |e| SyncError::vcs(&job.name, e);
  let after = backend.head().map_err(vcs)?;
  if job.before.as_deref() == Some(after.as_str()) {
    return Ok(None);
  }

  let mut commits = Vec::new();
  if let Some(before) = &job.before
    && backend.is_ancestor(before, &after).map_err(vcs)?
  {
    for id in backend.commits_between(before, &after).map_err(vcs)? {
      commits.push(backend.commit_info(&id).map_err(vcs)?);
    }
  }

  Ok(Some(ModuleChange {
    module: job.name.clone(),
    before: job.before,
    after,
    commits,
  }))
}
