//! Workspace synchronization.
//!
//! A sync run brings every module in the workspace's dependency tree to the
//! version that satisfies all of its requesters. It proceeds in explicit
//! phases, each finishing before the next starts:
//!
//! 1. **Discover**: materialize pending modules in concurrent waves (clone, or
//!    reopen and fetch) and absorb each new manifest into the graph, until no
//!    module is pending.
//! 2. **Resolve**: collapse every module's requests into one commit.
//! 3. **Checkout**: move each module whose head differs from its resolution.
//!
//! A checkout can change the manifest a module declares, so manifests of
//! moved modules are read again; if that changes any request the phases run
//! another round. Any error aborts the run; working copies already on disk are
//! left as they are.

pub mod types;
mod worker;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::consts::MAX_SYNC_ROUNDS;
use crate::graph::{Absorbed, DependencyGraph};
use crate::manifest::Manifest;
use crate::module::ModuleState;
use crate::resolve::Resolution;
use crate::vcs::{Backend, SystemVcs, VcsProvider};
use crate::workspace::{Workspace, check_managed_dirs, ensure_deps_dir};

pub use types::{ModuleChange, SyncError, SyncOptions, SyncReport};

use worker::{CheckoutJob, DescribeJob, MaterializeJob, ResolveJob, run_wave};

/// Synchronize `workspace` using the `git` and `jj` executables.
pub async fn sync(workspace: &Workspace, options: &SyncOptions) -> Result<SyncReport, SyncError> {
  sync_workspace(workspace, Arc::new(SystemVcs), options).await
}

/// Synchronize `workspace`, reaching working copies through `provider`.
pub async fn sync_workspace(
  workspace: &Workspace,
  provider: Arc<dyn VcsProvider>,
  options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
  let root = workspace.root();
  check_managed_dirs(root)?;
  let deps_dir = ensure_deps_dir(root)?;
  let manifest = Manifest::load(root)?;

  info!(
    workspace = %root.display(),
    dependencies = manifest.dependencies.len(),
    parallelism = options.parallelism,
    "starting sync"
  );

  let mut run = SyncRun {
    root: root.to_path_buf(),
    provider,
    fetch: options.fetch,
    semaphore: Arc::new(Semaphore::new(options.parallelism.max(1))),
    graph: DependencyGraph::new(workspace.name(), &deps_dir),
    backends: BTreeMap::new(),
    heads_before: BTreeMap::new(),
  };
  run.graph.absorb(workspace.name(), &manifest);

  for round in 1..=MAX_SYNC_ROUNDS {
    debug!(round, "sync round");
    run.discover().await?;

    let orphans = run.graph.release_orphans();
    if !orphans.is_empty() {
      info!(modules = ?orphans, "modules are no longer requested and are left as they are");
    }

    let resolutions = run.resolve().await?;
    let moved = run.checkout(&resolutions).await?;

    if !run.reabsorb(&moved)? {
      return run.finish(resolutions, round).await;
    }

    info!(round, "checkout changed requested versions, syncing again");
    for name in run.graph.in_state(ModuleState::Synced) {
      run.graph.set_state(&name, ModuleState::Materialized);
    }
  }

  error!(rounds = MAX_SYNC_ROUNDS, "dependency versions did not settle");
  Err(SyncError::NotConverged {
    rounds: MAX_SYNC_ROUNDS,
  })
}

/// State owned by one sync run and discarded when it ends.
struct SyncRun {
  root: PathBuf,
  provider: Arc<dyn VcsProvider>,
  fetch: bool,
  semaphore: Arc<Semaphore>,
  graph: DependencyGraph,
  backends: BTreeMap<String, Arc<dyn Backend>>,
  /// Head of each module before this run; `None` for modules it cloned.
  heads_before: BTreeMap<String, Option<String>>,
}

impl SyncRun {
  fn backend(&self, name: &str) -> Result<Arc<dyn Backend>, SyncError> {
    self
      .backends
      .get(name)
      .cloned()
      .ok_or_else(|| SyncError::TaskFailed(format!("module '{name}' was never materialized")))
  }

  /// Materialize pending modules wave by wave until none is left.
  async fn discover(&mut self) -> Result<(), SyncError> {
    loop {
      let pending = self.graph.in_state(ModuleState::Pending);
      if pending.is_empty() {
        return Ok(());
      }
      debug!(modules = pending.len(), "materializing wave");

      let mut jobs = Vec::with_capacity(pending.len());
      for name in &pending {
        let Some(module) = self.graph.get(name) else {
          continue;
        };
        let job = MaterializeJob {
          name: module.name.clone(),
          kind: module.kind,
          url: module.url.clone(),
          path: module.path.clone(),
          initial_rev: module.initial_rev.clone(),
          requested: module.requested_revs().into_iter().map(str::to_string).collect(),
          fetch: self.fetch,
          provider: self.provider.clone(),
        };
        jobs.push((name.clone(), job));
        self.graph.set_state(name, ModuleState::Materializing);
      }

      let results = run_wave(jobs, &self.semaphore, worker::materialize).await?;

      let mut ready = Vec::new();
      let mut first_error = None;
      for (name, result) in results {
        match result {
          Ok(done) => {
            self.backends.insert(name.clone(), done.backend);
            self.heads_before.insert(name.clone(), done.head_before);
            self.graph.set_state(&name, ModuleState::Materialized);
            ready.push(name);
          }
          Err(e) => {
            error!(module = %name, error = %e, "failed to materialize module");
            self.graph.set_state(&name, ModuleState::Failed);
            first_error.get_or_insert(e);
          }
        }
      }
      if let Some(e) = first_error {
        return Err(e);
      }

      // Single writer: manifests are merged in name order after the wave.
      for name in ready {
        self.absorb_manifest(&name)?;
      }
    }
  }

  fn absorb_manifest(&mut self, name: &str) -> Result<Absorbed, SyncError> {
    let Some(module) = self.graph.get(name) else {
      return Ok(Absorbed::default());
    };
    let manifest = Manifest::load(&module.path)?;
    Ok(self.graph.absorb(name, &manifest))
  }

  /// Resolve every requested module.
  async fn resolve(&mut self) -> Result<BTreeMap<String, Resolution>, SyncError> {
    let mut jobs = Vec::new();
    for module in self.graph.modules() {
      if module.requests.is_empty() || module.state != ModuleState::Materialized {
        continue;
      }
      let job = ResolveJob {
        name: module.name.clone(),
        backend: self.backend(&module.name)?,
        requests: module.requests.clone(),
      };
      jobs.push((module.name.clone(), job));
    }

    let results = run_wave(jobs, &self.semaphore, worker::resolve).await?;

    let mut resolutions = BTreeMap::new();
    let mut first_error = None;
    for (name, result) in results {
      match result {
        Ok(resolution) => {
          if let Some(module) = self.graph.get_mut(&name) {
            module.resolved = Some(resolution.resolved.clone());
          }
          self.graph.set_state(&name, ModuleState::Resolved);
          resolutions.insert(name, resolution);
        }
        Err(e) => {
          error!(module = %name, "failed to resolve module");
          self.graph.set_state(&name, ModuleState::Failed);
          first_error.get_or_insert(e);
        }
      }
    }
    match first_error {
      Some(e) => Err(e),
      None => Ok(resolutions),
    }
  }

  /// Move resolved modules to their versions. Returns the modules that moved.
  async fn checkout(&mut self, resolutions: &BTreeMap<String, Resolution>) -> Result<Vec<String>, SyncError> {
    let mut jobs = Vec::new();
    for (name, resolution) in resolutions {
      let Some(module) = self.graph.get(name) else {
        continue;
      };
      let job = CheckoutJob {
        name: name.clone(),
        backend: self.backend(name)?,
        resolved: resolution.resolved.clone(),
        requests: module.requests.clone(),
      };
      jobs.push((name.clone(), job));
    }

    let results = run_wave(jobs, &self.semaphore, worker::checkout).await?;

    let mut moved = Vec::new();
    let mut first_error = None;
    for (name, result) in results {
      match result {
        Ok(did_move) => {
          self.graph.set_state(&name, ModuleState::Synced);
          if did_move {
            moved.push(name);
          }
        }
        Err(e) => {
          error!(module = %name, "failed to check out module");
          self.graph.set_state(&name, ModuleState::Failed);
          first_error.get_or_insert(e);
        }
      }
    }
    match first_error {
      Some(e) => Err(e),
      None => Ok(moved),
    }
  }

  /// Read the manifests of moved modules again. Returns whether any request changed.
  fn reabsorb(&mut self, moved: &[String]) -> Result<bool, SyncError> {
    let mut changed = false;
    for name in moved {
      let absorbed = self.absorb_manifest(name)?;
      if !absorbed.is_empty() {
        debug!(module = %name, added = ?absorbed.added, changed = ?absorbed.changed, "manifest changed after checkout");
        changed = true;
      }
    }
    Ok(changed)
  }

  async fn finish(self, resolutions: BTreeMap<String, Resolution>, rounds: usize) -> Result<SyncReport, SyncError> {
    let jobs: Vec<(String, DescribeJob)> = self
      .backends
      .iter()
      .map(|(name, backend)| {
        let job = DescribeJob {
          name: name.clone(),
          backend: backend.clone(),
          before: self.heads_before.get(name).cloned().flatten(),
        };
        (name.clone(), job)
      })
      .collect();

    let mut changes = Vec::new();
    for (_, result) in run_wave(jobs, &self.semaphore, worker::describe).await? {
      if let Some(change) = result? {
        changes.push(change);
      }
    }

    info!(
      modules = self.graph.len(),
      changed = changes.len(),
      rounds,
      "sync complete"
    );

    Ok(SyncReport {
      paths: self.graph.module_paths(&self.root),
      workspace: self.root,
      resolutions,
      changes,
      rounds,
    })
  }
}
