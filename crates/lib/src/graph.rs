//! Dependency graph discovery.
//!
//! The graph maps module names to [`Module`] records and is owned by a single
//! sync run: it is rebuilt from the manifests on disk every time and discarded
//! when the run ends.
//!
//! # Discovery
//!
//! Discovery is a breadth-first fixed point. Whenever a module becomes
//! materialized its manifest is absorbed: each referenced dependency that is
//! not yet in the graph becomes a new pending module, and a dependency that is
//! already present only has the `(requester, version)` pair merged into its
//! request set. A known module is never rediscovered, so cycles such as
//! `a -> b -> a` terminate without special casing. The walk ends when a full
//! pass adds no pending module.
//!
//! The workspace module is the one name that is never registered: it is
//! already on disk at the workspace root, so a cycle leading back to it
//! (`app -> lib -> app`) only records the edge and never materializes a copy
//! under `DEPS`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::manifest::Manifest;
use crate::module::{Module, ModuleState, VersionRequest};

/// What absorbing one manifest changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Absorbed {
  /// Modules registered for the first time.
  pub added: Vec<String>,
  /// Known modules whose request set changed.
  pub changed: Vec<String>,
}

impl Absorbed {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty() && self.changed.is_empty()
  }
}

/// All modules known to one sync run.
#[derive(Debug)]
pub struct DependencyGraph {
  root: String,
  deps_dir: PathBuf,
  modules: BTreeMap<String, Module>,
  /// requester -> names it depends on.
  edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
  /// Create an empty graph for the workspace module `root`.
  pub fn new(root: &str, deps_dir: &Path) -> Self {
    Self {
      root: root.to_string(),
      deps_dir: deps_dir.to_path_buf(),
      modules: BTreeMap::new(),
      edges: BTreeMap::new(),
    }
  }

  /// Name of the workspace module.
  pub fn root(&self) -> &str {
    &self.root
  }

  pub fn deps_dir(&self) -> &Path {
    &self.deps_dir
  }

  pub fn get(&self, name: &str) -> Option<&Module> {
    self.modules.get(name)
  }

  pub fn get_mut(&mut self, name: &str) -> Option<&mut Module> {
    self.modules.get_mut(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.modules.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.modules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.modules.is_empty()
  }

  pub fn modules(&self) -> impl Iterator<Item = &Module> {
    self.modules.values()
  }

  /// Names of modules in `state`, in name order.
  pub fn in_state(&self, state: ModuleState) -> Vec<String> {
    self
      .modules
      .values()
      .filter(|m| m.state == state)
      .map(|m| m.name.clone())
      .collect()
  }

  pub fn set_state(&mut self, name: &str, state: ModuleState) {
    if let Some(module) = self.modules.get_mut(name) {
      trace!(module = name, from = %module.state, to = %state, "state transition");
      module.state = state;
    }
  }

  /// Names `requester` declared as dependencies.
  pub fn dependencies(&self, requester: &str) -> Vec<&str> {
    self
      .edges
      .get(requester)
      .map(|deps| deps.iter().map(String::as_str).collect())
      .unwrap_or_default()
  }

  /// Names of modules that requested `name`.
  pub fn dependents(&self, name: &str) -> Vec<&str> {
    self
      .modules
      .get(name)
      .map(|m| m.requests.iter().map(|r| r.requester.as_str()).collect())
      .unwrap_or_default()
  }

  /// Merge the dependency list declared by `requester` into the graph.
  ///
  /// A requester asks for exactly one version of each dependency, so its
  /// previous requests are replaced, and requests for dependencies it no
  /// longer declares are withdrawn.
  pub fn absorb(&mut self, requester: &str, manifest: &Manifest) -> Absorbed {
    let mut absorbed = Absorbed::default();
    let declared: BTreeSet<String> = manifest.dependencies.keys().cloned().collect();

    let previous = self.edges.insert(requester.to_string(), declared.clone()).unwrap_or_default();
    for dropped in previous.difference(&declared) {
      if let Some(module) = self.modules.get_mut(dropped)
        && module.withdraw_requests(requester)
      {
        debug!(module = %dropped, requester, "request withdrawn");
        absorbed.changed.push(dropped.clone());
      }
    }

    for (name, decl) in &manifest.dependencies {
      if *name == self.root {
        debug!(requester, rev = %decl.version, "dependency on the workspace module, using the workspace root");
        continue;
      }
      let request = VersionRequest::new(requester, &decl.version);
      match self.modules.get_mut(name) {
        Some(module) => {
          if module.url != decl.url {
            warn!(
              module = %name,
              known = %module.url,
              requested = %decl.url,
              requester,
              "module requested from a different url, keeping the first"
            );
          }
          if module.merge_request(request) {
            debug!(module = %name, requester, rev = %decl.version, "merged request");
            absorbed.changed.push(name.clone());
          }
        }
        None => {
          debug!(module = %name, requester, rev = %decl.version, "discovered module");
          let module = Module::pending(name, &decl.url, decl.kind, &self.deps_dir, request);
          self.modules.insert(name.clone(), module);
          absorbed.added.push(name.clone());
        }
      }
    }

    absorbed
  }

  /// Withdraw the requests of modules that nobody requests any more.
  ///
  /// Withdrawing can orphan further modules, so this repeats until stable.
  /// Returns every orphaned module; they stay on disk but are no longer
  /// resolved or checked out.
  pub fn release_orphans(&mut self) -> Vec<String> {
    loop {
      let releasing: Vec<String> = self
        .modules
        .values()
        .filter(|m| m.requests.is_empty())
        .filter(|m| self.edges.get(&m.name).is_some_and(|deps| !deps.is_empty()))
        .map(|m| m.name.clone())
        .collect();
      if releasing.is_empty() {
        break;
      }
      for name in releasing {
        debug!(module = %name, "no longer requested, releasing its dependencies");
        self.absorb(&name, &Manifest::new());
      }
    }
    self.orphans()
  }

  /// Modules without any request.
  pub fn orphans(&self) -> Vec<String> {
    self
      .modules
      .values()
      .filter(|m| m.requests.is_empty())
      .map(|m| m.name.clone())
      .collect()
  }

  /// Name to working-copy path for every module, plus the workspace root.
  pub fn module_paths(&self, workspace_root: &Path) -> BTreeMap<String, PathBuf> {
    let mut paths: BTreeMap<String, PathBuf> = self
      .modules
      .values()
      .map(|m| (m.name.clone(), m.path.clone()))
      .collect();
    paths.insert(self.root.clone(), workspace_root.to_path_buf());
    paths
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::DependencyDecl;

  fn manifest(deps: &[(&str, &str)]) -> Manifest {
    deps.iter().fold(Manifest::new(), |m, (name, rev)| {
      m.with_dependency(DependencyDecl::new(&format!("mem://{name}"), rev))
    })
  }

  fn graph() -> DependencyGraph {
    DependencyGraph::new("app", Path::new("/ws/DEPS"))
  }

  #[test]
  fn absorb_registers_pending_modules() {
    let mut g = graph();
    let absorbed = g.absorb("app", &manifest(&[("lib", "c1"), ("tools", "t1")]));

    assert_eq!(absorbed.added, vec!["lib", "tools"]);
    assert_eq!(g.in_state(ModuleState::Pending), vec!["lib", "tools"]);
    assert_eq!(g.get("lib").unwrap().path, PathBuf::from("/ws/DEPS/lib"));
    assert_eq!(g.dependencies("app"), vec!["lib", "tools"]);
  }

  #[test]
  fn known_module_is_merged_not_rediscovered() {
    let mut g = graph();
    g.absorb("app", &manifest(&[("lib", "c1")]));
    g.set_state("lib", ModuleState::Materialized);

    let absorbed = g.absorb("tools", &manifest(&[("lib", "c2")]));

    assert!(absorbed.added.is_empty());
    assert_eq!(absorbed.changed, vec!["lib"]);
    let lib = g.get("lib").unwrap();
    assert_eq!(lib.state, ModuleState::Materialized);
    assert_eq!(lib.requests.len(), 2);
    assert_eq!(g.dependents("lib"), vec!["app", "tools"]);
  }

  #[test]
  fn cycles_terminate_by_name() {
    let mut g = graph();
    g.absorb("app", &manifest(&[("a", "a1")]));
    g.absorb("a", &manifest(&[("b", "b1")]));
    let absorbed = g.absorb("b", &manifest(&[("a", "a1")]));

    assert!(absorbed.added.is_empty());
    assert_eq!(g.len(), 2);
    let a = g.get("a").unwrap();
    assert_eq!(
      a.requests,
      BTreeSet::from([VersionRequest::new("app", "a1"), VersionRequest::new("b", "a1")])
    );
  }

  #[test]
  fn cycle_through_root_is_not_registered() {
    let mut g = graph();
    g.absorb("app", &manifest(&[("lib", "c1")]));
    let absorbed = g.absorb("lib", &manifest(&[("app", "r1"), ("tools", "t1")]));

    assert_eq!(absorbed.added, vec!["tools"]);
    assert!(!g.contains("app"));
    assert_eq!(g.len(), 2);
    assert_eq!(g.dependencies("lib"), vec!["app", "tools"]);
    assert!(g.release_orphans().is_empty());
    assert_eq!(g.module_paths(Path::new("/ws"))["app"], PathBuf::from("/ws"));
  }

  #[test]
  fn reabsorbing_same_manifest_changes_nothing() {
    let mut g = graph();
    let m = manifest(&[("lib", "c1")]);
    g.absorb("app", &m);
    assert!(g.absorb("app", &m).is_empty());
  }

  #[test]
  fn reabsorbing_replaces_and_withdraws() {
    let mut g = graph();
    g.absorb("app", &manifest(&[("lib", "c1"), ("tools", "t1")]));
    g.absorb("other", &manifest(&[("tools", "t1")]));

    let absorbed = g.absorb("app", &manifest(&[("lib", "c2")]));

    assert_eq!(absorbed.changed, vec!["tools", "lib"]);
    assert_eq!(g.get("lib").unwrap().requested_revs(), BTreeSet::from(["c2"]));
    assert_eq!(g.dependents("tools"), vec!["other"]);
  }

  #[test]
  fn orphans_release_their_dependencies() {
    let mut g = graph();
    g.absorb("app", &manifest(&[("lib", "c1")]));
    g.absorb("lib", &manifest(&[("old", "o1")]));
    g.absorb("old", &manifest(&[("deep", "d1")]));

    g.absorb("app", &manifest(&[("lib", "c2")]));
    g.absorb("lib", &manifest(&[]));

    assert_eq!(g.release_orphans(), vec!["deep", "old"]);
    assert!(g.get("deep").unwrap().requests.is_empty());
    assert!(g.dependencies("old").is_empty());
  }

  #[test]
  fn module_paths_include_root() {
    let mut g = graph();
    g.absorb("app", &manifest(&[("lib", "c1")]));
    let paths = g.module_paths(Path::new("/ws"));
    assert_eq!(paths.get("app"), Some(&PathBuf::from("/ws")));
    assert_eq!(paths.get("lib"), Some(&PathBuf::from("/ws/DEPS/lib")));
  }
}
