//! End-to-end sync scenarios against the in-memory backend.

use weft_lib::resolve::ConflictKind;
use weft_lib::sync::SyncError;
use weft_lib::vcs::memory::Operation;
use weft_lib::workspace;

use super::common::{TestWorkspace, dep, jj_dep};

/// lib: c1 <- c2 <- c3 (main), with b1 branching off c1.
fn publish_lib(ws: &TestWorkspace) {
  ws.publish("lib", "c1", &[], vec![]);
  ws.publish("lib", "b1", &["c1"], vec![]);
  ws.publish("lib", "c2", &["c1"], vec![]);
  ws.publish("lib", "c3", &["c2"], vec![]);
}

mod single_dependency {
  use super::*;

  #[tokio::test]
  async fn clones_and_checks_out_requested_commit() {
    let ws = TestWorkspace::new();
    publish_lib(&ws);
    ws.require(vec![dep("lib", "c1")]);

    let report = ws.sync().await.unwrap();

    assert_eq!(ws.head("lib").as_deref(), Some("c1"));
    assert_eq!(report.resolutions["lib"].resolved, "c1");
    assert_eq!(report.paths["lib"], ws.module_path("lib"));
    assert_eq!(report.paths["app"], ws.root);
    assert_eq!(report.changes.len(), 1);
    assert!(report.changes[0].is_clone());
    assert_eq!(
      ws.vcs.operations(),
      vec![
        Operation::Clone {
          url: "mem://lib".to_string(),
          path: ws.module_path("lib"),
        },
        Operation::Checkout {
          path: ws.module_path("lib"),
          rev: "c1".to_string(),
        },
      ]
    );
  }

  #[tokio::test]
  async fn empty_manifest_syncs_nothing() {
    let ws = TestWorkspace::new();
    ws.require(vec![]);

    let report = ws.sync().await.unwrap();

    assert!(report.resolutions.is_empty());
    assert!(report.is_unchanged());
    assert_eq!(report.paths.len(), 1);
    assert!(ws.root.join("DEPS").is_dir());
  }

  #[tokio::test]
  async fn unknown_remote_fails_and_leaves_nothing() {
    let ws = TestWorkspace::new();
    ws.require(vec![dep("missing", "c1")]);

    let err = ws.sync().await.unwrap_err();

    assert!(matches!(err, SyncError::Vcs { ref module, .. } if module == "missing"));
    assert!(!ws.module_path("missing").exists());
  }

  #[tokio::test]
  async fn unresolvable_request_removes_fresh_clone() {
    let ws = TestWorkspace::new();
    publish_lib(&ws);
    ws.require(vec![dep("lib", "v9")]);

    let err = ws.sync().await.unwrap_err();

    assert!(err.to_string().contains("v9"));
    assert!(!ws.module_path("lib").exists());
  }
}

mod transitive {
  use super::*;

  #[tokio::test]
  async fn dependency_manifest_is_read_after_materializing() {
    let ws = TestWorkspace::new();
    ws.publish("util", "u1", &[], vec![]);
    ws.publish("lib", "c1", &[], vec![dep("util", "u1")]);
    ws.require(vec![dep("lib", "c1")]);

    let report = ws.sync().await.unwrap();

    assert_eq!(ws.head("util").as_deref(), Some("u1"));
    assert_eq!(report.resolutions["util"].requests[0].requester, "lib");
  }

  #[tokio::test]
  async fn descendant_request_wins() {
    let ws = TestWorkspace::new();
    publish_lib(&ws);
    ws.publish("app1", "a1", &[], vec![dep("lib", "c1")]);
    ws.publish("app2", "a2", &[], vec![dep("lib", "c2")]);
    ws.require(vec![dep("app1", "a1"), dep("app2", "a2")]);

    let report = ws.sync().await.unwrap();

    assert_eq!(ws.head("lib").as_deref(), Some("c2"));
    let lib = &report.resolutions["lib"];
    assert_eq!(lib.resolved, "c2");
    let requesters: Vec<&str> = lib.requests.iter().map(|r| r.requester.as_str()).collect();
    assert_eq!(requesters, vec!["app1", "app2"]);
  }

  #[tokio::test]
  async fn resolution_does_not_depend_on_requester_names() {
    let assignments = [["c1", "c2", "c3"], ["c3", "c1", "c2"], ["c2", "c3", "c1"]];
    for revs in assignments {
      let ws = TestWorkspace::new();
      publish_lib(&ws);
      ws.publish("x", "x1", &[], vec![dep("lib", revs[0])]);
      ws.publish("y", "y1", &[], vec![dep("lib", revs[1])]);
      ws.publish("z", "z1", &[], vec![dep("lib", revs[2])]);
      ws.require(vec![dep("x", "x1"), dep("y", "y1"), dep("z", "z1")]);

      ws.sync().await.unwrap();

      assert_eq!(ws.head("lib").as_deref(), Some("c3"), "assignment {revs:?}");
    }
  }

  #[tokio::test]
  async fn cycles_terminate_with_merged_requests() {
    let ws = TestWorkspace::new();
    ws.publish("a", "a1", &[], vec![dep("b", "b1")]);
    ws.publish("b", "b1", &[], vec![dep("a", "a1")]);
    ws.require(vec![dep("a", "a1")]);

    let report = ws.sync().await.unwrap();

    assert_eq!(ws.clones_of("a"), 1);
    assert_eq!(ws.clones_of("b"), 1);
    let a_requesters: Vec<&str> = report.resolutions["a"]
      .requests
      .iter()
      .map(|r| r.requester.as_str())
      .collect();
    assert_eq!(a_requesters, vec!["app", "b"]);
    assert_eq!(report.resolutions["b"].resolved, "b1");
  }

  #[tokio::test]
  async fn cycle_back_to_workspace_uses_the_root() {
    let ws = TestWorkspace::new();
    ws.publish("lib", "c1", &[], vec![dep("app", "r1")]);
    ws.require(vec![dep("lib", "c1")]);

    let report = ws.sync().await.unwrap();

    assert_eq!(ws.clones_of("app"), 0);
    assert!(!ws.module_path("app").exists());
    assert!(!report.resolutions.contains_key("app"));
    assert_eq!(report.paths["app"], ws.root);

    let paths = workspace::module_paths(&ws.root).unwrap();
    assert_eq!(paths["app"], ws.root);
    assert_eq!(paths["lib"], ws.module_path("lib"));
  }

  #[tokio::test]
  async fn manifest_at_resolved_version_is_followed() {
    // lib@c1 needs nothing; lib@c2 adds a dependency on util.
    let ws = TestWorkspace::new();
    ws.publish("util", "u1", &[], vec![]);
    ws.publish("lib", "c1", &[], vec![]);
    ws.publish("lib", "c2", &["c1"], vec![dep("util", "u1")]);
    ws.publish("app1", "a1", &[], vec![dep("lib", "c1")]);
    ws.publish("app2", "a2", &[], vec![dep("lib", "c2")]);
    ws.require(vec![dep("app1", "a1"), dep("app2", "a2")]);

    let report = ws.sync().await.unwrap();

    assert_eq!(ws.head("lib").as_deref(), Some("c2"));
    assert_eq!(ws.head("util").as_deref(), Some("u1"));
    assert_eq!(report.rounds, 2);
  }
}

mod idempotence {
  use super::*;

  #[tokio::test]
  async fn second_run_only_fetches() {
    let ws = TestWorkspace::new();
    publish_lib(&ws);
    ws.publish("app1", "a1", &[], vec![dep("lib", "c1")]);
    ws.publish("app2", "a2", &[], vec![dep("lib", "c2")]);
    ws.require(vec![dep("app1", "a1"), dep("app2", "a2")]);
    ws.sync().await.unwrap();

    let heads: Vec<_> = ["app1", "app2", "lib"].iter().map(|m| ws.head(m)).collect();
    ws.vcs.clear_operations();

    let report = ws.sync().await.unwrap();

    let after: Vec<_> = ["app1", "app2", "lib"].iter().map(|m| ws.head(m)).collect();
    assert_eq!(heads, after);
    assert!(report.is_unchanged());
    assert!(
      ws.vcs
        .operations()
        .iter()
        .all(|op| matches!(op, Operation::Fetch { .. }))
    );
  }

  #[tokio::test]
  async fn new_request_moves_existing_copy_forward() {
    let ws = TestWorkspace::new();
    publish_lib(&ws);
    ws.require(vec![dep("lib", "c1")]);
    ws.sync().await.unwrap();

    ws.require(vec![dep("lib", "c3")]);
    let report = ws.sync().await.unwrap();

    assert_eq!(ws.head("lib").as_deref(), Some("c3"));
    let change = &report.changes[0];
    assert_eq!(change.before.as_deref(), Some("c1"));
    let ids: Vec<&str> = change.commits.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c3", "c2"]);
  }
}

mod conflicts {
  use super::*;

  #[tokio::test]
  async fn divergent_requests_fail_naming_both_requesters() {
    let ws = TestWorkspace::new();
    publish_lib(&ws);
    ws.publish("app1", "a1", &[], vec![dep("lib", "c2")]);
    ws.publish("app2", "a2", &[], vec![dep("lib", "b1")]);
    ws.require(vec![dep("app1", "a1"), dep("app2", "a2")]);

    let err = ws.sync().await.unwrap_err();

    let conflict = err.as_conflict().expect("version conflict");
    assert_eq!(conflict.module, "lib");
    let msg = err.to_string();
    assert!(msg.contains("'app1' requests c2"), "{msg}");
    assert!(msg.contains("'app2' requests b1"), "{msg}");
    // Only the initial checkout of the first request happened.
    assert!(!ws.vcs.operations().iter().any(|op| matches!(
      op,
      Operation::Checkout { rev, .. } if rev == "b1"
    )));
  }

  #[tokio::test]
  async fn dirty_copy_needing_checkout_is_a_conflict() {
    let ws = TestWorkspace::new();
    publish_lib(&ws);
    ws.require(vec![dep("lib", "c1")]);
    ws.sync().await.unwrap();

    ws.vcs.set_dirty(&ws.module_path("lib"), true);
    ws.require(vec![dep("lib", "c2")]);
    let err = ws.sync().await.unwrap_err();

    assert!(matches!(
      err.as_conflict().map(|c| &c.conflict),
      Some(ConflictKind::LocalChanges { .. })
    ));
    assert_eq!(ws.head("lib").as_deref(), Some("c1"));
  }

  #[tokio::test]
  async fn dirty_copy_at_resolved_version_is_left_alone() {
    let ws = TestWorkspace::new();
    publish_lib(&ws);
    ws.require(vec![dep("lib", "c1")]);
    ws.sync().await.unwrap();

    ws.vcs.set_dirty(&ws.module_path("lib"), true);
    ws.vcs.clear_operations();
    ws.sync().await.unwrap();

    assert!(ws.vcs.operations().is_empty());
    assert_eq!(ws.head("lib").as_deref(), Some("c1"));
  }
}

mod checkout_unsupported {
  use super::*;

  #[tokio::test]
  async fn resolves_to_fetched_head() {
    let ws = TestWorkspace::new();
    publish_lib(&ws);
    ws.require(vec![jj_dep("lib", "c1")]);

    let report = ws.sync().await.unwrap();

    assert_eq!(ws.head("lib").as_deref(), Some("c3"));
    assert_eq!(report.resolutions["lib"].resolved, "c3");
    assert!(
      !ws
        .vcs
        .operations()
        .iter()
        .any(|op| matches!(op, Operation::Checkout { .. }))
    );
  }

  #[tokio::test]
  async fn mismatching_request_fails_the_run() {
    let ws = TestWorkspace::new();
    publish_lib(&ws);
    ws.require(vec![jj_dep("lib", "b1")]);

    let err = ws.sync().await.unwrap_err();

    let conflict = err.as_conflict().expect("version conflict");
    assert!(matches!(
      conflict.conflict,
      ConflictKind::HeadMismatch { ref head, .. } if head == "c3"
    ));
    assert!(err.to_string().contains("app requests b1"));
  }
}
