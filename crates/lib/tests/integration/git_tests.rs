//! Sync against real git repositories.
//!
//! Skipped when `git` is not on `PATH`.

use tempfile::TempDir;
use weft_lib::consts::MANIFEST_FILENAME;
use weft_lib::manifest::DependencyDecl;
use weft_lib::sync::{SyncOptions, sync};
use weft_lib::util::testutil::{GitFixture, git, git_available};
use weft_lib::workspace::Workspace;

use super::common::manifest;

#[tokio::test]
async fn syncs_git_dependency_to_requested_commit() {
  if !git_available() {
    return;
  }
  let temp = TempDir::new().unwrap();
  let lib = GitFixture::init(&temp.path().join("remotes").join("lib"));
  lib.write("README", "one");
  let c1 = lib.commit("first");
  lib.write("README", "two");
  let c2 = lib.commit("second");

  let app = temp.path().join("app");
  std::fs::create_dir_all(&app).unwrap();
  let url = lib.url();
  std::fs::write(app.join(MANIFEST_FILENAME), manifest(vec![DependencyDecl::new(&url, &c1)])).unwrap();

  let workspace = Workspace::open(&app).unwrap();
  let options = SyncOptions::default();

  let report = sync(&workspace, &options).await.unwrap();
  let lib_copy = workspace.deps_dir().join("lib");
  assert_eq!(report.resolutions["lib"].resolved, c1);
  assert_eq!(git(&lib_copy, &["rev-parse", "HEAD"]), c1);
  assert_eq!(std::fs::read_to_string(lib_copy.join("README")).unwrap(), "one");

  std::fs::write(app.join(MANIFEST_FILENAME), manifest(vec![DependencyDecl::new(&url, &c2)])).unwrap();
  let report = sync(&workspace, &options).await.unwrap();
  assert_eq!(git(&lib_copy, &["rev-parse", "HEAD"]), c2);
  assert_eq!(report.changes[0].commits.len(), 1);
  assert_eq!(report.changes[0].commits[0].title, "second");
}
