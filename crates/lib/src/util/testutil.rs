//! Test utilities for weft-lib.
//!
//! Cross-platform helpers for tests that run shell commands or need a real
//! git repository to clone from. Available to other crates' tests through the
//! `test-support` feature.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}

/// Whether a `git` executable is on `PATH`.
///
/// Tests that need real git return early when it is missing.
pub fn git_available() -> bool {
  tool_available("git")
}

/// Whether a `jj` executable is on `PATH`.
pub fn jj_available() -> bool {
  tool_available("jj")
}

fn tool_available(program: &str) -> bool {
  Command::new(program)
    .arg("--version")
    .output()
    .map(|o| o.status.success())
    .unwrap_or(false)
}

/// Run git in `dir` with a fixed identity and return trimmed stdout.
///
/// Panics when git exits nonzero.
pub fn git(dir: &Path, args: &[&str]) -> String {
  let output = Command::new("git")
    .args(["-c", "user.name=Weft Test", "-c", "user.email=test@example.com"])
    .args(["-c", "commit.gpgsign=false"])
    .args(args)
    .current_dir(dir)
    .env("GIT_CONFIG_NOSYSTEM", "1")
    .output()
    .unwrap();
  assert!(
    output.status.success(),
    "git {args:?} failed: {}",
    String::from_utf8_lossy(&output.stderr)
  );
  String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A throwaway upstream repository on `main`.
pub struct GitFixture {
  path: PathBuf,
}

impl GitFixture {
  pub fn init(path: &Path) -> Self {
    std::fs::create_dir_all(path).unwrap();
    let fixture = Self {
      path: path.to_path_buf(),
    };
    fixture.git(&["init", "--quiet", "-b", "main"]);
    fixture
  }

  /// Commit everything in the tree (or nothing) and return the new commit id.
  pub fn commit(&self, message: &str) -> String {
    self.git(&["add", "--all"]);
    self.git(&["commit", "--quiet", "--allow-empty", "-m", message]);
    self.head()
  }

  /// Start branch `name` at `rev` and switch to it.
  pub fn branch(&self, name: &str, rev: &str) {
    self.git(&["checkout", "--quiet", "-b", name, rev]);
  }

  pub fn head(&self) -> String {
    self.git(&["rev-parse", "HEAD"])
  }

  /// Write `content` to `file` in the tree without committing.
  pub fn write(&self, file: &str, content: &str) {
    std::fs::write(self.path.join(file), content).unwrap();
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn url(&self) -> String {
    self.path.to_string_lossy().into_owned()
  }

  pub fn git(&self, args: &[&str]) -> String {
    git(&self.path, args)
  }
}
