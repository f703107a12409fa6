//! Subprocess execution for backend commands.
//!
//! Backends shell out to their version-control tool and parse stdout. A nonzero
//! exit becomes [`VcsError::Subprocess`] with the captured stderr preserved
//! verbatim, so the user sees exactly what the tool complained about.
//!
//! The history queries at the bottom run `git` against a repository directory.
//! Both backends use them: git runs them in the working copy, jj in its backing
//! git repository.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use super::{CommitInfo, VcsError};

const GIT: &str = "git";

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub(crate) struct CommandOutput {
  pub stdout: String,
  pub stderr: String,
  pub code: Option<i32>,
}

impl CommandOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }
}

/// Render a command line for messages.
pub(crate) fn display_command(program: &str, args: &[&str]) -> String {
  if args.is_empty() {
    program.to_string()
  } else {
    format!("{} {}", program, args.join(" "))
  }
}

/// Run a command and capture its output, whatever the exit status.
///
/// Only a failure to spawn the process is an error here.
pub(crate) fn capture(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<CommandOutput, VcsError> {
  let rendered = display_command(program, args);
  debug!(command = %rendered, cwd = ?cwd, "running command");

  let mut command = Command::new(program);
  command.args(args).env("LANG", "C").env("LC_ALL", "C");
  if let Some(dir) = cwd {
    command.current_dir(dir);
  }

  let output = command
    .output()
    .map_err(|e| VcsError::io(format!("failed to run '{}'", rendered), e))?;

  let stdout = String::from_utf8_lossy(&output.stdout).trim_end_matches('\n').to_string();
  let stderr = String::from_utf8_lossy(&output.stderr).trim_end_matches('\n').to_string();

  Ok(CommandOutput {
    stdout,
    stderr,
    code: output.status.code(),
  })
}

/// Run a command, turning a nonzero exit into [`VcsError::Subprocess`].
///
/// Returns stdout with the trailing newline removed.
pub(crate) fn run(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<String, VcsError> {
  let output = capture(program, args, cwd)?;

  if !output.success() {
    if !output.stderr.is_empty() {
      debug!(stderr = %output.stderr, "command stderr");
    }
    return Err(into_error(program, args, output));
  }

  Ok(output.stdout)
}

/// Convert a failed [`CommandOutput`] into a subprocess error.
pub(crate) fn into_error(program: &str, args: &[&str], output: CommandOutput) -> VcsError {
  VcsError::Subprocess {
    command: display_command(program, args),
    code: output.code,
    stderr: output.stderr,
  }
}

/// Split command output into non-empty trimmed lines.
pub(crate) fn lines(stdout: &str) -> Vec<String> {
  stdout
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(str::to_string)
    .collect()
}

/// Resolve `rev` to a commit hash in the repository at `git_dir`.
///
/// `path` is the working copy named in the error when `rev` does not resolve.
pub(crate) fn git_rev_parse(git_dir: &Path, rev: &str, path: &Path) -> Result<String, VcsError> {
  let output = capture(GIT, &["rev-list", "-n", "1", rev, "--"], Some(git_dir))?;
  if !output.success() || output.stdout.trim().is_empty() {
    debug!(rev, stderr = %output.stderr, "rev-list failed");
    return Err(VcsError::UnresolvedRef {
      rev: rev.to_string(),
      path: path.to_path_buf(),
    });
  }
  Ok(output.stdout.trim().to_string())
}

/// Whether `ancestor` is reachable from `rev`.
pub(crate) fn git_is_ancestor(git_dir: &Path, ancestor: &str, rev: &str) -> Result<bool, VcsError> {
  let args = ["merge-base", "--is-ancestor", ancestor, rev];
  let output = capture(GIT, &args, Some(git_dir))?;
  match output.code {
    Some(0) => Ok(true),
    Some(1) => Ok(false),
    _ => Err(into_error(GIT, &args, output)),
  }
}

pub(crate) fn git_merge_base(git_dir: &Path, left: &str, right: &str) -> Result<String, VcsError> {
  let args = ["merge-base", left, right];
  let output = capture(GIT, &args, Some(git_dir))?;
  match output.code {
    Some(0) if !output.stdout.trim().is_empty() => Ok(output.stdout.trim().to_string()),
    Some(1) => Err(VcsError::NoCommonAncestor {
      left: left.to_string(),
      right: right.to_string(),
    }),
    _ => Err(into_error(GIT, &args, output)),
  }
}

/// Commits reachable from `head` but not from `base`, newest first.
pub(crate) fn git_commits_between(git_dir: &Path, base: &str, head: &str) -> Result<Vec<String>, VcsError> {
  let range = format!("{}..{}", base.trim(), head.trim());
  let stdout = run(GIT, &["rev-list", &range], Some(git_dir))?;
  Ok(lines(&stdout))
}

pub(crate) fn git_commit_info(git_dir: &Path, rev: &str, path: &Path) -> Result<CommitInfo, VcsError> {
  let stdout = run(GIT, &["show", "-s", "--format=%H%n%an%n%s", rev], Some(git_dir))?;
  commit_info_from(&stdout, rev, path)
}

/// Parse `%H%n%an%n%s` output; output without a commit id means `rev` named no commit.
fn commit_info_from(stdout: &str, rev: &str, path: &Path) -> Result<CommitInfo, VcsError> {
  parse_commit_info(stdout).ok_or_else(|| VcsError::UnresolvedRef {
    rev: rev.to_string(),
    path: path.to_path_buf(),
  })
}

fn parse_commit_info(stdout: &str) -> Option<CommitInfo> {
  let mut parts = stdout.splitn(3, '\n');
  let id = parts.next()?.trim();
  let author = parts.next()?.trim();
  let title = parts.next().unwrap_or("").trim();
  if id.is_empty() {
    return None;
  }
  Some(CommitInfo {
    id: id.to_string(),
    author: author.to_string(),
    title: title.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::shell_cmd;

  #[test]
  #[cfg(unix)]
  fn run_returns_trimmed_stdout() {
    let (shell, args) = shell_cmd("echo hello");
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let out = run(shell, &args, None).unwrap();
    assert_eq!(out, "hello");
  }

  #[test]
  #[cfg(unix)]
  fn nonzero_exit_surfaces_stderr() {
    let (shell, args) = shell_cmd("echo broken >&2; exit 3");
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let err = run(shell, &args, None).unwrap_err();
    match err {
      VcsError::Subprocess { code, stderr, .. } => {
        assert_eq!(code, Some(3));
        assert_eq!(stderr, "broken");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn missing_program_is_io_error() {
    let err = run("weft-definitely-not-a-program", &[], None).unwrap_err();
    assert!(matches!(err, VcsError::Io { .. }));
  }

  #[test]
  fn lines_skips_blanks() {
    assert_eq!(lines("a\n\n  b  \n"), vec!["a".to_string(), "b".to_string()]);
    assert!(lines("").is_empty());
  }

  #[test]
  fn display_command_joins_args() {
    assert_eq!(display_command("git", &["fetch", "--prune"]), "git fetch --prune");
    assert_eq!(display_command("jj", &[]), "jj");
  }

  mod commit_info {
    use super::*;

    #[test]
    fn parses_three_lines() {
      let info = parse_commit_info("abc123\nAda Lovelace\nAdd engine").unwrap();
      assert_eq!(info.id, "abc123");
      assert_eq!(info.author, "Ada Lovelace");
      assert_eq!(info.title, "Add engine");
    }

    #[test]
    fn tolerates_missing_title() {
      let info = parse_commit_info("abc123\nAda").unwrap();
      assert_eq!(info.title, "");
    }

    #[test]
    fn rejects_empty() {
      assert!(parse_commit_info("").is_none());
    }

    #[test]
    fn unparseable_output_is_an_unresolved_ref() {
      let err = commit_info_from("", "v1.0", Path::new("/ws/DEPS/lib")).unwrap_err();
      match err {
        VcsError::UnresolvedRef { rev, path } => {
          assert_eq!(rev, "v1.0");
          assert_eq!(path, Path::new("/ws/DEPS/lib"));
        }
        other => panic!("unexpected error: {other}"),
      }
    }
  }
}
