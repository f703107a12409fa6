//! Implementation of the `weft sync` command.
//!
//! Brings every dependency under `DEPS/` to the version that satisfies all of
//! its requesters, then reports which modules moved.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use owo_colors::{OwoColorize, Stream};
use tracing::debug;

use weft_lib::resolve::{ConflictKind, VersionConflict};
use weft_lib::sync::{ModuleChange, SyncOptions, SyncReport, sync};

use super::locate_workspace;
use crate::output::{OutputFormat, format_duration, print_error, print_json, print_success, symbols, truncate_hash};

/// Execute the sync command.
///
/// # Arguments
///
/// * `workspace` - Workspace root; discovered from the current directory when absent.
/// * `jobs` - Maximum concurrent module operations; defaults to the CPU count.
/// * `offline` - Skip fetching modules that are already on disk.
///
/// # Errors
///
/// Returns an error on any version conflict, unsupported operation or
/// subprocess failure. Conflicts are printed with every requester first.
pub fn cmd_sync(workspace: Option<&Path>, jobs: Option<usize>, offline: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let workspace = locate_workspace(workspace)?;

  let mut options = SyncOptions {
    fetch: !offline,
    ..SyncOptions::default()
  };
  if let Some(jobs) = jobs {
    options.parallelism = jobs.max(1);
  }
  debug!(root = %workspace.root().display(), ?options, "syncing workspace");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = match rt.block_on(sync(&workspace, &options)) {
    Ok(report) => report,
    Err(err) => {
      if let Some(conflict) = err.as_conflict() {
        if output.is_json() {
          print_json(conflict)?;
        } else {
          print_conflict(conflict);
        }
        bail!("Sync failed on a version conflict in module '{}'", conflict.module);
      }
      return Err(err).context("Sync failed");
    }
  };

  if output.is_json() {
    return print_json(&report);
  }
  print_report(&report);
  println!(
    "  {} Duration: {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    format_duration(start.elapsed())
  );
  Ok(())
}

fn print_report(report: &SyncReport) {
  for change in &report.changes {
    print_change(change);
  }

  let modules = report.resolutions.len();
  if report.is_unchanged() {
    print_success(&format!("All {modules} module(s) are up to date."));
  } else {
    print_success(&format!(
      "Synced {modules} module(s), {} changed.",
      report.changes.len()
    ));
  }
}

fn print_change(change: &ModuleChange) {
  let name = change.module.if_supports_color(Stream::Stdout, |s| s.cyan());
  let after = truncate_hash(&change.after);
  match &change.before {
    None => println!(
      "  {} Cloned {}: {}",
      symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()),
      name,
      after.if_supports_color(Stream::Stdout, |s| s.green())
    ),
    Some(before) => {
      let before = format!("{} {}", truncate_hash(before), symbols::ARROW);
      println!(
        "  {} Updated {}: {} {}",
        symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()),
        name,
        before.if_supports_color(Stream::Stdout, |s| s.dimmed()),
        after.if_supports_color(Stream::Stdout, |s| s.green())
      );
      for commit in &change.commits {
        println!(
          "      {} {} ({})",
          truncate_hash(&commit.id).if_supports_color(Stream::Stdout, |s| s.dimmed()),
          commit.title,
          commit.author
        );
      }
    }
  }
}

fn print_conflict(conflict: &VersionConflict) {
  print_error(&format!("Version conflict in module '{}'", conflict.module));
  match &conflict.conflict {
    ConflictKind::Divergent {
      left,
      right,
      merge_base,
      left_ahead,
      right_ahead,
    } => {
      eprintln!(
        "  '{}' requests {} and '{}' requests {}, and neither contains the other.",
        left.requester, left.rev, right.requester, right.rev
      );
      match merge_base {
        Some(base) => eprintln!(
          "  Common ancestor {}; {} and {} commit(s) since.",
          truncate_hash(base),
          left_ahead.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string()),
          right_ahead.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string())
        ),
        None => eprintln!("  The histories share no common ancestor."),
      }
    }
    ConflictKind::HeadMismatch { head, request } => {
      eprintln!(
        "  '{}' requests {}, which is not contained in {} and this working copy cannot be checked out.",
        request.requester,
        request.rev,
        truncate_hash(head)
      );
    }
    ConflictKind::LocalChanges { head, resolved } => {
      eprintln!(
        "  The working copy at {} has uncommitted changes but must move to {}.",
        truncate_hash(head),
        truncate_hash(resolved)
      );
    }
  }
  eprintln!("  Requested versions:");
  for request in &conflict.requests {
    eprintln!("    {} {}", symbols::INFO, request);
  }
}
