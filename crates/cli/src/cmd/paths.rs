//! Implementation of the `weft paths` command.
//!
//! Prints the module name to path mapping of the workspace, which is what
//! build-file generation consumes.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use weft_lib::workspace::module_paths;

use super::locate_workspace;
use crate::output::{OutputFormat, print_json};

/// Execute the paths command.
pub fn cmd_paths(workspace: Option<&Path>, output: OutputFormat) -> Result<()> {
  let workspace = locate_workspace(workspace)?;
  let paths = module_paths(workspace.root()).context("Failed to list modules")?;

  if output.is_json() {
    return print_json(&paths);
  }

  let width = paths.keys().map(String::len).max().unwrap_or(0);
  for (name, path) in &paths {
    let name = format!("{name:width$}");
    println!("{}  {}", name.if_supports_color(Stream::Stdout, |s| s.cyan()), path.display());
  }
  Ok(())
}
