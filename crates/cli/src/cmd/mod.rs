mod paths;
mod sync;

pub use paths::cmd_paths;
pub use sync::cmd_sync;

use std::path::Path;

use anyhow::{Context, Result};
use weft_lib::workspace::Workspace;

/// Open the workspace at `dir`, or discover the one enclosing the current directory.
fn locate_workspace(dir: Option<&Path>) -> Result<Workspace> {
  match dir {
    Some(dir) => Workspace::open(dir).with_context(|| format!("Failed to open workspace '{}'", dir.display())),
    None => {
      let cwd = std::env::current_dir().context("Failed to get current directory")?;
      Workspace::discover(&cwd).context("Failed to locate workspace")
    }
  }
}
