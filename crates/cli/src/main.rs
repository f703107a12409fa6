mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{cmd_paths, cmd_sync};
use output::{OutputFormat, print_error};

/// weft - keep a workspace's dependency modules at mutually consistent versions
#[derive(Parser)]
#[command(name = "weft")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Workspace root (default: the module enclosing the current directory)
  #[arg(short = 'C', long, global = true, value_name = "DIR")]
  workspace: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Fetch, resolve and check out every dependency module
  Sync {
    /// Maximum number of modules operated on concurrently
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Do not fetch modules that are already checked out
    #[arg(long)]
    offline: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Print the module name to path mapping
  Paths {
    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let workspace = cli.workspace.as_deref();
  let result = match cli.command {
    Commands::Sync { jobs, offline, output } => cmd_sync(workspace, jobs, offline, output),
    Commands::Paths { output } => cmd_paths(workspace, output),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}
