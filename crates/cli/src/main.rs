mod cmd;
mod output;
mod prompts;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use hotload_lib::{InstallMode, UpdateManager, UpdaterConfig};

use crate::output::OutputFormat;

/// Over-the-air package lifecycle manager
#[derive(Parser)]
#[command(name = "hotload")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Support directory holding `updates/` (default: $HOTLOAD_ROOT or the platform data dir)
  #[arg(long, global = true)]
  root: Option<PathBuf>,

  /// JSON updater config file
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
  Immediate,
  OnNextRestart,
  OnNextResume,
}

impl From<ModeArg> for InstallMode {
  fn from(mode: ModeArg) -> Self {
    match mode {
      ModeArg::Immediate => InstallMode::Immediate,
      ModeArg::OnNextRestart => InstallMode::OnNextRestart,
      ModeArg::OnNextResume => InstallMode::OnNextResume,
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Show current, previous and pending packages
  Status {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Download, verify and stage the package described by a manifest file
  Stage {
    /// Update manifest JSON (packageHash, downloadUrl, ...)
    manifest: PathBuf,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Install the staged package
  Install {
    /// When the package becomes current
    #[arg(long, value_enum, default_value = "on-next-restart")]
    mode: ModeArg,

    /// For on-next-resume: minimum time in the background (e.g., "30s", "5m")
    #[arg(long, value_parser = humantime::parse_duration)]
    min_background: Option<Duration>,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Confirm that the current package started successfully
  Ready,

  /// Roll back to the previous package
  Rollback {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Resolve the bundle to boot, reverting an unconfirmed launch
  Resolve {
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Signal that the app returned to the foreground
  Resume {
    /// How long the app was in the background (e.g., "10m")
    #[arg(long, value_parser = humantime::parse_duration)]
    background: Option<Duration>,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Signal an imminent restart, activating any deferred install
  Restart {
    /// Do nothing unless an install is waiting
    #[arg(long)]
    only_if_pending: bool,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Remove unreferenced packages and leftover artifacts
  Gc {
    /// Preview what would be deleted without actually deleting
    #[arg(long)]
    dry_run: bool,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Forget every update and delete all packages
  Clear {
    /// Skip confirmation prompt
    #[arg(long)]
    force: bool,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Compute the package hash of a folder (or the SHA-256 of a file)
  Hash {
    path: PathBuf,

    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn main() {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(e) = run(cli) {
    output::print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  let open = || open_manager(cli.root.as_deref(), cli.config.as_deref());

  match cli.command {
    Commands::Hash { path, output } => cmd::cmd_hash(&path, output),
    Commands::Status { output } => cmd::cmd_status(&open()?, cli.verbose, output),
    Commands::Stage { manifest, output } => cmd::cmd_stage(&open()?, &manifest, output),
    Commands::Install {
      mode,
      min_background,
      output,
    } => cmd::cmd_install(&open()?, mode.into(), min_background, output),
    Commands::Ready => cmd::cmd_ready(&open()?),
    Commands::Rollback { output } => cmd::cmd_rollback(&open()?, output),
    Commands::Resolve { output } => cmd::cmd_resolve(&open()?, output),
    Commands::Resume { background, output } => cmd::cmd_resume(&open()?, background, output),
    Commands::Restart {
      only_if_pending,
      output,
    } => cmd::cmd_restart(&open()?, only_if_pending, output),
    Commands::Gc { dry_run, output } => cmd::cmd_gc(&open()?, dry_run, output),
    Commands::Clear { force, output } => cmd::cmd_clear(&open()?, force, output),
  }
}

fn open_manager(root: Option<&Path>, config: Option<&Path>) -> Result<UpdateManager> {
  let mut config = match config {
    Some(path) => UpdaterConfig::load(path)?,
    None => UpdaterConfig::from_env(),
  };

  if let Some(root) = root {
    std::fs::create_dir_all(root).with_context(|| format!("Failed to create {}", root.display()))?;
    config.support_dir =
      dunce::canonicalize(root).with_context(|| format!("Failed to resolve {}", root.display()))?;
  }

  debug!(support_dir = %config.support_dir.display(), "opening updates store");
  UpdateManager::open(config).context("Failed to initialize update manager")
}
