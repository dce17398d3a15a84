use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use wcbt_backup::BackupMode;
use wcbt_backup::compress::CompressionFormat;
use wcbt_core::error::safety_violation;
use wcbt_restore::{RestoreMode, VerificationMode};

#[derive(Debug, Parser)]
#[command(name = "wcbt", version, about = "Local file-tree backup and restore engine", disable_help_subcommand = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a profile's directory layout.
    InitProfile(InitProfileArgs),
    /// Plan, materialize, or execute a backup run for a profile.
    Backup(BackupArgs),
    /// Hash-verify a completed run's archive payloads.
    Verify(VerifyArgs),
    /// Restore a run's archive into a destination directory.
    Restore(RestoreArgs),
}

#[derive(Debug, Args, Clone)]
pub struct LoggingArgs {
    /// Logging filter (same syntax as RUST_LOG), e.g. `info`, `wcbt=debug`.
    ///
    /// When not set, falls back to RUST_LOG, then a default of `info`.
    #[arg(long, env = "WCBT_LOG")]
    pub log: Option<String>,

    /// Optional log file path. When set, logs are written to both console and file.
    #[arg(long, env = "WCBT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Suppress the human-readable success summary on stdout.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Args, Clone)]
pub struct InitProfileArgs {
    /// Profile name.
    #[arg(long)]
    pub profile: String,

    /// Override the data root (defaults to the platform convention).
    #[arg(long, env = "WCBT_DATA_ROOT")]
    pub data_root: Option<PathBuf>,

    /// Print the resolved profile paths after creating them.
    #[arg(long)]
    pub print_paths: bool,
}

#[derive(Debug, Args, Clone)]
pub struct BackupArgs {
    /// Profile name.
    #[arg(long)]
    pub profile: String,

    /// Source directory to back up.
    #[arg(long)]
    pub source: PathBuf,

    /// Override the data root (defaults to the platform convention).
    #[arg(long, env = "WCBT_DATA_ROOT")]
    pub data_root: Option<PathBuf>,

    /// Additional directory name to exclude (repeatable).
    #[arg(long = "exclude-dir")]
    pub exclude_dir: Vec<String>,

    /// Additional file name to exclude (repeatable).
    #[arg(long = "exclude-file")]
    pub exclude_file: Vec<String>,

    /// Disable the built-in default directory exclusions.
    #[arg(long)]
    pub no_default_excludes: bool,

    /// Cap the number of operations executed (testing/throttling aid).
    #[arg(long)]
    pub max_items: Option<usize>,

    /// Plan only; never create a run directory.
    #[arg(long)]
    pub dry_run: bool,

    /// Plan and materialize the run directory, but never copy files.
    #[arg(long)]
    pub materialize: bool,

    /// Plan, materialize, and copy files.
    #[arg(long)]
    pub execute: bool,

    /// Write a human-readable plan report alongside the run.
    #[arg(long)]
    pub write_plan: bool,

    /// Destination for the plan report (requires --write-plan).
    #[arg(long)]
    pub plan_path: Option<PathBuf>,

    /// Allow the plan report write to overwrite an existing file.
    #[arg(long)]
    pub overwrite_plan: bool,

    /// Break a lock that is provably stale (same host, dead pid).
    #[arg(long)]
    pub force: bool,

    /// Break any existing lock regardless of staleness.
    #[arg(long)]
    pub break_lock: bool,

    /// Compress the completed run into a single archive artifact.
    #[arg(long, value_enum, default_value_t = CompressArg::None)]
    pub compress: CompressArg,
}

impl BackupArgs {
    /// Resolves the mutually exclusive `--dry-run`/`--materialize`/`--execute` flags.
    pub fn mode(&self) -> Result<BackupMode, anyhow::Error> {
        match (self.dry_run, self.materialize, self.execute) {
            (true, false, false) => Ok(BackupMode::DryRun),
            (false, true, false) => Ok(BackupMode::Materialize),
            (false, false, true) => Ok(BackupMode::Execute),
            (false, false, false) => {
                Err(safety_violation("exactly one of --dry-run, --materialize, --execute is required").into())
            }
            _ => Err(safety_violation("--dry-run, --materialize, and --execute are mutually exclusive").into()),
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct VerifyArgs {
    /// Profile name.
    #[arg(long)]
    pub profile: String,

    /// Run identifier to verify.
    #[arg(long)]
    pub run_id: String,

    /// Override the data root (defaults to the platform convention).
    #[arg(long, env = "WCBT_DATA_ROOT")]
    pub data_root: Option<PathBuf>,

    /// Break a lock that is provably stale (same host, dead pid).
    #[arg(long)]
    pub force: bool,

    /// Break any existing lock regardless of staleness.
    #[arg(long)]
    pub break_lock: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RestoreArgs {
    /// Path to the source run's manifest.json, or to a `.zip`/`.tar.zst`
    /// archive produced by `backup --compress` (the manifest is extracted
    /// from it transparently).
    #[arg(long)]
    pub manifest: PathBuf,

    /// Destination directory to restore into.
    #[arg(long)]
    pub dest: PathBuf,

    /// Conflict policy for files already present at the destination.
    #[arg(long, value_enum, default_value_t = RestoreModeArg::AddOnly)]
    pub mode: RestoreModeArg,

    /// Post-stage verification strength.
    #[arg(long = "verify", value_enum, default_value_t = VerifyModeArg::None)]
    pub verify: VerifyModeArg,

    /// Plan and stage without promoting into the destination.
    #[arg(long)]
    pub dry_run: bool,

    /// Override the data root. Unused by restore today; accepted for CLI symmetry.
    #[arg(long)]
    pub data_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum CompressArg {
    None,
    Zip,
    TarZst,
}

impl From<CompressArg> for CompressionFormat {
    fn from(value: CompressArg) -> Self {
        match value {
            CompressArg::None => CompressionFormat::None,
            CompressArg::Zip => CompressionFormat::Zip,
            CompressArg::TarZst => CompressionFormat::TarZst,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum RestoreModeArg {
    AddOnly,
    Overwrite,
}

impl From<RestoreModeArg> for RestoreMode {
    fn from(value: RestoreModeArg) -> Self {
        match value {
            RestoreModeArg::AddOnly => RestoreMode::AddOnly,
            RestoreModeArg::Overwrite => RestoreMode::Overwrite,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum VerifyModeArg {
    None,
    Size,
}

impl From<VerifyModeArg> for VerificationMode {
    fn from(value: VerifyModeArg) -> Self {
        match value {
            VerifyModeArg::None => VerificationMode::None,
            VerifyModeArg::Size => VerificationMode::Size,
        }
    }
}
