mod cli;
mod logging;

use clap::Parser as _;
use wcbt_backup::scan::ScanRules;
use wcbt_backup::verify::verify;
use wcbt_backup::{BackupRequest, run_backup};
use wcbt_core::clock::SystemClock;
use wcbt_core::error::downcast_kind;
use wcbt_core::manifest::RunManifest;
use wcbt_core::paths::{ensure_profile_directories, resolve_profile_paths};
use wcbt_lock::{AcquireFlags, ProfileLock};
use wcbt_restore::{RestoreRequest, run_restore};

use crate::cli::{BackupArgs, Cli, Command, InitProfileArgs, RestoreArgs, VerifyArgs};

fn main() {
    let cli = Cli::parse();

    let _logging_guard = match logging::init(&cli.logging) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {err:#}");
            std::process::exit(2);
        }
    };

    let quiet = cli.logging.quiet;
    if let Err(err) = run(cli.command, quiet) {
        eprintln!("error: {err:#}");
        let code = downcast_kind(&err).map(|kind| kind.exit_code()).unwrap_or(2);
        std::process::exit(code);
    }
}

fn run(command: Command, quiet: bool) -> Result<(), anyhow::Error> {
    match command {
        Command::InitProfile(args) => run_init_profile(args, quiet),
        Command::Backup(args) => run_backup_command(args, quiet),
        Command::Verify(args) => run_verify_command(args, quiet),
        Command::Restore(args) => run_restore_command(args, quiet),
    }
}

fn command_line() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

fn run_init_profile(args: InitProfileArgs, quiet: bool) -> Result<(), anyhow::Error> {
    let paths = resolve_profile_paths(&args.profile, args.data_root.as_deref())?;
    ensure_profile_directories(&paths)?;

    if !quiet {
        println!("initialized profile '{}' at {}", paths.profile_name, paths.profile_root.display());
    }
    if args.print_paths {
        println!("profile_root: {}", paths.profile_root.display());
        println!("work_root: {}", paths.work_root.display());
        println!("manifests_root: {}", paths.manifests_root.display());
        println!("archives_root: {}", paths.archives_root.display());
        println!("index_root: {}", paths.index_root.display());
        println!("logs_root: {}", paths.logs_root.display());
        println!("live_snapshots_root: {}", paths.live_snapshots_root.display());
    }
    Ok(())
}

fn run_backup_command(args: BackupArgs, quiet: bool) -> Result<(), anyhow::Error> {
    let mode = args.mode()?;
    let paths = resolve_profile_paths(&args.profile, args.data_root.as_deref())?;

    let mut scan_rules = if args.no_default_excludes {
        ScanRules {
            excluded_dirs: Default::default(),
            excluded_files: Default::default(),
        }
    } else {
        ScanRules::default()
    };
    scan_rules.excluded_dirs.extend(args.exclude_dir.iter().cloned());
    scan_rules.excluded_files.extend(args.exclude_file.iter().cloned());

    let clock = SystemClock;
    let outcome = run_backup(
        &paths,
        &clock,
        BackupRequest {
            source: args.source,
            mode,
            scan_rules,
            max_items: args.max_items,
            write_plan: args.write_plan,
            plan_path: args.plan_path,
            overwrite_plan: args.overwrite_plan,
            lock_flags: AcquireFlags {
                force: args.force,
                break_lock: args.break_lock,
            },
            compression: args.compress.into(),
            command: command_line(),
        },
    )?;

    if !quiet {
        println!("run_id: {}", outcome.run_id);
        println!("archive_root: {}", outcome.archive_root.display());
        if let Some(artifact) = &outcome.compressed_artifact {
            println!("compressed_artifact: {}", artifact.display());
        }
    }
    Ok(())
}

fn run_verify_command(args: VerifyArgs, quiet: bool) -> Result<(), anyhow::Error> {
    let paths = resolve_profile_paths(&args.profile, args.data_root.as_deref())?;
    let run_dir = paths.archives_root.join(&args.run_id);
    let manifest_path = run_dir.join("manifest.json");

    let clock = SystemClock;
    let guard = ProfileLock::acquire(
        &paths,
        &clock,
        &command_line(),
        Some(args.run_id.clone()),
        AcquireFlags {
            force: args.force,
            break_lock: args.break_lock,
        },
    )?;

    let result = (|| -> Result<RunManifest, anyhow::Error> {
        let text = std::fs::read_to_string(&manifest_path)?;
        let mut manifest: RunManifest = serde_json::from_str(&text)?;
        verify(&run_dir, &mut manifest)?;
        Ok(manifest)
    })();
    drop(guard);
    let manifest = result?;

    if !quiet {
        let summary = manifest.verification.as_ref();
        println!("run_id: {}", manifest.run_id);
        println!(
            "verified: {}",
            summary.map(|v| v.verified_count).unwrap_or_default()
        );
        println!("failed: {}", summary.map(|v| v.failed_count).unwrap_or_default());
        println!(
            "not_applicable: {}",
            summary.map(|v| v.not_applicable_count).unwrap_or_default()
        );
    }
    Ok(())
}

fn run_restore_command(args: RestoreArgs, quiet: bool) -> Result<(), anyhow::Error> {
    let outcome = run_restore(RestoreRequest {
        manifest_path: args.manifest,
        destination_root: args.dest,
        mode: args.mode.into(),
        verification: args.verify.into(),
        dry_run: args.dry_run,
    })?;

    if !quiet {
        println!("run_id: {}", outcome.run_id);
        println!("destination_root: {}", outcome.destination_root.display());
        println!("staged: {}", outcome.staged_count);
        println!("skipped_existing: {}", outcome.skipped_existing_count);
    }
    Ok(())
}
