mod cli;
mod context;
mod error;
mod manifest;
mod ownership;
mod reconcile;
mod report;
mod resource;
mod retry;
mod runner;
mod target;
mod ui;
mod users;

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use std::path::PathBuf;
use std::process;

use crate::cli::Cli;
use crate::context::ExecutionContext;
use crate::error::SetupError;
use crate::manifest::Manifest;
use crate::reconcile::Reconciler;
use crate::resource::ResourceKind;
use crate::retry::RetryPolicy;
use crate::users::PasswdDatabase;

/// Setting this forces debug logging regardless of -v
const ENV_DEBUG: &str = "HOMESTEAD_DEBUG";

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{e}");
            process::exit(0);
        }
        Err(e) => {
            // Bad usage is a configuration error, not a usage-error exit code
            eprint!("{e}");
            process::exit(SetupError::Config(String::new()).exit_code());
        }
    };

    init_logging(&cli);

    if let Err(e) = run(&cli) {
        ui::error(&format!("{e:#}"));
        let code = e
            .downcast_ref::<SetupError>()
            .map(SetupError::exit_code)
            .unwrap_or(1);
        process::exit(code);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let ctx = ExecutionContext::detect(cli.cloud_init);

    let (manifest, source_root) = load_manifest(cli)?;

    let needs_git = manifest
        .resources
        .iter()
        .any(|r| r.kind == ResourceKind::GitRepository);
    if needs_git && !runner::command_exists("git") {
        log::warn!("git is not installed; repository resources will fail");
    }

    let db = PasswdDatabase::system();
    let target = target::resolve(&ctx, cli.user.as_deref(), &db)?;
    if !cli.dry_run {
        target::ensure_home(&ctx, &target)?;
    }

    if !cli.quiet {
        ui::header("homestead");
        ui::kv("target user", &target.user);
        ui::kv("home", &target.home.display().to_string());
        if ctx.unattended {
            ui::kv("mode", "unattended");
        }
        if cli.dry_run {
            ui::kv("mode", "dry run");
        }
    }

    if !cli.quiet {
        ui::info(&format!(
            "reconciling {} resources",
            manifest.resources.len()
        ));
    }

    let policy = RetryPolicy::for_context(ctx.unattended);
    let reconciler = Reconciler::new(&ctx, &target, policy, source_root, cli.dry_run);
    let results = reconciler.reconcile_all(&manifest.resources);

    report::report(&results);

    // A completed batch exits 0 even when some resources failed; the
    // summary carries the per-resource outcomes
    Ok(())
}

/// Load the manifest and determine the base directory for its relative
/// local sources (the manifest's own directory, or the cwd for the
/// built-in set).
fn load_manifest(cli: &Cli) -> Result<(Manifest, PathBuf)> {
    match &cli.manifest {
        Some(path) => {
            let manifest = Manifest::load(path)
                .map_err(|e| SetupError::Config(format!("{e:#}")))?;
            let root = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            Ok((manifest, root))
        }
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            Ok((Manifest::builtin(), cwd))
        }
    }
}

fn init_logging(cli: &Cli) {
    let debug_forced = std::env::var(ENV_DEBUG).is_ok_and(|v| !v.is_empty() && v != "false");

    let level = if debug_forced {
        log::LevelFilter::Debug
    } else if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}
