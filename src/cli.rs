//! Command-line interface module for tidywatch.
//!
//! Parses arguments with `clap` and drives the engine:
//! - `watch`: monitor directories and organize files as they settle
//! - `organize`: apply the rules to a directory once
//! - `undo`: roll back journaled moves
//! - `dupes`: report byte-identical files

use crate::config::EngineConfig;
use crate::duplicates::{DigestAlgorithm, DuplicateIndex};
use crate::file_organizer::Organizer;
use crate::journal::MoveJournal;
use crate::monitor::{DirectoryMonitor, MonitorSettings, Priority};
use crate::output::{OutputFormatter, human_bytes};
use crate::path_filter::IgnoreFilter;
use crate::undo::UndoManager;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "tidywatch")]
#[command(version, about = "Watch directories and file new arrivals by rule", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./.tidywatchrc.toml, then the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More log output; repeat for trace level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch directories until interrupted
    Watch {
        /// Directories to watch, in addition to [[watch]] entries in the config
        dirs: Vec<PathBuf>,
        /// Priority for directories given on the command line
        #[arg(short, long, default_value = "normal")]
        priority: Priority,
    },
    /// Apply the rules to a directory once
    Organize {
        dir: PathBuf,
        /// Show what would move without touching anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Roll back the moves journaled for a directory
    Undo { dir: PathBuf },
    /// Report duplicate files under a directory
    Dupes {
        dir: PathBuf,
        /// Digest to use (blake3, sha256, xxhash64); overrides the config
        #[arg(short, long)]
        algorithm: Option<DigestAlgorithm>,
    },
}

/// Runs a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::load_or_default(cli.config.as_deref());
    debug!("{} rules, {} watch entries configured", config.rules.len(), config.watch.len());

    match cli.command {
        Command::Watch { dirs, priority } => watch(&config, dirs, priority),
        Command::Organize { dir, dry_run } => organize(&config, &dir, dry_run),
        Command::Undo { dir } => undo(&config, &dir),
        Command::Dupes { dir, algorithm } => dupes(&config, &dir, algorithm),
    }
}

fn build_organizer(config: &EngineConfig, dir: &Path) -> Result<Organizer> {
    let journal_path = config.engine.journal_path_for(dir);
    let organizer = Organizer::from_config(config, journal_path.clone());

    // A custom journal name inside the tree must not be organized itself.
    if let Some(name) = journal_path.file_name().and_then(|n| n.to_str()) {
        organizer
            .add_ignore_pattern(&glob::Pattern::escape(name))
            .context("Failed to ignore the journal file")?;
    }
    Ok(organizer)
}

fn organize(config: &EngineConfig, dir: &Path, dry_run: bool) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let organizer = build_organizer(config, dir)?;
    if organizer.matcher().is_empty() {
        OutputFormatter::warning("No rules configured; nothing will move");
    }

    if dry_run {
        OutputFormatter::dry_run_notice(&format!("Analyzing {}", dir.display()));
        let plan = organizer.plan(dir)?;
        if plan.is_empty() {
            OutputFormatter::plain("No files match any rule.");
            return Ok(());
        }
        for planned in &plan {
            OutputFormatter::plain(&format!(
                "  {} → {}",
                planned.source.display(),
                planned.destination.display()
            ));
        }
        OutputFormatter::summary_table(plan.iter().map(|p| p.destination.as_path()), dir);
        OutputFormatter::dry_run_notice("No files were modified.");
        return Ok(());
    }

    OutputFormatter::info(&format!("Organizing {}", dir.display()));
    let report = organizer.apply_rules(dir)?;

    for record in report.moved.iter().chain(&report.unjournaled) {
        OutputFormatter::moved(record, dir);
    }
    if !report.moved.is_empty() || !report.unjournaled.is_empty() {
        OutputFormatter::summary_table(
            report
                .moved
                .iter()
                .chain(&report.unjournaled)
                .map(|r| r.destination.as_path()),
            dir,
        );
    }

    for path in &report.unsafe_paths {
        OutputFormatter::warning(&format!("Rejected {}: resolves outside the directory", path.display()));
    }
    for record in &report.unjournaled {
        OutputFormatter::warning(&format!(
            "{} was moved but is missing from the journal; undo will not restore it",
            record.destination.display()
        ));
    }
    for (path, reason) in &report.failures {
        OutputFormatter::error(&format!("{}: {}", path.display(), reason));
    }

    if report.has_failures() {
        bail!("Some files could not be organized");
    }
    OutputFormatter::success(&format!(
        "Moved {} file(s). Run 'tidywatch undo {}' to revert.",
        report.moved.len(),
        dir.display()
    ));
    Ok(())
}

fn undo(config: &EngineConfig, dir: &Path) -> Result<()> {
    let journal = MoveJournal::new(config.engine.journal_path_for(dir));
    OutputFormatter::info(&format!("Rolling back moves from {}", journal.path().display()));

    let report = UndoManager::undo(&journal)?;
    if report.total_processed() == 0 {
        OutputFormatter::plain("Nothing to undo.");
        return Ok(());
    }

    OutputFormatter::success(&format!("Restored: {}", report.restored_files));
    if !report.skipped_files.is_empty() {
        OutputFormatter::warning(&format!("Skipped: {}", report.skipped_files.len()));
        for (path, reason) in &report.skipped_files {
            OutputFormatter::plain(&format!("    - {}: {}", path.display(), reason));
        }
    }
    if !report.failed_restores.is_empty() {
        for (path, reason) in &report.failed_restores {
            OutputFormatter::error(&format!("{}: {}", path.display(), reason));
        }
        bail!(
            "{} file(s) failed to restore; the journal was kept",
            report.failed_restores.len()
        );
    }
    if !report.is_complete_success() {
        OutputFormatter::warning("The journal was kept because some entries were skipped.");
    }
    Ok(())
}

fn dupes(config: &EngineConfig, dir: &Path, algorithm: Option<DigestAlgorithm>) -> Result<()> {
    let algorithm = algorithm.unwrap_or(config.duplicates.algorithm);
    let ignore = IgnoreFilter::new(&config.ignore.effective_patterns())?;

    let mut index = DuplicateIndex::new(algorithm).with_ignore(ignore);
    let stats = index.scan(dir)?;
    info!(
        "Hashed {} file(s) with {:?}, {} unreadable",
        stats.files_hashed, algorithm, stats.files_failed
    );

    let groups = index.groups();
    if groups.is_empty() {
        OutputFormatter::success("No duplicates found.");
        return Ok(());
    }

    OutputFormatter::header(&format!("{} duplicate group(s)", groups.len()));
    OutputFormatter::duplicate_groups(&groups);
    let reclaimable: u64 = groups.iter().map(|g| g.reclaimable_bytes()).sum();
    OutputFormatter::info(&format!("\n{} reclaimable", human_bytes(reclaimable)));
    Ok(())
}

fn watch(config: &EngineConfig, dirs: Vec<PathBuf>, priority: Priority) -> Result<()> {
    let mut targets: Vec<(PathBuf, Priority)> = config
        .watch
        .iter()
        .map(|entry| (entry.path.clone(), entry.priority))
        .collect();
    targets.extend(dirs.into_iter().map(|dir| (dir, priority)));

    let Some((first_root, _)) = targets.first() else {
        bail!("Nothing to watch: pass directories or add [[watch]] entries to the config");
    };
    let default_organizer = Arc::new(build_organizer(config, first_root)?);
    let roots: Vec<PathBuf> = targets.iter().map(|(dir, _)| dir.clone()).collect();
    let organizers = root_organizers(config, &roots, &default_organizer)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    runtime.block_on(async {
        let monitor = DirectoryMonitor::start(
            MonitorSettings::from(&config.engine),
            default_organizer.clone(),
        )?;
        for ((dir, priority), organizer) in targets.iter().zip(organizers) {
            monitor
                .watch_with(dir, *priority, organizer)
                .with_context(|| format!("Failed to watch {}", dir.display()))?;
        }

        OutputFormatter::info("Watching; press Ctrl-C to stop.");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        OutputFormatter::plain("Stopping.");
        Ok::<_, anyhow::Error>(())
    })
}

/// One organizer per watched root, so `undo <dir>` finds that root's moves.
/// An absolute `engine.journal_path` is one file, so every root shares
/// `default` instead.
fn root_organizers(
    config: &EngineConfig,
    roots: &[PathBuf],
    default: &Arc<Organizer>,
) -> Result<Vec<Arc<Organizer>>> {
    let shared_journal = config
        .engine
        .journal_path
        .as_deref()
        .is_some_and(Path::is_absolute);

    roots
        .iter()
        .map(|root| {
            if shared_journal || default.journal().path() == config.engine.journal_path_for(root) {
                Ok(default.clone())
            } else {
                build_organizer(config, root).map(Arc::new)
            }
        })
        .collect()
}
