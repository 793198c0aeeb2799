//! Output formatting and styling module.
//!
//! All user-facing command output goes through [`OutputFormatter`]; diagnostic
//! logging goes through `tracing` instead.

use crate::duplicates::DuplicateGroup;
use crate::journal::MoveRecord;
use colored::*;
use std::collections::BTreeMap;
use std::path::Path;

/// Manages CLI output with consistent styling.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tidywatch::output::OutputFormatter;
    /// OutputFormatter::success("Rollback complete");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Prints a move as `source → destination`, relative to `base` when possible.
    pub fn moved(record: &MoveRecord, base: &Path) {
        println!(
            "  {} {} → {}",
            "✓".green(),
            relative(&record.source, base),
            relative(&record.destination, base)
        );
    }

    /// Prints how many files landed in each destination directory.
    ///
    /// # Arguments
    ///
    /// * `moves` - The (source, destination) pairs to tally
    /// * `base` - Directory the destinations are shown relative to
    pub fn summary_table<'a, I>(moves: I, base: &Path)
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let counts = tally_by_directory(moves, base);
        let total: usize = counts.values().sum();

        Self::header("SUMMARY");

        let width = counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max("Destination".len());

        println!("{:<width$} | {}", "Destination".bold(), "Files".bold(), width = width);
        println!("{}", "-".repeat(width + 10));
        for (dir, count) in &counts {
            println!(
                "{:<width$} | {} {}",
                dir,
                count.to_string().green(),
                plural(*count),
                width = width
            );
        }
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total.to_string().green().bold(),
            plural(total),
            width = width
        );
    }

    /// Prints duplicate groups, largest reclaimable size first.
    pub fn duplicate_groups(groups: &[DuplicateGroup]) {
        for group in groups {
            println!(
                "\n{} {} × {} ({} reclaimable)",
                short_digest(&group.digest).cyan(),
                group.paths.len(),
                human_bytes(group.size),
                human_bytes(group.reclaimable_bytes()).yellow()
            );
            for path in &group.paths {
                println!("  {}", path.display());
            }
        }
    }
}

/// Counts destination files per parent directory, keyed by the directory
/// relative to `base`.
pub fn tally_by_directory<'a, I>(destinations: I, base: &Path) -> BTreeMap<String, usize>
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut counts = BTreeMap::new();
    for destination in destinations {
        let dir = destination.parent().unwrap_or(destination);
        *counts.entry(relative(dir, base)).or_insert(0) += 1;
    }
    counts
}

/// Formats a byte count with a binary unit.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn relative(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}
