/// Rollback of journaled moves.
///
/// Records are replayed destination → source in reverse chronological order,
/// so a file moved twice ends up back where it started.
use crate::journal::{MoveJournal, MoveRecord};
use crate::mover::{OrganizeResult, relocate};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Represents the result of a rollback.
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Number of files successfully restored.
    pub restored_files: usize,
    /// Files that failed to restore, with the reason.
    pub failed_restores: Vec<(PathBuf, String)>,
    /// Files that were skipped because they were no longer at their destination.
    pub skipped_files: Vec<(PathBuf, String)>,
}

impl RollbackReport {
    /// Returns the total number of records processed.
    pub fn total_processed(&self) -> usize {
        self.restored_files + self.failed_restores.len() + self.skipped_files.len()
    }

    /// Returns true if every record was restored.
    pub fn is_complete_success(&self) -> bool {
        self.failed_restores.is_empty() && self.skipped_files.is_empty()
    }
}

/// Reverses `entries`, newest first.
///
/// # Edge Cases Handled
///
/// * **File not at destination**: skipped
/// * **File name conflict at source**: the occupant is renamed to `name.bak.<timestamp>`
/// * **Source directory removed**: recreated
/// * **Permission denied**: recorded as a failure with the error reason
pub fn rollback(entries: &[MoveRecord]) -> RollbackReport {
    let mut report = RollbackReport::default();

    for record in entries.iter().rev() {
        match restore_file(record) {
            Ok(()) => {
                info!(
                    "Restored {} -> {}",
                    record.destination.display(),
                    record.source.display()
                );
                report.restored_files += 1;
            }
            Err(Restore::Skipped(path, reason)) => {
                warn!("Skipping {}: {}", path.display(), reason);
                report.skipped_files.push((path, reason));
            }
            Err(Restore::Failed(path, reason)) => {
                warn!("Could not restore {}: {}", path.display(), reason);
                report.failed_restores.push((path, reason));
            }
        }
    }

    report
}

enum Restore {
    Skipped(PathBuf, String),
    Failed(PathBuf, String),
}

fn restore_file(record: &MoveRecord) -> Result<(), Restore> {
    if fs::symlink_metadata(&record.destination).is_err() {
        return Err(Restore::Skipped(
            record.destination.clone(),
            "File not found at expected location".to_string(),
        ));
    }

    if fs::symlink_metadata(&record.source).is_ok() {
        let backup_path = generate_backup_path(&record.source);
        fs::rename(&record.source, &backup_path).map_err(|e| {
            Restore::Failed(
                record.source.clone(),
                format!("Could not backup conflicting file: {}", e),
            )
        })?;
    }

    if let Some(parent) = record.source.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| {
            Restore::Failed(
                record.source.clone(),
                format!("Could not recreate {}: {}", parent.display(), e),
            )
        })?;
    }

    relocate(&record.destination, &record.source).map_err(|e| {
        Restore::Failed(
            record.destination.clone(),
            format!("Failed to restore file: {}", e),
        )
    })
}

/// Generates a backup path for a file by appending a timestamp.
///
/// Example: `file.txt` becomes `file.txt.bak.20251109-143052`
fn generate_backup_path(original_path: &Path) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let filename = original_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    let backup_name = format!("{}.bak.{}", filename, timestamp);

    match original_path.parent() {
        Some(parent) => parent.join(backup_name),
        None => PathBuf::from(backup_name),
    }
}

/// Rolls back a whole journal.
pub struct UndoManager;

impl UndoManager {
    /// Replays every record in `journal` in reverse.
    ///
    /// The journal is cleared only when every record was restored, so a
    /// partial undo can be retried once the failures are fixed.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tidywatch::journal::MoveJournal;
    /// use tidywatch::undo::UndoManager;
    ///
    /// let journal = MoveJournal::new("/path/to/dir/.tidywatch_journal.jsonl");
    /// match UndoManager::undo(&journal) {
    ///     Ok(report) => println!("Restored {} files", report.restored_files),
    ///     Err(e) => eprintln!("Undo failed: {}", e),
    /// }
    /// ```
    pub fn undo(journal: &MoveJournal) -> OrganizeResult<RollbackReport> {
        let entries = journal.load()?;
        let report = rollback(&entries);

        if report.is_complete_success() {
            journal.clear()?;
        } else {
            warn!(
                "Journal {} kept: {} skipped, {} failed",
                journal.path().display(),
                report.skipped_files.len(),
                report.failed_restores.len()
            );
        }

        Ok(report)
    }
}
