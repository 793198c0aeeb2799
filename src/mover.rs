/// Physical file relocation with journaling.
///
/// The mover creates missing destination directories, never overwrites an
/// existing file, tolerates sources that vanish before the move, and appends a
/// [`MoveRecord`] to the journal only after the filesystem change succeeded.
use crate::journal::{JournalError, MoveJournal, MoveRecord};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while moving files.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// Failed to create a destination directory.
    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Failed to move a file to its destination.
    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    FileMoveFailure {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The directory to organize is invalid or doesn't exist.
    #[error("Invalid base path {}: {source}", path.display())]
    InvalidBasePath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The move happened but could not be written to the journal. The file
    /// stays at its new location.
    #[error(
        "Moved {} to {} but could not journal it: {source}",
        record.source.display(),
        record.destination.display()
    )]
    Unjournaled {
        record: Box<MoveRecord>,
        #[source]
        source: JournalError,
    },
    /// Reading or clearing the journal failed.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Result type for file organization operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// What a single move attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The file was relocated and journaled.
    Moved(MoveRecord),
    /// The source no longer existed; nothing was changed.
    SourceMissing,
}

/// Moves files and journals each completed move.
#[derive(Debug, Clone)]
pub struct SafeMover {
    journal: Arc<MoveJournal>,
}

impl SafeMover {
    pub fn new(journal: Arc<MoveJournal>) -> Self {
        Self { journal }
    }

    pub fn journal(&self) -> &Arc<MoveJournal> {
        &self.journal
    }

    /// Moves `source` to the file path `destination`.
    ///
    /// Missing parent directories of `destination` are created. If a file
    /// already occupies `destination`, the first free `stem (n).ext` name is
    /// used instead. A source that does not exist is reported as
    /// [`MoveOutcome::SourceMissing`] rather than an error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use std::sync::Arc;
    /// use tidywatch::journal::MoveJournal;
    /// use tidywatch::mover::{MoveOutcome, SafeMover};
    ///
    /// let mover = SafeMover::new(Arc::new(MoveJournal::new("/tmp/journal.jsonl")));
    /// match mover.move_file(Path::new("/tmp/in/a.txt"), Path::new("/tmp/out/a.txt")) {
    ///     Ok(MoveOutcome::Moved(record)) => println!("now at {}", record.destination.display()),
    ///     Ok(MoveOutcome::SourceMissing) => println!("already gone"),
    ///     Err(e) => eprintln!("move failed: {}", e),
    /// }
    /// ```
    pub fn move_file(&self, source: &Path, destination: &Path) -> OrganizeResult<MoveOutcome> {
        if !exists(source) {
            info!("File not found, skipping: {}", source.display());
            return Ok(MoveOutcome::SourceMissing);
        }

        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| OrganizeError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let destination = free_destination(destination);

        match relocate(source, &destination) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound && !exists(source) => {
                info!("File not found, skipping: {}", source.display());
                return Ok(MoveOutcome::SourceMissing);
            }
            Err(e) => {
                return Err(OrganizeError::FileMoveFailure {
                    from: source.to_path_buf(),
                    to: destination,
                    source: e,
                });
            }
        }

        info!("Moved {} -> {}", source.display(), destination.display());
        let record = MoveRecord::new(source.to_path_buf(), destination);

        if let Err(e) = self.journal.append(&record) {
            warn!("{}; the move will not be undoable", e);
            return Err(OrganizeError::Unjournaled {
                record: Box::new(record),
                source: e,
            });
        }

        Ok(MoveOutcome::Moved(record))
    }
}

/// True if anything, including a dangling symlink, sits at `path`.
fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Renames `from` to `to`, copying across filesystems when rename cannot.
pub(crate) fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                "Cross-device move, copying {} -> {}",
                from.display(),
                to.display()
            );
            fs::copy(from, to)?;
            if let Err(remove_err) = fs::remove_file(from) {
                let _ = fs::remove_file(to);
                return Err(remove_err);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Returns `destination` if nothing is there, otherwise `stem (n).ext` with
/// the smallest free `n`.
fn free_destination(destination: &Path) -> PathBuf {
    if !exists(destination) {
        return destination.to_path_buf();
    }

    let parent = destination.parent().unwrap_or_else(|| Path::new(""));
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let extension = destination
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| parent.join(format!("{} ({}){}", stem, n, extension)))
        .find(|candidate| !exists(candidate))
        .unwrap_or_else(|| destination.to_path_buf())
}
