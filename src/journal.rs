/// Append-only rollback journal.
///
/// Every completed move is written as one JSON object per line, and the
/// whole file replayed backwards is the undo log. A crash during an append
/// can leave an unterminated last line. Loading drops such a torn tail, and
/// the next append cuts it off first, so earlier entries stay readable.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

/// Kind of filesystem operation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Move,
}

/// A single completed operation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub kind: OperationKind,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl MoveRecord {
    pub fn new(source: PathBuf, destination: PathBuf) -> Self {
        Self {
            kind: OperationKind::Move,
            source,
            destination,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Failed to write journal {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read journal {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid journal entry at {}:{line}: {reason}", path.display())]
    InvalidEntry {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

pub type JournalResult<T> = Result<T, JournalError>;

/// File-backed move journal shared between concurrent movers.
#[derive(Debug)]
pub struct MoveJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MoveJournal {
    /// Opens a journal at `path`. The file is created lazily on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and syncs it to disk.
    pub fn append(&self, record: &MoveRecord) -> JournalResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let write_failed = |source| JournalError::WriteFailed {
            path: self.path.clone(),
            source,
        };

        let mut line = serde_json::to_string(record).map_err(|e| {
            write_failed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        line.push('\n');

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(write_failed)?;
        truncate_torn_tail(&mut file, &self.path).map_err(write_failed)?;
        file.write_all(line.as_bytes()).map_err(write_failed)?;
        file.sync_data().map_err(write_failed)?;
        Ok(())
    }

    /// Reads every record in chronological order. A missing journal is empty.
    ///
    /// An unparseable last line with no trailing newline is an interrupted
    /// append; it is logged and dropped. Any other bad line is an error.
    pub fn load(&self) -> JournalResult<Vec<MoveRecord>> {
        // Lossy, so a tail cut inside a multi-byte character stays parseable up to it.
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(JournalError::ReadFailed {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        let terminated = content.ends_with('\n');
        let line_count = content.lines().count();

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) if !terminated && index + 1 == line_count => {
                    warn!(
                        "Dropping torn entry at {}:{}: {}",
                        self.path.display(),
                        index + 1,
                        e
                    );
                }
                Err(e) => {
                    return Err(JournalError::InvalidEntry {
                        path: self.path.clone(),
                        line: index + 1,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(records)
    }

    /// Removes the journal file, if present.
    pub fn clear(&self) -> JournalResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(JournalError::WriteFailed {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Cuts an unterminated last line off `file`, keeping everything up to and
/// including the final newline.
fn truncate_torn_tail(file: &mut File, path: &Path) -> io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut content = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut content)?;
    let keep = content
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |newline| newline + 1);
    warn!(
        "Discarding {} bytes of torn entry at the end of {}",
        content.len() - keep,
        path.display()
    );
    file.set_len(keep as u64)
}
