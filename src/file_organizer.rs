/// Rule-driven organization of a directory.
///
/// The [`Organizer`] ties the pieces together for a single file: ignore check,
/// containment check, rule match, then the journaled move. `apply_rules` runs
/// that pipeline over every top-level file of a directory; the monitor runs
/// it for each debounced event.
use crate::config::{ConfigError, EngineConfig};
use crate::journal::{MoveJournal, MoveRecord};
use crate::mover::{MoveOutcome, OrganizeError, OrganizeResult, SafeMover};
use crate::path_filter::{IgnoreFilter, is_safe};
use crate::rules::RuleMatcher;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, trace, warn};

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Moved(MoveRecord),
    /// No rule applies, or the file is already where its rule sends it.
    Unmatched,
    /// Matched an ignore pattern, or is not a regular file.
    Ignored,
    /// Disappeared before it could be handled.
    Missing,
    /// Resolves outside the root it was found in.
    Unsafe,
}

/// Tally of an `apply_rules` run.
#[derive(Debug, Default)]
pub struct OrganizeReport {
    pub moved: Vec<MoveRecord>,
    pub missing: Vec<PathBuf>,
    pub unmatched: Vec<PathBuf>,
    pub ignored: Vec<PathBuf>,
    pub unsafe_paths: Vec<PathBuf>,
    /// Moves that happened but are not in the journal.
    pub unjournaled: Vec<MoveRecord>,
    pub failures: Vec<(PathBuf, String)>,
}

impl OrganizeReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty() || !self.unjournaled.is_empty()
    }
}

/// A planned move from a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Classifies and relocates files according to a rule set.
#[derive(Debug)]
pub struct Organizer {
    matcher: RuleMatcher,
    ignore: RwLock<IgnoreFilter>,
    mover: SafeMover,
}

impl Organizer {
    pub fn new(matcher: RuleMatcher, ignore: IgnoreFilter, mover: SafeMover) -> Self {
        Self {
            matcher,
            ignore: RwLock::new(ignore),
            mover,
        }
    }

    /// Builds an organizer from configuration, journaling to `journal_path`.
    ///
    /// Invalid rules or ignore patterns are reported once and replaced by an
    /// empty set.
    pub fn from_config(config: &EngineConfig, journal_path: PathBuf) -> Self {
        let matcher = RuleMatcher::compile_or_empty(&config.rules);
        let ignore = IgnoreFilter::new(&config.ignore.effective_patterns()).unwrap_or_else(|e| {
            tracing::error!("{}; ignore patterns disabled", e);
            IgnoreFilter::default()
        });
        let mover = SafeMover::new(Arc::new(MoveJournal::new(journal_path)));
        Self::new(matcher, ignore, mover)
    }

    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }

    pub fn journal(&self) -> &Arc<MoveJournal> {
        self.mover.journal()
    }

    /// Adds an ignore pattern without rebuilding the organizer.
    pub fn add_ignore_pattern(&self, pattern: &str) -> Result<(), ConfigError> {
        self.ignore
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_pattern(pattern)
    }

    pub fn is_ignored(&self, path: &Path, root: &Path) -> bool {
        self.ignore
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_ignored(path, root)
    }

    /// Runs the full pipeline for one file found under `root`.
    ///
    /// Only real failures are errors: a vanished file, an ignored path or an
    /// unsafe symlink each come back as a [`FileOutcome`].
    pub fn organize_file(&self, root: &Path, path: &Path) -> OrganizeResult<FileOutcome> {
        match self.resolve_destination(root, path) {
            Resolution::Skip(outcome) => Ok(outcome),
            Resolution::MoveTo(destination) => match self.mover.move_file(path, &destination)? {
                MoveOutcome::Moved(record) => Ok(FileOutcome::Moved(record)),
                MoveOutcome::SourceMissing => Ok(FileOutcome::Missing),
            },
        }
    }

    fn resolve_destination(&self, root: &Path, path: &Path) -> Resolution {
        if self.is_ignored(path, root) {
            trace!("Ignoring {}", path.display());
            return Resolution::Skip(FileOutcome::Ignored);
        }

        if fs::symlink_metadata(path).is_err() {
            info!("File not found, skipping: {}", path.display());
            return Resolution::Skip(FileOutcome::Missing);
        }

        if !is_safe(path, root) {
            warn!(
                target: "security",
                "Rejected {}: resolves outside {}",
                path.display(),
                root.display()
            );
            return Resolution::Skip(FileOutcome::Unsafe);
        }

        if !path.is_file() {
            return Resolution::Skip(FileOutcome::Ignored);
        }

        let Some(target_dir) = self.matcher.match_path(path, root) else {
            debug!("No rule for {}", path.display());
            return Resolution::Skip(FileOutcome::Unmatched);
        };

        let Some(file_name) = path.file_name() else {
            return Resolution::Skip(FileOutcome::Unmatched);
        };
        let destination = target_dir.join(file_name);
        if destination == path {
            return Resolution::Skip(FileOutcome::Unmatched);
        }

        Resolution::MoveTo(destination)
    }

    /// Applies the rules to every top-level entry of `base_path`.
    ///
    /// Individual file failures are collected in the report; only an
    /// unreadable `base_path` is an error.
    pub fn apply_rules(&self, base_path: &Path) -> OrganizeResult<OrganizeReport> {
        let entries = list_entries(base_path)?;
        Ok(self.organize_paths(base_path, entries))
    }

    /// Runs [`Organizer::organize_file`] for each of `paths`, found earlier
    /// under `base_path`. Files that vanished since land in
    /// [`OrganizeReport::missing`].
    pub fn organize_paths<I>(&self, base_path: &Path, paths: I) -> OrganizeReport
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut report = OrganizeReport::default();

        for path in paths {
            match self.organize_file(base_path, &path) {
                Ok(FileOutcome::Moved(record)) => report.moved.push(record),
                Ok(FileOutcome::Missing) => report.missing.push(path),
                Ok(FileOutcome::Unmatched) => report.unmatched.push(path),
                Ok(FileOutcome::Ignored) => report.ignored.push(path),
                Ok(FileOutcome::Unsafe) => report.unsafe_paths.push(path),
                Err(OrganizeError::Unjournaled { record, .. }) => report.unjournaled.push(*record),
                Err(e) => {
                    warn!("{}", e);
                    report.failures.push((path, e.to_string()));
                }
            }
        }

        report
    }

    /// Computes what `apply_rules` would move, without touching anything.
    pub fn plan(&self, base_path: &Path) -> OrganizeResult<Vec<PlannedMove>> {
        Ok(list_entries(base_path)?
            .into_iter()
            .filter_map(|path| match self.resolve_destination(base_path, &path) {
                Resolution::MoveTo(destination) => Some(PlannedMove {
                    source: path,
                    destination,
                }),
                Resolution::Skip(_) => None,
            })
            .collect())
    }
}

enum Resolution {
    Skip(FileOutcome),
    MoveTo(PathBuf),
}

/// Top-level entries of `base_path`, sorted for stable output. Directories
/// are left out; files and symlinks are kept so symlinks get the containment
/// check.
fn list_entries(base_path: &Path) -> OrganizeResult<Vec<PathBuf>> {
    let entries = fs::read_dir(base_path).map_err(|e| OrganizeError::InvalidBasePath {
        path: base_path.to_path_buf(),
        source: e,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| !t.is_dir()))
        .map(|entry| entry.path())
        .collect();
    paths.sort();
    Ok(paths)
}
