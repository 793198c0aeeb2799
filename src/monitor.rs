//! Directory monitoring.
//!
//! The monitor owns the watched-directory set, the OS watcher, the debouncer
//! and the in-flight set. Raw events flow through three stages:
//!
//! 1. intake: filter ignored and unsafe paths, then schedule the path with the
//!    debouncer, adding the directory's priority throttle to the delay;
//! 2. dispatch: when a path fires, claim it in the in-flight set or skip it;
//! 3. processing: run [`Organizer::organize_file`] on a blocking task.
//!
//! A failure on one path is logged and never stops the loops.

use crate::debounce::Debouncer;
use crate::file_organizer::{FileOutcome, Organizer};
use crate::in_flight::InFlightSet;
use crate::mover::OrganizeError;
use crate::path_filter::is_safe;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Processing priority of a watched directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Delay added on top of the debounce interval for this tier.
    pub fn throttle(self, base: Duration) -> Duration {
        match self {
            Priority::Critical => Duration::ZERO,
            Priority::High => base / 2,
            Priority::Normal => base,
            Priority::Low => base * 2,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!(
                "unknown priority '{}', expected critical, high, normal or low",
                other
            )),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

/// A registered directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedDirectory {
    pub path: PathBuf,
    pub priority: Priority,
    pub throttle: Duration,
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("{} is already watched", .0.display())]
    AlreadyWatched(PathBuf),
    #[error("{} is not watched", .0.display())]
    NotWatched(PathBuf),
    #[error("Cannot watch {}: {source}", path.display())]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Debounce interval must be greater than zero")]
    ZeroDebounce,
    #[error("The monitor must be started inside a tokio runtime")]
    NoRuntime,
    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Timing for a [`DirectoryMonitor`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub debounce: Duration,
    pub base_throttle: Duration,
}

impl From<&crate::config::EngineSettings> for MonitorSettings {
    fn from(settings: &crate::config::EngineSettings) -> Self {
        Self {
            debounce: settings.debounce_interval(),
            base_throttle: settings.base_throttle(),
        }
    }
}

/// A watched directory and the organizer that handles its files.
#[derive(Clone)]
struct Registration {
    dir: WatchedDirectory,
    organizer: Arc<Organizer>,
}

type WatchedSet = Arc<Mutex<HashMap<PathBuf, Registration>>>;

/// State shared with the intake and dispatch tasks.
struct Shared {
    watched: WatchedSet,
    in_flight: InFlightSet,
    /// Used by directories registered without their own organizer.
    organizer: Arc<Organizer>,
    base_throttle: Duration,
}

impl Shared {
    fn watched(&self) -> MutexGuard<'_, HashMap<PathBuf, Registration>> {
        self.watched.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The registration an event path belongs to.
    fn owner_of(&self, path: &Path) -> Option<Registration> {
        let watched = self.watched();
        if let Some(reg) = path.parent().and_then(|parent| watched.get(parent)) {
            return Some(reg.clone());
        }
        watched
            .values()
            .filter(|reg| path.starts_with(&reg.dir.path))
            .max_by_key(|reg| reg.dir.path.components().count())
            .cloned()
    }
}

/// Watches directories and organizes files as they settle.
pub struct DirectoryMonitor {
    shared: Arc<Shared>,
    debouncer: Arc<Debouncer>,
    watcher: Mutex<RecommendedWatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl DirectoryMonitor {
    /// Starts the monitor's tasks on the current tokio runtime. No directory
    /// is watched until [`DirectoryMonitor::watch`] is called.
    pub fn start(settings: MonitorSettings, organizer: Arc<Organizer>) -> Result<Self, WatchError> {
        tokio::runtime::Handle::try_current().map_err(|_| WatchError::NoRuntime)?;

        let (debouncer, fired) = Debouncer::spawn(settings.debounce).ok_or(WatchError::ZeroDebounce)?;
        let debouncer = Arc::new(debouncer);

        let shared = Arc::new(Shared {
            watched: WatchedSet::default(),
            in_flight: InFlightSet::new(),
            organizer,
            base_throttle: settings.base_throttle,
        });

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = raw_tx.send(event);
        })?;

        let intake = tokio::spawn(intake_loop(raw_rx, shared.clone(), debouncer.clone()));
        let dispatch = tokio::spawn(dispatch_loop(fired, shared.clone()));

        Ok(Self {
            shared,
            debouncer,
            watcher: Mutex::new(watcher),
            tasks: vec![intake, dispatch],
        })
    }

    /// Registers `path` for monitoring.
    ///
    /// The path is canonicalized first, so two spellings of the same
    /// directory count as one.
    pub fn watch(&self, path: &Path, priority: Priority) -> Result<WatchedDirectory, WatchError> {
        self.watch_with(path, priority, self.shared.organizer.clone())
    }

    /// Like [`DirectoryMonitor::watch`], but files under `path` go through
    /// `organizer`, and so into its journal, instead of the default one.
    pub fn watch_with(
        &self,
        path: &Path,
        priority: Priority,
        organizer: Arc<Organizer>,
    ) -> Result<WatchedDirectory, WatchError> {
        let canonical = canonical_dir(path)?;

        let mut watched = self.shared.watched();
        if watched.contains_key(&canonical) {
            return Err(WatchError::AlreadyWatched(canonical));
        }

        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watch(&canonical, RecursiveMode::NonRecursive)?;

        let entry = WatchedDirectory {
            path: canonical.clone(),
            priority,
            throttle: priority.throttle(self.shared.base_throttle),
        };
        watched.insert(
            canonical,
            Registration {
                dir: entry.clone(),
                organizer: organizer.clone(),
            },
        );
        info!(
            "Watching {} ({} priority, {:?} throttle, journal {})",
            entry.path.display(),
            entry.priority,
            entry.throttle,
            organizer.journal().path().display()
        );
        Ok(entry)
    }

    /// Stops monitoring `path` and cancels pending timers beneath it.
    pub fn unwatch(&self, path: &Path) -> Result<(), WatchError> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        let removed = self.shared.watched().remove(&key);
        let Some(Registration { dir: entry, .. }) = removed else {
            return Err(WatchError::NotWatched(key));
        };

        if let Err(e) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwatch(&entry.path)
        {
            // The directory may already be gone; the entry is removed either way.
            debug!("Unwatch {}: {}", entry.path.display(), e);
        }

        let cancelled = self.debouncer.cancel_under(&entry.path);
        info!(
            "Stopped watching {} ({} pending events cancelled)",
            entry.path.display(),
            cancelled
        );
        Ok(())
    }

    /// Snapshot of the watched set.
    pub fn watched(&self) -> Vec<WatchedDirectory> {
        let mut dirs: Vec<_> = self
            .shared
            .watched()
            .values()
            .map(|reg| reg.dir.clone())
            .collect();
        dirs.sort_by(|a, b| a.path.cmp(&b.path));
        dirs
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.shared.watched().contains_key(&key)
    }

    /// Effective throttle for events under `path`, if it is watched.
    pub fn throttle_for(&self, path: &Path) -> Option<Duration> {
        self.shared.owner_of(path).map(|reg| reg.dir.throttle)
    }

    /// Adds an ignore pattern to every organizer the monitor uses.
    pub fn add_ignore_pattern(&self, pattern: &str) -> Result<(), crate::config::ConfigError> {
        self.shared.organizer.add_ignore_pattern(pattern)?;
        let organizers: Vec<_> = self
            .shared
            .watched()
            .values()
            .map(|reg| reg.organizer.clone())
            .collect();
        for organizer in organizers {
            organizer.add_ignore_pattern(pattern)?;
        }
        Ok(())
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.shared.in_flight
    }

    pub fn pending_events(&self) -> usize {
        self.debouncer.pending_len()
    }

    /// Hands `path` to the pipeline now, bypassing the debouncer.
    ///
    /// Returns `None` without doing anything if the path is not under a
    /// watched directory or is already being processed.
    pub fn dispatch(&self, path: PathBuf) -> Option<JoinHandle<()>> {
        dispatch(&self.shared, path)
    }
}

impl Drop for DirectoryMonitor {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf, WatchError> {
    let canonical = path.canonicalize().map_err(|source| WatchError::InvalidPath {
        path: path.to_path_buf(),
        source,
    })?;
    if !canonical.is_dir() {
        return Err(WatchError::InvalidPath {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        });
    }
    Ok(canonical)
}

async fn intake_loop(
    mut raw: mpsc::UnboundedReceiver<notify::Result<Event>>,
    shared: Arc<Shared>,
    debouncer: Arc<Debouncer>,
) {
    while let Some(event) = raw.recv().await {
        match event {
            Ok(event) => handle_event(&shared, &debouncer, event),
            Err(e) => warn!("Watcher error: {}", e),
        }
    }
}

/// Paths of `event` that may hold a new or changed file.
///
/// The old name of a rename is gone by the time the event arrives, so it is
/// dropped. This includes the engine's own moves out of a watched root.
fn candidate_paths(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.into_iter().skip(1).collect()
        }
        EventKind::Create(_) | EventKind::Modify(_) => event.paths,
        _ => Vec::new(),
    }
}

fn handle_event(shared: &Shared, debouncer: &Debouncer, event: Event) {
    for path in candidate_paths(event) {
        let Some(Registration { dir: owner, organizer }) = shared.owner_of(&path) else {
            trace!("Event outside watched set: {}", path.display());
            continue;
        };

        if organizer.is_ignored(&path, &owner.path) {
            trace!("Ignoring event for {}", path.display());
            continue;
        }

        if std::fs::symlink_metadata(&path).is_ok() && !is_safe(&path, &owner.path) {
            warn!(
                target: "security",
                "Rejected event for {}: resolves outside {}",
                path.display(),
                owner.path.display()
            );
            continue;
        }

        debouncer.schedule(path, owner.throttle);
    }
}

async fn dispatch_loop(mut fired: mpsc::UnboundedReceiver<PathBuf>, shared: Arc<Shared>) {
    while let Some(path) = fired.recv().await {
        dispatch(&shared, path);
    }
}

fn dispatch(shared: &Arc<Shared>, path: PathBuf) -> Option<JoinHandle<()>> {
    let Some(Registration { dir: owner, organizer }) = shared.owner_of(&path) else {
        debug!("{} is no longer under a watched directory", path.display());
        return None;
    };

    let Some(claim) = shared.in_flight.try_claim(&path) else {
        debug!("{} is already being processed, skipping", path.display());
        return None;
    };

    let work = tokio::task::spawn_blocking(move || {
        let _claim = claim;
        organizer.organize_file(&owner.path, &path)
    });

    Some(tokio::spawn(async move {
        match work.await {
            Ok(Ok(FileOutcome::Moved(_))) => {}
            Ok(Ok(outcome)) => trace!("Outcome {:?}", outcome),
            Ok(Err(OrganizeError::Unjournaled { record, source })) => {
                error!(
                    "Moved {} but the journal write failed: {}",
                    record.destination.display(),
                    source
                );
            }
            Ok(Err(e)) => error!("{}", e),
            Err(join_error) => error!("File processing task failed: {}", join_error),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::journal::MoveJournal;
    use crate::mover::SafeMover;
    use crate::path_filter::IgnoreFilter;
    use crate::rules::RuleMatcher;
    use std::fs;
    use tempfile::TempDir;

    fn organizer(journal_dir: &Path) -> Arc<Organizer> {
        let rules = RuleMatcher::compile(&[RuleConfig {
            pattern: None,
            extensions: Some(vec!["txt".to_string()]),
            target_dir: PathBuf::from("T"),
        }])
        .unwrap();
        Arc::new(Organizer::new(
            rules,
            IgnoreFilter::new(&["*.tmp", "*.jsonl"]).unwrap(),
            SafeMover::new(Arc::new(MoveJournal::new(journal_dir.join("journal.jsonl")))),
        ))
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            debounce: Duration::from_millis(50),
            base_throttle: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_priority_throttle_scaling() {
        let base = Duration::from_millis(400);
        assert_eq!(Priority::Critical.throttle(base), Duration::ZERO);
        assert_eq!(Priority::High.throttle(base), Duration::from_millis(200));
        assert_eq!(Priority::Normal.throttle(base), base);
        assert_eq!(Priority::Low.throttle(base), Duration::from_millis(800));
    }

    #[test]
    fn test_priority_parse_and_display() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::Low.to_string(), "low");
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = DirectoryMonitor::start(settings(), organizer(temp_dir.path()));
        assert!(matches!(result, Err(WatchError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_zero_debounce_is_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = DirectoryMonitor::start(
            MonitorSettings {
                debounce: Duration::ZERO,
                base_throttle: Duration::ZERO,
            },
            organizer(temp_dir.path()),
        );
        assert!(matches!(result, Err(WatchError::ZeroDebounce)));
    }

    #[tokio::test]
    async fn test_double_registration_is_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let monitor = DirectoryMonitor::start(settings(), organizer(temp_dir.path())).unwrap();

        let entry = monitor.watch(temp_dir.path(), Priority::High).unwrap();
        assert_eq!(entry.throttle, Duration::from_millis(50));

        let again = monitor.watch(&temp_dir.path().join("."), Priority::Low);
        assert!(matches!(again, Err(WatchError::AlreadyWatched(_))));
        assert_eq!(monitor.watched().len(), 1);
    }

    #[tokio::test]
    async fn test_unwatch_unknown_and_known() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let monitor = DirectoryMonitor::start(settings(), organizer(temp_dir.path())).unwrap();

        assert!(matches!(
            monitor.unwatch(temp_dir.path()),
            Err(WatchError::NotWatched(_))
        ));

        monitor.watch(temp_dir.path(), Priority::Normal).unwrap();
        assert!(monitor.is_watched(temp_dir.path()));
        monitor.unwatch(temp_dir.path()).unwrap();
        assert!(!monitor.is_watched(temp_dir.path()));
    }

    #[tokio::test]
    async fn test_watch_missing_directory_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let monitor = DirectoryMonitor::start(settings(), organizer(temp_dir.path())).unwrap();

        let result = monitor.watch(&temp_dir.path().join("nope"), Priority::Normal);
        assert!(matches!(result, Err(WatchError::InvalidPath { .. })));
    }

    #[tokio::test]
    async fn test_unwatch_cancels_pending_events() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let monitor = DirectoryMonitor::start(
            MonitorSettings {
                debounce: Duration::from_secs(60),
                base_throttle: Duration::ZERO,
            },
            organizer(temp_dir.path()),
        )
        .unwrap();
        let watched = monitor.watch(temp_dir.path(), Priority::Normal).unwrap();

        monitor
            .debouncer
            .schedule(watched.path.join("a.txt"), Duration::ZERO);
        assert_eq!(monitor.pending_events(), 1);

        monitor.unwatch(temp_dir.path()).unwrap();
        assert_eq!(monitor.pending_events(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_skips_path_already_in_flight() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let monitor = DirectoryMonitor::start(settings(), organizer(temp_dir.path())).unwrap();
        let root = monitor.watch(temp_dir.path(), Priority::Critical).unwrap().path;
        let file = root.join("a.txt");
        fs::write(&file, "a").unwrap();

        let held = monitor.in_flight().try_claim(&file).unwrap();
        assert!(monitor.dispatch(file.clone()).is_none());
        assert!(file.exists());

        drop(held);
        monitor
            .dispatch(file.clone())
            .expect("dispatch after release")
            .await
            .unwrap();
        assert!(!file.exists());
        assert!(root.join("T/a.txt").exists());
    }

    #[tokio::test]
    async fn test_dispatch_outside_watched_set_is_noop() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let monitor = DirectoryMonitor::start(settings(), organizer(temp_dir.path())).unwrap();
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, "a").unwrap();

        assert!(monitor.dispatch(file.clone()).is_none());
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_throttle_for_nested_path_uses_owner() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let monitor = DirectoryMonitor::start(settings(), organizer(temp_dir.path())).unwrap();
        let root = monitor.watch(temp_dir.path(), Priority::Low).unwrap().path;

        assert_eq!(
            monitor.throttle_for(&root.join("x.txt")),
            Some(Duration::from_millis(200))
        );
        assert_eq!(monitor.throttle_for(Path::new("/definitely/elsewhere")), None);
    }

    #[test]
    fn test_rename_source_is_not_a_candidate() {
        let from = PathBuf::from("/w/a.txt");
        let to = PathBuf::from("/w/T/a.txt");

        let renamed_away =
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From))).add_path(from.clone());
        assert!(candidate_paths(renamed_away).is_empty());

        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from.clone())
            .add_path(to.clone());
        assert_eq!(candidate_paths(both), vec![to.clone()]);

        let renamed_in =
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To))).add_path(to.clone());
        assert_eq!(candidate_paths(renamed_in), vec![to]);

        let created = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(from.clone());
        assert_eq!(candidate_paths(created), vec![from.clone()]);

        let removed =
            Event::new(EventKind::Remove(notify::event::RemoveKind::File)).add_path(from);
        assert!(candidate_paths(removed).is_empty());
    }

    #[tokio::test]
    async fn test_each_root_journals_into_its_own_organizer() {
        let first = TempDir::new().expect("Failed to create temp directory");
        let second = TempDir::new().expect("Failed to create temp directory");
        let monitor = DirectoryMonitor::start(settings(), organizer(first.path())).unwrap();

        monitor.watch(first.path(), Priority::Normal).unwrap();
        let second_root = monitor
            .watch_with(second.path(), Priority::Normal, organizer(second.path()))
            .unwrap()
            .path;
        let file = second_root.join("b.txt");
        fs::write(&file, "b").unwrap();

        monitor.dispatch(file).expect("dispatch").await.unwrap();

        let second_journal = MoveJournal::new(second.path().join("journal.jsonl"));
        let first_journal = MoveJournal::new(first.path().join("journal.jsonl"));
        assert_eq!(second_journal.load().unwrap().len(), 1);
        assert!(first_journal.load().unwrap().is_empty());
        assert!(second_root.join("T/b.txt").exists());
    }

    #[tokio::test]
    async fn test_ignore_pattern_reaches_per_root_organizers() {
        let first = TempDir::new().expect("Failed to create temp directory");
        let second = TempDir::new().expect("Failed to create temp directory");
        let monitor = DirectoryMonitor::start(settings(), organizer(first.path())).unwrap();
        let own = organizer(second.path());
        let root = monitor
            .watch_with(second.path(), Priority::Normal, own.clone())
            .unwrap()
            .path;

        monitor.add_ignore_pattern("draft_*").unwrap();
        assert!(own.is_ignored(&root.join("draft_1.txt"), &root));
    }
}
