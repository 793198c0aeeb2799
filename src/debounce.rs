//! Per-path event debouncing.
//!
//! A single timer task owns the schedule: a map from path to deadline. Each
//! new event for a path replaces its deadline, so any burst of events ends in
//! one fired path once the burst has been quiet for the interval. Fired paths
//! are delivered on an unbounded channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

type Schedule = Arc<Mutex<HashMap<PathBuf, Instant>>>;

/// Handle to the debounce timer task. Dropping it stops the task.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    schedule: Schedule,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Starts the timer task on the current tokio runtime.
    ///
    /// Returns `None` for a zero interval.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(interval: Duration) -> Option<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        if interval.is_zero() {
            return None;
        }

        let schedule: Schedule = Arc::default();
        let wake = Arc::new(Notify::new());
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(schedule.clone(), wake.clone(), fired_tx));

        Some((
            Self {
                interval,
                schedule,
                wake,
                task,
            },
            fired_rx,
        ))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records an event for `path`. The path fires `interval + extra_delay`
    /// after its most recent event.
    pub fn schedule(&self, path: PathBuf, extra_delay: Duration) {
        let deadline = Instant::now() + self.interval + extra_delay;
        let replaced = lock(&self.schedule).insert(path.clone(), deadline).is_some();
        trace!(
            "{} {}",
            if replaced { "Rescheduled" } else { "Scheduled" },
            path.display()
        );
        self.wake.notify_one();
    }

    /// Drops the pending timer for `path`. Returns whether one existed.
    pub fn cancel(&self, path: &Path) -> bool {
        lock(&self.schedule).remove(path).is_some()
    }

    /// Drops every pending timer for paths under `root`. Returns how many.
    pub fn cancel_under(&self, root: &Path) -> usize {
        let mut schedule = lock(&self.schedule);
        let before = schedule.len();
        schedule.retain(|path, _| !path.starts_with(root));
        before - schedule.len()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        lock(&self.schedule).contains_key(path)
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.schedule).len()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(schedule: &Schedule) -> MutexGuard<'_, HashMap<PathBuf, Instant>> {
    schedule.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run(schedule: Schedule, wake: Arc<Notify>, fired: mpsc::UnboundedSender<PathBuf>) {
    loop {
        let (due, next_deadline) = {
            let mut pending = lock(&schedule);
            let now = Instant::now();

            let mut due: Vec<(PathBuf, Instant)> = pending
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(path, deadline)| (path.clone(), *deadline))
                .collect();
            due.sort_by_key(|(_, deadline)| *deadline);
            for (path, _) in &due {
                pending.remove(path);
            }

            (due, pending.values().min().copied())
        };

        for (path, _) in due {
            trace!("Debounce fired for {}", path.display());
            if fired.send(path).is_err() {
                return;
            }
        }

        match next_deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = sleep_until(deadline) => {}
                    _ = wake.notified() => {}
                }
            }
            None => wake.notified().await,
        }
    }
}
