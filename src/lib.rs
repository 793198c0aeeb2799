//! tidywatch - automated file organization for watched directories
//!
//! This library watches directories, waits for files to settle, and moves
//! them into destinations chosen by an ordered rule list. Every move is
//! journaled so a run can be rolled back, and a separate scanner groups
//! byte-identical files by content digest.

pub mod cli;
pub mod config;
pub mod debounce;
pub mod duplicates;
pub mod file_organizer;
pub mod in_flight;
pub mod journal;
pub mod logging;
pub mod monitor;
pub mod mover;
pub mod output;
pub mod path_filter;
pub mod rules;
pub mod undo;

pub use config::{ConfigError, EngineConfig, RuleConfig};
pub use duplicates::{DigestAlgorithm, DuplicateGroup, DuplicateIndex};
pub use file_organizer::{FileOutcome, OrganizeReport, Organizer};
pub use journal::{MoveJournal, MoveRecord};
pub use monitor::{DirectoryMonitor, MonitorSettings, Priority, WatchError, WatchedDirectory};
pub use mover::{MoveOutcome, OrganizeError, SafeMover};
pub use path_filter::{IgnoreFilter, is_safe};
pub use rules::RuleMatcher;
pub use undo::{RollbackReport, UndoManager, rollback};
