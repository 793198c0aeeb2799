//! First-match rule evaluation.
//!
//! Rules are compiled once from [`RuleConfig`] entries and then evaluated
//! top to bottom for each file. The first rule whose constraints all hold
//! decides the destination directory.
//!
//! # Examples
//!
//! ```
//! use std::path::{Path, PathBuf};
//! use tidywatch::config::RuleConfig;
//! use tidywatch::rules::RuleMatcher;
//!
//! let matcher = RuleMatcher::compile(&[RuleConfig {
//!     pattern: None,
//!     extensions: Some(vec![".txt".to_string()]),
//!     target_dir: PathBuf::from("notes"),
//! }])
//! .unwrap();
//!
//! let root = Path::new("/inbox");
//! assert_eq!(
//!     matcher.match_path(Path::new("/inbox/todo.TXT"), root),
//!     Some(PathBuf::from("/inbox/notes"))
//! );
//! assert_eq!(matcher.match_path(Path::new("/inbox/song.mp3"), root), None);
//! ```

use crate::config::{ConfigError, RuleConfig};
use glob::Pattern;
use std::path::{Path, PathBuf};

/// A compiled organization rule.
#[derive(Debug, Clone)]
pub struct OrganizationRule {
    pattern: Option<Pattern>,
    /// Lowercased, without leading dots.
    extensions: Option<Vec<String>>,
    target_dir: PathBuf,
}

impl OrganizationRule {
    fn compile(config: &RuleConfig) -> Result<Self, ConfigError> {
        let pattern = config
            .pattern
            .as_deref()
            .map(|p| Pattern::new(p).map_err(|_| ConfigError::InvalidGlobPattern(p.to_string())))
            .transpose()?;

        let extensions = config
            .extensions
            .as_ref()
            .map(|exts| exts.iter().map(|e| normalize_extension(e)).collect());

        Ok(Self {
            pattern,
            extensions,
            target_dir: config.target_dir.clone(),
        })
    }

    /// Absent constraints always hold.
    fn matches(&self, file_name: &str, extension: Option<&str>) -> bool {
        if let Some(pattern) = &self.pattern
            && !pattern.matches(file_name)
        {
            return false;
        }

        if let Some(extensions) = &self.extensions {
            let Some(ext) = extension else {
                return false;
            };
            if !extensions.iter().any(|e| e == ext) {
                return false;
            }
        }

        true
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

/// Ordered, immutable list of organization rules.
#[derive(Debug, Clone, Default)]
pub struct RuleMatcher {
    rules: Vec<OrganizationRule>,
}

impl RuleMatcher {
    /// Compiles rules in declared order.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidGlobPattern` if any rule pattern is not a
    /// valid glob.
    pub fn compile(configs: &[RuleConfig]) -> Result<Self, ConfigError> {
        let rules = configs
            .iter()
            .map(OrganizationRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Compiles rules, reporting a failure once and falling back to no rules.
    pub fn compile_or_empty(configs: &[RuleConfig]) -> Self {
        match Self::compile(configs) {
            Ok(matcher) => matcher,
            Err(e) => {
                tracing::error!("Could not compile organization rules: {}; no files will be moved", e);
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[OrganizationRule] {
        &self.rules
    }

    /// Returns the destination directory for `path`, or `None` when no rule
    /// applies.
    ///
    /// Relative targets are resolved against `root`. Nothing on disk is
    /// touched.
    pub fn match_path(&self, path: &Path, root: &Path) -> Option<PathBuf> {
        let file_name = path.file_name()?.to_string_lossy();
        let extension = path
            .extension()
            .map(|e| normalize_extension(&e.to_string_lossy()));

        self.rules
            .iter()
            .find(|rule| rule.matches(&file_name, extension.as_deref()))
            .map(|rule| {
                if rule.target_dir.is_absolute() {
                    rule.target_dir.clone()
                } else {
                    root.join(&rule.target_dir)
                }
            })
    }
}
