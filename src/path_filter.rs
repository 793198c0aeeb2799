//! Path safety checks applied before any file is touched.
//!
//! Two independent checks live here:
//! - [`IgnoreFilter`] decides whether a path matches a configured ignore glob.
//! - [`is_safe`] decides whether a path really lives under a trusted base
//!   directory once symlinks are resolved.
//!
//! Both are pure: they never create, move or read file content.

use crate::config::ConfigError;
use glob::Pattern;
use std::path::{Component, Path};

/// Glob-based ignore classification.
///
/// A path is ignored when any configured pattern matches its basename, its
/// `/`-normalized path relative to the scan root, or any single segment of
/// that relative path.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    patterns: Vec<Pattern>,
}

impl IgnoreFilter {
    /// Compiles a filter from glob strings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidGlobPattern` for the first pattern that
    /// fails to compile.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| compile(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Adds a pattern at runtime. On error the filter is left unchanged.
    pub fn add_pattern(&mut self, pattern: &str) -> Result<(), ConfigError> {
        let compiled = compile(pattern)?;
        if !self.patterns.iter().any(|p| p.as_str() == compiled.as_str()) {
            self.patterns.push(compiled);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns true if `path` should be skipped.
    ///
    /// `root` is the directory the path was found under; the full-path check
    /// runs against the path relative to it. Paths outside `root` are checked
    /// as given.
    pub fn is_ignored(&self, path: &Path, root: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        let normalized = normalize(relative);

        let segments: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.patterns.iter().any(|pattern| {
            (!basename.is_empty() && pattern.matches(&basename))
                || pattern.matches(&normalized)
                || segments.iter().any(|segment| pattern.matches(segment))
        })
    }
}

fn compile(pattern: &str) -> Result<Pattern, ConfigError> {
    Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.to_string()))
}

/// Joins the normal components of `path` with `/` regardless of platform.
fn normalize(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Returns true only if `base`, once canonicalized, is a strict ancestor of
/// the canonicalized `target`.
///
/// Either path failing to resolve (missing, dangling link, permission denied)
/// counts as unsafe.
pub fn is_safe(target: &Path, base: &Path) -> bool {
    let Ok(resolved_base) = base.canonicalize() else {
        return false;
    };
    let Ok(resolved_target) = target.canonicalize() else {
        return false;
    };

    resolved_target != resolved_base && resolved_target.starts_with(&resolved_base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn filter(patterns: &[&str]) -> IgnoreFilter {
        IgnoreFilter::new(patterns).unwrap()
    }

    #[test]
    fn test_ignore_by_basename() {
        let f = filter(&["*.tmp", ".DS_Store"]);
        let root = Path::new("/watched");

        assert!(f.is_ignored(Path::new("/watched/download.tmp"), root));
        assert!(f.is_ignored(Path::new("/watched/.DS_Store"), root));
        assert!(!f.is_ignored(Path::new("/watched/report.pdf"), root));
    }

    #[test]
    fn test_ignore_by_segment() {
        let f = filter(&[".git"]);
        let root = Path::new("/repo");

        assert!(f.is_ignored(Path::new("/repo/.git/HEAD"), root));
        assert!(f.is_ignored(Path::new("/repo/sub/.git/config"), root));
        assert!(!f.is_ignored(Path::new("/repo/src/git.rs"), root));
    }

    #[test]
    fn test_ignore_by_relative_path() {
        let f = filter(&["build/*.o"]);
        let root = Path::new("/project");

        assert!(f.is_ignored(Path::new("/project/build/main.o"), root));
        assert!(!f.is_ignored(Path::new("/project/main.o"), root));
    }

    #[test]
    fn test_full_path_matches_across_segments() {
        let f = filter(&["cache/**"]);
        let root = Path::new("");
        let path: std::path::PathBuf = ["cache", "nested", "blob.bin"].iter().collect();

        assert!(f.is_ignored(&path, root));
    }

    #[test]
    fn test_empty_filter_ignores_nothing() {
        let f = IgnoreFilter::default();
        assert!(f.is_empty());
        assert!(!f.is_ignored(Path::new("/a/b.tmp"), Path::new("/a")));
    }

    #[test]
    fn test_add_pattern_at_runtime() {
        let mut f = filter(&[]);
        let root = Path::new("/w");
        assert!(!f.is_ignored(Path::new("/w/movie.part"), root));

        f.add_pattern("*.part").unwrap();
        assert!(f.is_ignored(Path::new("/w/movie.part"), root));

        // Adding twice does not duplicate.
        f.add_pattern("*.part").unwrap();
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn test_add_invalid_pattern_keeps_existing() {
        let mut f = filter(&["*.tmp"]);
        assert!(f.add_pattern("[unclosed").is_err());
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_rejected_on_construction() {
        assert!(IgnoreFilter::new(&["ok.*", "[bad"]).is_err());
    }

    #[test]
    fn test_is_safe_for_regular_child() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let file = base.join("inside.txt");
        fs::write(&file, "x").unwrap();

        assert!(is_safe(&file, base));
    }

    #[test]
    fn test_is_safe_rejects_base_itself_and_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        assert!(!is_safe(base, base));
        assert!(!is_safe(&base.join("missing.txt"), base));
    }

    #[test]
    fn test_is_safe_rejects_sibling_with_shared_prefix() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path().join("data");
        let sibling = temp_dir.path().join("data_other");
        fs::create_dir(&base).unwrap();
        fs::create_dir(&sibling).unwrap();
        let file = sibling.join("f.txt");
        fs::write(&file, "x").unwrap();

        assert!(!is_safe(&file, &base));
    }

    #[cfg(unix)]
    #[test]
    fn test_is_safe_rejects_symlink_escaping_base() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path().join("watched");
        let outside = temp_dir.path().join("outside");
        fs::create_dir(&base).unwrap();
        fs::create_dir(&outside).unwrap();

        let secret = outside.join("secret.txt");
        fs::write(&secret, "secret").unwrap();
        let link = base.join("innocent.txt");
        std::os::unix::fs::symlink(&secret, &link).unwrap();

        assert!(!is_safe(&link, &base));
    }

    #[cfg(unix)]
    #[test]
    fn test_is_safe_allows_symlink_staying_inside() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let real = base.join("real.txt");
        fs::write(&real, "x").unwrap();
        let link = base.join("alias.txt");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert!(is_safe(&link, base));
    }
}
