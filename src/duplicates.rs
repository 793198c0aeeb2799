//! Content-digest duplicate detection.
//!
//! [`DuplicateIndex::scan`] walks a tree, streams every regular file through
//! the configured digest in fixed-size chunks, and groups paths by digest.
//! Hashing runs in parallel; insertion happens in walk order so results are
//! deterministic.

use crate::path_filter::IgnoreFilter;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};
use twox_hash::XxHash64;
use walkdir::WalkDir;

/// Bytes read per chunk while hashing.
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Cannot scan {}: {source}", path.display())]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Supported content digests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Blake3,
    Sha256,
    /// Fast, non-cryptographic.
    Xxhash64,
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(Self::Blake3),
            "sha256" => Ok(Self::Sha256),
            "xxhash64" | "xxhash" => Ok(Self::Xxhash64),
            other => Err(format!(
                "unknown digest '{}', expected blake3, sha256 or xxhash64",
                other
            )),
        }
    }
}

enum StreamHasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
    Xxhash64(XxHash64),
}

impl StreamHasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            DigestAlgorithm::Xxhash64 => Self::Xxhash64(XxHash64::with_seed(0)),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Blake3(h) => {
                h.update(chunk);
            }
            Self::Sha256(h) => h.update(chunk),
            Self::Xxhash64(h) => h.write(chunk),
        }
    }

    fn finish_hex(self) -> String {
        match self {
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Xxhash64(h) => format!("{:016x}", h.finish()),
        }
    }
}

impl DigestAlgorithm {
    /// Digests everything `reader` yields, `CHUNK_SIZE` bytes at a time.
    pub fn digest_reader<R: Read>(self, mut reader: R) -> io::Result<String> {
        let mut hasher = StreamHasher::new(self);
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finish_hex())
    }

    pub fn digest_file(self, path: &Path) -> io::Result<String> {
        self.digest_reader(File::open(path)?)
    }
}

/// Counters from one [`DuplicateIndex::scan`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub files_hashed: usize,
    pub files_failed: usize,
}

/// A set of byte-identical files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub digest: String,
    /// Size of one copy in bytes.
    pub size: u64,
    pub paths: Vec<PathBuf>,
}

impl DuplicateGroup {
    /// Bytes freed by keeping one copy.
    pub fn reclaimable_bytes(&self) -> u64 {
        self.size * (self.paths.len().saturating_sub(1) as u64)
    }
}

/// Digest → paths mapping built by directory walks.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    algorithm: DigestAlgorithm,
    ignore: Option<IgnoreFilter>,
    by_digest: BTreeMap<String, Vec<PathBuf>>,
    by_path: HashMap<PathBuf, String>,
    sizes: HashMap<String, u64>,
}

impl DuplicateIndex {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            ..Default::default()
        }
    }

    /// Skips paths matched by `filter` on every scan. Ignored directories are
    /// not descended into.
    pub fn with_ignore(mut self, filter: IgnoreFilter) -> Self {
        self.ignore = Some(filter);
        self
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Number of distinct paths indexed.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Walks `root` and adds every regular file to the index.
    ///
    /// Symlinks are not followed. Files that cannot be read are logged and
    /// left out. A path indexed by an earlier scan is re-hashed and filed
    /// under its current digest; paths that have since been deleted stay until
    /// [`DuplicateIndex::prune_missing`] is called.
    pub fn scan(&mut self, root: &Path) -> Result<ScanStats, ScanError> {
        let metadata = std::fs::metadata(root).map_err(|source| ScanError::InvalidRoot {
            path: root.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(ScanError::InvalidRoot {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        let files = self.collect_files(root);
        let algorithm = self.algorithm;

        let hashed: Vec<(PathBuf, io::Result<(String, u64)>)> = files
            .into_par_iter()
            .map(|(path, size)| {
                let digest = algorithm.digest_file(&path).map(|d| (d, size));
                (path, digest)
            })
            .collect();

        let mut stats = ScanStats::default();
        for (path, result) in hashed {
            match result {
                Ok((digest, size)) => {
                    self.insert(path, digest, size);
                    stats.files_hashed += 1;
                }
                Err(e) => {
                    warn!("Could not hash {}: {}", path.display(), e);
                    stats.files_failed += 1;
                }
            }
        }

        debug!(
            "Scanned {}: {} hashed, {} failed",
            root.display(),
            stats.files_hashed,
            stats.files_failed
        );
        Ok(stats)
    }

    fn collect_files(&self, root: &Path) -> Vec<(PathBuf, u64)> {
        let ignore = self.ignore.as_ref();

        WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !ignore.is_some_and(|f| f.is_ignored(entry.path(), root))
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let size = match entry.metadata() {
                    Ok(m) => m.len(),
                    Err(e) => {
                        warn!("Could not stat {}: {}", entry.path().display(), e);
                        return None;
                    }
                };
                Some((entry.into_path(), size))
            })
            .collect()
    }

    fn insert(&mut self, path: PathBuf, digest: String, size: u64) {
        if let Some(previous) = self.by_path.get(&path) {
            if *previous == digest {
                return;
            }
            let previous = previous.clone();
            self.remove_from_digest(&previous, &path);
        }

        self.sizes.insert(digest.clone(), size);
        self.by_digest
            .entry(digest.clone())
            .or_default()
            .push(path.clone());
        self.by_path.insert(path, digest);
    }

    fn remove_from_digest(&mut self, digest: &str, path: &Path) {
        if let Some(paths) = self.by_digest.get_mut(digest) {
            paths.retain(|p| p != path);
            if paths.is_empty() {
                self.by_digest.remove(digest);
                self.sizes.remove(digest);
            }
        }
    }

    /// Drops entries whose files no longer exist. Returns how many were removed.
    pub fn prune_missing(&mut self) -> usize {
        let missing: Vec<(PathBuf, String)> = self
            .by_path
            .iter()
            .filter(|(path, _)| std::fs::symlink_metadata(path).is_err())
            .map(|(path, digest)| (path.clone(), digest.clone()))
            .collect();

        for (path, digest) in &missing {
            self.remove_from_digest(digest, path);
            self.by_path.remove(path);
        }
        missing.len()
    }

    /// Every digest seen, including singletons.
    pub fn entries(&self) -> &BTreeMap<String, Vec<PathBuf>> {
        &self.by_digest
    }

    /// Digests shared by more than one path.
    pub fn duplicates(&self) -> BTreeMap<String, Vec<PathBuf>> {
        self.by_digest
            .iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(digest, paths)| (digest.clone(), paths.clone()))
            .collect()
    }

    /// Duplicate groups, largest reclaimable size first.
    pub fn groups(&self) -> Vec<DuplicateGroup> {
        let mut groups: Vec<DuplicateGroup> = self
            .duplicates()
            .into_iter()
            .map(|(digest, paths)| DuplicateGroup {
                size: self.sizes.get(&digest).copied().unwrap_or(0),
                digest,
                paths,
            })
            .collect();
        groups.sort_by(|a, b| {
            b.reclaimable_bytes()
                .cmp(&a.reclaimable_bytes())
                .then_with(|| a.digest.cmp(&b.digest))
        });
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_identical_files_grouped_and_unique_excluded() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), "same bytes").unwrap();
        fs::create_dir(root.join("nested")).unwrap();
        fs::write(root.join("nested/b.txt"), "same bytes").unwrap();
        fs::write(root.join("c.txt"), "different").unwrap();

        let mut index = DuplicateIndex::new(DigestAlgorithm::Blake3);
        let stats = index.scan(root).unwrap();

        assert_eq!(stats.files_hashed, 3);
        let dupes = index.duplicates();
        assert_eq!(dupes.len(), 1);
        let paths = dupes.values().next().unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&root.join("a.txt")));
        assert!(paths.contains(&root.join("nested/b.txt")));
        assert!(!paths.contains(&root.join("c.txt")));
    }

    #[test]
    fn test_every_algorithm_agrees_on_grouping() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("x"), b"12345").unwrap();
        fs::write(root.join("y"), b"12345").unwrap();
        fs::write(root.join("z"), b"54321").unwrap();

        for algorithm in [
            DigestAlgorithm::Blake3,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Xxhash64,
        ] {
            let mut index = DuplicateIndex::new(algorithm);
            index.scan(root).unwrap();
            assert_eq!(index.duplicates().len(), 1, "{:?}", algorithm);
        }
    }

    #[test]
    fn test_known_sha256_digest() {
        let digest = DigestAlgorithm::Sha256.digest_reader(&b"abc"[..]).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_chunked_digest_matches_one_shot() {
        let data = vec![7u8; CHUNK_SIZE * 3 + 17];
        let streamed = DigestAlgorithm::Blake3.digest_reader(&data[..]).unwrap();
        assert_eq!(streamed, blake3::hash(&data).to_hex().to_string());
    }

    #[test]
    fn test_rescan_does_not_duplicate_paths() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("solo.txt"), "only one").unwrap();

        let mut index = DuplicateIndex::default();
        index.scan(root).unwrap();
        index.scan(root).unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.duplicates().is_empty());
    }

    #[test]
    fn test_rescan_refiles_changed_content() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("a"), "v1").unwrap();
        fs::write(root.join("b"), "v1").unwrap();

        let mut index = DuplicateIndex::default();
        index.scan(root).unwrap();
        assert_eq!(index.duplicates().len(), 1);

        fs::write(root.join("b"), "v2").unwrap();
        index.scan(root).unwrap();
        assert!(index.duplicates().is_empty());
        assert_eq!(index.entries().len(), 2);
    }

    #[test]
    fn test_deleted_files_linger_until_pruned() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("a"), "dup").unwrap();
        fs::write(root.join("b"), "dup").unwrap();

        let mut index = DuplicateIndex::default();
        index.scan(root).unwrap();
        fs::remove_file(root.join("b")).unwrap();
        index.scan(root).unwrap();
        assert_eq!(index.duplicates().len(), 1);

        assert_eq!(index.prune_missing(), 1);
        assert!(index.duplicates().is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_ignored_directories_are_pruned() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::create_dir(root.join(".git")).unwrap();
        fs::write(root.join(".git/obj"), "dup").unwrap();
        fs::write(root.join("copy"), "dup").unwrap();

        let mut index = DuplicateIndex::default().with_ignore(IgnoreFilter::new(&[".git"]).unwrap());
        index.scan(root).unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.duplicates().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("ok1"), "same").unwrap();
        fs::write(root.join("ok2"), "same").unwrap();
        let locked = root.join("locked");
        fs::write(&locked, "same").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root can read anything; only assert the skip when it actually fails.
        let readable = File::open(&locked).is_ok();

        let mut index = DuplicateIndex::default();
        let stats = index.scan(root).expect("scan should not abort");

        if readable {
            assert_eq!(stats.files_hashed, 3);
        } else {
            assert_eq!(stats.files_failed, 1);
            assert_eq!(stats.files_hashed, 2);
            assert_eq!(index.duplicates().values().next().unwrap().len(), 2);
        }
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_groups_sorted_by_reclaimable_bytes() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("s1"), "ab").unwrap();
        fs::write(root.join("s2"), "ab").unwrap();
        fs::write(root.join("l1"), "a much longer body").unwrap();
        fs::write(root.join("l2"), "a much longer body").unwrap();
        fs::write(root.join("l3"), "a much longer body").unwrap();

        let mut index = DuplicateIndex::default();
        index.scan(root).unwrap();
        let groups = index.groups();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].paths.len(), 3);
        assert_eq!(groups[0].reclaimable_bytes(), 2 * 18);
        assert_eq!(groups[1].reclaimable_bytes(), 2);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let mut index = DuplicateIndex::default();
        assert!(index.scan(Path::new("/non/existent/root")).is_err());
    }

    #[test]
    fn test_parse_algorithm_names() {
        assert_eq!("BLAKE3".parse::<DigestAlgorithm>(), Ok(DigestAlgorithm::Blake3));
        assert_eq!("xxhash".parse::<DigestAlgorithm>(), Ok(DigestAlgorithm::Xxhash64));
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }
}
