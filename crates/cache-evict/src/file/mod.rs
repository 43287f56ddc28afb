//! Eviction for file-backed cache stores
//!
//! Every cache file starts with its expiry as ten ASCII digits (Unix seconds),
//! followed by the payload. Files live in nested hash directories below the
//! store root.

mod local;

pub use local::LocalFiles;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::progress::ProgressSink;
use crate::strategy::EvictionStrategy;
use crate::types::EvictionStats;
use async_trait::async_trait;
use chrono::Utc;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Number of leading bytes holding the expiry timestamp
const EXPIRY_WIDTH: usize = 10;

/// What a directory entry is, without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Other,
}

#[derive(Debug, Clone)]
pub struct DirItem {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Filesystem operations the file strategy needs
#[async_trait]
pub trait CacheFiles: Send + Sync {
    /// Entries directly inside `dir`, sorted by path
    async fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirItem>>;

    async fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Up to `len` leading bytes of the file
    async fn read_header(&self, path: &Path, len: usize) -> io::Result<Vec<u8>>;

    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove `dir` if it is empty
    async fn remove_dir(&self, dir: &Path) -> io::Result<()>;
}

/// Outcome of looking at one cache file
enum FileOutcome {
    Removed { size: u64 },
    NotExpired,
    /// Vanished before we got to it (another process evicted or rewrote it)
    Gone,
    Skipped,
}

/// Walks a file cache directory tree and unlinks expired cache files
pub struct FileEvictionStrategy {
    store_name: String,
    root: PathBuf,
    files: Box<dyn CacheFiles>,
}

impl FileEvictionStrategy {
    pub fn new(store_name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self::with_files(store_name, root, Box::new(LocalFiles))
    }

    pub fn with_files(
        store_name: impl Into<String>,
        root: impl Into<PathBuf>,
        files: Box<dyn CacheFiles>,
    ) -> Self {
        Self {
            store_name: store_name.into(),
            root: root.into(),
            files,
        }
    }

    /// Registry constructor: reads the store's root path from `config`
    pub fn construct(
        store_name: &str,
        config: &CacheConfig,
    ) -> Result<Box<dyn EvictionStrategy>> {
        let store = config.store(store_name)?;
        let root = store.root_path()?.to_path_buf();
        Ok(Box::new(Self::new(store_name, root)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All directories below the root in pre-order ("0", "0/0", "0/1", "1"),
    /// siblings sorted by name. The root itself is not included.
    ///
    /// Unreadable subtrees are left out and counted in the returned skip count.
    async fn all_directories(&self) -> Result<(Vec<PathBuf>, u64)> {
        let mut dirs = Vec::new();
        let mut skipped = 0;

        let mut stack = match self.child_directories(&self.root).await {
            Ok(children) => children,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(store = %self.store_name, root = ?self.root, "Cache root does not exist; nothing to evict");
                return Ok((dirs, skipped));
            }
            Err(e) => return Err(e.into()),
        };
        stack.reverse();

        while let Some(dir) = stack.pop() {
            match self.child_directories(&dir).await {
                Ok(mut children) => {
                    dirs.push(dir);
                    children.reverse();
                    stack.extend(children);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(dir = %self.display(&dir), "Directory vanished during scan");
                }
                Err(e) => {
                    warn!(dir = %self.display(&dir), error = %e, "Could not read cache directory; skipping subtree");
                    skipped += 1;
                }
            }
        }

        Ok((dirs, skipped))
    }

    /// Direct subdirectories of `dir`, sorted by name; symlinks and dot-entries excluded
    async fn child_directories(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .files
            .list_dir(dir)
            .await?
            .into_iter()
            .filter(|item| item.kind == EntryKind::Directory && !is_hidden(&item.path))
            .map(|item| item.path)
            .collect())
    }

    /// Evict expired files directly inside `dir`
    async fn evict_files_in(&self, dir: &Path, stats: &mut EvictionStats) {
        let items = match self.files.list_dir(dir).await {
            Ok(items) => items,
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                warn!(dir = %self.display(dir), error = %e, "Could not list cache directory; skipping");
                stats.skipped += 1;
                return;
            }
        };

        for item in items {
            if item.kind != EntryKind::File || is_hidden(&item.path) {
                continue;
            }

            match self.evict_file(&item.path).await {
                FileOutcome::Removed { size } => {
                    stats.removed_count += 1;
                    stats.reclaimed_bytes += size;
                }
                FileOutcome::Skipped => stats.skipped += 1,
                FileOutcome::NotExpired | FileOutcome::Gone => {}
            }
        }
    }

    async fn evict_file(&self, path: &Path) -> FileOutcome {
        let size = match self.files.file_size(path).await {
            Ok(size) => size,
            Err(e) if e.kind() == ErrorKind::NotFound => return FileOutcome::Gone,
            Err(e) => {
                warn!(file = %self.display(path), error = %e, "Could not read details of cache file; skipping");
                return FileOutcome::Skipped;
            }
        };

        let expiry = match self.files.read_header(path, EXPIRY_WIDTH).await {
            Ok(header) => match parse_expiry(&header) {
                Some(expiry) => expiry,
                None => {
                    warn!(file = %self.display(path), "Cache file has no expiry header; skipping");
                    return FileOutcome::Skipped;
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => return FileOutcome::Gone,
            Err(e) => {
                warn!(file = %self.display(path), error = %e, "Could not read cache file; skipping");
                return FileOutcome::Skipped;
            }
        };

        if Utc::now().timestamp() < expiry {
            return FileOutcome::NotExpired;
        }

        match self.files.remove_file(path).await {
            Ok(()) => FileOutcome::Removed { size },
            Err(e) if e.kind() == ErrorKind::NotFound => FileOutcome::Gone,
            Err(e) => {
                warn!(file = %self.display(path), error = %e, "Could not delete cache file; skipping");
                FileOutcome::Skipped
            }
        }
    }

    fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

#[async_trait]
impl EvictionStrategy for FileEvictionStrategy {
    fn store_name(&self) -> &str {
        &self.store_name
    }

    async fn execute(&self, progress: &dyn ProgressSink) -> Result<EvictionStats> {
        let started = Instant::now();
        let mut stats = EvictionStats::default();

        info!(store = %self.store_name, root = ?self.root, "Finding the cache directories...");
        let (dirs, skipped) = self.all_directories().await?;
        stats.skipped += skipped;
        progress.report_total(dirs.len() as u64);

        // Deepest first: a directory is only removed after all of its
        // subdirectories have been handled.
        for dir in dirs.iter().rev() {
            self.evict_files_in(dir, &mut stats).await;
            progress.advance(1);

            // Usually fails because the directory still holds live entries
            match self.files.remove_dir(dir).await {
                Ok(()) => stats.removed_directories += 1,
                Err(e) => debug!(dir = %self.display(dir), error = %e, "Directory kept"),
            }
        }

        // Files sitting directly in the root; the root itself always stays.
        // A missing root lists as NotFound and is passed over.
        self.evict_files_in(&self.root, &mut stats).await;

        stats.elapsed = started.elapsed();
        progress.report_final(&stats);
        Ok(stats)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}


/// Leading decimal digits of `header` as a Unix timestamp; `None` when the
/// header does not start with a digit
pub(crate) fn parse_expiry(header: &[u8]) -> Option<i64> {
    let digits = header
        .iter()
        .take(EXPIRY_WIDTH)
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    std::str::from_utf8(&header[..digits]).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::progress::{LogProgress, NoProgress};
    use std::collections::HashSet;
    use tempfile::tempdir;
    use tokio::fs;

    const EXPIRED: &str = "0000000001";
    const FOREVER: &str = "9999999999";

    async fn write_entry(root: &Path, rel: &str, expiry: &str, payload: &str) -> u64 {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        let content = format!("{}{}", expiry, payload);
        fs::write(&path, &content).await.unwrap();
        content.len() as u64
    }

    #[test]
    fn test_parse_expiry() {
        assert_eq!(parse_expiry(b"0000000001"), Some(1));
        assert_eq!(parse_expiry(b"1700000000"), Some(1_700_000_000));
        assert_eq!(parse_expiry(b"9999999999"), Some(9_999_999_999));
        assert_eq!(parse_expiry(b"12345"), Some(12345));
        assert_eq!(parse_expiry(b"17000000009999"), Some(1_700_000_000));
        assert_eq!(parse_expiry(b"123abc"), Some(123));
        assert_eq!(parse_expiry(b"abc"), None);
        assert_eq!(parse_expiry(b""), None);
    }

    #[tokio::test]
    async fn test_expired_file_and_empty_directory_removed() {
        let dir = tempdir().unwrap();
        let size = write_entry(dir.path(), "0/abcd", EXPIRED, "s:5:\"hello\";").await;

        let strategy = FileEvictionStrategy::new("file", dir.path());
        let stats = strategy.execute(&NoProgress).await.unwrap();

        assert_eq!(stats.removed_count, 1);
        assert_eq!(stats.reclaimed_bytes, size);
        assert_eq!(stats.removed_directories, 1);
        assert!(!dir.path().join("0/abcd").exists());
        assert!(!dir.path().join("0").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_live_file_and_its_directories_kept() {
        let dir = tempdir().unwrap();
        write_entry(dir.path(), "ab/cd/live", FOREVER, "payload").await;
        write_entry(dir.path(), "ab/ef/dead", EXPIRED, "payload").await;

        let strategy = FileEvictionStrategy::new("file", dir.path());
        let stats = strategy.execute(&NoProgress).await.unwrap();

        assert_eq!(stats.removed_count, 1);
        assert!(dir.path().join("ab/cd/live").exists());
        assert!(!dir.path().join("ab/ef").exists());
        assert!(dir.path().join("ab").exists());
        assert_eq!(stats.removed_directories, 1);
    }

    #[tokio::test]
    async fn test_nested_directories_removed_deepest_first() {
        let dir = tempdir().unwrap();
        write_entry(dir.path(), "0/1/2/x", EXPIRED, "a").await;
        write_entry(dir.path(), "0/1/y", EXPIRED, "b").await;

        let strategy = FileEvictionStrategy::new("file", dir.path());
        let stats = strategy.execute(&NoProgress).await.unwrap();

        assert_eq!(stats.removed_count, 2);
        assert_eq!(stats.removed_directories, 3);
        assert!(!dir.path().join("0").exists());
    }

    #[tokio::test]
    async fn test_second_run_removes_nothing() {
        let dir = tempdir().unwrap();
        write_entry(dir.path(), "aa/bb/old", EXPIRED, "x").await;
        write_entry(dir.path(), "aa/cc/new", FOREVER, "y").await;

        let strategy = FileEvictionStrategy::new("file", dir.path());
        let first = strategy.execute(&NoProgress).await.unwrap();
        assert_eq!(first.removed_count, 1);

        let second = strategy.execute(&NoProgress).await.unwrap();
        assert_eq!(second.removed_count, 0);
        assert_eq!(second.reclaimed_bytes, 0);
        assert_eq!(second.removed_directories, 0);
        assert!(dir.path().join("aa/cc/new").exists());
    }

    #[tokio::test]
    async fn test_empty_and_missing_roots() {
        let dir = tempdir().unwrap();
        let strategy = FileEvictionStrategy::new("file", dir.path());
        let stats = strategy.execute(&NoProgress).await.unwrap();
        assert_eq!(stats.removed_count, 0);
        assert_eq!(stats.removed_directories, 0);

        let strategy = FileEvictionStrategy::new("file", dir.path().join("does-not-exist"));
        let stats = strategy.execute(&NoProgress).await.unwrap();
        assert_eq!(stats, EvictionStats { elapsed: stats.elapsed, ..Default::default() });
    }

    #[tokio::test]
    async fn test_unparseable_and_hidden_files_left_alone() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("zz")).await.unwrap();
        fs::write(dir.path().join("zz/garbage"), "not a cache file").await.unwrap();
        fs::write(dir.path().join(".gitignore"), "*\n!.gitignore\n").await.unwrap();
        write_entry(dir.path(), ".hidden/entry", EXPIRED, "x").await;

        let strategy = FileEvictionStrategy::new("file", dir.path());
        let stats = strategy.execute(&NoProgress).await.unwrap();

        assert_eq!(stats.removed_count, 0);
        assert_eq!(stats.skipped, 1);
        assert!(dir.path().join("zz/garbage").exists());
        assert!(dir.path().join(".gitignore").exists());
        assert!(dir.path().join(".hidden/entry").exists());
    }

    #[tokio::test]
    async fn test_files_in_root_are_evicted() {
        let dir = tempdir().unwrap();
        write_entry(dir.path(), "top-level", EXPIRED, "x").await;

        let strategy = FileEvictionStrategy::new("file", dir.path());
        let stats = strategy.execute(&NoProgress).await.unwrap();

        assert_eq!(stats.removed_count, 1);
        assert_eq!(stats.removed_directories, 0);
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_other_roots_untouched() {
        let parent = tempdir().unwrap();
        let mine = parent.path().join("mine");
        let theirs = parent.path().join("theirs");
        write_entry(&mine, "0/old", EXPIRED, "x").await;
        write_entry(&theirs, "0/old", EXPIRED, "x").await;

        let strategy = FileEvictionStrategy::new("mine", &mine);
        let stats = strategy.execute(&NoProgress).await.unwrap();

        assert_eq!(stats.removed_count, 1);
        assert!(theirs.join("0/old").exists());
    }

    #[tokio::test]
    async fn test_progress_counts_directories() {
        let dir = tempdir().unwrap();
        write_entry(dir.path(), "a/b/x", FOREVER, "x").await;
        write_entry(dir.path(), "c/y", FOREVER, "y").await;

        let progress = LogProgress::new("file");
        let strategy = FileEvictionStrategy::new("file", dir.path());
        strategy.execute(&progress).await.unwrap();

        // a, a/b, c
        assert_eq!(progress.processed(), 3);
    }

    #[tokio::test]
    async fn test_construct_from_config() {
        let dir = tempdir().unwrap();
        let config = CacheConfig::default()
            .with_store(StoreConfig::new("file", "file").with_path(dir.path()));

        let strategy = FileEvictionStrategy::construct("file", &config).unwrap();
        assert_eq!(strategy.store_name(), "file");

        let config = CacheConfig::default().with_store(StoreConfig::new("file", "file"));
        assert!(FileEvictionStrategy::construct("file", &config).is_err());
    }

    /// Local files with injected failures for selected paths
    #[derive(Default)]
    struct FaultyFiles {
        unlistable: HashSet<PathBuf>,
        unreadable: HashSet<PathBuf>,
        undeletable: HashSet<PathBuf>,
        /// Deleted behind our back just before their header is read
        vanishing: HashSet<PathBuf>,
    }

    fn denied() -> io::Error {
        io::Error::new(ErrorKind::PermissionDenied, "permission denied")
    }

    #[async_trait]
    impl CacheFiles for FaultyFiles {
        async fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirItem>> {
            if self.unlistable.contains(dir) {
                return Err(denied());
            }
            LocalFiles.list_dir(dir).await
        }

        async fn file_size(&self, path: &Path) -> io::Result<u64> {
            LocalFiles.file_size(path).await
        }

        async fn read_header(&self, path: &Path, len: usize) -> io::Result<Vec<u8>> {
            if self.unreadable.contains(path) {
                return Err(denied());
            }
            if self.vanishing.contains(path) {
                LocalFiles.remove_file(path).await?;
            }
            LocalFiles.read_header(path, len).await
        }

        async fn remove_file(&self, path: &Path) -> io::Result<()> {
            if self.undeletable.contains(path) {
                return Err(denied());
            }
            LocalFiles.remove_file(path).await
        }

        async fn remove_dir(&self, dir: &Path) -> io::Result<()> {
            LocalFiles.remove_dir(dir).await
        }
    }

    #[tokio::test]
    async fn test_entry_failures_are_skipped_and_sweep_continues() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_entry(root, "locked/old", EXPIRED, "x").await;
        let removed = write_entry(root, "mixed/a-old", EXPIRED, "x").await;
        write_entry(root, "mixed/b-unreadable", EXPIRED, "x").await;
        write_entry(root, "mixed/c-undeletable", EXPIRED, "x").await;
        write_entry(root, "mixed/d-vanishing", EXPIRED, "x").await;
        let other = write_entry(root, "other/old", EXPIRED, "payload").await;

        let files = FaultyFiles {
            unlistable: HashSet::from([root.join("locked")]),
            unreadable: HashSet::from([root.join("mixed/b-unreadable")]),
            undeletable: HashSet::from([root.join("mixed/c-undeletable")]),
            vanishing: HashSet::from([root.join("mixed/d-vanishing")]),
        };
        let strategy = FileEvictionStrategy::with_files("file", root, Box::new(files));
        let stats = strategy.execute(&NoProgress).await.unwrap();

        // mixed/a-old and other/old; the vanished file is not counted
        assert_eq!(stats.removed_count, 2);
        assert_eq!(stats.reclaimed_bytes, removed + other);
        // locked (subtree), b-unreadable, c-undeletable
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.removed_directories, 1);

        assert!(root.join("locked/old").exists());
        assert!(!root.join("mixed/a-old").exists());
        assert!(root.join("mixed/b-unreadable").exists());
        assert!(root.join("mixed/c-undeletable").exists());
        assert!(!root.join("mixed/d-vanishing").exists());
        assert!(!root.join("other").exists());
    }

    #[tokio::test]
    async fn test_unlistable_root_is_an_error() {
        let dir = tempdir().unwrap();
        write_entry(dir.path(), "0/old", EXPIRED, "x").await;

        let files = FaultyFiles {
            unlistable: HashSet::from([dir.path().to_path_buf()]),
            ..Default::default()
        };
        let strategy = FileEvictionStrategy::with_files("file", dir.path(), Box::new(files));
        let result = strategy.execute(&NoProgress).await;

        assert!(matches!(result, Err(crate::error::EvictError::Io(_))));
        assert!(dir.path().join("0/old").exists());
    }
}
