//! [`CacheFiles`] over the local filesystem

use super::{CacheFiles, DirItem, EntryKind};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Cache files on a local disk, accessed through `tokio::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFiles;

#[async_trait]
impl CacheFiles for LocalFiles {
    async fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirItem>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // file_type() does not follow symlinks
            let kind = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => EntryKind::Directory,
                Ok(ft) if ft.is_file() => EntryKind::File,
                _ => EntryKind::Other,
            };
            items.push(DirItem {
                path: entry.path(),
                kind,
            });
        }
        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(items)
    }

    async fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path).await?.len())
    }

    async fn read_header(&self, path: &Path, len: usize) -> io::Result<Vec<u8>> {
        let mut file = fs::File::open(path).await?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }

    async fn remove_dir(&self, dir: &Path) -> io::Result<()> {
        fs::remove_dir(dir).await
    }
}
