//! 本地文件系统实现：tokio::fs 读写，notify 轮询监听

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::{DirEntry, FileStat, FileSystem, PlatformError, PlatformResult, WatchEvent, WatchEventKind, WatchStream};

/// 监听轮询间隔
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn to_watch_kind(kind: &EventKind) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Created),
        EventKind::Modify(_) => Some(WatchEventKind::Changed),
        EventKind::Remove(_) => Some(WatchEventKind::Deleted),
        _ => None,
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read(&self, path: &Path) -> PlatformResult<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write(&self, path: &Path, content: &str) -> PlatformResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn list(&self, path: &Path) -> PlatformResult<Vec<DirEntry>> {
        let mut dir = tokio::fs::read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(e) = dir.next_entry().await? {
            let is_dir = e.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntry {
                name: e.file_name().to_string_lossy().to_string(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &Path) -> PlatformResult<FileStat> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn delete(&self, path: &Path) -> PlatformResult<()> {
        // 符号链接只删除链接本身
        let meta = tokio::fs::symlink_metadata(path).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    fn watch(&self, path: &Path) -> PlatformResult<WatchStream> {
        if !path.exists() {
            return Err(PlatformError::NotFound(path.display().to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel::<WatchEvent>();
        let mut watcher = PollWatcher::new(
            move |res: Result<NotifyEvent, notify::Error>| {
                let Ok(event) = res else { return };
                let Some(kind) = to_watch_kind(&event.kind) else { return };
                for path in event.paths {
                    let _ = tx.send(WatchEvent { kind, path });
                }
            },
            notify::Config::default().with_poll_interval(WATCH_POLL_INTERVAL),
        )
        .map_err(|e| PlatformError::Unavailable(format!("watcher: {e}")))?;
        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| PlatformError::Unavailable(format!("watch {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "watching path");

        // watcher 随流一起存活，流被丢弃时监听停止
        let stream = futures_util::stream::unfold((rx, watcher), |(mut rx, watcher)| async move {
            rx.recv().await.map(|ev| (ev, (rx, watcher)))
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parent_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let target = dir.path().join("nested/deeper/a.txt");
        fs.write(&target, "hello").await.unwrap();
        assert!(fs.exists(&target).await);
        assert_eq!(fs.read(&target).await.unwrap(), "hello");
        let stat = fs.stat(&target).await.unwrap();
        assert_eq!(stat.size, 5);
        assert!(!stat.is_dir);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let err = fs.read(&dir.path().join("missing.txt")).await.unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_sorted_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        fs.write(&dir.path().join("b.txt"), "b").await.unwrap();
        fs.write(&dir.path().join("a/inner.txt"), "a").await.unwrap();
        let entries = fs.list(dir.path()).await.unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "a".into(), is_dir: true },
                DirEntry { name: "b.txt".into(), is_dir: false },
            ]
        );
        fs.delete(&dir.path().join("a")).await.unwrap();
        assert!(!fs.exists(&dir.path().join("a")).await);
    }

    #[tokio::test]
    async fn test_watch_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        assert!(matches!(
            fs.watch(&dir.path().join("nope")),
            Err(PlatformError::NotFound(_))
        ));
    }
}
