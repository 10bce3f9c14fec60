//! Blob storage abstraction for the watched root and the attachment
//! handoff store.
//!
//! Paths are logical, `/`-separated and relative to the store's root.
//! [`FsBlobStore`] maps them onto a directory tree; the S3 implementation
//! lives in [`crate::blob_s3`].

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::StorageConfig;
use crate::models::FileKind;

/// Directories below the watched root whose contents are never processed.
pub const DEFAULT_EXCLUDES: &[&str] = &["**/Archive/**"];

/// One object as reported by [`BlobStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub path: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// The bytes of one object.
#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Read/write access to a hierarchical blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Human-readable location, used in logs (e.g. `file:///data/inbox`).
    fn describe(&self) -> String;

    /// Every object below the root, at any depth, sorted by path.
    async fn list(&self) -> Result<Vec<BlobEntry>>;

    async fn read(&self, path: &str) -> Result<Blob>;

    /// Create or overwrite the object at `path`.
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;
}

/// A [`BlobStore`] backed by a local directory.
pub struct FsBlobStore {
    root: PathBuf,
    follow_symlinks: bool,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            follow_symlinks: false,
        }
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical path onto the filesystem, refusing anything that
    /// would escape the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path.trim_start_matches('/'));
        if rel.as_os_str().is_empty() {
            bail!("empty blob path");
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => bail!("blob path escapes the store root: {}", path),
            }
        }
        Ok(self.root.join(rel))
    }
}

fn system_time_to_utc(t: std::time::SystemTime) -> Option<DateTime<Utc>> {
    Some(DateTime::<Utc>::from(t))
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn list(&self) -> Result<Vec<BlobEntry>> {
        let root = self.root.clone();
        let follow = self.follow_symlinks;
        if !root.exists() {
            bail!("Storage root does not exist: {}", root.display());
        }

        tokio::task::spawn_blocking(move || -> Result<Vec<BlobEntry>> {
            let mut entries = Vec::new();
            for entry in WalkDir::new(&root).follow_links(follow) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let relative = path.strip_prefix(&root).unwrap_or(path);
                let rel_str = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let metadata = entry.metadata()?;
                entries.push(BlobEntry {
                    path: rel_str,
                    size: metadata.len(),
                    modified_at: metadata.modified().ok().and_then(system_time_to_utc),
                });
            }
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(entries)
        })
        .await
        .context("directory walk task panicked")?
    }

    async fn read(&self, path: &str) -> Result<Blob> {
        let full = self.resolve(path)?;
        let bytes = tokio::fs::read(&full)
            .await
            .with_context(|| format!("Failed to read {}", full.display()))?;
        let modified_at = tokio::fs::metadata(&full)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(system_time_to_utc);
        Ok(Blob { bytes, modified_at })
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))?;
        Ok(())
    }
}

/// Decides which paths under the watched root are discovered as new work.
///
/// A path qualifies when its extension is one the extractor handles, it
/// matches an include glob and it matches no exclude glob. Archive
/// directories are always excluded.
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    pub fn new(include_globs: &[String], exclude_globs: &[String]) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(exclude_globs.iter().cloned());
        Ok(Self {
            include: build_globset(include_globs, true)?,
            exclude: build_globset(&excludes, false)?,
        })
    }

    /// Filter for the configured watched root. When the handoff area lives
    /// inside it, `handoff_prefix` keeps staged attachments from being
    /// discovered a second time.
    pub fn from_config(storage: &StorageConfig, handoff_prefix: Option<&str>) -> Result<Self> {
        let mut excludes = storage.exclude_globs.clone();
        if let Some(prefix) = handoff_prefix {
            excludes.push(format!("{}/**", prefix.trim_matches('/')));
        }
        Self::new(&storage.include_globs, &excludes)
    }

    pub fn is_discoverable(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');
        FileKind::from_path(path).is_discoverable()
            && self.include.is_match(path)
            && !self.exclude.is_match(path)
    }
}

fn build_globset(patterns: &[String], case_insensitive: bool) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .with_context(|| format!("Invalid glob: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_filter() -> PathFilter {
        let include: Vec<String> = ["pdf", "doc", "docx", "txt", "msg"]
            .iter()
            .map(|e| format!("**/*.{}", e))
            .collect();
        PathFilter::new(&include, &[]).unwrap()
    }

    #[test]
    fn filter_accepts_supported_kinds_at_any_depth() {
        let f = default_filter();
        assert!(f.is_discoverable("a.pdf"));
        assert!(f.is_discoverable("x/y/z/deep/Report.DOCX"));
        assert!(f.is_discoverable("x/y/z/deep/report.docx"));
        assert!(f.is_discoverable("/mail/2024/thread.msg"));
        assert!(!f.is_discoverable("photos/cat.png"));
    }

    #[test]
    fn filter_skips_archive_directories() {
        let f = default_filter();
        assert!(!f.is_discoverable("Archive/old.pdf"));
        assert!(!f.is_discoverable("team/Archive/2019/old.txt"));
        assert!(f.is_discoverable("team/Archived.txt"));
    }

    #[test]
    fn handoff_prefix_is_excluded() {
        let storage: StorageConfig = toml::from_str("root = \"in\"").unwrap();
        let f = PathFilter::from_config(&storage, Some("email_attachments")).unwrap();
        assert!(!f.is_discoverable("email_attachments/mail/report.pdf"));
        assert!(f.is_discoverable("mail/report.pdf"));
    }

    #[tokio::test]
    async fn fs_store_round_trips_nested_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        store.write("a/b/c/note.txt", b"hello").await.unwrap();
        store.write("top.pdf", b"%PDF").await.unwrap();

        let blob = store.read("a/b/c/note.txt").await.unwrap();
        assert_eq!(blob.bytes, b"hello");
        assert!(blob.modified_at.is_some());

        let listed: Vec<String> = store.list().await.unwrap().into_iter().map(|e| e.path).collect();
        assert_eq!(listed, vec!["a/b/c/note.txt".to_string(), "top.pdf".to_string()]);
    }

    #[tokio::test]
    async fn fs_store_rejects_escaping_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FsBlobStore::new(tmp.path());
        assert!(store.write("../outside.txt", b"x").await.is_err());
        assert!(store.read("a/../../etc/passwd").await.is_err());
    }
}
