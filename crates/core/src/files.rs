// Filesystem operations confined to the sandbox roots
//
// Every operation resolves its paths immediately before touching the disk,
// and recursive operations re-check each entry they descend into.

use crate::sandbox::{PathSandbox, ResolvedPath, SandboxViolation};
use crate::types::ToolFailure;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// Largest file `read_file` will return
const MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// Cap on matches returned by one search
const MAX_SEARCH_MATCHES: usize = 1000;

/// `EXDEV`: rename across filesystems
#[cfg(unix)]
const CROSS_DEVICE: i32 = 18;
#[cfg(not(unix))]
const CROSS_DEVICE: i32 = 17;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error(transparent)]
    Sandbox(#[from] SandboxViolation),

    #[error("Path does not exist: {0}")]
    NotFound(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Directory is not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Refusing to remove or move a sandbox root: {0}")]
    RootProtected(String),

    #[error("File too large ({size} bytes, limit {limit}): {path}")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("{action} failed for {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
}

impl From<FsError> for ToolFailure {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Sandbox(violation) => violation.into(),
            FsError::NotFound(_) => ToolFailure::not_found(err.to_string()),
            other => ToolFailure::backend(other.to_string()),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn io_error<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> FsError + 'a {
    move |source| {
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound(display(path))
        } else {
            FsError::Io {
                action,
                path: display(path),
                source,
            }
        }
    }
}

fn timestamp(time: io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentEncoding {
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub encoding: ContentEncoding,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStatus {
    pub status: &'static str,
    pub message: String,
}

impl OperationStatus {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub status: &'static str,
    pub message: String,
    pub path: String,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryItem {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryListing {
    pub path: String,
    pub items: Vec<DirectoryItem>,
    pub total_items: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
    pub total_matches: usize,
    pub search_path: String,
    pub pattern: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub readonly: bool,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub extension: String,
    pub parent: String,
}

/// Filesystem backend; every path goes through the sandbox first
#[derive(Debug, Clone)]
pub struct SandboxedFs {
    sandbox: PathSandbox,
}

impl SandboxedFs {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    /// Location of the directory entry itself, without following a final symlink.
    ///
    /// The parent is resolved through the sandbox and the file name appended, so
    /// deleting or moving a link acts on the link, never on what it points at.
    fn entry_location(&self, raw: &Path) -> FsResult<PathBuf> {
        if !raw.is_absolute() {
            return Err(SandboxViolation::RelativePath { path: display(raw) }.into());
        }
        let (parent, name) = match (raw.parent(), raw.file_name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => {
                // `/` or a path ending in `..`: fall back to full resolution
                return Ok(self.sandbox.resolve_path(raw)?.into_path_buf());
            }
        };
        let parent = self.sandbox.resolve_path(parent)?;
        let location = parent.as_path().join(name);
        if !self.sandbox.config().contains(&location) {
            return Err(SandboxViolation::OutsideRoots {
                path: display(raw),
                resolved: display(&location),
            }
            .into());
        }
        Ok(location)
    }

    fn resolve(&self, raw: &str) -> FsResult<ResolvedPath> {
        Ok(self.sandbox.resolve(raw)?)
    }

    pub fn read_file(&self, file_path: &str) -> FsResult<FileContent> {
        let resolved = self.resolve(file_path)?;
        let path = resolved.as_path();
        let meta = fs::metadata(path).map_err(io_error("stat", path))?;
        if !meta.is_file() {
            return Err(FsError::NotAFile(file_path.to_string()));
        }
        if meta.len() > MAX_READ_BYTES {
            return Err(FsError::TooLarge {
                path: file_path.to_string(),
                size: meta.len(),
                limit: MAX_READ_BYTES,
            });
        }

        let bytes = fs::read(path).map_err(io_error("read", path))?;
        let size = bytes.len() as u64;
        let (content, encoding) = match String::from_utf8(bytes) {
            Ok(text) => (text, ContentEncoding::Utf8),
            Err(e) => (
                base64::engine::general_purpose::STANDARD.encode(e.into_bytes()),
                ContentEncoding::Base64,
            ),
        };

        Ok(FileContent {
            path: display(path),
            content,
            encoding,
            size,
        })
    }

    /// Write `content`, creating missing parent directories inside the sandbox
    pub fn write_file(&self, file_path: &str, content: &str) -> FsResult<WriteOutcome> {
        let resolved = self.resolve(file_path)?;
        if resolved.as_path().is_dir() {
            return Err(FsError::NotAFile(file_path.to_string()));
        }
        if let Some(parent) = resolved.as_path().parent() {
            fs::create_dir_all(parent).map_err(io_error("create parent directories", parent))?;
        }

        // Re-resolve now that the parent chain exists
        let target = self.sandbox.resolve_path(resolved.as_path())?;
        let path = target.as_path();
        fs::write(path, content.as_bytes()).map_err(io_error("write", path))?;

        Ok(WriteOutcome {
            status: "success",
            message: format!("Wrote to {}", display(path)),
            path: display(path),
            bytes_written: content.len() as u64,
        })
    }

    pub fn list_directory(&self, dir_path: &str) -> FsResult<DirectoryListing> {
        let resolved = self.resolve(dir_path)?;
        let path = resolved.as_path();
        if !path.exists() {
            return Err(FsError::NotFound(dir_path.to_string()));
        }
        if !path.is_dir() {
            return Err(FsError::NotADirectory(dir_path.to_string()));
        }

        let mut items = Vec::new();
        for entry in fs::read_dir(path).map_err(io_error("list", path))? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(dir = %path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let entry_path = entry.path();
            let link_meta = match fs::symlink_metadata(&entry_path) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(entry = %entry_path.display(), error = %e, "Skipping entry");
                    continue;
                }
            };
            let is_symlink = link_meta.file_type().is_symlink();

            // Only describe a link's target when it stays inside the sandbox
            let meta = if is_symlink {
                self.sandbox
                    .revalidate(&entry_path)
                    .ok()
                    .and_then(|target| fs::metadata(target.as_path()).ok())
            } else {
                Some(link_meta.clone())
            };

            let is_dir = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
            let size = meta
                .as_ref()
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .unwrap_or(0);

            items.push(DirectoryItem {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
                is_symlink,
                size,
                modified: timestamp(link_meta.modified()),
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(DirectoryListing {
            path: display(path),
            total_items: items.len(),
            items,
        })
    }

    pub fn create_directory(&self, dir_path: &str) -> FsResult<OperationStatus> {
        let resolved = self.resolve(dir_path)?;
        let path = resolved.as_path();
        if path.exists() {
            return Err(FsError::AlreadyExists(dir_path.to_string()));
        }
        fs::create_dir_all(path).map_err(io_error("create directory", path))?;
        Ok(OperationStatus::success(format!("Created directory: {}", display(path))))
    }

    pub fn delete_directory(&self, dir_path: &str, recursive: bool) -> FsResult<OperationStatus> {
        let resolved = self.resolve(dir_path)?;
        let path = resolved.as_path();
        if !path.exists() {
            return Err(FsError::NotFound(dir_path.to_string()));
        }
        if !path.is_dir() {
            return Err(FsError::NotADirectory(dir_path.to_string()));
        }
        // A root nested below the target is protected as well
        if resolved.is_root() || self.sandbox.config().shelters_root(path) {
            return Err(FsError::RootProtected(dir_path.to_string()));
        }

        if recursive {
            self.remove_tree(path)?;
        } else {
            let mut entries = fs::read_dir(path).map_err(io_error("list", path))?;
            if entries.next().is_some() {
                return Err(FsError::DirectoryNotEmpty(dir_path.to_string()));
            }
            fs::remove_dir(path).map_err(io_error("remove directory", path))?;
        }

        Ok(OperationStatus::success(format!("Deleted directory: {}", display(path))))
    }

    /// Depth-first removal that never follows symlinks and re-checks every entry
    fn remove_tree(&self, root: &Path) -> FsResult<()> {
        for entry in WalkDir::new(root).follow_links(false).contents_first(true) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                FsError::Io {
                    action: "walk",
                    path: display(&path),
                    source: e.into(),
                }
            })?;

            let location = self.entry_location(entry.path())?;
            if entry.file_type().is_dir() {
                fs::remove_dir(&location).map_err(io_error("remove directory", &location))?;
            } else {
                // Symlinks are unlinked, not followed
                fs::remove_file(&location).map_err(io_error("remove file", &location))?;
            }
        }
        Ok(())
    }

    /// Find files under `dir_path` whose name (or path relative to it) matches a glob
    pub fn search_files(&self, dir_path: &str, pattern: &str, recursive: bool) -> FsResult<SearchResult> {
        let resolved = self.resolve(dir_path)?;
        let base = resolved.as_path();
        if !base.exists() {
            return Err(FsError::NotFound(dir_path.to_string()));
        }
        if !base.is_dir() {
            return Err(FsError::NotADirectory(dir_path.to_string()));
        }

        let glob = glob::Pattern::new(pattern).map_err(|e| FsError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.msg.to_string(),
        })?;
        let options = glob::MatchOptions {
            require_literal_separator: true,
            ..Default::default()
        };

        let walker = WalkDir::new(base)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .follow_links(false)
            .sort_by_file_name();

        let mut matches = Vec::new();
        let mut truncated = false;

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable entry during search");
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = entry.path().strip_prefix(base).unwrap_or(entry.path());
            if !glob.matches_with(&name, options) && !glob.matches_path_with(relative, options) {
                continue;
            }

            // Resolve at the point of use; links leaving the sandbox are dropped
            let target = match self.sandbox.revalidate(entry.path()) {
                Ok(target) => target,
                Err(violation) => {
                    tracing::debug!(entry = %entry.path().display(), %violation, "Search skipped entry");
                    continue;
                }
            };
            let meta = match fs::metadata(target.as_path()) {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };

            if matches.len() == MAX_SEARCH_MATCHES {
                truncated = true;
                break;
            }
            matches.push(SearchMatch {
                path: display(entry.path()),
                name,
                size: meta.len(),
                modified: timestamp(meta.modified()),
            });
        }

        Ok(SearchResult {
            total_matches: matches.len(),
            matches,
            search_path: display(base),
            pattern: pattern.to_string(),
            truncated,
        })
    }

    pub fn get_metadata(&self, file_path: &str) -> FsResult<FileMetadata> {
        let resolved = self.resolve(file_path)?;
        let path = resolved.as_path();
        let meta = fs::metadata(path).map_err(io_error("stat", path))?;

        // Whether the caller's path was itself a link, checked at its real location
        let is_symlink = self
            .entry_location(Path::new(file_path))
            .ok()
            .and_then(|location| fs::symlink_metadata(location).ok())
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        Ok(FileMetadata {
            path: display(path),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: meta.len(),
            is_dir: meta.is_dir(),
            is_symlink,
            readonly: meta.permissions().readonly(),
            created: timestamp(meta.created()),
            modified: timestamp(meta.modified()),
            accessed: timestamp(meta.accessed()),
            extension: path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
            parent: path.parent().map(display).unwrap_or_default(),
        })
    }

    /// Delete a file or a symlink; a link is removed, its target left alone
    pub fn delete_file(&self, file_path: &str) -> FsResult<OperationStatus> {
        let location = self.entry_location(Path::new(file_path))?;
        let meta = fs::symlink_metadata(&location).map_err(io_error("stat", &location))?;
        if meta.is_dir() {
            return Err(FsError::NotAFile(file_path.to_string()));
        }
        fs::remove_file(&location).map_err(io_error("delete", &location))?;
        Ok(OperationStatus::success(format!("Deleted file: {}", display(&location))))
    }

    /// Copy a file. The destination appears complete or not at all.
    pub fn copy_file(&self, src_path: &str, dst_path: &str) -> FsResult<OperationStatus> {
        let src = self.resolve(src_path)?;
        if !src.as_path().is_file() {
            if !src.as_path().exists() {
                return Err(FsError::NotFound(src_path.to_string()));
            }
            return Err(FsError::NotAFile(src_path.to_string()));
        }
        let dst = self.destination_for(src.as_path(), dst_path)?;

        copy_atomic(src.as_path(), &dst)?;
        Ok(OperationStatus::success(format!(
            "Copied {} to {}",
            display(src.as_path()),
            display(&dst)
        )))
    }

    /// Move a file or symlink; rolls the destination back if the source cannot be removed
    pub fn move_file(&self, src_path: &str, dst_path: &str) -> FsResult<OperationStatus> {
        let src = self.entry_location(Path::new(src_path))?;
        let meta = fs::symlink_metadata(&src).map_err(io_error("stat", &src))?;
        if meta.is_dir() {
            return Err(FsError::NotAFile(src_path.to_string()));
        }
        let dst = self.destination_for(&src, dst_path)?;

        match fs::rename(&src, &dst) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(CROSS_DEVICE) && meta.is_file() => {
                copy_atomic(&src, &dst)?;
                if let Err(e) = fs::remove_file(&src) {
                    let _ = fs::remove_file(&dst);
                    return Err(io_error("remove source after copy", &src)(e));
                }
            }
            Err(e) => return Err(io_error("move", &src)(e)),
        }

        Ok(OperationStatus::success(format!(
            "Moved {} to {}",
            display(&src),
            display(&dst)
        )))
    }

    /// Resolve a copy/move target; an existing directory receives the source's name
    fn destination_for(&self, src: &Path, dst_path: &str) -> FsResult<PathBuf> {
        let dst = self.resolve(dst_path)?;
        if dst.as_path().is_dir() {
            let name = src
                .file_name()
                .ok_or_else(|| FsError::NotAFile(display(src)))?;
            let inner = self.sandbox.resolve_path(&dst.as_path().join(name))?;
            if inner.as_path().is_dir() {
                return Err(FsError::AlreadyExists(display(inner.as_path())));
            }
            return Ok(inner.into_path_buf());
        }
        Ok(dst.into_path_buf())
    }
}

/// Copy through a temporary sibling and rename it into place
fn copy_atomic(src: &Path, dst: &Path) -> FsResult<()> {
    let parent = dst
        .parent()
        .ok_or_else(|| FsError::NotADirectory(display(dst)))?;
    if !parent.is_dir() {
        return Err(FsError::NotFound(display(parent)));
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let file_name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{}.{}-{}.partial", file_name, std::process::id(), nanos));

    if let Err(e) = fs::copy(src, &staging) {
        let _ = fs::remove_file(&staging);
        return Err(io_error("copy", src)(e));
    }
    if let Err(e) = fs::rename(&staging, dst) {
        let _ = fs::remove_file(&staging);
        return Err(io_error("finalize copy", dst)(e));
    }
    Ok(())
}
