// Path confinement for filesystem tools

use crate::types::{ErrorKind, ToolFailure};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Symlink hops followed while resolving a dangling link before giving up
const MAX_SYMLINK_HOPS: usize = 40;

/// Startup-time problems with the configured roots
#[derive(Debug, thiserror::Error)]
pub enum SandboxConfigError {
    #[error("sandbox root must be an absolute path: {0}")]
    RelativeRoot(PathBuf),

    #[error("sandbox root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("cannot read sandbox root {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Set of canonical directories every filesystem tool is confined to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxConfig {
    allowed_roots: Vec<PathBuf>,
}

impl SandboxConfig {
    /// Canonicalize each root. Any root that cannot be read is a fatal error.
    pub fn new<I, P>(roots: I) -> Result<Self, SandboxConfigError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut allowed_roots: Vec<PathBuf> = Vec::new();
        for root in roots {
            let root = root.as_ref();
            if !root.is_absolute() {
                return Err(SandboxConfigError::RelativeRoot(root.to_path_buf()));
            }
            let canonical = fs::canonicalize(root).map_err(|source| SandboxConfigError::Unreadable {
                path: root.to_path_buf(),
                source,
            })?;
            if !canonical.is_dir() {
                return Err(SandboxConfigError::NotADirectory(root.to_path_buf()));
            }
            fs::read_dir(&canonical).map_err(|source| SandboxConfigError::Unreadable {
                path: root.to_path_buf(),
                source,
            })?;
            if !allowed_roots.contains(&canonical) {
                allowed_roots.push(canonical);
            }
        }
        Ok(Self { allowed_roots })
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    pub fn is_empty(&self) -> bool {
        self.allowed_roots.is_empty()
    }

    /// Component-wise containment; `/allowed-evil` is not inside `/allowed`
    pub fn contains(&self, canonical: &Path) -> bool {
        self.allowed_roots.iter().any(|root| canonical.starts_with(root))
    }

    /// True when some root is `canonical` itself or lies beneath it
    pub fn shelters_root(&self, canonical: &Path) -> bool {
        self.allowed_roots.iter().any(|root| root.starts_with(canonical))
    }

    /// Innermost root containing the path, so nested roots report themselves
    fn root_for(&self, canonical: &Path) -> Option<&Path> {
        self.allowed_roots
            .iter()
            .filter(|root| canonical.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }
}

/// A path rejected by the sandbox. The filesystem is never touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxViolation {
    #[error("Path must be absolute: {path}")]
    RelativePath { path: String },

    #[error("Path escapes the allowed roots: {path} (resolves to {resolved})")]
    OutsideRoots { path: String, resolved: String },

    #[error("Cannot resolve path {path}: {reason}")]
    Unresolvable { path: String, reason: String },
}

impl SandboxViolation {
    /// The caller-supplied path that was rejected
    pub fn path(&self) -> &str {
        match self {
            Self::RelativePath { path }
            | Self::OutsideRoots { path, .. }
            | Self::Unresolvable { path, .. } => path,
        }
    }
}

impl From<SandboxViolation> for ToolFailure {
    fn from(violation: SandboxViolation) -> Self {
        let details = serde_json::json!({ "path": violation.path() });
        ToolFailure::new(ErrorKind::SandboxViolation, violation.to_string()).with_details(details)
    }
}

/// Canonical path that lay inside an allowed root when it was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
    root: PathBuf,
}

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// The allowed root this path lives under
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }

    /// True when the path is the root itself
    pub fn is_root(&self) -> bool {
        self.path == self.root
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Resolves caller paths against a shared, read-only [`SandboxConfig`]
#[derive(Debug, Clone)]
pub struct PathSandbox {
    config: Arc<SandboxConfig>,
}

impl PathSandbox {
    pub fn new(config: Arc<SandboxConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Resolve a caller-supplied path string
    pub fn resolve(&self, raw_path: &str) -> Result<ResolvedPath, SandboxViolation> {
        self.resolve_path(Path::new(raw_path))
    }

    /// Resolve `raw` to its real absolute location and check it is inside a root.
    ///
    /// Symlinks are followed before the containment check. Targets that do not
    /// exist yet resolve through their deepest existing ancestor.
    pub fn resolve_path(&self, raw: &Path) -> Result<ResolvedPath, SandboxViolation> {
        let display = raw.to_string_lossy().into_owned();
        if !raw.is_absolute() {
            return Err(SandboxViolation::RelativePath { path: display });
        }

        let canonical = canonicalize_lenient(raw, 0).map_err(|e| SandboxViolation::Unresolvable {
            path: display.clone(),
            reason: e.to_string(),
        })?;

        match self.config.root_for(&canonical) {
            Some(root) => Ok(ResolvedPath {
                root: root.to_path_buf(),
                path: canonical,
            }),
            None => Err(SandboxViolation::OutsideRoots {
                path: display,
                resolved: canonical.to_string_lossy().into_owned(),
            }),
        }
    }

    /// Re-validate an entry found while walking a resolved directory.
    ///
    /// Symlinked entries are resolved to their target; entries whose real
    /// location has left the sandbox are rejected.
    pub fn revalidate(&self, entry: &Path) -> Result<ResolvedPath, SandboxViolation> {
        self.resolve_path(entry)
    }
}

/// Like `fs::canonicalize`, but tolerates a missing tail.
///
/// The deepest existing ancestor is canonicalized and the missing components
/// are appended. A `..` inside the missing tail is refused because the OS could
/// not resolve it either.
fn canonicalize_lenient(path: &Path, hops: usize) -> io::Result<PathBuf> {
    if hops > MAX_SYMLINK_HOPS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "too many levels of symbolic links",
        ));
    }

    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();

    let base = loop {
        match fs::symlink_metadata(&existing) {
            Ok(meta) if meta.file_type().is_symlink() => match fs::canonicalize(&existing) {
                Ok(resolved) => break resolved,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // Dangling link: follow it by hand so a later create lands where we checked
                    let target = fs::read_link(&existing)?;
                    let target = match existing.parent() {
                        Some(parent) if target.is_relative() => parent.join(target),
                        _ => target,
                    };
                    let mut followed = canonicalize_lenient(&target, hops + 1)?;
                    followed.extend(missing.iter().rev());
                    return Ok(followed);
                }
                Err(e) => return Err(e),
            },
            Ok(_) => break fs::canonicalize(&existing)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let name = match existing.components().next_back() {
                    Some(Component::Normal(name)) => name.to_os_string(),
                    _ => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "parent traversal through a path that does not exist",
                        ))
                    }
                };
                missing.push(name);
                existing.pop();
            }
            Err(e) => return Err(e),
        }
    };

    let mut resolved = base;
    resolved.extend(missing.iter().rev());
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox_for(dir: &TempDir) -> PathSandbox {
        let config = SandboxConfig::new([dir.path()]).unwrap();
        PathSandbox::new(Arc::new(config))
    }

    fn canonical_root(dir: &TempDir) -> PathBuf {
        fs::canonicalize(dir.path()).unwrap()
    }

    #[test]
    fn test_resolves_existing_file_under_root() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        let sandbox = sandbox_for(&dir);

        let resolved = sandbox
            .resolve(dir.path().join("notes.txt").to_str().unwrap())
            .unwrap();
        assert_eq!(resolved.as_path(), canonical_root(&dir).join("notes.txt"));
        assert_eq!(resolved.root(), canonical_root(&dir));
    }

    #[test]
    fn test_root_itself_is_allowed() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox_for(&dir);
        let resolved = sandbox.resolve(dir.path().to_str().unwrap()).unwrap();
        assert!(resolved.is_root());
    }

    #[test]
    fn test_relative_path_rejected() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox_for(&dir);
        let err = sandbox.resolve("notes.txt").unwrap_err();
        assert!(matches!(err, SandboxViolation::RelativePath { .. }));
        assert_eq!(err.path(), "notes.txt");
    }

    #[test]
    fn test_parent_traversal_escape_rejected() {
        let outer = TempDir::new().unwrap();
        let data = outer.path().join("data");
        let etc = outer.path().join("etc");
        fs::create_dir(&data).unwrap();
        fs::create_dir(&etc).unwrap();
        fs::write(etc.join("passwd"), "root:x:0:0").unwrap();

        let sandbox = PathSandbox::new(Arc::new(SandboxConfig::new([&data]).unwrap()));
        let raw = format!("{}/../etc/passwd", data.display());
        let err = sandbox.resolve(&raw).unwrap_err();
        assert!(matches!(err, SandboxViolation::OutsideRoots { .. }));
        assert_eq!(err.path(), raw);
    }

    #[test]
    fn test_dotdot_that_stays_inside_is_allowed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        let sandbox = sandbox_for(&dir);

        let raw = format!("{}/a/./../b.txt", dir.path().display());
        let resolved = sandbox.resolve(&raw).unwrap();
        assert_eq!(resolved.as_path(), canonical_root(&dir).join("b.txt"));
    }

    #[test]
    fn test_sibling_with_shared_prefix_rejected() {
        let outer = TempDir::new().unwrap();
        let allowed = outer.path().join("allowed");
        let evil = outer.path().join("allowed-evil");
        fs::create_dir(&allowed).unwrap();
        fs::create_dir(&evil).unwrap();

        let sandbox = PathSandbox::new(Arc::new(SandboxConfig::new([&allowed]).unwrap()));
        let err = sandbox.resolve(evil.join("x").to_str().unwrap()).unwrap_err();
        assert!(matches!(err, SandboxViolation::OutsideRoots { .. }));
    }

    #[test]
    fn test_missing_target_resolves_through_existing_ancestor() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox_for(&dir);

        let raw = dir.path().join("new/deeper/file.txt");
        let resolved = sandbox.resolve(raw.to_str().unwrap()).unwrap();
        assert_eq!(
            resolved.as_path(),
            canonical_root(&dir).join("new/deeper/file.txt")
        );
    }

    #[test]
    fn test_dotdot_through_missing_component_rejected() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox_for(&dir);

        let raw = format!("{}/ghost/../../escape.txt", dir.path().display());
        let err = sandbox.resolve(&raw).unwrap_err();
        assert!(matches!(err, SandboxViolation::Unresolvable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_pointing_outside_rejected() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "s3cret").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let sandbox = sandbox_for(&root);
        let raw = root.path().join("link/secret.txt");
        let err = sandbox.resolve(raw.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, SandboxViolation::OutsideRoots { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_followed_before_check() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path().join("planted.txt"), root.path().join("trap")).unwrap();

        let sandbox = sandbox_for(&root);
        let err = sandbox
            .resolve(root.path().join("trap").to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err, SandboxViolation::OutsideRoots { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_allowed() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("real")).unwrap();
        fs::write(root.path().join("real/a.txt"), "a").unwrap();
        std::os::unix::fs::symlink(root.path().join("real"), root.path().join("alias")).unwrap();

        let sandbox = sandbox_for(&root);
        let resolved = sandbox
            .resolve(root.path().join("alias/a.txt").to_str().unwrap())
            .unwrap();
        assert_eq!(resolved.as_path(), canonical_root(&root).join("real/a.txt"));
    }

    #[test]
    fn test_nested_root_reports_itself() {
        let outer = TempDir::new().unwrap();
        let inner = outer.path().join("inner");
        fs::create_dir(&inner).unwrap();
        let config = SandboxConfig::new([outer.path(), inner.as_path()]).unwrap();
        let sandbox = PathSandbox::new(Arc::new(config));

        let resolved = sandbox.resolve(inner.to_str().unwrap()).unwrap();
        assert!(resolved.is_root());
        assert_eq!(resolved.root(), fs::canonicalize(&inner).unwrap());

        let below = sandbox.resolve(inner.join("x.txt").to_str().unwrap()).unwrap();
        assert!(!below.is_root());
        assert!(sandbox.config().shelters_root(&canonical_root(&outer)));
        assert!(!sandbox.config().shelters_root(below.as_path()));
    }

    #[test]
    fn test_empty_config_rejects_everything() {
        let dir = TempDir::new().unwrap();
        let sandbox = PathSandbox::new(Arc::new(SandboxConfig::default()));
        assert!(sandbox.resolve(dir.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_config_rejects_bad_roots() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();

        assert!(matches!(
            SandboxConfig::new(["relative/root"]),
            Err(SandboxConfigError::RelativeRoot(_))
        ));
        assert!(matches!(
            SandboxConfig::new([dir.path().join("missing")]),
            Err(SandboxConfigError::Unreadable { .. })
        ));
        assert!(matches!(
            SandboxConfig::new([&file]),
            Err(SandboxConfigError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_violation_into_failure_names_path() {
        let failure = ToolFailure::from(SandboxViolation::RelativePath {
            path: "etc/passwd".to_string(),
        });
        assert_eq!(failure.kind, ErrorKind::SandboxViolation);
        assert_eq!(failure.details.unwrap()["path"], "etc/passwd");
    }
}
