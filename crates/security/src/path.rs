//! Path validation — filesystem sandboxing to the work directory.
//!
//! Relative paths resolve against the work dir; absolute paths are cleaned
//! and must remain inside it. Symlinks are resolved before the prefix
//! check, so a link pointing out of the sandbox is rejected.

use std::path::{Component, Path, PathBuf};

use relayclaw_core::error::ToolError;

/// The work-dir-rooted subtree within which file tools may operate.
#[derive(Debug, Clone)]
pub struct Sandbox {
    work_dir: PathBuf,
    /// Canonical form of `work_dir`, computed once at startup.
    canonical_root: PathBuf,
}

impl Sandbox {
    /// Create the sandbox, making the work directory if missing.
    pub fn new(work_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let work_dir = work_dir.into();
        std::fs::create_dir_all(&work_dir)?;
        let canonical_root = work_dir.canonicalize()?;
        Ok(Self {
            work_dir,
            canonical_root,
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Resolve a tool-supplied path to a real filesystem path inside the
    /// sandbox, or refuse it.
    ///
    /// Existing paths are canonicalized (resolving symlinks) and checked
    /// against the canonical root. For paths that do not exist yet (writes),
    /// the nearest existing ancestor is canonicalized and the remaining
    /// lexically-cleaned suffix is re-joined — `..` can therefore never
    /// escape through a not-yet-created directory.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        let requested = Path::new(path);
        let joined = if requested.is_absolute() {
            clean(requested)
        } else {
            clean(&self.work_dir.join(requested))
        };

        let resolved = self.canonicalize_deep(&joined)?;

        if resolved.starts_with(&self.canonical_root) {
            Ok(resolved)
        } else {
            Err(ToolError::Sandbox(format!(
                "path is outside work directory: {path}"
            )))
        }
    }

    /// Canonicalize `path`, falling back to canonicalizing the nearest
    /// existing ancestor when the leaf does not exist yet.
    fn canonicalize_deep(&self, path: &Path) -> Result<PathBuf, ToolError> {
        if let Ok(real) = path.canonicalize() {
            return Ok(real);
        }

        let mut existing = path.to_path_buf();
        let mut suffix = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    suffix.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => {
                    return Err(ToolError::Sandbox(format!(
                        "cannot resolve path: {}",
                        path.display()
                    )));
                }
            }
        }

        let mut real = existing
            .canonicalize()
            .map_err(|e| ToolError::Sandbox(format!("cannot resolve path: {e}")))?;
        for part in suffix.iter().rev() {
            real.push(part);
        }
        Ok(real)
    }
}

/// Lexically clean a path: drop `.`, apply `..` against the prefix.
/// A `..` that would climb above the root is kept out rather than applied.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // A failed pop means the path climbs above its start; the
                // containment check rejects whatever remains.
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (Sandbox, TempDir) {
        let tmp = TempDir::new().unwrap();
        let sb = Sandbox::new(tmp.path().join("work")).unwrap();
        (sb, tmp)
    }

    #[test]
    fn relative_path_resolves_inside() {
        let (sb, _tmp) = sandbox();
        let path = sb.resolve("notes.txt").unwrap();
        assert!(path.starts_with(sb.resolve(".").unwrap()));
    }

    #[test]
    fn nested_relative_path_allowed() {
        let (sb, _tmp) = sandbox();
        assert!(sb.resolve("sub/dir/file.txt").is_ok());
    }

    #[test]
    fn parent_traversal_rejected() {
        let (sb, _tmp) = sandbox();
        let err = sb.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(_)));
    }

    #[test]
    fn mid_path_traversal_rejected() {
        let (sb, _tmp) = sandbox();
        assert!(sb.resolve("ok/../../../etc/passwd").is_err());
    }

    #[test]
    fn traversal_that_returns_inside_allowed() {
        let (sb, _tmp) = sandbox();
        // sub/../file.txt cleans to file.txt, still inside.
        assert!(sb.resolve("sub/../file.txt").is_ok());
    }

    #[test]
    fn absolute_path_outside_rejected() {
        let (sb, _tmp) = sandbox();
        assert!(sb.resolve("/etc/passwd").is_err());
    }

    #[test]
    fn absolute_path_inside_allowed() {
        let (sb, _tmp) = sandbox();
        let inside = sb.work_dir().join("file.txt");
        assert!(sb.resolve(inside.to_str().unwrap()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_sandbox_rejected() {
        let (sb, tmp) = sandbox();
        let outside = tmp.path().join("secret.txt");
        std::fs::write(&outside, "secret").unwrap();

        let link = sb.work_dir().join("innocent.txt");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        let err = sb.resolve("innocent.txt").unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(_)));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_within_sandbox_allowed() {
        let (sb, _tmp) = sandbox();
        let target = sb.work_dir().join("real.txt");
        std::fs::write(&target, "data").unwrap();
        std::os::unix::fs::symlink(&target, sb.work_dir().join("alias.txt")).unwrap();

        assert!(sb.resolve("alias.txt").is_ok());
    }

    #[test]
    fn nonexistent_write_target_resolves() {
        let (sb, _tmp) = sandbox();
        // Parent dirs don't exist yet; resolution must still succeed so
        // write_file can create them.
        let path = sb.resolve("new/deep/file.txt").unwrap();
        assert!(path.ends_with("new/deep/file.txt"));
    }

    #[test]
    fn clean_collapses_dot_and_dotdot() {
        assert_eq!(clean(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(clean(Path::new("a/./b")), PathBuf::from("a/b"));
    }
}
