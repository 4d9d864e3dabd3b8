use std::path::{Path, PathBuf};

use crate::{Error, Result, TRAVERSAL_PATTERN};

/// Confined filesystem surface: every user-supplied path is interpreted
/// relative to the mount point, never outside it.
#[derive(Debug, Clone)]
pub struct Sandbox {
    mount_point: PathBuf,
    key_path: String,
}

impl Sandbox {
    pub fn new(mount_point: impl Into<PathBuf>, key_path: impl Into<String>) -> Self {
        Self {
            mount_point: mount_point.into(),
            key_path: key_path.into(),
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Key store subtree, relative to the mount point.
    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    /// Absolute path of the key store subtree.
    pub fn key_store(&self) -> PathBuf {
        self.mount_point.join(&self.key_path)
    }

    /// Join `sub` under the mount point, rejecting traversal attempts.
    pub fn absolute(&self, sub: &str) -> Result<PathBuf> {
        if sub.contains(TRAVERSAL_PATTERN) {
            return Err(Error::InvalidPath);
        }

        Ok(self.mount_point.join(sub.trim_start_matches('/')))
    }

    /// Validate a whole batch before anything touches the filesystem.
    pub fn absolute_all(&self, subs: &[String]) -> Result<Vec<PathBuf>> {
        subs.iter().map(|s| self.absolute(s)).collect()
    }

    /// Strip the mount point prefix; foreign paths collapse to their
    /// basename so that nothing outside the mount point ever leaks into a
    /// response.
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.mount_point) {
            Ok(rel) => format!("/{}", rel.display()),
            Err(_) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Classify `path` against the key store subtree: returns
    /// `(in_key_store, is_private)`. Anything under the subtree defaults to
    /// private unless its parent directory is named `public`.
    pub fn classify(&self, path: &Path) -> (bool, bool) {
        if !path.starts_with(self.key_store()) {
            return (false, false);
        }

        let public = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n == "public")
            .unwrap_or(false);

        (true, !public)
    }

    /// Reject private-key sources for move/copy/download/extract targets.
    pub fn deny_private(&self, path: &Path, action: &str) -> Result<()> {
        let (in_key_store, private) = self.classify(path);

        if in_key_store && private {
            return Err(Error::Denied(format!("cannot {action} private key(s)")));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::new("/home/user/.interlock-mnt", "keys")
    }

    #[test]
    fn test_absolute_joins_under_mount_point() {
        let s = sandbox();
        assert_eq!(
            s.absolute("docs/report.txt").unwrap(),
            PathBuf::from("/home/user/.interlock-mnt/docs/report.txt")
        );
        assert_eq!(
            s.absolute("/docs/report.txt").unwrap(),
            PathBuf::from("/home/user/.interlock-mnt/docs/report.txt")
        );
    }

    #[test]
    fn test_absolute_rejects_traversal() {
        let s = sandbox();
        for sub in ["../etc/passwd", "a/../../b", "..//../x", "a/../b"] {
            match s.absolute(sub) {
                Err(Error::InvalidPath) => {}
                other => panic!("expected InvalidPath for {sub}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_absolute_all_rejects_batch_with_one_bad_entry() {
        let s = sandbox();
        let batch = vec!["good.txt".to_string(), "../bad".into()];
        assert!(s.absolute_all(&batch).is_err());
    }

    #[test]
    fn test_relative_strips_prefix() {
        let s = sandbox();
        assert_eq!(
            s.relative(Path::new("/home/user/.interlock-mnt/docs/a.txt")),
            "/docs/a.txt"
        );
    }

    #[test]
    fn test_relative_foreign_path_collapses_to_basename() {
        let s = sandbox();
        assert_eq!(s.relative(Path::new("/etc/passwd")), "passwd");
    }

    #[test]
    fn test_classify() {
        let s = sandbox();

        let (k, p) = s.classify(Path::new("/home/user/.interlock-mnt/keys/pgp/private/me.armor"));
        assert!(k && p);

        let (k, p) = s.classify(Path::new("/home/user/.interlock-mnt/keys/pgp/public/me.armor"));
        assert!(k && !p);

        let (k, _) = s.classify(Path::new("/home/user/.interlock-mnt/docs/a.txt"));
        assert!(!k);
    }

    #[test]
    fn test_deny_private() {
        let s = sandbox();
        assert!(s
            .deny_private(
                Path::new("/home/user/.interlock-mnt/keys/pgp/private/me.armor"),
                "move or copy"
            )
            .is_err());
        assert!(s
            .deny_private(
                Path::new("/home/user/.interlock-mnt/keys/pgp/public/me.armor"),
                "move or copy"
            )
            .is_ok());
    }
}
