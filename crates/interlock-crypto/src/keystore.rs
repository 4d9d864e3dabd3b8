//! Typed key files in a mount-relative subtree.
//!
//! A key's identity is derived purely from its location:
//! `{key_path}/{cipher-ext}/{private|public}/{identifier}.{format}`.

use std::fs;
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use interlock_core::sandbox::Sandbox;
use interlock_core::status::{Severity, StatusLog};
use interlock_core::{Error, Result};

use crate::{Cipher, CipherInfo, CipherRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Key {
    pub identifier: String,
    pub key_format: String,
    pub cipher: String,
    pub private: bool,
    /// Path relative to the mount point.
    pub path: String,
}

impl Key {
    /// Parse a key's identity from its on-disk location, returning a fresh
    /// instance of the owning cipher alongside it.
    pub fn parse(
        path: &Path,
        sandbox: &Sandbox,
        registry: &CipherRegistry,
    ) -> Result<(Key, Box<dyn Cipher>)> {
        let meta = fs::metadata(path)?;

        if meta.is_dir() {
            return Err(Error::Other("cannot parse directory as key file".into()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (identifier, format) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), ext.to_string()),
            _ => (name.clone(), "N/A".to_string()),
        };

        let relative = sandbox.relative(path);
        let in_store = Path::new(relative.trim_start_matches('/'))
            .strip_prefix(sandbox.key_path())
            .map_err(|_| Error::Other(format!("invalid file in key path: {}", path.display())))?
            .to_path_buf();

        let segments: Vec<String> = in_store
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        if segments.len() < 3 {
            return Err(Error::Other(format!(
                "invalid file in key path: {}",
                path.display()
            )));
        }

        let cipher = registry.instance_by_ext(&segments[0])?;
        let private = segments[1] != "public";

        let key = Key {
            identifier,
            key_format: format,
            cipher: cipher.info().name.to_string(),
            private,
            path: relative,
        };

        Ok((key, cipher))
    }

    /// Store key material, creating the subtree as needed. The file is
    /// created exclusively: overwriting an existing key is denied.
    pub fn store(
        &mut self,
        info: &CipherInfo,
        data: &str,
        sandbox: &Sandbox,
        status: &StatusLog,
    ) -> Result<()> {
        let subdir = if self.private { "private" } else { "public" };
        let file_name = format!("{}.{}", self.identifier, self.key_format);

        let relative = format!(
            "{}/{}/{}/{}",
            sandbox.key_path(),
            info.extension,
            subdir,
            file_name
        );

        let path = sandbox.absolute(&relative)?;

        if let Some(parent) = path.parent() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(parent)?;
        }

        let mut output = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    Error::Denied(format!("key {} exists, not overwriting", file_name))
                }
                _ => Error::Io(e),
            })?;

        output.write_all(data.as_bytes())?;

        self.path = relative;

        status.log(
            Severity::Info,
            format!(
                "stored {subdir} {} key {} ({} bytes)",
                info.name,
                self.identifier,
                data.len()
            ),
        );

        Ok(())
    }

    /// Absolute on-disk location of this key.
    pub fn absolute(&self, sandbox: &Sandbox) -> Result<std::path::PathBuf> {
        sandbox.absolute(&self.path)
    }
}

/// Enumerate stored keys for one cipher and visibility class, optionally
/// filtered by a substring match against the cipher's key description.
pub fn list_keys(
    registry: &CipherRegistry,
    info: &CipherInfo,
    private: bool,
    filter: &str,
    sandbox: &Sandbox,
) -> Vec<Key> {
    let subdir = if private { "private" } else { "public" };
    let base = sandbox.key_store().join(info.extension).join(subdir);

    let mut keys = Vec::new();

    for entry in walkdir::WalkDir::new(&base)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let (key, mut cipher) = match Key::parse(entry.path(), sandbox, registry) {
            Ok(parsed) => parsed,
            Err(_) => continue,
        };

        if !filter.is_empty() {
            match cipher.key_info(&key, entry.path()) {
                Ok(info) if info.contains(filter) => {}
                _ => continue,
            }
        }

        keys.push(key);
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{aes256, totp};

    fn setup() -> (tempfile::TempDir, Sandbox, CipherRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), "keys");

        let mut registry = CipherRegistry::new();
        registry.register(totp::descriptor(), totp::factory()).unwrap();
        registry.register(aes256::descriptor(), aes256::factory()).unwrap();
        registry
            .enable(&["TOTP".to_string(), "AES-256-CTR".into()])
            .unwrap();

        (dir, sandbox, registry)
    }

    #[test]
    fn test_store_and_parse_roundtrip() {
        let (_dir, sandbox, registry) = setup();
        let status = StatusLog::new();

        let mut key = Key {
            identifier: "backup-code".into(),
            key_format: "base32".into(),
            cipher: "TOTP".into(),
            private: true,
            path: String::new(),
        };

        key.store(
            registry.info("TOTP").unwrap(),
            "THISISATOTPTESTK",
            &sandbox,
            &status,
        )
        .unwrap();

        assert_eq!(key.path, "keys/totp/private/backup-code.base32");

        let abs = key.absolute(&sandbox).unwrap();
        let (parsed, cipher) = Key::parse(&abs, &sandbox, &registry).unwrap();

        assert_eq!(parsed.identifier, "backup-code");
        assert_eq!(parsed.key_format, "base32");
        assert_eq!(parsed.cipher, "TOTP");
        assert!(parsed.private);
        assert_eq!(cipher.info().name, "TOTP");
    }

    #[test]
    fn test_store_refuses_overwrite() {
        let (_dir, sandbox, registry) = setup();
        let status = StatusLog::new();

        let mut key = Key {
            identifier: "dup".into(),
            key_format: "base32".into(),
            cipher: "TOTP".into(),
            private: false,
            path: String::new(),
        };

        key.store(registry.info("TOTP").unwrap(), "AAAA", &sandbox, &status)
            .unwrap();

        let mut again = key.clone();
        assert!(matches!(
            again.store(registry.info("TOTP").unwrap(), "BBBB", &sandbox, &status),
            Err(Error::Denied(_))
        ));
    }

    #[test]
    fn test_parse_rejects_files_outside_key_layout() {
        let (dir, sandbox, registry) = setup();

        let stray = dir.path().join("stray.txt");
        std::fs::write(&stray, "not a key").unwrap();
        assert!(Key::parse(&stray, &sandbox, &registry).is_err());

        // too shallow: keys/<file> has no cipher/visibility segments
        let shallow_dir = dir.path().join("keys");
        std::fs::create_dir_all(&shallow_dir).unwrap();
        let shallow = shallow_dir.join("orphan.base32");
        std::fs::write(&shallow, "AAAA").unwrap();
        assert!(Key::parse(&shallow, &sandbox, &registry).is_err());
    }

    #[test]
    fn test_list_keys() {
        let (_dir, sandbox, registry) = setup();
        let status = StatusLog::new();

        for id in ["first", "second"] {
            let mut key = Key {
                identifier: id.into(),
                key_format: "base32".into(),
                cipher: "TOTP".into(),
                private: true,
                path: String::new(),
            };
            key.store(
                registry.info("TOTP").unwrap(),
                "THISISATOTPTESTK",
                &sandbox,
                &status,
            )
            .unwrap();
        }

        let keys = list_keys(
            &registry,
            registry.info("TOTP").unwrap(),
            true,
            "",
            &sandbox,
        );
        let mut ids: Vec<_> = keys.iter().map(|k| k.identifier.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["first", "second"]);

        // public subtree is empty
        assert!(list_keys(
            &registry,
            registry.info("TOTP").unwrap(),
            false,
            "",
            &sandbox
        )
        .is_empty());
    }
}
