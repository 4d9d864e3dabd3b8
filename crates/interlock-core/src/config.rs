use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Mount point directory created under `$HOME`.
const MOUNT_POINT: &str = ".interlock-mnt";

/// Daemon configuration, loaded from a JSON file and frozen at startup.
///
/// CLI flags (`-d`, `-t`, `-b`) override the corresponding fields after the
/// file is parsed; nothing mutates a `Config` once the server is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub static_path: String,
    pub set_time: bool,
    pub bind_address: String,
    /// TLS mode: "off", "on" or "gen" (self-signed keypair generation).
    pub tls: String,
    pub tls_cert: String,
    pub tls_key: String,
    pub tls_client_ca: String,
    /// HSM directive: "off" or "<model>:<opt>[,<opt>]..." with
    /// opts ⊂ {luks, tls, cipher}.
    pub hsm: String,
    /// Key store subtree, relative to the mount point.
    pub key_path: String,
    pub volume_group: String,
    pub ciphers: Vec<String>,

    #[serde(skip)]
    pub mount_point: PathBuf,
    #[serde(skip)]
    pub test_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            static_path: "static".into(),
            set_time: false,
            bind_address: "0.0.0.0:4430".into(),
            tls: "on".into(),
            tls_cert: "certs/cert.pem".into(),
            tls_key: "certs/key.pem".into(),
            tls_client_ca: String::new(),
            hsm: "off".into(),
            key_path: "keys".into(),
            volume_group: "lvmvolume".into(),
            ciphers: vec!["OpenPGP".into(), "AES-256-CTR".into(), "TOTP".into()],
            mount_point: PathBuf::new(),
            test_mode: false,
        }
    }
}

impl Config {
    /// Parse `path` and merge it over the defaults. The debug flag survives
    /// the merge when already set from the command line.
    pub fn load(path: &Path) -> Result<Self> {
        let debug_flag = false;
        Self::load_over(path, debug_flag)
    }

    pub fn load_over(path: &Path, debug_flag: bool) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Other(format!("unreadable configuration {}: {e}", path.display())))?;

        let mut config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Other(format!("invalid configuration {}: {e}", path.display())))?;

        if debug_flag {
            config.debug = true;
        }

        Ok(config)
    }

    /// Resolve and create the process-private mount point (`$HOME/.interlock-mnt`,
    /// mode 0700). `TMPDIR` must be pointed here by the caller before any
    /// temporary file is created.
    pub fn set_mount_point(&mut self) -> Result<()> {
        let home = std::env::var("HOME")
            .map_err(|_| Error::Other("HOME is not set, cannot derive mount point".into()))?;

        self.mount_point = Path::new(&home).join(MOUNT_POINT);

        if !self.mount_point.exists() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&self.mount_point)?;
        }

        Ok(())
    }

    /// Pretty-printed JSON of the applied configuration, for the startup log.
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.bind_address, "0.0.0.0:4430");
        assert_eq!(config.tls, "on");
        assert_eq!(config.hsm, "off");
        assert_eq!(config.key_path, "keys");
        assert_eq!(config.volume_group, "lvmvolume");
        assert!(!config.debug);
        assert!(!config.test_mode);
        assert_eq!(
            config.ciphers,
            vec!["OpenPGP".to_string(), "AES-256-CTR".into(), "TOTP".into()]
        );
    }

    #[test]
    fn test_parse_partial_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"volume_group": "vg0", "ciphers": ["AES-256-CTR"], "tls": "gen"}}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.volume_group, "vg0");
        assert_eq!(config.ciphers, vec!["AES-256-CTR".to_string()]);
        assert_eq!(config.tls, "gen");
        // untouched fields keep their defaults
        assert_eq!(config.key_path, "keys");
        assert_eq!(config.bind_address, "0.0.0.0:4430");
    }

    #[test]
    fn test_debug_flag_survives_merge() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"debug": false}}"#).unwrap();

        let config = Config::load_over(file.path(), true).unwrap();
        assert!(config.debug);
    }

    #[test]
    fn test_unreadable_config_is_an_error() {
        assert!(Config::load(Path::new("/nonexistent/interlock.conf")).is_err());
    }
}
