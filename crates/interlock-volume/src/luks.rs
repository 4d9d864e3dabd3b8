//! LUKS volume lifecycle: unlock/mount/unmount/lock plus passphrase
//! add/change/remove, driven through the external cryptsetup and mount
//! tools with passphrases on standard input.
//!
//! When the HSM `luks` role is active the passphrase is transformed through
//! the device before reaching the unlock tool. Every such call retries with
//! the original passphrase on failure, preserving volumes created before
//! HSM enablement.

use std::path::PathBuf;
use std::sync::Arc;

use base64::prelude::*;
use md5::{Digest, Md5};

use interlock_core::exec;
use interlock_core::status::{Severity, StatusLog};
use interlock_core::{Error, Result, TRAVERSAL_PATTERN};
use interlock_hsm::Hsm;

/// Device-mapper name of the unlocked volume.
const MAPPING: &str = "interlockfs";

const CRYPTSETUP: &str = "/sbin/cryptsetup";
const MOUNT: &str = "/bin/mount";
const UMOUNT: &str = "/bin/umount";
const CHOWN: &str = "/bin/chown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOp {
    Change,
    Add,
    Remove,
}

pub struct VolumeManager {
    volume_group: String,
    mount_point: PathBuf,
    status: Arc<StatusLog>,
    hsm: Option<Arc<Hsm>>,
}

impl VolumeManager {
    pub fn new(
        volume_group: impl Into<String>,
        mount_point: impl Into<PathBuf>,
        status: Arc<StatusLog>,
        hsm: Option<Arc<Hsm>>,
    ) -> Self {
        Self {
            volume_group: volume_group.into(),
            mount_point: mount_point.into(),
            status,
            hsm,
        }
    }

    fn device(&self, volume: &str) -> String {
        format!("/dev/{}/{}", self.volume_group, volume)
    }

    fn check_volume(volume: &str) -> Result<()> {
        if volume.contains(TRAVERSAL_PATTERN) {
            return Err(Error::InvalidPath);
        }

        Ok(())
    }

    /// Transform a passphrase through the HSM: the passphrase itself is the
    /// diversifier, its MD5 digest provides the deterministic per-passphrase
    /// IV, and the derived key travels as base64.
    pub fn derive_password(&self, password: &str) -> Result<String> {
        self.derive_raw(password.as_bytes())
    }

    /// Same transform over raw secret bytes (the operator mode accepts hex
    /// input that need not be valid UTF-8).
    pub fn derive_raw(&self, secret: &[u8]) -> Result<String> {
        let hsm = self
            .hsm
            .as_ref()
            .ok_or_else(|| Error::Other("HSM is required for key derivation".into()))?;

        let iv = Md5::digest(secret);
        let key = hsm.derive_key(secret, &iv)?;

        Ok(BASE64_STANDARD.encode(key))
    }

    /// Unlock the volume. With an HSM the derived passphrase is tried
    /// first, falling back to the original for pre-HSM volumes.
    pub fn unlock(&self, volume: &str, password: &str) -> Result<()> {
        Self::check_volume(volume)?;

        let device = self.device(volume);
        let args = ["luksOpen", device.as_str(), MAPPING];

        self.status.log(
            Severity::Notice,
            format!("unlocking encrypted volume {volume}"),
        );

        if self.hsm.is_some() {
            let key = self.derive_password(password)?;

            if exec::run(CRYPTSETUP, &args, true, Some(&format!("{key}\n"))).is_ok() {
                return Ok(());
            }
            // fallback to original password to allow pre-HSM migration
        }

        exec::run(CRYPTSETUP, &args, true, Some(&format!("{password}\n"))).map(|_| ())
    }

    pub fn mount(&self) -> Result<()> {
        let mapper = format!("/dev/mapper/{MAPPING}");
        let mount_point = self.mount_point.to_string_lossy();

        self.status.log(
            Severity::Notice,
            format!("mounting encrypted volume to {mount_point}"),
        );

        exec::run(MOUNT, &[&mapper, &mount_point], true, None)?;

        let user = nix::unistd::User::from_uid(nix::unistd::Uid::effective())
            .ok()
            .flatten()
            .ok_or_else(|| Error::Other("cannot determine current user".into()))?;

        self.status.log(
            Severity::Notice,
            format!("setting mount point permissions for user {}", user.name),
        );

        exec::run(CHOWN, &[&user.name, &mount_point], true, None).map(|_| ())
    }

    pub fn unmount(&self) -> Result<()> {
        let mount_point = self.mount_point.to_string_lossy();

        self.status.log(
            Severity::Notice,
            format!("unmounting encrypted volume on {mount_point}"),
        );

        unsafe { libc::sync() };

        exec::run(UMOUNT, &[&mount_point], true, None).map(|_| ())
    }

    pub fn lock(&self) -> Result<()> {
        let mapper = format!("/dev/mapper/{MAPPING}");

        self.status.log(Severity::Notice, "locking encrypted volume");

        exec::run(CRYPTSETUP, &["luksClose", &mapper], true, None).map(|_| ())
    }

    /// Passphrase maintenance. Change and add require `new_password`; with
    /// an HSM every derived-input sequence falls back to the plain one.
    pub fn key_op(
        &self,
        volume: &str,
        password: &str,
        new_password: Option<&str>,
        op: KeyOp,
    ) -> Result<()> {
        Self::check_volume(volume)?;

        let new_password = match (op, new_password) {
            (KeyOp::Remove, _) => "",
            (_, Some(p)) => p,
            (_, None) => return Err(Error::BadRequest("missing attribute newpassword".into())),
        };

        let (action, plain) = match op {
            KeyOp::Change => ("luksChangeKey", format!("{password}\n{new_password}\n")),
            KeyOp::Add => (
                "luksAddKey",
                format!("{password}\n{new_password}\n{new_password}\n"),
            ),
            KeyOp::Remove => ("luksRemoveKey", format!("{password}\n")),
        };

        let device = self.device(volume);
        let args = [action, device.as_str()];

        self.status.log(
            Severity::Notice,
            format!("performing LUKS key action {action}"),
        );

        if self.hsm.is_some() {
            let key = self.derive_password(password)?;

            let inputs = match op {
                KeyOp::Change => {
                    let new_key = self.derive_password(new_password)?;
                    vec![
                        format!("{key}\n{new_key}\n"),
                        format!("{password}\n{new_key}\n"),
                    ]
                }
                KeyOp::Add => {
                    let new_key = self.derive_password(new_password)?;
                    vec![
                        format!("{key}\n{new_key}\n{new_key}\n"),
                        format!("{password}\n{new_key}\n{new_key}\n"),
                    ]
                }
                KeyOp::Remove => vec![format!("{key}\n"), format!("{password}\n")],
            };

            let mut last = Error::Other("no LUKS key input accepted".into());

            for input in inputs {
                match exec::run(CRYPTSETUP, &args, true, Some(&input)) {
                    Ok(_) => return Ok(()),
                    Err(e) => last = e,
                }
                // fallback to original password to allow pre-HSM migration
            }

            return Err(last);
        }

        exec::run(CRYPTSETUP, &args, true, Some(&plain)).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> VolumeManager {
        VolumeManager::new("lvmvolume", "/tmp/interlock-test-mnt", StatusLog::new(), None)
    }

    #[test]
    fn test_volume_name_traversal_rejected() {
        let m = manager();

        assert!(matches!(
            m.unlock("../../dev/sda", "passphrase"),
            Err(Error::InvalidPath)
        ));
        assert!(matches!(
            m.key_op("../volume", "passphrase", None, KeyOp::Remove),
            Err(Error::InvalidPath)
        ));
    }

    #[test]
    fn test_key_change_requires_new_password() {
        let m = manager();

        assert!(matches!(
            m.key_op("storage", "passphrase", None, KeyOp::Change),
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            m.key_op("storage", "passphrase", None, KeyOp::Add),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_derive_password_requires_hsm() {
        let m = manager();
        assert!(m.derive_password("passphrase").is_err());
    }
}
