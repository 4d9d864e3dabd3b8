//! NXP CAAM key-blob adapter.
//!
//! The driver wraps a caller-supplied raw key into a hardware-bound
//! encrypted blob (and back), diversified by a key modifier. Derivation for
//! the volume unlock path caches one blob per passphrase under
//! `$HOME/.luks_kb` so that the same passphrase always yields the same
//! wrapped key.

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::PathBuf;

use nix::fcntl::{Flock, FlockArg};
use nix::ioctl_readwrite;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use interlock_core::{Error, Result, DERIVED_KEY_SIZE};
use interlock_crypto::kdf;

const DEVICE: &str = "/dev/caam_kb";

/// Blob cache directory created in `$HOME`.
const BLOB_PATH: &str = ".luks_kb";

pub(crate) const KEYMOD_LEN: usize = 16;
pub(crate) const BLOB_OVERHEAD: usize = 32 + 16;

/// The caam_keyblob driver speaks a 32-bit struct layout; the ioctl request
/// codes generated below encode the size of our own layout, so a mismatched
/// build cannot reach the driver with a wrong transfer size.
const CAAM_KB_ABI_SIZE: usize = 24;

const CAAM_KB_MAGIC: u8 = b'I';

/// C compatible struct of caam_kb_data from caam_keyblob.h
#[repr(C)]
struct CaamKbData {
    raw_key: *mut u8,
    raw_key_len: u32,
    key_blob: *mut u8,
    key_blob_len: u32,
    keymod: *mut u8,
    keymod_len: u32,
}

ioctl_readwrite!(caam_kb_encrypt, CAAM_KB_MAGIC, 0, CaamKbData);
ioctl_readwrite!(caam_kb_decrypt, CAAM_KB_MAGIC, 1, CaamKbData);

pub fn probe() -> Result<()> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(DEVICE)
        .map_err(|e| Error::HsmUnavailable(format!("{DEVICE}: {e}")))?;

    if std::mem::size_of::<CaamKbData>() != CAAM_KB_ABI_SIZE {
        return Err(Error::HsmUnavailable(format!(
            "{DEVICE}: caam_kb_data ABI mismatch ({} bytes, driver expects {})",
            std::mem::size_of::<CaamKbData>(),
            CAAM_KB_ABI_SIZE
        )));
    }

    Ok(())
}

fn caam_op(
    encrypt: bool,
    key: &mut [u8],
    blob: &mut [u8],
    keymod: &mut [u8],
) -> Result<()> {
    let device = OpenOptions::new()
        .read(true)
        .write(true)
        .open(DEVICE)
        .map_err(|e| Error::HsmUnavailable(format!("{DEVICE}: {e}")))?;

    let device = Flock::lock(device, FlockArg::LockExclusive)
        .map_err(|(_, e)| Error::HsmUnavailable(format!("{DEVICE} lock: {e}")))?;

    let mut data = CaamKbData {
        raw_key: key.as_mut_ptr(),
        raw_key_len: key.len() as u32,
        key_blob: blob.as_mut_ptr(),
        key_blob_len: blob.len() as u32,
        keymod: keymod.as_mut_ptr(),
        keymod_len: keymod.len() as u32,
    };

    let res = unsafe {
        if encrypt {
            caam_kb_encrypt(device.as_raw_fd(), &mut data)
        } else {
            caam_kb_decrypt(device.as_raw_fd(), &mut data)
        }
    };

    res.map(|_| ())
        .map_err(|e| Error::HsmUnavailable(format!("{DEVICE} ioctl: {e}")))
}

/// Wrap a raw key into a hardware-bound blob.
pub(crate) fn wrap(key: &[u8], keymod: &[u8]) -> Result<Vec<u8>> {
    let mut key = key.to_vec();
    let mut blob = vec![0u8; key.len() + BLOB_OVERHEAD];
    let mut keymod = keymod.to_vec();

    caam_op(true, &mut key, &mut blob, &mut keymod)?;

    Ok(blob)
}

/// Unwrap a blob back into its raw key.
pub(crate) fn unwrap(blob: &[u8], keymod: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if blob.len() <= BLOB_OVERHEAD {
        return Err(Error::HsmIntegrity("key blob too short".into()));
    }

    let mut key = Zeroizing::new(vec![0u8; blob.len() - BLOB_OVERHEAD]);
    let mut blob = blob.to_vec();
    let mut keymod = keymod.to_vec();

    caam_op(false, &mut key, &mut blob, &mut keymod)?;

    Ok(key)
}

/// Location of the cached blob for one (diversifier, iv) pair. Stale
/// entries from removed passphrases are never reaped; they are harmless.
pub(crate) fn blob_cache_path(diversifier: &[u8], iv: &[u8]) -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::Other("HOME is not set, cannot locate blob cache".into()))?;

    let dir = PathBuf::from(home).join(BLOB_PATH);

    let mut hash = Sha256::new();
    hash.update(diversifier);
    hash.update(iv);

    Ok(dir.join(format!(".{}", hex::encode(hash.finalize()))))
}

/// Derive a stable wrapped key for `diversifier`.
///
/// On first use a random key is generated, wrapped with a key modifier
/// derived from the diversifier, and the blob cached; afterwards the cached
/// blob is unwrapped. A freshly generated key must survive the unwrap
/// round-trip, otherwise the device is lying.
pub fn derive_key(diversifier: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let keymod = kdf::derive(diversifier, iv, KEYMOD_LEN);

    let cache = blob_cache_path(diversifier, iv)?;
    if let Some(parent) = cache.parent() {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(parent)
            .ok();
    }

    let mut generated: Option<Vec<u8>> = None;

    match fs::metadata(&cache) {
        Ok(meta) if meta.is_dir() => {
            return Err(Error::Other(format!(
                "{} is not supposed to be a directory",
                cache.display()
            )));
        }
        Ok(_) => {}
        Err(_) => {
            let mut key = vec![0u8; DERIVED_KEY_SIZE];
            rand::thread_rng().fill_bytes(&mut key);

            let blob = wrap(&key, &keymod)?;

            let mut output = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&cache)?;
            output.write_all(&blob)?;

            // kept around to check the unwrap round-trip below
            generated = Some(key);
        }
    }

    let mut blob = Vec::new();
    OpenOptions::new()
        .read(true)
        .open(&cache)?
        .read_to_end(&mut blob)?;

    let key = unwrap(&blob, &keymod)?;

    if let Some(generated) = generated {
        if *key != generated {
            return Err(Error::HsmIntegrity(
                "key initialization and decryption mismatch".into(),
            ));
        }
    }

    Ok(key.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_cache_path_is_stable_and_hidden() {
        std::env::set_var("HOME", "/home/user");

        let a = blob_cache_path(b"passphrase", b"iv-bytes").unwrap();
        let b = blob_cache_path(b"passphrase", b"iv-bytes").unwrap();
        assert_eq!(a, b);

        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with('.'));
        // "." + hex sha256
        assert_eq!(name.len(), 1 + 64);
        assert!(a.starts_with("/home/user/.luks_kb"));
    }

    #[test]
    fn test_blob_cache_path_diversifies_on_both_inputs() {
        std::env::set_var("HOME", "/home/user");

        let base = blob_cache_path(b"passphrase", b"iv").unwrap();
        assert_ne!(base, blob_cache_path(b"passphrase2", b"iv").unwrap());
        assert_ne!(base, blob_cache_path(b"passphrase", b"iv2").unwrap());
    }

    #[test]
    fn test_unwrap_rejects_short_blob() {
        assert!(matches!(
            unwrap(&[0u8; BLOB_OVERHEAD], &[0u8; KEYMOD_LEN]),
            Err(Error::HsmIntegrity(_))
        ));
    }
}
