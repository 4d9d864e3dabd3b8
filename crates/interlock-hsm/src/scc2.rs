//! NXP Security Controller (SCCv2) adapter.
//!
//! The character device implements AES-256-CBC encryption with the device
//! secret key: set mode and IV via ioctl, write the PKCS#7-padded input,
//! read back the ciphertext of identical length. An exclusive advisory lock
//! serializes the whole sequence. Equivalent to PKCS#11 `C_DeriveKey` with
//! `CKM_AES_CBC_ENCRYPT_DATA`.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;

use nix::fcntl::{Flock, FlockArg};
use nix::{ioctl_write_int_bad, ioctl_write_ptr_bad};

use interlock_core::{Error, Result};

use crate::{pkcs7_pad, BLOCK_SIZE};

const DEVICE: &str = "/dev/scc2_aes";

/// Largest input the device accepts in one derivation.
const MAX_BLOCKS: usize = 256;

// scc2_cmd
const SET_MODE: i32 = 0;
const SET_IV: i32 = 1;

// scc2_mode
const ENCRYPT_CBC: i32 = 0;

ioctl_write_int_bad!(scc_set_mode, SET_MODE);
ioctl_write_ptr_bad!(scc_set_iv, SET_IV, [u8; BLOCK_SIZE]);

pub fn probe() -> Result<()> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(DEVICE)
        .map(|_| ())
        .map_err(|e| Error::HsmUnavailable(format!("{DEVICE}: {e}")))
}

pub fn derive_key(diversifier: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let mut iv_block = [0u8; BLOCK_SIZE];
    let n = iv.len().min(BLOCK_SIZE);
    iv_block[..n].copy_from_slice(&iv[..n]);

    let device = OpenOptions::new()
        .read(true)
        .write(true)
        .open(DEVICE)
        .map_err(|e| Error::HsmUnavailable(format!("{DEVICE}: {e}")))?;

    // exclusive advisory lock for the whole ioctl/write/read sequence
    let mut device = Flock::lock(device, FlockArg::LockExclusive)
        .map_err(|(_, e)| Error::HsmUnavailable(format!("{DEVICE} lock: {e}")))?;

    let fd = device.as_raw_fd();

    unsafe {
        scc_set_mode(fd, ENCRYPT_CBC)
            .map_err(|e| Error::HsmUnavailable(format!("{DEVICE} set mode: {e}")))?;
        scc_set_iv(fd, &iv_block)
            .map_err(|e| Error::HsmUnavailable(format!("{DEVICE} set iv: {e}")))?;
    }

    let padded = pkcs7_pad(diversifier.to_vec(), false);

    if padded.len() > BLOCK_SIZE * MAX_BLOCKS {
        return Err(Error::HsmUnavailable(
            "input diversifier exceeds maximum length for SCC key derivation".into(),
        ));
    }

    device
        .write_all(&padded)
        .map_err(|e| Error::HsmUnavailable(format!("SCC key derivation write: {e}")))?;

    let mut key = vec![0u8; padded.len()];
    device
        .read_exact(&mut key)
        .map_err(|e| Error::HsmUnavailable(format!("SCC key derivation read: {e}")))?;

    Ok(key)
}
