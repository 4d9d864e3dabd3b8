//! NXP Data Co-Processor (DCP) adapter.
//!
//! The device secret key is reached through the kernel crypto-API socket
//! interface: an AF_ALG skcipher bound to `cbc-aes-dcp` with a zero-length
//! key selects the OTP key, then one encrypt operation transforms the
//! PKCS#7-padded diversifier. Equivalent to PKCS#11 `C_DeriveKey` with
//! `CKM_AES_CBC_ENCRYPT_DATA`.

use std::fs::File;
use std::io::{IoSlice, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use nix::sys::socket::{
    accept, bind, sendmsg, socket, AddressFamily, AlgAddr, ControlMessage, MsgFlags, SockFlag,
    SockType,
};

use interlock_core::{Error, Result};

use crate::pkcs7_pad;

const ALG_TYPE: &str = "skcipher";
const ALG_NAME: &str = "cbc-aes-dcp";

fn hsm_err(stage: &str, err: impl std::fmt::Display) -> Error {
    Error::HsmUnavailable(format!("{ALG_NAME} {stage}: {err}"))
}

fn open_alg() -> Result<OwnedFd> {
    let fd = socket(
        AddressFamily::Alg,
        SockType::SeqPacket,
        SockFlag::empty(),
        None,
    )
    .map_err(|e| hsm_err("socket", e))?;

    bind(fd.as_raw_fd(), &AlgAddr::new(ALG_TYPE, ALG_NAME)).map_err(|e| hsm_err("bind", e))?;

    Ok(fd)
}

pub fn probe() -> Result<()> {
    open_alg().map(|_| ())
}

pub fn derive_key(diversifier: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let alg = open_alg()?;

    // a zero-length ALG_SET_KEY selects the device specific secret key
    let res = unsafe {
        libc::setsockopt(
            alg.as_raw_fd(),
            libc::SOL_ALG,
            libc::ALG_SET_KEY,
            std::ptr::null(),
            0,
        )
    };
    if res != 0 {
        return Err(hsm_err("setsockopt", std::io::Error::last_os_error()));
    }

    let op = accept(alg.as_raw_fd()).map_err(|e| hsm_err("accept", e))?;
    let mut op = unsafe { File::from_raw_fd(op) };

    let padded = pkcs7_pad(diversifier.to_vec(), false);

    let encrypt: libc::c_int = libc::ALG_OP_ENCRYPT;
    let cmsgs = [
        ControlMessage::AlgSetOp(&encrypt),
        ControlMessage::AlgSetIv(iv),
    ];

    sendmsg::<AlgAddr>(
        op.as_raw_fd(),
        &[IoSlice::new(&padded)],
        &cmsgs,
        MsgFlags::empty(),
        None,
    )
    .map_err(|e| hsm_err("sendmsg", e))?;

    let mut key = vec![0u8; padded.len()];
    op.read_exact(&mut key).map_err(|e| hsm_err("read", e))?;

    Ok(key)
}
