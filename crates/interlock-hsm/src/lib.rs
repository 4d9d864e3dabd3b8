//! Hardware security module adapters.
//!
//! Three device flavors share one interface: `derive_key(diversifier, iv)`
//! returns key material bound to the device-specific secret key. The HSM
//! directive (`"<model>:<opt>[,<opt>]..."`, opts ⊂ {luks, tls, cipher})
//! assigns the opened device to its roles at startup; an invalid directive
//! is fatal.

mod caam;
mod cipher;
mod dcp;
mod scc2;

use std::sync::Arc;

use interlock_core::{Error, Result};
use interlock_crypto::CipherRegistry;

/// AES block size shared by every device contract.
pub(crate) const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsmModel {
    /// NXP Security Controller v2: AES-256-CBC encrypt-data character
    /// device.
    Scc2,
    /// NXP Data Co-Processor: AES-128-CBC encrypt-data via the kernel
    /// crypto-API socket.
    Dcp,
    /// NXP Cryptographic Acceleration and Assurance Module: key wrap/unwrap
    /// blobs with a per-passphrase key modifier.
    CaamKeyBlob,
}

/// An opened hardware security module.
pub struct Hsm {
    model: HsmModel,
}

impl Hsm {
    /// Probe and open the device named by the directive's model field.
    pub fn open(model: &str) -> Result<Arc<Self>> {
        let model = match model {
            "mxc-scc2" => {
                scc2::probe()?;
                HsmModel::Scc2
            }
            "mxs-dcp" => {
                dcp::probe()?;
                HsmModel::Dcp
            }
            "caam-keyblob" => {
                caam::probe()?;
                HsmModel::CaamKeyBlob
            }
            other => return Err(Error::Other(format!("invalid hsm model {other}"))),
        };

        Ok(Arc::new(Self { model }))
    }

    pub fn model(&self) -> HsmModel {
        self.model
    }

    /// Transform `diversifier` into device-bound key material.
    ///
    /// Encrypt-data devices return the CBC ciphertext of the padded
    /// diversifier; the key-blob device wraps (and caches) a random key
    /// diversified by both arguments.
    pub fn derive_key(&self, diversifier: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        match self.model {
            HsmModel::Scc2 => scc2::derive_key(diversifier, iv),
            HsmModel::Dcp => dcp::derive_key(diversifier, iv),
            HsmModel::CaamKeyBlob => caam::derive_key(diversifier, iv),
        }
    }

    /// Register this device's password-based cipher variant.
    pub fn register_cipher(self: &Arc<Self>, registry: &mut CipherRegistry) -> Result<()> {
        let (info, factory) = cipher::entry(self.clone());
        registry.register_enabled(info, factory)
    }

    /// Descriptor of this device's cipher variant.
    pub fn cipher_info(&self) -> interlock_crypto::CipherInfo {
        cipher::descriptor(self.model)
    }

    /// Fresh instance of this device's cipher variant, independent of the
    /// registry; the TLS key path uses it before any session exists.
    pub fn cipher(self: &Arc<Self>) -> Box<dyn interlock_crypto::Cipher> {
        Box::new(cipher::HsmCipher::new(self.clone()))
    }
}

/// Role assignment produced by the HSM directive.
#[derive(Default)]
pub struct HsmRoles {
    /// Transforms the volume passphrase before it reaches the unlock tool.
    pub luks: Option<Arc<Hsm>>,
    /// Keeps the TLS private key encrypted on disk.
    pub tls: Option<Arc<Hsm>>,
}

/// Parse the HSM directive, open the device and assign roles. The `cipher`
/// option registers the device's cipher variant as enabled.
pub fn configure(directive: &str, registry: &mut CipherRegistry) -> Result<HsmRoles> {
    let mut roles = HsmRoles::default();

    if directive == "off" {
        return Ok(roles);
    }

    let (model, options) = directive
        .split_once(':')
        .ok_or_else(|| Error::Other("invalid hsm configuration directive".into()))?;

    if options.is_empty() {
        return Err(Error::Other("invalid hsm configuration directive".into()));
    }

    let hsm = Hsm::open(model)?;

    for option in options.split(',') {
        match option {
            "luks" => roles.luks = Some(hsm.clone()),
            "tls" => roles.tls = Some(hsm.clone()),
            "cipher" => hsm.register_cipher(registry)?,
            other => return Err(Error::Other(format!("invalid hsm option {other}"))),
        }
    }

    Ok(roles)
}

/// PKCS#7 padding to the AES block size. Aligned input gains a full extra
/// block only when `extra_block` is set.
pub(crate) fn pkcs7_pad(mut buf: Vec<u8>, extra_block: bool) -> Vec<u8> {
    let rem = buf.len() % BLOCK_SIZE;

    let pad_len = if rem != 0 {
        BLOCK_SIZE - rem
    } else if extra_block {
        BLOCK_SIZE
    } else {
        0
    };

    buf.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkcs7_pad() {
        assert_eq!(pkcs7_pad(vec![0xaa; 16], false).len(), 16);
        assert_eq!(pkcs7_pad(vec![0xaa; 16], true).len(), 32);

        let padded = pkcs7_pad(vec![0xaa; 13], false);
        assert_eq!(padded.len(), 16);
        assert_eq!(&padded[13..], &[3, 3, 3]);
    }

    #[test]
    fn test_directive_off() {
        let mut registry = CipherRegistry::new();
        let roles = configure("off", &mut registry).unwrap();
        assert!(roles.luks.is_none());
        assert!(roles.tls.is_none());
    }

    #[test]
    fn test_malformed_directives_rejected() {
        let mut registry = CipherRegistry::new();

        for directive in ["mxc-scc2", "mxc-scc2:", "nonexistent-model:luks"] {
            assert!(
                configure(directive, &mut registry).is_err(),
                "directive {directive} must be rejected"
            );
        }
    }
}
