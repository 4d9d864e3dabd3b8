//! Password-based cipher variants backed by an HSM.
//!
//! Encrypt-data devices (SCCv2, DCP) keep the shared stream layout and run
//! the PBKDF2-derived key through the device before use, binding ciphertext
//! to the hardware. The key-blob device (CAAM) instead generates a random
//! bulk key and prepends its wrapped blob to the header:
//!
//! ```text
//! keyblob (80 bytes) || salt (8 bytes) || iv (16 bytes) || ciphertext || hmac (32 bytes)
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::sync::Arc;

use rand::RngCore;
use zeroize::Zeroizing;

use interlock_core::{Error, Result, DERIVED_KEY_SIZE};
use interlock_crypto::stream::{self, IV_SIZE, SALT_SIZE};
use interlock_crypto::{kdf, Cipher, CipherFactory, CipherInfo};

use crate::caam::{self, BLOB_OVERHEAD, KEYMOD_LEN};
use crate::{Hsm, HsmModel};

pub(crate) fn entry(hsm: Arc<Hsm>) -> (CipherInfo, CipherFactory) {
    let info = descriptor(hsm.model());
    let factory: CipherFactory = Box::new(move || Box::new(HsmCipher::new(hsm.clone())));

    (info, factory)
}

pub(crate) fn descriptor(model: HsmModel) -> CipherInfo {
    match model {
        HsmModel::Scc2 => CipherInfo {
            name: "AES-256-SCC",
            description: "AES CTR w/ 256 bit key derived using PBKDF2 and SCCv2 device specific secret key",
            key_format: "password",
            enc: true,
            dec: true,
            sig: false,
            otp: false,
            msg: false,
            extension: "aes256scc",
        },
        HsmModel::Dcp => CipherInfo {
            name: "AES-128-DCP",
            description: "AES CTR w/ 128 bit key derived using PBKDF2 and DCP device specific secret key",
            key_format: "password",
            enc: true,
            dec: true,
            sig: false,
            otp: false,
            msg: false,
            extension: "aes128dcp",
        },
        HsmModel::CaamKeyBlob => CipherInfo {
            name: "AES-256-CAAM",
            description: "AES CTR w/ 256 bit key derived using PBKDF2 and CAAM device specific secret key",
            key_format: "password",
            enc: true,
            dec: true,
            sig: false,
            otp: false,
            msg: false,
            extension: "aes256caam",
        },
    }
}

pub struct HsmCipher {
    info: CipherInfo,
    hsm: Arc<Hsm>,
    password: Zeroizing<String>,
}

impl HsmCipher {
    pub fn new(hsm: Arc<Hsm>) -> Self {
        Self {
            info: descriptor(hsm.model()),
            hsm,
            password: Zeroizing::new(String::new()),
        }
    }

    fn encrypt_derived(&self, input: &mut File, output: &mut dyn Write) -> Result<()> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let (salt, key) = kdf::derive_key(None, &self.password, DERIVED_KEY_SIZE);
        let device_key = Zeroizing::new(self.hsm.derive_key(&key, &iv)?);

        stream::encrypt_stream(&device_key, &salt, &iv, input, output)
    }

    fn decrypt_derived(&self, input: &mut File, output: &mut dyn Write) -> Result<()> {
        let (salt, iv) = read_header(input)?;

        let (_, key) = kdf::derive_key(Some(salt), &self.password, DERIVED_KEY_SIZE);
        let device_key = Zeroizing::new(self.hsm.derive_key(&key, &iv)?);

        stream::decrypt_stream(&device_key, &salt, &iv, input, output)
    }

    fn encrypt_wrapped(&self, input: &mut File, output: &mut dyn Write) -> Result<()> {
        // random bulk key, protected by the device in an encrypted blob
        let mut key = Zeroizing::new(vec![0u8; DERIVED_KEY_SIZE]);
        rand::thread_rng().fill_bytes(&mut key[..]);

        // the key modifier binds blob decryption to this user's password
        let (salt, keymod) = kdf::derive_key(None, &self.password, KEYMOD_LEN);

        let blob = caam::wrap(&key, &keymod)?;
        output.write_all(&blob)?;

        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        stream::encrypt_stream(&key, &salt, &iv, input, output)
    }

    fn decrypt_wrapped(&self, input: &mut File, output: &mut dyn Write) -> Result<()> {
        let mut blob = vec![0u8; DERIVED_KEY_SIZE + BLOB_OVERHEAD];
        input.read_exact(&mut blob)?;

        let (salt, iv) = read_header(input)?;

        let keymod = kdf::derive(self.password.as_bytes(), &salt, KEYMOD_LEN);
        let key = caam::unwrap(&blob, &keymod)?;

        stream::decrypt_stream(&key, &salt, &iv, input, output)
    }
}

fn read_header(input: &mut File) -> Result<([u8; SALT_SIZE], [u8; IV_SIZE])> {
    let mut salt = [0u8; SALT_SIZE];
    input.read_exact(&mut salt)?;

    let mut iv = [0u8; IV_SIZE];
    input.read_exact(&mut iv)?;

    Ok((salt, iv))
}

impl Cipher for HsmCipher {
    fn info(&self) -> &CipherInfo {
        &self.info
    }

    fn set_password(&mut self, password: &str) -> Result<()> {
        if password.len() < 8 {
            return Err(Error::BadPassword);
        }

        self.password = Zeroizing::new(password.to_string());

        Ok(())
    }

    fn encrypt(&mut self, input: &mut File, output: &mut dyn Write, sign: bool) -> Result<()> {
        if sign {
            return Err(Error::unsupported("signing"));
        }

        match self.hsm.model() {
            HsmModel::Scc2 | HsmModel::Dcp => self.encrypt_derived(input, output),
            HsmModel::CaamKeyBlob => self.encrypt_wrapped(input, output),
        }
    }

    fn decrypt(&mut self, input: &mut File, output: &mut dyn Write, verify: bool) -> Result<()> {
        if verify {
            return Err(Error::unsupported("signature verification"));
        }

        match self.hsm.model() {
            HsmModel::Scc2 | HsmModel::Dcp => self.decrypt_derived(input, output),
            HsmModel::CaamKeyBlob => self.decrypt_wrapped(input, output),
        }
    }
}
