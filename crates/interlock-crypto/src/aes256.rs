//! Password-based symmetric cipher: AES-256-CTR keystream with PBKDF2 key
//! derivation, in the shared stream format.

use std::fs::File;
use std::io::{Read, Write};

use rand::RngCore;
use zeroize::Zeroizing;

use interlock_core::{Error, Result, DERIVED_KEY_SIZE};

use crate::kdf;
use crate::stream::{self, IV_SIZE, SALT_SIZE};
use crate::{Cipher, CipherFactory, CipherInfo};

pub const NAME: &str = "AES-256-CTR";

pub fn descriptor() -> CipherInfo {
    CipherInfo {
        name: NAME,
        description: "AES CTR w/ 256 bit key derived using PBKDF2",
        key_format: "password",
        enc: true,
        dec: true,
        sig: false,
        otp: false,
        msg: false,
        extension: "aes256ctr",
    }
}

pub fn factory() -> CipherFactory {
    Box::new(|| Box::new(Aes256Cipher::new()))
}

pub struct Aes256Cipher {
    info: CipherInfo,
    password: Zeroizing<String>,
}

impl Aes256Cipher {
    pub fn new() -> Self {
        Self {
            info: descriptor(),
            password: Zeroizing::new(String::new()),
        }
    }
}

impl Default for Aes256Cipher {
    fn default() -> Self {
        Self::new()
    }
}

impl Cipher for Aes256Cipher {
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

        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let (salt, key) = kdf::derive_key(None, &self.password, DERIVED_KEY_SIZE);

        stream::encrypt_stream(&key, &salt, &iv, input, output)
    }

    fn decrypt(&mut self, input: &mut File, output: &mut dyn Write, verify: bool) -> Result<()> {
        if verify {
            return Err(Error::unsupported("signature verification"));
        }

        let mut salt = [0u8; SALT_SIZE];
        input.read_exact(&mut salt)?;

        let mut iv = [0u8; IV_SIZE];
        input.read_exact(&mut iv)?;

        let (_, key) = kdf::derive_key(Some(salt), &self.password, DERIVED_KEY_SIZE);

        stream::decrypt_stream(&key, &salt, &iv, input, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn temp_with(contents: &[u8]) -> File {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(contents).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f
    }

    #[test]
    fn test_short_password_rejected() {
        let mut a = Aes256Cipher::new();
        assert!(matches!(a.set_password("1234567"), Err(Error::BadPassword)));
        assert!(a.set_password("12345678").is_ok());
    }

    #[test]
    fn test_seeded_roundtrip() {
        let cleartext = b"01234567890ABCDEFGHILMNOPQRSTUVZ!@#";

        let mut a = Aes256Cipher::new();
        a.set_password("interlocktest").unwrap();

        let mut input = temp_with(cleartext);
        let mut ciphertext = Vec::new();
        a.encrypt(&mut input, &mut ciphertext, false).unwrap();

        // salt + iv + payload + hmac
        assert_eq!(ciphertext.len(), 8 + 16 + 35 + 32);
        assert_eq!(ciphertext.len(), 91);

        let mut b = Aes256Cipher::new();
        b.set_password("interlocktest").unwrap();

        let mut encrypted = temp_with(&ciphertext);
        let mut decrypted = Vec::new();
        b.decrypt(&mut encrypted, &mut decrypted, false).unwrap();

        assert_eq!(decrypted, cleartext);
    }

    #[test]
    fn test_tampered_trailing_byte_aborts_decryption() {
        let mut a = Aes256Cipher::new();
        a.set_password("interlocktest").unwrap();

        let mut input = temp_with(b"01234567890ABCDEFGHILMNOPQRSTUVZ!@#");
        let mut ciphertext = Vec::new();
        a.encrypt(&mut input, &mut ciphertext, false).unwrap();

        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;

        let mut b = Aes256Cipher::new();
        b.set_password("interlocktest").unwrap();

        let mut encrypted = temp_with(&ciphertext);
        let mut decrypted = Vec::new();
        match b.decrypt(&mut encrypted, &mut decrypted, false) {
            Err(Error::IntegrityFailure(_)) => {}
            other => panic!("expected IntegrityFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_password_fails_authentication() {
        let mut a = Aes256Cipher::new();
        a.set_password("interlocktest").unwrap();

        let mut input = temp_with(b"payload bytes");
        let mut ciphertext = Vec::new();
        a.encrypt(&mut input, &mut ciphertext, false).unwrap();

        let mut b = Aes256Cipher::new();
        b.set_password("not the password").unwrap();

        let mut encrypted = temp_with(&ciphertext);
        let mut decrypted = Vec::new();
        assert!(matches!(
            b.decrypt(&mut encrypted, &mut decrypted, false),
            Err(Error::IntegrityFailure(_))
        ));
    }

    #[test]
    fn test_sign_flag_unsupported() {
        let mut a = Aes256Cipher::new();
        a.set_password("interlocktest").unwrap();

        let mut input = temp_with(b"x");
        let mut out = Vec::new();
        assert!(matches!(
            a.encrypt(&mut input, &mut out, true),
            Err(Error::Unsupported(_))
        ));
    }
}
