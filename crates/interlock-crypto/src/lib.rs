//! Pluggable cipher surface.
//!
//! Every cipher implements the same capability set behind the [`Cipher`]
//! trait; capabilities a cipher lacks answer with `Unsupported`. Instances
//! are created per request from registered factories so that per-request
//! state (passwords, loaded key material) cannot leak across requests.
//!
//! The registry is assembled once at startup from the statically compiled
//! cipher set plus whatever the HSM directive contributes, then shared
//! read-only across request handlers.

pub mod aes256;
pub mod kdf;
pub mod keystore;
pub mod openpgp;
pub mod registry;
pub mod stream;
pub mod totp;

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use interlock_core::response::ApiResponse;
use interlock_core::{Error, Result};

pub use keystore::Key;
pub use registry::{CipherFactory, CipherRegistry};

/// Static description of a cipher: identity, key format and capability bits.
///
/// The `ext` field doubles as the ciphertext's self-identification: the
/// cipher that produced a file is recovered from the file extension.
#[derive(Debug, Clone, Serialize)]
pub struct CipherInfo {
    pub name: &'static str,
    #[serde(rename = "info")]
    pub description: &'static str,
    /// One of "password", "armor", "base32", "binary".
    pub key_format: &'static str,
    pub enc: bool,
    pub dec: bool,
    pub sig: bool,
    pub otp: bool,
    pub msg: bool,
    #[serde(rename = "ext")]
    pub extension: &'static str,
}

/// Operation contract common to all ciphers.
///
/// Default implementations answer `Unsupported`; each cipher overrides the
/// capabilities its descriptor advertises. Outputs are generic writers so
/// that callers may decrypt into memory (the TLS key path) as well as onto
/// the mounted volume.
pub trait Cipher: Send {
    fn info(&self) -> &CipherInfo;

    /// Post-authentication hook; a no-op for most ciphers.
    fn activate(&mut self, _active: bool) -> Result<()> {
        Ok(())
    }

    fn set_password(&mut self, _password: &str) -> Result<()> {
        Err(Error::unsupported("passwords"))
    }

    /// Load key material from `path`, previously classified as `key`.
    fn set_key(&mut self, _key: &Key, _path: &Path) -> Result<()> {
        Err(Error::unsupported("keys"))
    }

    /// Human-readable description of a stored key.
    fn key_info(&mut self, _key: &Key, _path: &Path) -> Result<String> {
        Err(Error::unsupported("keys"))
    }

    fn encrypt(&mut self, _input: &mut File, _output: &mut dyn Write, _sign: bool) -> Result<()> {
        Err(Error::unsupported("encryption"))
    }

    fn decrypt(&mut self, _input: &mut File, _output: &mut dyn Write, _verify: bool) -> Result<()> {
        Err(Error::unsupported("decryption"))
    }

    /// Detached armored signature.
    fn sign(&mut self, _input: &mut File, _output: &mut dyn Write) -> Result<()> {
        Err(Error::unsupported("signing"))
    }

    fn verify(&mut self, _input: &mut File, _signature: &mut File) -> Result<()> {
        Err(Error::unsupported("signature verification"))
    }

    /// Generate a keypair, returned as (public, private) armored strings.
    fn gen_key(&self, _identifier: &str, _email: &str) -> Result<(String, String)> {
        Err(Error::unsupported("key generation"))
    }

    /// One-time password for `timestamp`, with seconds until rotation.
    fn gen_otp(&self, _timestamp: i64) -> Result<(String, i64)> {
        Err(Error::unsupported("OTP generation"))
    }

    /// Cipher-private API endpoints (`/api/<cipher>/<verb>`).
    fn handle_request(&mut self, _verb: &str, _request: &Value) -> ApiResponse {
        ApiResponse::not_found()
    }
}
