//! Time-based one-time passwords (RFC 6238): HMAC-SHA-1, 30 second
//! interval, 6 digit codes.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use data_encoding::BASE32;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use interlock_core::{Error, Result};

use crate::{Cipher, CipherFactory, CipherInfo, Key};

pub const NAME: &str = "TOTP";

const INTERVAL: i64 = 30;
const DIGITS: u32 = 6;

pub fn descriptor() -> CipherInfo {
    CipherInfo {
        name: NAME,
        description: "Time-Based One-Time Password Algorithm (RFC6238, a.k.a. Google Authenticator)",
        key_format: "base32",
        enc: false,
        dec: false,
        sig: false,
        otp: true,
        msg: false,
        extension: "totp",
    }
}

pub fn factory() -> CipherFactory {
    Box::new(|| Box::new(Totp::new()))
}

pub struct Totp {
    info: CipherInfo,
    sec_key: Vec<u8>,
}

impl Totp {
    pub fn new() -> Self {
        Self {
            info: descriptor(),
            sec_key: Vec::new(),
        }
    }
}

impl Default for Totp {
    fn default() -> Self {
        Self::new()
    }
}

impl Cipher for Totp {
    fn info(&self) -> &CipherInfo {
        &self.info
    }

    fn set_key(&mut self, _key: &Key, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;

        // seeds are commonly pasted with grouping whitespace or hyphens
        let seed: String = raw
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| *c != ' ' && *c != '-')
            .collect();

        self.sec_key = BASE32
            .decode(seed.as_bytes())
            .map_err(|e| Error::Other(format!("invalid base32 seed: {e}")))?;

        Ok(())
    }

    fn key_info(&mut self, key: &Key, path: &Path) -> Result<String> {
        self.set_key(key, path)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        let (otp, exp) = self.gen_otp(now)?;

        Ok(format!("Code (expires in {exp} seconds)\n\t{otp}\n"))
    }

    fn gen_otp(&self, timestamp: i64) -> Result<(String, i64)> {
        if self.sec_key.is_empty() {
            return Err(Error::Other("OTP generation requires a seed key".into()));
        }

        let counter = (timestamp / INTERVAL) as u64;

        let mut mac = Hmac::<Sha1>::new_from_slice(&self.sec_key)
            .map_err(|_| Error::Other("invalid OTP key length".into()))?;
        mac.update(&counter.to_be_bytes());
        let hash = mac.finalize().into_bytes();

        // dynamic truncation (RFC 4226 §5.3)
        let offset = (hash[hash.len() - 1] & 0x0f) as usize;
        let truncated = u32::from_be_bytes([
            hash[offset],
            hash[offset + 1],
            hash[offset + 2],
            hash[offset + 3],
        ]) & 0x7fff_ffff;

        let code = truncated % 10u32.pow(DIGITS);
        let exp = INTERVAL - (timestamp % INTERVAL);

        Ok((format!("{code:06}"), exp))
    }
}
