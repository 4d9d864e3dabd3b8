//! Authenticated symmetric stream format shared by all password-based
//! ciphers, hardware-wrapped variants included:
//!
//! ```text
//! salt (8 bytes) || iv (16 bytes) || ciphertext || hmac-sha256 (32 bytes)
//! ```
//!
//! The keystream is AES-256-CTR; the HMAC is computed over
//! `salt || iv || ciphertext` with the same derived key (encrypt-then-MAC)
//! and verified in constant time before any plaintext is produced. Locating
//! the trailing MAC requires the input length, so decryption takes a
//! seekable input rather than relying on EOF.

use std::io::{Read, Seek, SeekFrom, Write};

use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use interlock_core::{Error, Result};

pub const SALT_SIZE: usize = 8;
pub const IV_SIZE: usize = 16;
pub const MAC_SIZE: usize = 32;

const CHUNK: usize = 32 * 1024;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

fn keystream(key: &[u8], iv: &[u8; IV_SIZE]) -> Result<Aes256Ctr> {
    Aes256Ctr::new_from_slices(key, iv)
        .map_err(|_| Error::Other("invalid stream cipher key length".into()))
}

fn mac(key: &[u8], salt: &[u8; SALT_SIZE], iv: &[u8; IV_SIZE]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| Error::Other("invalid HMAC key length".into()))?;
    mac.update(salt);
    mac.update(iv);
    Ok(mac)
}

/// Encrypt `input` into `output`, prepending the header and appending the
/// authentication tag.
pub fn encrypt_stream<R, W>(
    key: &[u8],
    salt: &[u8; SALT_SIZE],
    iv: &[u8; IV_SIZE],
    input: &mut R,
    output: &mut W,
) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut stream = keystream(key, iv)?;
    let mut mac = mac(key, salt, iv)?;

    output.write_all(salt)?;
    output.write_all(iv)?;

    let mut buf = [0u8; CHUNK];

    loop {
        let n = input.read(&mut buf)?;

        if n == 0 {
            break;
        }

        stream.apply_keystream(&mut buf[..n]);
        mac.update(&buf[..n]);
        output.write_all(&buf[..n])?;
    }

    output.write_all(&mac.finalize().into_bytes())?;

    Ok(())
}

/// Decrypt `input` (positioned just past the salt/iv header) into `output`.
///
/// The full MAC is recomputed and checked before the first plaintext byte is
/// written; any mismatch aborts with `IntegrityFailure`.
pub fn decrypt_stream<R, W>(
    key: &[u8],
    salt: &[u8; SALT_SIZE],
    iv: &[u8; IV_SIZE],
    input: &mut R,
    output: &mut W,
) -> Result<()>
where
    R: Read + Seek + ?Sized,
    W: Write + ?Sized,
{
    let header = input.stream_position()?;
    let total = input.seek(SeekFrom::End(0))?;

    let limit = total
        .checked_sub(header + MAC_SIZE as u64)
        .ok_or_else(|| Error::IntegrityFailure("ciphertext truncated".into()))?;

    input.seek(SeekFrom::Start(header))?;

    let mut mac = mac(key, salt, iv)?;
    let mut buf = [0u8; CHUNK];
    let mut remaining = limit;

    while remaining > 0 {
        let want = remaining.min(CHUNK as u64) as usize;
        input.read_exact(&mut buf[..want])?;
        mac.update(&buf[..want]);
        remaining -= want as u64;
    }

    let mut trailer = [0u8; MAC_SIZE];
    input.read_exact(&mut trailer)?;

    // constant-time comparison
    mac.verify_slice(&trailer)
        .map_err(|_| Error::IntegrityFailure("invalid HMAC".into()))?;

    input.seek(SeekFrom::Start(header))?;

    let mut stream = keystream(key, iv)?;
    let mut remaining = limit;

    while remaining > 0 {
        let want = remaining.min(CHUNK as u64) as usize;
        input.read_exact(&mut buf[..want])?;
        stream.apply_keystream(&mut buf[..want]);
        output.write_all(&buf[..want])?;
        remaining -= want as u64;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip_key() -> Vec<u8> {
        (0u8..32).collect()
    }

    #[test]
    fn test_roundtrip() {
        let key = roundtrip_key();
        let salt = [1u8; SALT_SIZE];
        let iv = [2u8; IV_SIZE];
        let plaintext = b"attack at dawn";

        let mut ciphertext = Vec::new();
        encrypt_stream(&key, &salt, &iv, &mut Cursor::new(&plaintext[..]), &mut ciphertext).unwrap();

        assert_eq!(
            ciphertext.len(),
            SALT_SIZE + IV_SIZE + plaintext.len() + MAC_SIZE
        );

        let mut input = Cursor::new(&ciphertext);
        input.set_position((SALT_SIZE + IV_SIZE) as u64);

        let mut decrypted = Vec::new();
        decrypt_stream(&key, &salt, &iv, &mut input, &mut decrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_any_flipped_byte_fails_authentication() {
        let key = roundtrip_key();
        let salt = [1u8; SALT_SIZE];
        let iv = [2u8; IV_SIZE];

        let mut ciphertext = Vec::new();
        encrypt_stream(
            &key,
            &salt,
            &iv,
            &mut Cursor::new(&b"some plaintext"[..]),
            &mut ciphertext,
        )
        .unwrap();

        let last = ciphertext.len() - 1;
        for idx in [SALT_SIZE + IV_SIZE, last] {
            let mut tampered = ciphertext.clone();
            tampered[idx] ^= 0x01;

            let mut input = Cursor::new(&tampered);
            input.set_position((SALT_SIZE + IV_SIZE) as u64);

            let mut out = Vec::new();
            match decrypt_stream(&key, &salt, &iv, &mut input, &mut out) {
                Err(Error::IntegrityFailure(_)) => {}
                other => panic!("tampered byte {idx} not caught: {other:?}"),
            }
            assert!(out.is_empty(), "no plaintext may be produced on failure");
        }
    }

    #[test]
    fn test_truncated_input_is_integrity_failure() {
        let key = roundtrip_key();
        let salt = [0u8; SALT_SIZE];
        let iv = [0u8; IV_SIZE];

        let mut input = Cursor::new(vec![0u8; MAC_SIZE - 1]);
        let mut out = Vec::new();
        assert!(matches!(
            decrypt_stream(&key, &salt, &iv, &mut input, &mut out),
            Err(Error::IntegrityFailure(_))
        ));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = roundtrip_key();
        let salt = [9u8; SALT_SIZE];
        let iv = [8u8; IV_SIZE];

        let mut ciphertext = Vec::new();
        encrypt_stream(&key, &salt, &iv, &mut Cursor::new(&b""[..]), &mut ciphertext).unwrap();
        assert_eq!(ciphertext.len(), SALT_SIZE + IV_SIZE + MAC_SIZE);

        let mut input = Cursor::new(&ciphertext);
        input.set_position((SALT_SIZE + IV_SIZE) as u64);

        let mut out = Vec::new();
        decrypt_stream(&key, &salt, &iv, &mut input, &mut out).unwrap();
        assert!(out.is_empty());
    }
}
