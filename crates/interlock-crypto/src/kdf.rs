use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

/// PBKDF2-HMAC-SHA-256 iteration count used for all password-derived keys.
pub const PBKDF2_ROUNDS: u32 = 4096;

/// Salt prepended to every ciphertext file.
pub const SALT_SIZE: usize = 8;

/// Derive `size` bytes of key material from `password` and an arbitrary
/// salt (HSM key modifiers use diversifier-derived salts longer than the
/// file-format salt).
pub fn derive(password: &[u8], salt: &[u8], size: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; size]);
    pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ROUNDS, &mut key);

    key
}

/// Derive `size` bytes of key material from `password` with a file-format
/// salt.
///
/// When `salt` is `None` a fresh random salt is drawn (encryption); callers
/// decrypting an existing file pass the salt read from its header. The salt
/// actually used is returned either way.
pub fn derive_key(
    salt: Option<[u8; SALT_SIZE]>,
    password: &str,
    size: usize,
) -> ([u8; SALT_SIZE], Zeroizing<Vec<u8>>) {
    let salt = salt.unwrap_or_else(|| {
        let mut s = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut s);
        s
    });

    let key = derive(password.as_bytes(), &salt, size);

    (salt, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic_for_fixed_salt() {
        let salt = [7u8; SALT_SIZE];
        let (_, k1) = derive_key(Some(salt), "interlocktest", 32);
        let (_, k2) = derive_key(Some(salt), "interlocktest", 32);
        assert_eq!(*k1, *k2);
    }

    #[test]
    fn test_fresh_salts_differ() {
        let (s1, _) = derive_key(None, "interlocktest", 32);
        let (s2, _) = derive_key(None, "interlocktest", 32);
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_salt_changes_key() {
        let (_, k1) = derive_key(Some([1u8; SALT_SIZE]), "interlocktest", 32);
        let (_, k2) = derive_key(Some([2u8; SALT_SIZE]), "interlocktest", 32);
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn test_requested_size_honored() {
        let (_, k) = derive_key(None, "interlocktest", 16);
        assert_eq!(k.len(), 16);
    }

    #[test]
    fn test_wide_salt_matches_file_format_derivation() {
        let salt = [3u8; SALT_SIZE];
        let (_, via_file) = derive_key(Some(salt), "interlocktest", 32);
        let via_raw = derive(b"interlocktest", &salt, 32);
        assert_eq!(*via_file, *via_raw);
    }
}
