//! OpenPGP collaborator backed by rPGP.
//!
//! Keys are armored on disk. Expired subkey binding signatures are filtered
//! out on key load, since keyrings commonly carry rotated encryption
//! subkeys whose bindings have lapsed.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use chrono::Utc;
use pgp::composed::{
    Deserializable, KeyType, Message, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey,
    StandaloneSignature, SubkeyParamsBuilder,
};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::{
    Signature, SignatureConfig, SignatureType, SignatureVersion, Subpacket, SubpacketData,
};
use pgp::ser::Serialize as _;
use pgp::types::{KeyTrait, SecretKeyTrait};
use zeroize::Zeroizing;

use interlock_core::{Error, Result};

use crate::{Cipher, CipherFactory, CipherInfo, Key};

pub const NAME: &str = "OpenPGP";

pub fn descriptor() -> CipherInfo {
    CipherInfo {
        name: NAME,
        description: "OpenPGP (rPGP)",
        key_format: "armor",
        enc: true,
        dec: true,
        sig: true,
        otp: false,
        msg: false,
        extension: "pgp",
    }
}

pub fn factory() -> CipherFactory {
    Box::new(|| Box::new(OpenPgp::new()))
}

pub struct OpenPgp {
    info: CipherInfo,
    pub_key: Option<SignedPublicKey>,
    sec_key: Option<SignedSecretKey>,
    password: Zeroizing<String>,
}

impl OpenPgp {
    pub fn new() -> Self {
        Self {
            info: descriptor(),
            pub_key: None,
            sec_key: None,
            password: Zeroizing::new(String::new()),
        }
    }

    fn pgp_err(err: impl std::fmt::Display) -> Error {
        Error::Other(format!("OpenPGP: {err}"))
    }

    fn password_fn(&self) -> impl FnOnce() -> String + Clone {
        let password = self.password.to_string();
        move || password
    }
}

impl Default for OpenPgp {
    fn default() -> Self {
        Self::new()
    }
}

/// A subkey binding signature whose key lifetime has lapsed.
fn binding_expired(sig: &Signature) -> bool {
    match (sig.created(), sig.key_expiration_time()) {
        (Some(created), Some(lifetime)) => *created + *lifetime < Utc::now(),
        _ => false,
    }
}

impl Cipher for OpenPgp {
    fn info(&self) -> &CipherInfo {
        &self.info
    }

    fn gen_key(&self, identifier: &str, email: &str) -> Result<(String, String)> {
        let mut params = SecretKeyParamsBuilder::default();
        params
            .key_type(KeyType::Rsa(2048))
            .can_certify(true)
            .can_sign(true)
            .can_encrypt(true)
            .primary_user_id(format!("{identifier} <{email}>"))
            .subkey(
                SubkeyParamsBuilder::default()
                    .key_type(KeyType::Rsa(2048))
                    .can_encrypt(true)
                    .build()
                    .map_err(Self::pgp_err)?,
            );

        let secret_key = params
            .build()
            .map_err(Self::pgp_err)?
            .generate()
            .map_err(Self::pgp_err)?;

        let signed_secret = secret_key.sign(String::new).map_err(Self::pgp_err)?;

        let signed_public = signed_secret
            .public_key()
            .sign(&signed_secret, String::new)
            .map_err(Self::pgp_err)?;

        let public = signed_public
            .to_armored_string(None.into())
            .map_err(Self::pgp_err)?;
        let secret = signed_secret
            .to_armored_string(None.into())
            .map_err(Self::pgp_err)?;

        Ok((public, secret))
    }

    fn set_password(&mut self, password: &str) -> Result<()> {
        let sec = self
            .sec_key
            .as_ref()
            .ok_or_else(|| Error::Other("password cannot be set without secret key".into()))?;

        // reject a wrong passphrase up front rather than mid-operation
        sec.unlock(|| password.to_string(), |_| Ok(()))
            .map_err(|_| Error::Other("invalid secret key password".into()))?;

        self.password = Zeroizing::new(password.to_string());

        Ok(())
    }

    fn set_key(&mut self, key: &Key, path: &Path) -> Result<()> {
        let armored = std::fs::read_to_string(path)?;

        let block_is_private = armored.contains("BEGIN PGP PRIVATE KEY BLOCK");

        if key.private && !block_is_private {
            return Err(Error::Other("public key detected in private key slot".into()));
        }

        if !key.private && block_is_private {
            return Err(Error::Other("private key detected in public key slot".into()));
        }

        if key.private {
            let (mut sec, _) =
                SignedSecretKey::from_armor_single(Cursor::new(armored.as_bytes()))
                    .map_err(|_| Error::Other("private key expected, parsing failed".into()))?;

            sec.secret_subkeys.retain(|subkey| {
                let expired = subkey.signatures.iter().all(binding_expired)
                    && !subkey.signatures.is_empty();
                if expired {
                    tracing::debug!("dropping expired subkey from loaded secret key");
                }
                !expired
            });

            self.sec_key = Some(sec);
        } else {
            let (mut public, _) =
                SignedPublicKey::from_armor_single(Cursor::new(armored.as_bytes()))
                    .map_err(|_| Error::Other("public key expected, parsing failed".into()))?;

            public.public_subkeys.retain(|subkey| {
                let expired = subkey.signatures.iter().all(binding_expired)
                    && !subkey.signatures.is_empty();
                !expired
            });

            self.pub_key = Some(public);
        }

        Ok(())
    }

    fn key_info(&mut self, key: &Key, path: &Path) -> Result<String> {
        self.set_key(key, path)?;

        let mut info = format!(
            "Identifier: {}, Format: {}, Cipher: {}\n",
            key.identifier, key.key_format, key.cipher
        );

        if key.private {
            let sec = self.sec_key.as_ref().ok_or(Error::NotFound)?;
            info += "OpenPGP private key:\n";
            info += &format!("  Fingerprint: {}\n", hex::encode(sec.fingerprint()));
            info += &format!("  Subkeys: {}\n", sec.secret_subkeys.len());
        } else {
            let public = self.pub_key.as_ref().ok_or(Error::NotFound)?;
            info += "OpenPGP public key:\n";
            info += &format!("  Type: {:?}\n", public.primary_key.algorithm());
            info += &format!("  Fingerprint: {}\n", hex::encode(public.fingerprint()));
            info += "  Identities:\n";
            for user in &public.details.users {
                info += &format!("    {}\n", user.id.id());
            }
            info += &format!("  Subkeys: {}\n", public.public_subkeys.len());
        }

        Ok(info)
    }

    fn encrypt(&mut self, input: &mut File, output: &mut dyn Write, sign: bool) -> Result<()> {
        let public = self
            .pub_key
            .as_ref()
            .ok_or_else(|| Error::Other("encryption requires a public key".into()))?;

        let mut data = Vec::new();
        input.read_to_end(&mut data)?;

        let mut rng = rand::thread_rng();
        let message = Message::new_literal_bytes("", &data);

        // signing is applied when requested and a secret key is loaded
        let message = if sign {
            let sec = self
                .sec_key
                .as_ref()
                .ok_or_else(|| Error::Other("signing requires a secret key".into()))?;

            message
                .sign(sec, self.password_fn(), HashAlgorithm::SHA2_256)
                .map_err(Self::pgp_err)?
        } else {
            message
        };

        let encrypted = message
            .encrypt_to_keys(&mut rng, SymmetricKeyAlgorithm::AES256, &[public])
            .map_err(Self::pgp_err)?;

        let bytes = encrypted.to_bytes().map_err(Self::pgp_err)?;
        output.write_all(&bytes)?;

        Ok(())
    }

    fn decrypt(&mut self, input: &mut File, output: &mut dyn Write, verify: bool) -> Result<()> {
        let sec = self
            .sec_key
            .as_ref()
            .ok_or_else(|| Error::Other("decryption requires a secret key".into()))?;

        let mut data = Vec::new();
        input.read_to_end(&mut data)?;

        // armored and binary messages are both accepted
        let message = match Message::from_armor_single(Cursor::new(&data)) {
            Ok((message, _)) => message,
            Err(_) => Message::from_bytes(Cursor::new(&data)).map_err(Self::pgp_err)?,
        };

        let (decrypted, _) = message
            .decrypt(self.password_fn(), &[sec])
            .map_err(Self::pgp_err)?;

        let content = decrypted
            .get_content()
            .map_err(Self::pgp_err)?
            .ok_or_else(|| Error::Other("empty OpenPGP message".into()))?;

        output.write_all(&content)?;

        if verify {
            let signed = matches!(decrypted, Message::Signed { .. });

            let checked = signed
                && match &self.pub_key {
                    Some(public) => decrypted.verify(&public.primary_key).is_ok(),
                    None => decrypted.verify(&sec.primary_key).is_ok(),
                };

            if !checked {
                return Err(Error::IntegrityFailure(
                    "file has been decrypted but signature verification failed".into(),
                ));
            }
        }

        Ok(())
    }

    fn sign(&mut self, input: &mut File, output: &mut dyn Write) -> Result<()> {
        let sec = self
            .sec_key
            .as_ref()
            .ok_or_else(|| Error::Other("signing requires a secret key".into()))?;

        let config = SignatureConfig::new_v4(
            SignatureVersion::V4,
            SignatureType::Binary,
            sec.algorithm(),
            HashAlgorithm::SHA2_256,
            vec![
                Subpacket::regular(SubpacketData::SignatureCreationTime(Utc::now())),
                Subpacket::regular(SubpacketData::Issuer(sec.key_id())),
            ],
            vec![],
        );

        let signature = config
            .sign(sec, self.password_fn(), input)
            .map_err(Self::pgp_err)?;

        let armored = StandaloneSignature::new(signature)
            .to_armored_string(None.into())
            .map_err(Self::pgp_err)?;

        output.write_all(armored.as_bytes())?;

        Ok(())
    }

    fn verify(&mut self, input: &mut File, signature: &mut File) -> Result<()> {
        let public = self
            .pub_key
            .as_ref()
            .ok_or_else(|| Error::Other("verification requires a public key".into()))?;

        let mut data = Vec::new();
        input.read_to_end(&mut data)?;

        let mut armored = String::new();
        signature.read_to_string(&mut armored)?;

        let (sig, _) = StandaloneSignature::from_string(&armored)
            .map_err(|_| Error::IntegrityFailure("unparseable signature".into()))?;

        sig.verify(&public.primary_key, &data)
            .map_err(|_| Error::IntegrityFailure("invalid signature".into()))?;

        Ok(())
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

    fn key(private: bool) -> Key {
        Key {
            identifier: "test".into(),
            key_format: "armor".into(),
            cipher: NAME.into(),
            private,
            path: String::new(),
        }
    }

    fn keypair(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let pgp = OpenPgp::new();
        let (public, secret) = pgp.gen_key("test", "test@example.com").unwrap();

        let pub_path = dir.join("test-pub.armor");
        let sec_path = dir.join("test-sec.armor");
        std::fs::write(&pub_path, public).unwrap();
        std::fs::write(&sec_path, secret).unwrap();

        (pub_path, sec_path)
    }

    #[test]
    fn test_generated_keys_are_armored() {
        let pgp = OpenPgp::new();
        let (public, secret) = pgp.gen_key("alice", "alice@example.com").unwrap();

        assert!(public.contains("BEGIN PGP PUBLIC KEY BLOCK"));
        assert!(secret.contains("BEGIN PGP PRIVATE KEY BLOCK"));
    }

    #[test]
    fn test_truncated_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (pub_path, _) = keypair(dir.path());

        let armored = std::fs::read_to_string(&pub_path).unwrap();
        let truncated_path = dir.path().join("truncated.armor");
        std::fs::write(&truncated_path, &armored[..armored.len() / 2]).unwrap();

        let mut pgp = OpenPgp::new();
        assert!(pgp.set_key(&key(false), &truncated_path).is_err());
    }

    #[test]
    fn test_key_slot_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (pub_path, sec_path) = keypair(dir.path());

        let mut pgp = OpenPgp::new();
        // public armor in the private slot and vice versa
        assert!(pgp.set_key(&key(true), &pub_path).is_err());
        assert!(pgp.set_key(&key(false), &sec_path).is_err());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (pub_path, sec_path) = keypair(dir.path());

        let mut enc = OpenPgp::new();
        enc.set_key(&key(false), &pub_path).unwrap();

        let mut input = temp_with(b"pgp payload");
        let mut ciphertext = Vec::new();
        enc.encrypt(&mut input, &mut ciphertext, false).unwrap();

        let mut dec = OpenPgp::new();
        dec.set_key(&key(true), &sec_path).unwrap();

        let mut encrypted = temp_with(&ciphertext);
        let mut plaintext = Vec::new();
        dec.decrypt(&mut encrypted, &mut plaintext, false).unwrap();

        assert_eq!(plaintext, b"pgp payload");
    }

    #[test]
    fn test_unsigned_message_fails_verified_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let (pub_path, sec_path) = keypair(dir.path());

        let mut enc = OpenPgp::new();
        enc.set_key(&key(false), &pub_path).unwrap();

        let mut input = temp_with(b"unsigned payload");
        let mut ciphertext = Vec::new();
        enc.encrypt(&mut input, &mut ciphertext, false).unwrap();

        let mut dec = OpenPgp::new();
        dec.set_key(&key(true), &sec_path).unwrap();
        dec.set_key(&key(false), &pub_path).unwrap();

        let mut encrypted = temp_with(&ciphertext);
        let mut plaintext = Vec::new();
        assert!(matches!(
            dec.decrypt(&mut encrypted, &mut plaintext, true),
            Err(Error::IntegrityFailure(_))
        ));
    }

    #[test]
    fn test_detached_signature_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (pub_path, sec_path) = keypair(dir.path());

        let mut signer = OpenPgp::new();
        signer.set_key(&key(true), &sec_path).unwrap();

        let mut input = temp_with(b"signed payload");
        let mut armored_sig = Vec::new();
        signer.sign(&mut input, &mut armored_sig).unwrap();

        let sig_text = String::from_utf8(armored_sig.clone()).unwrap();
        assert!(sig_text.contains("BEGIN PGP SIGNATURE"));

        let mut verifier = OpenPgp::new();
        verifier.set_key(&key(false), &pub_path).unwrap();

        let mut data = temp_with(b"signed payload");
        let mut sig = temp_with(&armored_sig);
        verifier.verify(&mut data, &mut sig).unwrap();

        // a different payload must not verify
        let mut other = temp_with(b"tampered payload");
        let mut sig = temp_with(&armored_sig);
        assert!(matches!(
            verifier.verify(&mut other, &mut sig),
            Err(Error::IntegrityFailure(_))
        ));
    }
}
