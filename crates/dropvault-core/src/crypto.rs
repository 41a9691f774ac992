//! Password-keyed content encryption and password hashing.
//!
//! Two distinct derivations from the same raw password:
//! `derive_key` (Argon2id over a fixed deployment salt) feeds the content
//! cipher, `hash_password` (Argon2 PHC string, per-hash random salt) is for
//! authentication only. The parameters are configured independently so the
//! two concerns never share strength assumptions.
//!
//! Ciphertext wire format: [ iv (16 bytes) | AES-256-CTR ciphertext ]

use aes::Aes256;
use argon2::password_hash::{rand_core::OsRng as PhcOsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::error::ConfigError;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;
pub const DERIVED_KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const SALT_LEN: usize = 8;

type Aes256Ctr = Ctr128BE<Aes256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption requested but no salt is configured")]
    SaltMissing,

    #[error("key derivation: {0}")]
    KeyDerivation(String),

    #[error("password hash: {0}")]
    PasswordHash(String),

    #[error("ciphertext shorter than one iv ({0} bytes)")]
    TruncatedCiphertext(usize),
}

/// Holds the fixed deployment salt; all other state is per-call. A
/// deployment without a salt can still hash passwords but cannot encrypt.
#[derive(Clone)]
pub struct CryptoService {
    salt: Option<[u8; SALT_LEN]>,
}

impl CryptoService {
    /// Fails unless the configured salt is exactly 8 bytes. This is a fatal
    /// configuration error, checked once at assembly time.
    pub fn new(salt: Option<&str>) -> Result<Self, ConfigError> {
        let salt = match salt {
            None => None,
            Some(s) => {
                let bytes = s.as_bytes();
                if bytes.len() != SALT_LEN {
                    return Err(ConfigError::BadSaltLength {
                        expected: SALT_LEN,
                        actual: bytes.len(),
                    });
                }
                let mut fixed = [0u8; SALT_LEN];
                fixed.copy_from_slice(bytes);
                Some(fixed)
            }
        };
        Ok(Self { salt })
    }

    pub fn encryption_available(&self) -> bool {
        self.salt.is_some()
    }

    /// Derive the 32-byte content key from a password over the fixed salt.
    pub fn derive_key(&self, password: &str) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>, CryptoError> {
        let salt = self.salt.as_ref().ok_or(CryptoError::SaltMissing)?;
        let params = Params::new(
            KDF_MEMORY_COST,
            KDF_TIME_COST,
            KDF_PARALLELISM,
            Some(DERIVED_KEY_LEN),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
        argon
            .hash_password_into(password.as_bytes(), salt, key.as_mut_slice())
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }

    /// Encrypt with a fresh random 16-byte IV, prepended to the output.
    pub fn encrypt(&self, plaintext: &[u8], key: &[u8; DERIVED_KEY_LEN]) -> Vec<u8> {
        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let mut buf = plaintext.to_vec();
        let mut cipher = Aes256Ctr::new(key.into(), &iv.into());
        cipher.apply_keystream(&mut buf);
        let mut out = Vec::with_capacity(IV_LEN + buf.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&buf);
        out
    }

    /// Split the 16-byte IV prefix and decrypt the remainder.
    pub fn decrypt(&self, data: &[u8], key: &[u8; DERIVED_KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < IV_LEN {
            return Err(CryptoError::TruncatedCiphertext(data.len()));
        }
        let (iv_bytes, ct) = data.split_at(IV_LEN);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(iv_bytes);
        let mut buf = ct.to_vec();
        let mut cipher = Aes256Ctr::new(key.into(), &iv.into());
        cipher.apply_keystream(&mut buf);
        Ok(buf)
    }

    /// One-way PHC hash for authentication; random per-hash salt,
    /// parameters independent of `derive_key`.
    pub fn hash_password(&self, password: &str) -> Result<String, CryptoError> {
        let salt = SaltString::generate(&mut PhcOsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| CryptoError::PasswordHash(e.to_string()))
    }

    /// Constant-time verification against a stored PHC hash.
    pub fn verify_password(&self, hash: &str, password: &str) -> Result<bool, CryptoError> {
        let parsed = PasswordHash::new(hash).map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CryptoError::PasswordHash(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CryptoService {
        CryptoService::new(Some("testsalt")).unwrap()
    }

    #[test]
    fn salt_must_be_eight_bytes_when_present() {
        assert!(CryptoService::new(Some("short")).is_err());
        assert!(CryptoService::new(Some("ninebytes")).is_err());
        assert!(CryptoService::new(Some("testsalt")).is_ok());
        assert!(CryptoService::new(None).is_ok());
    }

    #[test]
    fn no_salt_means_no_key_derivation() {
        let svc = CryptoService::new(None).unwrap();
        assert!(!svc.encryption_available());
        assert!(matches!(svc.derive_key("pw"), Err(CryptoError::SaltMissing)));
        // password hashing does not depend on the fixed salt
        let hash = svc.hash_password("pw").unwrap();
        assert!(svc.verify_password(&hash, "pw").unwrap());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let svc = service();
        let key = svc.derive_key("hunter2").unwrap();
        for payload in [&b""[..], b"a", b"hello world", &[0u8; 4096][..]] {
            let ct = svc.encrypt(payload, &key);
            assert_eq!(ct.len(), payload.len() + IV_LEN);
            assert_eq!(svc.decrypt(&ct, &key).unwrap(), payload);
        }
    }

    #[test]
    fn ciphertext_differs_from_plaintext() {
        let svc = service();
        let key = svc.derive_key("hunter2").unwrap();
        let ct = svc.encrypt(b"secret content", &key);
        assert_ne!(&ct[IV_LEN..], b"secret content");
    }

    #[test]
    fn wrong_key_does_not_roundtrip() {
        let svc = service();
        let key = svc.derive_key("hunter2").unwrap();
        let other = svc.derive_key("hunter3").unwrap();
        let ct = svc.encrypt(b"secret content", &key);
        assert_ne!(svc.decrypt(&ct, &other).unwrap(), b"secret content");
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let svc = service();
        let key = svc.derive_key("hunter2").unwrap();
        assert!(matches!(
            svc.decrypt(&[0u8; 7], &key),
            Err(CryptoError::TruncatedCiphertext(7))
        ));
    }

    #[test]
    fn derive_key_is_deterministic() {
        let svc = service();
        assert_eq!(*svc.derive_key("pw").unwrap(), *svc.derive_key("pw").unwrap());
        assert_ne!(*svc.derive_key("pw").unwrap(), *svc.derive_key("pW").unwrap());
    }

    #[test]
    fn password_hash_verifies_exclusively() {
        let svc = service();
        let hash = svc.hash_password("pw").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(svc.verify_password(&hash, "pw").unwrap());
        assert!(!svc.verify_password(&hash, "wrong").unwrap());
        assert!(!svc.verify_password(&hash, "").unwrap());
    }

    #[test]
    fn password_hash_is_salted() {
        let svc = service();
        assert_ne!(
            svc.hash_password("pw").unwrap(),
            svc.hash_password("pw").unwrap()
        );
    }
}
