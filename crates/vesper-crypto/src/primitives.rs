//! Stateless cryptographic primitives.
//!
//! Thin wrappers over the RustCrypto stack so the rest of the crate never
//! touches cipher or digest APIs directly. No function here holds state.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM nonce length in bytes.
pub const AES_NONCE_LEN: usize = 12;

/// Fill a fresh buffer with `n` cryptographically secure random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// HMAC-SHA256 of `message` under `key`.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    // Qualified call: aes-gcm's KeyInit is also in scope and shares the name.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// HKDF-SHA256 (RFC 5869 extract-then-expand) into a caller-sized buffer.
///
/// `salt = None` uses the RFC's all-zero salt.
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    okm: &mut [u8],
) -> Result<(), CryptoError> {
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, okm)
        .map_err(|e| CryptoError::KeyGeneration(format!("HKDF expand failed: {e}")))
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Encrypt with AES-256-GCM under `key` and a 12-byte `nonce`.
///
/// Output is ciphertext with the 16-byte authentication tag appended.
pub fn aes_encrypt(
    key: &[u8; 32],
    nonce: &[u8; AES_NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Decrypt AES-256-GCM output produced by [`aes_encrypt`].
pub fn aes_decrypt(
    key: &[u8; 32],
    nonce: &[u8; AES_NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Compare two byte slices in time independent of where they first differ.
///
/// The only comparison ever applied to MACs or other secret-derived material.
/// Slices of different lengths compare unequal (length is not secret).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_length_and_freshness() {
        let a = random_bytes(32);
        let b = random_bytes(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn hkdf_rfc5869_test_case_1() {
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00u8..=0x0c).collect();
        let info: Vec<u8> = (0xf0u8..=0xf9).collect();

        let mut okm = [0u8; 42];
        hkdf_sha256(&ikm, Some(&salt), &info, &mut okm).unwrap();

        let expected = hex::decode(
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865",
        )
        .unwrap();
        assert_eq!(okm.as_slice(), expected.as_slice());
    }

    #[test]
    fn hmac_is_keyed() {
        let tag1 = hmac_sha256(b"key one", b"message");
        let tag2 = hmac_sha256(b"key two", b"message");
        assert_ne!(tag1, tag2);
        assert_eq!(tag1, hmac_sha256(b"key one", b"message"));
    }

    #[test]
    fn sha256_known_digest() {
        let digest = sha256(b"abc");
        let expected =
            hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                .unwrap();
        assert_eq!(digest.as_slice(), expected.as_slice());
    }

    #[test]
    fn aes_roundtrip_and_tamper() {
        let key = [0x11u8; 32];
        let nonce = [0x22u8; AES_NONCE_LEN];
        let ciphertext = aes_encrypt(&key, &nonce, b"hello").unwrap();
        assert_eq!(aes_decrypt(&key, &nonce, &ciphertext).unwrap(), b"hello");

        let mut tampered = ciphertext;
        tampered[0] ^= 0x01;
        assert!(aes_decrypt(&key, &nonce, &tampered).is_err());
    }

    #[test]
    fn constant_time_eq_handles_lengths() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"different"));
        assert!(!constant_time_eq(b"same", b"sama"));
    }
}
