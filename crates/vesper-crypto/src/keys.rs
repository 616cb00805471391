//! Key material: device identity, signed pre-keys, one-time pre-keys, and
//! the published pre-key bundle.
//!
//! The identity is a single Ed25519 keypair. Its X25519 halves for
//! Diffie-Hellman are derived from the same scalar (Edwards→Montgomery,
//! RFC 7748), so one 32-byte identity serves both signing and key agreement.

use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Serialized length of a [`SignedPreKey`]: secret (32) + signature (64) +
/// timestamp (8).
const SIGNED_PRE_KEY_LEN: usize = 104;

/// A device's long-lived identity keypair.
///
/// Created once at provisioning; the private half never leaves the device's
/// key store. Destroyed only on full account wipe.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore an identity from its 32-byte secret key.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self { signing_key: SigningKey::from_bytes(bytes) }
    }

    /// Secret key bytes, for handing to the key store only.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// Ed25519 public key bytes (the device's published identity).
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message with the identity private key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// The X25519 secret for Diffie-Hellman, from the Ed25519 scalar.
    pub fn dh_secret(&self) -> StaticSecret {
        StaticSecret::from(self.signing_key.to_scalar_bytes())
    }

    /// The X25519 public key matching [`dh_secret`](Self::dh_secret).
    pub fn dh_public(&self) -> X25519Public {
        X25519Public::from(&self.dh_secret())
    }

    /// Convert a peer's Ed25519 identity public key to its X25519 form.
    ///
    /// Standard Edwards→Montgomery birational map; matches what the peer
    /// computes locally via [`dh_public`](Self::dh_public).
    pub fn peer_dh_public(ed25519_public: &[u8]) -> Result<X25519Public, CryptoError> {
        let bytes: [u8; 32] = ed25519_public
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("identity key must be 32 bytes".into()))?;
        let verifying = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))?;
        Ok(X25519Public::from(verifying.to_montgomery().to_bytes()))
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish()
    }
}

/// A medium-term X25519 pre-key, signed by the identity key.
///
/// Rotated on a fixed cadence. Multiple generations may be live at once so
/// in-flight handshakes against the previous generation still verify; they
/// are therefore always looked up by id, never assumed current.
pub struct SignedPreKey {
    key_id: u32,
    secret: StaticSecret,
    public: X25519Public,
    signature: [u8; 64],
    timestamp: u64,
}

impl SignedPreKey {
    /// Generate a fresh signed pre-key under the given identity.
    pub fn generate(identity: &IdentityKeyPair, key_id: u32) -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        let signature = identity.sign(public.as_bytes());
        Self { key_id, secret, public, signature, timestamp: unix_timestamp() }
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn public(&self) -> &X25519Public {
        &self.public
    }

    pub fn signature(&self) -> &[u8; 64] {
        &self.signature
    }

    /// Creation time, seconds since the Unix epoch. Drives rotation.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Serialize for the pre-key store (the id is the store's lookup key).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SIGNED_PRE_KEY_LEN);
        buf.extend_from_slice(&self.secret.to_bytes());
        buf.extend_from_slice(&self.signature);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    /// Restore from [`to_bytes`](Self::to_bytes) output.
    pub fn from_bytes(key_id: u32, data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() != SIGNED_PRE_KEY_LEN {
            return Err(CryptoError::InvalidKey("signed pre-key record wrong length".into()));
        }
        let secret_bytes: [u8; 32] = data[..32]
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("corrupt signed pre-key secret".into()))?;
        let signature: [u8; 64] = data[32..96]
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("corrupt signed pre-key signature".into()))?;
        let timestamp = u64::from_le_bytes(
            data[96..104]
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("corrupt signed pre-key timestamp".into()))?,
        );
        let secret = StaticSecret::from(secret_bytes);
        let public = X25519Public::from(&secret);
        Ok(Self { key_id, secret, public, signature, timestamp })
    }
}

/// A one-time X25519 pre-key.
///
/// Consumed by at most one handshake; the store deletes it atomically on use.
pub struct PreKey {
    key_id: u32,
    secret: StaticSecret,
    public: X25519Public,
}

impl PreKey {
    /// Generate a single one-time pre-key.
    pub fn generate(key_id: u32) -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self { key_id, secret, public }
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn public(&self) -> &X25519Public {
        &self.public
    }

    /// Serialize the secret half for the pre-key store.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.secret.to_bytes().to_vec()
    }

    /// Restore from [`to_bytes`](Self::to_bytes) output.
    pub fn from_bytes(key_id: u32, data: &[u8]) -> Result<Self, CryptoError> {
        let secret_bytes: [u8; 32] = data
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("pre-key record wrong length".into()))?;
        let secret = StaticSecret::from(secret_bytes);
        let public = X25519Public::from(&secret);
        Ok(Self { key_id, secret, public })
    }
}

/// Generate `count` independent one-time pre-keys with sequential ids.
///
/// The caller persists all of them and publishes only the public halves.
pub fn generate_pre_keys(start_id: u32, count: u32) -> Vec<PreKey> {
    (0..count).map(|i| PreKey::generate(start_id.wrapping_add(i))).collect()
}

/// Verify an identity's signature over a signed pre-key public key.
///
/// Returns `false` — never panics — on malformed input, so callers can treat
/// any failure as a plain rejection.
pub fn verify_signed_pre_key(
    signed_pre_key_public: &[u8],
    signature: &[u8],
    identity_key: &[u8],
) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(identity_key) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    verifying.verify(signed_pre_key_public, &signature).is_ok()
}

/// Random registration id in the Signal range `1..=0x3FFF`.
pub fn generate_registration_id() -> u32 {
    OsRng.gen_range(1..=0x3FFF)
}

/// The published subset of a peer's keys, fetched per handshake.
///
/// Transient: not persisted beyond the handshake that consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyBundle {
    /// Ed25519 identity public key.
    pub identity_key: Vec<u8>,
    /// Id of the signed pre-key below.
    pub signed_pre_key_id: u32,
    /// X25519 signed pre-key (public).
    pub signed_pre_key: Vec<u8>,
    /// Identity-key signature over `signed_pre_key`.
    pub signed_pre_key_signature: Vec<u8>,
    /// Id of the one-time pre-key, if the directory had one left.
    pub pre_key_id: Option<u32>,
    /// One-time pre-key (public), consumed on first use.
    pub pre_key: Option<Vec<u8>>,
    /// Registration id of the publishing device.
    pub registration_id: u32,
}

impl PreKeyBundle {
    /// Check the signed pre-key signature against the bundle's identity key.
    pub fn verify(&self) -> bool {
        verify_signed_pre_key(
            &self.signed_pre_key,
            &self.signed_pre_key_signature,
            &self.identity_key,
        )
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}
