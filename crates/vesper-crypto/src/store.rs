//! Storage and directory contracts the engine calls but never implements.
//!
//! Production backends live behind these traits (platform keystore, secure
//! enclave); the crate ships in-memory implementations for tests and
//! development. All payloads are opaque byte records produced by the engine's
//! own serializers, so a backend never needs to understand key material.

use crate::error::CryptoError;
use crate::keys::PreKeyBundle;

/// Storage for the device identity and remote identity trust decisions.
pub trait IdentityKeyStore: Send + Sync {
    /// The device's Ed25519 identity secret (32 bytes).
    fn get_identity_secret(&self) -> Result<[u8; 32], CryptoError>;

    /// The device's registration id.
    fn get_local_registration_id(&self) -> Result<u32, CryptoError>;

    /// Whether `identity_key` matches what we have on record for `address`.
    /// Unknown addresses are trusted (TOFU — trust on first use).
    fn is_trusted_identity(&self, address: &str, identity_key: &[u8]) -> Result<bool, CryptoError>;

    /// Record a remote identity key for `address`.
    fn save_identity(&self, address: &str, identity_key: &[u8]) -> Result<(), CryptoError>;
}

/// Storage for one-time and signed pre-keys, keyed by id.
pub trait PreKeyStore: Send + Sync {
    /// Store a one-time pre-key record.
    fn store_pre_key(&self, pre_key_id: u32, record: &[u8]) -> Result<(), CryptoError>;

    /// Read a one-time pre-key record without consuming it (bundle assembly).
    fn load_pre_key(&self, pre_key_id: u32) -> Result<Option<Vec<u8>>, CryptoError>;

    /// Atomically fetch **and delete** a one-time pre-key record.
    ///
    /// This is the consume-then-delete contract: two concurrent handshakes
    /// referencing the same id must not both succeed, so lookup and removal
    /// are one operation, not two.
    fn take_pre_key(&self, pre_key_id: u32) -> Result<Option<Vec<u8>>, CryptoError>;

    /// Store a signed pre-key record under its generation id.
    fn store_signed_pre_key(
        &self,
        signed_pre_key_id: u32,
        record: &[u8],
    ) -> Result<(), CryptoError>;

    /// Load a signed pre-key record by generation id. Several generations may
    /// be stored at once while in-flight handshakes drain.
    fn load_signed_pre_key(
        &self,
        signed_pre_key_id: u32,
    ) -> Result<Option<Vec<u8>>, CryptoError>;
}

/// Storage for per-peer session state.
///
/// Each peer has at most one live session, keyed by the peer's address
/// (hex-encoded identity public key).
pub trait SessionStore: Send + Sync {
    /// Load session state for a peer.
    fn load_session(&self, address: &str) -> Result<Option<Vec<u8>>, CryptoError>;

    /// Store session state for a peer.
    fn store_session(&self, address: &str, record: &[u8]) -> Result<(), CryptoError>;

    /// Whether a session exists for a peer.
    fn has_session(&self, address: &str) -> Result<bool, CryptoError>;

    /// Delete a session (logout, peer reset, explicit revoke).
    fn delete_session(&self, address: &str) -> Result<(), CryptoError>;

    /// All peers with stored sessions.
    fn list_sessions(&self) -> Result<Vec<String>, CryptoError>;
}

/// The directory service peers publish their pre-key bundles to.
///
/// External collaborator: fetches go over the network and are subject to its
/// timeouts, none of which belong to this crate.
pub trait PreKeyDirectory: Send + Sync {
    /// Fetch a peer's current bundle for a handshake.
    fn fetch_pre_key_bundle(&self, address: &str) -> Result<PreKeyBundle, CryptoError>;
}
