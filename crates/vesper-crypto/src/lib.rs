//! End-to-end encryption engine for Vesper: X3DH session establishment and
//! Double-Ratchet message encryption over pluggable key storage.

pub mod envelope;
pub mod error;
pub mod keys;
pub mod memory_stores;
pub mod primitives;
pub mod ratchet;
pub mod secret;
pub mod session;
pub mod store;
pub mod x3dh;

pub use envelope::{CipherMessage, EncryptedMessage, PreKeyMessage, MESSAGE_VERSION};
pub use error::CryptoError;
pub use keys::{IdentityKeyPair, PreKey, PreKeyBundle, SignedPreKey};
pub use memory_stores::{MemoryIdentityStore, MemoryPreKeyStore, MemorySessionStore};
pub use ratchet::SessionState;
pub use secret::Secret;
pub use session::SessionManager;
pub use store::{IdentityKeyStore, PreKeyDirectory, PreKeyStore, SessionStore};
