//! In-memory implementations of the storage contracts.
//!
//! Suitable for tests and development. Data is lost on process exit; for
//! production, implement the traits over a platform keystore.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::CryptoError;
use crate::store::{IdentityKeyStore, PreKeyStore, SessionStore};

/// In-memory identity store with TOFU remote-identity tracking.
pub struct MemoryIdentityStore {
    identity_secret: [u8; 32],
    registration_id: u32,
    trusted: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryIdentityStore {
    pub fn new(identity_secret: [u8; 32], registration_id: u32) -> Self {
        Self { identity_secret, registration_id, trusted: Mutex::new(HashMap::new()) }
    }
}

impl IdentityKeyStore for MemoryIdentityStore {
    fn get_identity_secret(&self) -> Result<[u8; 32], CryptoError> {
        Ok(self.identity_secret)
    }

    fn get_local_registration_id(&self) -> Result<u32, CryptoError> {
        Ok(self.registration_id)
    }

    fn is_trusted_identity(&self, address: &str, identity_key: &[u8]) -> Result<bool, CryptoError> {
        match self.trusted.lock().get(address) {
            Some(stored) => Ok(stored == identity_key),
            None => Ok(true), // TOFU: trust on first use
        }
    }

    fn save_identity(&self, address: &str, identity_key: &[u8]) -> Result<(), CryptoError> {
        self.trusted.lock().insert(address.to_string(), identity_key.to_vec());
        Ok(())
    }
}

/// In-memory pre-key store.
#[derive(Default)]
pub struct MemoryPreKeyStore {
    pre_keys: Mutex<HashMap<u32, Vec<u8>>>,
    signed_pre_keys: Mutex<HashMap<u32, Vec<u8>>>,
}

impl MemoryPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreKeyStore for MemoryPreKeyStore {
    fn store_pre_key(&self, pre_key_id: u32, record: &[u8]) -> Result<(), CryptoError> {
        self.pre_keys.lock().insert(pre_key_id, record.to_vec());
        Ok(())
    }

    fn load_pre_key(&self, pre_key_id: u32) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self.pre_keys.lock().get(&pre_key_id).cloned())
    }

    fn take_pre_key(&self, pre_key_id: u32) -> Result<Option<Vec<u8>>, CryptoError> {
        // Single map operation under the lock: check-and-delete is atomic.
        Ok(self.pre_keys.lock().remove(&pre_key_id))
    }

    fn store_signed_pre_key(
        &self,
        signed_pre_key_id: u32,
        record: &[u8],
    ) -> Result<(), CryptoError> {
        self.signed_pre_keys.lock().insert(signed_pre_key_id, record.to_vec());
        Ok(())
    }

    fn load_signed_pre_key(
        &self,
        signed_pre_key_id: u32,
    ) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self.signed_pre_keys.lock().get(&signed_pre_key_id).cloned())
    }
}

/// In-memory session store keyed by peer address.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load_session(&self, address: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self.sessions.lock().get(address).cloned())
    }

    fn store_session(&self, address: &str, record: &[u8]) -> Result<(), CryptoError> {
        self.sessions.lock().insert(address.to_string(), record.to_vec());
        Ok(())
    }

    fn has_session(&self, address: &str) -> Result<bool, CryptoError> {
        Ok(self.sessions.lock().contains_key(address))
    }

    fn delete_session(&self, address: &str) -> Result<(), CryptoError> {
        self.sessions.lock().remove(address);
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<String>, CryptoError> {
        Ok(self.sessions.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_pre_key_consumes_exactly_once() {
        let store = MemoryPreKeyStore::new();
        store.store_pre_key(9, b"record").unwrap();

        assert_eq!(store.take_pre_key(9).unwrap().as_deref(), Some(b"record".as_slice()));
        assert_eq!(store.take_pre_key(9).unwrap(), None);
        assert_eq!(store.load_pre_key(9).unwrap(), None);
    }

    #[test]
    fn signed_pre_key_generations_coexist() {
        let store = MemoryPreKeyStore::new();
        store.store_signed_pre_key(1, b"old").unwrap();
        store.store_signed_pre_key(2, b"new").unwrap();

        assert_eq!(store.load_signed_pre_key(1).unwrap().as_deref(), Some(b"old".as_slice()));
        assert_eq!(store.load_signed_pre_key(2).unwrap().as_deref(), Some(b"new".as_slice()));
    }

    #[test]
    fn identity_store_is_tofu() {
        let store = MemoryIdentityStore::new([1u8; 32], 1);

        // Unknown peer: trusted, then pinned.
        assert!(store.is_trusted_identity("peer", b"key-a").unwrap());
        store.save_identity("peer", b"key-a").unwrap();
        assert!(store.is_trusted_identity("peer", b"key-a").unwrap());
        assert!(!store.is_trusted_identity("peer", b"key-b").unwrap());
    }

    #[test]
    fn session_store_lifecycle() {
        let store = MemorySessionStore::new();
        assert!(!store.has_session("peer").unwrap());

        store.store_session("peer", b"state").unwrap();
        assert!(store.has_session("peer").unwrap());
        assert_eq!(store.list_sessions().unwrap(), vec!["peer".to_string()]);

        store.delete_session("peer").unwrap();
        assert_eq!(store.load_session("peer").unwrap(), None);
    }
}
