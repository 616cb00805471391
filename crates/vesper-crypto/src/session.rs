//! Session management: the surface the rest of the application calls.
//!
//! Owns the storage backends and drives X3DH + the ratchet per peer. Every
//! encrypt/decrypt is a read-ratchet-write sequence on the stored session,
//! serialized by a per-peer lock — two ratchet steps racing on one session
//! would either lose a step or reuse a message key, and key reuse under
//! AES-GCM leaks plaintext. Sessions for distinct peers proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::envelope::{self, CipherMessage, EncryptedMessage, PreKeyMessage, MESSAGE_VERSION};
use crate::error::CryptoError;
use crate::keys::{self, IdentityKeyPair, PreKey, PreKeyBundle, SignedPreKey};
use crate::ratchet::{PendingPreKey, SessionState};
use crate::store::{IdentityKeyStore, PreKeyDirectory, PreKeyStore, SessionStore};
use crate::x3dh;

/// Manages pairwise encrypted sessions over pluggable storage backends.
pub struct SessionManager {
    identity_store: Box<dyn IdentityKeyStore>,
    pre_key_store: Box<dyn PreKeyStore>,
    session_store: Box<dyn SessionStore>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    /// Create a manager over the given storage backends.
    pub fn new(
        identity_store: Box<dyn IdentityKeyStore>,
        pre_key_store: Box<dyn PreKeyStore>,
        session_store: Box<dyn SessionStore>,
    ) -> Self {
        Self {
            identity_store,
            pre_key_store,
            session_store,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure a live session with `address`, fetching the peer's bundle and
    /// running X3DH only if none exists yet.
    pub fn establish_or_reuse_session(
        &self,
        address: &str,
        directory: &dyn PreKeyDirectory,
    ) -> Result<(), CryptoError> {
        let lock = self.session_lock(address);
        let _guard = lock.lock();

        if self.session_store.has_session(address)? {
            return Ok(());
        }

        let bundle = directory.fetch_pre_key_bundle(address)?;
        if !self.identity_store.is_trusted_identity(address, &bundle.identity_key)? {
            return Err(CryptoError::IdentityChanged(address.to_string()));
        }

        let identity = self.local_identity()?;
        let handshake = x3dh::initiate(&identity, &bundle)?;

        let mut session = SessionState::initialize(
            &handshake.shared_secret,
            identity_key_array(&bundle.identity_key)?,
            true,
        )?;
        session.set_pending_pre_key(PendingPreKey {
            signed_pre_key_id: handshake.signed_pre_key_id,
            pre_key_id: handshake.pre_key_id,
            base_key: handshake.ephemeral_public,
        });

        self.session_store.store_session(address, &session.to_bytes())?;
        self.identity_store.save_identity(address, &bundle.identity_key)?;

        tracing::info!(
            peer = %address,
            session = %session.session_id(),
            one_time_pre_key = handshake.pre_key_id.is_some(),
            "session established as initiator"
        );
        Ok(())
    }

    /// Encrypt `plaintext` for `address` on the established session.
    ///
    /// Until the peer's first reply proves the session on their side, every
    /// envelope is a pre-key message repeating the handshake parameters.
    pub fn encrypt_for_peer(
        &self,
        address: &str,
        plaintext: &[u8],
    ) -> Result<EncryptedMessage, CryptoError> {
        let lock = self.session_lock(address);
        let _guard = lock.lock();

        let record = self
            .session_store
            .load_session(address)?
            .ok_or_else(|| CryptoError::Session(format!("no session for peer {address}")))?;
        let mut session = SessionState::from_bytes(&record)?;

        let message = session.encrypt(plaintext)?;
        let ciphertext = envelope::pack_body(message.counter, &message.body);
        let registration_id = self.identity_store.get_local_registration_id()?;

        let envelope = match session.pending_pre_key() {
            Some(pending) => EncryptedMessage::PreKey(PreKeyMessage {
                registration_id,
                message_version: MESSAGE_VERSION,
                identity_key: self.local_identity()?.public_key_bytes().to_vec(),
                base_key: pending.base_key.to_vec(),
                signed_pre_key_id: pending.signed_pre_key_id,
                pre_key_id: pending.pre_key_id,
                ciphertext,
            }),
            None => EncryptedMessage::Message(CipherMessage {
                registration_id,
                message_version: MESSAGE_VERSION,
                ciphertext,
            }),
        };

        self.session_store.store_session(address, &session.to_bytes())?;
        Ok(envelope)
    }

    /// Decrypt an envelope from `address`.
    ///
    /// A pre-key envelope with no local session runs the responder side of
    /// X3DH first; anything else ratchets the existing receiving chain. On
    /// any failure the stored session is left exactly as it was.
    pub fn decrypt_from_peer(
        &self,
        address: &str,
        message: &EncryptedMessage,
    ) -> Result<Vec<u8>, CryptoError> {
        if message.message_version() != MESSAGE_VERSION {
            return Err(CryptoError::DecryptionFailed(format!(
                "unsupported message version {}",
                message.message_version()
            )));
        }

        let lock = self.session_lock(address);
        let _guard = lock.lock();

        match message {
            EncryptedMessage::PreKey(prekey_message) => {
                match self.session_store.load_session(address)? {
                    // Re-delivered pre-key envelope: the session already
                    // exists, decrypt on it rather than re-running X3DH.
                    Some(record) => self.decrypt_on_session(
                        address,
                        record,
                        &prekey_message.ciphertext,
                    ),
                    None => self.respond_and_decrypt(address, prekey_message),
                }
            }
            EncryptedMessage::Message(cipher_message) => {
                let record = self.session_store.load_session(address)?.ok_or_else(|| {
                    CryptoError::Session(format!("no session for peer {address}"))
                })?;
                self.decrypt_on_session(address, record, &cipher_message.ciphertext)
            }
        }
    }

    /// Whether a live session exists for `address`.
    pub fn has_session(&self, address: &str) -> Result<bool, CryptoError> {
        self.session_store.has_session(address)
    }

    /// Peers with live sessions.
    pub fn sessions(&self) -> Result<Vec<String>, CryptoError> {
        self.session_store.list_sessions()
    }

    /// Wipe and delete the session for `address` (peer reset or revoke).
    pub fn delete_session(&self, address: &str) -> Result<(), CryptoError> {
        let lock = self.session_lock(address);
        let _guard = lock.lock();

        if let Some(record) = self.session_store.load_session(address)? {
            if let Ok(mut session) = SessionState::from_bytes(&record) {
                session.cleanup();
            }
            self.session_store.delete_session(address)?;
            tracing::info!(peer = %address, "session deleted");
        }
        Ok(())
    }

    /// Wipe and delete every session. Part of logout.
    pub fn logout(&self) -> Result<(), CryptoError> {
        for address in self.session_store.list_sessions()? {
            self.delete_session(&address)?;
        }
        Ok(())
    }

    /// Generate, store, and return a bundle for publication to the directory.
    ///
    /// Creates a fresh signed pre-key generation and, if `pre_key_id` is
    /// given, one one-time pre-key to advertise alongside it.
    pub fn generate_pre_key_bundle(
        &self,
        signed_pre_key_id: u32,
        pre_key_id: Option<u32>,
    ) -> Result<PreKeyBundle, CryptoError> {
        let identity = self.local_identity()?;
        let registration_id = self.identity_store.get_local_registration_id()?;

        let signed_pre_key = SignedPreKey::generate(&identity, signed_pre_key_id);
        self.pre_key_store.store_signed_pre_key(signed_pre_key_id, &signed_pre_key.to_bytes())?;

        let pre_key = match pre_key_id {
            Some(id) => {
                let pre_key = PreKey::generate(id);
                self.pre_key_store.store_pre_key(id, &pre_key.to_bytes())?;
                Some(pre_key)
            }
            None => None,
        };

        Ok(PreKeyBundle {
            identity_key: identity.public_key_bytes().to_vec(),
            signed_pre_key_id,
            signed_pre_key: signed_pre_key.public().as_bytes().to_vec(),
            signed_pre_key_signature: signed_pre_key.signature().to_vec(),
            pre_key_id,
            pre_key: pre_key.map(|k| k.public().as_bytes().to_vec()),
            registration_id,
        })
    }

    /// Generate and store a batch of one-time pre-keys, returning their ids
    /// so the caller can publish the public halves.
    pub fn replenish_pre_keys(&self, start_id: u32, count: u32) -> Result<Vec<u32>, CryptoError> {
        let batch = keys::generate_pre_keys(start_id, count);
        let mut ids = Vec::with_capacity(batch.len());
        for pre_key in &batch {
            self.pre_key_store.store_pre_key(pre_key.key_id(), &pre_key.to_bytes())?;
            ids.push(pre_key.key_id());
        }
        tracing::debug!(start_id, count, "one-time pre-key pool replenished");
        Ok(ids)
    }

    /// Responder-side X3DH from a pre-key envelope, then first decrypt.
    ///
    /// Nothing is persisted unless the message authenticates: a rejected
    /// envelope must not leave a half-built session behind.
    fn respond_and_decrypt(
        &self,
        address: &str,
        message: &PreKeyMessage,
    ) -> Result<Vec<u8>, CryptoError> {
        if !self.identity_store.is_trusted_identity(address, &message.identity_key)? {
            tracing::warn!(peer = %address, "pre-key message with changed identity key rejected");
            return Err(CryptoError::IdentityChanged(address.to_string()));
        }

        let identity = self.local_identity()?;

        let signed_record = self
            .pre_key_store
            .load_signed_pre_key(message.signed_pre_key_id)?
            .ok_or(CryptoError::UnknownKeyReference {
                kind: "signed pre-key",
                key_id: message.signed_pre_key_id,
            })?;
        let signed_pre_key = SignedPreKey::from_bytes(message.signed_pre_key_id, &signed_record)?;

        // The referenced one-time pre-key must exist; proceeding without DH4
        // is only legitimate when the envelope itself omitted the reference.
        // Peek here, consume at the commit point below — a forged envelope
        // must not burn the key the genuine message still needs.
        let one_time_pre_key = match message.pre_key_id {
            Some(id) => {
                let record = self.pre_key_store.load_pre_key(id)?.ok_or(
                    CryptoError::UnknownKeyReference { kind: "one-time pre-key", key_id: id },
                )?;
                Some(PreKey::from_bytes(id, &record)?)
            }
            None => None,
        };

        let shared_secret = x3dh::respond(
            &identity,
            &signed_pre_key,
            one_time_pre_key.as_ref(),
            &message.identity_key,
            &message.base_key,
        )?;

        let mut session = SessionState::initialize(
            &shared_secret,
            identity_key_array(&message.identity_key)?,
            false,
        )?;

        let (counter, body) = envelope::unpack_body(&message.ciphertext)?;
        let plaintext = session.decrypt(counter, body)?;

        // Commit: atomically consume the one-time pre-key. Losing this race
        // to a concurrent handshake means the key was issued twice — drop
        // this session rather than keep a double-used key alive.
        if let Some(id) = message.pre_key_id {
            if self.pre_key_store.take_pre_key(id)?.is_none() {
                return Err(CryptoError::UnknownKeyReference {
                    kind: "one-time pre-key",
                    key_id: id,
                });
            }
            tracing::debug!(peer = %address, pre_key_id = id, "one-time pre-key consumed");
        }

        self.session_store.store_session(address, &session.to_bytes())?;
        self.identity_store.save_identity(address, &message.identity_key)?;

        tracing::info!(
            peer = %address,
            session = %session.session_id(),
            "session established as responder"
        );
        Ok(plaintext)
    }

    fn decrypt_on_session(
        &self,
        address: &str,
        record: Vec<u8>,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut session = SessionState::from_bytes(&record)?;
        let (counter, body) = envelope::unpack_body(ciphertext)?;
        let plaintext = session.decrypt(counter, body)?;
        self.session_store.store_session(address, &session.to_bytes())?;
        Ok(plaintext)
    }

    fn local_identity(&self) -> Result<IdentityKeyPair, CryptoError> {
        Ok(IdentityKeyPair::from_secret_bytes(&self.identity_store.get_identity_secret()?))
    }

    fn session_lock(&self, address: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.session_locks.lock().entry(address.to_string()).or_default())
    }
}

fn identity_key_array(identity_key: &[u8]) -> Result<[u8; 32], CryptoError> {
    identity_key
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("identity key must be 32 bytes".into()))
}
