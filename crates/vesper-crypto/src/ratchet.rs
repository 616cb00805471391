//! Double-Ratchet session engine.
//!
//! A session is created from an X3DH shared secret and advances a symmetric
//! chain-key ratchet on every message: each step derives a one-time message
//! key and replaces the chain key with `HMAC(chain_key, 0x02)`. The step is
//! one-way, so compromise of the current chain key exposes no prior message —
//! the forward-secrecy property the whole design rests on.
//!
//! Keys for messages that were ratcheted past but not yet seen are parked in
//! a bounded cache so in-window out-of-order delivery still decrypts.

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::primitives;
use crate::secret::Secret;

/// HMAC seed byte deriving a message key from a chain key.
const MESSAGE_KEY_SEED: &[u8] = &[0x01];
/// HMAC seed byte deriving the next chain key.
const CHAIN_KEY_SEED: &[u8] = &[0x02];

/// HKDF labels for the two session chains derived from the shared secret.
const ROOT_KEY_INFO: &[u8] = b"RootKey";
const CHAIN_KEY_INFO: &[u8] = b"ChainKey";
const REPLY_CHAIN_KEY_INFO: &[u8] = b"ReplyChainKey";
/// HKDF label for the 80-byte per-message key expansion.
const MESSAGE_KEYS_INFO: &[u8] = b"VesperMessageKeys";

/// Trailing MAC length on every ratchet message body.
const MAC_LEN: usize = 32;

/// Largest forward jump a single incoming counter may demand.
const MAX_SKIP: u32 = 1000;
/// Cap on parked skipped-message keys; oldest are evicted beyond this.
const MAX_SKIPPED_KEYS: usize = 128;

/// Per-message key material from the 80-byte HKDF expansion (32+32+16).
///
/// Derived transiently, used once, zeroed on drop. Never persisted... except
/// for skipped-message entries, which outlive the envelope that was never
/// delivered in order.
#[derive(ZeroizeOnDrop)]
pub struct MessageKeys {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
}

impl MessageKeys {
    fn derive(message_key: &Secret<32>) -> Result<Self, CryptoError> {
        let mut okm = [0u8; 80];
        let expanded =
            primitives::hkdf_sha256(message_key.as_bytes(), None, MESSAGE_KEYS_INFO, &mut okm);
        if let Err(e) = expanded {
            okm.zeroize();
            return Err(e);
        }

        let mut keys = Self { cipher_key: [0u8; 32], mac_key: [0u8; 32], iv: [0u8; 16] };
        keys.cipher_key.copy_from_slice(&okm[..32]);
        keys.mac_key.copy_from_slice(&okm[32..64]);
        keys.iv.copy_from_slice(&okm[64..80]);
        okm.zeroize();
        Ok(keys)
    }

    /// AES-GCM nonce: the leading 12 bytes of the derived IV.
    fn nonce(&self) -> [u8; primitives::AES_NONCE_LEN] {
        let mut nonce = [0u8; primitives::AES_NONCE_LEN];
        nonce.copy_from_slice(&self.iv[..primitives::AES_NONCE_LEN]);
        nonce
    }
}

/// A message key parked for an out-of-order message.
#[derive(ZeroizeOnDrop)]
struct SkippedKey {
    #[zeroize(skip)]
    counter: u32,
    keys: MessageKeys,
}

/// Handshake parameters the initiator repeats on every envelope until the
/// peer's first reply proves the session exists on both ends.
#[derive(Debug, Clone)]
pub struct PendingPreKey {
    /// Id of the signed pre-key the handshake consumed.
    pub signed_pre_key_id: u32,
    /// Id of the one-time pre-key the handshake consumed, if any.
    pub pre_key_id: Option<u32>,
    /// The X3DH ephemeral public key (`base_key` on the wire).
    pub base_key: [u8; 32],
}

/// Output of a ratchet encryption step.
pub struct RatchetMessage {
    /// Position of this message on the sending chain.
    pub counter: u32,
    /// Ciphertext with the 32-byte body MAC appended.
    pub body: Vec<u8>,
}

/// Ratchet state for one (local device, remote peer) pair.
///
/// Exactly one live session per peer. Mutated on every encrypt/decrypt;
/// destroyed by deleting the store record after [`cleanup`](Self::cleanup).
pub struct SessionState {
    session_id: [u8; 16],
    remote_identity_key: [u8; 32],
    root_key: Secret<32>,
    sending_chain_key: Option<Secret<32>>,
    receiving_chain_key: Option<Secret<32>>,
    send_counter: u32,
    recv_counter: u32,
    previous_counter: u32,
    pending_pre_key: Option<PendingPreKey>,
    skipped_keys: Vec<SkippedKey>,
}

impl SessionState {
    /// Initialize a fresh session from an X3DH shared secret.
    ///
    /// Both parties derive the same two chains from the secret; which chain
    /// is for sending depends on the role, so the initiator's sending chain
    /// is the responder's receiving chain and vice versa.
    pub fn initialize(
        shared_secret: &Secret<32>,
        remote_identity_key: [u8; 32],
        is_initiator: bool,
    ) -> Result<Self, CryptoError> {
        let root_key = derive_chain(shared_secret, ROOT_KEY_INFO)?;
        let forward_chain = derive_chain(shared_secret, CHAIN_KEY_INFO)?;
        let reply_chain = derive_chain(shared_secret, REPLY_CHAIN_KEY_INFO)?;

        let (sending, receiving) = if is_initiator {
            (forward_chain, reply_chain)
        } else {
            (reply_chain, forward_chain)
        };

        // Random id for logging and debugging only, never key material.
        let mut session_id = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut session_id);

        Ok(Self {
            session_id,
            remote_identity_key,
            root_key,
            sending_chain_key: Some(sending),
            receiving_chain_key: Some(receiving),
            send_counter: 0,
            recv_counter: 0,
            previous_counter: 0,
            pending_pre_key: None,
            skipped_keys: Vec::new(),
        })
    }

    /// Hex session id, for log correlation.
    pub fn session_id(&self) -> String {
        hex::encode(self.session_id)
    }

    /// The peer's Ed25519 identity public key this session was built against.
    pub fn remote_identity_key(&self) -> &[u8; 32] {
        &self.remote_identity_key
    }

    /// Number of messages sent on this session.
    pub fn send_counter(&self) -> u32 {
        self.send_counter
    }

    /// Receiving-chain counter recorded before the last decrypt advanced it.
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    /// Handshake parameters still owed to the peer, if unacknowledged.
    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    /// Record handshake parameters to repeat until the peer replies.
    pub fn set_pending_pre_key(&mut self, pending: PendingPreKey) {
        self.pending_pre_key = Some(pending);
    }

    /// Encrypt a message, advancing the sending chain by one step.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<RatchetMessage, CryptoError> {
        let chain = self.sending_chain_key.as_ref().ok_or(CryptoError::NoSendingChain)?;

        let (next_chain, message_key) = ratchet_chain(chain);
        let keys = MessageKeys::derive(&message_key)?;

        let counter = self.send_counter;
        let ciphertext = primitives::aes_encrypt(&keys.cipher_key, &keys.nonce(), plaintext)?;
        let mac = body_mac(&keys.mac_key, counter, &ciphertext);

        let mut body = ciphertext;
        body.extend_from_slice(&mac);

        // Commit: the consumed chain key drops (and zeroes) here.
        self.sending_chain_key = Some(next_chain);
        self.send_counter += 1;

        Ok(RatchetMessage { counter, body })
    }

    /// Decrypt a message at `counter` on the receiving chain.
    ///
    /// A MAC or cipher failure leaves the session untouched — advancing the
    /// chain on a forged message would desynchronize the sender's next real
    /// one. Messages behind the current counter decrypt from the skipped-key
    /// cache; messages ahead ratchet forward, parking the keys in between.
    pub fn decrypt(&mut self, counter: u32, body: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if body.len() < MAC_LEN {
            return Err(CryptoError::DecryptionFailed("message too short".into()));
        }
        let (ciphertext, mac) = body.split_at(body.len() - MAC_LEN);

        if counter < self.recv_counter {
            return self.decrypt_skipped(counter, ciphertext, mac);
        }

        let chain = self.receiving_chain_key.as_ref().ok_or(CryptoError::NoReceivingChain)?;

        let jump = counter - self.recv_counter;
        if jump > MAX_SKIP {
            return Err(CryptoError::DecryptionFailed(format!(
                "counter {counter} too far ahead of chain position {}",
                self.recv_counter
            )));
        }

        // Ratchet forward on working copies; nothing is committed until the
        // message authenticates.
        let mut work_chain = chain.clone();
        let mut parked = Vec::new();
        for skipped_counter in self.recv_counter..counter {
            let (next, message_key) = ratchet_chain(&work_chain);
            parked.push(SkippedKey {
                counter: skipped_counter,
                keys: MessageKeys::derive(&message_key)?,
            });
            work_chain = next;
        }
        let (next_chain, message_key) = ratchet_chain(&work_chain);
        let keys = MessageKeys::derive(&message_key)?;

        verify_body_mac(&keys, counter, ciphertext, mac)?;
        let plaintext = primitives::aes_decrypt(&keys.cipher_key, &keys.nonce(), ciphertext)?;

        // Commit only now that the message is authentic.
        self.previous_counter = self.recv_counter;
        self.recv_counter = counter + 1;
        self.receiving_chain_key = Some(next_chain);
        self.skipped_keys.extend(parked);
        if self.skipped_keys.len() > MAX_SKIPPED_KEYS {
            // Evicted entries drop and zero their key material.
            self.skipped_keys.drain(..self.skipped_keys.len() - MAX_SKIPPED_KEYS);
        }

        // Any authentic inbound message proves the peer holds the session.
        self.pending_pre_key = None;

        Ok(plaintext)
    }

    fn decrypt_skipped(
        &mut self,
        counter: u32,
        ciphertext: &[u8],
        mac: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let index = self
            .skipped_keys
            .iter()
            .position(|entry| entry.counter == counter)
            .ok_or_else(|| {
                CryptoError::DecryptionFailed(format!("no stored key for counter {counter}"))
            })?;

        // Verify before consuming the entry: a forgery at this counter must
        // not destroy the key the genuine message still needs.
        let keys = &self.skipped_keys[index].keys;
        verify_body_mac(keys, counter, ciphertext, mac)?;
        let plaintext = primitives::aes_decrypt(&keys.cipher_key, &keys.nonce(), ciphertext)?;

        self.skipped_keys.remove(index);
        self.pending_pre_key = None;
        Ok(plaintext)
    }

    /// Overwrite all key material in place.
    ///
    /// Invoked on logout and explicit session reset, before the store record
    /// is deleted. Drop zeroes these buffers too, but callers must not rely
    /// on drop timing for material this sensitive.
    pub fn cleanup(&mut self) {
        self.root_key.wipe();
        if let Some(chain) = self.sending_chain_key.as_mut() {
            chain.wipe();
        }
        if let Some(chain) = self.receiving_chain_key.as_mut() {
            chain.wipe();
        }
        self.sending_chain_key = None;
        self.receiving_chain_key = None;
        self.remote_identity_key.zeroize();
        self.skipped_keys.clear();
        self.pending_pre_key = None;
    }

    /// Serialize for the session store.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(200 + self.skipped_keys.len() * 84);
        buf.extend_from_slice(&self.session_id);
        buf.extend_from_slice(&self.remote_identity_key);
        buf.extend_from_slice(self.root_key.as_bytes());

        let mut flags = 0u8;
        if self.sending_chain_key.is_some() {
            flags |= 1;
        }
        if self.receiving_chain_key.is_some() {
            flags |= 2;
        }
        if self.pending_pre_key.is_some() {
            flags |= 4;
        }
        buf.push(flags);

        if let Some(chain) = &self.sending_chain_key {
            buf.extend_from_slice(chain.as_bytes());
        }
        if let Some(chain) = &self.receiving_chain_key {
            buf.extend_from_slice(chain.as_bytes());
        }

        buf.extend_from_slice(&self.send_counter.to_le_bytes());
        buf.extend_from_slice(&self.recv_counter.to_le_bytes());
        buf.extend_from_slice(&self.previous_counter.to_le_bytes());

        if let Some(pending) = &self.pending_pre_key {
            buf.extend_from_slice(&pending.signed_pre_key_id.to_le_bytes());
            match pending.pre_key_id {
                Some(id) => {
                    buf.push(1);
                    buf.extend_from_slice(&id.to_le_bytes());
                }
                None => buf.push(0),
            }
            buf.extend_from_slice(&pending.base_key);
        }

        let skipped_len =
            u16::try_from(self.skipped_keys.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&skipped_len.to_le_bytes());
        for entry in &self.skipped_keys {
            buf.extend_from_slice(&entry.counter.to_le_bytes());
            buf.extend_from_slice(&entry.keys.cipher_key);
            buf.extend_from_slice(&entry.keys.mac_key);
            buf.extend_from_slice(&entry.keys.iv);
        }
        buf
    }

    /// Restore from [`to_bytes`](Self::to_bytes) output.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        let mut reader = Reader::new(data);

        let session_id = reader.take_array::<16>()?;
        let remote_identity_key = reader.take_array::<32>()?;
        let root_key = Secret::from_bytes(reader.take_array::<32>()?);
        let flags = reader.take_array::<1>()?[0];

        let sending_chain_key = if flags & 1 == 0 {
            None
        } else {
            Some(Secret::from_bytes(reader.take_array::<32>()?))
        };
        let receiving_chain_key = if flags & 2 == 0 {
            None
        } else {
            Some(Secret::from_bytes(reader.take_array::<32>()?))
        };

        let send_counter = reader.take_u32()?;
        let recv_counter = reader.take_u32()?;
        let previous_counter = reader.take_u32()?;

        let pending_pre_key = if flags & 4 == 0 {
            None
        } else {
            let signed_pre_key_id = reader.take_u32()?;
            let pre_key_id = if reader.take_array::<1>()?[0] == 0 {
                None
            } else {
                Some(reader.take_u32()?)
            };
            let base_key = reader.take_array::<32>()?;
            Some(PendingPreKey { signed_pre_key_id, pre_key_id, base_key })
        };

        let skipped_len = usize::from(u16::from_le_bytes(reader.take_array::<2>()?));
        let mut skipped_keys = Vec::with_capacity(skipped_len.min(MAX_SKIPPED_KEYS));
        for _ in 0..skipped_len {
            let counter = reader.take_u32()?;
            let keys = MessageKeys {
                cipher_key: reader.take_array::<32>()?,
                mac_key: reader.take_array::<32>()?,
                iv: reader.take_array::<16>()?,
            };
            skipped_keys.push(SkippedKey { counter, keys });
        }

        Ok(Self {
            session_id,
            remote_identity_key,
            root_key,
            sending_chain_key,
            receiving_chain_key,
            send_counter,
            recv_counter,
            previous_counter,
            pending_pre_key,
            skipped_keys,
        })
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("session_id", &self.session_id())
            .field("send_counter", &self.send_counter)
            .field("recv_counter", &self.recv_counter)
            .finish_non_exhaustive()
    }
}

/// One symmetric ratchet step: next chain key and this step's message key.
fn ratchet_chain(chain_key: &Secret<32>) -> (Secret<32>, Secret<32>) {
    let next = primitives::hmac_sha256(chain_key.as_bytes(), CHAIN_KEY_SEED);
    let message = primitives::hmac_sha256(chain_key.as_bytes(), MESSAGE_KEY_SEED);
    (Secret::from_bytes(next), Secret::from_bytes(message))
}

fn derive_chain(shared_secret: &Secret<32>, info: &[u8]) -> Result<Secret<32>, CryptoError> {
    let mut okm = [0u8; 32];
    primitives::hkdf_sha256(shared_secret.as_bytes(), None, info, &mut okm)?;
    let chain = Secret::from_bytes(okm);
    okm.zeroize();
    Ok(chain)
}

/// MAC over the message counter and ciphertext, binding them together.
fn body_mac(mac_key: &[u8; 32], counter: u32, ciphertext: &[u8]) -> [u8; 32] {
    let mut message = Vec::with_capacity(4 + ciphertext.len());
    message.extend_from_slice(&counter.to_be_bytes());
    message.extend_from_slice(ciphertext);
    primitives::hmac_sha256(mac_key, &message)
}

fn verify_body_mac(
    keys: &MessageKeys,
    counter: u32,
    ciphertext: &[u8],
    mac: &[u8],
) -> Result<(), CryptoError> {
    let expected = body_mac(&keys.mac_key, counter, ciphertext);
    if primitives::constant_time_eq(&expected, mac) {
        Ok(())
    } else {
        Err(CryptoError::DecryptionFailed("MAC mismatch".into()))
    }
}

/// Internal bounds-checked reader for [`SessionState::from_bytes`].
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CryptoError> {
        if self.data.len() < n {
            return Err(CryptoError::Session("truncated session record".into()));
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CryptoError> {
        let slice = self.take(N)?;
        slice
            .try_into()
            .map_err(|_| CryptoError::Session("truncated session record".into()))
    }

    fn take_u32(&mut self) -> Result<u32, CryptoError> {
        Ok(u32::from_le_bytes(self.take_array::<4>()?))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn session_pair() -> (SessionState, SessionState) {
        let secret = Secret::from_bytes(rand::random());
        let remote = [0x55u8; 32];
        let initiator = SessionState::initialize(&secret, remote, true).unwrap();
        let responder = SessionState::initialize(&secret, remote, false).unwrap();
        (initiator, responder)
    }

    #[test]
    fn round_trip_both_directions() {
        let (mut alice, mut bob) = session_pair();

        let msg = alice.encrypt(b"hello bob").unwrap();
        assert_eq!(bob.decrypt(msg.counter, &msg.body).unwrap(), b"hello bob");

        let reply = bob.encrypt(b"hello alice").unwrap();
        assert_eq!(alice.decrypt(reply.counter, &reply.body).unwrap(), b"hello alice");
    }

    #[test]
    fn zero_secret_known_scenario() {
        let secret = Secret::from_bytes([0u8; 32]);
        let mut session = SessionState::initialize(&secret, [0u8; 32], true).unwrap();

        let plaintext = b"Hello, secure world!";
        let msg = session.encrypt(plaintext).unwrap();

        assert_eq!(session.send_counter(), 1);
        assert!(!msg.body.is_empty());
        assert_ne!(&msg.body[..plaintext.len().min(msg.body.len())], plaintext.as_slice());
    }

    #[test]
    fn repeated_encryption_never_reuses_keys() {
        let (mut alice, _) = session_pair();
        let original_chain = alice.sending_chain_key.clone().unwrap();

        let first = alice.encrypt(b"same plaintext").unwrap();
        let after_first = alice.sending_chain_key.clone().unwrap();
        let second = alice.encrypt(b"same plaintext").unwrap();
        let after_second = alice.sending_chain_key.clone().unwrap();

        assert_ne!(first.body, second.body);
        assert_ne!(original_chain, after_first);
        assert_ne!(original_chain, after_second);
        assert_ne!(after_first, after_second);
    }

    #[test]
    fn out_of_order_within_window() {
        let (mut alice, mut bob) = session_pair();

        let m0 = alice.encrypt(b"zero").unwrap();
        let m1 = alice.encrypt(b"one").unwrap();
        let m2 = alice.encrypt(b"two").unwrap();

        assert_eq!(bob.decrypt(m2.counter, &m2.body).unwrap(), b"two");
        assert_eq!(bob.previous_counter(), 0);
        assert_eq!(bob.decrypt(m0.counter, &m0.body).unwrap(), b"zero");
        assert_eq!(bob.decrypt(m1.counter, &m1.body).unwrap(), b"one");
    }

    #[test]
    fn replayed_message_is_rejected() {
        let (mut alice, mut bob) = session_pair();

        let m0 = alice.encrypt(b"once only").unwrap();
        let m1 = alice.encrypt(b"skip ahead").unwrap();
        assert!(bob.decrypt(m1.counter, &m1.body).is_ok());
        assert!(bob.decrypt(m0.counter, &m0.body).is_ok());

        // The skipped key was consumed; the replay finds nothing.
        assert!(matches!(
            bob.decrypt(m0.counter, &m0.body),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn tampering_rejected_without_advancing_chain() {
        let (mut alice, mut bob) = session_pair();

        let msg = alice.encrypt(b"authentic").unwrap();
        let mut tampered = msg.body.clone();
        tampered[0] ^= 0xFF;

        assert!(matches!(
            bob.decrypt(msg.counter, &tampered),
            Err(CryptoError::DecryptionFailed(_))
        ));

        // The failed attempt must not have consumed the chain position.
        assert_eq!(bob.decrypt(msg.counter, &msg.body).unwrap(), b"authentic");
    }

    #[test]
    fn forged_skipped_message_does_not_destroy_parked_key() {
        let (mut alice, mut bob) = session_pair();

        let m0 = alice.encrypt(b"late arrival").unwrap();
        let m1 = alice.encrypt(b"first arrival").unwrap();
        assert!(bob.decrypt(m1.counter, &m1.body).is_ok());

        let mut forged = m0.body.clone();
        forged[0] ^= 0x01;
        assert!(bob.decrypt(m0.counter, &forged).is_err());

        // The genuine late message still decrypts.
        assert_eq!(bob.decrypt(m0.counter, &m0.body).unwrap(), b"late arrival");
    }

    #[test]
    fn counter_too_far_ahead_rejected() {
        let (_, mut bob) = session_pair();
        let result = bob.decrypt(MAX_SKIP + 1, &[0u8; 64]);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn skipped_key_cache_is_bounded() {
        let (mut alice, mut bob) = session_pair();

        let early = alice.encrypt(b"evicted").unwrap();
        for _ in 0..MAX_SKIPPED_KEYS + 1 {
            alice.encrypt(b"filler").unwrap();
        }
        let latest = alice.encrypt(b"latest").unwrap();

        assert_eq!(bob.decrypt(latest.counter, &latest.body).unwrap(), b"latest");

        // The oldest parked key fell off the bounded cache.
        assert!(bob.decrypt(early.counter, &early.body).is_err());
        // A younger one is still within the window.
        let survivor = early.counter + 2;
        assert!(bob.skipped_keys.iter().any(|entry| entry.counter == survivor));
    }

    #[test]
    fn cleanup_wipes_key_material() {
        let (mut alice, _) = session_pair();
        alice.encrypt(b"warm up the chain").unwrap();

        alice.cleanup();

        assert!(alice.root_key.is_wiped());
        assert!(alice.sending_chain_key.is_none());
        assert!(alice.receiving_chain_key.is_none());
        assert_eq!(alice.remote_identity_key, [0u8; 32]);
        assert!(matches!(alice.encrypt(b"x"), Err(CryptoError::NoSendingChain)));
        assert!(matches!(alice.decrypt(0, &[0u8; 64]), Err(CryptoError::NoReceivingChain)));
    }

    #[test]
    fn store_roundtrip_preserves_ratchet_position() {
        let (mut alice, mut bob) = session_pair();
        alice.set_pending_pre_key(PendingPreKey {
            signed_pre_key_id: 7,
            pre_key_id: Some(42),
            base_key: [0xABu8; 32],
        });

        let m0 = alice.encrypt(b"before the save").unwrap();
        let m1 = alice.encrypt(b"after the save").unwrap();

        // Park a key on Bob's side so the cache serializes too.
        assert_eq!(bob.decrypt(m1.counter, &m1.body).unwrap(), b"after the save");

        let restored_alice = SessionState::from_bytes(&alice.to_bytes()).unwrap();
        let mut restored_bob = SessionState::from_bytes(&bob.to_bytes()).unwrap();

        assert_eq!(restored_alice.session_id(), alice.session_id());
        assert_eq!(restored_alice.send_counter(), 2);
        let pending = restored_alice.pending_pre_key().unwrap();
        assert_eq!(pending.signed_pre_key_id, 7);
        assert_eq!(pending.pre_key_id, Some(42));
        assert_eq!(pending.base_key, [0xABu8; 32]);

        assert_eq!(restored_bob.decrypt(m0.counter, &m0.body).unwrap(), b"before the save");
    }

    #[test]
    fn truncated_session_record_rejected() {
        let (alice, _) = session_pair();
        let bytes = alice.to_bytes();
        assert!(SessionState::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(SessionState::from_bytes(&[]).is_err());
    }

    proptest! {
        #[test]
        fn arbitrary_plaintext_round_trips(plaintext in proptest::collection::vec(any::<u8>(), 0..256)) {
            let (mut alice, mut bob) = session_pair();
            let msg = alice.encrypt(&plaintext).unwrap();
            prop_assert_eq!(bob.decrypt(msg.counter, &msg.body).unwrap(), plaintext);
        }
    }
}
