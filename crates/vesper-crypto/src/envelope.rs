//! Wire envelopes for encrypted messages.
//!
//! Two variants with distinct required fields, so the type system enforces
//! that a pre-key message always carries the handshake material
//! (`base_key`, `identity_key`, `signed_pre_key_id`) an ordinary message
//! never needs. Relays treat either variant as an opaque blob.

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// Protocol version stamped on every envelope.
pub const MESSAGE_VERSION: u8 = 1;

/// The opaque envelope carried between clients by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EncryptedMessage {
    /// First message(s) of a session: ciphertext plus the X3DH handshake
    /// parameters the responder needs to build the same session.
    #[serde(rename = "prekey")]
    PreKey(PreKeyMessage),
    /// A message on an established session.
    #[serde(rename = "message")]
    Message(CipherMessage),
}

impl EncryptedMessage {
    /// Version stamp, for compatibility checks before any parsing.
    pub fn message_version(&self) -> u8 {
        match self {
            Self::PreKey(m) => m.message_version,
            Self::Message(m) => m.message_version,
        }
    }

    /// Registration id of the sending device.
    pub fn registration_id(&self) -> u32 {
        match self {
            Self::PreKey(m) => m.registration_id,
            Self::Message(m) => m.registration_id,
        }
    }
}

/// Envelope variant that bootstraps a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyMessage {
    pub registration_id: u32,
    pub message_version: u8,
    /// Sender's Ed25519 identity public key.
    pub identity_key: Vec<u8>,
    /// Sender's X3DH ephemeral public key.
    pub base_key: Vec<u8>,
    /// Signed pre-key generation the handshake used.
    pub signed_pre_key_id: u32,
    /// One-time pre-key the handshake consumed, if the bundle had one.
    pub pre_key_id: Option<u32>,
    pub ciphertext: Vec<u8>,
}

/// Envelope variant for an established session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherMessage {
    pub registration_id: u32,
    pub message_version: u8,
    pub ciphertext: Vec<u8>,
}

/// Prepend the chain counter to a ratchet body, forming the opaque
/// `ciphertext` field.
pub(crate) fn pack_body(counter: u32, body: &[u8]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(4 + body.len());
    packed.extend_from_slice(&counter.to_be_bytes());
    packed.extend_from_slice(body);
    packed
}

/// Split a `ciphertext` field back into chain counter and ratchet body.
pub(crate) fn unpack_body(ciphertext: &[u8]) -> Result<(u32, &[u8]), CryptoError> {
    if ciphertext.len() < 4 {
        return Err(CryptoError::DecryptionFailed("ciphertext too short".into()));
    }
    let counter = u32::from_be_bytes(
        ciphertext[..4]
            .try_into()
            .map_err(|_| CryptoError::DecryptionFailed("ciphertext too short".into()))?,
    );
    Ok((counter, &ciphertext[4..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prekey_envelope_serde_roundtrip() {
        let envelope = EncryptedMessage::PreKey(PreKeyMessage {
            registration_id: 7,
            message_version: MESSAGE_VERSION,
            identity_key: vec![1u8; 32],
            base_key: vec![2u8; 32],
            signed_pre_key_id: 3,
            pre_key_id: Some(101),
            ciphertext: vec![9, 9, 9],
        });

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""type":"prekey""#));

        let decoded: EncryptedMessage = serde_json::from_str(&json).unwrap();
        let EncryptedMessage::PreKey(m) = decoded else {
            panic!("wrong variant");
        };
        assert_eq!(m.signed_pre_key_id, 3);
        assert_eq!(m.pre_key_id, Some(101));
        assert_eq!(m.base_key, vec![2u8; 32]);
    }

    #[test]
    fn ordinary_envelope_serde_roundtrip() {
        let envelope = EncryptedMessage::Message(CipherMessage {
            registration_id: 7,
            message_version: MESSAGE_VERSION,
            ciphertext: pack_body(5, b"opaque"),
        });

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""type":"message""#));

        let decoded: EncryptedMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.message_version(), MESSAGE_VERSION);
        assert_eq!(decoded.registration_id(), 7);
    }

    #[test]
    fn prekey_envelope_requires_handshake_fields() {
        // No base_key — must fail to parse, not default.
        let json = r#"{"type":"prekey","registration_id":1,"message_version":1,
                       "identity_key":[1],"signed_pre_key_id":2,"ciphertext":[]}"#;
        assert!(serde_json::from_str::<EncryptedMessage>(json).is_err());
    }

    #[test]
    fn body_packing_roundtrip() {
        let packed = pack_body(0xAABB, b"body");
        let (counter, body) = unpack_body(&packed).unwrap();
        assert_eq!(counter, 0xAABB);
        assert_eq!(body, b"body");

        assert!(unpack_body(&[0, 0, 0]).is_err());
    }
}
