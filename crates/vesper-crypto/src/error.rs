use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("pre-key bundle verification failed")]
    BundleVerificationFailed,

    #[error("unknown {kind} id {key_id}")]
    UnknownKeyReference { kind: &'static str, key_id: u32 },

    #[error("remote identity key changed for {0}")]
    IdentityChanged(String),

    #[error("no sending chain established")]
    NoSendingChain,

    #[error("no receiving chain established")]
    NoReceivingChain,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("key storage error: {0}")]
    Storage(String),
}
