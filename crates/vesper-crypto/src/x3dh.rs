//! X3DH key agreement.
//!
//! Single-round handshake with exactly two roles. The initiator works from a
//! peer's published [`PreKeyBundle`]; the responder mirrors the computation
//! from the signed pre-key and one-time pre-key the initiator's envelope
//! referenced by id. Both derive the same 32-byte shared secret.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, SharedSecret, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::keys::{IdentityKeyPair, PreKey, PreKeyBundle, SignedPreKey};
use crate::primitives;
use crate::secret::Secret;

/// HKDF info label binding derived secrets to this protocol.
const X3DH_INFO: &[u8] = b"VesperX3DH";

/// Initiator-side handshake output.
///
/// The ephemeral public key must travel to the peer as the first envelope's
/// `base_key`; the peer cannot reconstruct the secret without it.
pub struct InitiatorHandshake {
    /// The agreed 32-byte shared secret.
    pub shared_secret: Secret<32>,
    /// Public half of the fresh ephemeral keypair (never reused).
    pub ephemeral_public: [u8; 32],
    /// Id of the signed pre-key the bundle carried.
    pub signed_pre_key_id: u32,
    /// Id of the one-time pre-key that was consumed, if any.
    pub pre_key_id: Option<u32>,
}

/// Run the initiator side of X3DH against a peer's bundle.
///
/// Verifies the bundle signature before any DH work — a bad signature aborts
/// with [`CryptoError::BundleVerificationFailed`], the MITM defense.
pub fn initiate(
    local_identity: &IdentityKeyPair,
    bundle: &PreKeyBundle,
) -> Result<InitiatorHandshake, CryptoError> {
    if !bundle.verify() {
        return Err(CryptoError::BundleVerificationFailed);
    }

    let one_time_pre_key = match (bundle.pre_key_id, bundle.pre_key.as_deref()) {
        (Some(id), Some(public)) => {
            Some((id, x25519_public_from_slice(public, "one-time pre-key")?))
        }
        (None, None) => None,
        _ => {
            return Err(CryptoError::InvalidKey(
                "bundle carries a one-time pre-key id and key inconsistently".into(),
            ));
        }
    };

    let remote_identity_dh = IdentityKeyPair::peer_dh_public(&bundle.identity_key)?;
    let remote_signed_pre_key =
        x25519_public_from_slice(&bundle.signed_pre_key, "signed pre-key")?;

    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = *X25519Public::from(&ephemeral).as_bytes();

    // DH1 = DH(IK_local, SPK_remote)
    // DH2 = DH(EK, IK_remote)
    // DH3 = DH(EK, SPK_remote)
    // DH4 = DH(EK, OPK_remote), iff the bundle carried a one-time pre-key
    let dh1 = local_identity.dh_secret().diffie_hellman(&remote_signed_pre_key);
    let dh2 = ephemeral.diffie_hellman(&remote_identity_dh);
    let dh3 = ephemeral.diffie_hellman(&remote_signed_pre_key);
    let dh4 = one_time_pre_key.as_ref().map(|(_, public)| ephemeral.diffie_hellman(public));

    let shared_secret = derive_shared_secret(&dh1, &dh2, &dh3, dh4.as_ref())?;

    Ok(InitiatorHandshake {
        shared_secret,
        ephemeral_public,
        signed_pre_key_id: bundle.signed_pre_key_id,
        pre_key_id: one_time_pre_key.map(|(id, _)| id),
    })
}

/// Run the responder side of X3DH.
///
/// The caller resolves `signed_pre_key` and `one_time_pre_key` by the ids the
/// initiator's envelope referenced — never "the current one", since several
/// signed pre-key generations may be live at once.
pub fn respond(
    local_identity: &IdentityKeyPair,
    signed_pre_key: &SignedPreKey,
    one_time_pre_key: Option<&PreKey>,
    remote_identity_key: &[u8],
    remote_ephemeral_key: &[u8],
) -> Result<Secret<32>, CryptoError> {
    let remote_identity_dh = IdentityKeyPair::peer_dh_public(remote_identity_key)?;
    let remote_ephemeral = x25519_public_from_slice(remote_ephemeral_key, "ephemeral key")?;

    // Mirror of the initiator with local/remote roles swapped.
    let dh1 = signed_pre_key.secret().diffie_hellman(&remote_identity_dh);
    let dh2 = local_identity.dh_secret().diffie_hellman(&remote_ephemeral);
    let dh3 = signed_pre_key.secret().diffie_hellman(&remote_ephemeral);
    let dh4 = one_time_pre_key.map(|pre_key| pre_key.secret().diffie_hellman(&remote_ephemeral));

    derive_shared_secret(&dh1, &dh2, &dh3, dh4.as_ref())
}

/// HKDF over DH1‖DH2‖DH3[‖DH4] with a zero salt and the protocol label.
fn derive_shared_secret(
    dh1: &SharedSecret,
    dh2: &SharedSecret,
    dh3: &SharedSecret,
    dh4: Option<&SharedSecret>,
) -> Result<Secret<32>, CryptoError> {
    let mut ikm = Vec::with_capacity(128);
    ikm.extend_from_slice(dh1.as_bytes());
    ikm.extend_from_slice(dh2.as_bytes());
    ikm.extend_from_slice(dh3.as_bytes());
    if let Some(dh4) = dh4 {
        ikm.extend_from_slice(dh4.as_bytes());
    }

    let mut okm = [0u8; 32];
    let derived = primitives::hkdf_sha256(&ikm, None, X3DH_INFO, &mut okm);
    ikm.zeroize();
    derived?;

    let shared = Secret::from_bytes(okm);
    okm.zeroize();
    Ok(shared)
}

fn x25519_public_from_slice(bytes: &[u8], what: &str) -> Result<X25519Public, CryptoError> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("{what} must be 32 bytes")))?;
    Ok(X25519Public::from(array))
}
