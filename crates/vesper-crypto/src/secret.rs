use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed-size container for secret bytes.
///
/// Zeroes its contents on drop, compares in constant time, and hides its
/// value from debug output. Root keys, chain keys, and derived message key
/// material are only ever held through this type so that every exit path —
/// including error paths — erases them.
#[derive(Clone, Eq, ZeroizeOnDrop)]
pub struct Secret<const N: usize>([u8; N]);

impl<const N: usize> Secret<N> {
    pub fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// Overwrite the contents with zeros in place.
    ///
    /// Drop does this too; callers use this when the value must be dead
    /// before the surrounding structure is discarded.
    pub fn wipe(&mut self) {
        self.0.zeroize();
    }

    /// True once every byte is zero (after [`wipe`](Self::wipe)).
    pub fn is_wiped(&self) -> bool {
        bool::from(self.0.ct_eq(&[0u8; N]))
    }
}

impl<const N: usize> PartialEq for Secret<N> {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl<const N: usize> fmt::Debug for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never reveal secret bytes in logs or debug output.
        f.debug_struct("Secret").field("value", &"***").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_value() {
        let a = Secret::from_bytes([7u8; 32]);
        let b = Secret::from_bytes([7u8; 32]);
        let c = Secret::from_bytes([8u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn wipe_clears_contents() {
        let mut s = Secret::from_bytes([0xAAu8; 32]);
        assert!(!s.is_wiped());
        s.wipe();
        assert!(s.is_wiped());
    }

    #[test]
    fn debug_output_is_redacted() {
        let s = Secret::from_bytes([0x42u8; 16]);
        let printed = format!("{s:?}");
        assert!(!printed.contains("42"));
        assert!(printed.contains("***"));
    }
}
