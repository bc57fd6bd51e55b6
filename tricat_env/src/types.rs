//! Common types for the tricat environment abstraction.

use ed25519_dalek::{SignatureError, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Unique identifier for a tricat peer.
///
/// The identifier is the peer's Ed25519 verifying key, so a handshake can
/// prove ownership of an identity without any extra lookup.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Creates a PeerId from raw verifying-key bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Creates the PeerId owned by a signing key.
    pub fn from_signing_key(key: &SigningKey) -> Self {
        Self::from_verifying_key(&key.verifying_key())
    }

    /// Creates a PeerId from a verifying key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Decodes the verifying key behind this identity.
    pub fn verifying_key(&self) -> Result<VerifyingKey, SignatureError> {
        VerifyingKey::from_bytes(&self.0)
    }

    /// Short hex form (first 4 bytes) for log lines.
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 hex chars for readability
        write!(f, "{}", self.short())
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn key(seed: u64) -> SigningKey {
        SigningKey::generate(&mut ChaCha8Rng::seed_from_u64(seed))
    }

    #[test]
    fn test_peer_id_roundtrips_verifying_key() {
        let signing = key(7);
        let id = PeerId::from_signing_key(&signing);

        let decoded = id.verifying_key().unwrap();
        assert_eq!(decoded, signing.verifying_key());
    }

    #[test]
    fn test_peer_id_display_is_short_hex() {
        let id = PeerId::from_bytes([0xab; 32]);
        assert_eq!(id.to_string(), "abababab");
        assert_eq!(format!("{id:?}"), "PeerId(abababab)");
    }

    #[test]
    fn test_distinct_keys_distinct_ids() {
        assert_ne!(
            PeerId::from_signing_key(&key(1)),
            PeerId::from_signing_key(&key(2))
        );
    }
}
