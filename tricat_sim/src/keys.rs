//! Deterministic key provider for simulation.

use ed25519_dalek::SigningKey;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

/// Provides deterministic Ed25519 peer keys derived from a seed.
///
/// Keys are:
/// - Deterministic: the same seed always produces the same keys
/// - Unique: each peer index gets a different key
/// - Isolated: changing the peer count doesn't affect other peers' keys
pub struct DeterministicKeyProvider {
    master_seed: u64,
    key_cache: HashMap<u64, SigningKey>,
}

impl DeterministicKeyProvider {
    pub fn new(master_seed: u64) -> Self {
        Self {
            master_seed,
            key_cache: HashMap::new(),
        }
    }

    /// Generates or retrieves the signing key for a peer index.
    pub fn peer_key(&mut self, index: u64) -> SigningKey {
        if let Some(key) = self.key_cache.get(&index) {
            return key.clone();
        }

        let key = derive_key(self.master_seed, index);
        self.key_cache.insert(index, key.clone());
        key
    }

    /// Generates keys for peers `0..count`.
    pub fn generate_peer_keys(&mut self, count: usize) -> Vec<SigningKey> {
        (0..count as u64).map(|index| self.peer_key(index)).collect()
    }
}

/// `master_seed * golden ratio + index * prime`, expanded through ChaCha8.
pub(crate) fn derive_key(master_seed: u64, index: u64) -> SigningKey {
    let seed = master_seed
        .wrapping_mul(0x9e3779b97f4a7c15)
        .wrapping_add(index.wrapping_mul(0x517cc1b727220a95));
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    SigningKey::generate(&mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_peer_keys() {
        let mut provider1 = DeterministicKeyProvider::new(42);
        let mut provider2 = DeterministicKeyProvider::new(42);

        assert_eq!(provider1.peer_key(5).to_bytes(), provider2.peer_key(5).to_bytes());
    }

    #[test]
    fn test_different_peers_different_keys() {
        let mut provider = DeterministicKeyProvider::new(42);

        let ids: Vec<_> = provider
            .generate_peer_keys(3)
            .iter()
            .map(|key| key.verifying_key())
            .collect();
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
        assert_ne!(ids[0], ids[2]);
    }

    #[test]
    fn test_different_seeds_different_keys() {
        let mut a = DeterministicKeyProvider::new(1);
        let mut b = DeterministicKeyProvider::new(2);
        assert_ne!(a.peer_key(0).to_bytes(), b.peer_key(0).to_bytes());
    }

    #[test]
    fn test_key_isolation() {
        // Adding more peers shouldn't change existing keys
        let mut provider1 = DeterministicKeyProvider::new(42);
        let mut provider2 = DeterministicKeyProvider::new(42);

        let keys1 = provider1.generate_peer_keys(3);
        let _extra = provider2.generate_peer_keys(10);

        for (i, key) in keys1.iter().enumerate() {
            assert_eq!(key.to_bytes(), provider2.peer_key(i as u64).to_bytes());
        }
    }
}
