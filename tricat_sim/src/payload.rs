//! Seeded pseudo-random payloads.

use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Salt separating payload randomness from key derivation.
const PAYLOAD_SALT: u64 = 0x7061_796c_6f61_6473;

/// `len` pseudo-random bytes, identical for identical seeds.
pub fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ PAYLOAD_SALT);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}
