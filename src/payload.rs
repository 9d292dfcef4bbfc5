//! Random keys and values.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Key length in random bytes (hex-encoded to twice as many chars).
pub const DEFAULT_KEY_LEN: usize = 16;

/// Derives a per-worker seed from the run seed.
pub fn worker_seed(seed: u64, worker: usize) -> u64 {
    seed ^ (worker as u64).wrapping_mul(0x9e3779b97f4a7c15)
}

/// Generator for hex keys and random value blobs.
pub struct PayloadGenerator {
    rng: StdRng,
    key_len: usize,
}

impl PayloadGenerator {
    pub fn new(seed: u64, key_len: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            key_len: key_len.max(1),
        }
    }

    pub fn key(&mut self) -> String {
        let mut bytes = vec![0u8; self.key_len];
        self.rng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn value(&mut self, size: usize) -> Vec<u8> {
        let mut value = vec![0u8; size];
        self.rng.fill_bytes(&mut value);
        value
    }

    /// `true` with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Uniform index in `0..len`; `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_hex_of_requested_length() {
        let mut generator = PayloadGenerator::new(1, DEFAULT_KEY_LEN);
        let key = generator.key();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = PayloadGenerator::new(99, 8);
        let mut b = PayloadGenerator::new(99, 8);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.value(64), b.value(64));
    }

    #[test]
    fn worker_seeds_differ() {
        assert_eq!(worker_seed(5, 0), 5);
        assert_ne!(worker_seed(5, 1), worker_seed(5, 2));
    }

    #[test]
    fn value_has_requested_size() {
        let mut generator = PayloadGenerator::new(3, 4);
        assert_eq!(generator.value(512).len(), 512);
        assert!(generator.value(0).is_empty());
    }
}
