use sha2::{Digest, Sha256};

use crate::error::MinesError;

/// Source of uniform tile indices.
pub trait RngProvider {
    /// Uniform in `[0, bound)`. A zero bound yields 0.
    fn next_int(&mut self, bound: u32) -> u32;
}

impl<R: RngProvider + ?Sized> RngProvider for &mut R {
    fn next_int(&mut self, bound: u32) -> u32 {
        (**self).next_int(bound)
    }
}

// =============================================================================
// HASH-CHAIN RNG (VRF seeded)
// =============================================================================

/// Expands a 32-byte VRF seed with SHA-256 in counter mode.
///
/// Block `n` is `SHA256(seed || n)`; each block yields eight `u32` words.
#[derive(Clone, Debug)]
pub struct HashChainRng {
    seed: [u8; 32],
    counter: u64,
    block: [u8; 32],
    offset: usize,
}

impl HashChainRng {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            seed,
            counter: 0,
            block: [0u8; 32],
            offset: 32,
        }
    }

    /// Build from raw management-canister randomness.
    pub fn from_vrf(bytes: &[u8]) -> Result<Self, MinesError> {
        validate_randomness(bytes)?;
        let seed: [u8; 32] = Sha256::digest(bytes).into();
        Ok(Self::from_seed(seed))
    }

    fn refill(&mut self) {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(self.counter.to_be_bytes());
        self.block = hasher.finalize().into();
        self.counter += 1;
        self.offset = 0;
    }

    fn next_u32(&mut self) -> u32 {
        if self.offset + 4 > self.block.len() {
            self.refill();
        }
        let word = &self.block[self.offset..self.offset + 4];
        self.offset += 4;
        u32::from_be_bytes([word[0], word[1], word[2], word[3]])
    }
}

impl RngProvider for HashChainRng {
    fn next_int(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        // Rejection sampling keeps every index equally likely
        let max_valid = (u32::MAX / bound) * bound;
        loop {
            let value = self.next_u32();
            if value < max_valid {
                return value % bound;
            }
        }
    }
}

/// Reject degenerate VRF output (all zeros or all ones).
fn validate_randomness(bytes: &[u8]) -> Result<(), MinesError> {
    if bytes.len() < 8 {
        return Err(MinesError::RandomnessUnavailable(
            "insufficient randomness bytes".to_string(),
        ));
    }
    if bytes.iter().all(|&b| b == 0) {
        return Err(MinesError::RandomnessUnavailable(
            "degenerate randomness: all zeros".to_string(),
        ));
    }
    if bytes.iter().all(|&b| b == 0xFF) {
        return Err(MinesError::RandomnessUnavailable(
            "degenerate randomness: all ones".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_bytes() -> Vec<u8> {
        (1..=32u8).collect()
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = HashChainRng::from_vrf(&seed_bytes()).unwrap();
        let mut b = HashChainRng::from_vrf(&seed_bytes()).unwrap();
        let xs: Vec<u32> = (0..50).map(|_| a.next_int(25)).collect();
        let ys: Vec<u32> = (0..50).map(|_| b.next_int(25)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_values_within_bound() {
        let mut rng = HashChainRng::from_vrf(&seed_bytes()).unwrap();
        for bound in [1u32, 2, 7, 25, 1000] {
            for _ in 0..200 {
                assert!(rng.next_int(bound) < bound);
            }
        }
        assert_eq!(rng.next_int(0), 0);
    }

    #[test]
    fn test_roughly_uniform() {
        let mut rng = HashChainRng::from_vrf(&seed_bytes()).unwrap();
        let mut counts = [0u32; 25];
        let draws = 50_000;
        for _ in 0..draws {
            counts[rng.next_int(25) as usize] += 1;
        }
        let expected = draws as f64 / 25.0;
        for count in counts {
            let deviation = (count as f64 - expected).abs() / expected;
            assert!(deviation < 0.1, "bucket {} deviates {:.3}", count, deviation);
        }
    }

    #[test]
    fn test_rejects_degenerate_seeds() {
        assert!(HashChainRng::from_vrf(&[0u8; 32]).is_err());
        assert!(HashChainRng::from_vrf(&[0xFFu8; 32]).is_err());
        assert!(HashChainRng::from_vrf(&[1u8; 4]).is_err());
    }
}
