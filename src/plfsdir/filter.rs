//! Per-epoch bloom filter over record keys

use std::io;

use crate::constants::MAX_FILTER_BYTES;

/// Bloom filter builder using double hashing
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_probes: u32,
}

impl BloomFilter {
    /// Size the filter for `num_keys` keys at `bits_per_key`
    ///
    /// Fails instead of allocating more than `MAX_FILTER_BYTES`.
    pub fn new(num_keys: usize, bits_per_key: usize) -> io::Result<Self> {
        // ~ ln(2) * bits_per_key probes, clamped like most LSM filters
        let num_probes = ((bits_per_key as f64) * 0.69) as u32;
        let num_probes = num_probes.clamp(1, 30);

        let num_bytes = num_keys
            .checked_mul(bits_per_key)
            .map(|bits| bits.max(64).div_ceil(8))
            .filter(|bytes| *bytes <= MAX_FILTER_BYTES)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "bloom filter for {} keys at {} bits per key exceeds {} bytes",
                        num_keys, bits_per_key, MAX_FILTER_BYTES
                    ),
                )
            })?;

        Ok(Self {
            bits: vec![0u8; num_bytes],
            num_probes,
        })
    }

    pub fn insert(&mut self, key: &[u8]) {
        let num_bits = (self.bits.len() * 8) as u64;
        let mut h = hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..self.num_probes {
            let bit = h % num_bits;
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
            h = h.wrapping_add(delta);
        }
    }

    pub fn may_contain(&self, key: &[u8]) -> bool {
        let num_bits = (self.bits.len() * 8) as u64;
        let mut h = hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..self.num_probes {
            let bit = h % num_bits;
            if self.bits[(bit / 8) as usize] & (1 << (bit % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }

    /// Encoded filter: bit array followed by the probe count
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bits.len() + 1);
        out.extend_from_slice(&self.bits);
        out.push(self.num_probes as u8);
        out
    }
}

/// FNV-1a, 64 bit, with a murmur3 finalizer
fn hash(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in data {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^ (h >> 33)
}
