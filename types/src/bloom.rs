use std::fmt::{Debug, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

/// The size of a [`Bloom`] in bytes.
pub const BLOOM_BYTES: usize = 256;

/// The amount of bits set per input.
const BITS_PER_INPUT: usize = 3;

/// A 2048 bit bloom filter over log addresses and topics.
#[derive(Copy, Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Bloom(pub [u8; BLOOM_BYTES]);

impl Default for Bloom {
    fn default() -> Self {
        Self([0; BLOOM_BYTES])
    }
}

impl Debug for Bloom {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bloom({})", hex::encode(self.0))
    }
}

impl Bloom {
    /// Returns the (byte, mask) pairs `input` maps to.
    fn positions(input: &[u8]) -> [(usize, u8); BITS_PER_INPUT] {
        let hash = blake3::hash(input);
        let hash = hash.as_bytes();

        let mut out = [(0, 0); BITS_PER_INPUT];
        for (i, pos) in out.iter_mut().enumerate() {
            let bit = usize::from(u16::from_be_bytes([hash[2 * i], hash[2 * i + 1]])) & 2047;
            *pos = (BLOOM_BYTES - 1 - bit / 8, 1 << (bit % 8));
        }
        out
    }

    /// Adds `input` to the filter.
    pub fn accrue(&mut self, input: &[u8]) {
        for (byte, mask) in Self::positions(input) {
            self.0[byte] |= mask;
        }
    }

    /// Returns `true` if `input` may have been added to this filter.
    pub fn contains_input(&self, input: &[u8]) -> bool {
        Self::positions(input)
            .into_iter()
            .all(|(byte, mask)| self.0[byte] & mask == mask)
    }

    /// Bitwise-or `other` into this filter.
    pub fn union(&mut self, other: &Self) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a |= b;
        }
    }

    /// Returns `true` if every bit set in `other` is also set in `self`.
    pub fn contains_bloom(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| a & b == *b)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_bloom_contains_nothing() {
        assert!(Bloom::default().is_empty());
        assert!(!Bloom::default().contains_input(b"topic"));
    }

    proptest! {
        #[test]
        fn accrued_inputs_are_contained(inputs in proptest::collection::vec(any::<Vec<u8>>(), 1..20)) {
            let mut bloom = Bloom::default();
            for input in &inputs {
                bloom.accrue(input);
            }

            for input in &inputs {
                prop_assert!(bloom.contains_input(input));
            }
        }

        #[test]
        fn union_contains_both(a in any::<Vec<u8>>(), b in any::<Vec<u8>>()) {
            let mut bloom_a = Bloom::default();
            bloom_a.accrue(&a);
            let mut bloom_b = Bloom::default();
            bloom_b.accrue(&b);

            let mut union = bloom_a;
            union.union(&bloom_b);

            prop_assert!(union.contains_bloom(&bloom_a));
            prop_assert!(union.contains_bloom(&bloom_b));
        }
    }
}
