//! DHT identifier module
//!
//! Fixed-width identifiers used as peer IDs and key components, and the XOR
//! distance metric every other part of the routing core is built on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of 32-bit words in a [`Number160`]
pub const NUMBER160_WORDS: usize = 5;
/// Size of the byte encoding of a [`Number160`]
pub const NUMBER160_BYTES: usize = 20;
/// Number of bits in a [`Number160`]
pub const NUMBER160_BITS: usize = 160;

/// A 160-bit unsigned integer, most significant word first.
///
/// The derived ordering compares words left to right, which is the unsigned
/// numeric ordering of the whole value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Number160([u32; NUMBER160_WORDS]);

impl Number160 {
    /// The all-zero identifier
    pub const ZERO: Number160 = Number160([0; NUMBER160_WORDS]);
    /// The identifier with every bit set
    pub const MAX: Number160 = Number160([u32::MAX; NUMBER160_WORDS]);

    /// Create a Number160 from its words, most significant first
    pub const fn from_words(words: [u32; NUMBER160_WORDS]) -> Self {
        Self(words)
    }

    /// Create a Number160 from its big-endian byte encoding
    pub fn from_bytes(bytes: [u8; NUMBER160_BYTES]) -> Self {
        let mut words = [0u32; NUMBER160_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            let offset = i * 4;
            *word = u32::from_be_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]);
        }
        Self(words)
    }

    /// Create a Number160 from a slice, which must be exactly 20 bytes long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; NUMBER160_BYTES] = bytes.try_into().ok()?;
        Some(Self::from_bytes(array))
    }

    /// Fixed-size big-endian byte encoding
    pub fn to_bytes(&self) -> [u8; NUMBER160_BYTES] {
        let mut bytes = [0u8; NUMBER160_BYTES];
        for (i, word) in self.0.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }

    /// The words of this number, most significant first
    pub fn words(&self) -> &[u32; NUMBER160_WORDS] {
        &self.0
    }

    /// Generate a uniformly random identifier
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut words = [0u32; NUMBER160_WORDS];
        rng.fill(&mut words);
        Self(words)
    }

    /// Derive an identifier from a string by hashing it with SHA-1
    pub fn from_seed(seed: &str) -> Self {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(seed.as_bytes());
        let result = hasher.finalize();
        let mut bytes = [0u8; NUMBER160_BYTES];
        bytes.copy_from_slice(&result);
        Self::from_bytes(bytes)
    }

    /// Bitwise XOR
    pub fn xor(&self, other: &Number160) -> Number160 {
        let mut words = [0u32; NUMBER160_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.0[i] ^ other.0[i];
        }
        Number160(words)
    }

    /// XOR distance to another identifier
    pub fn distance(&self, other: &Number160) -> Number160 {
        self.xor(other)
    }

    /// Index of the highest set bit plus one; zero for the all-zero value
    pub fn bit_length(&self) -> usize {
        for (i, word) in self.0.iter().enumerate() {
            if *word != 0 {
                let remaining_words = NUMBER160_WORDS - i;
                return remaining_words * 32 - word.leading_zeros() as usize;
            }
        }
        0
    }

    /// Check whether every bit is zero
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// Get the identifier as a 40-character hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse an identifier from a hex string, with or without a `0x` prefix.
    ///
    /// Shorter strings are treated as the low-order digits.
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let digits = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        if digits.is_empty() || digits.len() > NUMBER160_BYTES * 2 {
            return None;
        }
        let padded = format!("{:0>40}", digits);
        let bytes = hex::decode(padded).ok()?;
        Self::from_slice(&bytes)
    }

    /// Short prefix of the hex form, for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl From<u64> for Number160 {
    fn from(value: u64) -> Self {
        Number160([0, 0, 0, (value >> 32) as u32, value as u32])
    }
}

impl From<u32> for Number160 {
    fn from(value: u32) -> Self {
        Number160([0, 0, 0, 0, value])
    }
}

impl fmt::Display for Number160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Number160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Number160({})", self.to_hex())
    }
}

/// Composite key `(location, domain, content, version)`.
///
/// Ordered component by component, so ranges of stored content can be
/// expressed as `from..=to` pairs for digest queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Number640 {
    pub location: Number160,
    pub domain: Number160,
    pub content: Number160,
    pub version: Number160,
}

impl Number640 {
    pub const ZERO: Number640 = Number640 {
        location: Number160::ZERO,
        domain: Number160::ZERO,
        content: Number160::ZERO,
        version: Number160::ZERO,
    };

    pub const MAX: Number640 = Number640 {
        location: Number160::MAX,
        domain: Number160::MAX,
        content: Number160::MAX,
        version: Number160::MAX,
    };

    /// Create a new composite key
    pub fn new(location: Number160, domain: Number160, content: Number160, version: Number160) -> Self {
        Self {
            location,
            domain,
            content,
            version,
        }
    }

    /// Smallest key within a location and domain
    pub fn min_of(location: Number160, domain: Number160) -> Self {
        Self::new(location, domain, Number160::ZERO, Number160::ZERO)
    }

    /// Largest key within a location and domain
    pub fn max_of(location: Number160, domain: Number160) -> Self {
        Self::new(location, domain, Number160::MAX, Number160::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_symmetric() {
        for _ in 0..32 {
            let a = Number160::random();
            let b = Number160::random();
            assert_eq!(a.distance(&b), b.distance(&a));
            assert_eq!(a.distance(&a), Number160::ZERO);
        }
    }

    #[test]
    fn test_bit_length() {
        assert_eq!(Number160::ZERO.bit_length(), 0);
        assert_eq!(Number160::from(1u32).bit_length(), 1);
        assert_eq!(Number160::from(0x80u32).bit_length(), 8);
        assert_eq!(Number160::from(1u64 << 32).bit_length(), 33);
        assert_eq!(Number160::MAX.bit_length(), 160);
    }

    #[test]
    fn test_ordering_most_significant_word_first() {
        let small = Number160::from(u64::MAX);
        let large = Number160::from_words([1, 0, 0, 0, 0]);
        assert!(small < large);
        assert!(Number160::ZERO < small);
        assert!(large < Number160::MAX);
    }

    #[test]
    fn test_bytes_encoding() {
        let n = Number160::from(0x0102_0304_0506_0708u64);
        let bytes = n.to_bytes();
        assert_eq!(bytes.len(), NUMBER160_BYTES);
        assert_eq!(&bytes[12..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(Number160::from_bytes(bytes), n);
        assert!(Number160::from_slice(&bytes[1..]).is_none());
    }

    #[test]
    fn test_hex() {
        let n = Number160::from(0xabcdu32);
        assert_eq!(n.to_hex().len(), 40);
        assert_eq!(Number160::from_hex("0xabcd"), Some(n));
        assert_eq!(Number160::from_hex(&n.to_hex()), Some(n));
        assert!(Number160::from_hex("zz").is_none());
        assert!(Number160::from_hex(&"f".repeat(41)).is_none());
    }

    #[test]
    fn test_xor_with_max_is_complement() {
        let n = Number160::from(5u32);
        let complement = n.xor(&Number160::MAX);
        assert_eq!(complement.xor(&Number160::MAX), n);
        assert_eq!(complement.bit_length(), 160);
    }

    #[test]
    fn test_from_seed_is_deterministic() {
        assert_eq!(Number160::from_seed("peer-1"), Number160::from_seed("peer-1"));
        assert_ne!(Number160::from_seed("peer-1"), Number160::from_seed("peer-2"));
    }

    #[test]
    fn test_number640_ordering() {
        let location = Number160::from(1u32);
        let a = Number640::new(location, Number160::from(1u32), Number160::MAX, Number160::MAX);
        let b = Number640::new(location, Number160::from(2u32), Number160::ZERO, Number160::ZERO);
        assert!(a < b);
        assert!(Number640::min_of(location, Number160::ZERO) < Number640::max_of(location, Number160::ZERO));
        assert!(Number640::ZERO < Number640::MAX);
    }
}
