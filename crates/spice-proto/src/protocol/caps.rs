//! Capability bit sets exchanged during link negotiation.
//!
//! # What is a capability set? (for beginners)
//!
//! Both peers advertise the optional protocol features they understand as a
//! list of 32-bit words, where bit `n` of the whole list means "feature `n` is
//! supported".  There are two lists per link: *common* capabilities (shared by
//! every channel type, e.g. mini headers) and *channel* capabilities (specific
//! to one channel type, e.g. Opus audio on playback).
//!
//! A feature may only be used when **both** sides advertise it, so the
//! negotiated set is the intersection of the local and peer sets.

/// Common capability bits, valid on every channel type.
pub mod common_cap {
    /// The server lets the client pick an authentication mechanism.
    pub const AUTH_SELECTION: u32 = 0;
    /// RSA ticket authentication.
    pub const AUTH_SPICE: u32 = 1;
    /// SASL authentication.
    pub const AUTH_SASL: u32 = 2;
    /// 6-byte data headers instead of the 18-byte full header.
    pub const MINI_HEADER: u32 = 3;
}

/// Playback channel capability bits.
pub mod playback_cap {
    pub const CELT_0_5_1: u32 = 0;
    pub const VOLUME: u32 = 1;
    pub const LATENCY: u32 = 2;
    pub const OPUS: u32 = 3;
}

/// A set of capability bits stored as little-endian wire words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    words: Vec<u32>,
}

impl CapabilitySet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set from raw wire words.
    pub fn from_words(words: Vec<u32>) -> Self {
        Self { words }
    }

    /// Creates a set with each of `bits` enabled.
    pub fn with_bits(bits: &[u32]) -> Self {
        let mut set = Self::new();
        for &bit in bits {
            set.set(bit);
        }
        set
    }

    /// Enables `bit`, growing the word list as needed.
    pub fn set(&mut self, bit: u32) {
        let word = (bit / 32) as usize;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (bit % 32);
    }

    /// Returns `true` if `bit` is enabled.
    pub fn has(&self, bit: u32) -> bool {
        self.words
            .get((bit / 32) as usize)
            .is_some_and(|word| word & (1 << (bit % 32)) != 0)
    }

    /// The raw words, in wire order.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Number of 32-bit words on the wire.
    pub fn word_count(&self) -> u32 {
        self.words.len() as u32
    }

    /// Bits enabled in both sets.
    pub fn intersection(&self, other: &CapabilitySet) -> CapabilitySet {
        let words = self
            .words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| a & b)
            .collect();
        CapabilitySet { words }
    }

    /// Bits enabled in either set.
    pub fn union(&self, other: &CapabilitySet) -> CapabilitySet {
        let len = self.words.len().max(other.words.len());
        let words = (0..len)
            .map(|i| {
                self.words.get(i).copied().unwrap_or(0) | other.words.get(i).copied().unwrap_or(0)
            })
            .collect();
        CapabilitySet { words }
    }
}
