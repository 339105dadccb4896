//! Explicit sequence and nonce generators owned by a connection.

use rand::Rng;

use crate::wire::{OutputMessage, opcode};

/// Server-side walk sequence. Every cancel or rejected prediction bumps it;
/// client intentions stamped with an older value are stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSequence {
    current: u32,
}

impl WalkSequence {
    pub fn new(start: u32) -> Self {
        Self { current: start }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Advances the sequence and returns the new value.
    pub fn bump(&mut self) -> u32 {
        self.current = self.current.wrapping_add(1);
        self.current
    }

    /// Whether an intention stamped with `client` predates the last bump.
    pub fn is_stale(&self, client: u32) -> bool {
        client < self.current
    }
}

/// Source of the random byte sent in the connection challenge.
pub trait NonceSource: Send {
    fn next_nonce(&mut self) -> u8;
}

/// Nonces from the thread-local RNG.
#[derive(Debug, Default)]
pub struct RandomNonce;

impl NonceSource for RandomNonce {
    fn next_nonce(&mut self) -> u8 {
        rand::rng().random()
    }
}

/// Deterministic nonces, cycling through a fixed list.
#[derive(Debug, Clone)]
pub struct FixedNonce {
    values: Vec<u8>,
    next: usize,
}

impl FixedNonce {
    pub fn new(values: Vec<u8>) -> Self {
        Self { values, next: 0 }
    }
}

impl NonceSource for FixedNonce {
    fn next_nonce(&mut self) -> u8 {
        if self.values.is_empty() {
            return 0;
        }
        let value = self.values[self.next % self.values.len()];
        self.next = self.next.wrapping_add(1);
        value
    }
}

/// The first record on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    pub timestamp: u32,
    pub nonce: u8,
}

impl Challenge {
    pub fn new(timestamp: u32, nonces: &mut dyn NonceSource) -> Self {
        Self {
            timestamp,
            nonce: nonces.next_nonce(),
        }
    }

    pub fn write(&self, msg: &mut OutputMessage) {
        msg.add_u8(opcode::CHALLENGE);
        msg.add_u32(self.timestamp);
        msg.add_u8(self.nonce);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_sequence_bump_and_stale() {
        let mut seq = WalkSequence::default();
        assert!(!seq.is_stale(0));
        assert_eq!(seq.bump(), 1);
        assert!(seq.is_stale(0));
        assert!(!seq.is_stale(1));
        assert!(!seq.is_stale(5));
    }

    #[test]
    fn test_walk_sequence_wraps() {
        let mut seq = WalkSequence::new(u32::MAX);
        assert_eq!(seq.bump(), 0);
    }

    #[test]
    fn test_fixed_nonce_cycles() {
        let mut nonces = FixedNonce::new(vec![4, 9]);
        assert_eq!(nonces.next_nonce(), 4);
        assert_eq!(nonces.next_nonce(), 9);
        assert_eq!(nonces.next_nonce(), 4);
        assert_eq!(FixedNonce::new(vec![]).next_nonce(), 0);
    }

    #[test]
    fn test_challenge_layout() {
        let mut nonces = FixedNonce::new(vec![0xAB]);
        let challenge = Challenge::new(0x01020304, &mut nonces);
        let mut msg = OutputMessage::new();
        challenge.write(&mut msg);
        assert_eq!(msg.as_bytes(), &[0x1F, 0x04, 0x03, 0x02, 0x01, 0xAB]);
    }
}
