//! Proof-of-work puzzle.
//!
//! A proof `p` is valid against the previous block's proof `q` when the
//! SHA-256 hex digest of the decimal string `"{q}{p}"` starts with
//! `difficulty` zero characters.

use std::sync::atomic::{AtomicBool, Ordering};

use super::crypto::sha256_hex;

/// Process-wide mining difficulty (leading hex zeros)
pub const DIFFICULTY: usize = 4;

/// How many candidates are tried between two looks at the cancel flag
const CANCEL_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    difficulty: usize,
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new(DIFFICULTY)
    }
}

impl ProofOfWork {
    pub fn new(difficulty: usize) -> Self {
        ProofOfWork { difficulty }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Checks `proof` against `last_proof` at an explicit difficulty
    pub fn verify(last_proof: u64, proof: u64, difficulty: usize) -> bool {
        let guess = format!("{}{}", last_proof, proof);
        let digest = sha256_hex(guess.as_bytes());

        digest.len() >= difficulty && digest.bytes().take(difficulty).all(|b| b == b'0')
    }

    pub fn is_valid(&self, last_proof: u64, proof: u64) -> bool {
        Self::verify(last_proof, proof, self.difficulty)
    }

    /// Smallest proof satisfying the puzzle for `last_proof`
    pub fn solve(&self, last_proof: u64) -> u64 {
        let mut proof = 0;
        while !self.is_valid(last_proof, proof) {
            proof += 1;
        }
        proof
    }

    /// Same search as [`solve`](Self::solve), giving up with `None` once
    /// `cancel` is raised.
    pub fn solve_cancellable(&self, last_proof: u64, cancel: &AtomicBool) -> Option<u64> {
        let mut proof = 0;
        loop {
            if proof % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return None;
            }
            if self.is_valid(last_proof, proof) {
                return Some(proof);
            }
            proof += 1;
        }
    }
}
