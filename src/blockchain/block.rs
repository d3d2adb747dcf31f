use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::crypto::sha256_hex;
use super::transaction::Transaction;

/// `previous_hash` of the genesis block. Real digests are 64 hex chars.
pub const GENESIS_PREVIOUS_HASH: &str = "1";

/// Proof carried by the genesis block
pub const GENESIS_PROOF: u64 = 100;

/// Represents a block in the blockchain.
///
/// Fields are declared in key order so the wire form is already sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Position of the block in the chain, starting at 1
    pub index: u64,

    /// Canonical hash of the previous block
    pub previous_hash: String,

    /// Proof of work authorizing this block
    pub proof: u64,

    /// Seconds since the Unix epoch
    pub timestamp: f64,

    /// Transactions included in this block
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a new block stamped with the current time
    pub fn new(index: u64, transactions: Vec<Transaction>, proof: u64, previous_hash: String) -> Self {
        Block {
            index,
            previous_hash,
            proof,
            timestamp: now_seconds(),
            transactions,
        }
    }

    /// The first block of every chain. Identical on every node.
    pub fn genesis() -> Self {
        Block {
            index: 1,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            proof: GENESIS_PROOF,
            timestamp: 0.0,
            transactions: Vec::new(),
        }
    }

    /// Whether this is exactly the fixed genesis block
    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    /// Canonical SHA-256 hash of the block.
    ///
    /// The block goes through a `serde_json::Value` whose maps are sorted, so
    /// the digest does not depend on the key order a peer sent it in.
    pub fn canonical_hash(&self) -> String {
        sha256_hex(self.canonical_json().as_bytes())
    }

    /// Compact sorted-key JSON, also used as the stored representation
    pub fn canonical_json(&self) -> String {
        serde_json::json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "transactions": self.transactions,
            "proof": self.proof,
            "previous_hash": self.previous_hash,
        })
        .to_string()
    }
}

fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
