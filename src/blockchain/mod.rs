// Blockchain module
//
// This module contains the core ledger implementation including:
// - Block structure and canonical hashing
// - The ledger with its pending pools
// - Transactions and their validation
// - Proof of work
// - Peer registry and fork-choice
// - Derived account balances and persistence

pub mod account;
pub mod block;
pub mod chain;
pub mod consensus;
pub mod crypto;
pub mod peers;
pub mod pow;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{BlockchainError, Ledger};
pub use consensus::ChainSnapshot;
pub use crypto::{DigitalSignature, PublicKey, Wallet};
pub use pow::ProofOfWork;
pub use transaction::{PendingSignature, Transaction};
