use log::debug;
use thiserror::Error;

use super::block::Block;
use super::peers::PeerError;
use super::pow::ProofOfWork;
use super::storage::StorageError;
use super::transaction::{PendingSignature, Transaction, TransactionError};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Peer error: {0}")]
    PeerError(#[from] PeerError),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Checks a whole chain from genesis forward.
///
/// The first block must be the fixed genesis block. Every later block must
/// carry the next index, link to the canonical hash of its predecessor and
/// carry a valid proof of work.
pub fn validate_chain(chain: &[Block], pow: &ProofOfWork) -> Result<(), BlockchainError> {
    match chain.first() {
        None => return Err(BlockchainError::InvalidChain("chain is empty".to_string())),
        Some(first) if !first.is_genesis() => {
            return Err(BlockchainError::InvalidChain(
                "chain does not start at genesis".to_string(),
            ))
        }
        Some(_) => {}
    }

    for pair in chain.windows(2) {
        let (previous, block) = (&pair[0], &pair[1]);

        if block.index != previous.index + 1 {
            return Err(BlockchainError::InvalidChain(format!(
                "block {} follows block {}",
                block.index, previous.index
            )));
        }

        if block.previous_hash != previous.canonical_hash() {
            return Err(BlockchainError::InvalidChain(format!(
                "block {} does not link to block {}",
                block.index, previous.index
            )));
        }

        if !pow.is_valid(previous.proof, block.proof) {
            return Err(BlockchainError::InvalidChain(format!(
                "block {} carries an invalid proof {}",
                block.index, block.proof
            )));
        }
    }

    Ok(())
}

/// Fork boundary between `local` and `candidate`.
///
/// Scans backward from the end of `local` for the highest position whose
/// `previous_hash` still agrees with `candidate`. When the chains diverge
/// inside `local`, that position is the 1-based index of the last block they
/// share. When `local` is a prefix of `candidate` it is `local.len() - 1`.
/// Either way every block at a position >= the result may differ, and
/// nothing below it does. Returns 0 when no position agrees.
pub fn difference_chain(local: &[Block], candidate: &[Block]) -> usize {
    let shared = local.len().min(candidate.len());

    (0..shared)
        .rev()
        .find(|&i| local[i].previous_hash == candidate[i].previous_hash)
        .unwrap_or(0)
}

/// The chain plus both pending pools.
///
/// A `Ledger` is not synchronized on its own; the node owns it behind a
/// single lock.
#[derive(Debug, Clone)]
pub struct Ledger {
    chain: Vec<Block>,
    pending_signatures: Vec<PendingSignature>,
    pending_transactions: Vec<Transaction>,
    pow: ProofOfWork,
}

impl Ledger {
    /// Creates a ledger holding only the genesis block
    pub fn new(pow: ProofOfWork) -> Self {
        Ledger {
            chain: vec![Block::genesis()],
            pending_signatures: Vec::new(),
            pending_transactions: Vec::new(),
            pow,
        }
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn last_block(&self) -> &Block {
        self.chain
            .last()
            .expect("ledger always holds at least the genesis block")
    }

    pub fn pending_signatures(&self) -> &[PendingSignature] {
        &self.pending_signatures
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    /// Queues a submitted transaction for validation.
    ///
    /// Returns the index of the next block. This is a hint, not a promise that
    /// the transaction will land there.
    pub fn accept(&mut self, pending: PendingSignature) -> u64 {
        self.pending_signatures.push(pending);
        self.last_block().index + 1
    }

    /// Adds an already trusted transaction (the mining reward)
    pub fn add_transaction(&mut self, transaction: Transaction) {
        self.pending_transactions.push(transaction);
    }

    /// Validates every pending signature and promotes the ones that pass.
    ///
    /// Entries with a bad signature or a broken hash commitment are dropped
    /// without notice. Returns how many were promoted.
    pub fn validate_pending(&mut self) -> usize {
        let mut promoted = 0;

        for pending in self.pending_signatures.drain(..) {
            match pending.validate() {
                Ok(transaction) => {
                    self.pending_transactions.push(transaction);
                    promoted += 1;
                }
                Err(err) => {
                    debug!("Dropping pending transaction from {}: {}", pending.public_key, err);
                }
            }
        }

        promoted
    }

    /// Forges the next block from the pending transactions.
    ///
    /// Without an explicit `previous_hash` the canonical hash of the current
    /// last block is used. Both pending pools are emptied either way.
    pub fn append_block(&mut self, proof: u64, previous_hash: Option<String>) -> Block {
        let previous_hash = previous_hash.unwrap_or_else(|| self.last_block().canonical_hash());
        let transactions = std::mem::take(&mut self.pending_transactions);
        self.pending_signatures.clear();

        let block = Block::new(self.last_block().index + 1, transactions, proof, previous_hash);
        self.chain.push(block.clone());
        block
    }

    /// Validates the ledger's own chain
    pub fn is_valid(&self) -> bool {
        validate_chain(&self.chain, &self.pow).is_ok()
    }

    /// Swaps in a whole chain. The pending pools are left untouched.
    pub fn replace_chain(&mut self, chain: Vec<Block>) -> Result<(), BlockchainError> {
        validate_chain(&chain, &self.pow)?;
        self.install_chain(chain);
        Ok(())
    }

    /// Swaps in a chain the caller has already passed through
    /// [`validate_chain`] with this ledger's proof of work.
    pub fn install_chain(&mut self, chain: Vec<Block>) {
        self.chain = chain;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::blockchain::block::GENESIS_PROOF;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::TransactionPayload;

    /// Mines `blocks` blocks on top of `ledger`, each holding one reward
    pub(crate) fn mine_blocks(ledger: &mut Ledger, miner: &str, blocks: usize) {
        for _ in 0..blocks {
            let proof = ledger.pow().solve(ledger.last_block().proof);
            ledger.add_transaction(Transaction::reward(miner));
            ledger.append_block(proof, None);
        }
    }

    #[test]
    fn test_new_ledger() {
        let ledger = Ledger::new(ProofOfWork::new(1));

        assert_eq!(ledger.len(), 1);
        assert!(ledger.last_block().is_genesis());
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_accept_returns_next_index_hint() {
        let mut ledger = Ledger::new(ProofOfWork::new(1));
        let wallet = Wallet::new();

        let index = ledger.accept(PendingSignature::sign(&wallet, "bob", 3).unwrap());
        assert_eq!(index, 2);
        let index = ledger.accept(PendingSignature::sign(&wallet, "bob", 4).unwrap());
        assert_eq!(index, 2);
        assert_eq!(ledger.pending_signatures().len(), 2);
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_validate_pending_promotes_and_drops() {
        let mut ledger = Ledger::new(ProofOfWork::new(1));
        let wallet = Wallet::new();

        ledger.accept(PendingSignature::sign(&wallet, "bob", 3).unwrap());

        // Signed correctly, but the hash commitment does not match the fields
        let mut payload = TransactionPayload::new(&wallet.public_key().0, "bob", 3);
        payload.recipient = "eve".to_string();
        let body = payload.to_json();
        ledger.accept(PendingSignature::new(
            wallet.sign(body.as_bytes()),
            body,
            wallet.public_key().clone(),
        ));

        // Signed by someone else
        let mut forged = PendingSignature::sign(&wallet, "bob", 9).unwrap();
        forged.public_key = Wallet::new().public_key().clone();
        ledger.accept(forged);

        assert_eq!(ledger.validate_pending(), 1);
        assert!(ledger.pending_signatures().is_empty());
        assert_eq!(ledger.pending_transactions().len(), 1);
        assert_eq!(ledger.pending_transactions()[0].amount, 3);
    }

    #[test]
    fn test_append_block_links_and_clears_pools() {
        let mut ledger = Ledger::new(ProofOfWork::new(1));
        let wallet = Wallet::new();
        let genesis_hash = ledger.last_block().canonical_hash();

        ledger.accept(PendingSignature::sign(&wallet, "bob", 3).unwrap());
        ledger.accept(PendingSignature::sign(&wallet, "carol", 4).unwrap());
        ledger.validate_pending();
        ledger.accept(PendingSignature::sign(&wallet, "dave", 5).unwrap());

        let proof = ledger.pow().solve(ledger.last_block().proof);
        let block = ledger.append_block(proof, None);

        assert_eq!(block.index, 2);
        assert_eq!(block.previous_hash, genesis_hash);
        assert_eq!(block.transactions.len(), 2);
        assert!(ledger.pending_signatures().is_empty());
        assert!(ledger.pending_transactions().is_empty());
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_append_empty_block_clears_pools() {
        let mut ledger = Ledger::new(ProofOfWork::new(1));
        let wallet = Wallet::new();
        ledger.accept(PendingSignature::sign(&wallet, "bob", 3).unwrap());

        let block = ledger.append_block(0, Some("explicit".to_string()));

        assert_eq!(block.previous_hash, "explicit");
        assert!(block.transactions.is_empty());
        assert!(ledger.pending_signatures().is_empty());
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_chain_linkage_property() {
        let mut ledger = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut ledger, "miner", 4);

        let chain = ledger.chain();
        for i in 1..chain.len() {
            assert_eq!(chain[i].previous_hash, chain[i - 1].canonical_hash());
            assert_eq!(chain[i].index, i as u64 + 1);
        }
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_broken_link_invalidates_chain() {
        let mut ledger = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut ledger, "miner", 3);

        for i in 1..ledger.len() {
            let mut chain = ledger.chain().to_vec();
            chain[i].previous_hash = "0".repeat(64);
            assert!(validate_chain(&chain, ledger.pow()).is_err());
        }

        let mut chain = ledger.chain().to_vec();
        chain[1].transactions[0].amount = 1_000;
        assert!(validate_chain(&chain, ledger.pow()).is_err(), "tampered block breaks the next link");
    }

    #[test]
    fn test_bad_proof_invalidates_chain() {
        let pow = ProofOfWork::new(2);
        let mut ledger = Ledger::new(pow);
        let bad_proof = (0..).find(|p| !pow.is_valid(GENESIS_PROOF, *p)).unwrap();
        ledger.append_block(bad_proof, None);

        assert!(!ledger.is_valid());
        assert!(validate_chain(&[], &pow).is_err());
    }

    #[test]
    fn test_difference_chain_finds_fork_point() {
        let mut shared = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut shared, "common", 2);

        let mut local = shared.clone();
        let mut remote = shared.clone();
        mine_blocks(&mut local, "local", 2);
        mine_blocks(&mut remote, "remote", 3);

        // identical through index 3, diverging at 4
        assert_eq!(difference_chain(local.chain(), remote.chain()), 3);
        assert_eq!(difference_chain(remote.chain(), local.chain()), 3);
        assert_eq!(difference_chain(local.chain(), local.chain()), local.len() - 1);
    }

    #[test]
    fn test_replace_chain_rejects_invalid() {
        let mut ledger = Ledger::new(ProofOfWork::new(1));
        let mut other = ledger.clone();
        mine_blocks(&mut other, "other", 2);

        let mut broken = other.chain().to_vec();
        broken[2].previous_hash = "x".to_string();
        assert!(ledger.replace_chain(broken).is_err());
        assert!(ledger.replace_chain(Vec::new()).is_err());
        assert_eq!(ledger.len(), 1);

        ledger.replace_chain(other.chain().to_vec()).unwrap();
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_forged_genesis_invalidates_chain() {
        let pow = ProofOfWork::new(1);
        let mut forged = Block::genesis();
        forged.proof = 7;
        forged.transactions.push(Transaction::reward("minter"));

        let mut ledger = Ledger::new(pow);
        ledger.install_chain(vec![forged]);
        mine_blocks(&mut ledger, "minter", 1);

        assert!(validate_chain(&ledger.chain()[1..], &pow).is_err());
        assert!(matches!(
            validate_chain(ledger.chain(), &pow),
            Err(BlockchainError::InvalidChain(_))
        ));
    }

    #[test]
    fn test_skipped_index_invalidates_chain() {
        let pow = ProofOfWork::new(1);
        let genesis = Block::genesis();
        let proof = pow.solve(genesis.proof);
        let jumped = Block::new(99, Vec::new(), proof, genesis.canonical_hash());

        assert!(validate_chain(&[genesis.clone(), jumped], &pow).is_err());

        let next = Block::new(2, Vec::new(), proof, genesis.canonical_hash());
        assert!(validate_chain(&[genesis, next], &pow).is_ok());
    }
}
