use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::blockchain::account::{Account, AccountState};
use crate::blockchain::chain::{BlockchainError, Ledger};
use crate::blockchain::consensus::{Adoption, ChainSnapshot, ForkChoice, Reconciler};
use crate::blockchain::peers::PeerRegistry;
use crate::blockchain::pow::ProofOfWork;
use crate::blockchain::storage::{BlockchainStorage, StorageError};
use crate::blockchain::transaction::{PendingSignature, Transaction};
use crate::blockchain::Block;
use crate::config::NodeConfig;
use crate::network::PeerTransport;

/// Identity and tuning of a [`Node`]
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Wallet id credited with mining rewards
    pub node_id: String,
    /// `host:port` this node is reachable under
    pub identity: String,
    pub difficulty: usize,
    pub peer_timeout: Duration,
    pub reconcile_before_mining: bool,
}

impl From<&NodeConfig> for NodeSettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            node_id: Uuid::new_v4().simple().to_string(),
            identity: config.identity(),
            difficulty: config.difficulty,
            peer_timeout: config.peer_timeout,
            reconcile_before_mining: config.reconcile_before_mining,
        }
    }
}

/// Shared state of a running node.
///
/// Every mutation of the chain or the pending pools goes through the single
/// `ledger` lock. The lock is never held across an `.await` or while
/// searching for a proof.
pub struct Node {
    node_id: String,
    identity: String,
    ledger: Mutex<Ledger>,
    peers: RwLock<PeerRegistry>,
    accounts: AccountState,
    storage: BlockchainStorage,
    reconciler: Reconciler,
    peer_timeout: Duration,
    reconcile_before_mining: bool,
    /// Only one proof search runs at a time
    mining_gate: tokio::sync::Mutex<()>,
    /// Cancel flag of the search in progress, if any
    mining_cancel: Mutex<Option<Arc<AtomicBool>>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_id)
            .field("identity", &self.identity)
            .finish()
    }
}

impl Node {
    pub fn new(
        settings: NodeSettings,
        storage: BlockchainStorage,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        let identity = PeerRegistry::normalize(&settings.identity).unwrap_or(settings.identity);

        let mut peers = PeerRegistry::new();
        if let Err(err) = peers.register(&identity) {
            warn!("Could not register own identity: {}", err);
        }

        let ledger = Ledger::new(ProofOfWork::new(settings.difficulty));
        let accounts = AccountState::from_chain(ledger.chain());

        Node {
            node_id: settings.node_id,
            identity,
            ledger: Mutex::new(ledger),
            peers: RwLock::new(peers),
            accounts,
            storage,
            reconciler: Reconciler::new(transport, settings.peer_timeout),
            peer_timeout: settings.peer_timeout,
            reconcile_before_mining: settings.reconcile_before_mining,
            mining_gate: tokio::sync::Mutex::new(()),
            mining_cancel: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Restores the chain persisted by a previous run.
    ///
    /// A stored chain that does not validate is ignored and the node starts
    /// from genesis. Storage failures are logged, never fatal.
    pub fn load_from_store(&self) {
        let blocks = match self.storage.load_blocks() {
            Ok(blocks) => blocks,
            Err(err) => {
                error!("Failed to load blocks from storage: {}", err);
                return;
            }
        };

        if blocks.is_empty() {
            info!("No stored chain found, starting from genesis");
            let genesis = self.ledger.lock().last_block().clone();
            if let Err(err) = self.storage.save_block(&genesis) {
                error!("Failed to persist genesis block: {}", err);
            }
            return;
        }

        let restored = {
            let mut ledger = self.ledger.lock();
            match ledger.replace_chain(blocks) {
                Ok(()) => Some(ledger.chain().to_vec()),
                Err(err) => {
                    warn!("Stored chain is invalid, starting from genesis: {}", err);
                    None
                }
            }
        };

        if let Some(chain) = restored {
            self.accounts.rebuild(&chain);
            info!("Loaded {} blocks from storage", chain.len());
            self.repair_balances();
        }
    }

    /// Rewrites stored balances that disagree with the replayed chain
    fn repair_balances(&self) {
        for account in self.accounts.get_all_accounts() {
            match self.storage.load_balance(&account.wallet) {
                Ok(stored) if stored == account.balance => continue,
                Ok(stored) => warn!(
                    "Stored balance of {} is {}, chain says {}",
                    account.wallet, stored, account.balance
                ),
                Err(StorageError::NotFound(_)) => {}
                Err(err) => {
                    error!("Failed to read balance of {}: {}", account.wallet, err);
                    continue;
                }
            }

            if let Err(err) = self.storage.save_balance(&account.wallet, account.balance) {
                error!("Failed to repair balance of {}: {}", account.wallet, err);
            }
        }
    }

    /// Queues a signed transaction for the next block.
    ///
    /// The returned index is advisory. Validation happens when the next
    /// block is mined and failures are dropped silently; the submitter is
    /// never told.
    pub fn submit_signed_transaction(&self, pending: PendingSignature) -> u64 {
        let index = self.ledger.lock().accept(pending);
        debug!("Queued transaction for block {}", index);
        index
    }

    /// Queues a locally created transaction and forwards it to every peer
    pub async fn submit_and_broadcast(&self, pending: PendingSignature) -> u64 {
        let index = self.submit_signed_transaction(pending.clone());

        let peers: Vec<String> = self
            .peers
            .read()
            .addresses()
            .into_iter()
            .filter(|peer| *peer != self.identity)
            .collect();

        let transport = self.reconciler.transport();
        let sends = peers.iter().map(|peer| {
            let pending = &pending;
            async move {
                let result =
                    tokio::time::timeout(self.peer_timeout, transport.broadcast(peer, pending)).await;
                (peer, result)
            }
        });

        for (peer, result) in join_all(sends).await {
            match result {
                Ok(Ok(())) => debug!("Forwarded transaction to {}", peer),
                Ok(Err(err)) => warn!("Failed to forward transaction: {}", err),
                Err(_) => warn!("Forwarding transaction to {} timed out", peer),
            }
        }

        index
    }

    /// The chain together with its length and the number of known peers
    pub fn get_chain(&self) -> ChainSnapshot {
        let chain = self.ledger.lock().chain().to_vec();
        ChainSnapshot {
            chain_length: chain.len(),
            chain,
            nodes_length: self.peers.read().len(),
        }
    }

    /// Adds a peer; returns whether it was new
    pub fn register_peer(&self, address: &str) -> Result<bool, BlockchainError> {
        let added = self.peers.write().register(address)?;
        if added {
            info!("Registered peer {}", address);
        }
        Ok(added)
    }

    /// Adds several peers at once, or none of them if any address is
    /// invalid. Returns the addresses that were new.
    pub fn register_peers(&self, addresses: &[String]) -> Result<Vec<String>, BlockchainError> {
        let normalized = addresses
            .iter()
            .map(|address| PeerRegistry::normalize(address))
            .collect::<Result<Vec<_>, _>>()?;

        let mut peers = self.peers.write();
        let mut added = Vec::new();
        for address in normalized {
            if peers.contains(&address) {
                debug!("Peer {} already known", address);
                continue;
            }
            peers.register(&address)?;
            info!("Registered peer {}", address);
            added.push(address);
        }
        Ok(added)
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.read().addresses()
    }

    pub fn pending_count(&self) -> usize {
        self.ledger.lock().pending_signatures().len()
    }

    pub fn balance(&self, wallet: &str) -> i64 {
        self.accounts.balance(wallet)
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts.get_all_accounts()
    }

    pub fn is_valid(&self) -> bool {
        self.ledger.lock().is_valid()
    }

    /// Mines one block if anything is waiting.
    ///
    /// Returns `Ok(None)` when the pool is empty, when the search was
    /// cancelled, or when the chain tip moved while searching.
    pub async fn trigger_mine(&self) -> Result<Option<Block>, BlockchainError> {
        let _gate = self.mining_gate.lock().await;

        let (last_proof, tip_hash, pow) = {
            let ledger = self.ledger.lock();
            if ledger.pending_signatures().is_empty() {
                debug!("Nothing to mine");
                return Ok(None);
            }
            let last = ledger.last_block();
            (last.proof, last.canonical_hash(), *ledger.pow())
        };

        let cancel = Arc::new(AtomicBool::new(false));
        *self.mining_cancel.lock() = Some(Arc::clone(&cancel));

        info!("Mining on top of proof {}", last_proof);
        let search = {
            let cancel = Arc::clone(&cancel);
            tokio::task::spawn_blocking(move || pow.solve_cancellable(last_proof, &cancel))
        };

        if self.reconcile_before_mining {
            let identity = self.identity.clone();
            if let Err(err) = self.trigger_reconcile(&identity).await {
                warn!("Reconciliation before mining failed: {}", err);
            }
        }

        let outcome = search.await;
        *self.mining_cancel.lock() = None;

        let proof = match outcome {
            Ok(Some(proof)) => proof,
            Ok(None) => {
                info!("Mining cancelled, a peer chain was adopted");
                return Ok(None);
            }
            Err(err) => {
                return Err(BlockchainError::SystemError(format!(
                    "proof search failed: {}",
                    err
                )))
            }
        };

        let block = {
            let mut ledger = self.ledger.lock();
            if ledger.last_block().canonical_hash() != tip_hash {
                info!("Chain tip moved while mining, discarding proof {}", proof);
                return Ok(None);
            }

            let promoted = ledger.validate_pending();
            debug!("{} pending transactions passed validation", promoted);
            ledger.add_transaction(Transaction::reward(&self.node_id));
            ledger.append_block(proof, Some(tip_hash))
        };

        info!(
            "Forged block {} with {} transactions",
            block.index,
            block.transactions.len()
        );

        self.accounts.apply_block(&block);
        self.persist_block(&block);

        Ok(Some(block))
    }

    /// Runs fork-choice against every known peer but `self_identity`.
    ///
    /// Returns whether the local chain was replaced, and the fork index from
    /// which persisted blocks were rewritten.
    pub async fn trigger_reconcile(
        &self,
        self_identity: &str,
    ) -> Result<(bool, usize), BlockchainError> {
        let peers = self.peers.read().addresses();
        let candidates = self
            .reconciler
            .fetch_candidates(self_identity, &peers)
            .await;

        if candidates.is_empty() {
            return Ok((false, 0));
        }

        let peer_count = self.peers.read().len();

        // Candidates are validated against a copy so the ledger stays
        // available for admissions meanwhile.
        let (local, pow) = {
            let ledger = self.ledger.lock();
            (ledger.chain().to_vec(), *ledger.pow())
        };
        let Some(selected) = ForkChoice::new(&local, peer_count, &pow).select(&candidates) else {
            info!("Our chain is authoritative");
            return Ok((false, 0));
        };

        let Some(adoption) = self.install_selected(&local, selected, &candidates, peer_count) else {
            info!("Our chain is authoritative");
            return Ok((false, 0));
        };

        if let Some(cancel) = self.mining_cancel.lock().as_ref() {
            cancel.store(true, Ordering::Relaxed);
        }

        info!(
            "Adopted chain of {} blocks from {}, fork index {}",
            adoption.chain.len(),
            adoption.peer,
            adoption.fork_index
        );

        self.accounts.rebuild(&adoption.chain);
        self.persist_chain(&adoption.chain, adoption.fork_index);

        Ok((true, adoption.fork_index))
    }

    /// Installs a chain selected against `local`, a copy taken before
    /// validation. If the ledger has moved on since, selection runs again
    /// against the current chain under the lock.
    fn install_selected(
        &self,
        local: &[Block],
        selected: Adoption,
        candidates: &[(String, ChainSnapshot)],
        peer_count: usize,
    ) -> Option<Adoption> {
        let mut ledger = self.ledger.lock();
        let unchanged = ledger.len() == local.len()
            && ledger.last_block().canonical_hash() == last_hash(local);

        let adoption = if unchanged {
            selected
        } else {
            debug!("Local chain changed during reconciliation, selecting again");
            let pow = *ledger.pow();
            ForkChoice::new(ledger.chain(), peer_count, &pow).select(candidates)?
        };

        ledger.install_chain(adoption.chain.clone());
        Some(adoption)
    }

    fn persist_block(&self, block: &Block) {
        let result = self.storage.save_block(block).and_then(|()| {
            for account in self.accounts.accounts_in(block) {
                self.storage.save_balance(&account.wallet, account.balance)?;
            }
            self.storage.flush()
        });

        if let Err(err) = result {
            error!("Failed to persist block {}: {}", block.index, err);
        }
    }

    fn persist_chain(&self, chain: &[Block], fork_index: usize) {
        let result = self
            .storage
            .save_chain_from(chain, fork_index)
            .and_then(|()| self.storage.clear_balances())
            .and_then(|()| {
                for account in self.accounts.get_all_accounts() {
                    self.storage.save_balance(&account.wallet, account.balance)?;
                }
                self.storage.flush()
            });

        if let Err(err) = result {
            error!("Failed to persist adopted chain: {}", err);
        }
    }
}

fn last_hash(chain: &[Block]) -> String {
    chain.last().map(Block::canonical_hash).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::blockchain::chain::tests::mine_blocks;
    use crate::blockchain::consensus::tests::{snapshot, MockTransport, PeerScript};
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::storage::tests::FlakyStore;
    use crate::blockchain::transaction::TransactionPayload;

    fn settings(reconcile_before_mining: bool) -> NodeSettings {
        NodeSettings {
            node_id: "miner-a".to_string(),
            identity: "a:5000".to_string(),
            difficulty: 1,
            peer_timeout: Duration::from_millis(200),
            reconcile_before_mining,
        }
    }

    fn node_with(transport: MockTransport, storage: BlockchainStorage, reconcile: bool) -> Node {
        Node::new(settings(reconcile), storage, Arc::new(transport))
    }

    fn node() -> Node {
        node_with(MockTransport::default(), BlockchainStorage::in_memory(), false)
    }

    #[tokio::test]
    async fn test_mine_is_noop_without_pending() {
        let node = node();

        assert!(node.trigger_mine().await.unwrap().is_none());
        assert_eq!(node.get_chain().chain_length, 1);
    }

    #[tokio::test]
    async fn test_mine_forges_valid_transactions_and_reward() {
        let storage = BlockchainStorage::in_memory();
        let node = node_with(MockTransport::default(), storage.clone(), false);
        let alice = Wallet::new();

        let hint = node.submit_signed_transaction(PendingSignature::sign(&alice, "bob", 5).unwrap());
        assert_eq!(hint, 2);

        let mut payload = TransactionPayload::new(&alice.public_key().0, "bob", 5);
        payload.amount = 500;
        let body = payload.to_json();
        node.submit_signed_transaction(PendingSignature::new(
            alice.sign(body.as_bytes()),
            body,
            alice.public_key().clone(),
        ));

        let block = node.trigger_mine().await.unwrap().unwrap();

        assert_eq!(block.index, 2);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].amount, 5);
        assert!(block.transactions[1].is_reward());
        assert_eq!(block.transactions[1].recipient, "miner-a");
        assert_eq!(node.pending_count(), 0);
        assert!(node.is_valid());

        assert_eq!(node.balance("bob"), 5);
        assert_eq!(node.balance(&alice.public_key().0), -5);
        assert_eq!(node.balance("miner-a"), 1);

        assert_eq!(storage.load_blocks().unwrap(), node.get_chain().chain[1..].to_vec());
        assert_eq!(storage.load_balance("bob").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_mining_survives_storage_outage() {
        let storage = BlockchainStorage::new(Arc::new(FlakyStore::new(usize::MAX)), 1);
        let node = node_with(MockTransport::default(), storage, false);

        node.submit_signed_transaction(PendingSignature::sign(&Wallet::new(), "bob", 1).unwrap());
        let block = node.trigger_mine().await.unwrap().unwrap();

        assert_eq!(block.index, 2);
        assert_eq!(node.get_chain().chain_length, 2);
    }

    #[tokio::test]
    async fn test_register_peer() {
        let node = node();

        assert_eq!(node.get_chain().nodes_length, 1);
        assert!(node.register_peer("b:5000").unwrap());
        assert!(!node.register_peer("http://b:5000").unwrap());
        assert!(!node.register_peer("a:5000").unwrap());
        assert!(node.register_peer(" ").is_err());
        assert_eq!(node.get_chain().nodes_length, 2);
    }

    /// Node A holds 3 blocks and knows 2 peers; B holds 3 different blocks
    /// and knows 5. The chains diverge at block 2.
    #[tokio::test]
    async fn test_reconcile_adopts_more_popular_tie() {
        let mut a = Ledger::new(ProofOfWork::new(1));
        let mut b = a.clone();
        mine_blocks(&mut a, "node-a", 2);
        mine_blocks(&mut b, "node-b", 2);

        let storage = BlockchainStorage::in_memory();
        for block in a.chain() {
            storage.save_block(block).unwrap();
        }
        let transport = MockTransport::with(vec![("b:5000", PeerScript::Serve(snapshot(&b, 5)))]);
        let node = node_with(transport, storage.clone(), false);
        node.load_from_store();
        node.register_peer("b:5000").unwrap();
        assert_eq!(node.balance("node-a"), 2);

        let (replaced, fork_index) = node.trigger_reconcile("a:5000").await.unwrap();

        assert!(replaced);
        assert_eq!(fork_index, 1);
        assert_eq!(node.get_chain().chain, b.chain());
        assert_eq!(storage.load_blocks().unwrap(), b.chain());
        assert_eq!(node.balance("node-a"), 0);
        assert_eq!(node.balance("node-b"), 2);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_longer_local_chain() {
        let mut a = Ledger::new(ProofOfWork::new(1));
        let mut b = a.clone();
        mine_blocks(&mut a, "node-a", 3);
        mine_blocks(&mut b, "node-b", 2);

        let transport = MockTransport::with(vec![
            ("b:5000", PeerScript::Serve(snapshot(&b, 50))),
            ("c:5000", PeerScript::Fail),
        ]);
        let node = node_with(transport, BlockchainStorage::in_memory(), false);
        node.ledger.lock().replace_chain(a.chain().to_vec()).unwrap();
        node.register_peer("b:5000").unwrap();
        node.register_peer("c:5000").unwrap();

        assert_eq!(node.trigger_reconcile("a:5000").await.unwrap(), (false, 0));
        assert_eq!(node.get_chain().chain, a.chain());
    }

    #[tokio::test]
    async fn test_reconcile_cancels_search_in_progress() {
        let mut b = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut b, "node-b", 2);
        let transport = MockTransport::with(vec![("b:5000", PeerScript::Serve(snapshot(&b, 1)))]);
        let node = node_with(transport, BlockchainStorage::in_memory(), false);
        node.register_peer("b:5000").unwrap();

        let cancel = Arc::new(AtomicBool::new(false));
        *node.mining_cancel.lock() = Some(Arc::clone(&cancel));

        assert_eq!(node.trigger_reconcile("a:5000").await.unwrap(), (true, 0));
        assert!(cancel.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_mining_yields_to_longer_peer_chain() {
        let mut b = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut b, "node-b", 3);
        let transport = MockTransport::with(vec![("b:5000", PeerScript::Serve(snapshot(&b, 1)))]);
        let node = node_with(transport, BlockchainStorage::in_memory(), true);
        node.register_peer("b:5000").unwrap();

        node.submit_signed_transaction(PendingSignature::sign(&Wallet::new(), "bob", 1).unwrap());

        assert!(node.trigger_mine().await.unwrap().is_none());
        assert_eq!(node.get_chain().chain, b.chain());
        assert_eq!(node.pending_count(), 1, "pool survives for the next attempt");

        // nothing left to adopt, so the next trigger forges on top of b
        let block = node.trigger_mine().await.unwrap().unwrap();
        assert_eq!(block.index, 5);
        assert_eq!(block.previous_hash, b.last_block().canonical_hash());
    }

    #[tokio::test]
    async fn test_submit_and_broadcast_skips_self() {
        let transport = Arc::new(MockTransport::default());
        let node = Node::new(settings(false), BlockchainStorage::in_memory(), transport.clone());
        node.register_peer("b:5000").unwrap();
        node.register_peer("c:5000").unwrap();

        let pending = PendingSignature::sign(&Wallet::new(), "bob", 2).unwrap();
        assert_eq!(node.submit_and_broadcast(pending.clone()).await, 2);

        let broadcasts = transport.broadcasts.lock();
        let mut targets: Vec<&str> = broadcasts.iter().map(|(peer, _)| peer.as_str()).collect();
        targets.sort();
        assert_eq!(targets, vec!["b:5000", "c:5000"]);
        assert!(broadcasts.iter().all(|(_, sent)| *sent == pending));
        assert_eq!(node.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_load_ignores_invalid_store() {
        let storage = BlockchainStorage::in_memory();
        let mut a = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut a, "x", 2);
        let mut broken = a.chain().to_vec();
        broken[2].previous_hash = "bad".to_string();
        for block in &broken {
            storage.save_block(block).unwrap();
        }

        let node = node_with(MockTransport::default(), storage, false);
        node.load_from_store();

        assert_eq!(node.get_chain().chain_length, 1);
    }

    #[tokio::test]
    async fn test_load_ignores_store_without_genesis() {
        let storage = BlockchainStorage::in_memory();
        let mut a = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut a, "x", 2);
        for block in &a.chain()[1..] {
            storage.save_block(block).unwrap();
        }

        let node = node_with(MockTransport::default(), storage, false);
        node.load_from_store();

        assert_eq!(node.get_chain().chain, vec![Block::genesis()]);
    }

    #[tokio::test]
    async fn test_load_from_empty_store_persists_genesis() {
        let storage = BlockchainStorage::in_memory();
        let node = node_with(MockTransport::default(), storage.clone(), false);
        node.load_from_store();

        assert_eq!(storage.load_blocks().unwrap(), vec![Block::genesis()]);
    }

    #[tokio::test]
    async fn test_register_peers_is_all_or_nothing() {
        let node = node();

        let batch = vec!["b:5000".to_string(), " ".to_string(), "c:5000".to_string()];
        assert!(node.register_peers(&batch).is_err());
        assert_eq!(node.peers(), vec!["a:5000"]);

        let batch = vec!["b:5000".to_string(), "http://a:5000/".to_string()];
        assert_eq!(node.register_peers(&batch).unwrap(), vec!["b:5000"]);
        assert_eq!(node.peers(), vec!["a:5000", "b:5000"]);
    }

    fn selection_against(
        node: &Node,
        peer: &Ledger,
    ) -> (Vec<Block>, Adoption, Vec<(String, ChainSnapshot)>) {
        let local = node.ledger.lock().chain().to_vec();
        let candidates = vec![("b:5000".to_string(), snapshot(peer, 1))];
        let pow = ProofOfWork::new(1);
        let selected = ForkChoice::new(&local, 1, &pow).select(&candidates).unwrap();
        (local, selected, candidates)
    }

    #[tokio::test]
    async fn test_install_selected_drops_candidate_outgrown_meanwhile() {
        let node = node();
        let mut peer = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut peer, "node-b", 2);
        let (local, selected, candidates) = selection_against(&node, &peer);

        let mut grown = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut grown, "node-a", 3);
        node.ledger.lock().replace_chain(grown.chain().to_vec()).unwrap();

        assert!(node.install_selected(&local, selected, &candidates, 1).is_none());
        assert_eq!(node.get_chain().chain, grown.chain());
    }

    #[tokio::test]
    async fn test_install_selected_reselects_against_current_chain() {
        let node = node();
        let mut peer = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut peer, "node-b", 2);
        let (local, selected, candidates) = selection_against(&node, &peer);
        assert_eq!(selected.fork_index, 0);

        let mut grown = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut grown, "node-a", 1);
        node.ledger.lock().replace_chain(grown.chain().to_vec()).unwrap();

        let adoption = node.install_selected(&local, selected, &candidates, 1).unwrap();
        assert_eq!(adoption.fork_index, 1);
        assert_eq!(node.get_chain().chain, peer.chain());
    }

    #[tokio::test]
    async fn test_load_repairs_stored_balances() {
        let storage = BlockchainStorage::in_memory();
        let mut a = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut a, "node-a", 2);
        for block in a.chain() {
            storage.save_block(block).unwrap();
        }
        storage.save_balance("node-a", 40).unwrap();

        let node = node_with(MockTransport::default(), storage.clone(), false);
        node.load_from_store();

        assert_eq!(node.balance("node-a"), 2);
        assert_eq!(storage.load_balance("node-a").unwrap(), 2);
    }
}
