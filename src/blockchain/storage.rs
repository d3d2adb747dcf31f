use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;
use sled::Db;
use thiserror::Error;

use super::block::Block;

/// Key prefix of stored blocks, followed by the block index
pub const BLOCK_KEY_PREFIX: &str = "block-";

/// Key prefix of stored wallet balances, followed by the wallet id
pub const WALLET_KEY_PREFIX: &str = "wallet-";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),
}

/// String keyed byte store the node persists into
pub trait KvStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Every entry in the store, in key order
    fn iter_all(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// On-disk store backed by sled
pub struct SledStore {
    db: Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Ok(Self { db: sled::open(path)? })
    }
}

impl KvStore for SledStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key.as_bytes())?.map(|value| value.to_vec()))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    fn iter_all(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut entries = Vec::new();
        for result in self.db.iter() {
            let (key, value) = result?;
            entries.push((String::from_utf8_lossy(&key).to_string(), value.to_vec()));
        }
        Ok(entries)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Volatile store, used when no data directory is available and in tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn iter_all(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

pub fn block_key(index: u64) -> String {
    format!("{}{}", BLOCK_KEY_PREFIX, index)
}

pub fn wallet_key(wallet: &str) -> String {
    format!("{}{}", WALLET_KEY_PREFIX, wallet)
}

/// Block and balance persistence on top of a [`KvStore`].
///
/// Every write is attempted `1 + retries` times before the error is
/// returned. Callers treat failures as non-fatal.
#[derive(Clone)]
pub struct BlockchainStorage {
    store: Arc<dyn KvStore>,
    retries: usize,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage")
            .field("retries", &self.retries)
            .finish()
    }
}

impl BlockchainStorage {
    pub fn new(store: Arc<dyn KvStore>, retries: usize) -> Self {
        Self { store, retries }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), 0)
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    fn with_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.retries => {
                    attempt += 1;
                    warn!("Storage {} failed (attempt {}): {}", what, attempt, err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Saves a block under `block-<index>` as canonical JSON
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let key = block_key(block.index);
        let value = block.canonical_json();
        self.with_retry("put", || self.store.put(&key, value.as_bytes()))
    }

    /// Persists a replacement chain: blocks from position `fork_index` on are
    /// rewritten, stored blocks past the new tip are deleted.
    pub fn save_chain_from(&self, chain: &[Block], fork_index: usize) -> Result<(), StorageError> {
        for block in chain.iter().skip(fork_index) {
            self.save_block(block)?;
        }

        let tip = chain.len() as u64;
        for index in self.stored_block_indexes()? {
            if index > tip {
                let key = block_key(index);
                self.with_retry("delete", || self.store.delete(&key))?;
            }
        }

        self.flush()
    }

    fn stored_block_indexes(&self) -> Result<Vec<u64>, StorageError> {
        let entries = self.with_retry("scan", || self.store.iter_all())?;
        Ok(entries
            .iter()
            .filter_map(|(key, _)| key.strip_prefix(BLOCK_KEY_PREFIX)?.parse().ok())
            .collect())
    }

    /// Loads every stored block, sorted by index.
    ///
    /// Entries that fail to decode are skipped with a warning.
    pub fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::new();
        let mut deserialization_errors = Vec::new();

        for (key, value) in self.with_retry("scan", || self.store.iter_all())? {
            if !key.starts_with(BLOCK_KEY_PREFIX) {
                continue;
            }
            match serde_json::from_slice::<Block>(&value) {
                Ok(block) => blocks.push(block),
                Err(e) => deserialization_errors.push(format!("{}: {}", key, e)),
            }
        }

        if !deserialization_errors.is_empty() {
            warn!(
                "Some blocks could not be deserialized: {}",
                deserialization_errors.join(", ")
            );
        }

        blocks.sort_by_key(|block| block.index);
        Ok(blocks)
    }

    pub fn save_balance(&self, wallet: &str, balance: i64) -> Result<(), StorageError> {
        let key = wallet_key(wallet);
        let value = bincode::serialize(&balance)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.with_retry("put", || self.store.put(&key, &value))
    }

    pub fn load_balance(&self, wallet: &str) -> Result<i64, StorageError> {
        let key = wallet_key(wallet);
        match self.with_retry("get", || self.store.get(&key))? {
            Some(value) => bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string())),
            None => Err(StorageError::NotFound(format!("Balance of {} not found", wallet))),
        }
    }

    /// Removes every stored balance
    pub fn clear_balances(&self) -> Result<(), StorageError> {
        for (key, _) in self.with_retry("scan", || self.store.iter_all())? {
            if key.starts_with(WALLET_KEY_PREFIX) {
                self.with_retry("delete", || self.store.delete(&key))?;
            }
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.with_retry("flush", || self.store.flush())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::blockchain::chain::tests::mine_blocks;
    use crate::blockchain::chain::Ledger;
    use crate::blockchain::pow::ProofOfWork;

    /// Store that fails its first `failures` calls, then behaves
    pub(crate) struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        pub(crate) fn new(failures: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicUsize::new(failures),
            }
        }

        fn check(&self) -> Result<(), StorageError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::NotFound("store offline".to_string()));
            }
            Ok(())
        }
    }

    impl KvStore for FlakyStore {
        fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
            self.check()?;
            self.inner.put(key, value)
        }

        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.check()?;
            self.inner.get(key)
        }

        fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.check()?;
            self.inner.delete(key)
        }

        fn iter_all(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
            self.check()?;
            self.inner.iter_all()
        }
    }

    fn sample_chain(blocks: usize) -> Vec<Block> {
        let mut ledger = Ledger::new(ProofOfWork::new(1));
        mine_blocks(&mut ledger, "miner", blocks);
        ledger.chain().to_vec()
    }

    #[test]
    fn test_block_keys() {
        assert_eq!(block_key(7), "block-7");
        assert_eq!(wallet_key("abc"), "wallet-abc");
    }

    #[test]
    fn test_save_and_load_blocks() {
        let storage = BlockchainStorage::in_memory();
        let chain = sample_chain(3);

        // stored out of order on purpose
        for block in chain.iter().rev() {
            storage.save_block(block).unwrap();
        }

        assert_eq!(storage.load_blocks().unwrap(), chain);
    }

    #[test]
    fn test_load_skips_foreign_and_corrupt_entries() {
        let storage = BlockchainStorage::in_memory();
        storage.save_block(&Block::genesis()).unwrap();
        storage.store().put("block-2", b"not json").unwrap();
        storage.save_balance("alice", 3).unwrap();

        assert_eq!(storage.load_blocks().unwrap(), vec![Block::genesis()]);
    }

    #[test]
    fn test_save_chain_from_rewrites_tail_only() {
        let storage = BlockchainStorage::in_memory();
        let old = sample_chain(4);
        for block in &old {
            storage.save_block(block).unwrap();
        }

        let mut new = old[..2].to_vec();
        new.push(Block::new(3, Vec::new(), 1, new[1].canonical_hash()));

        storage.save_chain_from(&new, 2).unwrap();

        let stored = storage.load_blocks().unwrap();
        assert_eq!(stored, new);
    }

    #[test]
    fn test_balances_round_trip() {
        let storage = BlockchainStorage::in_memory();
        storage.save_balance("alice", -4).unwrap();

        assert_eq!(storage.load_balance("alice").unwrap(), -4);
        assert!(matches!(
            storage.load_balance("bob"),
            Err(StorageError::NotFound(_))
        ));

        storage.clear_balances().unwrap();
        assert!(storage.load_balance("alice").is_err());
    }

    #[test]
    fn test_bounded_retry() {
        let storage = BlockchainStorage::new(Arc::new(FlakyStore::new(2)), 2);
        storage.save_block(&Block::genesis()).unwrap();
        assert_eq!(storage.load_blocks().unwrap().len(), 1);

        let storage = BlockchainStorage::new(Arc::new(FlakyStore::new(3)), 1);
        assert!(storage.save_block(&Block::genesis()).is_err());
    }

    #[test]
    fn test_sled_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        store.put("block-1", b"one").unwrap();
        store.put("wallet-a", b"two").unwrap();
        assert_eq!(store.get("block-1").unwrap(), Some(b"one".to_vec()));

        store.delete("block-1").unwrap();
        assert_eq!(store.get("block-1").unwrap(), None);
        assert_eq!(
            store.iter_all().unwrap(),
            vec![("wallet-a".to_string(), b"two".to_vec())]
        );
        store.flush().unwrap();
    }
}
