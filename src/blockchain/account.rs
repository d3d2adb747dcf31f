use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::block::Block;

/// Balance of one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Account {
    /// Wallet id
    pub wallet: String,

    /// Net amount received minus amount sent. Transfers are not checked
    /// against funds, so this can go negative.
    pub balance: i64,
}

/// Balances derived from the transactions on the chain.
///
/// Nothing here is authoritative: the state is rebuilt from blocks whenever
/// the chain changes shape.
#[derive(Debug, Default)]
pub struct AccountState {
    balances: DashMap<String, i64>,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays a whole chain into a fresh state
    pub fn from_chain(chain: &[Block]) -> Self {
        let state = Self::new();
        for block in chain {
            state.apply_block(block);
        }
        state
    }

    /// Applies every transfer in `block`. Mining rewards only credit.
    pub fn apply_block(&self, block: &Block) {
        for transaction in &block.transactions {
            let amount = i64::try_from(transaction.amount).unwrap_or(i64::MAX);

            if !transaction.is_reward() {
                let mut sender = self.balances.entry(transaction.sender.clone()).or_insert(0);
                *sender = sender.saturating_sub(amount);
            }

            let mut recipient = self.balances.entry(transaction.recipient.clone()).or_insert(0);
            *recipient = recipient.saturating_add(amount);
        }
    }

    /// Drops everything and replays `chain`
    pub fn rebuild(&self, chain: &[Block]) {
        self.balances.clear();
        for block in chain {
            self.apply_block(block);
        }
    }

    pub fn balance(&self, wallet: &str) -> i64 {
        self.balances.get(wallet).map(|b| *b).unwrap_or(0)
    }

    /// Accounts touched by the given block
    pub fn accounts_in(&self, block: &Block) -> Vec<Account> {
        let mut wallets: Vec<&str> = block
            .transactions
            .iter()
            .flat_map(|t| [t.sender.as_str(), t.recipient.as_str()])
            .filter(|wallet| *wallet != super::transaction::REWARD_SENDER)
            .collect();
        wallets.sort_unstable();
        wallets.dedup();

        wallets
            .into_iter()
            .map(|wallet| Account {
                wallet: wallet.to_string(),
                balance: self.balance(wallet),
            })
            .collect()
    }

    pub fn get_all_accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .balances
            .iter()
            .map(|entry| Account {
                wallet: entry.key().clone(),
                balance: *entry.value(),
            })
            .collect();
        accounts.sort_by(|a, b| a.wallet.cmp(&b.wallet));
        accounts
    }
}
