use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{sha256_hex, verify_signature, CryptoError, DigitalSignature, PublicKey, Wallet};

/// Sender id used for mining rewards
pub const REWARD_SENDER: &str = "0";

/// Amount credited to the miner of each block
pub const MINING_REWARD: u64 = 1;

/// Errors that can occur while validating a submitted transaction
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Hash mismatch: payload claims {claimed}, recomputed {computed}")]
    HashMismatch { claimed: String, computed: String },

    #[error("Payload sender {sender} was not signed for by {signer}")]
    SenderMismatch { sender: String, signer: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// A validated transfer, as stored inside a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Amount being transferred
    pub amount: u64,

    /// Digest of {sender, recipient, amount}
    pub hash: String,

    /// Recipient's wallet id
    pub recipient: String,

    /// Sender's wallet id, or `"0"` for mining rewards
    pub sender: String,

    /// Signature over the payload (empty for mining rewards)
    pub signature: String,
}

impl Transaction {
    /// Hash commitment over the transfer fields, independent of key order
    pub fn compute_hash(sender: &str, recipient: &str, amount: u64) -> String {
        let data = serde_json::json!({
            "sender": sender,
            "recipient": recipient,
            "amount": amount,
        });

        sha256_hex(data.to_string().as_bytes())
    }

    /// Creates the reward transaction crediting `node_id`
    pub fn reward(node_id: &str) -> Self {
        Transaction {
            amount: MINING_REWARD,
            hash: Self::compute_hash(REWARD_SENDER, node_id, MINING_REWARD),
            recipient: node_id.to_string(),
            sender: REWARD_SENDER.to_string(),
            signature: String::new(),
        }
    }

    pub fn is_reward(&self) -> bool {
        self.sender == REWARD_SENDER
    }
}

/// The document a wallet signs when submitting a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransactionPayload {
    pub amount: u64,
    pub hash: String,
    pub recipient: String,
    pub sender: String,
}

impl TransactionPayload {
    pub fn new(sender: &str, recipient: &str, amount: u64) -> Self {
        TransactionPayload {
            amount,
            hash: Transaction::compute_hash(sender, recipient, amount),
            recipient: recipient.to_string(),
            sender: sender.to_string(),
        }
    }

    /// Sorted-key JSON form, the exact bytes that get signed
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "amount": self.amount,
            "hash": self.hash,
            "recipient": self.recipient,
            "sender": self.sender,
        })
        .to_string()
    }

    pub fn parse(payload: &str) -> Result<Self, TransactionError> {
        serde_json::from_str(payload).map_err(|e| TransactionError::MalformedPayload(e.to_string()))
    }

    /// Checks the embedded hash against one recomputed from the fields
    pub fn verify_hash(&self) -> Result<(), TransactionError> {
        let computed = Transaction::compute_hash(&self.sender, &self.recipient, self.amount);
        if computed != self.hash {
            return Err(TransactionError::HashMismatch {
                claimed: self.hash.clone(),
                computed,
            });
        }
        Ok(())
    }
}

/// A submitted transaction that has not been validated yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PendingSignature {
    pub signature: DigitalSignature,

    /// Serialized payload exactly as it was signed
    pub payload: String,

    pub public_key: PublicKey,
}

impl PendingSignature {
    pub fn new(signature: DigitalSignature, payload: String, public_key: PublicKey) -> Self {
        PendingSignature {
            signature,
            payload,
            public_key,
        }
    }

    /// Builds and signs a transfer from `wallet` to `recipient`
    pub fn sign(wallet: &Wallet, recipient: &str, amount: u64) -> Result<Self, TransactionError> {
        if amount == 0 {
            return Err(TransactionError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        let payload = TransactionPayload::new(&wallet.public_key().0, recipient, amount).to_json();
        let signature = wallet.sign(payload.as_bytes());

        Ok(Self::new(signature, payload, wallet.public_key().clone()))
    }

    /// Verifies the signature, that the signing key is the payload's sender,
    /// then the hash commitment, and promotes the entry to a [`Transaction`].
    pub fn validate(&self) -> Result<Transaction, TransactionError> {
        if !verify_signature(self.payload.as_bytes(), &self.signature, &self.public_key)? {
            return Err(TransactionError::InvalidSignature);
        }

        let payload = TransactionPayload::parse(&self.payload)?;
        if payload.sender != self.public_key.0 {
            return Err(TransactionError::SenderMismatch {
                sender: payload.sender,
                signer: self.public_key.0.clone(),
            });
        }
        payload.verify_hash()?;

        Ok(Transaction {
            amount: payload.amount,
            hash: payload.hash,
            recipient: payload.recipient,
            sender: payload.sender,
            signature: self.signature.0.clone(),
        })
    }
}
