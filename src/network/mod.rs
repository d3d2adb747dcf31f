// Network module
//
// Request/response plumbing used to talk to peer nodes:
// - Fetching a peer's chain snapshot for fork-choice
// - Forwarding signed submissions to peers

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::blockchain::consensus::ChainSnapshot;
use crate::blockchain::transaction::PendingSignature;

pub use http::HttpTransport;

/// Errors that can occur while talking to a peer
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("Peer {peer} answered with status {status}")]
    BadStatus { peer: String, status: u16 },

    #[error("Peer {peer} sent an undecodable response: {reason}")]
    Decode { peer: String, reason: String },

    #[error("Peer {peer} timed out after {millis} ms")]
    Timeout { peer: String, millis: u128 },
}

/// Transport used by the node to reach its peers
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Fetches `{chain, chain_length, nodes_length}` from `peer`
    async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot, NetworkError>;

    /// Forwards a signed submission to `peer`
    async fn broadcast(&self, peer: &str, submission: &PendingSignature) -> Result<(), NetworkError>;
}
