//! Fork-choice between the local chain and the chains of peers.
//!
//! A peer's chain is adopted when it validates end to end and either is
//! strictly longer than the best seen so far, or ties the local length while
//! its node reports knowing more peers than this node does. The second rule
//! is a popularity heuristic, not a safety property.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::block::Block;
use super::chain::{difference_chain, validate_chain};
use super::peers::PeerRegistry;
use super::pow::ProofOfWork;
use crate::network::{NetworkError, PeerTransport};

/// The document a node serves about its chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChainSnapshot {
    pub chain: Vec<Block>,
    pub chain_length: usize,
    /// Number of peers the serving node knows, itself included
    pub nodes_length: usize,
}

/// A peer chain chosen over the local one
#[derive(Debug, Clone, PartialEq)]
pub struct Adoption {
    pub peer: String,
    pub chain: Vec<Block>,
    /// Persisted blocks from this position (0-based) on must be rewritten
    pub fork_index: usize,
}

/// Pure selection over already fetched candidates
#[derive(Debug, Clone, Copy)]
pub struct ForkChoice<'a> {
    local: &'a [Block],
    local_peer_count: usize,
    pow: &'a ProofOfWork,
}

impl<'a> ForkChoice<'a> {
    pub fn new(local: &'a [Block], local_peer_count: usize, pow: &'a ProofOfWork) -> Self {
        Self {
            local,
            local_peer_count,
            pow,
        }
    }

    /// Walks the candidates in order and returns the last one adopted, if any
    pub fn select(&self, candidates: &[(String, ChainSnapshot)]) -> Option<Adoption> {
        let original_length = self.local.len();
        let mut max_length = original_length;
        let mut best: Option<(&str, &[Block])> = None;

        for (peer, snapshot) in candidates {
            let length = snapshot.chain.len();

            if snapshot.chain_length != length {
                warn!(
                    "Ignoring chain from {}: reports {} blocks but sent {}",
                    peer, snapshot.chain_length, length
                );
                continue;
            }

            let longer = length > max_length;
            let popular_tie = length == max_length
                && max_length == original_length
                && snapshot.nodes_length > self.local_peer_count;

            if !longer && !popular_tie {
                continue;
            }

            if let Err(err) = validate_chain(&snapshot.chain, self.pow) {
                warn!("Ignoring chain from {}: {}", peer, err);
                continue;
            }

            max_length = length;
            best = Some((peer.as_str(), snapshot.chain.as_slice()));
        }

        best.map(|(peer, chain)| Adoption {
            peer: peer.to_string(),
            chain: chain.to_vec(),
            fork_index: difference_chain(self.local, chain),
        })
    }
}

/// Fetches peer chains concurrently, each under its own timeout
#[derive(Clone)]
pub struct Reconciler {
    transport: Arc<dyn PeerTransport>,
    peer_timeout: Duration,
}

impl Reconciler {
    pub fn new(transport: Arc<dyn PeerTransport>, peer_timeout: Duration) -> Self {
        Self {
            transport,
            peer_timeout,
        }
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    async fn fetch_one(&self, peer: String) -> Result<(String, ChainSnapshot), NetworkError> {
        match tokio::time::timeout(self.peer_timeout, self.transport.fetch_chain(&peer)).await {
            Ok(Ok(snapshot)) => Ok((peer, snapshot)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(NetworkError::Timeout {
                peer,
                millis: self.peer_timeout.as_millis(),
            }),
        }
    }

    /// Snapshots of every reachable peer except `self_identity`, in peer
    /// address order. Failed peers are logged and left out.
    pub async fn fetch_candidates(
        &self,
        self_identity: &str,
        peers: &[String],
    ) -> Vec<(String, ChainSnapshot)> {
        let me = PeerRegistry::normalize(self_identity).unwrap_or_default();

        let requests = peers
            .iter()
            .filter(|peer| **peer != me)
            .map(|peer| self.fetch_one(peer.clone()));

        let mut candidates = Vec::new();
        for result in join_all(requests).await {
            match result {
                Ok(candidate) => candidates.push(candidate),
                Err(err) => warn!("Skipping peer during reconciliation: {}", err),
            }
        }

        info!("Fetched {} candidate chains from {} peers", candidates.len(), peers.len());
        candidates
    }
}
