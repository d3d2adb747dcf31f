use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerError {
    #[error("Invalid peer address: {0:?}")]
    InvalidAddress(String),
}

/// Known peer addresses (`host:port`).
///
/// Membership is advisory: nothing here authenticates or probes a peer.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    nodes: HashSet<String>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strips a URL scheme and trailing slashes so `http://a:1/` and `a:1`
    /// are the same peer.
    pub fn normalize(address: &str) -> Result<String, PeerError> {
        let trimmed = address.trim();
        let without_scheme = trimmed
            .strip_prefix("http://")
            .or_else(|| trimmed.strip_prefix("https://"))
            .unwrap_or(trimmed);
        let normalized = without_scheme.trim_end_matches('/');

        if normalized.is_empty() || normalized.contains(char::is_whitespace) {
            return Err(PeerError::InvalidAddress(address.to_string()));
        }
        Ok(normalized.to_string())
    }

    /// Adds a peer. Registering the same address twice is a no-op.
    ///
    /// Returns whether the peer was new.
    pub fn register(&mut self, address: &str) -> Result<bool, PeerError> {
        let address = Self::normalize(address)?;
        Ok(self.nodes.insert(address))
    }

    pub fn contains(&self, address: &str) -> bool {
        Self::normalize(address)
            .map(|address| self.nodes.contains(&address))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Addresses in sorted order
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.nodes.iter().cloned().collect();
        addresses.sort();
        addresses
    }
}
