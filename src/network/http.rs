use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::{NetworkError, PeerTransport};
use crate::blockchain::consensus::ChainSnapshot;
use crate::blockchain::transaction::PendingSignature;

/// [`PeerTransport`] speaking the node's own HTTP API.
///
/// Peers are addressed as `host:port`; requests go to `GET /chain` and
/// `POST /transactions/signed`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkError::Unreachable {
                peer: String::new(),
                reason: e.to_string(),
            })?;

        Ok(Self { client })
    }

    fn url(peer: &str, path: &str) -> String {
        format!("http://{}{}", peer, path)
    }

    fn unreachable(peer: &str, err: reqwest::Error) -> NetworkError {
        NetworkError::Unreachable {
            peer: peer.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot, NetworkError> {
        let url = Self::url(peer, "/chain");
        debug!("Fetching chain from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unreachable(peer, e))?;

        if !response.status().is_success() {
            return Err(NetworkError::BadStatus {
                peer: peer.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .json::<ChainSnapshot>()
            .await
            .map_err(|e| NetworkError::Decode {
                peer: peer.to_string(),
                reason: e.to_string(),
            })
    }

    async fn broadcast(&self, peer: &str, submission: &PendingSignature) -> Result<(), NetworkError> {
        let url = Self::url(peer, "/transactions/signed");

        let response = self
            .client
            .post(&url)
            .json(submission)
            .send()
            .await
            .map_err(|e| Self::unreachable(peer, e))?;

        if !response.status().is_success() {
            return Err(NetworkError::BadStatus {
                peer: peer.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}
