use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::task::JoinHandle;

use crate::node::Node;

/// Triggers [`Node::trigger_mine`] every `interval`.
///
/// A failed attempt is logged and the loop carries on.
pub fn spawn_mining_loop(node: Arc<Node>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match node.trigger_mine().await {
                Ok(Some(block)) => info!("Scheduled mining forged block {}", block.index),
                Ok(None) => {}
                Err(err) => error!("Scheduled mining failed: {}", err),
            }
        }
    })
}
