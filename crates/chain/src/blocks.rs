//! New-block notifications over WebSocket subscription or HTTP polling.

use alloy::eips::BlockNumberOrTag;
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::connection::{BlockSource, NewBlock};
use crate::error::{ChainError, ChainResult};

/// Buffered notifications per subscriber before lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Background task fanning new blocks out to subscribers.
///
/// The task stops when the watcher is dropped.
pub struct BlockWatcher {
    sender: broadcast::Sender<NewBlock>,
    task: JoinHandle<()>,
}

impl BlockWatcher {
    /// Poll `eth_blockNumber` every `poll_interval` and announce advances.
    pub fn poll_http(rpc_url: &str, poll_interval: Duration) -> ChainResult<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::InvalidUrl(format!("{rpc_url}: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let tx = sender.clone();

        info!(rpc = rpc_url, interval_ms = poll_interval.as_millis(), "Polling for new blocks");

        let task = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_seen: Option<u64> = None;

            loop {
                ticker.tick().await;

                let number = match provider.get_block_number().await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "Block number poll failed");
                        continue;
                    }
                };
                if last_seen.is_some_and(|last| number <= last) {
                    continue;
                }

                let timestamp = match provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .await
                {
                    Ok(Some(block)) => block.header.timestamp,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(block = number, error = %e, "Block fetch failed");
                        continue;
                    }
                };

                last_seen = Some(number);
                debug!(block = number, "New block");
                // No subscribers is fine
                let _ = tx.send(NewBlock { number, timestamp });
            }
        });

        Ok(Self { sender, task })
    }

    /// Subscribe to `newHeads` over WebSocket.
    pub async fn connect_ws(ws_url: &str) -> ChainResult<Self> {
        let ws = WsConnect::new(ws_url);
        let provider = ProviderBuilder::new().on_ws(ws).await?;
        let subscription = provider.subscribe_blocks().await?;
        info!(ws_url = ws_url, "WebSocket connected for new blocks");

        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let tx = sender.clone();

        let task = tokio::spawn(async move {
            // Provider must outlive the subscription stream
            let _provider = provider;
            let mut stream = subscription.into_stream();

            while let Some(header) = stream.next().await {
                debug!(block = header.number, "New block");
                let _ = tx.send(NewBlock {
                    number: header.number,
                    timestamp: header.timestamp,
                });
            }
            warn!("Block subscription ended");
        });

        Ok(Self { sender, task })
    }

    /// Watcher fed by the caller instead of a node.
    pub fn manual() -> (Self, broadcast::Sender<NewBlock>) {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(std::future::pending::<()>());
        (
            Self {
                sender: sender.clone(),
                task,
            },
            sender,
        )
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl BlockSource for BlockWatcher {
    fn subscribe(&self) -> broadcast::Receiver<NewBlock> {
        self.sender.subscribe()
    }
}

impl Drop for BlockWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
