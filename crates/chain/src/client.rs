//! Block follower: walks heights in order and emits hydrated blocks.

use crate::metrics::{observe_node_height, CURSOR_HEIGHT};
use crate::rpc::{call, BatchRpc, RpcError, RpcRequest};
use crate::types::{Block, BlockchainInfo, BlockResults, NodeStatus};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Block metadata requests per `blockchain_info` call. Hard cap imposed by the
/// remote protocol; do not raise without confirming the node accepts more.
pub const BLOCK_BATCH: usize = 20;

#[derive(Debug, Error)]
pub enum ChainError {
    /// Up-to-date: the chain has no more data right now.
    #[error("no more data on blockchain")]
    NoData,
    /// The quit channel fired.
    #[error("receive on quit channel")]
    Quit,
    /// The block channel receiver went away.
    #[error("block channel closed")]
    Closed,
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The node violated the response contract. Not retryable.
    #[error("chain protocol violation: {0}")]
    Protocol(String),
}

/// Node access for the follower. Cheap to clone; the transport is shared.
#[derive(Clone)]
pub struct Client {
    rpc: Arc<dyn BatchRpc>,
}

impl Client {
    pub fn new(rpc: Arc<dyn BatchRpc>) -> Self {
        Self { rpc }
    }

    pub async fn status(&self) -> Result<NodeStatus, RpcError> {
        call(self.rpc.as_ref(), "status", json!({})).await
    }

    /// Stream blocks ≥ `offset` to `out` in ascending height order with no gaps.
    ///
    /// Returns the next height in line together with the termination cause:
    /// [ChainError::NoData] once the chain is exhausted (the caller decides
    /// whether to retry after a delay), [ChainError::Quit] on quit, or the
    /// failure that stopped the follower. Every send is guarded on `quit`.
    pub async fn follow(
        &self,
        out: &mpsc::Sender<Block>,
        mut offset: i64,
        quit: &mut watch::Receiver<bool>,
    ) -> (i64, ChainError) {
        let mut status = match self.status().await {
            Ok(status) => status,
            Err(e) => return (offset, e.into()),
        };
        tracing::info!(
            node = %status.node_info.id,
            addr = %status.node_info.listen_addr,
            network = %status.node_info.network,
            "connected to node"
        );
        tracing::info!(
            hash = %status.sync_info.earliest_block_hash,
            height = status.sync_info.earliest_block_height,
            time = %status.sync_info.earliest_block_time,
            "earliest node block"
        );
        tracing::info!(
            hash = %status.sync_info.latest_block_hash,
            height = status.sync_info.latest_block_height,
            time = %status.sync_info.latest_block_time,
            "latest node block"
        );

        let node = status.node_info.id.clone();
        let cursor_height = CURSOR_HEIGHT.with_label_values(&[node.as_str()]);
        cursor_height.set(offset);
        observe_node_height(&node, status.sync_info.latest_block_height);

        loop {
            // The node gives no push notification for new data; poll status
            // once the known range is exhausted.
            if offset > status.sync_info.latest_block_height {
                status = match self.status().await {
                    Ok(status) => status,
                    Err(e) => return (offset, e.into()),
                };
                observe_node_height(&node, status.sync_info.latest_block_height);

                if offset > status.sync_info.latest_block_height {
                    return (offset, ChainError::NoData);
                }
            }

            let batch = match self.fetch_blocks(offset).await {
                Ok(batch) => batch,
                Err(e) => return (offset, e),
            };

            if batch.is_empty() {
                // Must still honor quit on a data-less spin.
                if *quit.borrow() {
                    return (offset, ChainError::Quit);
                }
                continue;
            }

            for block in batch {
                let height = block.height;
                if *quit.borrow() {
                    return (offset, ChainError::Quit);
                }
                tokio::select! {
                    _ = quit.changed() => return (offset, ChainError::Quit),
                    sent = out.send(block) => {
                        if sent.is_err() {
                            return (offset, ChainError::Closed);
                        }
                        offset = height + 1;
                        cursor_height.set(offset);
                    }
                }
            }
        }
    }

    /// Resolve up to [BLOCK_BATCH] blocks starting at `offset`: one metadata
    /// range call, then one batched `block_results` round-trip.
    async fn fetch_blocks(&self, offset: i64) -> Result<Vec<Block>, ChainError> {
        let last = offset + BLOCK_BATCH as i64 - 1;
        let info: BlockchainInfo = call(
            self.rpc.as_ref(),
            "blockchain_info",
            json!({"minHeight": offset.to_string(), "maxHeight": last.to_string()}),
        )
        .await?;

        if info.block_metas.is_empty() {
            return Ok(Vec::new());
        }

        // The node answers in descending height order; anything else means the
        // node or a proxy is misbehaving.
        for pair in info.block_metas.windows(2) {
            let (previous, height) = (pair[0].header.height, pair[1].header.height);
            if height >= previous {
                return Err(ChainError::Protocol(format!(
                    "blockchain_info {offset}-{last} got height {height} after {previous}"
                )));
            }
        }
        let high = info.block_metas[0].header.height;
        let low = info.block_metas[info.block_metas.len() - 1].header.height;
        if high > last || low < offset {
            return Err(ChainError::Protocol(format!(
                "blockchain_info {offset}-{last} got {low}-{high}"
            )));
        }

        // Ascending from here on; one round-trip for the whole group.
        let calls: Vec<RpcRequest> = info
            .block_metas
            .iter()
            .rev()
            .map(|meta| {
                RpcRequest::new(
                    "block_results",
                    json!({"height": meta.header.height.to_string()}),
                )
            })
            .collect();
        let results = self.rpc.execute(&calls).await.map_err(ChainError::from)?;

        let mut blocks = Vec::with_capacity(results.len());
        for (meta, value) in info.block_metas.iter().rev().zip(results) {
            let results: BlockResults = serde_json::from_value(value)
                .map_err(|e| ChainError::Rpc(RpcError::Framing(e.to_string())))?;
            let requested = meta.header.height;
            if results.height != requested {
                return Err(ChainError::Protocol(format!(
                    "block_results({requested}) got height {} instead",
                    results.height
                )));
            }
            let hash = hex::decode(&meta.block_id.hash).map_err(|e| {
                ChainError::Protocol(format!("block hash at height {requested}: {e}"))
            })?;
            blocks.push(Block {
                height: requested,
                time: meta.header.time,
                hash,
                results,
            });
        }
        Ok(blocks)
    }
}
