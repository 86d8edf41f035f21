//! Chain follower for the indexer: batched RPC access to a consensus node
//! and in-order block delivery.
//!
//! [Client::follow] walks heights chronologically with no gaps, validating the
//! node's response framing as it goes. Framing violations are fatal by design;
//! a node that reorders or mislabels blocks cannot be indexed safely.

pub mod client;
pub mod metrics;
pub mod rpc;
pub mod types;

pub use client::{ChainError, Client, BLOCK_BATCH};
pub use rpc::{BatchRpc, HttpRpc, RpcError, RpcRequest};
pub use types::{Block, BlockMeta, BlockResults, EventAttr, NodeStatus, RawEvent, TxResult};
