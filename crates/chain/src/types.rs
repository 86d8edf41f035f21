//! Wire types for the node RPC.
//!
//! The node encodes 64-bit integers as JSON strings and timestamps as RFC 3339;
//! the `de` helpers below normalize both. Hashes arrive hex-encoded.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A chain record, fully hydrated: metadata plus per-transaction event lists.
#[derive(Debug, Clone)]
pub struct Block {
    /// Sequence identifier, strictly increasing from 1.
    pub height: i64,
    /// Establishment timestamp.
    pub time: DateTime<Utc>,
    /// Content identifier.
    pub hash: Vec<u8>,
    pub results: BlockResults,
}

/// `status` response.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeStatus {
    pub node_info: NodeInfo,
    pub sync_info: SyncInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub listen_addr: String,
    pub network: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncInfo {
    pub earliest_block_hash: String,
    #[serde(deserialize_with = "de::i64_str")]
    pub earliest_block_height: i64,
    pub earliest_block_time: DateTime<Utc>,
    pub latest_block_hash: String,
    #[serde(deserialize_with = "de::i64_str")]
    pub latest_block_height: i64,
    pub latest_block_time: DateTime<Utc>,
}

/// `blockchain_info` response: metadata for a height range, descending.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainInfo {
    #[serde(deserialize_with = "de::i64_str")]
    pub last_height: i64,
    #[serde(default)]
    pub block_metas: Vec<BlockMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub header: BlockHeader,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockId {
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    #[serde(deserialize_with = "de::i64_str")]
    pub height: i64,
    pub time: DateTime<Utc>,
}

/// `block_results` response. `txs_results` is null for an empty block.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockResults {
    #[serde(deserialize_with = "de::i64_str")]
    pub height: i64,
    #[serde(default, deserialize_with = "de::null_default")]
    pub txs_results: Vec<TxResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxResult {
    #[serde(default, deserialize_with = "de::null_default")]
    pub events: Vec<RawEvent>,
}

/// One emitted event: a kind tag and an attribute bag, still untyped.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "de::null_default")]
    pub attributes: Vec<EventAttr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventAttr {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

mod de {
    use serde::{Deserialize, Deserializer};

    /// i64 from a JSON string (the node quotes 64-bit integers).
    pub fn i64_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }

    /// Explicit null collapses to the default value.
    pub fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }
}
