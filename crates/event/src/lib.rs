//! Typed protocol events and the demultiplexer that decodes them.
//!
//! Each block carries per-transaction event lists; every event is a kind tag
//! plus a `(key, value)` attribute bag. [Demux] decodes the ten known kinds
//! into typed records and hands each to a [Listener] exactly once, in block
//! order, then transaction order, then intra-transaction order. Malformed or
//! unknown events are logged and skipped; losing one event beats halting
//! ingestion, and either case points at an upstream protocol change that
//! belongs in the logs.

pub mod demux;
pub mod types;

pub use demux::{Demux, Listener, Metadata, KINDS};
pub use types::{
    Add, Fee, Message, Outbound, ParseError, Pool, Refund, Reserve, Stake, Swap, Unstake,
};

/// Asset identifier of the protocol's native asset.
pub const RUNE: &str = "THOR.RUNE";

/// True for the native asset, false for any pool asset.
pub fn is_rune(asset: &str) -> bool {
    asset == RUNE
}
