//! Event demultiplexer: attribute bags in, typed callbacks out.

use crate::types::{
    Add, Fee, Message, Outbound, ParseError, Pool, Refund, Reserve, Stake, Swap, Unstake,
};
use chrono::{DateTime, Utc};
use tideline_chain::{Block, RawEvent};

/// The event kinds this indexer understands. Adding a kind means one record
/// type, one entry here, and one [Listener] method.
pub const KINDS: [&str; 10] = [
    "add", "fee", "message", "outbound", "pool", "refund", "reserve", "stake", "swap", "unstake",
];

/// Block context passed along with every decoded event.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub block_height: i64,
    /// Official acceptance moment of the block.
    pub block_timestamp: DateTime<Utc>,
}

/// Event callbacks, one per kind. Invoked synchronously in event order.
pub trait Listener {
    fn on_add(&mut self, event: &Add, meta: &Metadata);
    fn on_fee(&mut self, event: &Fee, meta: &Metadata);
    fn on_message(&mut self, event: &Message, meta: &Metadata);
    fn on_outbound(&mut self, event: &Outbound, meta: &Metadata);
    fn on_pool(&mut self, event: &Pool, meta: &Metadata);
    fn on_refund(&mut self, event: &Refund, meta: &Metadata);
    fn on_reserve(&mut self, event: &Reserve, meta: &Metadata);
    fn on_stake(&mut self, event: &Stake, meta: &Metadata);
    fn on_swap(&mut self, event: &Swap, meta: &Metadata);
    fn on_unstake(&mut self, event: &Unstake, meta: &Metadata);
}

/// Demultiplexer for block events. Holds one reusable instance of each record
/// type so steady-state decoding allocates only for the field contents.
#[derive(Default)]
pub struct Demux {
    reuse: Reuse,
}

#[derive(Default)]
struct Reuse {
    add: Add,
    fee: Fee,
    message: Message,
    outbound: Outbound,
    pool: Pool,
    refund: Refund,
    reserve: Reserve,
    stake: Stake,
    swap: Swap,
    unstake: Unstake,
}

impl Demux {
    /// Invoke `listener` for each transaction event in the block, in
    /// transaction order then intra-transaction order.
    ///
    /// A malformed attribute bag or an unknown kind skips that one event with
    /// a warn; the rest of the block still goes through. The chain may emit
    /// event kinds ahead of indexer updates.
    pub fn block(&mut self, listener: &mut dyn Listener, block: &Block) {
        let meta = Metadata {
            block_height: block.height,
            block_timestamp: block.time,
        };

        for (tx_index, tx) in block.results.txs_results.iter().enumerate() {
            for (event_index, event) in tx.events.iter().enumerate() {
                if let Err(err) = self.event(listener, event, &meta) {
                    tracing::warn!(
                        height = block.height,
                        tx = tx_index,
                        event = event_index,
                        kind = %event.kind,
                        reason = %err,
                        "event skipped"
                    );
                }
            }
        }
    }

    fn event(
        &mut self,
        listener: &mut dyn Listener,
        event: &RawEvent,
        meta: &Metadata,
    ) -> Result<(), ParseError> {
        let attrs = &event.attributes;
        match event.kind.as_str() {
            "add" => {
                self.reuse.add.load(attrs)?;
                listener.on_add(&self.reuse.add, meta);
            }
            "fee" => {
                self.reuse.fee.load(attrs)?;
                listener.on_fee(&self.reuse.fee, meta);
            }
            "message" => {
                self.reuse.message.load(attrs)?;
                listener.on_message(&self.reuse.message, meta);
            }
            "outbound" => {
                self.reuse.outbound.load(attrs)?;
                listener.on_outbound(&self.reuse.outbound, meta);
            }
            "pool" => {
                self.reuse.pool.load(attrs)?;
                listener.on_pool(&self.reuse.pool, meta);
            }
            "refund" => {
                self.reuse.refund.load(attrs)?;
                listener.on_refund(&self.reuse.refund, meta);
            }
            "reserve" => {
                self.reuse.reserve.load(attrs)?;
                listener.on_reserve(&self.reuse.reserve, meta);
            }
            "stake" => {
                self.reuse.stake.load(attrs)?;
                listener.on_stake(&self.reuse.stake, meta);
            }
            "swap" => {
                self.reuse.swap.load(attrs)?;
                listener.on_swap(&self.reuse.swap, meta);
            }
            "unstake" => {
                self.reuse.unstake.load(attrs)?;
                listener.on_unstake(&self.reuse.unstake, meta);
            }
            _ => return Err(ParseError::UnknownKind),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tideline_chain::{BlockResults, EventAttr, TxResult};

    /// Records the dispatch order as (kind, detail) pairs.
    #[derive(Default)]
    struct Tape(Vec<(String, String)>);

    impl Listener for Tape {
        fn on_add(&mut self, e: &Add, _: &Metadata) {
            self.0.push(("add".into(), e.pool.clone()));
        }
        fn on_fee(&mut self, e: &Fee, _: &Metadata) {
            self.0.push(("fee".into(), e.tx.clone()));
        }
        fn on_message(&mut self, e: &Message, _: &Metadata) {
            self.0.push(("message".into(), e.action.clone()));
        }
        fn on_outbound(&mut self, e: &Outbound, _: &Metadata) {
            self.0.push(("outbound".into(), e.in_tx.clone()));
        }
        fn on_pool(&mut self, e: &Pool, _: &Metadata) {
            self.0.push(("pool".into(), e.status.clone()));
        }
        fn on_refund(&mut self, e: &Refund, _: &Metadata) {
            self.0.push(("refund".into(), e.tx.clone()));
        }
        fn on_reserve(&mut self, e: &Reserve, _: &Metadata) {
            self.0.push(("reserve".into(), e.tx.clone()));
        }
        fn on_stake(&mut self, e: &Stake, _: &Metadata) {
            self.0.push(("stake".into(), e.pool.clone()));
        }
        fn on_swap(&mut self, e: &Swap, _: &Metadata) {
            self.0.push(("swap".into(), e.tx.clone()));
        }
        fn on_unstake(&mut self, e: &Unstake, _: &Metadata) {
            self.0.push(("unstake".into(), e.tx.clone()));
        }
    }

    fn raw(kind: &str, pairs: &[(&str, &str)]) -> RawEvent {
        RawEvent {
            kind: kind.to_owned(),
            attributes: pairs
                .iter()
                .map(|(k, v)| EventAttr {
                    key: (*k).to_owned(),
                    value: (*v).to_owned(),
                })
                .collect(),
        }
    }

    fn block(height: i64, txs: Vec<Vec<RawEvent>>) -> Block {
        Block {
            height,
            time: Utc.timestamp_opt(1_577_836_800, 0).unwrap(),
            hash: vec![0xAB],
            results: BlockResults {
                height,
                txs_results: txs.into_iter().map(|events| TxResult { events }).collect(),
            },
        }
    }

    #[test]
    fn dispatches_in_tx_then_event_order() {
        let b = block(
            3,
            vec![
                vec![
                    raw(
                        "stake",
                        &[("pool", "BNB.BNB"), ("asset_amount", "1"), ("rune_amount", "2")],
                    ),
                    raw("message", &[("action", "stake")]),
                ],
                vec![raw("pool", &[("pool", "BNB.BNB"), ("pool_status", "available")])],
            ],
        );
        let mut tape = Tape::default();
        Demux::default().block(&mut tape, &b);
        assert_eq!(
            tape.0,
            vec![
                ("stake".to_owned(), "BNB.BNB".to_owned()),
                ("message".to_owned(), "stake".to_owned()),
                ("pool".to_owned(), "available".to_owned()),
            ]
        );
    }

    #[test]
    fn unknown_kind_is_skipped_not_fatal() {
        let b = block(
            5,
            vec![vec![
                raw("galaxy_brain", &[("key", "value")]),
                raw("message", &[("action", "noop")]),
            ]],
        );
        let mut tape = Tape::default();
        Demux::default().block(&mut tape, &b);
        assert_eq!(tape.0, vec![("message".to_owned(), "noop".to_owned())]);
    }

    #[test]
    fn malformed_event_is_skipped_block_continues() {
        let b = block(
            6,
            vec![vec![
                // stake without its required pool attribute
                raw("stake", &[("asset_amount", "1"), ("rune_amount", "2")]),
                raw(
                    "stake",
                    &[("pool", "BTC.BTC"), ("asset_amount", "1"), ("rune_amount", "2")],
                ),
            ]],
        );
        let mut tape = Tape::default();
        Demux::default().block(&mut tape, &b);
        assert_eq!(tape.0, vec![("stake".to_owned(), "BTC.BTC".to_owned())]);
    }

    #[test]
    fn kinds_registry_matches_dispatch() {
        // Every registered kind decodes (with a minimal valid bag) and lands
        // on its listener method exactly once.
        let bags: Vec<(&str, Vec<(&str, &str)>)> = vec![
            ("add", vec![("id", "T"), ("chain", "BNB"), ("from", "a"), ("asset", "BNB.BNB"), ("pool", "BNB.BNB")]),
            ("fee", vec![("tx_id", "T"), ("asset", "BNB.BNB"), ("pool_deduct", "1")]),
            ("message", vec![("action", "noop")]),
            ("outbound", vec![("chain", "BNB"), ("from", "a"), ("to", "b"), ("asset", "BNB.BNB"), ("asset_amount", "1"), ("in_tx_id", "T")]),
            ("pool", vec![("pool", "BNB.BNB"), ("pool_status", "available")]),
            ("refund", vec![("id", "T"), ("chain", "BNB"), ("from", "a"), ("asset", "BNB.BNB"), ("code", "105")]),
            ("reserve", vec![("id", "T"), ("chain", "BNB"), ("from", "a"), ("asset", "THOR.RUNE"), ("contributor_address", "a"), ("amount", "1")]),
            ("stake", vec![("pool", "BNB.BNB"), ("asset_amount", "1"), ("rune_amount", "2")]),
            ("swap", vec![("id", "T"), ("chain", "BNB"), ("from", "a"), ("from_asset", "THOR.RUNE"), ("from_amount", "2"), ("to_amount", "1"), ("pool", "BNB.BNB")]),
            ("unstake", vec![("id", "T"), ("chain", "BNB"), ("from", "a"), ("asset", "BNB.BNB"), ("pool", "BNB.BNB"), ("stake_units", "1"), ("basis_points", "10000")]),
        ];
        assert_eq!(bags.len(), KINDS.len());
        for (kind, bag) in bags {
            assert!(KINDS.contains(&kind), "{kind} not registered");
            let b = block(1, vec![vec![raw(kind, &bag)]]);
            let mut tape = Tape::default();
            Demux::default().block(&mut tape, &b);
            assert_eq!(tape.0.len(), 1, "{kind} did not dispatch");
            assert_eq!(tape.0[0].0, kind);
        }
    }
}
