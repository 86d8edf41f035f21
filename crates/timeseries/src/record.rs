//! Event recorder: one row per event, plus the in-memory running totals.
//!
//! The recorder is the single writer of the depth maps. All events of a block
//! pass through it sequentially on the pipeline task, so no locking is needed
//! between it and the demultiplexer.

use crate::state::AggState;
use crate::store::{EventBody, EventRow};
use crate::OUTBOUND_TIMEOUT_NS;
use std::collections::{HashMap, VecDeque};
use tideline_event::{
    is_rune, Add, Fee, Listener, Message, Metadata, Outbound, Pool, Refund, Reserve, Stake, Swap,
    Unstake,
};

/// Per-pool asset and native depths, in E8.
#[derive(Debug, Default)]
pub struct RunningTotals {
    asset_e8_per_pool: HashMap<String, i64>,
    rune_e8_per_pool: HashMap<String, i64>,
}

impl RunningTotals {
    fn add_asset(&mut self, pool: &str, delta: i64) {
        let depth = self.asset_e8_per_pool.entry(pool.to_owned()).or_default();
        *depth += delta;
        if *depth < 0 {
            // Well-formed feeds never drain a pool below zero. Keep the value
            // as computed; clamping would hide the upstream bug.
            tracing::error!(pool, depth = *depth, "asset depth negative");
        }
    }

    fn add_rune(&mut self, pool: &str, delta: i64) {
        let depth = self.rune_e8_per_pool.entry(pool.to_owned()).or_default();
        *depth += delta;
        if *depth < 0 {
            tracing::error!(pool, depth = *depth, "rune depth negative");
        }
    }

    pub fn asset_depths(&self) -> &HashMap<String, i64> {
        &self.asset_e8_per_pool
    }

    pub fn rune_depths(&self) -> &HashMap<String, i64> {
        &self.rune_e8_per_pool
    }
}

/// What a pending outbound link points back at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Unstake: the matching outbound debits the leg it names.
    Unstake,
    /// Swap: legs were applied when the swap was recorded; the match is a
    /// linkage only.
    Swap,
}

#[derive(Debug)]
struct PendingLink {
    pool: String,
    origin: Origin,
    height: i64,
    timestamp_ns: i64,
}

/// Keyed FIFOs for outbound and fee follow-ups. The key is the transaction id
/// of the originating event; arrival order drives expiry, which keeps both
/// queues bounded.
#[derive(Debug, Default)]
struct LinkedEvents {
    outbound_by_tx: HashMap<String, PendingLink>,
    outbound_order: VecDeque<(i64, String)>,
    fee_by_tx: HashMap<String, PendingLink>,
    fee_order: VecDeque<(i64, String)>,
}

impl LinkedEvents {
    fn expect_outbound(&mut self, tx: &str, pool: &str, origin: Origin, meta: &Metadata) {
        self.outbound_order
            .push_back((crate::ns(meta.block_timestamp), tx.to_owned()));
        self.outbound_by_tx.insert(
            tx.to_owned(),
            PendingLink {
                pool: pool.to_owned(),
                origin,
                height: meta.block_height,
                timestamp_ns: crate::ns(meta.block_timestamp),
            },
        );
    }

    fn expect_fee(&mut self, tx: &str, pool: &str, meta: &Metadata) {
        self.fee_order
            .push_back((crate::ns(meta.block_timestamp), tx.to_owned()));
        self.fee_by_tx.insert(
            tx.to_owned(),
            PendingLink {
                pool: pool.to_owned(),
                origin: Origin::Swap,
                height: meta.block_height,
                timestamp_ns: crate::ns(meta.block_timestamp),
            },
        );
    }

    /// Entries stay queued after a match: an unstake pays out both legs as
    /// separate outbound transfers under the same origin id.
    fn match_outbound(&self, in_tx: &str) -> Option<&PendingLink> {
        self.outbound_by_tx.get(in_tx)
    }

    /// One fee per swap; the entry is consumed.
    fn match_fee(&mut self, tx: &str) -> Option<PendingLink> {
        self.fee_by_tx.remove(tx)
    }

    /// Drop outbound links whose origin block is older than the timeout.
    /// The hypothetical debit is abandoned: totals stay as they are.
    fn apply_outbound_q(&mut self, now_ns: i64) {
        while let Some((enqueued_ns, tx)) = self.outbound_order.front() {
            if enqueued_ns + OUTBOUND_TIMEOUT_NS > now_ns {
                break;
            }
            let enqueued_ns = *enqueued_ns;
            let tx = tx.clone();
            self.outbound_order.pop_front();
            // A later entry may have taken over the key; only drop a match.
            if self
                .outbound_by_tx
                .get(&tx)
                .is_some_and(|link| link.timestamp_ns == enqueued_ns)
            {
                let link = self.outbound_by_tx.remove(&tx);
                if let Some(link) = link {
                    if link.origin == Origin::Unstake {
                        tracing::warn!(
                            tx = %tx,
                            pool = %link.pool,
                            height = link.height,
                            "outbound follow-up expired; reconciled as if no outbound occurred"
                        );
                    }
                }
            }
        }
    }

    fn apply_fee_q(&mut self, now_ns: i64) {
        while let Some((enqueued_ns, tx)) = self.fee_order.front() {
            if enqueued_ns + OUTBOUND_TIMEOUT_NS > now_ns {
                break;
            }
            let enqueued_ns = *enqueued_ns;
            let tx = tx.clone();
            self.fee_order.pop_front();
            if self
                .fee_by_tx
                .get(&tx)
                .is_some_and(|link| link.timestamp_ns == enqueued_ns)
            {
                if let Some(link) = self.fee_by_tx.remove(&tx) {
                    tracing::debug!(tx = %tx, pool = %link.pool, "swap fee follow-up expired");
                }
            }
        }
    }

    fn outbound_len(&self) -> usize {
        self.outbound_by_tx.len()
    }
}

/// Sink for typed events: buffers one row per event and keeps the running
/// totals current. Rows are taken by the committer before the block-log write.
#[derive(Default)]
pub struct Recorder {
    totals: RunningTotals,
    linked: LinkedEvents,
    rows: Vec<EventRow>,
    next_event_id: i64,
}

impl Recorder {
    /// Seed the totals from a restored state.
    pub fn restore(&mut self, state: &AggState) {
        self.totals.asset_e8_per_pool = state
            .asset_e8_depth_per_pool
            .iter()
            .map(|(pool, e8)| (pool.clone(), *e8))
            .collect();
        self.totals.rune_e8_per_pool = state
            .rune_e8_depth_per_pool
            .iter()
            .map(|(pool, e8)| (pool.clone(), *e8))
            .collect();
    }

    pub fn asset_depths(&self) -> &HashMap<String, i64> {
        self.totals.asset_depths()
    }

    pub fn rune_depths(&self) -> &HashMap<String, i64> {
        self.totals.rune_depths()
    }

    /// Immutable snapshot of the running totals for the commit blob.
    pub fn state_snapshot(&self) -> AggState {
        AggState {
            asset_e8_depth_per_pool: self
                .totals
                .asset_e8_per_pool
                .iter()
                .map(|(pool, e8)| (pool.clone(), *e8))
                .collect(),
            rune_e8_depth_per_pool: self
                .totals
                .rune_e8_per_pool
                .iter()
                .map(|(pool, e8)| (pool.clone(), *e8))
                .collect(),
        }
    }

    /// Drain the buffered rows for persistence, closing the block: event ids
    /// restart at zero for the next one. A replayed block therefore
    /// regenerates identical `(block_timestamp, event_id)` keys, which is
    /// what lets `ON CONFLICT DO NOTHING` absorb orphan rows.
    pub fn take_rows(&mut self) -> Vec<EventRow> {
        self.next_event_id = 0;
        std::mem::take(&mut self.rows)
    }

    /// Scheduled reconciliation, run at commit for the block's moment.
    pub fn apply_outbound_q(&mut self, _height: i64, now_ns: i64) {
        self.linked.apply_outbound_q(now_ns);
    }

    pub fn apply_fee_q(&mut self, _height: i64, now_ns: i64) {
        self.linked.apply_fee_q(now_ns);
    }

    #[cfg(test)]
    fn pending_outbound(&self) -> usize {
        self.linked.outbound_len()
    }

    fn push(&mut self, meta: &Metadata, body: EventBody) {
        self.rows.push(EventRow {
            block_timestamp: crate::ns(meta.block_timestamp),
            event_id: self.next_event_id,
            body,
        });
        self.next_event_id += 1;
    }
}

impl Listener for Recorder {
    fn on_add(&mut self, event: &Add, meta: &Metadata) {
        self.push(meta, EventBody::Add(event.clone()));
        if event.asset_e8 != 0 {
            self.totals.add_asset(&event.pool, event.asset_e8);
        }
        if event.rune_e8 != 0 {
            self.totals.add_rune(&event.pool, event.rune_e8);
        }
    }

    fn on_fee(&mut self, event: &Fee, meta: &Metadata) {
        self.push(meta, EventBody::Fee(event.clone()));
        // The fee's asset names the pool; the deduction comes out of that
        // pool's native side. Fees on the native asset touch no pool.
        if !is_rune(&event.asset) {
            self.totals.add_rune(&event.asset, -event.pool_deduct);
        }
        if let Some(link) = self.linked.match_fee(&event.tx) {
            tracing::debug!(tx = %event.tx, pool = %link.pool, "fee linked to swap");
        }
    }

    fn on_message(&mut self, event: &Message, meta: &Metadata) {
        self.push(meta, EventBody::Message(event.clone()));
    }

    fn on_outbound(&mut self, event: &Outbound, meta: &Metadata) {
        self.push(meta, EventBody::Outbound(event.clone()));
        match self.linked.match_outbound(&event.in_tx) {
            None => {
                tracing::warn!(
                    in_tx = %event.in_tx,
                    asset = %event.asset,
                    "outbound without pending origin"
                );
            }
            Some(link) if link.origin == Origin::Swap => {
                // Swap legs were applied up front; nothing to debit here.
            }
            Some(link) => {
                let pool = link.pool.clone();
                if event.asset == pool {
                    self.totals.add_asset(&pool, -event.asset_e8);
                } else if is_rune(&event.asset) {
                    self.totals.add_rune(&pool, -event.asset_e8);
                } else {
                    tracing::warn!(
                        in_tx = %event.in_tx,
                        asset = %event.asset,
                        pool = %pool,
                        "outbound asset matches neither pool leg"
                    );
                }
            }
        }
    }

    fn on_pool(&mut self, event: &Pool, meta: &Metadata) {
        // Status transition; depths are unaffected.
        self.push(meta, EventBody::Pool(event.clone()));
    }

    fn on_refund(&mut self, event: &Refund, meta: &Metadata) {
        self.push(meta, EventBody::Refund(event.clone()));
    }

    fn on_reserve(&mut self, event: &Reserve, meta: &Metadata) {
        self.push(meta, EventBody::Reserve(event.clone()));
    }

    fn on_stake(&mut self, event: &Stake, meta: &Metadata) {
        self.push(meta, EventBody::Stake(event.clone()));
        self.totals.add_asset(&event.pool, event.asset_e8);
        self.totals.add_rune(&event.pool, event.rune_e8);
    }

    fn on_swap(&mut self, event: &Swap, meta: &Metadata) {
        self.push(meta, EventBody::Swap(event.clone()));
        if is_rune(&event.from_asset) {
            self.totals.add_rune(&event.pool, event.from_e8);
            self.totals.add_asset(&event.pool, -event.to_e8);
        } else {
            self.totals.add_asset(&event.pool, event.from_e8);
            self.totals.add_rune(&event.pool, -event.to_e8);
        }
        // The output transfer arrives later as an outbound event; the fee
        // queue attributes a network fee back to this swap.
        self.linked
            .expect_outbound(&event.tx, &event.pool, Origin::Swap, meta);
        self.linked.expect_fee(&event.tx, &event.pool, meta);
    }

    fn on_unstake(&mut self, event: &Unstake, meta: &Metadata) {
        self.push(meta, EventBody::Unstake(event.clone()));
        // Depths move when the matching outbound transfers land.
        self.linked
            .expect_outbound(&event.tx, &event.pool, Origin::Unstake, meta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state;
    use chrono::{DateTime, TimeZone, Utc};

    const POOL: &str = "BNB.BNB";
    const RUNE: &str = "THOR.RUNE";

    fn block_time(height: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_577_836_800 + height * 5, 0).unwrap()
    }

    fn meta(height: i64) -> Metadata {
        Metadata {
            block_height: height,
            block_timestamp: block_time(height),
        }
    }

    fn stake(pool: &str, asset_e8: i64, rune_e8: i64) -> Stake {
        Stake {
            pool: pool.to_owned(),
            asset_e8,
            rune_e8,
            ..Default::default()
        }
    }

    fn asset_depth(recorder: &Recorder, pool: &str) -> i64 {
        recorder.asset_depths().get(pool).copied().unwrap_or(0)
    }

    fn rune_depth(recorder: &Recorder, pool: &str) -> i64 {
        recorder.rune_depths().get(pool).copied().unwrap_or(0)
    }

    #[test]
    fn stake_credits_both_sides() {
        let mut recorder = Recorder::default();
        recorder.on_stake(&stake(POOL, 100, 1000), &meta(1));
        assert_eq!(asset_depth(&recorder, POOL), 100);
        assert_eq!(rune_depth(&recorder, POOL), 1000);

        let rows = recorder.take_rows();
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0].body, EventBody::Stake(_)));
    }

    #[test]
    fn message_leaves_depths_alone() {
        let mut recorder = Recorder::default();
        recorder.on_stake(&stake(POOL, 100, 1000), &meta(1));
        let before = recorder.state_snapshot();

        recorder.on_message(
            &Message {
                from_addr: "bnb1".into(),
                action: "noop".into(),
            },
            &meta(2),
        );
        let after = recorder.state_snapshot();
        assert_eq!(
            before.asset_e8_depth_per_pool,
            after.asset_e8_depth_per_pool
        );
        assert_eq!(before.rune_e8_depth_per_pool, after.rune_e8_depth_per_pool);
        // The row was still recorded.
        assert_eq!(recorder.take_rows().len(), 2);
    }

    #[test]
    fn swap_applies_both_legs_and_fee_debits_rune() {
        let mut recorder = Recorder::default();
        recorder.on_stake(&stake(POOL, 1000, 10_000), &meta(1));

        recorder.on_swap(
            &Swap {
                tx: "TX1".into(),
                from_asset: RUNE.into(),
                from_e8: 200,
                to_e8: 50,
                pool: POOL.into(),
                ..Default::default()
            },
            &meta(3),
        );
        assert_eq!(rune_depth(&recorder, POOL), 10_200);
        assert_eq!(asset_depth(&recorder, POOL), 950);

        recorder.on_fee(
            &Fee {
                tx: "TX1".into(),
                asset: POOL.into(),
                asset_e8: 0,
                pool_deduct: 2,
            },
            &meta(3),
        );
        assert_eq!(rune_depth(&recorder, POOL), 10_198);
        assert_eq!(asset_depth(&recorder, POOL), 950);
    }

    #[test]
    fn swap_outbound_is_linkage_only() {
        let mut recorder = Recorder::default();
        recorder.on_stake(&stake(POOL, 1000, 10_000), &meta(1));
        recorder.on_swap(
            &Swap {
                tx: "TX1".into(),
                from_asset: RUNE.into(),
                from_e8: 200,
                to_e8: 50,
                pool: POOL.into(),
                ..Default::default()
            },
            &meta(2),
        );
        let after_swap = (asset_depth(&recorder, POOL), rune_depth(&recorder, POOL));

        recorder.on_outbound(
            &Outbound {
                in_tx: "TX1".into(),
                asset: POOL.into(),
                asset_e8: 50,
                ..Default::default()
            },
            &meta(2),
        );
        // No double debit: the swap already accounted for its output leg.
        assert_eq!(
            (asset_depth(&recorder, POOL), rune_depth(&recorder, POOL)),
            after_swap
        );
    }

    #[test]
    fn unstake_debits_on_matching_outbounds() {
        let mut recorder = Recorder::default();
        recorder.on_stake(&stake(POOL, 1000, 10_000), &meta(1));

        recorder.on_unstake(
            &Unstake {
                tx: "TX9".into(),
                pool: POOL.into(),
                asset: POOL.into(),
                stake_units: 500,
                basis_points: 5000,
                ..Default::default()
            },
            &meta(5),
        );
        // Nothing moves until the transfers land.
        assert_eq!(asset_depth(&recorder, POOL), 1000);
        assert_eq!(rune_depth(&recorder, POOL), 10_000);

        recorder.on_outbound(
            &Outbound {
                in_tx: "TX9".into(),
                asset: POOL.into(),
                asset_e8: 500,
                ..Default::default()
            },
            &meta(6),
        );
        recorder.on_outbound(
            &Outbound {
                in_tx: "TX9".into(),
                asset: RUNE.into(),
                asset_e8: 5000,
                ..Default::default()
            },
            &meta(6),
        );
        assert_eq!(asset_depth(&recorder, POOL), 500);
        assert_eq!(rune_depth(&recorder, POOL), 5000);
    }

    #[test]
    fn expired_outbound_link_is_abandoned() {
        let mut recorder = Recorder::default();
        recorder.on_stake(&stake(POOL, 1000, 10_000), &meta(1));
        recorder.on_unstake(
            &Unstake {
                tx: "TXLOST".into(),
                pool: POOL.into(),
                asset: POOL.into(),
                stake_units: 1,
                basis_points: 100,
                ..Default::default()
            },
            &meta(2),
        );
        assert_eq!(recorder.pending_outbound(), 1);

        // One second short of the timeout: still pending.
        let almost = crate::ns(block_time(2)) + OUTBOUND_TIMEOUT_NS - 1_000_000_000;
        recorder.apply_outbound_q(700, almost);
        assert_eq!(recorder.pending_outbound(), 1);

        let past = crate::ns(block_time(2)) + OUTBOUND_TIMEOUT_NS;
        recorder.apply_outbound_q(720, past);
        assert_eq!(recorder.pending_outbound(), 0);
        // Reconciled as if no outbound ever happened.
        assert_eq!(asset_depth(&recorder, POOL), 1000);
        assert_eq!(rune_depth(&recorder, POOL), 10_000);

        // A late outbound no longer matches.
        recorder.on_outbound(
            &Outbound {
                in_tx: "TXLOST".into(),
                asset: POOL.into(),
                asset_e8: 10,
                ..Default::default()
            },
            &meta(800),
        );
        assert_eq!(asset_depth(&recorder, POOL), 1000);
    }

    #[test]
    fn negative_depth_is_kept_not_clamped() {
        let mut recorder = Recorder::default();
        recorder.on_stake(&stake(POOL, 10, 100), &meta(1));
        recorder.on_swap(
            &Swap {
                tx: "TXBAD".into(),
                from_asset: RUNE.into(),
                from_e8: 1,
                to_e8: 25,
                pool: POOL.into(),
                ..Default::default()
            },
            &meta(2),
        );
        assert_eq!(asset_depth(&recorder, POOL), -15);
    }

    #[test]
    fn add_credits_sides_as_given() {
        let mut recorder = Recorder::default();
        recorder.on_add(
            &Add {
                tx: "T".into(),
                pool: POOL.into(),
                asset: POOL.into(),
                asset_e8: 7,
                rune_e8: 11,
                ..Default::default()
            },
            &meta(1),
        );
        assert_eq!(asset_depth(&recorder, POOL), 7);
        assert_eq!(rune_depth(&recorder, POOL), 11);
    }

    #[test]
    fn event_ids_are_dense_within_a_block() {
        let mut recorder = Recorder::default();
        recorder.on_stake(&stake(POOL, 1, 2), &meta(1));
        recorder.on_message(
            &Message {
                from_addr: String::new(),
                action: "noop".into(),
            },
            &meta(1),
        );
        recorder.on_pool(
            &Pool {
                asset: POOL.into(),
                status: "available".into(),
            },
            &meta(1),
        );
        let ids: Vec<i64> = recorder.take_rows().iter().map(|row| row.event_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        // Next block: ids restart, so a replay regenerates identical keys.
        recorder.on_stake(&stake(POOL, 1, 2), &meta(2));
        assert_eq!(recorder.take_rows()[0].event_id, 0);
    }

    #[test]
    fn identical_streams_produce_identical_state_blobs() {
        let run = || {
            let mut recorder = Recorder::default();
            recorder.on_stake(&stake(POOL, 100, 1000), &meta(1));
            recorder.on_stake(&stake("BTC.BTC", 5, 50_000), &meta(1));
            recorder.on_swap(
                &Swap {
                    tx: "TX1".into(),
                    from_asset: RUNE.into(),
                    from_e8: 200,
                    to_e8: 50,
                    pool: POOL.into(),
                    ..Default::default()
                },
                &meta(2),
            );
            state::encode(&recorder.state_snapshot()).unwrap()
        };
        assert_eq!(run(), run());
    }
}
