//! Sparse depth snapshots: one row per pool per height, only when changed.
//!
//! Historical depth queries resolve as "latest row at or below height h per
//! pool", which stays efficient only if unchanged pools emit nothing. The
//! snapshot manager diffs the current depth maps against the previous height
//! and writes the changed pools in one batched insert.

use crate::store::{DepthRow, Store, StoreError};
use std::collections::{BTreeSet, HashMap};

/// Differences between successive snapshots of one depth map.
#[derive(Debug, Default)]
struct MapDiff {
    snapshot: HashMap<String, i64>,
}

impl MapDiff {
    fn save(&mut self, new: &HashMap<String, i64>) {
        self.snapshot = new.clone();
    }

    /// Whether `pool` changed against the snapshot, and its current value.
    /// A pool missing from `new` reads as 0; it diffs while the snapshot
    /// still carries the key, which is at most once.
    fn diff_at_key(&self, pool: &str, new: &HashMap<String, i64>) -> (bool, i64) {
        let old = self.snapshot.get(pool);
        match new.get(pool) {
            Some(&value) => (old != Some(&value), value),
            None => (old.is_some(), 0),
        }
    }
}

/// Emits depth-change rows per committed height.
#[derive(Debug, Default)]
pub struct SnapshotManager {
    asset: MapDiff,
    rune: MapDiff,
    /// Heights at or below this may carry rows left behind by a run that died
    /// mid-block; suppressed rows there are replay, not corruption.
    replay_until: i64,
}

impl SnapshotManager {
    pub fn new(replay_until: i64) -> Self {
        Self {
            replay_until,
            ..Default::default()
        }
    }

    /// Seed the previous snapshots from a restored state so the first block
    /// after resume only emits genuine changes.
    pub fn seed(&mut self, asset: &HashMap<String, i64>, rune: &HashMap<String, i64>) {
        self.asset.save(asset);
        self.rune.save(rune);
    }

    /// Collect rows for every pool whose depth changed, then advance the
    /// snapshots. Pure bookkeeping; no I/O.
    fn diff(
        &mut self,
        asset_now: &HashMap<String, i64>,
        rune_now: &HashMap<String, i64>,
    ) -> Vec<DepthRow> {
        let mut pools: BTreeSet<&str> = BTreeSet::new();
        pools.extend(asset_now.keys().map(String::as_str));
        pools.extend(rune_now.keys().map(String::as_str));
        pools.extend(self.asset.snapshot.keys().map(String::as_str));
        pools.extend(self.rune.snapshot.keys().map(String::as_str));

        let mut rows = Vec::new();
        for pool in pools {
            let (asset_changed, asset_e8) = self.asset.diff_at_key(pool, asset_now);
            let (rune_changed, rune_e8) = self.rune.diff_at_key(pool, rune_now);
            if asset_changed || rune_changed {
                rows.push(DepthRow {
                    pool: pool.to_owned(),
                    asset_e8,
                    rune_e8,
                });
            }
        }
        self.asset.save(asset_now);
        self.rune.save(rune_now);
        rows
    }

    /// Write this height's depth changes. The database must report exactly as
    /// many inserted rows as were emitted; fewer means either replay (inside
    /// the window restored at startup, tolerated with a warn) or an integrity
    /// fault (fatal).
    pub async fn update(
        &mut self,
        store: &Store,
        height: i64,
        asset_now: &HashMap<String, i64>,
        rune_now: &HashMap<String, i64>,
    ) -> Result<(), StoreError> {
        let rows = self.diff(asset_now, rune_now);
        if rows.is_empty() {
            return Ok(());
        }

        let expected = rows.len() as u64;
        let actual = store.insert_depths(height, &rows).await?;
        if actual != expected {
            if height <= self.replay_until {
                tracing::warn!(
                    height,
                    expected,
                    actual,
                    "depth rows suppressed inside the replay window"
                );
            } else {
                return Err(StoreError::Integrity {
                    height,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}
