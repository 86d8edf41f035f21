//! Common helpers for integration tests.
//! Some helpers are only used by specific test binaries; allow dead_code to
//! avoid per-binary warnings.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use tideline_chain::{Block, BlockResults, EventAttr, RawEvent, TxResult};
use tideline_timeseries::Store;

/// Store connected per TIDELINE_TEST_DB_URL, or None to skip the test.
pub async fn test_store() -> Option<Store> {
    let url = std::env::var("TIDELINE_TEST_DB_URL").ok()?;
    let store = Store::connect(&url, 4).await.expect("connect test database");
    store.setup().await.expect("test database schema");
    Some(store)
}

pub async fn wipe(store: &Store) {
    for table in [
        "block_log",
        "aggregate_states",
        "add_events",
        "fee_events",
        "message_events",
        "outbound_events",
        "pool_events",
        "refund_events",
        "reserve_events",
        "stake_events",
        "swap_events",
        "unstake_events",
    ] {
        sqlx::query(&format!("TRUNCATE {table}"))
            .execute(store.pool())
            .await
            .expect("truncate");
    }
}

pub fn block_time(height: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_577_836_800 + height * 5, 0).unwrap()
}

pub fn block(height: i64, events: Vec<RawEvent>) -> Block {
    Block {
        height,
        time: block_time(height),
        hash: height.to_be_bytes().to_vec(),
        results: BlockResults {
            height,
            txs_results: vec![TxResult { events }],
        },
    }
}

pub fn raw(kind: &str, pairs: &[(&str, &str)]) -> RawEvent {
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

pub fn stake(pool: &str, asset_amount: &str, rune_amount: &str) -> RawEvent {
    raw(
        "stake",
        &[
            ("pool", pool),
            ("asset_amount", asset_amount),
            ("rune_amount", rune_amount),
        ],
    )
}

pub async fn count(store: &Store, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(store.pool())
        .await
        .expect("count")
}

pub async fn depth_row(store: &Store, height: i64, pool: &str) -> Option<(i64, i64)> {
    sqlx::query_as(
        "SELECT asset_e8, rune_e8 FROM aggregate_states WHERE height = $1 AND pool = $2",
    )
    .bind(height)
    .bind(pool)
    .fetch_optional(store.pool())
    .await
    .expect("depth row")
}

pub async fn agg_state_blob(store: &Store, height: i64) -> Vec<u8> {
    let row = store
        .block_log_at(height)
        .await
        .expect("block_log lookup")
        .expect("block_log row present");
    row.agg_state
}
