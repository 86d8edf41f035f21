//! PostgreSQL access: schema setup, event rows, depth rows and the block log.
//!
//! Every insert is `ON CONFLICT DO NOTHING` so a crash-restart can replay
//! blocks without duplicating rows. Timestamps are nanoseconds since the Unix
//! epoch, stored as signed 64-bit integers.

use crate::state::StateError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{QueryBuilder, Row};
use thiserror::Error;
use tideline_event as event;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    /// Row-count mismatch on a depth insert outside the replay window.
    #[error("depth insert at height {height}: expected {expected} rows, inserted {actual}")]
    Integrity {
        height: i64,
        expected: u64,
        actual: u64,
    },
    /// Persisted aggregate state failed to decode or encode.
    #[error("aggregate state at height {height}: {source}")]
    State {
        height: i64,
        #[source]
        source: StateError,
    },
    #[error("cannot resolve beyond the last block")]
    BeyondLast,
}

/// One row per event kind table: common columns plus the typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub block_timestamp: i64,
    pub event_id: i64,
    pub body: EventBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    Add(event::Add),
    Fee(event::Fee),
    Message(event::Message),
    Outbound(event::Outbound),
    Pool(event::Pool),
    Refund(event::Refund),
    Reserve(event::Reserve),
    Stake(event::Stake),
    Swap(event::Swap),
    Unstake(event::Unstake),
}

/// One sparse depth row for `aggregate_states`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthRow {
    pub pool: String,
    pub asset_e8: i64,
    pub rune_e8: i64,
}

/// Raw `block_log` row.
#[derive(Debug, Clone)]
pub struct BlockLogRow {
    pub height: i64,
    pub timestamp_ns: i64,
    pub hash: Vec<u8>,
    pub agg_state: Vec<u8>,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS block_log (
        height BIGINT PRIMARY KEY,
        timestamp BIGINT NOT NULL,
        hash BYTEA NOT NULL,
        agg_state BYTEA NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS aggregate_states (
        height BIGINT NOT NULL,
        pool TEXT NOT NULL,
        asset_e8 BIGINT NOT NULL,
        rune_e8 BIGINT NOT NULL,
        PRIMARY KEY (height, pool)
    )",
    "CREATE TABLE IF NOT EXISTS add_events (
        block_timestamp BIGINT NOT NULL, event_id BIGINT NOT NULL,
        tx TEXT NOT NULL, chain TEXT NOT NULL,
        from_addr TEXT NOT NULL, to_addr TEXT NOT NULL,
        asset TEXT NOT NULL, asset_e8 BIGINT NOT NULL, memo TEXT NOT NULL,
        rune_e8 BIGINT NOT NULL, pool TEXT NOT NULL,
        PRIMARY KEY (block_timestamp, event_id)
    )",
    "CREATE TABLE IF NOT EXISTS fee_events (
        block_timestamp BIGINT NOT NULL, event_id BIGINT NOT NULL,
        tx TEXT NOT NULL, asset TEXT NOT NULL, asset_e8 BIGINT NOT NULL,
        pool_deduct BIGINT NOT NULL,
        PRIMARY KEY (block_timestamp, event_id)
    )",
    "CREATE TABLE IF NOT EXISTS message_events (
        block_timestamp BIGINT NOT NULL, event_id BIGINT NOT NULL,
        from_addr TEXT NOT NULL, action TEXT NOT NULL,
        PRIMARY KEY (block_timestamp, event_id)
    )",
    "CREATE TABLE IF NOT EXISTS outbound_events (
        block_timestamp BIGINT NOT NULL, event_id BIGINT NOT NULL,
        tx TEXT NOT NULL, chain TEXT NOT NULL,
        from_addr TEXT NOT NULL, to_addr TEXT NOT NULL,
        asset TEXT NOT NULL, asset_e8 BIGINT NOT NULL, memo TEXT NOT NULL,
        in_tx TEXT NOT NULL,
        PRIMARY KEY (block_timestamp, event_id)
    )",
    "CREATE TABLE IF NOT EXISTS pool_events (
        block_timestamp BIGINT NOT NULL, event_id BIGINT NOT NULL,
        asset TEXT NOT NULL, status TEXT NOT NULL,
        PRIMARY KEY (block_timestamp, event_id)
    )",
    "CREATE TABLE IF NOT EXISTS refund_events (
        block_timestamp BIGINT NOT NULL, event_id BIGINT NOT NULL,
        tx TEXT NOT NULL, chain TEXT NOT NULL,
        from_addr TEXT NOT NULL, to_addr TEXT NOT NULL,
        asset TEXT NOT NULL, asset_e8 BIGINT NOT NULL, memo TEXT NOT NULL,
        code BIGINT NOT NULL, reason TEXT NOT NULL,
        PRIMARY KEY (block_timestamp, event_id)
    )",
    "CREATE TABLE IF NOT EXISTS reserve_events (
        block_timestamp BIGINT NOT NULL, event_id BIGINT NOT NULL,
        tx TEXT NOT NULL, chain TEXT NOT NULL,
        from_addr TEXT NOT NULL, to_addr TEXT NOT NULL,
        asset TEXT NOT NULL, asset_e8 BIGINT NOT NULL, memo TEXT NOT NULL,
        addr TEXT NOT NULL, e8 BIGINT NOT NULL,
        PRIMARY KEY (block_timestamp, event_id)
    )",
    "CREATE TABLE IF NOT EXISTS stake_events (
        block_timestamp BIGINT NOT NULL, event_id BIGINT NOT NULL,
        pool TEXT NOT NULL,
        asset_tx TEXT NOT NULL, asset_chain TEXT NOT NULL, asset_e8 BIGINT NOT NULL,
        rune_tx TEXT NOT NULL, rune_addr TEXT NOT NULL, rune_e8 BIGINT NOT NULL,
        stake_units BIGINT NOT NULL,
        PRIMARY KEY (block_timestamp, event_id)
    )",
    "CREATE TABLE IF NOT EXISTS swap_events (
        block_timestamp BIGINT NOT NULL, event_id BIGINT NOT NULL,
        tx TEXT NOT NULL, chain TEXT NOT NULL,
        from_addr TEXT NOT NULL, to_addr TEXT NOT NULL,
        from_asset TEXT NOT NULL, from_e8 BIGINT NOT NULL, to_e8 BIGINT NOT NULL,
        memo TEXT NOT NULL, pool TEXT NOT NULL,
        to_e8_min BIGINT NOT NULL, trade_slip_bp BIGINT NOT NULL,
        liq_fee_e8 BIGINT NOT NULL, liq_fee_in_rune_e8 BIGINT NOT NULL,
        PRIMARY KEY (block_timestamp, event_id)
    )",
    "CREATE TABLE IF NOT EXISTS unstake_events (
        block_timestamp BIGINT NOT NULL, event_id BIGINT NOT NULL,
        tx TEXT NOT NULL, chain TEXT NOT NULL,
        from_addr TEXT NOT NULL, to_addr TEXT NOT NULL,
        asset TEXT NOT NULL, asset_e8 BIGINT NOT NULL, memo TEXT NOT NULL,
        pool TEXT NOT NULL, stake_units BIGINT NOT NULL,
        basis_points BIGINT NOT NULL, asymmetry_bp BIGINT NOT NULL,
        PRIMARY KEY (block_timestamp, event_id)
    )",
];

/// Bounded-pool SQL client for the time series.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Raw pool handle for ad-hoc queries (read APIs, tests).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the idempotent schema.
    pub async fn setup(&self) -> Result<(), StoreError> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn last_block_log(&self) -> Result<Option<BlockLogRow>, StoreError> {
        self.block_log_row("ORDER BY height DESC LIMIT 1", None).await
    }

    pub async fn block_log_at(&self, height: i64) -> Result<Option<BlockLogRow>, StoreError> {
        self.block_log_row("WHERE height = $1", Some(height)).await
    }

    async fn block_log_row(
        &self,
        restriction: &str,
        height: Option<i64>,
    ) -> Result<Option<BlockLogRow>, StoreError> {
        let q = format!("SELECT height, timestamp, hash, agg_state FROM block_log {restriction}");
        let mut query = sqlx::query(&q);
        if let Some(height) = height {
            query = query.bind(height);
        }
        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(|row| BlockLogRow {
            height: row.get("height"),
            timestamp_ns: row.get("timestamp"),
            hash: row.get("hash"),
            agg_state: row.get("agg_state"),
        }))
    }

    /// Returns rows affected: 0 means the height was already committed.
    pub async fn insert_block_log(
        &self,
        height: i64,
        timestamp_ns: i64,
        hash: &[u8],
        agg_state: &[u8],
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO block_log (height, timestamp, hash, agg_state)
             VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
        )
        .bind(height)
        .bind(timestamp_ns)
        .bind(hash)
        .bind(agg_state)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// One batched insert for all changed pools at a height. Returns rows
    /// affected; the caller verifies it against the expected count.
    pub async fn insert_depths(&self, height: i64, rows: &[DepthRow]) -> Result<u64, StoreError> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("INSERT INTO aggregate_states (height, pool, asset_e8, rune_e8) ");
        builder.push_values(rows, |mut b, row| {
            b.push_bind(height)
                .push_bind(&row.pool)
                .push_bind(row.asset_e8)
                .push_bind(row.rune_e8);
        });
        builder.push(" ON CONFLICT DO NOTHING");
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_event(&self, row: &EventRow) -> Result<(), StoreError> {
        let (ts, id) = (row.block_timestamp, row.event_id);
        match &row.body {
            EventBody::Add(e) => {
                sqlx::query(
                    "INSERT INTO add_events (block_timestamp, event_id, tx, chain, from_addr,
                     to_addr, asset, asset_e8, memo, rune_e8, pool)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) ON CONFLICT DO NOTHING",
                )
                .bind(ts).bind(id)
                .bind(&e.tx).bind(&e.chain).bind(&e.from_addr).bind(&e.to_addr)
                .bind(&e.asset).bind(e.asset_e8).bind(&e.memo)
                .bind(e.rune_e8).bind(&e.pool)
                .execute(&self.pool)
                .await?;
            }
            EventBody::Fee(e) => {
                sqlx::query(
                    "INSERT INTO fee_events (block_timestamp, event_id, tx, asset, asset_e8, pool_deduct)
                     VALUES ($1,$2,$3,$4,$5,$6) ON CONFLICT DO NOTHING",
                )
                .bind(ts).bind(id)
                .bind(&e.tx).bind(&e.asset).bind(e.asset_e8).bind(e.pool_deduct)
                .execute(&self.pool)
                .await?;
            }
            EventBody::Message(e) => {
                sqlx::query(
                    "INSERT INTO message_events (block_timestamp, event_id, from_addr, action)
                     VALUES ($1,$2,$3,$4) ON CONFLICT DO NOTHING",
                )
                .bind(ts).bind(id)
                .bind(&e.from_addr).bind(&e.action)
                .execute(&self.pool)
                .await?;
            }
            EventBody::Outbound(e) => {
                sqlx::query(
                    "INSERT INTO outbound_events (block_timestamp, event_id, tx, chain, from_addr,
                     to_addr, asset, asset_e8, memo, in_tx)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10) ON CONFLICT DO NOTHING",
                )
                .bind(ts).bind(id)
                .bind(&e.tx).bind(&e.chain).bind(&e.from_addr).bind(&e.to_addr)
                .bind(&e.asset).bind(e.asset_e8).bind(&e.memo).bind(&e.in_tx)
                .execute(&self.pool)
                .await?;
            }
            EventBody::Pool(e) => {
                sqlx::query(
                    "INSERT INTO pool_events (block_timestamp, event_id, asset, status)
                     VALUES ($1,$2,$3,$4) ON CONFLICT DO NOTHING",
                )
                .bind(ts).bind(id)
                .bind(&e.asset).bind(&e.status)
                .execute(&self.pool)
                .await?;
            }
            EventBody::Refund(e) => {
                sqlx::query(
                    "INSERT INTO refund_events (block_timestamp, event_id, tx, chain, from_addr,
                     to_addr, asset, asset_e8, memo, code, reason)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) ON CONFLICT DO NOTHING",
                )
                .bind(ts).bind(id)
                .bind(&e.tx).bind(&e.chain).bind(&e.from_addr).bind(&e.to_addr)
                .bind(&e.asset).bind(e.asset_e8).bind(&e.memo)
                .bind(e.code).bind(&e.reason)
                .execute(&self.pool)
                .await?;
            }
            EventBody::Reserve(e) => {
                sqlx::query(
                    "INSERT INTO reserve_events (block_timestamp, event_id, tx, chain, from_addr,
                     to_addr, asset, asset_e8, memo, addr, e8)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) ON CONFLICT DO NOTHING",
                )
                .bind(ts).bind(id)
                .bind(&e.tx).bind(&e.chain).bind(&e.from_addr).bind(&e.to_addr)
                .bind(&e.asset).bind(e.asset_e8).bind(&e.memo)
                .bind(&e.addr).bind(e.e8)
                .execute(&self.pool)
                .await?;
            }
            EventBody::Stake(e) => {
                sqlx::query(
                    "INSERT INTO stake_events (block_timestamp, event_id, pool, asset_tx,
                     asset_chain, asset_e8, rune_tx, rune_addr, rune_e8, stake_units)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10) ON CONFLICT DO NOTHING",
                )
                .bind(ts).bind(id)
                .bind(&e.pool).bind(&e.asset_tx).bind(&e.asset_chain).bind(e.asset_e8)
                .bind(&e.rune_tx).bind(&e.rune_addr).bind(e.rune_e8).bind(e.stake_units)
                .execute(&self.pool)
                .await?;
            }
            EventBody::Swap(e) => {
                sqlx::query(
                    "INSERT INTO swap_events (block_timestamp, event_id, tx, chain, from_addr,
                     to_addr, from_asset, from_e8, to_e8, memo, pool, to_e8_min, trade_slip_bp,
                     liq_fee_e8, liq_fee_in_rune_e8)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
                     ON CONFLICT DO NOTHING",
                )
                .bind(ts).bind(id)
                .bind(&e.tx).bind(&e.chain).bind(&e.from_addr).bind(&e.to_addr)
                .bind(&e.from_asset).bind(e.from_e8).bind(e.to_e8).bind(&e.memo).bind(&e.pool)
                .bind(e.to_e8_min).bind(e.trade_slip_bp)
                .bind(e.liq_fee_e8).bind(e.liq_fee_in_rune_e8)
                .execute(&self.pool)
                .await?;
            }
            EventBody::Unstake(e) => {
                sqlx::query(
                    "INSERT INTO unstake_events (block_timestamp, event_id, tx, chain, from_addr,
                     to_addr, asset, asset_e8, memo, pool, stake_units, basis_points, asymmetry_bp)
                     VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13) ON CONFLICT DO NOTHING",
                )
                .bind(ts).bind(id)
                .bind(&e.tx).bind(&e.chain).bind(&e.from_addr).bind(&e.to_addr)
                .bind(&e.asset).bind(e.asset_e8).bind(&e.memo).bind(&e.pool)
                .bind(e.stake_units).bind(e.basis_points).bind(e.asymmetry_bp)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Distinct pool identifiers staked up to a moment.
    pub async fn pools_until(&self, ts_ns: i64) -> Result<Vec<String>, StoreError> {
        let rows =
            sqlx::query("SELECT pool FROM stake_events WHERE block_timestamp <= $1 GROUP BY pool")
                .bind(ts_ns)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(|row| row.get("pool")).collect())
    }

    /// Latest pool status label at a moment; empty when never set.
    pub async fn pool_status_until(&self, pool: &str, ts_ns: i64) -> Result<String, StoreError> {
        let row = sqlx::query(
            "SELECT status FROM pool_events WHERE asset = $1 AND block_timestamp <= $2
             ORDER BY block_timestamp DESC, event_id DESC LIMIT 1",
        )
        .bind(pool)
        .bind(ts_ns)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| row.get("status")).unwrap_or_default())
    }

    /// Distinct staker addresses known up to a moment.
    pub async fn stake_addrs_until(&self, ts_ns: i64) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT rune_addr FROM stake_events WHERE block_timestamp <= $1 GROUP BY rune_addr",
        )
        .bind(ts_ns)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("rune_addr")).collect())
    }
}
