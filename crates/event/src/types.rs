//! Event records and attribute-bag decoding.
//!
//! Amounts are integer E8 units (value × 10⁸), parsed as decimal `i64`; the
//! protocol never emits floating point for money. Unknown attribute keys are
//! ignored so new node versions can add fields without breaking the indexer.
//! Records reset on every `load` because the demultiplexer reuses them.

use std::num::ParseIntError;
use thiserror::Error;
use tideline_chain::EventAttr;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("required attribute {0:?} missing")]
    Missing(&'static str),
    #[error("attribute {key:?} is not a whole number: {source}")]
    Int {
        key: &'static str,
        source: ParseIntError,
    },
    #[error("unknown event kind")]
    UnknownKind,
}

fn find<'a>(attrs: &'a [EventAttr], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|attr| attr.key == key)
        .map(|attr| attr.value.as_str())
}

fn req_str(attrs: &[EventAttr], key: &'static str) -> Result<String, ParseError> {
    find(attrs, key)
        .map(str::to_owned)
        .ok_or(ParseError::Missing(key))
}

/// Missing optional strings decode as empty.
fn opt_str(attrs: &[EventAttr], key: &'static str) -> String {
    find(attrs, key).unwrap_or_default().to_owned()
}

fn req_i64(attrs: &[EventAttr], key: &'static str) -> Result<i64, ParseError> {
    let s = find(attrs, key).ok_or(ParseError::Missing(key))?;
    s.parse().map_err(|source| ParseError::Int { key, source })
}

/// Missing optional numbers decode as zero; present ones must still parse.
fn opt_i64(attrs: &[EventAttr], key: &'static str) -> Result<i64, ParseError> {
    match find(attrs, key) {
        None => Ok(0),
        Some(s) => s.parse().map_err(|source| ParseError::Int { key, source }),
    }
}

/// Liquidity added to one side of a pool outside of staking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Add {
    pub tx: String,
    pub chain: String,
    pub from_addr: String,
    pub to_addr: String,
    pub asset: String,
    pub asset_e8: i64,
    pub memo: String,
    pub rune_e8: i64,
    pub pool: String,
}

impl Add {
    pub fn load(&mut self, attrs: &[EventAttr]) -> Result<(), ParseError> {
        *self = Self {
            tx: req_str(attrs, "id")?,
            chain: req_str(attrs, "chain")?,
            from_addr: req_str(attrs, "from")?,
            to_addr: opt_str(attrs, "to"),
            asset: req_str(attrs, "asset")?,
            asset_e8: opt_i64(attrs, "asset_amount")?,
            memo: opt_str(attrs, "memo"),
            rune_e8: opt_i64(attrs, "rune_amount")?,
            pool: req_str(attrs, "pool")?,
        };
        Ok(())
    }
}

/// Network fee charged against a pool's native-asset side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fee {
    pub tx: String,
    pub asset: String,
    pub asset_e8: i64,
    /// Native-asset amount deducted from the pool.
    pub pool_deduct: i64,
}

impl Fee {
    pub fn load(&mut self, attrs: &[EventAttr]) -> Result<(), ParseError> {
        *self = Self {
            tx: req_str(attrs, "tx_id")?,
            asset: req_str(attrs, "asset")?,
            asset_e8: opt_i64(attrs, "asset_amount")?,
            pool_deduct: req_i64(attrs, "pool_deduct")?,
        };
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub from_addr: String,
    pub action: String,
}

impl Message {
    pub fn load(&mut self, attrs: &[EventAttr]) -> Result<(), ParseError> {
        *self = Self {
            from_addr: opt_str(attrs, "from"),
            action: req_str(attrs, "action")?,
        };
        Ok(())
    }
}

/// Transfer emitted by the protocol in response to a swap or unstake,
/// linked to its origin by `in_tx`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outbound {
    pub tx: String,
    pub chain: String,
    pub from_addr: String,
    pub to_addr: String,
    pub asset: String,
    pub asset_e8: i64,
    pub memo: String,
    /// Transaction id of the event that caused this transfer.
    pub in_tx: String,
}

impl Outbound {
    pub fn load(&mut self, attrs: &[EventAttr]) -> Result<(), ParseError> {
        *self = Self {
            tx: opt_str(attrs, "id"),
            chain: req_str(attrs, "chain")?,
            from_addr: req_str(attrs, "from")?,
            to_addr: req_str(attrs, "to")?,
            asset: req_str(attrs, "asset")?,
            asset_e8: req_i64(attrs, "asset_amount")?,
            memo: opt_str(attrs, "memo"),
            in_tx: req_str(attrs, "in_tx_id")?,
        };
        Ok(())
    }
}

/// Pool status transition: available, staged or suspended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pool {
    pub asset: String,
    pub status: String,
}

impl Pool {
    pub fn load(&mut self, attrs: &[EventAttr]) -> Result<(), ParseError> {
        *self = Self {
            asset: req_str(attrs, "pool")?,
            status: req_str(attrs, "pool_status")?,
        };
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Refund {
    pub tx: String,
    pub chain: String,
    pub from_addr: String,
    pub to_addr: String,
    pub asset: String,
    pub asset_e8: i64,
    pub memo: String,
    pub code: i64,
    pub reason: String,
}

impl Refund {
    pub fn load(&mut self, attrs: &[EventAttr]) -> Result<(), ParseError> {
        *self = Self {
            tx: req_str(attrs, "id")?,
            chain: req_str(attrs, "chain")?,
            from_addr: req_str(attrs, "from")?,
            to_addr: opt_str(attrs, "to"),
            asset: req_str(attrs, "asset")?,
            asset_e8: opt_i64(attrs, "asset_amount")?,
            memo: opt_str(attrs, "memo"),
            code: req_i64(attrs, "code")?,
            reason: opt_str(attrs, "reason"),
        };
        Ok(())
    }
}

/// Contribution to the protocol reserve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reserve {
    pub tx: String,
    pub chain: String,
    pub from_addr: String,
    pub to_addr: String,
    pub asset: String,
    pub asset_e8: i64,
    pub memo: String,
    pub addr: String,
    /// Native-asset amount added to the reserve.
    pub e8: i64,
}

impl Reserve {
    pub fn load(&mut self, attrs: &[EventAttr]) -> Result<(), ParseError> {
        *self = Self {
            tx: req_str(attrs, "id")?,
            chain: req_str(attrs, "chain")?,
            from_addr: req_str(attrs, "from")?,
            to_addr: opt_str(attrs, "to"),
            asset: req_str(attrs, "asset")?,
            asset_e8: opt_i64(attrs, "asset_amount")?,
            memo: opt_str(attrs, "memo"),
            addr: req_str(attrs, "contributor_address")?,
            e8: req_i64(attrs, "amount")?,
        };
        Ok(())
    }
}

/// Liquidity provided to both sides of a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stake {
    pub pool: String,
    pub asset_tx: String,
    pub asset_chain: String,
    pub asset_e8: i64,
    pub rune_tx: String,
    pub rune_addr: String,
    pub rune_e8: i64,
    pub stake_units: i64,
}

impl Stake {
    pub fn load(&mut self, attrs: &[EventAttr]) -> Result<(), ParseError> {
        *self = Self {
            pool: req_str(attrs, "pool")?,
            asset_tx: opt_str(attrs, "asset_tx"),
            asset_chain: opt_str(attrs, "asset_chain"),
            asset_e8: req_i64(attrs, "asset_amount")?,
            rune_tx: opt_str(attrs, "rune_tx"),
            rune_addr: opt_str(attrs, "rune_address"),
            rune_e8: req_i64(attrs, "rune_amount")?,
            stake_units: opt_i64(attrs, "stake_units")?,
        };
        Ok(())
    }
}

/// Trade through a pool. `from_asset` names the input side; the output side
/// is the pool's other leg.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Swap {
    pub tx: String,
    pub chain: String,
    pub from_addr: String,
    pub to_addr: String,
    pub from_asset: String,
    pub from_e8: i64,
    pub to_e8: i64,
    pub memo: String,
    pub pool: String,
    pub to_e8_min: i64,
    pub trade_slip_bp: i64,
    pub liq_fee_e8: i64,
    pub liq_fee_in_rune_e8: i64,
}

impl Swap {
    pub fn load(&mut self, attrs: &[EventAttr]) -> Result<(), ParseError> {
        *self = Self {
            tx: req_str(attrs, "id")?,
            chain: req_str(attrs, "chain")?,
            from_addr: req_str(attrs, "from")?,
            to_addr: opt_str(attrs, "to"),
            from_asset: req_str(attrs, "from_asset")?,
            from_e8: req_i64(attrs, "from_amount")?,
            to_e8: req_i64(attrs, "to_amount")?,
            memo: opt_str(attrs, "memo"),
            pool: req_str(attrs, "pool")?,
            to_e8_min: opt_i64(attrs, "to_min")?,
            trade_slip_bp: opt_i64(attrs, "trade_slip")?,
            liq_fee_e8: opt_i64(attrs, "liquidity_fee")?,
            liq_fee_in_rune_e8: opt_i64(attrs, "liquidity_fee_in_rune")?,
        };
        Ok(())
    }
}

/// Liquidity withdrawn from a pool; the transfers follow as Outbound events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unstake {
    pub tx: String,
    pub chain: String,
    pub from_addr: String,
    pub to_addr: String,
    pub asset: String,
    pub asset_e8: i64,
    pub memo: String,
    pub pool: String,
    pub stake_units: i64,
    pub basis_points: i64,
    pub asymmetry_bp: i64,
}

impl Unstake {
    pub fn load(&mut self, attrs: &[EventAttr]) -> Result<(), ParseError> {
        *self = Self {
            tx: req_str(attrs, "id")?,
            chain: req_str(attrs, "chain")?,
            from_addr: req_str(attrs, "from")?,
            to_addr: opt_str(attrs, "to"),
            asset: req_str(attrs, "asset")?,
            asset_e8: opt_i64(attrs, "asset_amount")?,
            memo: opt_str(attrs, "memo"),
            pool: req_str(attrs, "pool")?,
            stake_units: req_i64(attrs, "stake_units")?,
            basis_points: req_i64(attrs, "basis_points")?,
            asymmetry_bp: opt_i64(attrs, "asymmetry")?,
        };
        Ok(())
    }
}
