use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Account modality. Each user owns at most one account per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Spot,
    Margin,
    Futures,
}

/// Account subtype, a second key into the fee table alongside `Mode`.
/// Only `Regular` is modeled; the type exists so the fee table is
/// already keyed to leave room for VIP tiers without reshaping the
/// config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountSubtype {
    Regular,
}

/// Position direction. Spot reuses `Long`/`Short` for buy/sell since a
/// spot order is simply a signed qty delta with no separate leverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

/// Requested order quantity, before resolution against account state.
/// `AllCash`/`AllHoldings` are resolved to `Exact` once, at open time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Exact(f64),
    AllCash,
    AllHoldings,
}

/// Parameters for opening a new position. The resulting `Order` is a
/// separate, fully-resolved record; this is the request shape only.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub asset: String,
    pub side: Side,
    pub leverage: u32,
    pub qty: Quantity,
}

impl OrderRequest {
    pub fn new(asset: impl Into<String>, side: Side, leverage: u32, qty: Quantity) -> Self {
        OrderRequest {
            asset: asset.into(),
            side,
            leverage,
            qty,
        }
    }
}

/// A single position, spot, margin, or futures. Orders never merge: every
/// open or close call creates or mutates exactly one `Order`. An order
/// lives in exactly one of an account's `open_orders` or `history` at a
/// time; `record_close` in `account` moves it across that boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub asset: String,
    pub side: Side,
    pub mode: Mode,
    pub leverage: u32,

    pub closed: bool,
    pub liquidated: bool,

    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub price_change_pct: Option<f64>,

    pub open_ts: DateTime<Utc>,
    pub close_ts: Option<DateTime<Utc>>,

    pub qty: f64,
    pub open_notional: f64,
    pub open_margin: f64,
    pub open_user: f64,

    pub closed_notional: Option<f64>,
    pub closed_amount: Option<f64>,
    pub closed_user: Option<f64>,

    pub unrealized_pnl: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub roi_pct: Option<f64>,
    pub realized_roi_pct: Option<f64>,

    pub trade_fee_spot: f64,
    pub trade_fee_open: f64,
    pub trade_fee_close: f64,
    pub borrow_fee_margin: f64,
    pub funding_fee_futures: f64,

    pub liquidation_price: Option<f64>,
}

impl Order {
    /// Unrealized PnL, sign-aware, for the given mark price. Used both by
    /// mark-to-market and by the liquidation detector's ROI bookkeeping.
    pub fn price_pnl(&self, mark_price: f64) -> f64 {
        (mark_price - self.entry_price) * self.qty * self.side.sign()
    }
}
