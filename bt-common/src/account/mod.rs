pub mod futures;
pub mod margin;
pub mod spot;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::fee::FeeCalculator;
use crate::ids::OrderIdGenerator;
use crate::order::{AccountSubtype, Mode, Order, OrderRequest, Side};
use crate::tape::Tape;

pub use futures::FuturesAccount;
pub use margin::MarginAccount;
pub use spot::SpotAccount;

/// Fields shared by every account mode: identity, cash, holdings, and the
/// open/history order sets. Mode-specific structs embed this rather than
/// inheriting from it; the shared behavior that needs it lives as free
/// functions below and as default methods on the `Account` trait.
#[derive(Debug, Clone, Serialize)]
pub struct AccountBase {
    pub name: String,
    pub mode: Mode,
    pub subtype: AccountSubtype,
    pub initial_cash: f64,
    pub cash: f64,
    pub portfolio_value: f64,
    pub holdings: HashMap<String, f64>,
    pub open_orders: Vec<Order>,
    pub history: Vec<Order>,
}

impl AccountBase {
    pub fn new(mode: Mode, subtype: AccountSubtype, initial_cash: f64) -> Self {
        AccountBase {
            name: mode.to_string(),
            mode,
            subtype,
            initial_cash,
            cash: initial_cash,
            portfolio_value: initial_cash,
            holdings: HashMap::new(),
            open_orders: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn holdings_of(&self, asset: &str) -> f64 {
        self.holdings.get(asset).copied().unwrap_or(0.0)
    }

    fn adjust_holdings(&mut self, asset: &str, delta: f64) {
        let entry = self.holdings.entry(asset.to_string()).or_insert(0.0);
        *entry += delta;
    }

    /// Removes and returns the open order with the given id, if present.
    pub fn take_open_order(&mut self, order_id: u64) -> Option<Order> {
        let pos = self.open_orders.iter().position(|o| o.id == order_id)?;
        Some(self.open_orders.remove(pos))
    }

    pub fn find_open_order(&self, order_id: u64) -> Option<&Order> {
        self.open_orders.iter().find(|o| o.id == order_id)
    }

    pub fn is_in_history(&self, order_id: u64) -> bool {
        self.history.iter().any(|o| o.id == order_id)
    }
}

/// Applies slippage to `mid_price` for the given side: long/buy pays a
/// higher price, short/sell receives a lower one. Used both when opening
/// (the requested side) and when closing (the opposite side).
pub fn apply_slippage(mid_price: f64, side: Side, rate: f64) -> f64 {
    match side {
        Side::Long => mid_price * (1.0 + rate),
        Side::Short => mid_price * (1.0 - rate),
    }
}

/// Reverses the holdings delta an open created: `+qty` for long becomes
/// `-qty` on close/liquidation, and vice versa.
pub fn reverse_holdings(base: &mut AccountBase, asset: &str, qty: f64, side: Side) {
    base.adjust_holdings(asset, -qty * side.sign());
}

pub fn apply_open_holdings(base: &mut AccountBase, asset: &str, qty: f64, side: Side) {
    base.adjust_holdings(asset, qty * side.sign());
}

/// Books a liquidation against an already-located open order: total loss
/// of posted margin, no cash credit, `realized_roi_pct = -100`. Shared by
/// the margin and futures liquidation paths (`9`'s design note: this
/// bookkeeping is identical for both isolated modes).
pub fn liquidate_order(
    base: &mut AccountBase,
    mut order: Order,
    current_price: f64,
    ts: DateTime<Utc>,
) -> Order {
    reverse_holdings(base, &order.asset, order.qty, order.side);
    order.closed = true;
    order.liquidated = true;
    order.exit_price = Some(current_price);
    order.close_ts = Some(ts);
    order.closed_notional = Some(order.qty * current_price);
    order.closed_amount = Some(0.0);
    order.closed_user = Some(0.0);
    order.unrealized_pnl = Some(-order.open_margin);
    order.realized_pnl = Some(-order.open_margin);
    order.roi_pct = Some(-100.0);
    order.realized_roi_pct = Some(-100.0);
    base.history.push(order.clone());
    order
}

pub fn count_long_short_by_asset(base: &AccountBase, asset: &str) -> (u32, u32) {
    base.open_orders
        .iter()
        .filter(|o| o.asset == asset)
        .fold((0, 0), |(longs, shorts), o| match o.side {
            Side::Long => (longs + 1, shorts),
            Side::Short => (longs, shorts + 1),
        })
}

/// Shared capability set dispatched on by mode. Each mode-specific struct
/// (`SpotAccount`, `MarginAccount`, `FuturesAccount`) implements `open`,
/// `close`, `update_portfolio_value` and `max_open_qty` with its own
/// semantics; the bulk-close helpers are free default methods built on
/// top of `close`.
pub trait Account {
    fn base(&self) -> &AccountBase;
    fn base_mut(&mut self) -> &mut AccountBase;

    fn open(
        &mut self,
        request: OrderRequest,
        ts: DateTime<Utc>,
        tape: &Tape,
        fee_calc: &FeeCalculator,
        ids: &mut OrderIdGenerator,
        config: &EngineConfig,
    ) -> Result<u64>;

    fn close(
        &mut self,
        order_id: u64,
        ts: DateTime<Utc>,
        tape: &Tape,
        fee_calc: &FeeCalculator,
        config: &EngineConfig,
    ) -> Result<()>;

    fn update_portfolio_value(
        &mut self,
        tape: &Tape,
        ts: DateTime<Utc>,
        fee_calc: &FeeCalculator,
    ) -> Result<()>;

    fn max_open_qty(&self, price: f64, leverage: u32, side: Side, config: &EngineConfig) -> f64;

    fn close_all_open_orders(
        &mut self,
        ts: DateTime<Utc>,
        tape: &Tape,
        fee_calc: &FeeCalculator,
        config: &EngineConfig,
    ) -> Result<()> {
        let ids: Vec<u64> = self.base().open_orders.iter().map(|o| o.id).collect();
        for id in ids {
            if let Err(err) = self.close(id, ts, tape, fee_calc, config) {
                tracing::warn!(order_id = id, %err, "close_all_open_orders: skipping order");
            }
        }
        Ok(())
    }

    fn close_all_open_orders_by_asset(
        &mut self,
        asset: &str,
        ts: DateTime<Utc>,
        tape: &Tape,
        fee_calc: &FeeCalculator,
        config: &EngineConfig,
    ) -> Result<()> {
        let ids: Vec<u64> = self
            .base()
            .open_orders
            .iter()
            .filter(|o| o.asset == asset)
            .map(|o| o.id)
            .collect();
        for id in ids {
            if let Err(err) = self.close(id, ts, tape, fee_calc, config) {
                tracing::warn!(order_id = id, %err, "close_all_open_orders_by_asset: skipping order");
            }
        }
        Ok(())
    }

    fn close_all_open_orders_by_asset_and_side(
        &mut self,
        asset: &str,
        side: Side,
        ts: DateTime<Utc>,
        tape: &Tape,
        fee_calc: &FeeCalculator,
        config: &EngineConfig,
    ) -> Result<()> {
        let ids: Vec<u64> = self
            .base()
            .open_orders
            .iter()
            .filter(|o| o.asset == asset && o.side == side)
            .map(|o| o.id)
            .collect();
        for id in ids {
            if let Err(err) = self.close(id, ts, tape, fee_calc, config) {
                tracing::warn!(order_id = id, %err, "close_all_open_orders_by_asset_and_side: skipping order");
            }
        }
        Ok(())
    }

    fn count_long_short_by_asset(&self, asset: &str) -> (u32, u32) {
        count_long_short_by_asset(self.base(), asset)
    }
}
