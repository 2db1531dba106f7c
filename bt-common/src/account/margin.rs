use chrono::{DateTime, Utc};

use super::{apply_slippage, reverse_holdings, Account, AccountBase};
use crate::config::{round_down_to_step, EngineConfig, MARGIN_MAMR_LONG, MARGIN_MAMR_SHORT};
use crate::error::{Error, Result};
use crate::fee::FeeCalculator;
use crate::ids::OrderIdGenerator;
use crate::order::{AccountSubtype, Mode, Order, OrderRequest, Quantity, Side};
use crate::tape::Tape;

/// Binance-style isolated-margin liquidation price. `margin_balance` is
/// the posted margin for the position; at open time this equals
/// `notional / leverage` exactly, so callers pass that value directly.
///
/// Returns `Error::NoLiquidationRisk` when `margin_balance >= notional`
/// (only possible at `leverage == 1`), which the margin account's
/// `open` treats as a reject.
pub fn liquidation_price(
    entry: f64,
    qty: f64,
    notional: f64,
    margin_balance: f64,
    side: Side,
) -> Result<f64> {
    if margin_balance >= notional {
        return Err(Error::NoLiquidationRisk);
    }
    let price = match side {
        Side::Long => {
            let mamr_drop = MARGIN_MAMR_LONG * (notional - margin_balance) / qty;
            entry - (margin_balance / qty - mamr_drop)
        }
        Side::Short => {
            let mamr_drop = MARGIN_MAMR_SHORT * (notional + margin_balance) / qty;
            entry + (margin_balance / qty - mamr_drop)
        }
    };
    Ok(price)
}

/// Isolated margin: each order is an independently liquidatable position
/// with its own leverage and maintenance requirement.
#[derive(Debug, Clone)]
pub struct MarginAccount {
    base: AccountBase,
}

impl MarginAccount {
    pub fn new(subtype: AccountSubtype, initial_cash: f64) -> Self {
        MarginAccount {
            base: AccountBase::new(Mode::Margin, subtype, initial_cash),
        }
    }
}

impl Account for MarginAccount {
    fn base(&self) -> &AccountBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AccountBase {
        &mut self.base
    }

    fn open(
        &mut self,
        request: OrderRequest,
        ts: DateTime<Utc>,
        tape: &Tape,
        fee_calc: &FeeCalculator,
        ids: &mut OrderIdGenerator,
        config: &EngineConfig,
    ) -> Result<u64> {
        if request.leverage == 0 || request.leverage > config.margin_max_leverage {
            return Err(Error::InvalidLeverage {
                leverage: request.leverage,
                max: config.margin_max_leverage,
                mode: Mode::Margin,
            });
        }

        let mid = tape.price(&request.asset, ts)?;
        let slippage_rate = config.slippage.rate(Mode::Margin);
        let px = apply_slippage(mid, request.side, slippage_rate);

        let requested_qty = match request.qty {
            Quantity::Exact(q) => q,
            Quantity::AllCash => self.max_open_qty(px, request.leverage, request.side, config),
            Quantity::AllHoldings => {
                return Err(Error::InvalidQuantity(0.0));
            }
        };
        let qty = round_down_to_step(requested_qty, config.qty_step);
        if qty <= 0.0 {
            return Err(Error::InvalidQuantity(qty));
        }

        let notional = qty * px;
        let margin = notional / f64::from(request.leverage);
        let fee = fee_calc.trade_fee(Mode::Margin, self.base.subtype, notional);

        let required = margin + fee;
        if self.base.cash < required {
            return Err(Error::InsufficientCash {
                required,
                available: self.base.cash,
            });
        }

        let liquidation_price = liquidation_price(px, qty, notional, margin, request.side)?;

        self.base.cash -= required;
        super::apply_open_holdings(&mut self.base, &request.asset, qty, request.side);

        let id = ids.next_id();
        let order = Order {
            id,
            asset: request.asset,
            side: request.side,
            mode: Mode::Margin,
            leverage: request.leverage,
            closed: false,
            liquidated: false,
            entry_price: px,
            exit_price: None,
            price_change_pct: None,
            open_ts: ts,
            close_ts: None,
            qty,
            open_notional: notional,
            open_margin: margin,
            open_user: margin + fee,
            closed_notional: None,
            closed_amount: None,
            closed_user: None,
            unrealized_pnl: None,
            realized_pnl: None,
            roi_pct: None,
            realized_roi_pct: None,
            trade_fee_spot: 0.0,
            trade_fee_open: fee,
            trade_fee_close: 0.0,
            borrow_fee_margin: 0.0,
            funding_fee_futures: 0.0,
            liquidation_price: Some(liquidation_price),
        };
        self.base.open_orders.push(order);
        Ok(id)
    }

    fn close(
        &mut self,
        order_id: u64,
        ts: DateTime<Utc>,
        tape: &Tape,
        fee_calc: &FeeCalculator,
        config: &EngineConfig,
    ) -> Result<()> {
        let mut order = match self.base.take_open_order(order_id) {
            Some(order) => order,
            None => {
                if self.base.is_in_history(order_id) {
                    tracing::info!(order_id, "close: order already closed, no-op");
                    return Ok(());
                }
                return Err(Error::OrderNotFound(order_id));
            }
        };

        let mid = tape.price(&order.asset, ts)?;
        let px = apply_slippage(mid, order.side.opposite(), config.slippage.margin);

        let hours = (ts - order.open_ts).num_seconds() as f64 / 3600.0;
        let pnl = order.price_pnl(px);
        let fee = fee_calc.trade_fee(Mode::Margin, self.base.subtype, order.qty * px);
        let borrow_base = order.open_notional - order.open_margin;
        let borrow = fee_calc.borrow_fee(borrow_base, hours);
        let refund = order.qty * order.entry_price / f64::from(order.leverage);

        let closed_user = pnl + refund - fee - borrow;
        self.base.cash += closed_user;
        reverse_holdings(&mut self.base, &order.asset, order.qty, order.side);

        order.closed = true;
        order.exit_price = Some(px);
        order.price_change_pct = Some((px - order.entry_price) / order.entry_price * 100.0);
        order.close_ts = Some(ts);
        order.closed_notional = Some(order.qty * px);
        order.closed_amount = Some(pnl + refund);
        order.closed_user = Some(closed_user);
        order.unrealized_pnl = Some(pnl);
        order.realized_pnl = Some(closed_user - order.open_user);
        order.roi_pct = Some(pnl / order.open_margin * 100.0);
        order.realized_roi_pct = Some((closed_user - order.open_user) / order.open_user * 100.0);
        order.trade_fee_close = fee;
        order.borrow_fee_margin = borrow;

        self.base.history.push(order);
        Ok(())
    }

    fn update_portfolio_value(
        &mut self,
        tape: &Tape,
        ts: DateTime<Utc>,
        fee_calc: &FeeCalculator,
    ) -> Result<()> {
        let mut value = self.base.cash;
        for order in &self.base.open_orders {
            let price = tape.price(&order.asset, ts)?;
            let pnl = order.price_pnl(price);
            let fee = fee_calc.trade_fee(Mode::Margin, self.base.subtype, order.qty * price);
            let hours = (ts - order.open_ts).num_seconds() as f64 / 3600.0;
            let borrow_base = order.open_notional - order.open_margin;
            let borrow = fee_calc.borrow_fee(borrow_base, hours);
            let refund = order.qty * order.entry_price / f64::from(order.leverage);
            value += pnl + refund - fee - borrow;
        }
        self.base.portfolio_value = value;
        Ok(())
    }

    fn max_open_qty(&self, price: f64, leverage: u32, _side: Side, config: &EngineConfig) -> f64 {
        if price <= 0.0 || leverage == 0 {
            return 0.0;
        }
        let fee_rate = config.fee_structure.rate(Mode::Margin, self.base.subtype);
        self.base.cash / (price * (1.0 / f64::from(leverage) + fee_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidation_price_long_is_below_entry() {
        let entry = 100.0;
        let qty = 1.0;
        let leverage = 5.0;
        let notional = entry * qty;
        let margin_balance = notional / leverage;
        let liq = liquidation_price(entry, qty, notional, margin_balance, Side::Long).unwrap();
        assert!(liq < entry);
    }

    #[test]
    fn liquidation_price_short_is_above_entry() {
        let entry = 100.0;
        let qty = 1.0;
        let leverage = 5.0;
        let notional = entry * qty;
        let margin_balance = notional / leverage;
        let liq = liquidation_price(entry, qty, notional, margin_balance, Side::Short).unwrap();
        assert!(liq > entry);
    }

    #[test]
    fn full_leverage_one_has_no_liquidation_risk() {
        let entry = 100.0;
        let qty = 1.0;
        let notional = entry * qty;
        let margin_balance = notional;
        let err = liquidation_price(entry, qty, notional, margin_balance, Side::Long).unwrap_err();
        assert!(matches!(err, Error::NoLiquidationRisk));
    }
}
