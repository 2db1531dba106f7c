use chrono::{DateTime, Utc};

use super::{apply_slippage, reverse_holdings, Account, AccountBase};
use crate::config::{lookup_maintenance_tier, round_down_to_step, EngineConfig, FUNDING_PERIOD_HOURS};
use crate::error::{Error, Result};
use crate::fee::FeeCalculator;
use crate::ids::OrderIdGenerator;
use crate::order::{AccountSubtype, Mode, Order, OrderRequest, Quantity, Side};
use crate::tape::Tape;

/// Linear-perpetual liquidation price against the tiered maintenance
/// table. A long position whose posted margin already covers the full
/// notional cannot be liquidated; this surfaces as `liquidation_price ==
/// 0.0` (not an error) rather than being left unset, so callers never
/// have to special-case an absent price.
pub fn liquidation_price(
    entry: f64,
    qty: f64,
    notional: f64,
    margin_balance: f64,
    mmr: f64,
    maintenance_amount: f64,
    side: Side,
) -> f64 {
    match side {
        Side::Long => {
            if margin_balance >= notional {
                return 0.0;
            }
            (margin_balance + maintenance_amount - qty * entry) / (qty * mmr - qty)
        }
        Side::Short => (margin_balance + maintenance_amount + qty * entry) / (qty * mmr + qty),
    }
}

/// Number of funding boundaries (every `FUNDING_PERIOD_HOURS`, counted
/// from the Unix epoch) strictly between `open_ts` and `close_ts`.
fn funding_events_between(open_ts: DateTime<Utc>, close_ts: DateTime<Utc>) -> u32 {
    let period_secs = (FUNDING_PERIOD_HOURS * 3600.0) as i64;
    let open_secs = open_ts.timestamp();
    let close_secs = close_ts.timestamp();
    if close_secs <= open_secs {
        return 0;
    }
    let n_min = open_secs.div_euclid(period_secs) + 1;
    let n_max = (close_secs - 1).div_euclid(period_secs);
    if n_max < n_min {
        0
    } else {
        (n_max - n_min + 1) as u32
    }
}

/// Linear perpetual futures: structurally identical to margin for
/// open/close/PnL/fees, but maintenance margin comes from the notional
/// bracket's tier rather than a single fixed rate, and the periodic cost
/// of holding a position is funding rather than borrow interest.
#[derive(Debug, Clone)]
pub struct FuturesAccount {
    base: AccountBase,
}

impl FuturesAccount {
    pub fn new(subtype: AccountSubtype, initial_cash: f64) -> Self {
        FuturesAccount {
            base: AccountBase::new(Mode::Futures, subtype, initial_cash),
        }
    }
}

impl Account for FuturesAccount {
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
        let mid = tape.price(&request.asset, ts)?;
        let slippage_rate = config.slippage.rate(Mode::Futures);
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
        let tier = lookup_maintenance_tier(notional).ok_or(Error::NotionalOutOfRange(notional))?;
        if request.leverage == 0 || request.leverage > tier.max_leverage {
            return Err(Error::InvalidLeverage {
                leverage: request.leverage,
                max: tier.max_leverage,
                mode: Mode::Futures,
            });
        }

        let margin = notional / f64::from(request.leverage);
        let fee = fee_calc.trade_fee(Mode::Futures, self.base.subtype, notional);

        let required = margin + fee;
        if self.base.cash < required {
            return Err(Error::InsufficientCash {
                required,
                available: self.base.cash,
            });
        }

        let liquidation_price = liquidation_price(
            px,
            qty,
            notional,
            margin,
            tier.mmr,
            tier.maintenance_amount,
            request.side,
        );

        self.base.cash -= required;
        super::apply_open_holdings(&mut self.base, &request.asset, qty, request.side);

        let id = ids.next_id();
        let order = Order {
            id,
            asset: request.asset,
            side: request.side,
            mode: Mode::Futures,
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
        let px = apply_slippage(mid, order.side.opposite(), config.slippage.futures);

        let pnl = order.price_pnl(px);
        let fee = fee_calc.trade_fee(Mode::Futures, self.base.subtype, order.qty * px);
        let n_events = funding_events_between(order.open_ts, ts);
        let funding = fee_calc.funding_fee(order.open_notional, n_events);
        let refund = order.qty * order.entry_price / f64::from(order.leverage);

        let closed_user = pnl + refund - fee - funding;
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
        order.funding_fee_futures = funding;

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
            let fee = fee_calc.trade_fee(Mode::Futures, self.base.subtype, order.qty * price);
            let n_events = funding_events_between(order.open_ts, ts);
            let funding = fee_calc.funding_fee(order.open_notional, n_events);
            let refund = order.qty * order.entry_price / f64::from(order.leverage);
            value += pnl + refund - fee - funding;
        }
        self.base.portfolio_value = value;
        Ok(())
    }

    fn max_open_qty(&self, price: f64, leverage: u32, _side: Side, config: &EngineConfig) -> f64 {
        if price <= 0.0 || leverage == 0 {
            return 0.0;
        }
        let fee_rate = config.fee_structure.rate(Mode::Futures, self.base.subtype);
        self.base.cash / (price * (1.0 / f64::from(leverage) + fee_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_liquidation_price_is_above_entry() {
        let entry = 100_000.0;
        let qty = 10.0;
        let leverage = 10.0;
        let notional = entry * qty;
        let margin_balance = notional / leverage;
        let tier = lookup_maintenance_tier(notional).unwrap();
        let liq = liquidation_price(
            entry,
            qty,
            notional,
            margin_balance,
            tier.mmr,
            tier.maintenance_amount,
            Side::Short,
        );
        // tier [800k, 5M) applies at this notional: mmr=0.0065, MA=1500.
        assert!((liq - 109_438.65).abs() < 1.0);
        assert!(liq > entry);
    }

    #[test]
    fn long_fully_covered_position_cannot_be_liquidated() {
        let entry = 100.0;
        let qty = 1.0;
        let notional = entry * qty;
        let margin_balance = notional;
        let liq = liquidation_price(entry, qty, notional, margin_balance, 0.004, 0.0, Side::Long);
        assert_eq!(liq, 0.0);
    }

    #[test]
    fn funding_events_counts_boundaries_strictly_between() {
        use chrono::TimeZone;
        let open_ts = Utc.timestamp_opt(0, 0).unwrap();
        let close_ts = Utc.timestamp_opt(8 * 3600 * 3, 0).unwrap();
        assert_eq!(funding_events_between(open_ts, close_ts), 2);
    }
}
