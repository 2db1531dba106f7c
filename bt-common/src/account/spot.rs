use chrono::{DateTime, Utc};

use super::{apply_slippage, Account, AccountBase};
use crate::config::{round_down_to_step, EngineConfig};
use crate::error::{Error, Result};
use crate::fee::FeeCalculator;
use crate::ids::OrderIdGenerator;
use crate::order::{AccountSubtype, Mode, Order, OrderRequest, Quantity, Side};
use crate::tape::Tape;

/// A spot order is a single immediate trade: there is no holding-period
/// state, so it is recorded directly in `history` with `closed = true`
/// and never appears in `open_orders`. `close`/`close_all_*` are no-ops.
#[derive(Debug, Clone)]
pub struct SpotAccount {
    base: AccountBase,
}

impl SpotAccount {
    pub fn new(subtype: AccountSubtype, initial_cash: f64) -> Self {
        SpotAccount {
            base: AccountBase::new(Mode::Spot, subtype, initial_cash),
        }
    }

    /// `cash / (px * (1 + fee_rate))`, the largest buy quantity that
    /// leaves cash non-negative after fees. Zero for a non-positive
    /// price or the sell side, which has no analogous cash constraint.
    fn max_buy_qty(&self, px: f64, fee_rate: f64) -> f64 {
        if px <= 0.0 {
            return 0.0;
        }
        self.base.cash / (px * (1.0 + fee_rate))
    }

    pub fn max_sell_qty(&self, asset: &str) -> f64 {
        self.base.holdings_of(asset).max(0.0)
    }
}

impl Account for SpotAccount {
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
        let slippage_rate = config.slippage.rate(Mode::Spot);
        let px = apply_slippage(mid, request.side, slippage_rate);
        let fee_rate = config.fee_structure.rate(Mode::Spot, self.base.subtype);

        let requested_qty = match request.qty {
            Quantity::Exact(q) => q,
            Quantity::AllCash => match request.side {
                Side::Long => self.max_buy_qty(px, fee_rate),
                Side::Short => 0.0,
            },
            Quantity::AllHoldings => match request.side {
                Side::Short => self.max_sell_qty(&request.asset),
                Side::Long => 0.0,
            },
        };
        let qty = round_down_to_step(requested_qty, config.qty_step);
        if qty <= 0.0 {
            return Err(Error::InvalidQuantity(qty));
        }

        let notional = qty * px;
        let fee = fee_calc.trade_fee(Mode::Spot, self.base.subtype, notional);

        let open_user = match request.side {
            Side::Long => {
                let required = notional + fee;
                if self.base.cash < required {
                    return Err(Error::InsufficientCash {
                        required,
                        available: self.base.cash,
                    });
                }
                self.base.cash -= required;
                super::apply_open_holdings(&mut self.base, &request.asset, qty, Side::Long);
                required
            }
            Side::Short => {
                let available = self.base.holdings_of(&request.asset);
                if available < qty {
                    return Err(Error::InsufficientHoldings {
                        required: qty,
                        available,
                    });
                }
                let proceeds = notional - fee;
                self.base.cash += proceeds;
                super::reverse_holdings(&mut self.base, &request.asset, qty, Side::Short);
                proceeds
            }
        };

        let id = ids.next_id();
        let order = Order {
            id,
            asset: request.asset,
            side: request.side,
            mode: Mode::Spot,
            leverage: 1,
            closed: true,
            liquidated: false,
            entry_price: px,
            exit_price: Some(px),
            price_change_pct: Some(0.0),
            open_ts: ts,
            close_ts: Some(ts),
            qty,
            open_notional: notional,
            open_margin: notional,
            open_user,
            closed_notional: Some(notional),
            closed_amount: Some(notional),
            closed_user: Some(open_user),
            unrealized_pnl: Some(0.0),
            realized_pnl: Some(0.0),
            roi_pct: Some(0.0),
            realized_roi_pct: Some(0.0),
            trade_fee_spot: fee,
            trade_fee_open: fee,
            trade_fee_close: 0.0,
            borrow_fee_margin: 0.0,
            funding_fee_futures: 0.0,
            liquidation_price: None,
        };
        self.base.history.push(order);
        Ok(id)
    }

    fn close(
        &mut self,
        _order_id: u64,
        _ts: DateTime<Utc>,
        _tape: &Tape,
        _fee_calc: &FeeCalculator,
        _config: &EngineConfig,
    ) -> Result<()> {
        Err(Error::InvalidPositionType(Mode::Spot))
    }

    fn update_portfolio_value(
        &mut self,
        tape: &Tape,
        ts: DateTime<Utc>,
        fee_calc: &FeeCalculator,
    ) -> Result<()> {
        let mut value = self.base.cash;
        for (asset, qty) in self.base.holdings.clone() {
            if qty == 0.0 {
                continue;
            }
            let price = tape.price(&asset, ts)?;
            let gross = qty * price;
            let liquidation_fee = fee_calc.trade_fee(Mode::Spot, self.base.subtype, gross);
            value += gross - liquidation_fee;
        }
        self.base.portfolio_value = value;
        Ok(())
    }

    fn max_open_qty(&self, price: f64, _leverage: u32, side: Side, config: &EngineConfig) -> f64 {
        match side {
            Side::Long => {
                let fee_rate = config.fee_structure.rate(Mode::Spot, self.base.subtype);
                self.max_buy_qty(price, fee_rate)
            }
            Side::Short => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::Bar;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn tape_at_price(asset: &str, ts: DateTime<Utc>, price: f64) -> Tape {
        let bar = Bar {
            timestamp: ts,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        };
        let mut data = HashMap::new();
        data.insert(asset.to_string(), vec![bar]);
        Tape::new(vec![asset.to_string()], data).unwrap()
    }

    #[test]
    fn buy_all_cash_truncates_to_the_step_grid() {
        let ts = Utc.timestamp_opt(0, 0).unwrap();
        let tape = tape_at_price("BTC", ts, 100.0);
        let config = EngineConfig::default();
        let fee_calc = FeeCalculator::new(&config);
        let mut ids = OrderIdGenerator::default();
        let mut account = SpotAccount::new(AccountSubtype::Regular, 10_000.0);

        let request = OrderRequest::new("BTC", Side::Long, 1, Quantity::AllCash);
        account
            .open(request, ts, &tape, &fee_calc, &mut ids, &config)
            .unwrap();

        assert!((account.base.holdings_of("BTC") - 99.85020).abs() < 1e-5);
        assert!(account.base.cash >= 0.0 && account.base.cash < 1e-4);
    }

    #[test]
    fn round_trip_buy_then_sell_loses_fees_and_spread() {
        let ts = Utc.timestamp_opt(0, 0).unwrap();
        let tape = tape_at_price("BTC", ts, 100.0);
        let config = EngineConfig::default();
        let fee_calc = FeeCalculator::new(&config);
        let mut ids = OrderIdGenerator::default();
        let mut account = SpotAccount::new(AccountSubtype::Regular, 10_000.0);

        account
            .open(
                OrderRequest::new("BTC", Side::Long, 1, Quantity::AllCash),
                ts,
                &tape,
                &fee_calc,
                &mut ids,
                &config,
            )
            .unwrap();
        account
            .open(
                OrderRequest::new("BTC", Side::Short, 1, Quantity::AllHoldings),
                ts,
                &tape,
                &fee_calc,
                &mut ids,
                &config,
            )
            .unwrap();

        assert!(account.base.cash < 10_000.0);
        assert!((account.base.cash - 9_970.1).abs() < 1.0);
    }
}
