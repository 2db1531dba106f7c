use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::account::{liquidate_order, Account};
use crate::config::{EngineConfig, FeeStructure, SlippageConfig};
use crate::error::{Error, Result};
use crate::fee::FeeCalculator;
use crate::ids::OrderIdGenerator;
use crate::order::{Mode, Order, OrderRequest, Side};
use crate::tape::Tape;
use crate::user::{PortfolioSample, User, UserRegistration};

/// Scans one account's open orders for liquidation breaches at the
/// current price and books any that are hit. Shared across margin and
/// futures (and harmlessly a no-op for spot, which never has open
/// orders) via the `Account` trait's `base_mut` accessor.
fn sweep_account(account: &mut dyn Account, tape: &Tape, ts: DateTime<Utc>) {
    let base = account.base_mut();
    let ids: Vec<u64> = base.open_orders.iter().map(|o| o.id).collect();
    for id in ids {
        let Some(order) = base.find_open_order(id) else {
            continue;
        };
        let asset = order.asset.clone();
        let liquidation_price = order.liquidation_price.unwrap_or(0.0);
        let side = order.side;

        let current_price = match tape.price(&asset, ts) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(order_id = id, %err, "liquidation sweep: price lookup failed, skipping order");
                continue;
            }
        };

        let breached = match side {
            Side::Long => liquidation_price > 0.0 && current_price <= liquidation_price,
            Side::Short => current_price >= liquidation_price,
        };
        if !breached {
            continue;
        }
        if let Some(order) = base.take_open_order(id) {
            liquidate_order(base, order, current_price, ts);
            tracing::info!(order_id = id, %asset, current_price, "order liquidated");
        }
    }
}

/// The accounting core's orchestrator: owns the tape, the fee
/// calculator, and the user registry, and drives the per-bar loop
/// (liquidation sweep -> user orders -> mark-to-market -> clock
/// advance).
pub struct Engine {
    tape: Tape,
    config: EngineConfig,
    fee_calc: FeeCalculator,
    users: HashMap<String, User>,
    current_ts: DateTime<Utc>,
    ids: OrderIdGenerator,
    id_seed: u64,
    update_daywise: bool,
}

impl Engine {
    pub fn new(tape: Tape, config: EngineConfig, id_seed: u64) -> Result<Engine> {
        let pace = tape.assets()[0].clone();
        let current_ts = tape.first_ts(&pace)?;
        let fee_calc = FeeCalculator::new(&config);
        Ok(Engine {
            tape,
            config,
            fee_calc,
            users: HashMap::new(),
            current_ts,
            ids: OrderIdGenerator::new(id_seed),
            id_seed,
            update_daywise: true,
        })
    }

    pub fn set_update_daywise(&mut self, enabled: bool) {
        self.update_daywise = enabled;
    }

    pub fn current_timestamp(&self) -> DateTime<Utc> {
        self.current_ts
    }

    fn check_ts(&self, ts: DateTime<Utc>) -> Result<()> {
        if ts != self.current_ts {
            return Err(Error::TimestampMismatch {
                submitted: ts,
                current: self.current_ts,
            });
        }
        Ok(())
    }

    pub fn register_user(&mut self, user_id: impl Into<String>, registration: UserRegistration) {
        let user_id = user_id.into();
        self.users.insert(user_id.clone(), User::new(user_id, registration));
    }

    pub fn get_user(&self, user_id: &str) -> Result<&User> {
        self.users
            .get(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    fn get_user_mut(&mut self, user_id: &str) -> Result<&mut User> {
        self.users
            .get_mut(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    pub fn place_order(
        &mut self,
        user_id: &str,
        mode: Mode,
        request: OrderRequest,
        ts: DateTime<Utc>,
    ) -> Result<u64> {
        self.check_ts(ts)?;
        let tape = &self.tape;
        let fee_calc = &self.fee_calc;
        let config = &self.config;
        let ids = &mut self.ids;
        let user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;
        let account = user.account_mut(mode)?;
        let result = account.open(request, ts, tape, fee_calc, ids, config);
        if let Err(ref err) = result {
            tracing::warn!(%user_id, %mode, %err, "place_order rejected");
        }
        result
    }

    pub fn close_order(
        &mut self,
        user_id: &str,
        mode: Mode,
        order_id: u64,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        self.check_ts(ts)?;
        let tape = &self.tape;
        let fee_calc = &self.fee_calc;
        let config = &self.config;
        let user = self.get_user_mut(user_id)?;
        let account = user.account_mut(mode)?;
        let result = account.close(order_id, ts, tape, fee_calc, config);
        if let Err(ref err) = result {
            tracing::warn!(%user_id, %mode, order_id, %err, "close_order rejected");
        }
        result
    }

    pub fn close_all_orders(&mut self, user_id: &str, mode: Mode, ts: DateTime<Utc>) -> Result<()> {
        self.check_ts(ts)?;
        let tape = &self.tape;
        let fee_calc = &self.fee_calc;
        let config = &self.config;
        let user = self.get_user_mut(user_id)?;
        let account = user.account_mut(mode)?;
        account.close_all_open_orders(ts, tape, fee_calc, config)
    }

    pub fn close_all_orders_by_asset(
        &mut self,
        user_id: &str,
        mode: Mode,
        asset: &str,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        self.check_ts(ts)?;
        let tape = &self.tape;
        let fee_calc = &self.fee_calc;
        let config = &self.config;
        let user = self.get_user_mut(user_id)?;
        let account = user.account_mut(mode)?;
        account.close_all_open_orders_by_asset(asset, ts, tape, fee_calc, config)
    }

    pub fn close_all_orders_by_asset_and_side(
        &mut self,
        user_id: &str,
        mode: Mode,
        asset: &str,
        side: Side,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        self.check_ts(ts)?;
        let tape = &self.tape;
        let fee_calc = &self.fee_calc;
        let config = &self.config;
        let user = self.get_user_mut(user_id)?;
        let account = user.account_mut(mode)?;
        account.close_all_open_orders_by_asset_and_side(asset, side, ts, tape, fee_calc, config)
    }

    pub fn count_long_short_by_asset(&self, user_id: &str, mode: Mode, asset: &str) -> Result<(u32, u32)> {
        let user = self.get_user(user_id)?;
        let account = user.account(mode)?;
        Ok(account.count_long_short_by_asset(asset))
    }

    /// Runs the liquidation detector for every user/account at the
    /// current timestamp. This must run before any order submissions
    /// for the same bar, so a position that should already be wiped out
    /// can never be topped up or closed first.
    pub fn step_simulation(&mut self) {
        let ts = self.current_ts;
        let tape = &self.tape;
        for user in self.users.values_mut() {
            for account in user.accounts_mut() {
                sweep_account(account, tape, ts);
            }
        }
    }

    /// Marks every account to market, optionally snapshots daywise
    /// values, then advances the clock along the pace asset. Returns
    /// `true` once the pace asset's last bar has been reached.
    pub fn update_current_timestamp(&mut self) -> Result<bool> {
        let ts = self.current_ts;
        let tape = &self.tape;
        let fee_calc = &self.fee_calc;
        for user in self.users.values_mut() {
            for account in user.accounts_mut() {
                if let Err(err) = account.update_portfolio_value(tape, ts, fee_calc) {
                    tracing::warn!(%err, "update_portfolio_value failed for an account");
                }
            }
            if self.update_daywise {
                user.record_daywise(ts);
            }
        }

        let pace = self.tape.assets()[0].clone();
        let (end, next) = self.tape.next_ts(&pace, ts)?;
        if let Some(next_ts) = next {
            self.current_ts = next_ts;
        }
        Ok(end)
    }

    /// Clears the user registry and rewinds the clock and id generator,
    /// so a server can reuse one `Engine` across repeated runs rather
    /// than rebuilding the tape each time.
    pub fn reset(&mut self) -> Result<()> {
        self.users.clear();
        self.ids = OrderIdGenerator::new(self.id_seed);
        let pace = self.tape.assets()[0].clone();
        self.current_ts = self.tape.first_ts(&pace)?;
        Ok(())
    }

    pub fn save_all_users_details(&self, path: &Path) -> Result<()> {
        let state = self.export_state();
        let json = serde_json::to_string_pretty(&state)
            .map_err(|err| Error::Config(format!("failed to serialize state: {err}")))?;
        fs::write(path, json).map_err(|err| Error::Config(format!("failed to write {path:?}: {err}")))?;
        Ok(())
    }

    pub fn save_all_users_portfolio_values_daywise(&self, path: &Path) -> Result<()> {
        let state = self.export_daywise();
        let json = serde_json::to_string_pretty(&state)
            .map_err(|err| Error::Config(format!("failed to serialize daywise state: {err}")))?;
        fs::write(path, json).map_err(|err| Error::Config(format!("failed to write {path:?}: {err}")))?;
        Ok(())
    }

    fn export_user(user: &User) -> ExportedUser {
        let accounts = user
            .accounts()
            .into_iter()
            .map(|account| {
                let base = account.base();
                (
                    base.mode.to_string(),
                    ExportedAccount {
                        name: base.name.clone(),
                        account_type: base.mode,
                        initial_cash: base.initial_cash,
                        cash: base.cash,
                        portfolio_value: base.portfolio_value,
                        holdings: base.holdings.clone(),
                        open_orders: base.open_orders.clone(),
                        history: base.history.clone(),
                    },
                )
            })
            .collect::<HashMap<_, _>>();
        let portfolio_value = user
            .portfolio_value_by_mode()
            .into_iter()
            .map(|(mode, value)| (mode.to_string(), value))
            .collect::<HashMap<_, _>>();
        ExportedUser {
            user_id: user.user_id.clone(),
            accounts,
            portfolio_value,
        }
    }

    /// Looks up one user's exported view, for the HTTP surface's
    /// per-user endpoint.
    pub fn export_one_user(&self, user_id: &str) -> Result<ExportedUser> {
        let user = self.get_user(user_id)?;
        Ok(Self::export_user(user))
    }

    /// Same layout `save_all_users_details` writes to disk, for callers
    /// (the HTTP surface) that want the JSON value directly.
    pub fn export_state(&self) -> ExportedState {
        let users = self.users.values().map(Self::export_user).collect();

        ExportedState {
            current_timestamp: self.current_ts,
            assets: self.tape.assets().to_vec(),
            config: ExportedConfig {
                trading_fees: self.config.fee_structure,
                extra_fees: ExtraFees {
                    margin_borrow_interest_hourly: self.config.borrow_rate_hourly,
                    futures_funding_fee_every_8h: self.config.funding_rate_per_period,
                },
                slippage: self.config.slippage,
                minimum_qty_step: self.config.qty_step,
            },
            users,
        }
    }

    pub fn export_daywise(&self) -> ExportedDaywise {
        let users = self
            .users
            .iter()
            .map(|(user_id, user)| {
                let series = user
                    .daywise(None)
                    .into_iter()
                    .map(|(mode, samples)| (mode, samples.to_vec()))
                    .collect::<HashMap<_, _>>();
                (user_id.clone(), series)
            })
            .collect();
        ExportedDaywise {
            current_timestamp: self.current_ts,
            users,
        }
    }
}

#[derive(Serialize)]
pub struct ExtraFees {
    margin_borrow_interest_hourly: f64,
    futures_funding_fee_every_8h: f64,
}

#[derive(Serialize)]
pub struct ExportedConfig {
    trading_fees: FeeStructure,
    extra_fees: ExtraFees,
    slippage: SlippageConfig,
    minimum_qty_step: f64,
}

#[derive(Serialize)]
pub struct ExportedAccount {
    name: String,
    #[serde(rename = "type")]
    account_type: Mode,
    initial_cash: f64,
    cash: f64,
    portfolio_value: f64,
    holdings: HashMap<String, f64>,
    open_orders: Vec<Order>,
    history: Vec<Order>,
}

#[derive(Serialize)]
pub struct ExportedUser {
    pub user_id: String,
    accounts: HashMap<String, ExportedAccount>,
    portfolio_value: HashMap<String, f64>,
}

#[derive(Serialize)]
pub struct ExportedState {
    current_timestamp: DateTime<Utc>,
    assets: Vec<String>,
    config: ExportedConfig,
    users: Vec<ExportedUser>,
}

#[derive(Serialize)]
pub struct ExportedDaywise {
    current_timestamp: DateTime<Utc>,
    users: HashMap<String, HashMap<String, Vec<PortfolioSample>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Quantity;
    use crate::tape::Bar;
    use chrono::TimeZone;

    fn hourly_tape(asset: &str, prices: &[f64]) -> Tape {
        let mut data = HashMap::new();
        let bars = prices
            .iter()
            .enumerate()
            .map(|(i, &price)| Bar {
                timestamp: Utc.timestamp_opt(i as i64 * 3600, 0).unwrap(),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1.0,
            })
            .collect();
        data.insert(asset.to_string(), bars);
        Tape::new(vec![asset.to_string()], data).unwrap()
    }

    #[test]
    fn end_of_tape_flag_and_timestamp_mismatch() {
        let tape = hourly_tape("BTC", &[100.0, 101.0]);
        let mut engine = Engine::new(tape, EngineConfig::default(), 1).unwrap();
        engine.register_user("alice", UserRegistration::default());

        let bad_ts = Utc.timestamp_opt(999_999, 0).unwrap();
        let err = engine
            .place_order(
                "alice",
                Mode::Spot,
                OrderRequest::new("BTC", Side::Long, 1, Quantity::Exact(1.0)),
                bad_ts,
            )
            .unwrap_err();
        assert!(matches!(err, Error::TimestampMismatch { .. }));

        engine.step_simulation();
        let first_ts = engine.current_timestamp();
        assert!(!engine.update_current_timestamp().unwrap());
        assert_ne!(engine.current_timestamp(), first_ts);
        assert!(engine.update_current_timestamp().unwrap());
    }

    #[test]
    fn liquidation_sweep_books_total_margin_loss() {
        let tape = hourly_tape("BTC", &[100.0, 70.0]);
        let mut engine = Engine::new(tape, EngineConfig::default(), 1).unwrap();
        engine.register_user("alice", UserRegistration::default());

        let ts0 = engine.current_timestamp();
        engine.step_simulation();
        let order_id = engine
            .place_order(
                "alice",
                Mode::Margin,
                OrderRequest::new("BTC", Side::Long, 5, Quantity::Exact(1.0)),
                ts0,
            )
            .unwrap();
        engine.update_current_timestamp().unwrap();

        engine.step_simulation();
        let user = engine.get_user("alice").unwrap();
        let margin = user.margin.as_ref().unwrap();
        let closed = margin.base().history.iter().find(|o| o.id == order_id).unwrap();
        assert!(closed.liquidated);
        assert_eq!(closed.realized_roi_pct, Some(-100.0));
    }
}
