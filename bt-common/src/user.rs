use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::account::{Account, FuturesAccount, MarginAccount, SpotAccount};
use crate::error::{Error, Result};
use crate::order::{AccountSubtype, Mode};

/// One (timestamp, portfolio value) sample, used by the daywise export.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PortfolioSample {
    pub timestamp: DateTime<Utc>,
    pub portfolio_value: f64,
}

/// Request shape for `Engine::register_user`: which of the three modes
/// to instantiate and their starting cash.
#[derive(Debug, Clone, Copy)]
pub struct UserRegistration {
    pub spot: Option<f64>,
    pub margin: Option<f64>,
    pub futures: Option<f64>,
}

impl Default for UserRegistration {
    fn default() -> Self {
        UserRegistration {
            spot: Some(100_000.0),
            margin: Some(100_000.0),
            futures: Some(100_000.0),
        }
    }
}

/// Aggregates a user's 0-3 accounts (one per mode), rolling up total
/// portfolio value and optionally recording a daywise history per mode
/// plus a "total" series.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: String,
    pub spot: Option<SpotAccount>,
    pub margin: Option<MarginAccount>,
    pub futures: Option<FuturesAccount>,
    daywise: HashMap<Mode, Vec<PortfolioSample>>,
    daywise_total: Vec<PortfolioSample>,
}

impl User {
    pub fn new(user_id: impl Into<String>, registration: UserRegistration) -> Self {
        let mut daywise = HashMap::new();
        let spot = registration.spot.map(|cash| {
            daywise.insert(Mode::Spot, Vec::new());
            SpotAccount::new(AccountSubtype::Regular, cash)
        });
        let margin = registration.margin.map(|cash| {
            daywise.insert(Mode::Margin, Vec::new());
            MarginAccount::new(AccountSubtype::Regular, cash)
        });
        let futures = registration.futures.map(|cash| {
            daywise.insert(Mode::Futures, Vec::new());
            FuturesAccount::new(AccountSubtype::Regular, cash)
        });
        User {
            user_id: user_id.into(),
            spot,
            margin,
            futures,
            daywise,
            daywise_total: Vec::new(),
        }
    }

    pub fn account(&self, mode: Mode) -> Result<&dyn Account> {
        match mode {
            Mode::Spot => self
                .spot
                .as_ref()
                .map(|a| a as &dyn Account)
                .ok_or(Error::UnsupportedAccountMode(mode)),
            Mode::Margin => self
                .margin
                .as_ref()
                .map(|a| a as &dyn Account)
                .ok_or(Error::UnsupportedAccountMode(mode)),
            Mode::Futures => self
                .futures
                .as_ref()
                .map(|a| a as &dyn Account)
                .ok_or(Error::UnsupportedAccountMode(mode)),
        }
    }

    pub fn account_mut(&mut self, mode: Mode) -> Result<&mut dyn Account> {
        match mode {
            Mode::Spot => self
                .spot
                .as_mut()
                .map(|a| a as &mut dyn Account)
                .ok_or(Error::UnsupportedAccountMode(mode)),
            Mode::Margin => self
                .margin
                .as_mut()
                .map(|a| a as &mut dyn Account)
                .ok_or(Error::UnsupportedAccountMode(mode)),
            Mode::Futures => self
                .futures
                .as_mut()
                .map(|a| a as &mut dyn Account)
                .ok_or(Error::UnsupportedAccountMode(mode)),
        }
    }

    pub fn accounts(&self) -> Vec<&dyn Account> {
        let mut out: Vec<&dyn Account> = Vec::with_capacity(3);
        if let Some(a) = &self.spot {
            out.push(a);
        }
        if let Some(a) = &self.margin {
            out.push(a);
        }
        if let Some(a) = &self.futures {
            out.push(a);
        }
        out
    }

    pub fn accounts_mut(&mut self) -> Vec<&mut dyn Account> {
        let mut out: Vec<&mut dyn Account> = Vec::with_capacity(3);
        if let Some(a) = &mut self.spot {
            out.push(a);
        }
        if let Some(a) = &mut self.margin {
            out.push(a);
        }
        if let Some(a) = &mut self.futures {
            out.push(a);
        }
        out
    }

    pub fn total_portfolio_value(&self) -> f64 {
        self.accounts().iter().map(|a| a.base().portfolio_value).sum()
    }

    pub fn portfolio_value_by_mode(&self) -> HashMap<Mode, f64> {
        self.accounts()
            .iter()
            .map(|a| (a.base().mode, a.base().portfolio_value))
            .collect()
    }

    pub fn record_daywise(&mut self, ts: DateTime<Utc>) {
        for account in self.accounts() {
            let mode = account.base().mode;
            let value = account.base().portfolio_value;
            self.daywise.entry(mode).or_default().push(PortfolioSample {
                timestamp: ts,
                portfolio_value: value,
            });
        }
        self.daywise_total.push(PortfolioSample {
            timestamp: ts,
            portfolio_value: self.total_portfolio_value(),
        });
    }

    pub fn daywise(&self, mode: Option<Mode>) -> HashMap<String, &[PortfolioSample]> {
        let mut out = HashMap::new();
        match mode {
            Some(mode) => {
                if let Some(series) = self.daywise.get(&mode) {
                    out.insert(mode.to_string(), series.as_slice());
                }
            }
            None => {
                for (mode, series) in &self.daywise {
                    out.insert(mode.to_string(), series.as_slice());
                }
                out.insert("total".to_string(), self.daywise_total.as_slice());
            }
        }
        out
    }
}
