use crate::config::EngineConfig;
use crate::order::{AccountSubtype, Mode};

/// Pure fee/interest/funding calculator. Holds a copy of the rates it was
/// built from and nothing else.
#[derive(Debug, Clone, Copy)]
pub struct FeeCalculator {
    fee_structure: crate::config::FeeStructure,
    borrow_rate_hourly: f64,
    funding_rate_per_period: f64,
}

impl FeeCalculator {
    pub fn new(config: &EngineConfig) -> Self {
        FeeCalculator {
            fee_structure: config.fee_structure,
            borrow_rate_hourly: config.borrow_rate_hourly,
            funding_rate_per_period: config.funding_rate_per_period,
        }
    }

    pub fn trade_fee(&self, mode: Mode, subtype: AccountSubtype, notional: f64) -> f64 {
        notional * self.fee_structure.rate(mode, subtype)
    }

    /// `hours` is fractional; a zero-duration open-then-close has
    /// `borrow_fee == 0.0`.
    pub fn borrow_fee(&self, borrowed_amount: f64, hours: f64) -> f64 {
        borrowed_amount * self.borrow_rate_hourly * hours
    }

    pub fn funding_fee(&self, notional: f64, n_events: u32) -> f64 {
        notional * self.funding_rate_per_period * f64::from(n_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_fee_is_linear_in_notional() {
        let calc = FeeCalculator::new(&EngineConfig::default());
        let fee = calc.trade_fee(Mode::Spot, AccountSubtype::Regular, 10_000.0);
        assert!((fee - 10.0).abs() < 1e-9);
    }

    #[test]
    fn borrow_fee_zero_duration() {
        let calc = FeeCalculator::new(&EngineConfig::default());
        assert_eq!(calc.borrow_fee(80.0, 0.0), 0.0);
    }

    #[test]
    fn funding_fee_scales_with_event_count() {
        let calc = FeeCalculator::new(&EngineConfig::default());
        let one = calc.funding_fee(1_000_000.0, 1);
        let three = calc.funding_fee(1_000_000.0, 3);
        assert!((three - one * 3.0).abs() < 1e-6);
    }
}
