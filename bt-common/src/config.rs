use serde::{Deserialize, Serialize};

use crate::order::{AccountSubtype, Mode};

pub const MARGIN_MAX_LEVERAGE: u32 = 10;
pub const FUTURES_MAX_LEVERAGE: u32 = 125;
pub const MINIMUM_QTY_STEP: f64 = 1e-5;
pub const BORROW_INTEREST_HOURLY: f64 = 6.5938e-6;
pub const FUNDING_FEE_EVERY_8H: f64 = 1e-4;
pub const FUNDING_PERIOD_HOURS: f64 = 8.0;

/// Fee rate for a single (mode, subtype) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeFee {
    pub regular: f64,
}

/// Per-mode, per-subtype fee rates, flattened into one struct per mode
/// so it serializes to the nested JSON shape the persisted state layout
/// requires without a `HashMap<Mode, HashMap<..>>` detour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeStructure {
    pub spot: ModeFee,
    pub margin: ModeFee,
    pub futures: ModeFee,
}

impl Default for FeeStructure {
    fn default() -> Self {
        FeeStructure {
            spot: ModeFee { regular: 0.001 },
            margin: ModeFee { regular: 0.001 },
            futures: ModeFee { regular: 0.0004 },
        }
    }
}

impl FeeStructure {
    pub fn rate(&self, mode: Mode, subtype: AccountSubtype) -> f64 {
        let AccountSubtype::Regular = subtype;
        match mode {
            Mode::Spot => self.spot.regular,
            Mode::Margin => self.margin.regular,
            Mode::Futures => self.futures.regular,
        }
    }
}

/// Per-mode slippage rate applied to the mid price at open and close.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlippageConfig {
    pub spot: f64,
    pub margin: f64,
    pub futures: f64,
}

impl Default for SlippageConfig {
    fn default() -> Self {
        SlippageConfig {
            spot: 0.0005,
            margin: 0.0007,
            futures: 0.0007,
        }
    }
}

impl SlippageConfig {
    pub fn rate(&self, mode: Mode) -> f64 {
        match mode {
            Mode::Spot => self.spot,
            Mode::Margin => self.margin,
            Mode::Futures => self.futures,
        }
    }
}

/// One row of the linear-perpetual maintenance-margin ladder: a notional
/// bracket `[min, max)`, the leverage cap for that bracket, the
/// maintenance-margin rate, and the maintenance amount ("MA").
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceTier {
    pub min_notional: f64,
    pub max_notional: f64,
    pub max_leverage: u32,
    pub mmr: f64,
    pub maintenance_amount: f64,
}

/// The 12-row futures maintenance-margin table, Binance-style. Notional
/// brackets are half-open `[min, max)`; the last row's `max_notional` is
/// `f64::INFINITY`.
pub const FUTURES_MAINTENANCE_TABLE: [MaintenanceTier; 12] = [
    MaintenanceTier { min_notional: 0.0, max_notional: 300_000.0, max_leverage: 125, mmr: 0.0040, maintenance_amount: 0.0 },
    MaintenanceTier { min_notional: 300_000.0, max_notional: 800_000.0, max_leverage: 100, mmr: 0.0050, maintenance_amount: 300.0 },
    MaintenanceTier { min_notional: 800_000.0, max_notional: 5_000_000.0, max_leverage: 75, mmr: 0.0065, maintenance_amount: 1_500.0 },
    MaintenanceTier { min_notional: 5_000_000.0, max_notional: 10_000_000.0, max_leverage: 50, mmr: 0.0100, maintenance_amount: 19_000.0 },
    MaintenanceTier { min_notional: 10_000_000.0, max_notional: 20_000_000.0, max_leverage: 25, mmr: 0.0200, maintenance_amount: 119_000.0 },
    MaintenanceTier { min_notional: 20_000_000.0, max_notional: 50_000_000.0, max_leverage: 20, mmr: 0.0250, maintenance_amount: 219_000.0 },
    MaintenanceTier { min_notional: 50_000_000.0, max_notional: 100_000_000.0, max_leverage: 10, mmr: 0.0500, maintenance_amount: 1_469_000.0 },
    MaintenanceTier { min_notional: 100_000_000.0, max_notional: 200_000_000.0, max_leverage: 5, mmr: 0.1000, maintenance_amount: 6_469_000.0 },
    MaintenanceTier { min_notional: 200_000_000.0, max_notional: 300_000_000.0, max_leverage: 4, mmr: 0.1250, maintenance_amount: 11_469_000.0 },
    MaintenanceTier { min_notional: 300_000_000.0, max_notional: 500_000_000.0, max_leverage: 3, mmr: 0.1500, maintenance_amount: 18_969_000.0 },
    MaintenanceTier { min_notional: 500_000_000.0, max_notional: 1_200_000_000.0, max_leverage: 2, mmr: 0.2500, maintenance_amount: 68_969_000.0 },
    MaintenanceTier { min_notional: 1_200_000_000.0, max_notional: 1_800_000_000.0, max_leverage: 1, mmr: 0.5000, maintenance_amount: 421_482_000.0 },
];

/// Long-isolated-margin MAMR rate.
pub const MARGIN_MAMR_LONG: f64 = 0.05;
/// Short-isolated-margin MAMR rate.
pub const MARGIN_MAMR_SHORT: f64 = 0.0476190501;

/// Simulation-level configuration passed into `Engine::new`. Financial
/// constants default to the values below; callers override by
/// constructing their own instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    pub fee_structure: FeeStructure,
    pub slippage: SlippageConfig,
    pub borrow_rate_hourly: f64,
    pub funding_rate_per_period: f64,
    pub qty_step: f64,
    pub margin_max_leverage: u32,
    pub futures_max_leverage: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            fee_structure: FeeStructure::default(),
            slippage: SlippageConfig::default(),
            borrow_rate_hourly: BORROW_INTEREST_HOURLY,
            funding_rate_per_period: FUNDING_FEE_EVERY_8H,
            qty_step: MINIMUM_QTY_STEP,
            margin_max_leverage: MARGIN_MAX_LEVERAGE,
            futures_max_leverage: FUTURES_MAX_LEVERAGE,
        }
    }
}

/// Truncates `qty` down to the nearest multiple of `step`.
///
/// Plain float division/floor can misround a value like `99.85020` to
/// `99.85019` because of binary floating-point representation error; the
/// small epsilon nudges the scaled value back onto the intended grid
/// before flooring, so truncation always lands on the step grid instead
/// of one unit short of it.
pub fn round_down_to_step(qty: f64, step: f64) -> f64 {
    if step <= 0.0 || qty <= 0.0 {
        return 0.0;
    }
    let scale = 1.0 / step;
    ((qty * scale) + 1e-7).floor() / scale
}

/// Looks up the maintenance-margin tier containing `notional` under
/// half-open `[min, max)` bracket semantics.
pub fn lookup_maintenance_tier(notional: f64) -> Option<&'static MaintenanceTier> {
    FUTURES_MAINTENANCE_TABLE
        .iter()
        .find(|tier| notional >= tier.min_notional && notional < tier.max_notional)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_matches_a_worked_example() {
        let px = 100.05;
        let raw = 10000.0 / (px * 1.001);
        let truncated = round_down_to_step(raw, MINIMUM_QTY_STEP);
        assert!((truncated - 99.85020).abs() < 1e-9);
    }

    #[test]
    fn truncation_is_idempotent() {
        let q = 12.345678;
        let once = round_down_to_step(q, MINIMUM_QTY_STEP);
        let twice = round_down_to_step(once, MINIMUM_QTY_STEP);
        assert_eq!(once, twice);
    }

    #[test]
    fn tier_lookup_is_half_open() {
        let tier = lookup_maintenance_tier(300_000.0).unwrap();
        assert_eq!(tier.mmr, 0.0050);
        let tier = lookup_maintenance_tier(299_999.99).unwrap();
        assert_eq!(tier.mmr, 0.0040);
    }
}
