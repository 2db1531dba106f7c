use crate::order::Mode;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised anywhere in the accounting core.
///
/// `NotFound`/`TimestampMismatch` and the structural `Config` variant are
/// surfaced all the way to the external caller. The user-action variants
/// (insufficient cash/holdings, invalid leverage/quantity, ...) are meant
/// to be caught by the engine, logged, and turned into a no-op: the
/// simulation clock and account state are left untouched.
#[derive(Error, Debug)]
pub enum Error {
    #[error("asset '{0}' not found on tape")]
    AssetNotFound(String),

    #[error("no bar for asset '{asset}' at {timestamp}")]
    TimestampNotFound {
        asset: String,
        timestamp: DateTime<Utc>,
    },

    #[error("order {0} not found")]
    OrderNotFound(u64),

    #[error("user '{0}' not found")]
    UserNotFound(String),

    #[error("action submitted for {submitted} but current timestamp is {current}")]
    TimestampMismatch {
        submitted: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("insufficient cash: required {required:.8}, available {available:.8}")]
    InsufficientCash { required: f64, available: f64 },

    #[error("insufficient holdings: required {required:.8}, available {available:.8}")]
    InsufficientHoldings { required: f64, available: f64 },

    #[error("leverage {leverage} exceeds the maximum of {max} for {mode}")]
    InvalidLeverage { leverage: u32, max: u32, mode: Mode },

    #[error("quantity resolved to {0:.8}, which is not a positive multiple of the step size")]
    InvalidQuantity(f64),

    #[error("'{0}' accounts do not hold open positions")]
    InvalidPositionType(Mode),

    #[error("position cannot be liquidated: posted margin covers the full notional")]
    NoLiquidationRisk,

    #[error("notional {0:.2} is outside every maintenance-margin tier")]
    NotionalOutOfRange(f64),

    #[error("account mode '{0}' is not registered for this user")]
    UnsupportedAccountMode(Mode),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
