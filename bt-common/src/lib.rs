pub mod account;
pub mod config;
pub mod engine;
pub mod error;
pub mod fee;
pub mod ids;
pub mod order;
pub mod tape;
pub mod user;

pub use account::Account;
pub use config::EngineConfig;
pub use engine::{Engine, ExportedDaywise, ExportedState, ExportedUser};
pub use error::{Error, Result};
pub use fee::FeeCalculator;
pub use ids::OrderIdGenerator;
pub use order::{AccountSubtype, Mode, Order, OrderRequest, Quantity, Side};
pub use tape::{Bar, Tape};
pub use user::{User, UserRegistration};
