//! Simulated trading account.
//!
//! Owns balance, per-symbol holdings and positions for one bot instance, and
//! records every quantity change in the [`Journal`](crate::journal::Journal).

pub mod flags;
pub mod order;
pub mod position;
pub mod simulated;

pub use flags::{Direction, OrderFlags};
pub use order::{OrderError, OrderResult, OrderStatus, ProtectionUpdate};
pub use position::{Position, PositionState};
pub use simulated::{
    AbortReason, AccountConfig, AccountStatus, Drawdown, PositionMode, SimulatedAccount,
    TradeCounts,
};
