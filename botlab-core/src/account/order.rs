//! Order results and order-level errors.
//!
//! Order edge cases never raise: they come back as an [`OrderResult`] with a
//! status and, when rejected, an [`OrderError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{PositionId, Precision, TransactionId};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum OrderError {
    #[error("direction cannot be resolved from the order flags and quantity sign")]
    InvalidDirection,

    #[error("no market price for '{symbol}'")]
    NoMarketPrice { symbol: String },

    #[error("no open position matches the order")]
    PositionNotFound,

    #[error("an opposite position is open for '{symbol}'")]
    OppositePositionOpen { symbol: String },

    #[error("order would flip the position direction, which this account disallows")]
    DirectionChangeDisallowed,

    #[error("order would flip the position direction without ALLOW_CLOSE_AND_OPEN_AT_ONCE; reversal through resize is not supported")]
    DirectionChangeUnsupported,

    #[error("account is aborted")]
    AccountAborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    Partial,
    Noop,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Precision")]
pub struct OrderResult<P> {
    pub transaction_id: Option<TransactionId>,
    pub status: OrderStatus,
    pub position_id: Option<PositionId>,
    /// Signed quantity the caller asked for.
    pub requested: P,
    /// Signed quantity executed by this result (excluding inner results).
    pub filled: P,
    pub price: Option<P>,
    /// Profit realized by this result (excluding inner results).
    pub realized_profit: P,
    pub error: Option<OrderError>,
    /// Follow-up executions under the same transaction, e.g. the opening leg
    /// of a close-and-reverse.
    pub inner_results: Vec<OrderResult<P>>,
}

impl<P: Precision> OrderResult<P> {
    pub fn noop(requested: P) -> Self {
        Self {
            transaction_id: None,
            status: OrderStatus::Noop,
            position_id: None,
            requested,
            filled: P::zero(),
            price: None,
            realized_profit: P::zero(),
            error: None,
            inner_results: Vec::new(),
        }
    }

    pub fn rejected(requested: P, error: OrderError) -> Self {
        Self {
            status: OrderStatus::Rejected,
            error: Some(error),
            ..Self::noop(requested)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::Partial | OrderStatus::Noop)
    }

    /// Filled quantity including inner results.
    pub fn total_filled(&self) -> P {
        self.inner_results
            .iter()
            .fold(self.filled, |acc, r| acc + r.total_filled())
    }

    /// Realized profit including inner results.
    pub fn total_realized(&self) -> P {
        self.inner_results
            .iter()
            .fold(self.realized_profit, |acc, r| acc + r.total_realized())
    }
}

/// Outcome of a stop-loss / take-profit update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionUpdate {
    pub applied: usize,
    pub skipped: usize,
}
