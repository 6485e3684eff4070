use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{PositionId, Precision};

use super::Direction;

/// Opening → Open → (Resizing → Open | Closing → Closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Opening,
    Open,
    Resizing,
    Closing,
    Closed,
}

/// Position tracking. The sign of `quantity` is the only source of truth for
/// long versus short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Precision")]
pub struct Position<P> {
    pub id: PositionId,
    pub symbol: String,
    pub quantity: P,
    pub entry_price: P,
    pub realized_profit: P,
    pub stop_loss: Option<P>,
    pub take_profit: Option<P>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub state: PositionState,
}

impl<P: Precision> Position<P> {
    pub fn direction(&self) -> Direction {
        if self.quantity.is_positive() {
            Direction::Long
        } else if self.quantity.is_negative() {
            Direction::Short
        } else {
            Direction::Unspecified
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity.is_positive()
    }

    pub fn is_short(&self) -> bool {
        self.quantity.is_negative()
    }

    pub fn is_open(&self) -> bool {
        self.state != PositionState::Closed
    }

    pub fn unrealized_profit(&self, mark: P) -> P {
        self.quantity * (mark - self.entry_price)
    }

    /// Profit of reducing the position by `delta` (unsigned) at `price`.
    pub fn profit_on_reduce(&self, delta: P, price: P) -> P {
        if self.is_short() {
            (self.entry_price - price) * delta
        } else {
            (price - self.entry_price) * delta
        }
    }

    /// Stop-loss trigger hit by a bar with this low/high.
    pub fn stop_hit(&self, low: P, high: P) -> Option<P> {
        let sl = self.stop_loss?;
        let hit = if self.is_long() { low <= sl } else { high >= sl };
        hit.then_some(sl)
    }

    /// Take-profit trigger hit by a bar with this low/high.
    pub fn target_hit(&self, low: P, high: P) -> Option<P> {
        let tp = self.take_profit?;
        let hit = if self.is_long() { high >= tp } else { low <= tp };
        hit.then_some(tp)
    }
}
