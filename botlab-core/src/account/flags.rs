//! Order flags and direction.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Bit set of order intents and close causes. Serialized as the raw `u32`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderFlags(pub u32);

impl OrderFlags {
    pub const NONE: OrderFlags = OrderFlags(0);
    pub const OPEN: OrderFlags = OrderFlags(1);
    pub const CLOSE: OrderFlags = OrderFlags(1 << 1);
    pub const RESIZE_EXISTING_POSITION: OrderFlags = OrderFlags(1 << 2);
    pub const ALLOW_CLOSE_AND_OPEN_AT_ONCE: OrderFlags = OrderFlags(1 << 3);
    pub const REDUCE_ONLY: OrderFlags = OrderFlags(1 << 4);
    pub const STOP_LOSS: OrderFlags = OrderFlags(1 << 5);
    pub const TAKE_PROFIT: OrderFlags = OrderFlags(1 << 6);
    pub const LIQUIDATION: OrderFlags = OrderFlags(1 << 7);

    const NAMES: [(OrderFlags, &'static str); 8] = [
        (Self::OPEN, "OPEN"),
        (Self::CLOSE, "CLOSE"),
        (Self::RESIZE_EXISTING_POSITION, "RESIZE_EXISTING_POSITION"),
        (Self::ALLOW_CLOSE_AND_OPEN_AT_ONCE, "ALLOW_CLOSE_AND_OPEN_AT_ONCE"),
        (Self::REDUCE_ONLY, "REDUCE_ONLY"),
        (Self::STOP_LOSS, "STOP_LOSS"),
        (Self::TAKE_PROFIT, "TAKE_PROFIT"),
        (Self::LIQUIDATION, "LIQUIDATION"),
    ];

    pub fn contains(self, other: OrderFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for OrderFlags {
    type Output = OrderFlags;

    fn bitor(self, rhs: OrderFlags) -> OrderFlags {
        OrderFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for OrderFlags {
    fn bitor_assign(&mut self, rhs: OrderFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for OrderFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Unspecified,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Unspecified => Direction::Unspecified,
        }
    }

    /// Direction implied by a signed quantity: positive buys (long).
    pub fn of_sign(is_negative: bool) -> Direction {
        if is_negative {
            Direction::Short
        } else {
            Direction::Long
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine_and_test() {
        let f = OrderFlags::OPEN | OrderFlags::ALLOW_CLOSE_AND_OPEN_AT_ONCE;
        assert!(f.contains(OrderFlags::OPEN));
        assert!(!f.contains(OrderFlags::CLOSE));
        assert_eq!(f.to_string(), "OPEN|ALLOW_CLOSE_AND_OPEN_AT_ONCE");
        assert_eq!(OrderFlags::NONE.to_string(), "NONE");
    }

    #[test]
    fn flags_serialize_as_raw_bits() {
        let f = OrderFlags::CLOSE | OrderFlags::STOP_LOSS;
        assert_eq!(serde_json::to_string(&f).unwrap(), "34");
    }

    #[test]
    fn direction_opposites() {
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::of_sign(true), Direction::Short);
    }
}
