use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::TimeFrame;
use crate::window::GapFill;

/// Which part of a bar stream a consumer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Ohlcv,
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Ohlcv => "ohlcv",
            FieldKind::Open => "open",
            FieldKind::High => "high",
            FieldKind::Low => "low",
            FieldKind::Close => "close",
            FieldKind::Volume => "volume",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bar,
    Scalar,
}

/// Market coordinates without a field: the source of a bar stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketRef {
    pub exchange: String,
    pub area: String,
    pub symbol: String,
    pub timeframe: TimeFrame,
}

impl MarketRef {
    pub fn new(exchange: &str, area: &str, symbol: &str, timeframe: TimeFrame) -> Self {
        Self {
            exchange: exchange.into(),
            area: area.into(),
            symbol: symbol.into(),
            timeframe,
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}:{}:{}", self.exchange, self.area, self.symbol, self.timeframe)
    }
}

impl fmt::Display for MarketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Fully bound identity of one windowed input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputIdentity {
    pub exchange: String,
    pub area: String,
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub field: FieldKind,
}

impl InputIdentity {
    pub fn new(exchange: &str, area: &str, symbol: &str, timeframe: TimeFrame, field: FieldKind) -> Self {
        Self {
            exchange: exchange.into(),
            area: area.into(),
            symbol: symbol.into(),
            timeframe,
            field,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self.field {
            FieldKind::Ohlcv => ValueType::Bar,
            _ => ValueType::Scalar,
        }
    }

    /// Deduplication key: two declarations share a window iff their keys match.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.exchange, self.area, self.symbol, self.timeframe, self.field
        )
    }

    pub fn market(&self) -> MarketRef {
        MarketRef {
            exchange: self.exchange.clone(),
            area: self.area.clone(),
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
        }
    }
}

impl fmt::Display for InputIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A consumer's request for an input. Unset market fields inherit from the
/// consumer's own market when the declaration is bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDecl {
    pub exchange: Option<String>,
    pub area: Option<String>,
    pub symbol: Option<String>,
    pub timeframe: Option<TimeFrame>,
    pub field: FieldKind,
    pub lookback: usize,
    /// Overrides the batch gap handling for this input's window.
    #[serde(default)]
    pub gap: Option<GapFill>,
}

impl InputDecl {
    /// Declaration on the consumer's own market.
    pub fn own(field: FieldKind, lookback: usize) -> Self {
        Self {
            exchange: None,
            area: None,
            symbol: None,
            timeframe: None,
            field,
            lookback,
            gap: None,
        }
    }

    pub fn on_symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn on_timeframe(mut self, timeframe: TimeFrame) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    pub fn with_gap(mut self, gap: GapFill) -> Self {
        self.gap = Some(gap);
        self
    }

    pub fn on_exchange(mut self, exchange: &str, area: &str) -> Self {
        self.exchange = Some(exchange.into());
        self.area = Some(area.into());
        self
    }

    /// Fill unset coordinates from `owner`.
    pub fn bind(&self, owner: &MarketRef) -> InputIdentity {
        InputIdentity {
            exchange: self.exchange.clone().unwrap_or_else(|| owner.exchange.clone()),
            area: self.area.clone().unwrap_or_else(|| owner.area.clone()),
            symbol: self.symbol.clone().unwrap_or_else(|| owner.symbol.clone()),
            timeframe: self.timeframe.unwrap_or(owner.timeframe),
            field: self.field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> MarketRef {
        MarketRef::new("binance", "spot", "BTCUSDT", TimeFrame::HOUR)
    }

    #[test]
    fn bind_inherits_unset_fields() {
        let id = InputDecl::own(FieldKind::Close, 20).bind(&owner());
        assert_eq!(id.key(), "binance:spot:BTCUSDT:1h:close");
        assert_eq!(id.value_type(), ValueType::Scalar);
    }

    #[test]
    fn bind_keeps_explicit_fields() {
        let id = InputDecl::own(FieldKind::Ohlcv, 5)
            .on_symbol("ETHUSDT")
            .on_timeframe(TimeFrame::DAY)
            .bind(&owner());
        assert_eq!(id.symbol, "ETHUSDT");
        assert_eq!(id.timeframe, TimeFrame::DAY);
        assert_eq!(id.exchange, "binance");
        assert_eq!(id.value_type(), ValueType::Bar);
    }

    #[test]
    fn field_changes_key_but_not_market() {
        let a = InputDecl::own(FieldKind::High, 1).bind(&owner());
        let b = InputDecl::own(FieldKind::Low, 1).bind(&owner());
        assert_ne!(a.key(), b.key());
        assert_eq!(a.market(), b.market());
    }
}
