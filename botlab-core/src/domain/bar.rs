//! Bar: the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Precision;

/// OHLCV bar for one symbol and timeframe.
///
/// Bars carry no timestamp of their own; the time lives on the enclosing
/// [`Observation`] or in the window that buffers them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Precision")]
pub struct Bar<P> {
    pub open: P,
    pub high: P,
    pub low: P,
    pub close: P,
    pub volume: P,
}

impl<P: Precision> Bar<P> {
    pub fn new(open: P, high: P, low: P, close: P, volume: P) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// A bar where every field equals `price` and volume is zero.
    pub fn flat(price: P) -> Self {
        Self::new(price, price, price, price, P::zero())
    }

    /// All-zero bar used as the gap sentinel.
    pub fn sentinel() -> Self {
        Self::flat(P::zero())
    }

    /// Basic OHLC sanity check: high bounds open/close/low from above, low from below.
    pub fn is_sane(&self) -> bool {
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && !self.volume.is_negative()
    }
}

/// A value stamped with the open time of the bar it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation<T> {
    pub time: DateTime<Utc>,
    pub value: T,
}

impl<T> Observation<T> {
    pub fn new(time: DateTime<Utc>, value: T) -> Self {
        Self { time, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sane_bar_passes() {
        let bar = Bar::new(100.0, 105.0, 98.0, 103.0, 1_000.0);
        assert!(bar.is_sane());
    }

    #[test]
    fn inverted_high_low_fails() {
        let bar = Bar::new(100.0, 97.0, 98.0, 99.0, 1_000.0);
        assert!(!bar.is_sane());
    }

    #[test]
    fn sentinel_is_flat_zero() {
        let bar: Bar<f64> = Bar::sentinel();
        assert_eq!(bar.close, 0.0);
        assert_eq!(bar.volume, 0.0);
        assert!(bar.is_sane());
    }
}
