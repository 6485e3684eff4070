//! In-memory streams, used by tests and by file-backed resolvers that load
//! a whole series up front.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{Bar, Observation, Precision};
use crate::input::{InputIdentity, MarketRef};

use super::{DataError, InputStream, StreamResolver};

#[derive(Debug, Clone, Default)]
pub struct MemoryStream<P> {
    observations: Vec<Observation<Bar<P>>>,
}

impl<P: Precision> MemoryStream<P> {
    /// Observations are sorted by time on construction.
    pub fn new(mut observations: Vec<Observation<Bar<P>>>) -> Self {
        observations.sort_by_key(|o| o.time);
        Self { observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

impl<P: Precision> InputStream<P> for MemoryStream<P> {
    fn preload_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Observation<Bar<P>>>, DataError> {
        let lo = self.observations.partition_point(|o| o.time < start);
        let hi = self.observations.partition_point(|o| o.time < end);
        Ok(self.observations[lo..hi.max(lo)].to_vec())
    }
}

/// Resolver over a fixed set of streams keyed by market.
#[derive(Default)]
pub struct MemoryResolver<P> {
    streams: HashMap<String, Arc<dyn InputStream<P>>>,
}

impl<P: Precision> MemoryResolver<P> {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
        }
    }

    pub fn insert(&mut self, market: &MarketRef, stream: Arc<dyn InputStream<P>>) {
        self.streams.insert(market.key(), stream);
    }

    pub fn with_bars(mut self, market: &MarketRef, observations: Vec<Observation<Bar<P>>>) -> Self {
        self.insert(market, Arc::new(MemoryStream::new(observations)));
        self
    }
}

impl<P: Precision> StreamResolver<P> for MemoryResolver<P> {
    fn resolve(&self, identity: &InputIdentity) -> Result<Arc<dyn InputStream<P>>, DataError> {
        let key = identity.market().key();
        self.streams
            .get(&key)
            .cloned()
            .ok_or(DataError::StreamNotFound { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeFrame;
    use crate::input::FieldKind;
    use chrono::{Duration, TimeZone};

    fn series(n: i64) -> Vec<Observation<Bar<f64>>> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .rev()
            .map(|i| Observation::new(t0 + Duration::hours(i), Bar::flat(100.0 + i as f64)))
            .collect()
    }

    #[test]
    fn preload_range_is_half_open_and_sorted() {
        let stream = MemoryStream::new(series(10));
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let got = stream
            .preload_range(t0 + Duration::hours(2), t0 + Duration::hours(5))
            .unwrap();
        let closes: Vec<f64> = got.iter().map(|o| o.value.close).collect();
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn resolver_matches_on_market_not_field() {
        let market = MarketRef::new("sim", "spot", "BTC", TimeFrame::HOUR);
        let resolver = MemoryResolver::new().with_bars(&market, series(3));
        let close = InputIdentity::new("sim", "spot", "BTC", TimeFrame::HOUR, FieldKind::Close);
        assert!(resolver.resolve(&close).is_ok());

        let other = InputIdentity::new("sim", "spot", "ETH", TimeFrame::HOUR, FieldKind::Close);
        assert!(matches!(
            resolver.resolve(&other),
            Err(DataError::StreamNotFound { .. })
        ));
    }
}
