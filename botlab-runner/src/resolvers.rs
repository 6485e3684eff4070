//! Reference stream resolvers: CSV files on disk and synthetic bars.

use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::debug;

use botlab_core::data::{DataError, InputStream, MemoryStream, StreamResolver};
use botlab_core::domain::{Bar, Observation, Precision, TimeFrame};
use botlab_core::input::{InputIdentity, MarketRef};

// ─── CSV ─────────────────────────────────────────────────────────────

/// Reads `{dir}/{exchange}/{area}/{symbol}/{timeframe}.csv` with the header
/// `time,open,high,low,close,volume`. `time` is RFC 3339 or unix seconds and
/// marks the bar's open.
pub struct CsvResolver<P> {
    dir: PathBuf,
    _precision: PhantomData<fn() -> P>,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    time: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

impl<P: Precision> CsvResolver<P> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _precision: PhantomData,
        }
    }

    pub fn path_for(&self, market: &MarketRef) -> PathBuf {
        csv_path(&self.dir, market)
    }

    fn load(&self, market: &MarketRef) -> Result<Vec<Observation<Bar<P>>>, DataError> {
        let key = market.key();
        let path = self.path_for(market);
        if !path.exists() {
            return Err(DataError::StreamNotFound { key });
        }
        let file = File::open(&path).map_err(|source| DataError::Io {
            key: key.clone(),
            source,
        })?;

        let mut reader = csv::Reader::from_reader(file);
        let mut out = Vec::new();
        for (i, row) in reader.deserialize::<CsvRow>().enumerate() {
            let line = i + 2;
            let row = row.map_err(|e| DataError::Parse {
                key: key.clone(),
                reason: format!("line {line}: {e}"),
            })?;
            let field = |name: &str, text: &str| {
                P::parse(text.trim()).ok_or_else(|| DataError::Parse {
                    key: key.clone(),
                    reason: format!("line {line}: {name} '{text}' is not a number"),
                })
            };
            let time = parse_time(row.time.trim()).ok_or_else(|| DataError::Parse {
                key: key.clone(),
                reason: format!("line {line}: time '{}' is neither RFC 3339 nor unix seconds", row.time),
            })?;
            let bar = Bar::new(
                field("open", &row.open)?,
                field("high", &row.high)?,
                field("low", &row.low)?,
                field("close", &row.close)?,
                field("volume", &row.volume)?,
            );
            out.push(Observation::new(time, bar));
        }
        debug!(%key, path = %path.display(), bars = out.len(), "csv stream loaded");
        Ok(out)
    }
}

impl<P: Precision> StreamResolver<P> for CsvResolver<P> {
    fn resolve(&self, identity: &InputIdentity) -> Result<Arc<dyn InputStream<P>>, DataError> {
        let observations = self.load(&identity.market())?;
        Ok(Arc::new(MemoryStream::new(observations)))
    }
}

pub fn csv_path(dir: &Path, market: &MarketRef) -> PathBuf {
    dir.join(&market.exchange)
        .join(&market.area)
        .join(&market.symbol)
        .join(format!("{}.csv", market.timeframe))
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    text.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

// ─── Synthetic ───────────────────────────────────────────────────────

/// Deterministic synthetic bars for development and tests.
///
/// Every bar is a pure function of `(market key, seed, bar index)`, so any
/// range can be served without generating the series from its beginning, and
/// overlapping requests agree exactly.
pub struct SyntheticResolver<P> {
    seed: u64,
    gap_rate: f64,
    _precision: PhantomData<fn() -> P>,
}

impl<P: Precision> SyntheticResolver<P> {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            gap_rate: 0.0,
            _precision: PhantomData,
        }
    }

    /// Drop roughly this fraction of bars to exercise gap handling.
    pub fn with_gap_rate(mut self, rate: f64) -> Self {
        self.gap_rate = rate.clamp(0.0, 1.0);
        self
    }
}

impl<P: Precision> StreamResolver<P> for SyntheticResolver<P> {
    fn resolve(&self, identity: &InputIdentity) -> Result<Arc<dyn InputStream<P>>, DataError> {
        let market = identity.market();
        Ok(Arc::new(SyntheticStream {
            key: market.key(),
            timeframe: market.timeframe,
            seed: self.seed,
            gap_rate: self.gap_rate,
            _precision: PhantomData::<fn() -> P>,
        }))
    }
}

struct SyntheticStream<P> {
    key: String,
    timeframe: TimeFrame,
    seed: u64,
    gap_rate: f64,
    _precision: PhantomData<fn() -> P>,
}

/// Octave count of the value-noise price path.
const OCTAVES: u32 = 6;

impl<P> SyntheticStream<P> {
    fn rng(&self, salt: u32, index: i64) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.key.as_bytes());
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(&salt.to_le_bytes());
        hasher.update(&index.to_le_bytes());
        StdRng::from_seed(*hasher.finalize().as_bytes())
    }

    /// Log-price offset at bar `index`: octaves of smoothed lattice noise
    /// with periods 8, 16, … bars and amplitudes growing with the period.
    fn log_price(&self, index: i64) -> f64 {
        (0..OCTAVES)
            .map(|octave| {
                let period = 8i64 << octave;
                let cell = index.div_euclid(period);
                let frac = index.rem_euclid(period) as f64 / period as f64;
                let a: f64 = self.rng(octave, cell).gen_range(-1.0..1.0);
                let b: f64 = self.rng(octave, cell + 1).gen_range(-1.0..1.0);
                let smooth = frac * frac * (3.0 - 2.0 * frac);
                let amplitude = 0.02 * f64::from(1u32 << octave).sqrt();
                amplitude * (a + (b - a) * smooth)
            })
            .sum()
    }

    fn close(&self, index: i64) -> f64 {
        round_cents(100.0 * self.log_price(index).exp())
    }
}

fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

impl<P: Precision> InputStream<P> for SyntheticStream<P> {
    fn preload_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Observation<Bar<P>>>, DataError> {
        let convert = |x: f64| {
            P::from_f64(x).ok_or_else(|| DataError::Other(format!("synthetic value {x} not representable")))
        };
        let span = self.timeframe.secs();
        let mut t = self.timeframe.align_floor(start);
        if t < start {
            t += self.timeframe.span();
        }

        let mut out = Vec::new();
        while t < end {
            let index = t.timestamp().div_euclid(span);
            let mut rng = self.rng(u32::MAX, index);
            if self.gap_rate > 0.0 && rng.gen_bool(self.gap_rate) {
                t += Duration::seconds(span);
                continue;
            }
            let open = self.close(index - 1);
            let close = self.close(index);
            let high = round_cents(open.max(close) * (1.0 + rng.gen_range(0.0..0.005)));
            let low = round_cents(open.min(close) * (1.0 - rng.gen_range(0.0..0.005)));
            let volume = f64::from(rng.gen_range(500u32..5_000));
            out.push(Observation::new(
                t,
                Bar::new(convert(open)?, convert(high)?, convert(low)?, convert(close)?, convert(volume)?),
            ));
            t += Duration::seconds(span);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botlab_core::input::FieldKind;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn identity(symbol: &str) -> InputIdentity {
        InputIdentity::new("sim", "spot", symbol, TimeFrame::HOUR, FieldKind::Close)
    }

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    #[test]
    fn synthetic_is_deterministic_and_range_independent() {
        let resolver: SyntheticResolver<f64> = SyntheticResolver::new(7);
        let stream = resolver.resolve(&identity("BTC")).unwrap();
        let whole = stream.preload_range(t(0), t(48)).unwrap();
        let tail = stream.preload_range(t(24), t(48)).unwrap();
        assert_eq!(whole.len(), 48);
        assert_eq!(&whole[24..], &tail[..]);

        let again = SyntheticResolver::<f64>::new(7).resolve(&identity("BTC")).unwrap();
        assert_eq!(again.preload_range(t(0), t(48)).unwrap(), whole);
        for obs in &whole {
            assert!(obs.value.is_sane(), "{obs:?}");
        }
    }

    #[test]
    fn synthetic_differs_per_symbol_and_seed() {
        let a = SyntheticResolver::<f64>::new(1).resolve(&identity("BTC")).unwrap();
        let b = SyntheticResolver::<f64>::new(1).resolve(&identity("ETH")).unwrap();
        let c = SyntheticResolver::<f64>::new(2).resolve(&identity("BTC")).unwrap();
        let bars = |s: &Arc<dyn InputStream<f64>>| s.preload_range(t(0), t(24)).unwrap();
        assert_ne!(bars(&a), bars(&b));
        assert_ne!(bars(&a), bars(&c));
    }

    #[test]
    fn synthetic_gaps_drop_bars() {
        let stream = SyntheticResolver::<f64>::new(3)
            .with_gap_rate(0.5)
            .resolve(&identity("BTC"))
            .unwrap();
        let bars = stream.preload_range(t(0), t(200)).unwrap();
        assert!(bars.len() < 200 && bars.len() > 20, "{}", bars.len());
    }

    #[test]
    fn csv_resolver_reads_layout() {
        let dir = tempfile::tempdir().unwrap();
        let market = MarketRef::new("sim", "spot", "BTC", TimeFrame::HOUR);
        let path = csv_path(dir.path(), &market);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = File::create(&path).unwrap();
        writeln!(f, "time,open,high,low,close,volume").unwrap();
        writeln!(f, "2024-01-01T01:00:00Z,100.1,101.2,99.9,100.7,12").unwrap();
        writeln!(f, "1704067200,100.0,100.5,99.5,100.1,10").unwrap();
        drop(f);

        let resolver: CsvResolver<Decimal> = CsvResolver::new(dir.path());
        let stream = resolver.resolve(&identity("BTC")).unwrap();
        let bars = stream.preload_range(t(0), t(2)).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].time, t(0), "sorted by time");
        assert_eq!(bars[1].value.close, dec!(100.7));
    }

    #[test]
    fn csv_resolver_reports_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let resolver: CsvResolver<f64> = CsvResolver::new(dir.path());
        assert!(matches!(
            resolver.resolve(&identity("NOPE")),
            Err(DataError::StreamNotFound { .. })
        ));

        let market = MarketRef::new("sim", "spot", "BAD", TimeFrame::HOUR);
        let path = csv_path(dir.path(), &market);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "time,open,high,low,close,volume\nyesterday,1,1,1,1,1\n").unwrap();
        match resolver.resolve(&identity("BAD")) {
            Err(DataError::Parse { reason, .. }) => assert!(reason.contains("line 2"), "{reason}"),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("expected a parse error"),
        }
    }
}
