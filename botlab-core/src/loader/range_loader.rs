//! Range loader: feeds the window arena ahead of the simulated clock.
//!
//! Windows are grouped into feeds by market (one stream serves every field of
//! a market). Before the clock first moves, `preload_tail` fills each window's
//! lookback with bars preceding the batch start. After that, chunk data is
//! fetched on a background thread (`begin_prefetch`) while the clock consumes
//! the previous chunk, and staged when the controller joins it
//! (`await_prefetch`). `advance` then pushes one bar per feed per step.
//!
//! Feeds coarser than the batch timeframe push a bar only on the step at which
//! that bar completes: with batch span B and feed span C, the step at `t`
//! completes the coarse bar opening at `t + B - C` whenever `t + B` lies on the
//! C grid.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::data::{DataError, InputStream, StreamResolver};
use crate::domain::{Bar, Observation, Precision, TimeFrame};
use crate::input::MarketRef;
use crate::window::{WindowArena, WindowError, WindowHandle};

use super::Chunk;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("cannot resolve data stream for '{key}': {source}")]
    Resolve {
        key: String,
        #[source]
        source: DataError,
    },

    #[error("loading '{key}' failed: {source}")]
    Data {
        key: String,
        #[source]
        source: DataError,
    },

    #[error("window for '{key}' rejected the bar at {time}: {source}")]
    Window {
        key: String,
        time: DateTime<Utc>,
        #[source]
        source: WindowError,
    },

    #[error("'{key}' returned an observation at {got} while the clock expected {expected}")]
    UnexpectedObservation {
        key: String,
        expected: DateTime<Utc>,
        got: DateTime<Utc>,
    },

    #[error("preload thread panicked while loading chunk {start}..{end}")]
    PreloadPanicked {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("bar {time} lies beyond the staged data (staged until {staged_until:?})")]
    ChunkNotStaged {
        time: DateTime<Utc>,
        staged_until: Option<DateTime<Utc>>,
    },

    #[error("failed to spawn preload thread: {0}")]
    Spawn(#[from] std::io::Error),
}

type Batch<P> = Vec<Vec<Observation<Bar<P>>>>;

/// An in-flight chunk preload. Joining it is the only way to stage its data.
pub struct PreloadHandle<P> {
    chunk: Chunk,
    join: JoinHandle<Result<Batch<P>, LoaderError>>,
}

impl<P> PreloadHandle<P> {
    pub fn chunk(&self) -> Chunk {
        self.chunk
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

struct Feed<P> {
    market: MarketRef,
    stream: Arc<dyn InputStream<P>>,
    windows: Vec<WindowHandle>,
    lookback: usize,
    staged: VecDeque<Observation<Bar<P>>>,
}

struct Request<P> {
    key: String,
    stream: Arc<dyn InputStream<P>>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

pub struct RangeLoader<P> {
    base: TimeFrame,
    feeds: Vec<Feed<P>>,
    staged_until: Option<DateTime<Utc>>,
}

impl<P: Precision> RangeLoader<P> {
    /// Resolve one stream per distinct market in `arena`.
    pub fn new(arena: &WindowArena<P>, base: TimeFrame, resolver: &dyn StreamResolver<P>) -> Result<Self, LoaderError> {
        let mut feeds: Vec<Feed<P>> = Vec::new();
        for handle in arena.handles() {
            let (Some(identity), Some(slot)) = (arena.identity(handle), arena.slot(handle)) else {
                continue;
            };
            let market = identity.market();
            if let Some(feed) = feeds.iter_mut().find(|f| f.market == market) {
                feed.windows.push(handle);
                feed.lookback = feed.lookback.max(slot.capacity());
                continue;
            }
            let stream = resolver.resolve(identity).map_err(|source| LoaderError::Resolve {
                key: market.key(),
                source,
            })?;
            feeds.push(Feed {
                market,
                stream,
                windows: vec![handle],
                lookback: slot.capacity(),
                staged: VecDeque::new(),
            });
        }
        debug!(feeds = feeds.len(), windows = arena.len(), "resolved data streams");
        Ok(Self {
            base,
            feeds,
            staged_until: None,
        })
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Blocking fill of every window's lookback with bars before `start`.
    pub fn preload_tail(&mut self, start: DateTime<Utc>, arena: &mut WindowArena<P>) -> Result<(), LoaderError> {
        let requests: Vec<Request<P>> = self
            .feeds
            .iter()
            .map(|feed| {
                let tf = feed.market.timeframe;
                let end = tf.align_floor(start);
                let depth = chrono::Duration::seconds(tf.secs() * feed.lookback as i64);
                Request {
                    key: feed.market.key(),
                    stream: Arc::clone(&feed.stream),
                    start: end - depth,
                    end,
                }
            })
            .collect();

        let batch = fetch_all(&requests)?;
        for (feed, observations) in self.feeds.iter().zip(batch) {
            for obs in observations {
                for &handle in &feed.windows {
                    arena.push(handle, obs.time, &obs.value).map_err(|source| LoaderError::Window {
                        key: feed.market.key(),
                        time: obs.time,
                        source,
                    })?;
                }
            }
        }
        debug!(%start, feeds = self.feeds.len(), "lookback tails loaded");
        Ok(())
    }

    /// Start fetching `chunk` on a background thread.
    pub fn begin_prefetch(&self, chunk: Chunk) -> Result<PreloadHandle<P>, LoaderError> {
        let requests: Vec<Request<P>> = self
            .feeds
            .iter()
            .map(|feed| {
                let (start, end) = self.feed_range(feed.market.timeframe, &chunk);
                Request {
                    key: feed.market.key(),
                    stream: Arc::clone(&feed.stream),
                    start,
                    end,
                }
            })
            .collect();

        debug!(start = %chunk.start, end = %chunk.end, "prefetch started");
        let join = thread::Builder::new()
            .name("botlab-preload".into())
            .spawn(move || fetch_all(&requests))?;
        Ok(PreloadHandle { chunk, join })
    }

    /// Join a preload and stage its data. Must be called before the clock
    /// enters the chunk.
    pub fn await_prefetch(&mut self, handle: PreloadHandle<P>) -> Result<Chunk, LoaderError> {
        let chunk = handle.chunk;
        let batch = handle.join.join().map_err(|_| LoaderError::PreloadPanicked {
            start: chunk.start,
            end: chunk.end,
        })??;
        let mut staged = 0;
        for (feed, observations) in self.feeds.iter_mut().zip(batch) {
            staged += observations.len();
            feed.staged.extend(observations);
        }
        self.staged_until = Some(chunk.end);
        debug!(start = %chunk.start, end = %chunk.end, observations = staged, "chunk staged");
        Ok(chunk)
    }

    /// Push the bar for step `t` into every window.
    pub fn advance(&mut self, t: DateTime<Utc>, arena: &mut WindowArena<P>) -> Result<(), LoaderError> {
        if self.staged_until.map_or(true, |until| t >= until) {
            return Err(LoaderError::ChunkNotStaged {
                time: t,
                staged_until: self.staged_until,
            });
        }
        let base_span = self.base.span();
        for feed in &mut self.feeds {
            let tf = feed.market.timeframe;
            let completes = t + base_span;
            if !tf.is_aligned(completes) {
                continue;
            }
            let expected = completes - tf.span();

            if let Some(front) = feed.staged.front() {
                if front.time < expected {
                    return Err(LoaderError::UnexpectedObservation {
                        key: feed.market.key(),
                        expected,
                        got: front.time,
                    });
                }
            }

            let window_err = |source| LoaderError::Window {
                key: feed.market.key(),
                time: expected,
                source,
            };
            let on_time = feed.staged.front().is_some_and(|o| o.time == expected);
            match on_time.then(|| feed.staged.pop_front()).flatten() {
                Some(obs) => {
                    for &handle in &feed.windows {
                        arena.push(handle, obs.time, &obs.value).map_err(window_err)?;
                    }
                }
                None => {
                    for &handle in &feed.windows {
                        arena.push_missing(handle, expected).map_err(window_err)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Fetch range for a feed of timeframe `tf` over `chunk`: the coarse bars
    /// that complete on some step inside the chunk.
    fn feed_range(&self, tf: TimeFrame, chunk: &Chunk) -> (DateTime<Utc>, DateTime<Utc>) {
        let shift = self.base.span() - tf.span();
        (chunk.start + shift, chunk.end + shift)
    }
}

fn fetch_all<P: Precision>(requests: &[Request<P>]) -> Result<Batch<P>, LoaderError> {
    requests
        .par_iter()
        .map(|req| {
            let mut observations = req
                .stream
                .preload_range(req.start, req.end)
                .map_err(|source| LoaderError::Data {
                    key: req.key.clone(),
                    source,
                })?;
            observations.sort_by_key(|o| o.time);
            Ok(observations)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryResolver;
    use crate::input::{aggregate, Consumer, FieldKind, InputDecl};
    use crate::loader::{ChunkGranularity, ChunkPlan};
    use crate::window::GapFill;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    fn hourly(from: i64, to: i64, skip: &[i64]) -> Vec<Observation<Bar<f64>>> {
        (from..to)
            .filter(|i| !skip.contains(i))
            .map(|i| Observation::new(t0() + Duration::hours(i), Bar::flat(100.0 + i as f64)))
            .collect()
    }

    fn market() -> MarketRef {
        MarketRef::new("sim", "spot", "BTC", TimeFrame::HOUR)
    }

    fn setup(lookback: usize, gap: GapFill, data: Vec<Observation<Bar<f64>>>) -> (RangeLoader<f64>, WindowArena<f64>, WindowHandle) {
        let consumers = vec![Consumer::new(market(), vec![InputDecl::own(FieldKind::Close, lookback)])];
        let agg = aggregate::<f64>(&consumers, TimeFrame::HOUR, gap).unwrap();
        let resolver = MemoryResolver::new().with_bars(&market(), data);
        let loader = RangeLoader::new(&agg.arena, TimeFrame::HOUR, &resolver).unwrap();
        (loader, agg.arena, agg.bindings[0][0])
    }

    #[test]
    fn tail_preload_fills_lookback() {
        let (mut loader, mut arena, h) = setup(3, GapFill::Strict, hourly(-10, 10, &[]));
        loader.preload_tail(t0(), &mut arena).unwrap();
        assert_eq!(arena.values(h).unwrap().as_slice(), &[97.0, 98.0, 99.0]);
    }

    #[test]
    fn advance_requires_staged_chunk() {
        let (mut loader, mut arena, _) = setup(2, GapFill::Strict, hourly(0, 5, &[]));
        let err = loader.advance(t0(), &mut arena).unwrap_err();
        assert!(matches!(err, LoaderError::ChunkNotStaged { .. }));
    }

    #[test]
    fn prefetch_then_advance_pushes_each_bar() {
        let (mut loader, mut arena, h) = setup(2, GapFill::Strict, hourly(0, 48, &[]));
        let plan = ChunkPlan::new(t0(), t0() + Duration::hours(48), TimeFrame::HOUR, ChunkGranularity::Day).unwrap();
        let mut cursor = plan.cursor();
        let first = cursor.next().unwrap();
        let handle = loader.begin_prefetch(first).unwrap();
        loader.await_prefetch(handle).unwrap();

        for i in 0..24 {
            loader.advance(t0() + Duration::hours(i), &mut arena).unwrap();
        }
        assert_eq!(arena.values(h).unwrap().as_slice(), &[122.0, 123.0]);

        let err = loader.advance(t0() + Duration::hours(24), &mut arena).unwrap_err();
        assert!(matches!(err, LoaderError::ChunkNotStaged { .. }));
    }

    #[test]
    fn missing_bar_follows_gap_policy() {
        let (mut loader, mut arena, h) = setup(4, GapFill::CarryForward, hourly(0, 24, &[2]));
        let chunk = Chunk {
            start: t0(),
            end: t0() + Duration::hours(24),
            is_long: true,
        };
        let handle = loader.begin_prefetch(chunk).unwrap();
        loader.await_prefetch(handle).unwrap();
        for i in 0..4 {
            loader.advance(t0() + Duration::hours(i), &mut arena).unwrap();
        }
        let w = arena.values(h).unwrap();
        assert_eq!(w.as_slice(), &[100.0, 101.0, 101.0, 103.0]);
        assert_eq!(w.is_filler(t0() + Duration::hours(2)), Some(true));
    }

    #[test]
    fn strict_policy_surfaces_missing_bar() {
        let (mut loader, mut arena, _) = setup(4, GapFill::Strict, hourly(0, 24, &[1]));
        let chunk = Chunk {
            start: t0(),
            end: t0() + Duration::hours(24),
            is_long: true,
        };
        let handle = loader.begin_prefetch(chunk).unwrap();
        loader.await_prefetch(handle).unwrap();
        loader.advance(t0(), &mut arena).unwrap();
        let err = loader.advance(t0() + Duration::hours(1), &mut arena).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Window {
                source: WindowError::MissingBar { .. },
                ..
            }
        ));
    }

    #[test]
    fn coarse_feed_pushes_on_completion() {
        let daily = MarketRef::new("sim", "spot", "BTC", TimeFrame::DAY);
        let consumers = vec![Consumer::new(
            market(),
            vec![InputDecl::own(FieldKind::Close, 2).on_timeframe(TimeFrame::DAY)],
        )];
        let agg = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::Strict).unwrap();
        let days: Vec<_> = (-3..3)
            .map(|d| Observation::new(t0() + Duration::days(d), Bar::flat(1_000.0 + d as f64)))
            .collect();
        let resolver = MemoryResolver::new().with_bars(&daily, days);
        let mut loader = RangeLoader::new(&agg.arena, TimeFrame::HOUR, &resolver).unwrap();
        let mut arena = agg.arena;
        let h = agg.bindings[0][0];

        loader.preload_tail(t0(), &mut arena).unwrap();
        assert_eq!(arena.values(h).unwrap().as_slice(), &[998.0, 999.0]);

        let chunk = Chunk {
            start: t0(),
            end: t0() + Duration::days(1),
            is_long: true,
        };
        let handle = loader.begin_prefetch(chunk).unwrap();
        loader.await_prefetch(handle).unwrap();
        for i in 0..23 {
            loader.advance(t0() + Duration::hours(i), &mut arena).unwrap();
        }
        assert_eq!(arena.values(h).unwrap().latest(), Some(&999.0));
        loader.advance(t0() + Duration::hours(23), &mut arena).unwrap();
        assert_eq!(arena.values(h).unwrap().as_slice(), &[999.0, 1_000.0]);
    }

    #[test]
    fn unresolvable_market_is_reported() {
        let consumers = vec![Consumer::new(market(), vec![InputDecl::own(FieldKind::Close, 1)])];
        let agg = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::Strict).unwrap();
        let resolver: MemoryResolver<f64> = MemoryResolver::new();
        let err = RangeLoader::new(&agg.arena, TimeFrame::HOUR, &resolver).err().unwrap();
        assert!(matches!(err, LoaderError::Resolve { .. }));
    }
}
