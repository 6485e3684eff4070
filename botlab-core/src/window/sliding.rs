//! Fixed-capacity, time-indexed window over one data stream.
//!
//! Storage is a double-capacity buffer: values are appended until the buffer
//! holds `2 * capacity` entries, then the oldest `capacity` are drained in one
//! O(capacity) move. The live range (the last `capacity` entries) is therefore
//! always a single contiguous slice, which is what `values()` hands out.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TimeFrame;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("range {first}..={last} is not available in the window")]
    RangeUnavailable {
        first: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("missing bar at {expected}")]
    MissingBar { expected: DateTime<Utc> },

    #[error("timestamp {got} is not aligned to the {timeframe} bar grid")]
    Misaligned {
        got: DateTime<Utc>,
        timeframe: TimeFrame,
    },

    #[error("timestamp {got} is not after the last buffered bar {last}")]
    OutOfOrder {
        last: DateTime<Utc>,
        got: DateTime<Utc>,
    },
}

/// What to do when a stream skips one or more bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GapPolicy<T> {
    /// Refuse the push with [`WindowError::MissingBar`].
    Strict,
    /// Fill each missing bar with this value.
    Sentinel(T),
    /// Fill each missing bar with a copy of the latest value.
    CarryForward,
}

#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    capacity: usize,
    timeframe: TimeFrame,
    policy: GapPolicy<T>,
    times: Vec<DateTime<Utc>>,
    values: Vec<T>,
    filler: Vec<bool>,
}

impl<T: Clone> SlidingWindow<T> {
    /// Panics if `capacity` is zero; the aggregator rejects zero lookbacks before
    /// any window is built.
    pub fn new(capacity: usize, timeframe: TimeFrame, policy: GapPolicy<T>) -> Self {
        assert!(capacity > 0, "window capacity must be at least 1");
        Self {
            capacity,
            timeframe,
            policy,
            times: Vec::with_capacity(capacity * 2),
            values: Vec::with_capacity(capacity * 2),
            filler: Vec::with_capacity(capacity * 2),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    /// Number of observations currently buffered (at most `capacity`).
    pub fn len(&self) -> usize {
        self.times.len().min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    fn base(&self) -> usize {
        self.times.len() - self.len()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.times.get(self.base()).copied()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.times.last().copied()
    }

    pub fn latest(&self) -> Option<&T> {
        self.values.last()
    }

    pub fn latest_is_filler(&self) -> bool {
        self.filler.last().copied().unwrap_or(false)
    }

    /// Count of synthesized observations inside the live range.
    pub fn filler_count(&self) -> usize {
        self.filler[self.base()..].iter().filter(|f| **f).count()
    }

    /// All live values, oldest first.
    pub fn as_slice(&self) -> &[T] {
        &self.values[self.base()..]
    }

    /// The most recent `n` values (fewer if the window holds less).
    pub fn tail(&self, n: usize) -> &[T] {
        let live = self.as_slice();
        &live[live.len().saturating_sub(n)..]
    }

    /// Value buffered for the bar opening at `time`.
    pub fn at(&self, time: DateTime<Utc>) -> Option<&T> {
        self.index_of(time).map(|i| &self.values[i])
    }

    /// Whether the bar at `time` was synthesized by the gap policy.
    pub fn is_filler(&self, time: DateTime<Utc>) -> Option<bool> {
        self.index_of(time).map(|i| self.filler[i])
    }

    /// Contiguous slice covering the bars opening at `first` through `last`.
    pub fn values(&self, first: DateTime<Utc>, last: DateTime<Utc>) -> Result<&[T], WindowError> {
        let unavailable = WindowError::RangeUnavailable { first, last };
        if first > last {
            return Err(unavailable);
        }
        match (self.index_of(first), self.index_of(last)) {
            (Some(a), Some(b)) => Ok(&self.values[a..=b]),
            _ => Err(unavailable),
        }
    }

    fn index_of(&self, time: DateTime<Utc>) -> Option<usize> {
        let first = self.first_timestamp()?;
        if time < first {
            return None;
        }
        let offset = self.timeframe.bars_between(first, time)?;
        let idx = self.base() + usize::try_from(offset).ok()?;
        (idx < self.times.len()).then_some(idx)
    }

    /// Append the observation for the bar opening at `time`.
    pub fn push(&mut self, value: T, time: DateTime<Utc>) -> Result<(), WindowError> {
        if let Some(last) = self.last_timestamp() {
            let steps = self.steps_after(last, time)?;
            if steps > 1 {
                self.fill_gap(last, steps - 1)?;
            }
        }
        self.append(value, time, false);
        Ok(())
    }

    /// Record that the stream has no observation for the bar opening at `time`.
    ///
    /// Every bar from the last buffered one up to and including `time` is
    /// filled according to the gap policy. An empty window under
    /// `CarryForward` has nothing to carry and stays empty.
    pub fn push_missing(&mut self, time: DateTime<Utc>) -> Result<(), WindowError> {
        match self.last_timestamp() {
            Some(last) => {
                let steps = self.steps_after(last, time)?;
                self.fill_gap(last, steps)
            }
            None => match &self.policy {
                GapPolicy::Strict => Err(WindowError::MissingBar { expected: time }),
                GapPolicy::Sentinel(v) => {
                    let v = v.clone();
                    self.append(v, time, true);
                    Ok(())
                }
                GapPolicy::CarryForward => Ok(()),
            },
        }
    }

    fn steps_after(&self, last: DateTime<Utc>, time: DateTime<Utc>) -> Result<i64, WindowError> {
        if time <= last {
            return Err(WindowError::OutOfOrder { last, got: time });
        }
        self.timeframe
            .bars_between(last, time)
            .ok_or(WindowError::Misaligned {
                got: time,
                timeframe: self.timeframe,
            })
    }

    /// Synthesize `count` bars following `last`. Only the newest `capacity`
    /// of them can survive, so older fillers are never materialized.
    fn fill_gap(&mut self, last: DateTime<Utc>, count: i64) -> Result<(), WindowError> {
        if count <= 0 {
            return Ok(());
        }
        let span = self.timeframe.span();
        let value = match &self.policy {
            GapPolicy::Strict => {
                return Err(WindowError::MissingBar {
                    expected: last + span,
                })
            }
            GapPolicy::Sentinel(v) => v.clone(),
            GapPolicy::CarryForward => match self.values.last() {
                Some(v) => v.clone(),
                None => return Ok(()),
            },
        };
        let keep = count.min(self.capacity as i64);
        for k in (count - keep + 1)..=count {
            self.append(value.clone(), last + span_times(span, k), true);
        }
        Ok(())
    }

    fn append(&mut self, value: T, time: DateTime<Utc>, filler: bool) {
        self.times.push(time);
        self.values.push(value);
        self.filler.push(filler);
        if self.times.len() >= self.capacity * 2 {
            let drop = self.times.len() - self.capacity;
            self.times.drain(..drop);
            self.values.drain(..drop);
            self.filler.drain(..drop);
        }
    }
}

fn span_times(span: Duration, k: i64) -> Duration {
    Duration::seconds(span.num_seconds() * k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn window(capacity: usize, policy: GapPolicy<f64>) -> SlidingWindow<f64> {
        SlidingWindow::new(capacity, TimeFrame::MINUTE, policy)
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut w = window(3, GapPolicy::Strict);
        for i in 0..10 {
            w.push(i as f64, t(i)).unwrap();
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.as_slice(), &[7.0, 8.0, 9.0]);
        assert_eq!(w.first_timestamp(), Some(t(7)));
        assert_eq!(w.last_timestamp(), Some(t(9)));
    }

    #[test]
    fn live_range_stays_contiguous_across_compaction() {
        let mut w = window(4, GapPolicy::Strict);
        for i in 0..8 {
            w.push(i as f64, t(i)).unwrap();
            let expect: Vec<f64> = ((i - 3).max(0)..=i).map(|v| v as f64).collect();
            assert_eq!(w.as_slice(), expect.as_slice());
        }
    }

    #[test]
    fn out_of_order_and_duplicate_rejected() {
        let mut w = window(3, GapPolicy::Strict);
        w.push(1.0, t(5)).unwrap();
        assert!(matches!(
            w.push(2.0, t(5)),
            Err(WindowError::OutOfOrder { .. })
        ));
        assert!(matches!(
            w.push(2.0, t(4)),
            Err(WindowError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn misaligned_rejected() {
        let mut w = window(3, GapPolicy::Strict);
        w.push(1.0, t(0)).unwrap();
        let err = w.push(2.0, t(1) + Duration::seconds(30)).unwrap_err();
        assert!(matches!(err, WindowError::Misaligned { .. }));
    }

    #[test]
    fn strict_gap_reports_first_missing_bar() {
        let mut w = window(5, GapPolicy::Strict);
        w.push(1.0, t(0)).unwrap();
        let err = w.push(2.0, t(3)).unwrap_err();
        assert_eq!(err, WindowError::MissingBar { expected: t(1) });
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn sentinel_gap_inserts_fillers() {
        let mut w = window(5, GapPolicy::Sentinel(-1.0));
        w.push(1.0, t(0)).unwrap();
        w.push(2.0, t(3)).unwrap();
        assert_eq!(w.as_slice(), &[1.0, -1.0, -1.0, 2.0]);
        assert_eq!(w.filler_count(), 2);
        assert_eq!(w.is_filler(t(1)), Some(true));
        assert_eq!(w.is_filler(t(3)), Some(false));
    }

    #[test]
    fn huge_gap_only_materializes_capacity() {
        let mut w = window(3, GapPolicy::Sentinel(0.0));
        w.push(1.0, t(0)).unwrap();
        w.push(2.0, t(1_000)).unwrap();
        assert_eq!(w.as_slice(), &[0.0, 0.0, 2.0]);
        assert_eq!(w.first_timestamp(), Some(t(998)));
    }

    #[test]
    fn carry_forward_repeats_latest() {
        let mut w = window(5, GapPolicy::CarryForward);
        w.push(7.0, t(0)).unwrap();
        w.push_missing(t(1)).unwrap();
        w.push_missing(t(2)).unwrap();
        assert_eq!(w.as_slice(), &[7.0, 7.0, 7.0]);
        assert!(w.latest_is_filler());
    }

    #[test]
    fn push_missing_on_empty_window() {
        let mut strict = window(2, GapPolicy::Strict);
        assert_eq!(
            strict.push_missing(t(0)),
            Err(WindowError::MissingBar { expected: t(0) })
        );

        let mut carry = window(2, GapPolicy::CarryForward);
        carry.push_missing(t(0)).unwrap();
        assert!(carry.is_empty());

        let mut sentinel = window(2, GapPolicy::Sentinel(0.0));
        sentinel.push_missing(t(0)).unwrap();
        assert_eq!(sentinel.len(), 1);
        assert!(sentinel.latest_is_filler());
    }

    #[test]
    fn values_returns_exact_range() {
        let mut w = window(5, GapPolicy::Strict);
        for i in 0..5 {
            w.push(i as f64 * 10.0, t(i)).unwrap();
        }
        assert_eq!(w.values(t(1), t(3)).unwrap(), &[10.0, 20.0, 30.0]);
        assert_eq!(w.values(t(4), t(4)).unwrap(), &[40.0]);
    }

    #[test]
    fn values_outside_buffer_is_unavailable() {
        let mut w = window(3, GapPolicy::Strict);
        for i in 0..6 {
            w.push(i as f64, t(i)).unwrap();
        }
        assert!(matches!(
            w.values(t(1), t(4)),
            Err(WindowError::RangeUnavailable { .. })
        ));
        assert!(matches!(
            w.values(t(4), t(6)),
            Err(WindowError::RangeUnavailable { .. })
        ));
        assert!(matches!(
            w.values(t(5), t(4)),
            Err(WindowError::RangeUnavailable { .. })
        ));
        assert!(w
            .values(t(3) + Duration::seconds(10), t(5))
            .is_err());
    }

    #[test]
    fn tail_clamps_to_len() {
        let mut w = window(4, GapPolicy::Strict);
        w.push(1.0, t(0)).unwrap();
        w.push(2.0, t(1)).unwrap();
        assert_eq!(w.tail(1), &[2.0]);
        assert_eq!(w.tail(10), &[1.0, 2.0]);
    }
}
