//! Chunk planning: split `[start, end)` into aligned sub-ranges.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TimeFrame;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("empty range: start {start} is not before end {end}")]
    EmptyRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("chunk boundary {boundary} is not aligned to the {timeframe} bar span")]
    Misaligned {
        boundary: DateTime<Utc>,
        timeframe: TimeFrame,
    },

    #[error("boundary function returned {got}, which is not after {after}")]
    NonAdvancingBoundary {
        after: DateTime<Utc>,
        got: DateTime<Utc>,
    },
}

/// Preset chunk sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkGranularity {
    /// UTC calendar days (long chunks).
    Day,
    /// Fixed blocks of hours aligned to the epoch (short chunks).
    Hours(u32),
}

impl Default for ChunkGranularity {
    fn default() -> Self {
        ChunkGranularity::Day
    }
}

impl ChunkGranularity {
    pub fn is_long(&self) -> bool {
        matches!(self, ChunkGranularity::Day)
    }

    /// First boundary strictly after `t`.
    pub fn next_boundary(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let block = match self {
            ChunkGranularity::Day => 86_400,
            ChunkGranularity::Hours(h) => i64::from((*h).max(1)) * 3_600,
        };
        let rem = t.timestamp().rem_euclid(block);
        let floor = t - Duration::seconds(rem) - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()));
        floor + Duration::seconds(block)
    }
}

impl fmt::Display for ChunkGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkGranularity::Day => f.write_str("day"),
            ChunkGranularity::Hours(h) => write!(f, "{h}h"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_long: bool,
}

impl Chunk {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn bars(&self, timeframe: TimeFrame) -> i64 {
        timeframe.bars_between(self.start, self.end).unwrap_or(0)
    }
}

/// Ordered, contiguous chunks covering a range exactly once.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    chunks: Vec<Chunk>,
}

impl ChunkPlan {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: TimeFrame,
        granularity: ChunkGranularity,
    ) -> Result<Self, ChunkError> {
        let is_long = granularity.is_long();
        Self::with_boundary(start, end, timeframe, is_long, |t| granularity.next_boundary(t))
    }

    /// Plan with a caller-supplied boundary function returning the first
    /// boundary strictly after its argument.
    pub fn with_boundary<F>(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: TimeFrame,
        is_long: bool,
        next_boundary: F,
    ) -> Result<Self, ChunkError>
    where
        F: Fn(DateTime<Utc>) -> DateTime<Utc>,
    {
        if start >= end {
            return Err(ChunkError::EmptyRange { start, end });
        }
        for boundary in [start, end] {
            if !timeframe.is_aligned(boundary) {
                return Err(ChunkError::Misaligned { boundary, timeframe });
            }
        }

        let mut chunks = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let next = next_boundary(cursor);
            if next <= cursor {
                return Err(ChunkError::NonAdvancingBoundary {
                    after: cursor,
                    got: next,
                });
            }
            let next = next.min(end);
            if !timeframe.is_aligned(next) {
                return Err(ChunkError::Misaligned {
                    boundary: next,
                    timeframe,
                });
            }
            chunks.push(Chunk {
                start: cursor,
                end: next,
                is_long,
            });
            cursor = next;
        }
        Ok(Self { chunks })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn cursor(&self) -> ChunkCursor<'_> {
        ChunkCursor {
            chunks: &self.chunks,
            next: 0,
        }
    }
}

/// Forward-only iteration over a plan.
#[derive(Debug)]
pub struct ChunkCursor<'a> {
    chunks: &'a [Chunk],
    next: usize,
}

impl ChunkCursor<'_> {
    pub fn peek(&self) -> Option<&Chunk> {
        self.chunks.get(self.next)
    }

    pub fn remaining(&self) -> usize {
        self.chunks.len() - self.next
    }
}

impl Iterator for ChunkCursor<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.get(self.next).copied()?;
        self.next += 1;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    #[test]
    fn day_chunks_cover_range_without_overlap() {
        let plan = ChunkPlan::new(at(1, 6), at(3, 12), TimeFrame::HOUR, ChunkGranularity::Day).unwrap();
        let chunks = plan.chunks();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start, at(1, 6));
        assert_eq!(chunks[0].end, at(2, 0));
        assert_eq!(chunks[2].end, at(3, 12));
        assert!(chunks.windows(2).all(|w| w[0].end == w[1].start));
        assert!(chunks.iter().all(|c| c.is_long));
        let total: i64 = chunks.iter().map(|c| c.bars(TimeFrame::HOUR)).sum();
        assert_eq!(total, 54);
    }

    #[test]
    fn hour_chunks_are_short() {
        let plan = ChunkPlan::new(at(1, 0), at(1, 12), TimeFrame::HOUR, ChunkGranularity::Hours(6)).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(!plan.chunks()[0].is_long);
    }

    #[test]
    fn misaligned_boundary_rejected() {
        let seven_hours = TimeFrame::hours(7).unwrap();
        let err = ChunkPlan::new(at(1, 0), at(3, 0) + Duration::hours(4), seven_hours, ChunkGranularity::Day).unwrap_err();
        assert!(matches!(err, ChunkError::Misaligned { .. }));
    }

    #[test]
    fn empty_range_rejected() {
        let err = ChunkPlan::new(at(2, 0), at(2, 0), TimeFrame::HOUR, ChunkGranularity::Day).unwrap_err();
        assert!(matches!(err, ChunkError::EmptyRange { .. }));
    }

    #[test]
    fn custom_boundary_function() {
        let plan = ChunkPlan::with_boundary(at(1, 0), at(1, 10), TimeFrame::HOUR, false, |t| t + Duration::hours(4)).unwrap();
        let ends: Vec<_> = plan.chunks().iter().map(|c| c.end).collect();
        assert_eq!(ends, vec![at(1, 4), at(1, 8), at(1, 10)]);
    }

    #[test]
    fn stuck_boundary_function_rejected() {
        let err = ChunkPlan::with_boundary(at(1, 0), at(1, 10), TimeFrame::HOUR, false, |t| t).unwrap_err();
        assert!(matches!(err, ChunkError::NonAdvancingBoundary { .. }));
    }

    #[test]
    fn cursor_is_forward_only() {
        let plan = ChunkPlan::new(at(1, 0), at(3, 0), TimeFrame::HOUR, ChunkGranularity::Day).unwrap();
        let mut cursor = plan.cursor();
        assert_eq!(cursor.remaining(), 2);
        let first = cursor.next().unwrap();
        assert_eq!(cursor.peek().unwrap().start, first.end);
        cursor.next();
        assert!(cursor.next().is_none());
        assert_eq!(cursor.remaining(), 0);
    }
}
