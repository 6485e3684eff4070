//! Batch-level errors: which stage failed, how far the clock got, and why.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use botlab_core::bot::BotError;
use botlab_core::domain::TimeFrame;
use botlab_core::input::AggregateError;
use botlab_core::loader::{ChunkError, LoaderError};

use crate::config::ConfigError;
use crate::sink::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStage {
    Setup,
    Aggregation,
    Loading,
    Stepping,
    Finalizing,
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStage::Setup => "setup",
            BatchStage::Aggregation => "aggregation",
            BatchStage::Loading => "loading",
            BatchStage::Stepping => "stepping",
            BatchStage::Finalizing => "finalizing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum BatchErrorKind {
    #[error("batch has no instances")]
    EmptyBatch,

    #[error("batch range is empty: start {start} is not before end {end}")]
    ZeroDuration {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("instance '{instance}' runs on {instance_timeframe}, but the batch timeframe is {batch_timeframe}")]
    InstanceTimeFrame {
        instance: String,
        instance_timeframe: TimeFrame,
        batch_timeframe: TimeFrame,
    },

    #[error("instance '{instance}' is a {found} bot, but this batch runs {expected} bots")]
    MixedBotTypes {
        expected: &'static str,
        found: &'static str,
        instance: String,
    },

    #[error("instance '{instance}': {source}")]
    Bot {
        instance: String,
        #[source]
        source: BotError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Fatal batch failure.
#[derive(Debug, Error)]
#[error("batch failed during {stage} (last completed bar: {}): {kind}", last_bar(.last_completed_bar))]
pub struct BatchError {
    pub stage: BatchStage,
    pub last_completed_bar: Option<DateTime<Utc>>,
    #[source]
    pub kind: BatchErrorKind,
}

fn last_bar(t: &Option<DateTime<Utc>>) -> String {
    t.map_or_else(|| "none".to_string(), |t| t.to_rfc3339())
}

impl BatchError {
    pub fn new(stage: BatchStage, last_completed_bar: Option<DateTime<Utc>>, kind: impl Into<BatchErrorKind>) -> Self {
        Self {
            stage,
            last_completed_bar,
            kind: kind.into(),
        }
    }

    pub fn setup(kind: impl Into<BatchErrorKind>) -> Self {
        Self::new(BatchStage::Setup, None, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn message_names_stage_and_last_bar() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap();
        let err = BatchError::new(BatchStage::Loading, Some(at), BatchErrorKind::EmptyBatch);
        let msg = err.to_string();
        assert!(msg.contains("during loading"), "{msg}");
        assert!(msg.contains("2024-01-01T05:00:00+00:00"), "{msg}");

        let err = BatchError::setup(BatchErrorKind::EmptyBatch);
        assert!(err.to_string().contains("last completed bar: none"));
    }
}
