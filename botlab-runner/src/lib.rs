//! botlab runner: batch orchestration around the core engine.
//!
//! This crate contains:
//! - TOML batch configuration and parameter grids
//! - Reference stream resolvers (CSV directory, synthetic bars)
//! - The batch execution controller and its control handle
//! - Per-instance summaries and the sinks that persist them

pub mod config;
pub mod controller;
pub mod error;
pub mod progress;
pub mod resolvers;
pub mod sink;
pub mod summary;

pub use config::{BatchConfig, BatchId, ConfigError, FinalizeMode, PrecisionKind};
pub use controller::{validate_instances, BatchController, BatchOutcome, BatchReport};
pub use error::{BatchError, BatchErrorKind, BatchStage};
pub use progress::{BatchHandle, BatchProgress, RunState};
pub use resolvers::{CsvResolver, SyntheticResolver};
pub use sink::{BatchJournalSink, CsvJournalSink, FanoutSink, JsonlSink, MemorySink, SinkError};
pub use summary::InstanceSummary;
