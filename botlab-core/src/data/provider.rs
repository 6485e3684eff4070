//! Stream and resolver traits plus structured data errors.
//!
//! The historical-data subsystem sits behind these two traits so the engine can
//! run against files, generated data or in-memory fixtures alike.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Bar, Observation};
use crate::input::InputIdentity;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("no data stream for '{key}'")]
    StreamNotFound { key: String },

    #[error("I/O error reading '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in '{key}': {reason}")]
    Parse { key: String, reason: String },

    /// Raised by a retrieval layer that gave up waiting on its source.
    #[error("retrieval of '{key}' stalled")]
    Stalled { key: String },

    #[error("data error: {0}")]
    Other(String),
}

/// Bars for one market, fetched by time range.
pub trait InputStream<P>: Send + Sync {
    /// Observations with `start <= time < end`, ordered by time.
    ///
    /// Blocking; the loader calls it off the simulation thread.
    fn preload_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Observation<Bar<P>>>, DataError>;
}

/// Maps a bound identity to the stream that serves it.
pub trait StreamResolver<P>: Send + Sync {
    fn resolve(&self, identity: &InputIdentity) -> Result<Arc<dyn InputStream<P>>, DataError>;
}
