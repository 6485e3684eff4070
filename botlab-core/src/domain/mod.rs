//! Domain types for botlab

pub mod bar;
pub mod ids;
pub mod precision;
pub mod timeframe;

pub use bar::{Bar, Observation};
pub use ids::{PositionId, TransactionId};
pub use precision::Precision;
pub use timeframe::{TimeFrame, TimeFrameError};

/// Symbol type alias
pub type Symbol = String;
