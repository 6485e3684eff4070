//! Input identities, consumer declarations and the aggregator that turns
//! them into one window per distinct identity.

pub mod aggregator;
pub mod identity;

pub use aggregator::{aggregate, AggregateError, Aggregation, Consumer};
pub use identity::{FieldKind, InputDecl, InputIdentity, MarketRef, ValueType};
