//! Data boundary: where windows get their raw bars from.

pub mod memory;
pub mod provider;

pub use memory::{MemoryResolver, MemoryStream};
pub use provider::{DataError, InputStream, StreamResolver};
