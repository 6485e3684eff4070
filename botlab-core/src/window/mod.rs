//! Sliding input windows and the arena that owns them.

pub mod arena;
pub mod sliding;

pub use arena::{GapFill, WindowArena, WindowHandle, WindowSlot};
pub use sliding::{GapPolicy, SlidingWindow, WindowError};
