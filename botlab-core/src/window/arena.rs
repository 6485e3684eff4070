//! Single-owner storage for every window of a batch.
//!
//! Consumers never hold a window directly. They receive a [`WindowHandle`]
//! (an index) at setup and read through `&WindowArena` during `on_bar`; only
//! the range loader holds the arena mutably.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Precision};
use crate::input::{FieldKind, InputIdentity, ValueType};

use super::{GapPolicy, SlidingWindow, WindowError};

/// Index of a window inside its [`WindowArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub usize);

/// Gap handling for one window, independent of the value type. The batch
/// setting is the default; an input declaration may override it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFill {
    Strict,
    /// Zero-valued filler bars.
    Sentinel,
    #[default]
    CarryForward,
}

impl GapFill {
    fn policy<T>(self, sentinel: T) -> GapPolicy<T> {
        match self {
            GapFill::Strict => GapPolicy::Strict,
            GapFill::Sentinel => GapPolicy::Sentinel(sentinel),
            GapFill::CarryForward => GapPolicy::CarryForward,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WindowSlot<P> {
    Bars(SlidingWindow<Bar<P>>),
    Values(SlidingWindow<P>),
}

impl<P: Precision> WindowSlot<P> {
    pub fn len(&self) -> usize {
        match self {
            WindowSlot::Bars(w) => w.len(),
            WindowSlot::Values(w) => w.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        match self {
            WindowSlot::Bars(w) => w.capacity(),
            WindowSlot::Values(w) => w.capacity(),
        }
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            WindowSlot::Bars(w) => w.last_timestamp(),
            WindowSlot::Values(w) => w.last_timestamp(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowArena<P> {
    slots: Vec<WindowSlot<P>>,
    identities: Vec<InputIdentity>,
    fills: Vec<GapFill>,
}

impl<P: Precision> WindowArena<P> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            identities: Vec::new(),
            fills: Vec::new(),
        }
    }

    /// Allocate a window for `identity` and return its handle.
    pub fn allocate(&mut self, identity: InputIdentity, capacity: usize, gap: GapFill) -> WindowHandle {
        let tf = identity.timeframe;
        let slot = match identity.value_type() {
            ValueType::Bar => WindowSlot::Bars(SlidingWindow::new(capacity, tf, gap.policy(Bar::sentinel()))),
            ValueType::Scalar => WindowSlot::Values(SlidingWindow::new(capacity, tf, gap.policy(P::zero()))),
        };
        self.slots.push(slot);
        self.identities.push(identity);
        self.fills.push(gap);
        WindowHandle(self.slots.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = WindowHandle> {
        (0..self.slots.len()).map(WindowHandle)
    }

    pub fn identity(&self, handle: WindowHandle) -> Option<&InputIdentity> {
        self.identities.get(handle.0)
    }

    pub fn gap_fill(&self, handle: WindowHandle) -> Option<GapFill> {
        self.fills.get(handle.0).copied()
    }

    pub fn slot(&self, handle: WindowHandle) -> Option<&WindowSlot<P>> {
        self.slots.get(handle.0)
    }

    /// Bar window behind `handle`, `None` for scalar windows or unknown handles.
    pub fn bars(&self, handle: WindowHandle) -> Option<&SlidingWindow<Bar<P>>> {
        match self.slots.get(handle.0)? {
            WindowSlot::Bars(w) => Some(w),
            WindowSlot::Values(_) => None,
        }
    }

    /// Scalar window behind `handle`, `None` for bar windows or unknown handles.
    pub fn values(&self, handle: WindowHandle) -> Option<&SlidingWindow<P>> {
        match self.slots.get(handle.0)? {
            WindowSlot::Values(w) => Some(w),
            WindowSlot::Bars(_) => None,
        }
    }

    /// Push one raw bar, extracting the field the window was declared for.
    pub fn push(&mut self, handle: WindowHandle, time: DateTime<Utc>, bar: &Bar<P>) -> Result<(), WindowError> {
        let field = self.identities[handle.0].field;
        match &mut self.slots[handle.0] {
            WindowSlot::Bars(w) => w.push(*bar, time),
            WindowSlot::Values(w) => w.push(field.extract(bar), time),
        }
    }

    pub fn push_missing(&mut self, handle: WindowHandle, time: DateTime<Utc>) -> Result<(), WindowError> {
        match &mut self.slots[handle.0] {
            WindowSlot::Bars(w) => w.push_missing(time),
            WindowSlot::Values(w) => w.push_missing(time),
        }
    }
}

impl FieldKind {
    /// Scalar value of this field; `Ohlcv` yields the close.
    pub fn extract<P: Precision>(self, bar: &Bar<P>) -> P {
        match self {
            FieldKind::Open => bar.open,
            FieldKind::High => bar.high,
            FieldKind::Low => bar.low,
            FieldKind::Close | FieldKind::Ohlcv => bar.close,
            FieldKind::Volume => bar.volume,
        }
    }
}
