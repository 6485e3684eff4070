//! Progress reporting and run control for a batch in flight.
//!
//! A [`BatchHandle`] is a cheap clone shared between the controller and the
//! outside world (scheduler, CLI, tests). Cancellation is a flag polled once
//! per bar. Pausing parks the controller thread on a condvar until `resume`
//! or `cancel` is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Pending,
    Running,
    Paused,
    Finished,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub state: RunState,
    pub total_bars: u64,
    pub completed_bars: u64,
    /// Open time of the last bar fully processed.
    pub last_bar: Option<DateTime<Utc>>,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bars == 0 {
            return 0.0;
        }
        (self.completed_bars as f64 / self.total_bars as f64).min(1.0)
    }
}

#[derive(Debug, Default)]
struct PauseState {
    paused: bool,
    pause_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Shared {
    cancel: AtomicBool,
    pause: Mutex<PauseState>,
    resumed: Condvar,
    progress: Mutex<BatchProgress>,
    subscribers: Mutex<Vec<Sender<BatchProgress>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
pub struct BatchHandle {
    shared: Arc<Shared>,
}

impl BatchHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect before the next bar.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        let _guard = lock(&self.shared.pause);
        self.shared.resumed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    /// Pause before the next bar.
    pub fn pause(&self) {
        lock(&self.shared.pause).paused = true;
    }

    /// Pause before the bar opening at `at` (or the first bar after it).
    pub fn pause_at(&self, at: DateTime<Utc>) {
        lock(&self.shared.pause).pause_at = Some(at);
    }

    pub fn resume(&self) {
        let mut state = lock(&self.shared.pause);
        state.paused = false;
        self.shared.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.shared.pause).paused
    }

    pub fn progress(&self) -> BatchProgress {
        *lock(&self.shared.progress)
    }

    /// Receive every published progress update from now on.
    pub fn subscribe(&self) -> Receiver<BatchProgress> {
        let (tx, rx) = mpsc::channel();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    // ── Controller side ──

    pub(crate) fn publish(&self, progress: BatchProgress) {
        *lock(&self.shared.progress) = progress;
        lock(&self.shared.subscribers).retain(|tx| tx.send(progress).is_ok());
    }

    /// Block while paused. Arms a pending `pause_at` once `t` reaches it.
    /// `on_pause` runs once, before parking. Returns `false` if the batch
    /// was cancelled.
    pub(crate) fn checkpoint(&self, t: DateTime<Utc>, on_pause: impl FnOnce()) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let mut state = lock(&self.shared.pause);
        if state.pause_at.is_some_and(|at| t >= at) {
            state.pause_at = None;
            state.paused = true;
        }
        if state.paused {
            drop(state);
            on_pause();
            state = lock(&self.shared.pause);
            while state.paused && !self.is_cancelled() {
                state = self
                    .shared
                    .resumed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        !self.is_cancelled()
    }
}
