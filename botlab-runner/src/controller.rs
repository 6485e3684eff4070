//! Batch execution controller.
//!
//! Drives one batch from configuration to summaries:
//!
//! 1. Setup: validate the range, the account settings and the instances
//!    (batch timeframe, a single bot type, valid parameters).
//! 2. Aggregation: one account-listener consumer per instance plus each bot's
//!    declared inputs, deduplicated into a single window arena.
//! 3. Loading: resolve one stream per market, preload lookback tails, then
//!    walk the chunk plan, prefetching chunk N+1 while chunk N is stepped.
//! 4. Stepping: per bar, accounts first (stop-loss / take-profit, marks, risk
//!    limits) in creation order, then bots in creation order.
//! 5. Finalizing: liquidate or mark to market, summarize, write to the sink.
//!
//! The step loop is single-threaded and deterministic: two runs of the same
//! batch over the same data produce identical journals.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use botlab_core::account::{AccountConfig, OrderFlags, SimulatedAccount};
use botlab_core::bot::{BarContext, Bot, BotBlueprint, InstanceSpec};
use botlab_core::data::StreamResolver;
use botlab_core::domain::{Precision, TimeFrame};
use botlab_core::input::{aggregate, Consumer, FieldKind, InputDecl};
use botlab_core::loader::{ChunkPlan, LoaderError, RangeLoader};
use botlab_core::window::{WindowArena, WindowHandle};

use crate::config::{AccountSection, BatchConfig, BatchId, BatchSection, FinalizeMode};
use crate::error::{BatchError, BatchErrorKind, BatchStage};
use crate::progress::{BatchHandle, BatchProgress, RunState};
use crate::sink::BatchJournalSink;
use crate::summary::InstanceSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "P: Precision")]
pub struct BatchReport<P> {
    pub batch_id: BatchId,
    pub bars_processed: u64,
    pub windows_created: usize,
    pub inputs_declared: usize,
    pub summaries: Vec<InstanceSummary<P>>,
    pub wall_time: StdDuration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome<P> {
    Completed(BatchReport<P>),
    /// Stopped before the bar opening at `at`; no summaries were written.
    Cancelled { at: DateTime<Utc>, bars_processed: u64 },
}

impl<P> BatchOutcome<P> {
    pub fn report(&self) -> Option<&BatchReport<P>> {
        match self {
            BatchOutcome::Completed(report) => Some(report),
            BatchOutcome::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BatchOutcome::Cancelled { .. })
    }
}

/// One live instance: its bot, its account and the window the account listens to.
struct Running<P> {
    spec: InstanceSpec,
    bot: Box<dyn Bot<P>>,
    account: SimulatedAccount<P>,
    listener: WindowHandle,
    /// Last listener bar seen; the instance steps only on a new bar.
    last_seen: Option<DateTime<Utc>>,
}

impl<P: Precision> Running<P> {
    /// Feed the newest listener bar to the account. Returns whether the
    /// instance's market produced a bar on this step.
    fn step_account(&mut self, t: DateTime<Utc>, arena: &WindowArena<P>) -> bool {
        let Some(window) = arena.bars(self.listener) else {
            return false;
        };
        let (Some(stamp), Some(bar)) = (window.last_timestamp(), window.latest()) else {
            return false;
        };
        if self.last_seen == Some(stamp) {
            return false;
        }
        self.last_seen = Some(stamp);
        self.account.on_bar(t, &self.spec.market.symbol, bar, window.latest_is_filler());
        true
    }
}

pub struct BatchController<'r, P> {
    batch_id: BatchId,
    settings: BatchSection,
    account: AccountSection,
    instances: Vec<InstanceSpec>,
    resolver: &'r dyn StreamResolver<P>,
    sink: Option<Arc<dyn BatchJournalSink<P>>>,
    handle: BatchHandle,
}

impl<'r, P: Precision> BatchController<'r, P> {
    pub fn new(config: &BatchConfig, instances: Vec<InstanceSpec>, resolver: &'r dyn StreamResolver<P>) -> Self {
        Self {
            batch_id: config.batch_id(),
            settings: config.batch.clone(),
            account: config.account.clone(),
            instances,
            resolver,
            sink: None,
            handle: BatchHandle::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn BatchJournalSink<P>>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Control surface for this batch; clone it before calling `run`.
    pub fn handle(&self) -> BatchHandle {
        self.handle.clone()
    }

    /// Run the batch to completion or cancellation on the calling thread.
    pub fn run(self) -> Result<BatchOutcome<P>, BatchError> {
        let handle = self.handle.clone();
        let result = self.execute();
        if result.is_err() {
            let mut progress = handle.progress();
            progress.state = RunState::Failed;
            handle.publish(progress);
        }
        result
    }

    fn execute(self) -> Result<BatchOutcome<P>, BatchError> {
        let started = Instant::now();
        let s = &self.settings;
        let span = s.timeframe.span();

        // ── Setup ──
        let account_config = self.validate()?;
        let total_bars = s.timeframe.bars_between(s.start, s.end).unwrap_or(0).max(0) as u64;
        info!(
            batch_id = %self.batch_id,
            instances = self.instances.len(),
            start = %s.start,
            end = %s.end,
            timeframe = %s.timeframe,
            precision = P::NAME,
            bars = total_bars,
            "batch starting"
        );

        // ── Aggregation ──
        let n = self.instances.len();
        let consumers: Vec<Consumer> = self
            .instances
            .iter()
            .map(|i| Consumer::new(i.market.clone(), vec![InputDecl::own(FieldKind::Ohlcv, 1)]))
            .chain(
                self.instances
                    .iter()
                    .map(|i| Consumer::new(i.market.clone(), BotBlueprint::<P>::inputs(&i.params))),
            )
            .collect();
        let agg = aggregate::<P>(&consumers, s.timeframe, s.gap_fill)
            .map_err(|e| BatchError::new(BatchStage::Aggregation, None, e))?;
        let windows_created = agg.arena.len();
        let inputs_declared = agg.declared;
        info!(windows = windows_created, declared = inputs_declared, "inputs aggregated");

        let (listeners, bot_bindings) = agg.bindings.split_at(n);
        let mut running: Vec<Running<P>> = Vec::with_capacity(n);
        for ((spec, listener), handles) in self.instances.iter().zip(listeners).zip(bot_bindings) {
            let bot = BotBlueprint::<P>::build(&spec.params, handles).map_err(|source| {
                BatchError::new(
                    BatchStage::Aggregation,
                    None,
                    BatchErrorKind::Bot {
                        instance: spec.name.clone(),
                        source,
                    },
                )
            })?;
            running.push(Running {
                spec: spec.clone(),
                bot,
                account: SimulatedAccount::new(account_config.clone(), s.start),
                listener: listener[0],
                last_seen: None,
            });
        }
        let mut arena = agg.arena;

        // ── Loading ──
        let mut loader = RangeLoader::new(&arena, s.timeframe, self.resolver).map_err(BatchError::setup)?;
        let plan = ChunkPlan::new(s.start, s.end, s.timeframe, s.chunk).map_err(BatchError::setup)?;
        let loading = |last: Option<DateTime<Utc>>| move |e: LoaderError| BatchError::new(BatchStage::Loading, last, e);

        loader.preload_tail(s.start, &mut arena).map_err(loading(None))?;
        for r in &mut running {
            r.last_seen = arena.bars(r.listener).and_then(|w| w.last_timestamp());
        }
        debug!(feeds = loader.feed_count(), chunks = plan.len(), "streams resolved");

        let mut progress = BatchProgress {
            state: RunState::Running,
            total_bars,
            completed_bars: 0,
            last_bar: None,
        };
        self.handle.publish(progress);

        // ── Stepping ──
        let mut chunks = plan.cursor();
        let mut pending = chunks
            .next()
            .map(|c| loader.begin_prefetch(c))
            .transpose()
            .map_err(loading(None))?;

        while let Some(preload) = pending.take() {
            let chunk = loader.await_prefetch(preload).map_err(loading(progress.last_bar))?;
            pending = chunks
                .next()
                .map(|c| loader.begin_prefetch(c))
                .transpose()
                .map_err(loading(progress.last_bar))?;
            debug!(start = %chunk.start, end = %chunk.end, long = chunk.is_long, "entering chunk");

            let mut t = chunk.start;
            while t < chunk.end {
                let mut paused = false;
                let on_pause = || {
                    paused = true;
                    self.handle.publish(BatchProgress {
                        state: RunState::Paused,
                        ..progress
                    });
                    info!(at = %t, "batch paused");
                };
                if !self.handle.checkpoint(t, on_pause) {
                    info!(at = %t, bars = progress.completed_bars, "batch cancelled");
                    self.handle.publish(BatchProgress {
                        state: RunState::Cancelled,
                        ..progress
                    });
                    return Ok(BatchOutcome::Cancelled {
                        at: t,
                        bars_processed: progress.completed_bars,
                    });
                }
                if paused {
                    info!(at = %t, "batch resumed");
                    self.handle.publish(progress);
                }

                loader.advance(t, &mut arena).map_err(loading(progress.last_bar))?;

                let mut fresh = Vec::with_capacity(running.len());
                for r in &mut running {
                    fresh.push(r.step_account(t, &arena));
                }
                for (r, fresh) in running.iter_mut().zip(fresh) {
                    if !fresh || r.account.is_aborted() {
                        continue;
                    }
                    let mut ctx = BarContext {
                        time: t,
                        market: &r.spec.market,
                        arena: &arena,
                        account: &mut r.account,
                    };
                    r.bot.on_bar(&mut ctx).map_err(|source| {
                        BatchError::new(
                            BatchStage::Stepping,
                            progress.last_bar,
                            BatchErrorKind::Bot {
                                instance: r.spec.name.clone(),
                                source,
                            },
                        )
                    })?;
                }

                progress.completed_bars += 1;
                progress.last_bar = Some(t);
                if progress.completed_bars % s.progress_every.max(1) == 0 {
                    self.handle.publish(progress);
                }
                t += span;
            }
        }

        // ── Finalizing ──
        let mut summaries = Vec::with_capacity(running.len());
        for r in &mut running {
            if s.finalize == FinalizeMode::Liquidate && !r.account.is_aborted() {
                r.account.close_all(OrderFlags::NONE);
            }
            let summary = InstanceSummary::from_account(&self.batch_id, &r.spec, &r.account, s.start, s.end);
            if let Some(sink) = &self.sink {
                sink.write_summary(&summary)
                    .map_err(|e| BatchError::new(BatchStage::Finalizing, progress.last_bar, e))?;
            }
            summaries.push(summary);
        }

        progress.state = RunState::Finished;
        self.handle.publish(progress);
        let wall_time = started.elapsed();
        info!(
            batch_id = %self.batch_id,
            bars = progress.completed_bars,
            instances = summaries.len(),
            aborted = summaries.iter().filter(|s| s.aborted).count(),
            elapsed_ms = wall_time.as_millis() as u64,
            "batch complete"
        );

        Ok(BatchOutcome::Completed(BatchReport {
            batch_id: self.batch_id.clone(),
            bars_processed: progress.completed_bars,
            windows_created,
            inputs_declared,
            summaries,
            wall_time,
        }))
    }

    fn validate(&self) -> Result<AccountConfig<P>, BatchError> {
        let s = &self.settings;
        if s.start >= s.end {
            return Err(BatchError::setup(BatchErrorKind::ZeroDuration {
                start: s.start,
                end: s.end,
            }));
        }
        validate_instances::<P>(s.timeframe, &self.instances)?;
        self.account.to_account_config::<P>().map_err(BatchError::setup)
    }
}

/// Setup checks on the instance list: it is non-empty, every instance runs
/// on the batch timeframe, all instances share one bot type, and every bot
/// accepts its parameters.
pub fn validate_instances<P: Precision>(timeframe: TimeFrame, instances: &[InstanceSpec]) -> Result<(), BatchError> {
    let Some(first) = instances.first() else {
        return Err(BatchError::setup(BatchErrorKind::EmptyBatch));
    };
    let expected = first.params.kind();
    for spec in instances {
        if spec.market.timeframe != timeframe {
            return Err(BatchError::setup(BatchErrorKind::InstanceTimeFrame {
                instance: spec.name.clone(),
                instance_timeframe: spec.market.timeframe,
                batch_timeframe: timeframe,
            }));
        }
        let found = spec.params.kind();
        if found != expected {
            return Err(BatchError::setup(BatchErrorKind::MixedBotTypes {
                expected,
                found,
                instance: spec.name.clone(),
            }));
        }
        BotBlueprint::<P>::validate(&spec.params).map_err(|source| {
            BatchError::setup(BatchErrorKind::Bot {
                instance: spec.name.clone(),
                source,
            })
        })?;
    }
    Ok(())
}
