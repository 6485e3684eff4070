//! Input aggregation: one window per distinct identity.
//!
//! Every consumer (strategy instance or account listener) declares its inputs
//! against its own market. The aggregator binds them, keeps the maximum
//! lookback per identity key and allocates the arena in first-seen order, so
//! two batches built from the same consumers get identical arena layouts.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::domain::{Precision, TimeFrame};
use crate::window::{GapFill, WindowArena, WindowHandle};

use super::{InputDecl, InputIdentity, MarketRef};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("input '{key}' declared with zero lookback")]
    ZeroLookback { key: String },

    #[error("input '{key}' uses timeframe {input}, which is not a whole multiple of the batch timeframe {batch}")]
    TimeFrameMismatch {
        key: String,
        input: TimeFrame,
        batch: TimeFrame,
    },

    #[error("input '{key}' has no symbol after binding")]
    UnboundSymbol { key: String },

    #[error("input '{key}' declared with conflicting gap handling: {first:?} and {second:?}")]
    GapConflict {
        key: String,
        first: GapFill,
        second: GapFill,
    },
}

/// One party that reads windows.
#[derive(Debug, Clone)]
pub struct Consumer {
    pub market: MarketRef,
    pub decls: Vec<InputDecl>,
}

impl Consumer {
    pub fn new(market: MarketRef, decls: Vec<InputDecl>) -> Self {
        Self { market, decls }
    }
}

#[derive(Debug)]
pub struct Aggregation<P> {
    pub arena: WindowArena<P>,
    /// Per consumer, one handle per declaration, in declaration order.
    pub bindings: Vec<Vec<WindowHandle>>,
    /// Total declarations across all consumers.
    pub declared: usize,
}

/// One distinct identity while aggregating.
struct Pending {
    identity: InputIdentity,
    lookback: usize,
    gap: Option<GapFill>,
}

/// Bind, deduplicate and allocate. `gap` applies to every window whose
/// declarations do not choose their own gap handling.
pub fn aggregate<P: Precision>(
    consumers: &[Consumer],
    batch_timeframe: TimeFrame,
    gap: GapFill,
) -> Result<Aggregation<P>, AggregateError> {
    let mut order: Vec<Pending> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();
    let mut slots_per_consumer: Vec<Vec<usize>> = Vec::with_capacity(consumers.len());
    let mut declared = 0;

    for consumer in consumers {
        let mut slots = Vec::with_capacity(consumer.decls.len());
        for decl in &consumer.decls {
            let identity = decl.bind(&consumer.market);
            let key = identity.key();
            if decl.lookback == 0 {
                return Err(AggregateError::ZeroLookback { key });
            }
            if identity.symbol.is_empty() {
                return Err(AggregateError::UnboundSymbol { key });
            }
            if !batch_timeframe.divides(&identity.timeframe) {
                return Err(AggregateError::TimeFrameMismatch {
                    key,
                    input: identity.timeframe,
                    batch: batch_timeframe,
                });
            }

            let idx = match index_by_key.get(&key) {
                Some(&idx) => {
                    let entry = &mut order[idx];
                    entry.lookback = entry.lookback.max(decl.lookback);
                    match (entry.gap, decl.gap) {
                        (Some(first), Some(second)) if first != second => {
                            return Err(AggregateError::GapConflict { key, first, second });
                        }
                        (None, Some(chosen)) => entry.gap = Some(chosen),
                        _ => {}
                    }
                    idx
                }
                None => {
                    order.push(Pending {
                        identity,
                        lookback: decl.lookback,
                        gap: decl.gap,
                    });
                    index_by_key.insert(key, order.len() - 1);
                    order.len() - 1
                }
            };
            slots.push(idx);
            declared += 1;
        }
        slots_per_consumer.push(slots);
    }

    let mut arena = WindowArena::new();
    let handles: Vec<WindowHandle> = order
        .into_iter()
        .map(|p| {
            let fill = p.gap.unwrap_or(gap);
            debug!(input = %p.identity, lookback = p.lookback, gap = ?fill, "allocating window");
            arena.allocate(p.identity, p.lookback, fill)
        })
        .collect();

    let bindings = slots_per_consumer
        .into_iter()
        .map(|slots| slots.into_iter().map(|i| handles[i]).collect())
        .collect();

    Ok(Aggregation {
        arena,
        bindings,
        declared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::FieldKind;

    fn market(symbol: &str) -> MarketRef {
        MarketRef::new("sim", "spot", symbol, TimeFrame::HOUR)
    }

    #[test]
    fn shared_identity_gets_one_window_with_max_lookback() {
        let consumers = vec![
            Consumer::new(market("BTC"), vec![InputDecl::own(FieldKind::Close, 10)]),
            Consumer::new(market("BTC"), vec![InputDecl::own(FieldKind::Close, 20)]),
            Consumer::new(market("BTC"), vec![InputDecl::own(FieldKind::Close, 5)]),
        ];
        let agg = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::Strict).unwrap();

        assert_eq!(agg.arena.len(), 1);
        assert_eq!(agg.declared, 3);
        let h = agg.bindings[0][0];
        assert!(agg.bindings.iter().all(|b| b[0] == h));
        assert_eq!(agg.arena.values(h).unwrap().capacity(), 20);
    }

    #[test]
    fn distinct_fields_and_symbols_get_distinct_windows() {
        let consumers = vec![
            Consumer::new(
                market("BTC"),
                vec![
                    InputDecl::own(FieldKind::Close, 3),
                    InputDecl::own(FieldKind::Ohlcv, 1),
                    InputDecl::own(FieldKind::Close, 2).on_symbol("ETH"),
                ],
            ),
            Consumer::new(market("ETH"), vec![InputDecl::own(FieldKind::Close, 7)]),
        ];
        let agg = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::Strict).unwrap();

        assert_eq!(agg.arena.len(), 3);
        assert_eq!(agg.bindings[0].len(), 3);
        // ETH close declared by both consumers resolves to the same window.
        assert_eq!(agg.bindings[0][2], agg.bindings[1][0]);
        assert_eq!(agg.arena.values(agg.bindings[1][0]).unwrap().capacity(), 7);
    }

    #[test]
    fn zero_lookback_rejected() {
        let consumers = vec![Consumer::new(market("BTC"), vec![InputDecl::own(FieldKind::Close, 0)])];
        let err = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::Strict).unwrap_err();
        assert!(matches!(err, AggregateError::ZeroLookback { .. }));
    }

    #[test]
    fn non_multiple_timeframe_rejected() {
        let odd = TimeFrame::minutes(90).unwrap();
        let consumers = vec![Consumer::new(
            market("BTC"),
            vec![InputDecl::own(FieldKind::Close, 2).on_timeframe(odd)],
        )];
        let err = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::Strict).unwrap_err();
        assert!(matches!(err, AggregateError::TimeFrameMismatch { .. }));
    }

    #[test]
    fn coarser_multiple_accepted() {
        let consumers = vec![Consumer::new(
            market("BTC"),
            vec![InputDecl::own(FieldKind::Close, 2).on_timeframe(TimeFrame::DAY)],
        )];
        let agg = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::Strict).unwrap();
        let h = agg.bindings[0][0];
        assert_eq!(agg.arena.identity(h).unwrap().timeframe, TimeFrame::DAY);
    }

    #[test]
    fn declared_gap_overrides_the_batch_default() {
        let consumers = vec![
            Consumer::new(market("BTC"), vec![InputDecl::own(FieldKind::Close, 3)]),
            Consumer::new(
                market("BTC"),
                vec![InputDecl::own(FieldKind::Close, 2).with_gap(GapFill::Strict)],
            ),
            Consumer::new(market("ETH"), vec![InputDecl::own(FieldKind::Close, 2)]),
        ];
        let agg = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::CarryForward).unwrap();

        let btc = agg.bindings[0][0];
        let eth = agg.bindings[2][0];
        assert_eq!(agg.arena.gap_fill(btc), Some(GapFill::Strict));
        assert_eq!(agg.arena.gap_fill(eth), Some(GapFill::CarryForward));
    }

    #[test]
    fn conflicting_gap_choices_rejected() {
        let consumers = vec![
            Consumer::new(
                market("BTC"),
                vec![InputDecl::own(FieldKind::Close, 3).with_gap(GapFill::Strict)],
            ),
            Consumer::new(
                market("BTC"),
                vec![InputDecl::own(FieldKind::Close, 3).with_gap(GapFill::Sentinel)],
            ),
        ];
        let err = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::CarryForward).unwrap_err();
        assert_eq!(
            err,
            AggregateError::GapConflict {
                key: "sim:spot:BTC:1h:close".into(),
                first: GapFill::Strict,
                second: GapFill::Sentinel,
            }
        );
    }

    #[test]
    fn empty_symbol_rejected() {
        let consumers = vec![Consumer::new(market(""), vec![InputDecl::own(FieldKind::Close, 1)])];
        let err = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::Strict).unwrap_err();
        assert!(matches!(err, AggregateError::UnboundSymbol { .. }));
    }
}
