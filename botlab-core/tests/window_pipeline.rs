//! Aggregation → loading → windows, end to end over several chunks.

use chrono::{DateTime, Duration, TimeZone, Utc};

use botlab_core::data::MemoryResolver;
use botlab_core::domain::{Bar, Observation, TimeFrame};
use botlab_core::input::{aggregate, AggregateError, Consumer, FieldKind, InputDecl, MarketRef};
use botlab_core::loader::{ChunkGranularity, ChunkPlan, RangeLoader};
use botlab_core::window::GapFill;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

fn market(symbol: &str) -> MarketRef {
    MarketRef::new("sim", "spot", symbol, TimeFrame::HOUR)
}

fn series(from: i64, to: i64, base: f64, skip: &[i64]) -> Vec<Observation<Bar<f64>>> {
    (from..to)
        .filter(|i| !skip.contains(i))
        .map(|i| Observation::new(t0() + Duration::hours(i), Bar::flat(base + i as f64)))
        .collect()
}

#[test]
fn identical_declarations_share_one_window() {
    // GIVEN: three instances on BTC reading closes with lookbacks 5, 20, 12,
    //        and one ETH instance reading closes with lookback 3
    let consumers = vec![
        Consumer::new(market("BTC"), vec![InputDecl::own(FieldKind::Close, 5)]),
        Consumer::new(market("BTC"), vec![InputDecl::own(FieldKind::Close, 20)]),
        Consumer::new(
            market("BTC"),
            vec![InputDecl::own(FieldKind::Close, 12), InputDecl::own(FieldKind::Ohlcv, 2)],
        ),
        Consumer::new(market("ETH"), vec![InputDecl::own(FieldKind::Close, 3)]),
    ];

    // WHEN: aggregated
    let agg = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::Strict).unwrap();

    // THEN: one window per identity, sized to the largest lookback
    assert_eq!(agg.declared, 5);
    assert_eq!(agg.arena.len(), 3);
    let btc_close = agg.bindings[0][0];
    assert_eq!(agg.bindings[1][0], btc_close);
    assert_eq!(agg.bindings[2][0], btc_close);
    assert_eq!(agg.arena.slot(btc_close).unwrap().capacity(), 20);
    assert_ne!(agg.bindings[2][1], btc_close);
    assert_ne!(agg.bindings[3][0], btc_close);
}

#[test]
fn coarser_batch_timeframe_is_rejected() {
    let consumers = vec![Consumer::new(market("BTC"), vec![InputDecl::own(FieldKind::Close, 5)])];
    let err = aggregate::<f64>(&consumers, TimeFrame::DAY, GapFill::Strict).unwrap_err();
    assert!(matches!(err, AggregateError::TimeFrameMismatch { .. }));
}

#[test]
fn windows_track_the_clock_across_chunk_boundaries() {
    // GIVEN: two markets over three days with a hole in ETH
    let consumers = vec![
        Consumer::new(market("BTC"), vec![InputDecl::own(FieldKind::Close, 4)]),
        Consumer::new(market("ETH"), vec![InputDecl::own(FieldKind::Close, 4)]),
    ];
    let agg = aggregate::<f64>(&consumers, TimeFrame::HOUR, GapFill::CarryForward).unwrap();
    let resolver = MemoryResolver::new()
        .with_bars(&market("BTC"), series(-10, 72, 1_000.0, &[]))
        .with_bars(&market("ETH"), series(-10, 72, 100.0, &[30, 31]));
    let mut loader = RangeLoader::new(&agg.arena, TimeFrame::HOUR, &resolver).unwrap();
    let mut arena = agg.arena;
    let (btc, eth) = (agg.bindings[0][0], agg.bindings[1][0]);

    let end = t0() + Duration::hours(72);
    let plan = ChunkPlan::new(t0(), end, TimeFrame::HOUR, ChunkGranularity::Day).unwrap();
    assert_eq!(plan.len(), 3);
    loader.preload_tail(t0(), &mut arena).unwrap();
    assert_eq!(arena.values(btc).unwrap().as_slice(), &[996.0, 997.0, 998.0, 999.0]);

    // WHEN: stepping every bar, prefetching the next chunk while on the current one
    let mut cursor = plan.cursor();
    let mut pending = cursor.next().map(|c| loader.begin_prefetch(c).unwrap());
    let mut last_seen = None;
    while let Some(handle) = pending.take() {
        let chunk = loader.await_prefetch(handle).unwrap();
        pending = cursor.next().map(|c| loader.begin_prefetch(c).unwrap());

        let mut t = chunk.start;
        while t < chunk.end {
            loader.advance(t, &mut arena).unwrap();

            // THEN: every window's newest bar is the one that just completed
            let latest = arena.values(btc).unwrap().last_timestamp().unwrap();
            assert_eq!(latest, t);
            assert!(last_seen.map_or(true, |prev| prev < latest));
            last_seen = Some(latest);

            if t == t0() + Duration::hours(31) {
                let w = arena.values(eth).unwrap();
                assert_eq!(w.latest(), Some(&129.0), "hole carried forward");
                assert_eq!(w.is_filler(t0() + Duration::hours(30)), Some(true));
                assert_eq!(w.filler_count(), 2);
            }
            t += Duration::hours(1);
        }
    }

    let w = arena.values(eth).unwrap();
    assert_eq!(w.last_timestamp(), Some(t0() + Duration::hours(71)));
    assert_eq!(arena.values(btc).unwrap().as_slice(), &[1_068.0, 1_069.0, 1_070.0, 1_071.0]);
    assert_eq!(w.latest(), Some(&171.0));
    assert_eq!(w.filler_count(), 0);
}
