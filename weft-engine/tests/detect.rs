// End-to-end detection tests through the public detect() surface.

use weft_afa::Pattern;
use weft_engine::{
    detect, DetectConfig, DetectEngine, DropReason, PatternEngine, StreamProperties,
};
use weft_event::{OutputRow, StreamEvent, SyncTime};

type Engine = DetectEngine<u32, i64, i64>;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn build(pattern: Pattern<i64, i64>, config: DetectConfig) -> Engine {
    init_logging();
    detect(pattern, config, StreamProperties::simultaneity_free()).unwrap()
}

/// Feed (ts, key, payload) triples and return every completed match.
fn run(engine: &mut Engine, events: &[(SyncTime, u32, i64)]) -> Vec<OutputRow<u32, i64>> {
    let mut rows = Vec::new();
    for &(ts, key, payload) in events {
        engine.process_event(ts, key, payload);
        for mut batch in engine.take_output() {
            rows.extend(batch.drain_rows());
        }
    }
    for mut batch in engine.finish() {
        rows.extend(batch.drain_rows());
    }
    rows
}

fn always() -> Pattern<i64, i64> {
    Pattern::single_element(|_, _, _| true)
}

fn eq(value: i64) -> Pattern<i64, i64> {
    Pattern::single_element(move |_, p, _| *p == value)
}

#[test]
fn single_element_matches_every_event() {
    let mut engine = build(always(), DetectConfig::new(10));
    let out = run(&mut engine, &[(1, 7, 0), (2, 7, 0), (3, 7, 0)]);

    assert_eq!(out.len(), 3);
    for (row, expected_start) in out.iter().zip([1, 2, 3]) {
        assert_eq!(row.start_time, expected_start);
        assert_eq!(row.end_time, expected_start + 10);
        assert_eq!(row.key, 7);
    }
}

#[test]
fn sequence_requires_both_elements() {
    let pattern = Pattern::concat(vec![eq(1), eq(2)]).unwrap();
    let mut engine = build(pattern, DetectConfig::new(100));
    let out = run(&mut engine, &[(1, 7, 1), (2, 7, 2)]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].start_time, 1);

    let pattern = Pattern::concat(vec![eq(1), eq(2)]).unwrap();
    let mut engine = build(pattern, DetectConfig::new(100));
    let out = run(&mut engine, &[(1, 7, 1)]);
    assert!(out.is_empty());
}

#[test]
fn overlapping_instances_complete_independently() {
    let pattern = Pattern::concat(vec![always(), always()]).unwrap();
    let mut engine = build(pattern, DetectConfig::new(100));
    let out = run(&mut engine, &[(1, 7, 0), (2, 7, 0), (3, 7, 0)]);

    // Starts at 1, 2 and 3; the first two complete.
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].start_time, 1);
    assert_eq!(out[1].start_time, 2);
}

#[test]
fn disallowed_overlap_suppresses_second_start() {
    let pattern = Pattern::concat(vec![always(), always()]).unwrap();
    let mut engine = build(
        pattern,
        DetectConfig::new(100).with_allow_overlapping(false),
    );
    let out = run(&mut engine, &[(1, 7, 0), (2, 7, 0), (3, 7, 0), (4, 7, 0)]);

    // The instance started at 1 completes at 2; no new start at 2 because
    // a match advanced there. The next start waits until 3.
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].start_time, 1);
    assert_eq!(out[1].start_time, 3);
}

#[test]
fn expiry_boundary_is_strict() {
    let pattern = Pattern::concat(vec![eq(1), eq(2)]).unwrap();
    let mut engine = build(pattern, DetectConfig::new(5));
    // start(0) + 5 <= 5: no match even though the event satisfies it.
    let out = run(&mut engine, &[(0, 7, 1), (5, 7, 2)]);
    assert!(out.is_empty());

    let pattern = Pattern::concat(vec![eq(1), eq(2)]).unwrap();
    let mut engine = build(pattern, DetectConfig::new(5));
    let out = run(&mut engine, &[(0, 7, 1), (4, 7, 2)]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].end_time, 5);
}

#[test]
fn deterministic_engine_keeps_one_active_match() {
    let pattern = Pattern::concat(vec![always(), always(), always()]).unwrap();
    let mut engine = build(
        pattern,
        DetectConfig::new(100).with_allow_overlapping(false),
    );
    let events: Vec<(SyncTime, u32, i64)> = (1..=9).map(|ts| (ts, 7, 0)).collect();
    let out = run(&mut engine, &events);

    assert!(!out.is_empty());
    assert_eq!(engine.metrics().summary().peak_active_matches, 1);
}

#[test]
fn kleene_star_is_idempotent() {
    let starred = always().kleene_star().unwrap();
    let double_starred = always().kleene_star().unwrap().kleene_star().unwrap();
    let events: Vec<(SyncTime, u32, i64)> = (1..=4).map(|ts| (ts, 7, 0)).collect();

    let mut once = build(starred, DetectConfig::new(10));
    let mut twice = build(double_starred, DetectConfig::new(10));

    assert_eq!(run(&mut once, &events), run(&mut twice, &events));
}

#[test]
fn union_of_identical_branches_matches_once() {
    let pattern = Pattern::or(vec![eq(1), eq(1)]).unwrap();
    let mut engine = build(pattern, DetectConfig::new(10));
    let out = run(&mut engine, &[(1, 7, 1), (2, 7, 1)]);

    assert_eq!(out.len(), 2);
    assert!(engine.metrics().summary().outputs_deduped >= 2);
}

#[test]
fn simultaneous_duplicates_roll_back_the_step() {
    let mut engine: Engine = detect(
        always(),
        DetectConfig::new(10),
        StreamProperties::default(),
    )
    .unwrap();

    engine.process_event(1, 7, 0);
    engine.process_event(1, 7, 0);
    engine.process_event(2, 8, 0);

    let mut rows = Vec::new();
    for mut batch in engine.finish() {
        rows.extend(batch.drain_rows());
    }
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, 8);
    assert_eq!(
        engine.metrics().drop_count(DropReason::DuplicateRollback),
        1
    );
}

#[test]
fn data_event_at_punctuation_timestamp_completes_the_match() {
    let pattern = Pattern::concat(vec![eq(1), eq(2)]).unwrap();
    let mut engine: Engine = detect(
        pattern,
        DetectConfig::new(100),
        StreamProperties::default(),
    )
    .unwrap();

    engine.process_event(1, 7, 1);
    engine.punctuate(2, None);
    // The punctuation only promises nothing *earlier* than 2 arrives;
    // an event at exactly 2 is still valid input.
    engine.process_event(2, 7, 2);

    let mut rows = Vec::new();
    for mut batch in engine.finish() {
        rows.extend(batch.drain_rows());
    }
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].start_time, 1);
    assert_eq!(
        engine.metrics().drop_count(DropReason::DuplicateRollback),
        0
    );
}

#[test]
fn low_watermark_timestamp_accepts_a_fresh_start() {
    let mut engine: Engine = detect(
        always(),
        DetectConfig::new(10),
        StreamProperties::default(),
    )
    .unwrap();

    engine.process_event(1, 7, 0);
    engine.low_watermark(2);
    engine.process_event(2, 7, 0);

    let mut rows = Vec::new();
    for mut batch in engine.finish() {
        rows.extend(batch.drain_rows());
    }
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].start_time, 2);
}

#[test]
fn grouping_keys_are_independent() {
    let pattern = Pattern::concat(vec![eq(1), eq(2)]).unwrap();
    let mut engine = build(pattern, DetectConfig::new(100));
    // Key 1 sees the full sequence; key 2 only the prefix.
    let out = run(&mut engine, &[(1, 1, 1), (2, 2, 1), (3, 1, 2), (4, 2, 3)]);

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].key, 1);
    assert_eq!(out[0].start_time, 1);
}

#[test]
fn register_accumulates_across_the_match() {
    let add = || Pattern::single_element_transfer(|_, _, _| true, |_, p: &i64, r: &i64| r + p);
    let pattern = Pattern::concat(vec![add(), add(), add()]).unwrap();
    let mut engine = build(pattern, DetectConfig::new(100).with_allow_overlapping(false));
    let out = run(&mut engine, &[(1, 7, 10), (2, 7, 30), (3, 7, 2)]);

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].register, 42);
}

#[test]
fn zero_or_one_accepts_presence() {
    let pattern = eq(1).zero_or_one().unwrap();
    let mut engine = build(pattern, DetectConfig::new(10));
    let out = run(&mut engine, &[(1, 7, 1), (2, 7, 9)]);

    // The optional element matched once; the non-matching event neither
    // matches nor errors.
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].start_time, 1);
}

#[test]
fn kleene_plus_needs_at_least_one() {
    let pattern = eq(1).kleene_plus().unwrap();
    let mut engine = build(pattern, DetectConfig::new(100));
    let out = run(&mut engine, &[(1, 7, 9)]);
    assert!(out.is_empty());

    let pattern = eq(1).kleene_plus().unwrap();
    let mut engine = build(pattern, DetectConfig::new(100).with_allow_overlapping(false));
    let out = run(&mut engine, &[(1, 7, 1), (2, 7, 1)]);
    // One emission per completed iteration of the same instance.
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].start_time, 1);
    assert_eq!(out[1].start_time, 1);
}

#[test]
fn per_key_cap_limits_growth() {
    let pattern = always().kleene_star().unwrap();
    let mut engine = build(
        pattern,
        DetectConfig::new(1000).with_max_active_matches_per_key(3),
    );
    let events: Vec<(SyncTime, u32, i64)> = (1..=20).map(|ts| (ts, 7, 0)).collect();
    run(&mut engine, &events);

    let metrics = engine.metrics();
    assert!(metrics.summary().peak_active_matches <= 3);
    assert!(metrics.drop_count(DropReason::Capped) > 0);
}

#[test]
fn stream_events_feed_the_engine() {
    let mut engine = build(always(), DetectConfig::new(10));
    engine.process(StreamEvent::new(1, 7, 0));
    engine.process(StreamEvent::new(2, 7, 0));

    let mut rows = Vec::new();
    for mut batch in engine.finish() {
        rows.extend(batch.drain_rows());
    }
    assert_eq!(rows.len(), 2);
}

#[test]
fn low_watermark_flushes_without_data() {
    let mut engine: Engine = detect(
        always(),
        DetectConfig::new(10).with_max_batch_size(1),
        StreamProperties::default(),
    )
    .unwrap();

    engine.process_event(1, 7, 0);
    assert!(engine.take_output().is_empty());

    engine.low_watermark(2);
    // The tentative output committed and filled the single-row batch.
    assert_eq!(engine.take_output().len(), 1);
}
