// Core step algorithm
//
// One logical step advances every active match under a key against the
// step's input, then starts fresh matches from the compiled start states.
// All engine variants share this code; they differ only in how the step
// input is assembled and where outputs are buffered.
//
// Expiry is strict: a match with `start + max_duration <= now` is dropped
// before any arc is evaluated, even if an arc would have fired at exactly
// the boundary.

use crate::metrics::{DropReason, EngineMetrics};
use smallvec::SmallVec;
use weft_afa::{CompiledAfa, CompiledMultiArc, CompiledSingleArc};
use weft_event::{match_end_time, SyncTime};

/// A partial match in flight
#[derive(Debug, Clone)]
pub(crate) struct ActiveMatch<R> {
    pub state: usize,
    pub register: R,
    pub start: SyncTime,
}

pub(crate) type ActiveList<R> = SmallVec<[ActiveMatch<R>; 4]>;

/// A completed match, not yet bound to its grouping key
#[derive(Debug, Clone)]
pub(crate) struct StepOutput<R> {
    pub start: SyncTime,
    pub end: SyncTime,
    pub register: R,
}

/// Step parameters fixed for the lifetime of an engine
#[derive(Debug, Clone)]
pub(crate) struct StepParams {
    pub max_duration: SyncTime,
    pub allow_overlapping: bool,
    pub max_active_per_key: Option<usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Phase {
    Advance,
    Start,
}

/// Run one logical step for one key: advance `actives` against `events`
/// at time `now`, then start new matches where the overlap policy allows.
/// Completed matches are appended to `outputs` with per-step dedup.
pub(crate) fn run_step<P, R, A>(
    afa: &CompiledAfa<P, R, A>,
    now: SyncTime,
    events: &[P],
    params: &StepParams,
    actives: &mut ActiveList<R>,
    metrics: &EngineMetrics,
    outputs: &mut Vec<StepOutput<R>>,
) where
    R: Clone + PartialEq,
{
    metrics.record_step();
    let deterministic = afa.is_deterministic();
    let prev = std::mem::take(actives);
    let mut ended = true;

    for active in prev {
        if match_end_time(active.start, params.max_duration) <= now {
            metrics.record_drop(DropReason::Expired);
            continue;
        }
        let fired = advance_one(
            afa,
            &active,
            now,
            events,
            params,
            deterministic,
            actives,
            metrics,
            outputs,
        );
        if fired {
            ended = false;
            // At most one concurrently active match in deterministic
            // mode; nothing left to advance.
            if deterministic {
                break;
            }
        } else {
            metrics.record_drop(DropReason::Died);
        }
    }

    if params.allow_overlapping || ended {
        for &s in afa.start_states() {
            let started = fire_arcs(
                afa,
                s,
                afa.default_register(),
                now,
                now,
                events,
                params,
                deterministic,
                Phase::Start,
                actives,
                metrics,
                outputs,
            );
            if deterministic && started {
                break;
            }
        }
    }

    metrics.observe_active(actives.len());
}

/// Expire actives without running arcs; used when punctuation advances
/// the clock with no accompanying data event.
pub(crate) fn expire_actives<R>(
    actives: &mut ActiveList<R>,
    now: SyncTime,
    max_duration: SyncTime,
    metrics: &EngineMetrics,
) {
    actives.retain(|m| {
        let keep = match_end_time(m.start, max_duration) > now;
        if !keep {
            metrics.record_drop(DropReason::Expired);
        }
        keep
    });
}

#[allow(clippy::too_many_arguments)]
fn advance_one<P, R, A>(
    afa: &CompiledAfa<P, R, A>,
    active: &ActiveMatch<R>,
    now: SyncTime,
    events: &[P],
    params: &StepParams,
    deterministic: bool,
    next: &mut ActiveList<R>,
    metrics: &EngineMetrics,
    outputs: &mut Vec<StepOutput<R>>,
) -> bool
where
    R: Clone + PartialEq,
{
    fire_arcs(
        afa,
        active.state,
        &active.register,
        active.start,
        now,
        events,
        params,
        deterministic,
        Phase::Advance,
        next,
        metrics,
        outputs,
    )
}

/// Evaluate every outgoing arc of `state` against the step input. Returns
/// whether at least one arc fired.
#[allow(clippy::too_many_arguments)]
fn fire_arcs<P, R, A>(
    afa: &CompiledAfa<P, R, A>,
    state: usize,
    register: &R,
    start: SyncTime,
    now: SyncTime,
    events: &[P],
    params: &StepParams,
    deterministic: bool,
    phase: Phase,
    next: &mut ActiveList<R>,
    metrics: &EngineMetrics,
    outputs: &mut Vec<StepOutput<R>>,
) -> bool
where
    R: Clone + PartialEq,
{
    let mut fired = false;

    // Single arcs consume one event; in a multi-event step each matching
    // event yields its own continuation.
    for arc in afa.single_arcs(state) {
        for event in events {
            if (arc.fence)(now, event, register) {
                let new_register = single_transfer(arc, now, event, register);
                follow(
                    afa, arc.to_state, new_register, start, params, phase, next, metrics,
                    outputs,
                );
                fired = true;
                if deterministic {
                    return true;
                }
            }
        }
    }

    for arc in afa.list_arcs(state) {
        if (arc.fence)(now, events, register) {
            let new_register = match &arc.transfer {
                Some(transfer) => transfer(now, events, register),
                None => register.clone(),
            };
            follow(
                afa, arc.to_state, new_register, start, params, phase, next, metrics, outputs,
            );
            fired = true;
            if deterministic {
                return true;
            }
        }
    }

    for arc in afa.multi_arcs(state) {
        if let Some(new_register) = eval_multi(arc, now, events, register) {
            follow(
                afa, arc.to_state, new_register, start, params, phase, next, metrics, outputs,
            );
            fired = true;
            if deterministic {
                return true;
            }
        }
    }

    fired
}

fn single_transfer<P, R: Clone>(
    arc: &CompiledSingleArc<P, R>,
    now: SyncTime,
    event: &P,
    register: &R,
) -> R {
    match &arc.transfer {
        Some(transfer) => transfer(now, event, register),
        None => register.clone(),
    }
}

/// Fold the step's events through a multi arc's accumulator and gate on
/// the result. The accumulator is disposed whether or not the fence holds.
fn eval_multi<P, R: Clone, A>(
    arc: &CompiledMultiArc<P, R, A>,
    now: SyncTime,
    events: &[P],
    register: &R,
) -> Option<R> {
    let mut accumulator = (arc.initialize)(now, register);
    for event in events {
        if let Some(skip) = &arc.skip_to_end {
            if skip(now, event, &accumulator) {
                break;
            }
        }
        accumulator = (arc.accumulate)(now, event, register, accumulator);
    }

    let passed = (arc.fence)(now, &accumulator, register);
    let result = if passed {
        Some(match &arc.transfer {
            Some(transfer) => transfer(now, &accumulator, register),
            None => register.clone(),
        })
    } else {
        None
    };
    if let Some(dispose) = &arc.dispose {
        dispose(accumulator);
    }
    result
}

/// Land on `to_state` and expand along its epsilon closure: emit at every
/// final state, keep an active match at every state with outgoing arcs.
#[allow(clippy::too_many_arguments)]
fn follow<P, R, A>(
    afa: &CompiledAfa<P, R, A>,
    to_state: usize,
    register: R,
    start: SyncTime,
    params: &StepParams,
    phase: Phase,
    next: &mut ActiveList<R>,
    metrics: &EngineMetrics,
    outputs: &mut Vec<StepOutput<R>>,
) where
    R: Clone + PartialEq,
{
    let end = match_end_time(start, params.max_duration);
    for &s in afa.epsilon_closure(to_state) {
        if afa.is_final(s) {
            push_output(outputs, start, end, register.clone(), metrics);
        }
        if afa.has_outgoing_arcs(s) {
            if phase == Phase::Start
                && params
                    .max_active_per_key
                    .is_some_and(|cap| next.len() >= cap)
            {
                metrics.record_drop(DropReason::Capped);
                continue;
            }
            next.push(ActiveMatch {
                state: s,
                register: register.clone(),
                start,
            });
            if phase == Phase::Start {
                metrics.match_started();
            }
        }
    }
}

/// Append an output, suppressing exact duplicates within the same step so
/// that structurally redundant automata (union of identical branches)
/// emit once per distinct completion.
fn push_output<R: PartialEq>(
    outputs: &mut Vec<StepOutput<R>>,
    start: SyncTime,
    end: SyncTime,
    register: R,
    metrics: &EngineMetrics,
) {
    if outputs
        .iter()
        .any(|o| o.start == start && o.end == end && o.register == register)
    {
        metrics.output_deduped();
        return;
    }
    outputs.push(StepOutput {
        start,
        end,
        register,
    });
    metrics.match_completed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_afa::Pattern;

    fn params(max_duration: SyncTime) -> StepParams {
        StepParams {
            max_duration,
            allow_overlapping: true,
            max_active_per_key: None,
        }
    }

    #[test]
    fn test_single_element_emits_per_step() {
        let afa = Pattern::<i64, i64>::single_element(|_, p, _| *p > 0)
            .compile()
            .unwrap();
        let metrics = EngineMetrics::new();
        let mut actives = ActiveList::new();
        let mut outputs = Vec::new();

        run_step(&afa, 5, &[7], &params(10), &mut actives, &metrics, &mut outputs);

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].start, 5);
        assert_eq!(outputs[0].end, 15);
        // Final state has no outgoing arcs, so nothing stays active.
        assert!(actives.is_empty());
    }

    #[test]
    fn test_sequence_advances_then_completes() {
        let afa = Pattern::<i64, i64>::concat(vec![
            Pattern::single_element(|_, p, _| *p == 1),
            Pattern::single_element(|_, p, _| *p == 2),
        ])
        .unwrap()
        .compile()
        .unwrap();
        let metrics = EngineMetrics::new();
        let mut actives = ActiveList::new();
        let mut outputs = Vec::new();
        let p = params(100);

        run_step(&afa, 10, &[1], &p, &mut actives, &metrics, &mut outputs);
        assert!(outputs.is_empty());
        assert_eq!(actives.len(), 1);

        run_step(&afa, 11, &[2], &p, &mut actives, &metrics, &mut outputs);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].start, 10);
        assert_eq!(outputs[0].end, 110);
    }

    #[test]
    fn test_expiry_is_strict_at_the_boundary() {
        let afa = Pattern::<i64, i64>::concat(vec![
            Pattern::single_element(|_, p, _| *p == 1),
            Pattern::single_element(|_, p, _| *p == 2),
        ])
        .unwrap()
        .compile()
        .unwrap();
        let metrics = EngineMetrics::new();
        let mut actives = ActiveList::new();
        let mut outputs = Vec::new();
        let p = params(5);

        run_step(&afa, 0, &[1], &p, &mut actives, &metrics, &mut outputs);
        assert_eq!(actives.len(), 1);

        // start(0) + max_duration(5) <= now(5): expired, no completion
        // even though the event satisfies the second fence.
        run_step(&afa, 5, &[2], &p, &mut actives, &metrics, &mut outputs);
        assert!(outputs.is_empty());
        assert_eq!(metrics.drop_count(DropReason::Expired), 1);
    }

    #[test]
    fn test_register_transfer_threads_through() {
        let afa = Pattern::<i64, i64>::concat(vec![
            Pattern::single_element_transfer(|_, _, _| true, |_, p, r| r + p),
            Pattern::single_element_transfer(|_, _, _| true, |_, p, r| r + p),
        ])
        .unwrap()
        .compile()
        .unwrap();
        let metrics = EngineMetrics::new();
        let mut actives = ActiveList::new();
        let mut outputs = Vec::new();
        let p = params(100);

        run_step(&afa, 1, &[10], &p, &mut actives, &metrics, &mut outputs);
        run_step(&afa, 2, &[32], &p, &mut actives, &metrics, &mut outputs);

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].register, 42);
    }

    #[test]
    fn test_union_of_identical_branches_emits_once() {
        let branch = || Pattern::<i64, i64>::single_element(|_, p, _| *p > 0);
        let afa = Pattern::or(vec![branch(), branch()])
            .unwrap()
            .compile()
            .unwrap();
        let metrics = EngineMetrics::new();
        let mut actives = ActiveList::new();
        let mut outputs = Vec::new();

        run_step(&afa, 1, &[5], &params(10), &mut actives, &metrics, &mut outputs);

        assert_eq!(outputs.len(), 1);
        assert_eq!(metrics.summary().outputs_deduped, 1);
    }

    #[test]
    fn test_no_start_when_overlap_disallowed_and_match_survived() {
        let afa = Pattern::<i64, i64>::concat(vec![
            Pattern::single_element(|_, _, _| true),
            Pattern::single_element(|_, _, _| true),
            Pattern::single_element(|_, _, _| true),
        ])
        .unwrap()
        .compile()
        .unwrap();
        let metrics = EngineMetrics::new();
        let mut actives = ActiveList::new();
        let mut outputs = Vec::new();
        let p = StepParams {
            max_duration: 100,
            allow_overlapping: false,
            max_active_per_key: None,
        };

        run_step(&afa, 1, &[0], &p, &mut actives, &metrics, &mut outputs);
        assert_eq!(actives.len(), 1);

        // The active match advanced, so no fresh start happens.
        run_step(&afa, 2, &[0], &p, &mut actives, &metrics, &mut outputs);
        assert_eq!(actives.len(), 1);
        assert_eq!(actives[0].start, 1);
    }

    #[test]
    fn test_multi_arc_folds_and_disposes() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;

        let disposed = Arc::new(AtomicU64::new(0));
        let disposed_probe = disposed.clone();
        let afa = Pattern::<i64, i64, i64>::element(
            weft_afa::TransitionArc::multi(
                |_, _| 0i64,
                |_, p, _, acc| acc + p,
                |_, acc, _| *acc > 10,
            )
            .with_multi_transfer(|_, acc, _| *acc)
            .with_dispose(move |_| {
                disposed_probe.fetch_add(1, Ordering::Relaxed);
            }),
        )
        .compile()
        .unwrap();
        let metrics = EngineMetrics::new();
        let mut actives = ActiveList::new();
        let mut outputs = Vec::new();

        run_step(&afa, 1, &[4, 9], &params(10), &mut actives, &metrics, &mut outputs);

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].register, 13);
        assert_eq!(disposed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_multi_arc_skip_to_end_stops_the_fold() {
        let afa = Pattern::<i64, i64, i64>::element(
            weft_afa::TransitionArc::multi(
                |_, _| 0i64,
                |_, p, _, acc| acc + p,
                |_, acc, _| *acc == 5,
            )
            .with_skip_to_end(|_, p, _| *p < 0)
            .with_multi_transfer(|_, acc, _| *acc),
        )
        .compile()
        .unwrap();
        let metrics = EngineMetrics::new();
        let mut actives = ActiveList::new();
        let mut outputs = Vec::new();

        // The fold stops at -1, so only 2 + 3 accumulate.
        run_step(
            &afa,
            1,
            &[2, 3, -1, 100],
            &params(10),
            &mut actives,
            &metrics,
            &mut outputs,
        );

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].register, 5);
    }

    #[test]
    fn test_per_key_cap_drops_newest_start() {
        // Star keeps every overlapping start alive, so actives grow by
        // one per step until the cap bites.
        let afa = Pattern::<i64, i64>::single_element(|_, _, _| true)
            .kleene_star()
            .unwrap()
            .compile()
            .unwrap();
        let metrics = EngineMetrics::new();
        let mut actives = ActiveList::new();
        let mut outputs = Vec::new();
        let p = StepParams {
            max_duration: 1000,
            allow_overlapping: true,
            max_active_per_key: Some(2),
        };

        for now in 0..5 {
            run_step(&afa, now, &[0], &p, &mut actives, &metrics, &mut outputs);
        }

        assert!(actives.len() <= 2);
        assert!(metrics.drop_count(DropReason::Capped) > 0);
    }
}
