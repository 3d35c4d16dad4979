// Pattern algebra
//
// Pure composition operators over automaton builders. Operands are never
// mutated; every operator returns a fresh, unsealed automaton that
// inherits defaults and flags from its first operand.
//
// Renumbering rule: when an operand B is spliced into a result whose
// current maximum state is old_max, state s of B maps to s + old_max + 1,
// except where s is explicitly identified with an attach state of the
// result (concat identifies B's start with the prior final or its bridge).

use crate::arc::TransitionArc;
use crate::builder::Afa;
use crate::{AfaError, AfaResult};

/// Splice a renumbered copy of `operand` into `result`, identifying the
/// operand's start state with `attach`. Returns the operand's final
/// states mapped into the result's numbering.
fn splice<P, R, A>(
    result: &mut Afa<P, R, A>,
    operand: &Afa<P, R, A>,
    attach: usize,
) -> AfaResult<Vec<usize>> {
    let old_max = result.max_state();
    let start = operand.start_state();
    let remap = |s: usize| if s == start { attach } else { s + old_max + 1 };

    for (from, to, arc) in operand.arcs() {
        result.add_arc(remap(from), remap(to), arc.clone())?;
    }
    Ok(operand
        .effective_final_states()
        .iter()
        .map(|&f| remap(f))
        .collect())
}

fn concat_impl<P, R: Clone, A: Clone>(
    parts: &[&Afa<P, R, A>],
    keep_prefix_finals: bool,
) -> AfaResult<Afa<P, R, A>> {
    let (first, rest) = parts
        .split_first()
        .ok_or_else(|| AfaError::InvalidAutomaton("concat requires an operand".into()))?;

    let mut result = first.unsealed_clone();
    for part in rest {
        let prior_finals = result.effective_final_states();
        result.clear_final_states();
        if keep_prefix_finals {
            for &f in &prior_finals {
                result.add_final_state(f)?;
            }
        }

        for &f in &prior_finals {
            // A final state that already has outgoing arcs keeps its
            // semantics; the next operand starts from a fresh epsilon
            // bridge instead.
            let attach = if result.has_outgoing_arcs(f) {
                let bridge = result.max_state() + 1;
                result.add_arc(f, bridge, TransitionArc::epsilon())?;
                if keep_prefix_finals {
                    result.add_final_state(bridge)?;
                }
                bridge
            } else {
                f
            };

            for new_final in splice(&mut result, part, attach)? {
                result.add_final_state(new_final)?;
            }
        }
    }
    Ok(result)
}

/// Sequential composition: the result accepts A then B (then ...)
pub fn concat<P, R: Clone, A: Clone>(parts: &[&Afa<P, R, A>]) -> AfaResult<Afa<P, R, A>> {
    concat_impl(parts, false)
}

/// Sequential composition that also accepts every prefix: intermediate
/// final states (and their bridges) stay final
pub fn or_concat<P, R: Clone, A: Clone>(parts: &[&Afa<P, R, A>]) -> AfaResult<Afa<P, R, A>> {
    concat_impl(parts, true)
}

/// Union: a fresh global start state with an epsilon arc into a
/// renumbered copy of each operand
pub fn or<P, R: Clone, A: Clone>(parts: &[&Afa<P, R, A>]) -> AfaResult<Afa<P, R, A>> {
    let first = parts
        .first()
        .ok_or_else(|| AfaError::InvalidAutomaton("or requires an operand".into()))?;

    let mut result: Afa<P, R, A> = Afa::with_defaults(
        first.default_register().clone(),
        first.default_accumulator().clone(),
    );
    result.set_allow_overlapping_instances(first.allow_overlapping_instances());
    result.set_deterministic(first.is_deterministic());

    for part in parts {
        let old_max = result.max_state();
        let remap = |s: usize| s + old_max + 1;

        result.add_arc(0, remap(part.start_state()), TransitionArc::epsilon())?;
        for (from, to, arc) in part.arcs() {
            result.add_arc(remap(from), remap(to), arc.clone())?;
        }
        for &f in &part.effective_final_states() {
            result.add_final_state(remap(f))?;
        }
    }
    Ok(result)
}

/// Kleene star: every arc into a final state is redirected to the start
/// state, and the start state becomes the sole final state (accepting
/// zero iterations)
pub fn kleene_star<P, R: Clone, A: Clone>(a: &Afa<P, R, A>) -> AfaResult<Afa<P, R, A>> {
    let mut result = a.unsealed_clone();
    let finals = result.effective_final_states();
    let start = result.start_state();

    let redirect: Vec<(usize, usize)> = result
        .arcs()
        .iter()
        .filter(|&&(_, to, _)| finals.contains(&to) && to != start)
        .map(|&(from, to, _)| (from, to))
        .collect();

    for (from, to) in redirect {
        if let Some(arc) = result.remove_arc(from, to) {
            result.add_arc(from, start, arc)?;
        }
    }

    result.clear_final_states();
    result.add_final_state(start)?;
    Ok(result)
}

/// Kleene plus: one or more iterations, `concat(A, kleene_star(A))`
pub fn kleene_plus<P, R: Clone, A: Clone>(a: &Afa<P, R, A>) -> AfaResult<Afa<P, R, A>> {
    let star = kleene_star(a)?;
    concat(&[a, &star])
}

/// Zero-or-one: the operand's start state joins the final set
pub fn zero_or_one<P, R: Clone, A: Clone>(a: &Afa<P, R, A>) -> AfaResult<Afa<P, R, A>> {
    let mut result = a.unsealed_clone();
    let finals = result.effective_final_states();
    result.clear_final_states();
    for f in finals {
        result.add_final_state(f)?;
    }
    result.add_final_state(result.start_state())?;
    Ok(result)
}
