// Afa builder
//
// Mutable automaton graph. States are plain integers in [0, max_state];
// all per-state data lives in the transition map, so no state object is
// allocated. At most one arc exists between any ordered pair of states;
// re-adding replaces. Seal() freezes the graph for compilation.

use crate::arc::TransitionArc;
use crate::{AfaError, AfaResult};
use ahash::AHashMap;

/// Mutable builder for an augmented finite automaton
///
/// Type parameters: `P` event payload, `R` register threaded through a
/// match, `A` accumulator used by multi-event arcs.
pub struct Afa<P, R, A = ()> {
    start_state: usize,
    final_states: Vec<usize>,
    transitions: AHashMap<usize, AHashMap<usize, TransitionArc<P, R, A>>>,
    max_state: usize,
    default_register: R,
    default_accumulator: A,
    allow_overlapping_instances: bool,
    is_deterministic: bool,
    sealed: bool,
}

impl<P, R: Default, A: Default> Afa<P, R, A> {
    /// Create an empty automaton with default register and accumulator
    pub fn new() -> Self {
        Self::with_defaults(R::default(), A::default())
    }
}

impl<P, R: Default, A: Default> Default for Afa<P, R, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R, A> Afa<P, R, A> {
    /// Create an empty automaton with explicit default register and
    /// accumulator values
    pub fn with_defaults(default_register: R, default_accumulator: A) -> Self {
        Self {
            start_state: 0,
            final_states: Vec::new(),
            transitions: AHashMap::new(),
            max_state: 0,
            default_register,
            default_accumulator,
            allow_overlapping_instances: true,
            is_deterministic: false,
            sealed: false,
        }
    }

    /// Add an arc between two states, replacing any existing arc on the
    /// same ordered pair. Extends the state high-water mark. Fails once
    /// the automaton is sealed.
    pub fn add_arc(
        &mut self,
        from: usize,
        to: usize,
        arc: TransitionArc<P, R, A>,
    ) -> AfaResult<()> {
        if self.sealed {
            return Err(AfaError::AlreadySealed);
        }
        self.max_state = self.max_state.max(from).max(to);
        self.transitions.entry(from).or_default().insert(to, arc);
        Ok(())
    }

    /// Add a state to the final set (idempotent)
    pub fn add_final_state(&mut self, state: usize) -> AfaResult<()> {
        if self.sealed {
            return Err(AfaError::AlreadySealed);
        }
        self.max_state = self.max_state.max(state);
        if !self.final_states.contains(&state) {
            self.final_states.push(state);
        }
        Ok(())
    }

    /// Remove a state from the final set (idempotent)
    pub fn remove_final_state(&mut self, state: usize) -> AfaResult<()> {
        if self.sealed {
            return Err(AfaError::AlreadySealed);
        }
        self.final_states.retain(|&s| s != state);
        Ok(())
    }

    /// Set the start state
    pub fn set_start_state(&mut self, state: usize) -> AfaResult<()> {
        if self.sealed {
            return Err(AfaError::AlreadySealed);
        }
        self.max_state = self.max_state.max(state);
        self.start_state = state;
        Ok(())
    }

    /// Seal the automaton: default the final set to `{max_state}` if it
    /// is still empty, then freeze the graph. Idempotent.
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }
        if self.final_states.is_empty() {
            self.final_states.push(self.max_state);
        }
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn start_state(&self) -> usize {
        self.start_state
    }

    pub fn max_state(&self) -> usize {
        self.max_state
    }

    pub fn final_states(&self) -> &[usize] {
        &self.final_states
    }

    pub fn is_final_state(&self, state: usize) -> bool {
        self.final_states.contains(&state)
    }

    /// Whether a state has at least one outgoing arc of any kind
    pub fn has_outgoing_arcs(&self, state: usize) -> bool {
        self.transitions
            .get(&state)
            .is_some_and(|arcs| !arcs.is_empty())
    }

    /// The arc on an ordered state pair, if present
    pub fn arc(&self, from: usize, to: usize) -> Option<&TransitionArc<P, R, A>> {
        self.transitions.get(&from).and_then(|arcs| arcs.get(&to))
    }

    /// All arcs as `(from, to, arc)`, sorted by `(from, to)` so that
    /// traversal order is stable
    pub fn arcs(&self) -> Vec<(usize, usize, &TransitionArc<P, R, A>)> {
        let mut arcs: Vec<_> = self
            .transitions
            .iter()
            .flat_map(|(&from, targets)| targets.iter().map(move |(&to, arc)| (from, to, arc)))
            .collect();
        arcs.sort_by_key(|&(from, to, _)| (from, to));
        arcs
    }

    /// Remove the arc on an ordered state pair, if present
    pub(crate) fn remove_arc(&mut self, from: usize, to: usize) -> Option<TransitionArc<P, R, A>> {
        self.transitions.get_mut(&from)?.remove(&to)
    }

    pub(crate) fn clear_final_states(&mut self) {
        self.final_states.clear();
    }

    /// Final states, applying the seal-time default (`{max_state}`) when
    /// the explicit set is still empty. The algebra operators use this so
    /// that unsealed operands compose the same way sealed ones would.
    pub(crate) fn effective_final_states(&self) -> Vec<usize> {
        if self.final_states.is_empty() {
            vec![self.max_state]
        } else {
            self.final_states.clone()
        }
    }

    pub fn default_register(&self) -> &R {
        &self.default_register
    }

    pub fn default_accumulator(&self) -> &A {
        &self.default_accumulator
    }

    /// Replace the default register value threaded into fresh matches
    pub fn set_default_register(&mut self, register: R) {
        self.default_register = register;
    }

    /// Replace the default accumulator value
    pub fn set_default_accumulator(&mut self, accumulator: A) {
        self.default_accumulator = accumulator;
    }

    pub fn allow_overlapping_instances(&self) -> bool {
        self.allow_overlapping_instances
    }

    pub fn set_allow_overlapping_instances(&mut self, allow: bool) {
        self.allow_overlapping_instances = allow;
    }

    /// Determinism hint; compilation may upgrade this from the structure
    pub fn is_deterministic(&self) -> bool {
        self.is_deterministic
    }

    pub fn set_deterministic(&mut self, deterministic: bool) {
        self.is_deterministic = deterministic;
    }

    /// Copy of this automaton with the sealed flag cleared, used by the
    /// algebra operators which never mutate their operands
    pub(crate) fn unsealed_clone(&self) -> Self
    where
        R: Clone,
        A: Clone,
    {
        let mut copy = self.clone();
        copy.sealed = false;
        copy
    }
}

impl<P, R: Clone, A: Clone> Clone for Afa<P, R, A> {
    fn clone(&self) -> Self {
        Self {
            start_state: self.start_state,
            final_states: self.final_states.clone(),
            transitions: self.transitions.clone(),
            max_state: self.max_state,
            default_register: self.default_register.clone(),
            default_accumulator: self.default_accumulator.clone(),
            allow_overlapping_instances: self.allow_overlapping_instances,
            is_deterministic: self.is_deterministic,
            sealed: self.sealed,
        }
    }
}

impl<P, R, A> std::fmt::Debug for Afa<P, R, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Afa")
            .field("start_state", &self.start_state)
            .field("final_states", &self.final_states)
            .field("max_state", &self.max_state)
            .field("arcs", &self.arcs().len())
            .field("sealed", &self.sealed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn true_arc() -> TransitionArc<i64, i64, ()> {
        TransitionArc::single(|_, _, _| true)
    }

    #[test]
    fn test_add_arc_extends_max_state() {
        let mut afa: Afa<i64, i64> = Afa::new();
        afa.add_arc(0, 1, true_arc()).unwrap();
        assert_eq!(afa.max_state(), 1);

        afa.add_arc(1, 5, true_arc()).unwrap();
        assert_eq!(afa.max_state(), 5);
    }

    #[test]
    fn test_add_arc_replaces_existing() {
        let mut afa: Afa<i64, i64> = Afa::new();
        afa.add_arc(0, 1, true_arc()).unwrap();
        afa.add_arc(0, 1, TransitionArc::epsilon()).unwrap();

        assert_eq!(afa.arcs().len(), 1);
        assert_eq!(
            afa.arc(0, 1).unwrap().kind(),
            crate::arc::ArcKind::Epsilon
        );
    }

    #[test]
    fn test_seal_defaults_final_states() {
        let mut afa: Afa<i64, i64> = Afa::new();
        afa.add_arc(0, 1, true_arc()).unwrap();
        afa.add_arc(1, 2, true_arc()).unwrap();
        afa.seal();

        assert_eq!(afa.final_states(), &[2]);
    }

    #[test]
    fn test_seal_keeps_explicit_final_states() {
        let mut afa: Afa<i64, i64> = Afa::new();
        afa.add_arc(0, 1, true_arc()).unwrap();
        afa.add_arc(1, 2, true_arc()).unwrap();
        afa.add_final_state(1).unwrap();
        afa.seal();

        assert_eq!(afa.final_states(), &[1]);
    }

    #[test]
    fn test_add_arc_after_seal_fails() {
        let mut afa: Afa<i64, i64> = Afa::new();
        afa.add_arc(0, 1, true_arc()).unwrap();
        afa.seal();

        let result = afa.add_arc(1, 2, true_arc());
        assert!(matches!(result, Err(AfaError::AlreadySealed)));
    }

    #[test]
    fn test_final_state_ops_idempotent() {
        let mut afa: Afa<i64, i64> = Afa::new();
        afa.add_final_state(3).unwrap();
        afa.add_final_state(3).unwrap();
        assert_eq!(afa.final_states(), &[3]);

        afa.remove_final_state(3).unwrap();
        afa.remove_final_state(3).unwrap();
        assert!(afa.final_states().is_empty());
    }

    #[test]
    fn test_clone_independence() {
        let mut original: Afa<i64, i64> = Afa::new();
        original.add_arc(0, 1, true_arc()).unwrap();
        original.add_final_state(1).unwrap();

        let mut copy = original.clone();
        copy.add_arc(1, 2, true_arc()).unwrap();
        copy.remove_final_state(1).unwrap();

        assert_eq!(original.arcs().len(), 1);
        assert_eq!(original.final_states(), &[1]);
        assert_eq!(copy.arcs().len(), 2);
    }

    #[test]
    fn test_clone_copies_defaults() {
        // Both the default register and the default accumulator survive a
        // clone; see DESIGN.md for the decision record.
        let mut afa: Afa<i64, i64, i64> = Afa::with_defaults(7, 11);
        afa.add_arc(0, 1, TransitionArc::single(|_, _, _| true))
            .unwrap();

        let copy = afa.clone();
        assert_eq!(*copy.default_register(), 7);
        assert_eq!(*copy.default_accumulator(), 11);
    }
}
