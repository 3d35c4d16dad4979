// Compiled automaton
//
// Immutable, array-indexed form of a sealed builder, optimized for
// per-event dispatch: arcs are partitioned by kind into jagged per-state
// arrays, epsilon closures are precomputed (each state includes itself),
// and the set of start states is discovered by following epsilon arcs
// from the declared start.

use crate::arc::{
    Accumulate, ArcKind, Dispose, Initialize, ListFence, ListTransfer, MultiFence, MultiTransfer,
    SingleFence, SingleTransfer, SkipToEnd, TransitionArc,
};
use crate::builder::Afa;
use crate::{AfaError, AfaResult};
use smallvec::SmallVec;
use tracing::debug;

/// A compiled single-event arc
pub struct CompiledSingleArc<P, R> {
    pub to_state: usize,
    pub fence: SingleFence<P, R>,
    pub transfer: Option<SingleTransfer<P, R>>,
}

/// A compiled event-list arc
pub struct CompiledListArc<P, R> {
    pub to_state: usize,
    pub fence: ListFence<P, R>,
    pub transfer: Option<ListTransfer<P, R>>,
}

/// A compiled multi-event accumulating arc
pub struct CompiledMultiArc<P, R, A> {
    pub to_state: usize,
    pub initialize: Initialize<R, A>,
    pub accumulate: Accumulate<P, R, A>,
    pub skip_to_end: Option<SkipToEnd<P, A>>,
    pub fence: MultiFence<R, A>,
    pub transfer: Option<MultiTransfer<R, A>>,
    pub dispose: Option<Dispose<A>>,
}

/// Immutable compiled automaton
pub struct CompiledAfa<P, R, A = ()> {
    num_states: usize,
    is_final: Vec<bool>,
    has_outgoing: Vec<bool>,
    single_arcs: Vec<Vec<CompiledSingleArc<P, R>>>,
    list_arcs: Vec<Vec<CompiledListArc<P, R>>>,
    multi_arcs: Vec<Vec<CompiledMultiArc<P, R, A>>>,
    epsilon_closure: Vec<SmallVec<[usize; 4]>>,
    start_states: Vec<usize>,
    default_register: R,
    is_deterministic: bool,
    has_step_arcs: bool,
    num_epsilon_arcs: usize,
}

impl<P, R: Clone, A> CompiledAfa<P, R, A> {
    /// Compile a sealed builder. Fails on an unsealed builder and on a
    /// self-looping epsilon arc (which would make the closure infinite).
    pub fn compile(afa: &Afa<P, R, A>) -> AfaResult<Self> {
        if !afa.is_sealed() {
            return Err(AfaError::NotSealed);
        }

        let num_states = afa.max_state() + 1;
        let mut single_arcs: Vec<Vec<CompiledSingleArc<P, R>>> =
            (0..num_states).map(|_| Vec::new()).collect();
        let mut list_arcs: Vec<Vec<CompiledListArc<P, R>>> =
            (0..num_states).map(|_| Vec::new()).collect();
        let mut multi_arcs: Vec<Vec<CompiledMultiArc<P, R, A>>> =
            (0..num_states).map(|_| Vec::new()).collect();
        let mut epsilon_targets: Vec<SmallVec<[usize; 4]>> =
            (0..num_states).map(|_| SmallVec::new()).collect();
        let mut outgoing_counts = vec![0usize; num_states];
        let mut num_epsilon_arcs = 0usize;

        for (from, to, arc) in afa.arcs() {
            outgoing_counts[from] += 1;
            match arc {
                TransitionArc::Single { fence, transfer } => {
                    single_arcs[from].push(CompiledSingleArc {
                        to_state: to,
                        fence: fence.clone(),
                        transfer: transfer.clone(),
                    });
                }
                TransitionArc::List { fence, transfer } => {
                    list_arcs[from].push(CompiledListArc {
                        to_state: to,
                        fence: fence.clone(),
                        transfer: transfer.clone(),
                    });
                }
                TransitionArc::Multi {
                    initialize,
                    accumulate,
                    skip_to_end,
                    fence,
                    transfer,
                    dispose,
                } => {
                    multi_arcs[from].push(CompiledMultiArc {
                        to_state: to,
                        initialize: initialize.clone(),
                        accumulate: accumulate.clone(),
                        skip_to_end: skip_to_end.clone(),
                        fence: fence.clone(),
                        transfer: transfer.clone(),
                        dispose: dispose.clone(),
                    });
                }
                TransitionArc::Epsilon => {
                    if from == to {
                        return Err(AfaError::InvalidAutomaton(format!(
                            "state {from} has a self-looping epsilon arc"
                        )));
                    }
                    num_epsilon_arcs += 1;
                    epsilon_targets[from].push(to);
                }
            }
        }

        let is_final: Vec<bool> = (0..num_states).map(|s| afa.is_final_state(s)).collect();
        let has_outgoing: Vec<bool> = outgoing_counts.iter().map(|&c| c > 0).collect();

        // Epsilon closure per state, the state itself included.
        let mut epsilon_closure: Vec<SmallVec<[usize; 4]>> = Vec::with_capacity(num_states);
        for s in 0..num_states {
            let mut closure = SmallVec::new();
            closure_dfs(s, &epsilon_targets, &mut closure);
            epsilon_closure.push(closure);
        }

        // Start states: explicit-stack walk over epsilon arcs from the
        // declared start.
        let mut start_states = Vec::new();
        let mut stack = vec![afa.start_state()];
        while let Some(s) = stack.pop() {
            if start_states.contains(&s) {
                continue;
            }
            start_states.push(s);
            for &t in &epsilon_targets[s] {
                stack.push(t);
            }
        }

        // Structural determinism: at most one outgoing arc everywhere.
        // Overlapping instance starts defeat single-active-match
        // determinism even for a deterministic graph, so the flag drops
        // back to false in that case.
        let structurally_deterministic = outgoing_counts.iter().all(|&c| c <= 1);
        let is_deterministic = (afa.is_deterministic() || structurally_deterministic)
            && !afa.allow_overlapping_instances();

        let has_step_arcs = list_arcs.iter().any(|v| !v.is_empty())
            || multi_arcs.iter().any(|v| !v.is_empty());

        debug!(
            num_states,
            num_start_states = start_states.len(),
            is_deterministic,
            has_step_arcs,
            "compiled automaton"
        );

        Ok(Self {
            num_states,
            is_final,
            has_outgoing,
            single_arcs,
            list_arcs,
            multi_arcs,
            epsilon_closure,
            start_states,
            default_register: afa.default_register().clone(),
            is_deterministic,
            has_step_arcs,
            num_epsilon_arcs,
        })
    }
}

impl<P, R, A> CompiledAfa<P, R, A> {
    #[inline]
    pub fn num_states(&self) -> usize {
        self.num_states
    }

    #[inline]
    pub fn is_final(&self, state: usize) -> bool {
        self.is_final[state]
    }

    #[inline]
    pub fn has_outgoing_arcs(&self, state: usize) -> bool {
        self.has_outgoing[state]
    }

    #[inline]
    pub fn single_arcs(&self, state: usize) -> &[CompiledSingleArc<P, R>] {
        &self.single_arcs[state]
    }

    #[inline]
    pub fn list_arcs(&self, state: usize) -> &[CompiledListArc<P, R>] {
        &self.list_arcs[state]
    }

    #[inline]
    pub fn multi_arcs(&self, state: usize) -> &[CompiledMultiArc<P, R, A>] {
        &self.multi_arcs[state]
    }

    /// States reachable from `state` via zero or more epsilon arcs,
    /// `state` itself included
    #[inline]
    pub fn epsilon_closure(&self, state: usize) -> &[usize] {
        &self.epsilon_closure[state]
    }

    #[inline]
    pub fn start_states(&self) -> &[usize] {
        &self.start_states
    }

    #[inline]
    pub fn num_start_states(&self) -> usize {
        self.start_states.len()
    }

    #[inline]
    pub fn default_register(&self) -> &R {
        &self.default_register
    }

    #[inline]
    pub fn is_deterministic(&self) -> bool {
        self.is_deterministic
    }

    /// Whether any arc needs the per-timestamp event list (list or multi
    /// arcs present)
    #[inline]
    pub fn has_step_arcs(&self) -> bool {
        self.has_step_arcs
    }

    /// Count of arcs per kind, for diagnostics
    pub fn arc_count(&self, kind: ArcKind) -> usize {
        match kind {
            ArcKind::Single => self.single_arcs.iter().map(Vec::len).sum(),
            ArcKind::List => self.list_arcs.iter().map(Vec::len).sum(),
            ArcKind::Multi => self.multi_arcs.iter().map(Vec::len).sum(),
            ArcKind::Epsilon => self.num_epsilon_arcs,
        }
    }
}

fn closure_dfs(state: usize, targets: &[SmallVec<[usize; 4]>], out: &mut SmallVec<[usize; 4]>) {
    if out.contains(&state) {
        return;
    }
    out.push(state);
    for &t in &targets[state] {
        closure_dfs(t, targets, out);
    }
}
