// Pattern DSL
//
// Fluent layer that pattern authors use. Each constructor produces a
// two-state automaton for one element; combinators delegate to the
// pattern algebra. `compile()` seals and compiles in one call.

use crate::algebra;
use crate::arc::TransitionArc;
use crate::builder::Afa;
use crate::compiled::CompiledAfa;
use crate::AfaResult;
use weft_event::SyncTime;

/// A composable pattern over events of type `P`, threading a register of
/// type `R` (and an accumulator `A` for multi-event elements)
#[derive(Clone, Debug)]
pub struct Pattern<P, R = (), A = ()> {
    afa: Afa<P, R, A>,
}

impl<P, R: Default, A: Default> Pattern<P, R, A> {
    /// Pattern matching one element described by an arbitrary arc
    pub fn element(arc: TransitionArc<P, R, A>) -> Self {
        let mut afa = Afa::new();
        afa.add_arc(0, 1, arc).expect("fresh automaton is unsealed");
        afa.add_final_state(1).expect("fresh automaton is unsealed");
        Self { afa }
    }

    /// Single-event element gated by `fence`, register unchanged
    pub fn single_element(
        fence: impl Fn(SyncTime, &P, &R) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::element(TransitionArc::single(fence))
    }

    /// Single-event element with a register transfer
    pub fn single_element_transfer(
        fence: impl Fn(SyncTime, &P, &R) -> bool + Send + Sync + 'static,
        transfer: impl Fn(SyncTime, &P, &R) -> R + Send + Sync + 'static,
    ) -> Self {
        Self::element(TransitionArc::single_with_transfer(fence, transfer))
    }

    /// Event-list element gated over all events sharing a timestamp
    pub fn list_element(
        fence: impl Fn(SyncTime, &[P], &R) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::element(TransitionArc::list(fence))
    }

    /// Event-list element with a register transfer
    pub fn list_element_transfer(
        fence: impl Fn(SyncTime, &[P], &R) -> bool + Send + Sync + 'static,
        transfer: impl Fn(SyncTime, &[P], &R) -> R + Send + Sync + 'static,
    ) -> Self {
        Self::element(TransitionArc::list_with_transfer(fence, transfer))
    }

    /// Multi-event accumulating element; attach optional hooks by
    /// building the arc with [`TransitionArc::multi`] and passing it to
    /// [`Pattern::element`]
    pub fn multi_element(
        initialize: impl Fn(SyncTime, &R) -> A + Send + Sync + 'static,
        accumulate: impl Fn(SyncTime, &P, &R, A) -> A + Send + Sync + 'static,
        fence: impl Fn(SyncTime, &A, &R) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::element(TransitionArc::multi(initialize, accumulate, fence))
    }

    /// Structural epsilon element
    pub fn epsilon() -> Self {
        Self::element(TransitionArc::epsilon())
    }
}

impl<P, R: Clone, A: Clone> Pattern<P, R, A> {
    /// Sequential composition of `parts`
    pub fn concat(parts: Vec<Self>) -> AfaResult<Self> {
        let afas: Vec<&Afa<P, R, A>> = parts.iter().map(|p| &p.afa).collect();
        Ok(Self {
            afa: algebra::concat(&afas)?,
        })
    }

    /// Sequential composition that also accepts every prefix
    pub fn or_concat(parts: Vec<Self>) -> AfaResult<Self> {
        let afas: Vec<&Afa<P, R, A>> = parts.iter().map(|p| &p.afa).collect();
        Ok(Self {
            afa: algebra::or_concat(&afas)?,
        })
    }

    /// Union of `parts`
    pub fn or(parts: Vec<Self>) -> AfaResult<Self> {
        let afas: Vec<&Afa<P, R, A>> = parts.iter().map(|p| &p.afa).collect();
        Ok(Self {
            afa: algebra::or(&afas)?,
        })
    }

    /// This pattern followed by `next`
    pub fn followed_by(self, next: Self) -> AfaResult<Self> {
        Ok(Self {
            afa: algebra::concat(&[&self.afa, &next.afa])?,
        })
    }

    /// Zero or more repetitions
    pub fn kleene_star(self) -> AfaResult<Self> {
        Ok(Self {
            afa: algebra::kleene_star(&self.afa)?,
        })
    }

    /// One or more repetitions
    pub fn kleene_plus(self) -> AfaResult<Self> {
        Ok(Self {
            afa: algebra::kleene_plus(&self.afa)?,
        })
    }

    /// Zero or one occurrence
    pub fn zero_or_one(self) -> AfaResult<Self> {
        Ok(Self {
            afa: algebra::zero_or_one(&self.afa)?,
        })
    }

    /// Clone-then-mutate escape hatch: the mutator sees a fresh copy of
    /// the underlying automaton, so shared patterns are never affected
    pub fn edit(self, mutate: impl FnOnce(&mut Afa<P, R, A>)) -> Self {
        let mut afa = self.afa.clone();
        mutate(&mut afa);
        Self { afa }
    }

    /// Set the default register threaded into fresh matches
    pub fn set_register(mut self, register: R) -> Self {
        self.afa.set_default_register(register);
        self
    }

    /// Set the default accumulator
    pub fn set_accumulator(mut self, accumulator: A) -> Self {
        self.afa.set_default_accumulator(accumulator);
        self
    }

    /// Allow or disallow concurrently active overlapping matches
    pub fn allow_overlapping_instances(mut self, allow: bool) -> Self {
        self.afa.set_allow_overlapping_instances(allow);
        self
    }

    /// Hint that the automaton is deterministic; compilation may also
    /// infer this from the structure
    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.afa.set_deterministic(deterministic);
        self
    }

    /// Seal and compile this pattern
    pub fn compile(mut self) -> AfaResult<CompiledAfa<P, R, A>> {
        self.afa.seal();
        CompiledAfa::compile(&self.afa)
    }
}

impl<P, R, A> Pattern<P, R, A> {
    pub fn afa(&self) -> &Afa<P, R, A> {
        &self.afa
    }

    pub fn into_afa(self) -> Afa<P, R, A> {
        self.afa
    }
}

impl<P, R, A> From<Afa<P, R, A>> for Pattern<P, R, A> {
    fn from(afa: Afa<P, R, A>) -> Self {
        Self { afa }
    }
}
