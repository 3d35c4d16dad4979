// Weft AFA - Augmented finite automaton model and compiler
//
// This crate implements the pattern side of the Weft engine:
// - Arc model: the four transition behaviors an automaton edge can carry
// - Afa: the mutable builder holding states, arcs and defaults
// - Pattern algebra: concat, or, Kleene star/plus, zero-or-one
// - CompiledAfa: the immutable, array-indexed form used for dispatch
// - Pattern: the fluent DSL that pattern authors use
//
// Execution lives in the weft-engine crate; this crate has no runtime
// state of its own.

mod algebra;
mod arc;
mod builder;
mod compiled;
mod pattern;

pub use algebra::{concat, kleene_plus, kleene_star, or, or_concat, zero_or_one};
pub use arc::{
    Accumulate, ArcKind, Dispose, Initialize, ListFence, ListTransfer, MultiFence, MultiTransfer,
    SingleFence, SingleTransfer, SkipToEnd, TransitionArc,
};
pub use builder::Afa;
pub use compiled::{CompiledAfa, CompiledListArc, CompiledMultiArc, CompiledSingleArc};
pub use pattern::Pattern;

use thiserror::Error;

/// Errors that can occur while building or compiling an automaton
#[derive(Debug, Error)]
pub enum AfaError {
    #[error("automaton is already sealed; arcs and final states are frozen")]
    AlreadySealed,

    #[error("automaton must be sealed before compilation")]
    NotSealed,

    #[error("invalid automaton: {0}")]
    InvalidAutomaton(String),
}

/// Result type for automaton operations
pub type AfaResult<T> = Result<T, AfaError>;
