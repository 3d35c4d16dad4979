// Arc model
//
// An arc is a directed edge between two automaton states carrying exactly
// one behavior variant. Behaviors are plain closures captured at build
// time and shared via Arc so that a builder clone is cheap.

use std::fmt;
use std::sync::Arc;
use weft_event::SyncTime;

/// Fence over a single event: `(ts, event, register) -> bool`
pub type SingleFence<P, R> = Arc<dyn Fn(SyncTime, &P, &R) -> bool + Send + Sync>;

/// Register transfer over a single event: `(ts, event, register) -> register'`
pub type SingleTransfer<P, R> = Arc<dyn Fn(SyncTime, &P, &R) -> R + Send + Sync>;

/// Fence over a synchronized list of concurrent events
pub type ListFence<P, R> = Arc<dyn Fn(SyncTime, &[P], &R) -> bool + Send + Sync>;

/// Register transfer over a synchronized list of concurrent events
pub type ListTransfer<P, R> = Arc<dyn Fn(SyncTime, &[P], &R) -> R + Send + Sync>;

/// Accumulator initializer: `(ts, register) -> accumulator`
pub type Initialize<R, A> = Arc<dyn Fn(SyncTime, &R) -> A + Send + Sync>;

/// Accumulator fold step: `(ts, event, register, accumulator) -> accumulator'`
pub type Accumulate<P, R, A> = Arc<dyn Fn(SyncTime, &P, &R, A) -> A + Send + Sync>;

/// Early-exit test during accumulation: `(ts, event, accumulator) -> bool`
pub type SkipToEnd<P, A> = Arc<dyn Fn(SyncTime, &P, &A) -> bool + Send + Sync>;

/// Fence over the final accumulator: `(ts, accumulator, register) -> bool`
pub type MultiFence<R, A> = Arc<dyn Fn(SyncTime, &A, &R) -> bool + Send + Sync>;

/// Register transfer over the final accumulator
pub type MultiTransfer<R, A> = Arc<dyn Fn(SyncTime, &A, &R) -> R + Send + Sync>;

/// Accumulator cleanup hook
pub type Dispose<A> = Arc<dyn Fn(A) + Send + Sync>;

/// Discriminant of a [`TransitionArc`], used when partitioning arcs at
/// compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArcKind {
    Single,
    List,
    Multi,
    Epsilon,
}

/// A transition behavior attached to an edge of the automaton
pub enum TransitionArc<P, R, A = ()> {
    /// Consumes one event; fires when `fence` holds
    Single {
        fence: SingleFence<P, R>,
        transfer: Option<SingleTransfer<P, R>>,
    },

    /// Consumes the full list of events sharing a timestamp
    List {
        fence: ListFence<P, R>,
        transfer: Option<ListTransfer<P, R>>,
    },

    /// Folds an accumulator over the events of one logical step, then
    /// gates on the final accumulator
    Multi {
        initialize: Initialize<R, A>,
        accumulate: Accumulate<P, R, A>,
        skip_to_end: Option<SkipToEnd<P, A>>,
        fence: MultiFence<R, A>,
        transfer: Option<MultiTransfer<R, A>>,
        dispose: Option<Dispose<A>>,
    },

    /// Unconditional, register-preserving structural transition
    Epsilon,
}

impl<P, R, A> TransitionArc<P, R, A> {
    /// Single-event arc with no register transfer
    pub fn single(fence: impl Fn(SyncTime, &P, &R) -> bool + Send + Sync + 'static) -> Self {
        Self::Single {
            fence: Arc::new(fence),
            transfer: None,
        }
    }

    /// Single-event arc with a register transfer
    pub fn single_with_transfer(
        fence: impl Fn(SyncTime, &P, &R) -> bool + Send + Sync + 'static,
        transfer: impl Fn(SyncTime, &P, &R) -> R + Send + Sync + 'static,
    ) -> Self {
        Self::Single {
            fence: Arc::new(fence),
            transfer: Some(Arc::new(transfer)),
        }
    }

    /// Event-list arc with no register transfer
    pub fn list(fence: impl Fn(SyncTime, &[P], &R) -> bool + Send + Sync + 'static) -> Self {
        Self::List {
            fence: Arc::new(fence),
            transfer: None,
        }
    }

    /// Event-list arc with a register transfer
    pub fn list_with_transfer(
        fence: impl Fn(SyncTime, &[P], &R) -> bool + Send + Sync + 'static,
        transfer: impl Fn(SyncTime, &[P], &R) -> R + Send + Sync + 'static,
    ) -> Self {
        Self::List {
            fence: Arc::new(fence),
            transfer: Some(Arc::new(transfer)),
        }
    }

    /// Multi-event accumulating arc; optional hooks are attached by
    /// chaining `with_multi_transfer`, `with_skip_to_end` and
    /// `with_dispose` on the returned value
    pub fn multi(
        initialize: impl Fn(SyncTime, &R) -> A + Send + Sync + 'static,
        accumulate: impl Fn(SyncTime, &P, &R, A) -> A + Send + Sync + 'static,
        fence: impl Fn(SyncTime, &A, &R) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Multi {
            initialize: Arc::new(initialize),
            accumulate: Arc::new(accumulate),
            skip_to_end: None,
            fence: Arc::new(fence),
            transfer: None,
            dispose: None,
        }
    }

    /// Epsilon arc
    pub fn epsilon() -> Self {
        Self::Epsilon
    }

    /// Attach a register transfer to a multi arc
    pub fn with_multi_transfer(
        mut self,
        transfer: impl Fn(SyncTime, &A, &R) -> R + Send + Sync + 'static,
    ) -> Self {
        if let Self::Multi {
            transfer: slot, ..
        } = &mut self
        {
            *slot = Some(Arc::new(transfer));
        }
        self
    }

    /// Attach an early-exit test to a multi arc
    pub fn with_skip_to_end(
        mut self,
        skip: impl Fn(SyncTime, &P, &A) -> bool + Send + Sync + 'static,
    ) -> Self {
        if let Self::Multi { skip_to_end, .. } = &mut self {
            *skip_to_end = Some(Arc::new(skip));
        }
        self
    }

    /// Attach a cleanup hook to a multi arc
    pub fn with_dispose(mut self, dispose: impl Fn(A) + Send + Sync + 'static) -> Self {
        if let Self::Multi { dispose: slot, .. } = &mut self {
            *slot = Some(Arc::new(dispose));
        }
        self
    }

    /// The kind tag of this arc
    pub fn kind(&self) -> ArcKind {
        match self {
            Self::Single { .. } => ArcKind::Single,
            Self::List { .. } => ArcKind::List,
            Self::Multi { .. } => ArcKind::Multi,
            Self::Epsilon => ArcKind::Epsilon,
        }
    }
}

impl<P, R, A> Clone for TransitionArc<P, R, A> {
    fn clone(&self) -> Self {
        match self {
            Self::Single { fence, transfer } => Self::Single {
                fence: Arc::clone(fence),
                transfer: transfer.clone(),
            },
            Self::List { fence, transfer } => Self::List {
                fence: Arc::clone(fence),
                transfer: transfer.clone(),
            },
            Self::Multi {
                initialize,
                accumulate,
                skip_to_end,
                fence,
                transfer,
                dispose,
            } => Self::Multi {
                initialize: Arc::clone(initialize),
                accumulate: Arc::clone(accumulate),
                skip_to_end: skip_to_end.clone(),
                fence: Arc::clone(fence),
                transfer: transfer.clone(),
                dispose: dispose.clone(),
            },
            Self::Epsilon => Self::Epsilon,
        }
    }
}

impl<P, R, A> fmt::Debug for TransitionArc<P, R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransitionArc::{:?}", self.kind())
    }
}
