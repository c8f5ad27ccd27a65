#![forbid(unsafe_code)]

//! Single-threaded pending results.
//!
//! A [`Pending`] is a shareable handle to a value that settles later; the
//! paired [`Resolver`] settles it exactly once (it is consumed by
//! [`resolve`](Resolver::resolve) and [`reject`](Resolver::reject)).
//!
//! # Invariants
//!
//! 1. A pending value settles at most once; later settle attempts are ignored.
//! 2. Continuations registered with [`Pending::then`] run exactly once, in
//!    registration order, synchronously inside the settling call (or
//!    immediately when registered on an already-settled handle).
//! 3. Resolving with another `Pending` adopts that value's eventual result.
//! 4. `Pending` implements [`Future`], so it can be awaited by any
//!    single-threaded executor.
//!
//! # Failure Modes
//!
//! - **Resolver dropped**: the handle stays pending forever. There is no
//!   cancellation or timeout.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::{CellError, Result};
use crate::value::Value;

type Continuation = Box<dyn FnOnce(Result<Value>)>;

enum PendingState {
    Waiting {
        continuations: Vec<Continuation>,
        wakers: Vec<Waker>,
    },
    Settled(Result<Value>),
}

/// Handle to a value that settles later.
#[derive(Clone)]
pub struct Pending {
    state: Rc<RefCell<PendingState>>,
}

/// The settling half of a [`Pending`].
pub struct Resolver {
    target: Pending,
}

impl Pending {
    /// A new unsettled handle and its resolver.
    #[must_use]
    pub fn new() -> (Self, Resolver) {
        let pending = Self {
            state: Rc::new(RefCell::new(PendingState::Waiting {
                continuations: Vec::new(),
                wakers: Vec::new(),
            })),
        };
        let resolver = Resolver {
            target: pending.clone(),
        };
        (pending, resolver)
    }

    /// An already-settled handle.
    #[must_use]
    pub fn settled(result: Result<Value>) -> Self {
        Self {
            state: Rc::new(RefCell::new(PendingState::Settled(result))),
        }
    }

    #[must_use]
    pub fn resolved(value: impl Into<Value>) -> Self {
        Self::settled(Ok(value.into()))
    }

    #[must_use]
    pub fn rejected(error: CellError) -> Self {
        Self::settled(Err(error))
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(&*self.state.borrow(), PendingState::Settled(_))
    }

    /// The settled result, if any, without waiting.
    #[must_use]
    pub fn result(&self) -> Option<Result<Value>> {
        match &*self.state.borrow() {
            PendingState::Settled(result) => Some(result.clone()),
            PendingState::Waiting { .. } => None,
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Chain a continuation on success. Rejections skip `f` and pass through.
    /// If `f` yields another `Pending`, the returned handle adopts it.
    #[must_use]
    pub fn then(&self, f: impl FnOnce(Value) -> Result<Value> + 'static) -> Pending {
        let (next, resolver) = Pending::new();
        self.on_settle(move |result| match result.and_then(f) {
            Ok(Value::Pending(inner)) => inner.on_settle(move |adopted| resolver.settle(adopted)),
            other => resolver.settle(other),
        });
        next
    }

    pub(crate) fn on_settle(&self, continuation: impl FnOnce(Result<Value>) + 'static) {
        let settled = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                PendingState::Waiting { continuations, .. } => {
                    continuations.push(Box::new(continuation));
                    return;
                }
                PendingState::Settled(result) => result.clone(),
            }
        };
        continuation(settled);
    }

    fn settle(&self, result: Result<Value>) {
        let (continuations, wakers) = {
            let mut state = self.state.borrow_mut();
            if matches!(&*state, PendingState::Settled(_)) {
                return;
            }
            match std::mem::replace(&mut *state, PendingState::Settled(result.clone())) {
                PendingState::Waiting {
                    continuations,
                    wakers,
                } => (continuations, wakers),
                PendingState::Settled(_) => return,
            }
        };
        tracing::trace!(
            ok = result.is_ok(),
            continuations = continuations.len(),
            "pending settled"
        );
        for continuation in continuations {
            continuation(result.clone());
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

impl Resolver {
    /// Settle with a value. A `Value::Pending` is adopted rather than stored.
    pub fn resolve(self, value: impl Into<Value>) {
        match value.into() {
            Value::Pending(inner) => {
                let target = self.target;
                inner.on_settle(move |result| target.settle(result));
            }
            value => self.target.settle(Ok(value)),
        }
    }

    pub fn reject(self, error: CellError) {
        self.target.settle(Err(error));
    }

    fn settle(self, result: Result<Value>) {
        self.target.settle(result);
    }
}

impl Future for Pending {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            PendingState::Settled(result) => Poll::Ready(result.clone()),
            PendingState::Waiting { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            PendingState::Settled(result) => f.debug_tuple("Pending").field(result).finish(),
            PendingState::Waiting { continuations, .. } => f
                .debug_struct("Pending")
                .field("waiting", &continuations.len())
                .finish(),
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}
