//! Reference-counted single-assignment values.
//!
//! An [`AsyncValue`] is either pending, holds a value, or holds a
//! [`JitError`]. Continuations registered while it is pending run on the
//! thread that resolves it; continuations registered afterwards run inline.
//! Values created with [`AsyncValue::indirect`] can additionally be forwarded
//! to another value once, after which they track that value's state.

mod wait;

pub use wait::run_when_ready;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::JitError;

pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Concrete,
    Indirect,
}

/// Misuse of [`AsyncValue::forward_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForwardError {
    #[error("only indirect values can be forwarded")]
    NotIndirect,
    #[error("value was already forwarded")]
    AlreadyForwarded,
    #[error("value was already resolved")]
    AlreadyResolved,
    #[error("forwarding would create a cycle")]
    Cycle,
}

struct Inner<T> {
    kind: ValueKind,
    result: OnceCell<Result<T, JitError>>,
    forwarded: OnceCell<AsyncValue<T>>,
    // Resolution and forwarding both happen under this lock so a continuation
    // is never pushed after the list has been drained.
    waiters: Mutex<Vec<Continuation>>,
}

pub struct AsyncValue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AsyncValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> AsyncValue<T> {
    fn with_kind(kind: ValueKind) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                result: OnceCell::new(),
                forwarded: OnceCell::new(),
                waiters: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates an unavailable concrete value.
    pub fn pending() -> Self {
        Self::with_kind(ValueKind::Concrete)
    }

    /// Creates an unavailable value that may later be forwarded.
    pub fn indirect() -> Self {
        Self::with_kind(ValueKind::Indirect)
    }

    pub fn ready(value: T) -> Self {
        Self::resolved(Ok(value))
    }

    pub fn error(error: JitError) -> Self {
        Self::resolved(Err(error))
    }

    fn resolved(result: Result<T, JitError>) -> Self {
        let value = Self::pending();
        let _ = value.inner.result.set(result);
        value
    }

    pub fn is_indirect(&self) -> bool {
        self.inner.kind == ValueKind::Indirect
    }

    /// Returns true when both handles refer to the same value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to this value, forwarding links included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// The resolved state, following forwarding links.
    pub fn get(&self) -> Option<Result<&T, &JitError>> {
        if let Some(target) = self.inner.forwarded.get() {
            return target.get();
        }
        self.inner.result.get().map(Result::as_ref)
    }

    pub fn is_available(&self) -> bool {
        self.get().is_some()
    }

    pub fn is_error(&self) -> bool {
        matches!(self.get(), Some(Err(_)))
    }

    pub fn value(&self) -> Option<&T> {
        self.get().and_then(Result::ok)
    }

    pub fn error_ref(&self) -> Option<&JitError> {
        self.get().and_then(Result::err)
    }

    fn is_resolved_locally(&self) -> bool {
        self.inner.result.get().is_some()
    }
}

impl<T: Send + Sync + 'static> AsyncValue<T> {
    pub fn set_value(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    pub fn set_error(&self, error: JitError) -> bool {
        self.resolve(Err(error))
    }

    /// Moves the value into a terminal state and runs pending continuations.
    ///
    /// Returns false, leaving the value untouched, when it was already
    /// resolved or forwarded.
    pub fn resolve(&self, result: Result<T, JitError>) -> bool {
        let waiters = {
            let mut waiters = self.inner.waiters.lock();
            if self.inner.forwarded.get().is_some() {
                warn!("ignoring resolution of a forwarded async value");
                return false;
            }
            if self.inner.result.set(result).is_err() {
                warn!("ignoring second resolution of an async value");
                return false;
            }
            std::mem::take(&mut *waiters)
        };
        run_isolated(waiters, |waiter| waiter());
        true
    }

    /// Runs `f` once this value becomes available.
    pub fn and_then<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_continuation(Box::new(f));
    }

    fn push_continuation(&self, f: Continuation) {
        let mut waiters = self.inner.waiters.lock();
        if self.is_resolved_locally() {
            drop(waiters);
            f();
            return;
        }
        if let Some(target) = self.inner.forwarded.get() {
            let target = target.clone();
            drop(waiters);
            target.push_continuation(f);
            return;
        }
        waiters.push(f);
    }

    /// Runs `f` with the resolved state once this value becomes available.
    pub fn on_ready<F>(&self, f: F)
    where
        F: FnOnce(Result<&T, &JitError>) + Send + 'static,
    {
        let this = self.clone();
        self.and_then(move || {
            if let Some(result) = this.get() {
                f(result);
            }
        });
    }

    /// Derives a value that resolves with `f` applied to this one.
    ///
    /// Errors pass through unchanged.
    pub fn map<U, F>(&self, f: F) -> AsyncValue<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> Result<U, JitError> + Send + 'static,
    {
        match self.get() {
            Some(Ok(value)) => AsyncValue::resolved(f(value)),
            Some(Err(err)) => AsyncValue::error(err.clone()),
            None => {
                let mapped = AsyncValue::pending();
                let target = mapped.clone();
                self.on_ready(move |result| {
                    target.resolve(match result {
                        Ok(value) => f(value),
                        Err(err) => Err(err.clone()),
                    });
                });
                mapped
            }
        }
    }

    /// Binds this indirect value to `target`.
    ///
    /// Continuations already registered here move to `target`, and every
    /// later query follows it.
    pub fn forward_to(&self, target: AsyncValue<T>) -> Result<(), ForwardError> {
        if !self.is_indirect() {
            return Err(ForwardError::NotIndirect);
        }
        let mut cursor = Some(target.clone());
        while let Some(current) = cursor {
            if current.ptr_eq(self) {
                return Err(ForwardError::Cycle);
            }
            cursor = current.inner.forwarded.get().cloned();
        }

        let waiters = {
            let mut waiters = self.inner.waiters.lock();
            if self.is_resolved_locally() {
                return Err(ForwardError::AlreadyResolved);
            }
            if self.inner.forwarded.set(target.clone()).is_err() {
                return Err(ForwardError::AlreadyForwarded);
            }
            std::mem::take(&mut *waiters)
        };
        run_isolated(waiters, |waiter| target.push_continuation(waiter));
        Ok(())
    }
}

/// Hands every waiter to `run`, even when an earlier one panics.
///
/// The first panic is resumed once all waiters have been handed off.
fn run_isolated(waiters: Vec<Continuation>, mut run: impl FnMut(Continuation)) {
    let mut first_panic = None;
    for waiter in waiters {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| run(waiter))) {
            error!("async value continuation panicked");
            first_panic.get_or_insert(payload);
        }
    }
    if let Some(payload) = first_panic {
        panic::resume_unwind(payload);
    }
}

impl<T> From<Result<T, JitError>> for AsyncValue<T> {
    fn from(result: Result<T, JitError>) -> Self {
        Self::resolved(result)
    }
}

impl<T> Default for AsyncValue<T> {
    fn default() -> Self {
        Self::pending()
    }
}

impl<T: fmt::Debug> fmt::Debug for AsyncValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("AsyncValue");
        out.field("kind", &self.inner.kind);
        match self.get() {
            Some(Ok(value)) => out.field("value", value),
            Some(Err(err)) => out.field("error", err),
            None if self.inner.forwarded.get().is_some() => out.field("state", &"forwarded"),
            None => out.field("state", &"pending"),
        };
        out.finish()
    }
}
