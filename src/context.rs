//! A small `Mutex` + `Condvar` monitor, generic over the guarded value.
//!
//! This is the one synchronization primitive every other module builds on:
//! the log event stream's PID rendezvous, the supervisor's single-user gate,
//! and the state interlock's blocking queries are all `Monitor<T>` instances
//! with a different `T` and a different wait predicate.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// A poisoned lock is treated as a fatal harness error everywhere in this
/// crate: a panic while holding a monitor means the invariant it protects
/// can no longer be trusted.
#[derive(Debug)]
pub struct Poisoned;

impl fmt::Display for Poisoned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "monitor lock poisoned")
    }
}

impl std::error::Error for Poisoned {}

impl<T> From<PoisonError<MutexGuard<'_, T>>> for Poisoned {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Poisoned
    }
}

#[derive(Debug)]
pub struct Monitor<T>(Arc<(Mutex<T>, Condvar)>);

impl<T> Clone for Monitor<T> {
    fn clone(&self) -> Self {
        Monitor(self.0.clone())
    }
}

impl<T> Monitor<T> {
    pub fn new(initial: T) -> Self {
        Monitor(Arc::new((Mutex::new(initial), Condvar::new())))
    }

    /// Runs `f` with the lock held, returning whatever it returns.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, Poisoned> {
        let (lock, _) = &*self.0;
        let mut guard = lock.lock()?;
        Ok(f(&mut guard))
    }

    /// Mutates the guarded value and wakes every waiter.
    pub fn mutate_and_notify_all<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, Poisoned> {
        let (lock, cvar) = &*self.0;
        let mut guard = lock.lock()?;
        let result = f(&mut guard);
        cvar.notify_all();
        Ok(result)
    }

    /// Blocks until `predicate` holds, then runs `f` with the lock still held
    /// and returns its result. Spurious-wakeup-safe: `predicate` is
    /// re-checked in a loop, as `Condvar::wait_while` requires.
    pub fn wait_until<R>(
        &self,
        mut predicate: impl FnMut(&T) -> bool,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, Poisoned> {
        let (lock, cvar) = &*self.0;
        let guard = lock.lock()?;
        let mut guard = cvar.wait_while(guard, |value| !predicate(value))?;
        Ok(f(&mut guard))
    }
}
