use std::sync::{Mutex, MutexGuard};

use super::error::SupervisorError;

/// Serializes `start`/`stop` on one supervisor. Holding the guard returned
/// by [`Gate::acquire`] *is* the single permit; it is released when the
/// guard drops, so there is no separate token to forget to return.
#[derive(Default)]
pub struct Gate(Mutex<()>);

impl Gate {
    pub fn new() -> Self {
        Gate(Mutex::new(()))
    }

    pub fn acquire(&self) -> Result<MutexGuard<'_, ()>, SupervisorError> {
        Ok(self.0.lock()?)
    }
}
