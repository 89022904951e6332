//! Request dispatch layer.
//!
//! - Validator turning raw JSON into chat requests
//! - Bounded FIFO queue with a fixed worker pool in front of the backend
//! - Correlation table matching completions back to their callers

mod correlation;
mod queue;
mod validator;

pub use correlation::{CancelSignal, CorrelationStats, CorrelationTable, PendingHandle, SlotState};
pub use queue::{DispatchStats, Dispatcher, InFlightCall, RejectedError};
pub use validator::{ValidationError, Validator};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock `mutex`, recovering the data if a previous holder panicked.
///
/// Critical sections here never leave the protected state half-updated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
