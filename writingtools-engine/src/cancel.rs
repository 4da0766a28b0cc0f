//! Cooperative cancellation shared by providers and the model downloader.
//!
//! A [`Canceller`] hands out [`CancelToken`]s stamped with the current epoch.
//! `cancel()` advances the epoch, which cancels every outstanding token while
//! leaving tokens taken afterwards untouched, so a call issued after a cancel
//! is never blocked by it.

use crate::error::ProviderError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Epoch {
    value: AtomicU64,
    notify: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct Canceller {
    epoch: Arc<Epoch>,
}

impl Canceller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            epoch: self.epoch.clone(),
            issued_at: self.epoch.value.load(Ordering::SeqCst),
        }
    }

    /// Idempotent; safe with nothing in flight.
    pub fn cancel(&self) {
        self.epoch.value.fetch_add(1, Ordering::SeqCst);
        self.epoch.notify.notify_waiters();
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    epoch: Arc<Epoch>,
    issued_at: u64,
}

impl CancelToken {
    /// A token nobody can cancel.
    pub fn never() -> Self {
        Canceller::new().token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.epoch.value.load(Ordering::SeqCst) != self.issued_at
    }

    pub fn check(&self) -> Result<(), ProviderError> {
        if self.is_cancelled() {
            Err(ProviderError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.epoch.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a cancel between the two is not lost.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    // Bumped by `reset`; guards from an older generation no longer count.
    generation: u64,
    count: usize,
}

/// Tracks how many units of work a provider has in flight.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag {
    in_flight: Arc<Mutex<InFlight>>,
}

fn lock(m: &Mutex<InFlight>) -> MutexGuard<'_, InFlight> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl BusyFlag {
    pub fn enter(&self) -> BusyGuard {
        let mut state = lock(&self.in_flight);
        state.count += 1;
        BusyGuard {
            in_flight: self.in_flight.clone(),
            generation: state.generation,
        }
    }

    pub fn is_set(&self) -> bool {
        lock(&self.in_flight).count > 0
    }

    /// Clears the flag. Guards entered before the reset stop counting.
    pub fn reset(&self) {
        let mut state = lock(&self.in_flight);
        state.generation += 1;
        state.count = 0;
    }
}

pub struct BusyGuard {
    in_flight: Arc<Mutex<InFlight>>,
    generation: u64,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.in_flight);
        if state.generation == self.generation {
            state.count = state.count.saturating_sub(1);
        }
    }
}
