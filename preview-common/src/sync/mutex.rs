//! Async mutual exclusion with FIFO hand-off
//!
//! Unlike `tokio::sync::Mutex` this lock guards no data: it serialises
//! *sections* (decode calls, seeks, resizes, stream switches) whose state
//! lives elsewhere. It adds two things the engine needs:
//!
//! - `acquire_if_idle()`: a non-blocking attempt for loops that would rather
//!   skip an iteration than queue behind a long operation
//! - an optional stall warning, logged once when a wait exceeds a threshold.
//!   It is purely diagnostic; the wait continues.
//!
//! Waiters are granted in the order `acquire()` was *called* (the waiter is
//! enqueued eagerly, before the returned future is first polled). Release
//! hands ownership directly to the next live waiter, so the mutex never
//! appears free while someone is queued.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, trace, warn};

struct State {
    busy: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Async mutex with FIFO waiters and stall diagnostics
pub struct Mutex {
    state: StdMutex<State>,
    stall_warning: Option<Duration>,
    name: String,
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Mutex")
            .field("name", &self.name)
            .field("busy", &state.busy)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

impl Mutex {
    /// Create a mutex without stall diagnostics
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: StdMutex::new(State {
                busy: false,
                waiters: VecDeque::new(),
            }),
            stall_warning: None,
            name: name.into(),
        }
    }

    /// Create a mutex that warns when a waiter has been queued for `threshold`
    pub fn with_stall_warning(name: impl Into<String>, threshold: Duration) -> Self {
        let mut mutex = Self::new(name);
        if !threshold.is_zero() {
            mutex.stall_warning = Some(threshold);
        }
        mutex
    }

    /// Whether the mutex is currently held
    pub fn is_busy(&self) -> bool {
        self.lock_state().busy
    }

    /// Number of callers queued behind the current holder
    pub fn waiting(&self) -> usize {
        self.lock_state().waiters.len()
    }

    /// Acquire the mutex, waiting for it if necessary.
    ///
    /// The caller is enqueued when this function is called; the returned
    /// future resolves once ownership has been handed over. Dropping the
    /// future before it resolves gives up the place in the queue (and passes
    /// ownership on if it had already been granted).
    pub fn acquire(&self) -> impl Future<Output = MutexGuard<'_>> + Send + '_ {
        let mut waiter = self.enqueue();
        async move {
            waiter.wait().await;
            waiter.into_guard()
        }
    }

    /// Acquire the mutex only if nobody holds it
    pub fn acquire_if_idle(&self) -> Option<MutexGuard<'_>> {
        let mut state = self.lock_state();
        if state.busy {
            return None;
        }
        state.busy = true;
        Some(MutexGuard { mutex: self })
    }

    fn enqueue(&self) -> Waiter<'_> {
        let mut state = self.lock_state();
        if !state.busy {
            state.busy = true;
            return Waiter {
                mutex: self,
                rx: None,
                held: true,
            };
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        trace!("mutex {}: queued ({} waiting)", self.name, state.waiters.len());
        Waiter {
            mutex: self,
            rx: Some(rx),
            held: false,
        }
    }

    fn release(&self) {
        let mut state = self.lock_state();
        while let Some(tx) = state.waiters.pop_front() {
            // A failed send means that waiter was dropped; try the next one
            if tx.send(()).is_ok() {
                return;
            }
        }
        state.busy = false;
    }

    fn lock_state(&self) -> StdMutexGuard<'_, State> {
        // State is only a flag and a queue; a panic elsewhere cannot leave it torn
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A queued or granted claim on the mutex that has not become a guard yet
struct Waiter<'a> {
    mutex: &'a Mutex,
    rx: Option<oneshot::Receiver<()>>,
    held: bool,
}

impl<'a> Waiter<'a> {
    async fn wait(&mut self) {
        let Some(rx) = self.rx.as_mut() else {
            return;
        };

        let result = match self.mutex.stall_warning {
            Some(threshold) => match tokio::time::timeout(threshold, &mut *rx).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "mutex {} has been waiting for ~{}ms",
                        self.mutex.name,
                        threshold.as_millis()
                    );
                    (&mut *rx).await
                }
            },
            None => (&mut *rx).await,
        };

        if result.is_err() {
            // Senders live in the mutex, which outlives every waiter
            error!("mutex {}: waiter sender dropped", self.mutex.name);
        }
        self.rx = None;
        self.held = true;
    }

    fn into_guard(mut self) -> MutexGuard<'a> {
        self.held = false;
        MutexGuard { mutex: self.mutex }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            // Ownership may have been handed over between the last poll and now
            if rx.try_recv().is_ok() {
                self.mutex.release();
            }
        } else if self.held {
            self.mutex.release();
        }
    }
}

/// Proof of holding the [`Mutex`]; releases on drop
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl std::fmt::Debug for MutexGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexGuard")
            .field("mutex", &self.mutex.name)
            .finish()
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}
