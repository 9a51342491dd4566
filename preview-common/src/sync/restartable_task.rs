//! Cancellable, coalescing task runner
//!
//! At most one execution is in flight. A request arriving while one runs
//! flags the running execution's [`CancellationToken`] and becomes the queued
//! successor; a later request replaces that successor, which then never runs.
//! Executors poll the token at safe checkpoints and return early; work that
//! cannot be aborted simply has its result discarded by the executor once it
//! sees the token flagged. An executor that panics ends its own request with
//! [`Error::TaskPanicked`]; the queue carries on with the next request.

use crate::error::Error;
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// How a request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The executor ran to completion without being cancelled
    Completed,
    /// The executor ran but a newer request flagged it cancelled
    Cancelled,
    /// Equivalent to the running or queued request; not executed
    Deduplicated,
    /// Replaced in the queue by a newer request before it could start
    Superseded,
}

type Executor<A, E> =
    Arc<dyn Fn(A, CancellationToken) -> BoxFuture<'static, Result<(), E>> + Send + Sync>;
type Deduplicator<A> = Arc<dyn Fn(&A, &A) -> bool + Send + Sync>;
type Reply<E> = oneshot::Sender<Result<TaskOutcome, E>>;

struct Queued<A, E> {
    arg: A,
    token: CancellationToken,
    reply: Reply<E>,
}

struct State<A, E> {
    running: Option<(A, CancellationToken)>,
    pending: Option<Queued<A, E>>,
    dedup: Option<Deduplicator<A>>,
}

struct Inner<A, E> {
    name: String,
    executor: Executor<A, E>,
    state: StdMutex<State<A, E>>,
}

/// Generic restartable task; cheap to clone, clones share the same queue
pub struct RestartableTask<A, E> {
    inner: Arc<Inner<A, E>>,
}

impl<A, E> Clone for RestartableTask<A, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Registration<E> {
    Done(TaskOutcome),
    Waiting(oneshot::Receiver<Result<TaskOutcome, E>>),
}

impl<A, E> RestartableTask<A, E>
where
    A: Clone + Send + std::fmt::Debug + 'static,
    E: From<Error> + Send + 'static,
{
    /// Create a task running `executor` for each accepted request
    pub fn new<F, Fut>(name: impl Into<String>, executor: F) -> Self
    where
        F: Fn(A, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let executor: Executor<A, E> =
            Arc::new(move |arg: A, token: CancellationToken| executor(arg, token).boxed());
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                executor,
                state: StdMutex::new(State {
                    running: None,
                    pending: None,
                    dedup: None,
                }),
            }),
        }
    }

    /// Treat a request equivalent to the newest running or queued one as a no-op.
    ///
    /// Applies to every clone of this task, including requests registered
    /// from then on by clones made earlier.
    pub fn with_dedup<D>(self, dedup: D) -> Self
    where
        D: Fn(&A, &A) -> bool + Send + Sync + 'static,
    {
        self.lock_state().dedup = Some(Arc::new(dedup));
        self
    }

    /// Request an execution with `arg`.
    ///
    /// The request is registered when this is called, so requests issued
    /// back to back are ordered even if their futures are awaited later (or
    /// never). Must be called inside a tokio runtime.
    pub fn request(&self, arg: A) -> impl Future<Output = Result<TaskOutcome, E>> + Send + 'static {
        let registration = self.register(arg);
        async move {
            match registration {
                Registration::Done(outcome) => Ok(outcome),
                // A reply dropped unsent means the queued request was discarded
                Registration::Waiting(rx) => rx.await.unwrap_or(Ok(TaskOutcome::Superseded)),
            }
        }
    }

    /// Whether an execution is in flight
    pub fn is_running(&self) -> bool {
        self.lock_state().running.is_some()
    }

    /// Flag the running execution and drop any queued successor
    pub fn cancel(&self) {
        let mut state = self.lock_state();
        if let Some((_, token)) = &state.running {
            token.cancel();
        }
        if let Some(queued) = state.pending.take() {
            let _ = queued.reply.send(Ok(TaskOutcome::Superseded));
        }
    }

    fn register(&self, arg: A) -> Registration<E> {
        let mut state = self.lock_state();

        let newest = state
            .pending
            .as_ref()
            .map(|q| &q.arg)
            .or(state.running.as_ref().map(|(a, _)| a));
        if let (Some(dedup), Some(newest)) = (&state.dedup, newest) {
            if dedup(newest, &arg) {
                trace!("{}: request {:?} deduplicated", self.inner.name, arg);
                return Registration::Done(TaskOutcome::Deduplicated);
            }
        }

        let (reply, rx) = oneshot::channel();
        let token = CancellationToken::new();

        let running_token = state.running.as_ref().map(|(_, token)| token.clone());
        match running_token {
            Some(running_token) => {
                debug!("{}: {:?} supersedes the running request", self.inner.name, arg);
                running_token.cancel();
                if let Some(replaced) = state.pending.replace(Queued { arg, token, reply }) {
                    let _ = replaced.reply.send(Ok(TaskOutcome::Superseded));
                }
            }
            None => {
                state.running = Some((arg.clone(), token.clone()));
                drop(state);
                self.spawn_driver(Queued { arg, token, reply });
            }
        }
        Registration::Waiting(rx)
    }

    fn spawn_driver(&self, first: Queued<A, E>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut next = Some(first);
            while let Some(Queued { arg, token, reply }) = next.take() {
                trace!("{}: executing {:?}", inner.name, arg);
                let execution = (inner.executor)(arg, token.clone());
                let outcome = match AssertUnwindSafe(execution).catch_unwind().await {
                    Ok(result) => result.map(|()| {
                        if token.is_cancelled() {
                            TaskOutcome::Cancelled
                        } else {
                            TaskOutcome::Completed
                        }
                    }),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!("{}: executor panicked: {}", inner.name, message);
                        Err(E::from(Error::TaskPanicked {
                            task: inner.name.clone(),
                            message,
                        }))
                    }
                };
                let _ = reply.send(outcome);

                let mut state = lock(&inner.state);
                match state.pending.take() {
                    Some(queued) => {
                        state.running = Some((queued.arg.clone(), queued.token.clone()));
                        next = Some(queued);
                    }
                    None => state.running = None,
                }
            }
        });
    }

    fn lock_state(&self) -> StdMutexGuard<'_, State<A, E>> {
        lock(&self.inner.state)
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
