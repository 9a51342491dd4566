//! Concurrency primitives shared by the engine's state machines

pub mod mutex;
pub mod restartable_task;

pub use mutex::{Mutex, MutexGuard};
pub use restartable_task::{RestartableTask, TaskOutcome};
