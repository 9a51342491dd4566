//! # Preview Common Library
//!
//! Shared code for the media preview player:
//! - Error type used by configuration loading and the sync primitives
//! - Configuration file resolution and TOML loading
//! - Player event types broadcast to UI listeners
//! - Time and frame-index conversions
//! - Async concurrency primitives (`Mutex`, `RestartableTask`)

pub mod config;
pub mod error;
pub mod events;
pub mod sync;
pub mod time;

pub use error::{Error, Result};
pub use events::PlayerEvent;
