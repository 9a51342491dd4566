//! Fixed-capacity slab pool for decoded frame data
//!
//! The pool owns a fixed number of slots, each able to hold up to
//! `item_size` bytes. A [`PooledBuffer`] moves a slot's storage out of the
//! pool while leased and moves it back when released or dropped, so a slot
//! is returned exactly once and its data cannot be reached after release.
//!
//! Slot storage is allocated on first use and then recycled; steady-state
//! decoding performs no per-frame heap allocation.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

/// Headroom applied by [`FramePool::reserve`] when it has to grow
pub const GROW_FACTOR: f64 = 1.5;

/// Pool misuse and exhaustion
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every slot is leased
    #[error("all {capacity} pool slots are leased")]
    Exhausted { capacity: usize },

    /// Requested more bytes than a slot can hold
    #[error("requested {requested} bytes, slot size is {max}")]
    ItemTooLarge { requested: usize, max: usize },

    /// Reallocation attempted while slots are leased
    #[error("cannot reallocate pool while {leased} slots are leased")]
    Busy { leased: usize },
}

struct PoolState {
    capacity: usize,
    item_size: usize,
    /// Slots allocated so far (free + leased)
    allocated: usize,
    free: Vec<Vec<u8>>,
    leased: usize,
}

impl PoolState {
    fn give_back(&mut self, mut data: Vec<u8>) {
        data.clear();
        self.leased -= 1;
        self.free.push(data);
    }
}

/// Slab pool handing out bounded-size frame buffers
///
/// Cloning is cheap; clones share the same slots.
#[derive(Clone)]
pub struct FramePool {
    state: Arc<Mutex<PoolState>>,
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("FramePool")
            .field("capacity", &state.capacity)
            .field("item_size", &state.item_size)
            .field("leased", &state.leased)
            .finish()
    }
}

impl FramePool {
    /// Create a pool of `capacity` slots of `item_size` bytes each
    pub fn new(capacity: usize, item_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                capacity,
                item_size,
                allocated: 0,
                free: Vec::new(),
                leased: 0,
            })),
        }
    }

    /// Lease a slot holding `size` zeroed bytes.
    ///
    /// # Errors
    /// - [`PoolError::ItemTooLarge`] if `size` exceeds the slot size
    /// - [`PoolError::Exhausted`] if every slot is leased
    pub fn allocate(&self, size: usize) -> Result<PooledBuffer, PoolError> {
        let mut state = self.lock();
        if size > state.item_size {
            return Err(PoolError::ItemTooLarge {
                requested: size,
                max: state.item_size,
            });
        }

        let mut data = match state.free.pop() {
            Some(data) => data,
            None if state.allocated < state.capacity => {
                state.allocated += 1;
                Vec::with_capacity(state.item_size)
            }
            None => {
                return Err(PoolError::Exhausted {
                    capacity: state.capacity,
                })
            }
        };
        state.leased += 1;
        drop(state);

        data.resize(size, 0);
        Ok(PooledBuffer {
            data,
            pool: Arc::clone(&self.state),
        })
    }

    /// Reallocate to exactly `capacity` slots of `item_size` bytes.
    ///
    /// # Errors
    /// [`PoolError::Busy`] if any slot is leased.
    pub fn resize(&self, capacity: usize, item_size: usize) -> Result<(), PoolError> {
        let mut state = self.lock();
        if state.leased > 0 {
            return Err(PoolError::Busy {
                leased: state.leased,
            });
        }
        info!(
            "Reallocating frame pool: {} x {} bytes -> {} x {} bytes",
            state.capacity, state.item_size, capacity, item_size
        );
        state.capacity = capacity;
        state.item_size = item_size;
        state.free.clear();
        state.allocated = 0;
        Ok(())
    }

    /// Make sure the pool fits `capacity` slots of `item_size` bytes.
    ///
    /// No-op when it already does; otherwise reallocates with the slot size
    /// grown to [`GROW_FACTOR`] times the need so small size changes do not
    /// reallocate every time.
    pub fn reserve(&self, capacity: usize, item_size: usize) -> Result<(), PoolError> {
        let (current_capacity, current_item) = {
            let state = self.lock();
            (state.capacity, state.item_size)
        };
        if capacity <= current_capacity && item_size <= current_item {
            debug!("Frame pool already fits {} x {} bytes", capacity, item_size);
            return Ok(());
        }
        let grown = ((item_size as f64) * GROW_FACTOR).ceil() as usize;
        self.resize(capacity.max(current_capacity), grown.max(current_item))
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Maximum bytes per slot
    pub fn item_size(&self) -> usize {
        self.lock().item_size
    }

    /// Slots currently leased
    pub fn leased(&self) -> usize {
        self.lock().leased
    }

    /// Slots that can be leased right now
    pub fn available(&self) -> usize {
        let state = self.lock();
        state.capacity.saturating_sub(state.leased)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A leased pool slot; returns to the pool on [`release`](Self::release) or drop
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<Mutex<PoolState>>,
}

impl PooledBuffer {
    /// Return the slot to the pool
    pub fn release(self) {
        drop(self);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        let mut state = self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.give_back(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let pool = FramePool::new(2, 16);
        let mut buf = pool.allocate(10).unwrap();
        assert_eq!(buf.len(), 10);
        assert!(buf.iter().all(|&b| b == 0));
        buf[0] = 42;
        assert_eq!(pool.leased(), 1);
        assert_eq!(pool.available(), 1);

        buf.release();
        assert_eq!(pool.leased(), 0);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_exhausted() {
        let pool = FramePool::new(2, 16);
        let _a = pool.allocate(16).unwrap();
        let _b = pool.allocate(1).unwrap();
        assert_eq!(
            pool.allocate(1).unwrap_err(),
            PoolError::Exhausted { capacity: 2 }
        );
    }

    #[test]
    fn test_item_too_large() {
        let pool = FramePool::new(2, 16);
        assert_eq!(
            pool.allocate(17).unwrap_err(),
            PoolError::ItemTooLarge {
                requested: 17,
                max: 16
            }
        );
        assert_eq!(pool.leased(), 0);
    }

    #[test]
    fn test_recycled_slot_is_zeroed() {
        let pool = FramePool::new(1, 8);
        let mut buf = pool.allocate(8).unwrap();
        buf.fill(0xff);
        drop(buf);

        let buf = pool.allocate(4).unwrap();
        assert_eq!(buf.as_slice(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_resize_while_leased_fails() {
        let pool = FramePool::new(2, 16);
        let buf = pool.allocate(4).unwrap();
        assert_eq!(pool.resize(4, 64), Err(PoolError::Busy { leased: 1 }));

        drop(buf);
        assert!(pool.resize(4, 64).is_ok());
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.item_size(), 64);
    }

    #[test]
    fn test_reserve_grows_with_headroom() {
        let pool = FramePool::new(4, 100);
        pool.reserve(4, 80).unwrap();
        assert_eq!(pool.item_size(), 100);

        pool.reserve(4, 200).unwrap();
        assert_eq!(pool.item_size(), 300);
        assert_eq!(pool.capacity(), 4);

        // Within headroom: no reallocation
        pool.reserve(4, 250).unwrap();
        assert_eq!(pool.item_size(), 300);
    }

    #[test]
    fn test_clones_share_slots() {
        let pool = FramePool::new(1, 8);
        let other = pool.clone();
        let _buf = pool.allocate(1).unwrap();
        assert!(matches!(other.allocate(1), Err(PoolError::Exhausted { .. })));
    }
}
