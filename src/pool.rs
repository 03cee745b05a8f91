//! Fixed-capacity connection slot pool.
//!
//! The pool is an arena of slots claimed and released under a single coarse
//! lock; it is the only piece of shared state in the engine. A claimed slot
//! is represented by a [`PoolSlot`] guard that releases itself on drop, and
//! slots carry a generation counter so a stale guard can never free a slot
//! that has since been reused.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct SlotState {
    in_use: bool,
    generation: u32,
}

/// A fixed-size pool of connection slots.
///
/// ```
/// use emws::ConnectionPool;
///
/// let pool = ConnectionPool::new(2);
/// let a = pool.acquire().unwrap();
/// let b = pool.acquire().unwrap();
/// assert!(pool.acquire().is_err());
/// drop(a);
/// assert!(pool.acquire().is_ok());
/// # drop(b);
/// ```
#[derive(Debug)]
pub struct ConnectionPool {
    slots: Mutex<Vec<SlotState>>,
}

impl ConnectionPool {
    /// Create a pool with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(vec![
                SlotState {
                    in_use: false,
                    generation: 0,
                };
                capacity
            ]),
        })
    }

    /// Claim a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfResources`] when every slot is in use.
    pub fn acquire(self: &Arc<Self>) -> Result<PoolSlot> {
        let mut slots = self.slots.lock().expect("pool lock poisoned");
        for (index, slot) in slots.iter_mut().enumerate() {
            if !slot.in_use {
                slot.in_use = true;
                return Ok(PoolSlot {
                    pool: Arc::clone(self),
                    index,
                    generation: slot.generation,
                });
            }
        }
        Err(Error::OutOfResources)
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.lock().expect("pool lock poisoned").len()
    }

    /// Number of slots currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots
            .lock()
            .expect("pool lock poisoned")
            .iter()
            .filter(|s| !s.in_use)
            .count()
    }

    fn release(&self, index: usize, generation: u32) {
        let mut slots = self.slots.lock().expect("pool lock poisoned");
        if let Some(slot) = slots.get_mut(index) {
            // A mismatched generation means the guard is stale; the slot
            // already belongs to someone else.
            if slot.in_use && slot.generation == generation {
                slot.in_use = false;
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }
}

/// RAII guard for a claimed pool slot; releasing is dropping.
#[derive(Debug)]
pub struct PoolSlot {
    pool: Arc<ConnectionPool>,
    index: usize,
    generation: u32,
}

impl PoolSlot {
    /// Index of the claimed slot within the pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.release(self.index, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = ConnectionPool::new(3);
        let guards: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.acquire().unwrap_err(), Error::OutOfResources);
        drop(guards);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_release_reacquire_same_slot() {
        let pool = ConnectionPool::new(1);
        let first = pool.acquire().unwrap();
        assert_eq!(first.index(), 0);
        drop(first);

        let second = pool.acquire().unwrap();
        assert_eq!(second.index(), 0);
    }

    #[test]
    fn test_zero_capacity_pool() {
        let pool = ConnectionPool::new(0);
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.acquire().unwrap_err(), Error::OutOfResources);
    }

    #[test]
    fn test_concurrent_acquire() {
        let pool = ConnectionPool::new(4);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.acquire().is_ok())
            })
            .collect();

        let claimed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        // Guards are dropped inside the threads, so late threads may reuse
        // slots released by early ones; at least the capacity succeeds.
        assert!(claimed >= 4);
        assert_eq!(pool.available(), 4);
    }
}
