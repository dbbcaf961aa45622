//! Bounded pool of evaluation slots
//!
//! A counting semaphore built from a bounded channel pre-filled with one token
//! per slot. Acquiring receives a token, dropping the permit sends it back.

use crossbeam_channel::{select, Receiver, Sender};

/// Pool of `capacity` evaluation slots
#[derive(Debug, Clone)]
pub struct SlotPool {
    capacity: usize,
    release: Sender<()>,
    tokens: Receiver<()>,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (release, tokens) = crossbeam_channel::bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel has room for exactly `capacity` tokens
            let _ = release.send(());
        }
        Self {
            capacity,
            release,
            tokens,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held
    pub fn available(&self) -> usize {
        self.tokens.len()
    }

    /// Block until a slot is free, or return `None` if `shutdown` disconnects first
    pub fn acquire(&self, shutdown: &Receiver<()>) -> Option<SlotPermit> {
        select! {
            recv(self.tokens) -> token => token.ok().map(|()| self.permit()),
            recv(shutdown) -> _ => None,
        }
    }

    /// Take a slot without blocking
    pub fn try_acquire(&self) -> Option<SlotPermit> {
        self.tokens.try_recv().ok().map(|()| self.permit())
    }

    fn permit(&self) -> SlotPermit {
        SlotPermit {
            release: self.release.clone(),
        }
    }
}

/// A held slot; returned to the pool on drop
#[derive(Debug)]
pub struct SlotPermit {
    release: Sender<()>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        let _ = self.release.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_capacity_is_at_least_one() {
        assert_eq!(SlotPool::new(0).capacity(), 1);
        assert_eq!(SlotPool::new(3).available(), 3);
    }

    #[test]
    fn test_permits_return_on_drop() {
        let pool = SlotPool::new(2);
        let first = pool.try_acquire().unwrap();
        let _second = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.available(), 0);

        drop(first);
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = SlotPool::new(1);
        let (_keep_open, shutdown) = crossbeam_channel::bounded::<()>(0);
        let held = pool.try_acquire().unwrap();

        let (started_tx, started) = crossbeam_channel::bounded(1);
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                started_tx.send(()).unwrap();
                pool.acquire(&shutdown).is_some()
            })
        };

        started.recv().unwrap();
        assert_eq!(pool.available(), 0);
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_acquire_aborts_on_shutdown() {
        let pool = SlotPool::new(1);
        let (shutdown_tx, shutdown) = crossbeam_channel::bounded::<()>(0);
        let _held = pool.try_acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire(&shutdown).is_none())
        };

        drop(shutdown_tx);
        assert!(waiter.join().unwrap());
    }
}
