//! Arrival tracking for the series. One flag per expected volume, set
//! exactly once by the receive thread and never cleared, with a condvar so
//! waiters block on notification instead of spinning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct CompletionTable {
    flags: Vec<AtomicBool>,
    lock: Mutex<()>,
    arrived: Condvar,
}

impl CompletionTable {
    pub fn new(num_timepts: usize) -> Self {
        let mut flags = Vec::with_capacity(num_timepts);
        flags.resize_with(num_timepts, AtomicBool::default);
        Self {
            flags,
            lock: Mutex::new(()),
            arrived: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn is_complete(&self, vol_idx: usize) -> bool {
        self.flags
            .get(vol_idx)
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn count_complete(&self) -> usize {
        self.flags
            .iter()
            .filter(|flag| flag.load(Ordering::Acquire))
            .count()
    }

    /// Mark a volume as fully arrived. Returns false if the flag was
    /// already set (duplicate arrival). Flags are never cleared.
    pub fn mark_complete(&self, vol_idx: usize) -> bool {
        let Some(flag) = self.flags.get(vol_idx) else {
            return false;
        };
        let first = !flag.swap(true, Ordering::Release);
        // taking the lock orders the notification after any waiter's check
        let _guard = self.lock.lock().unwrap();
        self.arrived.notify_all();
        first
    }

    /// Block until the flag for `vol_idx` is set, up to `timeout`. Returns
    /// whether the volume arrived within the window.
    pub fn wait_for(&self, vol_idx: usize, timeout: Duration) -> bool {
        if self.is_complete(vol_idx) {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap();
        while !self.is_complete(vol_idx) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next_guard, _) = self.arrived.wait_timeout(guard, deadline - now).unwrap();
            guard = next_guard;
        }
        true
    }
}
