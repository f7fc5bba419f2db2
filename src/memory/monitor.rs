use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Process-wide memory pressure hook.
///
/// Implementations must be callable from many threads at once and must never
/// take a lock owned by a table, fragment or column.
pub trait MemoryMonitor: Send + Sync {
    /// Block the producer until memory pressure is acceptable.
    fn wait_for_memory(&self);

    /// A reader is about to block on disk I/O to reload an evicted column.
    /// Called before the column lock is taken.
    fn will_block_on_io(&self) {}

    fn charge(&self, _bytes: usize) {}

    fn release(&self, _bytes: usize) {}
}

/// Never blocks, tracks nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl MemoryMonitor for NoopMonitor {
    fn wait_for_memory(&self) {}
}

/// Byte-counting monitor with a soft limit
pub struct ThresholdMonitor {
    pub usage: AtomicUsize,
    pub limit: usize,
    /// Upper bound on a single `wait_for_memory` call
    pub max_wait: Duration,
    pub io_waits: AtomicUsize,
    lock: Mutex<()>,
    freed: Condvar,
}

impl ThresholdMonitor {
    pub fn new(limit: usize) -> Self {
        ThresholdMonitor {
            usage: AtomicUsize::new(0),
            limit,
            max_wait: Duration::from_secs(5),
            io_waits: AtomicUsize::new(0),
            lock: Mutex::new(()),
            freed: Condvar::new(),
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn current_usage(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    pub fn pressure(&self) -> f32 {
        self.current_usage() as f32 / self.limit.max(1) as f32
    }

    /// Hint to the allocator to hand freed pages back to the OS
    pub fn release_to_os(&self) {
        #[cfg(all(target_os = "linux", target_env = "gnu"))]
        unsafe {
            libc::malloc_trim(0);
        }
    }
}

impl MemoryMonitor for ThresholdMonitor {
    fn wait_for_memory(&self) {
        if self.current_usage() <= self.limit {
            return;
        }

        let started = Instant::now();
        let mut guard = self.lock.lock();
        while self.current_usage() > self.limit {
            let elapsed = started.elapsed();
            if elapsed >= self.max_wait {
                debug!(usage = self.current_usage(), limit = self.limit, "memory wait timed out");
                break;
            }
            let slice = (self.max_wait - elapsed).min(Duration::from_millis(10));
            self.freed.wait_for(&mut guard, slice);
        }
    }

    fn will_block_on_io(&self) {
        self.io_waits.fetch_add(1, Ordering::Relaxed);
    }

    fn charge(&self, bytes: usize) {
        self.usage.fetch_add(bytes, Ordering::SeqCst);
    }

    fn release(&self, bytes: usize) {
        // Saturating: releases may race with charges from a reload
        let mut current = self.usage.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(bytes);
            match self.usage.compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let _guard = self.lock.lock();
        self.freed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_once_memory_is_released() {
        let monitor = Arc::new(ThresholdMonitor::new(100));
        monitor.charge(500);

        let releaser = {
            let monitor = monitor.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                monitor.release(450);
            })
        };

        let started = Instant::now();
        monitor.wait_for_memory();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(monitor.current_usage(), 50);
        releaser.join().unwrap();
    }

    #[test]
    fn wait_is_bounded() {
        let monitor = ThresholdMonitor::new(10).with_max_wait(Duration::from_millis(20));
        monitor.charge(11);
        let started = Instant::now();
        monitor.wait_for_memory();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn release_saturates() {
        let monitor = ThresholdMonitor::new(10);
        monitor.charge(5);
        monitor.release(50);
        assert_eq!(monitor.current_usage(), 0);
    }
}
