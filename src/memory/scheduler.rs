use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Something the scheduler may push to disk.
pub trait Swappable: Send + Sync {
    fn is_swappable(&self) -> bool;

    /// 0 = ineligible; larger = more eligible
    fn swap_priority(&self) -> f64;

    /// Best effort. False when conditions changed or the write failed.
    fn swap(&self) -> bool;

    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Maps idle time to a swap priority. Must be monotone in `idle`.
pub trait PriorityPolicy: Send + Sync {
    fn priority(&self, idle: Duration) -> f64;
}

/// Idle time measured in units of `alive_window`, offset so that an eligible
/// item never reports 0.
#[derive(Debug, Clone, Copy)]
pub struct AgePriority {
    pub alive_window: Duration,
}

impl AgePriority {
    pub fn new(alive_window: Duration) -> Self {
        AgePriority { alive_window }
    }
}

impl PriorityPolicy for AgePriority {
    fn priority(&self, idle: Duration) -> f64 {
        let window = self.alive_window.as_millis().max(1) as f64;
        (idle.as_millis() as f64 + 1.0) / window
    }
}

/// Polls registered swappables and swaps the highest-priority ones.
pub struct SwapScheduler {
    candidates: Mutex<Vec<Weak<dyn Swappable>>>,
    /// Minimum priority worth swapping
    pub threshold: f64,
}

impl SwapScheduler {
    pub fn new() -> Self {
        SwapScheduler {
            candidates: Mutex::new(Vec::new()),
            threshold: 0.0,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn register<S: Swappable + 'static>(&self, item: &Arc<S>) {
        let weak = Arc::downgrade(item);
        let weak: Weak<dyn Swappable> = weak;
        self.candidates.lock().push(weak);
    }

    pub fn len(&self) -> usize {
        self.candidates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One polling pass. Returns how many items were swapped.
    pub fn run_once(&self, max_swaps: usize) -> usize {
        let live: Vec<Arc<dyn Swappable>> = {
            let mut candidates = self.candidates.lock();
            candidates.retain(|weak| weak.upgrade().is_some_and(|item| !item.is_disposed()));
            candidates.iter().filter_map(Weak::upgrade).collect()
        };

        // Priorities are computed outside the registry lock; swap() does I/O.
        let mut ranked: Vec<(f64, Arc<dyn Swappable>)> = live
            .into_iter()
            .filter(|item| item.is_swappable())
            .map(|item| (item.swap_priority(), item))
            .filter(|(priority, _)| *priority > self.threshold)
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut swapped = 0;
        for (priority, item) in ranked.into_iter().take(max_swaps) {
            if item.swap() {
                debug!(priority, "scheduler swapped candidate");
                swapped += 1;
            }
        }
        swapped
    }

    /// Run `run_once` every `interval` on a background thread.
    pub fn spawn(self: &Arc<Self>, interval: Duration, max_per_tick: usize) -> SchedulerHandle {
        let (stop, stopped) = bounded::<()>(1);
        let scheduler = Arc::clone(self);
        let join = thread::Builder::new()
            .name("fragstore-swap".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        scheduler.run_once(max_per_tick);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        info!("swap scheduler stopped");
                        break;
                    }
                }
            })
            .map_err(|err| warn!(error = %err, "swap scheduler thread failed to start"))
            .ok();

        SchedulerHandle { stop: Some(stop), join }
    }
}

impl Default for SwapScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Stops the background scheduler thread when dropped.
pub struct SchedulerHandle {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// False when the thread could not be started or has exited
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Fake {
        priority: f64,
        swaps: AtomicUsize,
        disposed: AtomicBool,
    }

    impl Fake {
        fn new(priority: f64) -> Arc<Self> {
            Arc::new(Fake {
                priority,
                swaps: AtomicUsize::new(0),
                disposed: AtomicBool::new(false),
            })
        }
    }

    impl Swappable for Fake {
        fn is_swappable(&self) -> bool {
            true
        }
        fn swap_priority(&self) -> f64 {
            self.priority
        }
        fn swap(&self) -> bool {
            self.swaps.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
        fn is_disposed(&self) -> bool {
            self.disposed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn swaps_highest_priority_first() {
        let scheduler = SwapScheduler::new();
        let low = Fake::new(1.0);
        let high = Fake::new(5.0);
        let idle = Fake::new(0.0);
        scheduler.register(&low);
        scheduler.register(&high);
        scheduler.register(&idle);

        assert_eq!(scheduler.run_once(1), 1);
        assert_eq!(high.swaps.load(Ordering::SeqCst), 1);
        assert_eq!(low.swaps.load(Ordering::SeqCst), 0);
        assert_eq!(idle.swaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn forgets_dropped_and_disposed_items() {
        let scheduler = SwapScheduler::new();
        let kept = Fake::new(1.0);
        let gone = Fake::new(1.0);
        let disposed = Fake::new(1.0);
        scheduler.register(&kept);
        scheduler.register(&gone);
        scheduler.register(&disposed);
        drop(gone);
        disposed.dispose();

        assert_eq!(scheduler.run_once(10), 1);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn age_priority_is_monotone() {
        let policy = AgePriority::new(Duration::from_secs(1));
        let young = policy.priority(Duration::from_millis(10));
        let old = policy.priority(Duration::from_secs(10));
        assert!(young > 0.0);
        assert!(old > young);
    }

    #[test]
    fn background_thread_stops() {
        let scheduler = Arc::new(SwapScheduler::new());
        let item = Fake::new(1.0);
        scheduler.register(&item);
        let handle = scheduler.spawn(Duration::from_millis(5), 4);
        assert!(handle.is_running());
        thread::sleep(Duration::from_millis(50));
        handle.stop();
        assert!(item.swaps.load(Ordering::SeqCst) > 0);
    }
}
