//! Progress reporting for long multi-item passes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Progress observer: `(done, total)`. Called from worker threads.
pub type ProgressFn<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// A shared counter that forwards every advance to an optional observer.
pub struct Progress<'a> {
    done: AtomicU64,
    total: u64,
    callback: Option<&'a ProgressFn<'a>>,
}

impl<'a> Progress<'a> {
    pub fn new(total: u64, callback: Option<&'a ProgressFn<'a>>) -> Self {
        Self {
            done: AtomicU64::new(0),
            total,
            callback,
        }
    }

    pub fn advance(&self, amount: u64) {
        let done = self.done.fetch_add(amount, Ordering::Relaxed) + amount;
        if let Some(callback) = self.callback {
            callback(done.min(self.total), self.total);
        }
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_advance_reports_running_total() {
        let seen = Mutex::new(Vec::new());
        let callback = |done: u64, total: u64| seen.lock().unwrap().push((done, total));
        let progress = Progress::new(10, Some(&callback as &ProgressFn<'_>));
        progress.advance(4);
        progress.advance(6);
        assert_eq!(progress.done(), 10);
        assert_eq!(*seen.lock().unwrap(), vec![(4, 10), (10, 10)]);
    }

    #[test]
    fn test_without_observer() {
        let progress = Progress::new(3, None);
        progress.advance(2);
        assert_eq!(progress.done(), 2);
        assert_eq!(progress.total(), 3);
    }
}
