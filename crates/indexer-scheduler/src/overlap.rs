//! Overlap control for scheduled runs.
//!
//! A drain job's cron tick can fire while the previous drain of the same
//! shard is still running. The guard drops such a tick, which is what keeps
//! every shard single-owner inside a process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tracks whether a job is running.
#[derive(Debug, Default)]
pub struct OverlapGuard {
    running: Arc<AtomicBool>,
}

impl OverlapGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the job for one run, or `None` while the previous run is active.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard {
                flag: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Clears the running flag on drop, including when the job panics.
#[derive(Debug)]
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_second_run() {
        let guard = OverlapGuard::new();

        let first = guard.try_acquire();
        assert!(first.is_some());
        assert!(guard.is_running());
        assert!(guard.try_acquire().is_none());

        drop(first);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_released_after_panic() {
        let guard = Arc::new(OverlapGuard::new());
        let inner = Arc::clone(&guard);

        let result = std::thread::spawn(move || {
            let _run = inner.try_acquire().unwrap();
            panic!("drain blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!guard.is_running());
    }

    #[test]
    fn test_exclusive_under_contention() {
        let guard = Arc::new(OverlapGuard::new());
        let held = guard.try_acquire().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.try_acquire().is_some())
            })
            .collect();
        let acquired = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();

        assert_eq!(acquired, 0);
        drop(held);
    }
}
