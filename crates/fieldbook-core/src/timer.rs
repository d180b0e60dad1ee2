//! Cancellable timing primitives: injectable clock, cooldown windows, and a
//! superseding debouncer. No view-model logic reads the wall clock directly,
//! so all timing behavior is testable without real waits.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Millisecond clock source.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds. Only differences matter.
    fn now_millis(&self) -> i64;
}

/// Wall-clock implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        crate::util::unix_millis_now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct MockClock {
    now: AtomicI64,
}

impl MockClock {
    /// Start at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A re-armable cooldown window.
///
/// While armed, external cache-invalidation signals are ignored so a server
/// echo cannot clobber a just-made local change.
pub struct Cooldown {
    clock: Arc<dyn Clock>,
    until: AtomicI64,
}

impl Cooldown {
    /// Create a disarmed cooldown on the given clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            until: AtomicI64::new(0),
        }
    }

    /// Arm (or extend) the window for `millis` from now.
    pub fn arm(&self, millis: i64) {
        let until = self.clock.now_millis() + millis;
        self.until.fetch_max(until, Ordering::SeqCst);
    }

    /// Whether the window is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.clock.now_millis() < self.until.load(Ordering::SeqCst)
    }

    /// Explicitly end the window.
    pub fn disarm(&self) {
        self.until.store(0, Ordering::SeqCst);
    }
}

/// Debouncer that cancels the previously scheduled task when re-fired;
/// pending timers never stack.
pub struct Debouncer {
    delay: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Create a debouncer with a fixed delay.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            handle: Mutex::new(None),
        }
    }

    /// Schedule `task` after the delay, superseding any prior schedule.
    pub fn fire<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let new_handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        let mut handle = self.handle.lock().expect("debouncer lock poisoned");
        if let Some(prior) = handle.replace(new_handle) {
            prior.abort();
        }
    }

    /// Whether a task is scheduled and not yet run.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .expect("debouncer lock poisoned")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Cancel any scheduled task.
    pub fn cancel(&self) {
        if let Some(handle) = self
            .handle
            .lock()
            .expect("debouncer lock poisoned")
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cooldown_tracks_mock_clock() {
        let clock = Arc::new(MockClock::new());
        let cooldown = Cooldown::new(clock.clone());
        assert!(!cooldown.is_active());

        cooldown.arm(500);
        assert!(cooldown.is_active());

        clock.advance(499);
        assert!(cooldown.is_active());
        clock.advance(1);
        assert!(!cooldown.is_active());
    }

    #[test]
    fn cooldown_extends_never_shrinks() {
        let clock = Arc::new(MockClock::new());
        let cooldown = Cooldown::new(clock.clone());
        cooldown.arm(500);
        cooldown.arm(100);
        clock.advance(300);
        assert!(cooldown.is_active());

        cooldown.disarm();
        assert!(!cooldown.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_supersedes_prior_timers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(150));

        for _ in 0..5 {
            let counter = counter.clone();
            debouncer.fire(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::advance(Duration::from_millis(50)).await;
        }
        assert!(debouncer.is_armed());

        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_cancel_prevents_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(150));
        {
            let counter = counter.clone();
            debouncer.fire(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        debouncer.cancel();
        assert!(!debouncer.is_armed());

        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
