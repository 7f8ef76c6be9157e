//! Completion signals
//!
//! A `Signal` is a binary event: the link reader sets it when a frame shows
//! that something happened, and an action step waits for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Binary event shared between the link reader and waiting tasks
#[derive(Debug)]
pub struct Signal {
    name: &'static str,
    flag: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Create a cleared signal
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Set the signal and wake every waiter
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Reset the signal
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Whether the signal is currently set
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Wait until the signal is set
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking the flag so a concurrent set is not missed
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Wait until the signal is set or the timeout elapses; returns whether it was set
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_returns_when_already_set() {
        let signal = Signal::new("test");
        signal.set();
        signal.wait().await;
        assert!(signal.is_set());
    }

    #[tokio::test]
    async fn test_set_wakes_waiter() {
        let signal = Arc::new(Signal::new("test"));
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;
        signal.set();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_expires() {
        let signal = Signal::new("test");
        assert!(!signal.wait_timeout(Duration::from_millis(50)).await);
        signal.set();
        assert!(signal.wait_timeout(Duration::from_millis(50)).await);
    }

    #[test]
    fn test_clear() {
        let signal = Signal::new("test");
        signal.set();
        signal.clear();
        assert!(!signal.is_set());
    }
}
