use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Notify;

/// Join counter for a fixed set of workers. Each worker calls
/// [`CountDownLatch::count_down`] exactly once, whatever its outcome; the
/// orchestrator waits until the count reaches zero.
#[derive(Debug)]
pub struct CountDownLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            notify: Notify::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn count_down(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.notify.notify_waiters();
        }
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Returns `false` if the count did not reach zero within `timeout`.
    pub async fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}
