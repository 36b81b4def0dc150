//! Cross-task wake notifier.
//!
//! A session task blocks in one combined `select!` over socket readiness and
//! this notifier; any other task or thread can interrupt that wait
//! deterministically. Wakes issued before the waiter drains coalesce to at
//! least one observed wake — the failure mode that matters is a wake observed
//! zero times, and that cannot happen.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Notify;

/// Wakeable handle shared between one waiter and any number of wakers.
///
/// Cloning shares the underlying primitive; all clones wake the same waiter.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    inner: Arc<Notify>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiter. Callable from any task or thread; if no wait is in
    /// progress the wake is stored and the next wait returns immediately.
    pub fn wake(&self) {
        self.inner.notify_one();
    }

    /// Consume every pending wake so that a subsequent wait blocks until a
    /// new [`Notifier::wake`].
    pub fn drain(&self) {
        while self.inner.notified().now_or_never().is_some() {}
    }

    /// Wait until woken. Completes immediately if a wake is already pending.
    /// Compose into `tokio::select!` alongside socket readiness.
    pub async fn notified(&self) {
        self.inner.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn wake_before_wait_is_not_lost() {
        let n = Notifier::new();
        n.wake();
        timeout(Duration::from_millis(100), n.notified())
            .await
            .expect("pending wake must complete the wait immediately");
    }

    #[tokio::test]
    async fn wakes_coalesce_to_at_least_one() {
        let n = Notifier::new();
        n.wake();
        n.wake();
        n.wake();
        timeout(Duration::from_millis(100), n.notified())
            .await
            .expect("coalesced wakes must still be observed once");
    }

    #[tokio::test]
    async fn drain_rearms_the_wait() {
        let n = Notifier::new();
        n.wake();
        n.wake();
        n.drain();
        assert!(
            timeout(Duration::from_millis(50), n.notified()).await.is_err(),
            "drained notifier must block until a new wake"
        );

        n.wake();
        timeout(Duration::from_millis(100), n.notified())
            .await
            .expect("wake after drain must be observed");
    }

    #[tokio::test]
    async fn wake_from_another_task_unblocks_waiter() {
        let n = Notifier::new();
        let waker = n.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waker.wake();
        });
        timeout(Duration::from_secs(1), n.notified())
            .await
            .expect("cross-task wake must interrupt the wait");
        handle.await.unwrap();
    }
}
