use portable_atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Cooperative run control shared between a controller and its run.
///
/// Cancellation is a sticky flag polled at every trial and batch boundary.
/// Pause is a gate the orchestrator waits on between batches only; a pause
/// requested mid-batch takes effect once that batch finishes.
#[derive(Debug)]
pub struct RunSignal {
    canceled: AtomicBool,
    paused: watch::Sender<bool>,
}

impl RunSignal {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            canceled: AtomicBool::new(false),
            paused,
        }
    }

    /// Also opens the pause gate so a paused run can unwind.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        self.paused.send_replace(false);
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        if !self.is_canceled() {
            self.paused.send_replace(true);
        }
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Returns immediately unless paused; otherwise waits for resume or cancel.
    pub async fn wait_if_paused(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for RunSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_sticky() {
        let s = RunSignal::new();
        assert!(!s.is_canceled());
        s.cancel();
        s.resume();
        assert!(s.is_canceled());
    }

    #[test]
    fn test_pause_ignored_after_cancel() {
        let s = RunSignal::new();
        s.cancel();
        s.pause();
        assert!(!s.is_paused());
    }

    #[tokio::test]
    async fn test_wait_returns_when_not_paused() {
        let s = RunSignal::new();
        tokio::time::timeout(Duration::from_millis(50), s.wait_if_paused())
            .await
            .expect("should not block");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_resume() {
        let s = Arc::new(RunSignal::new());
        s.pause();

        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.wait_if_paused().await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished(), "should still be gated");

        s.resume();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("resume should release the gate")
            .expect("task");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_gate() {
        let s = Arc::new(RunSignal::new());
        s.pause();
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.wait_if_paused().await })
        };
        s.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel should release the gate")
            .expect("task");
    }
}
