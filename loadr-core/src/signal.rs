use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot stop flag fanned out to every scheduler and worker. Stopping is
/// idempotent and never blocks the caller.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub async fn stopped(&self) {
        while !self.is_stopped() {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn stopped_resolves_after_stop() {
        let signal = Arc::new(StopSignal::new());

        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.stopped().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.stop();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap_or_else(|_| panic!("stopped did not resolve"))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn stopped_resolves_immediately_when_already_stopped() {
        let signal = StopSignal::new();
        signal.stop();
        signal.stopped().await;
    }
}
