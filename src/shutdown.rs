//! Cooperative shutdown signalling
//!
//! A `ShutdownTrigger` fires once; every `ShutdownSignal` cloned from it
//! observes the trigger at its next `wait()` point. Tasks never get
//! cancelled mid-operation, they check the signal between units of work.

use tokio::sync::watch;

/// Sending half of a shutdown channel
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half of a shutdown channel
///
/// Clone is cheap; every clone observes the same trigger.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger/signal pair
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    /// Fire the trigger. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Create another signal observing this trigger
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    /// Whether shutdown has been requested
    #[cfg(test)]
    pub(crate) fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested
    ///
    /// Also returns if the trigger is dropped without firing, since nothing
    /// could ever request shutdown afterwards.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Owned variant of [`ShutdownSignal::wait`], for `'static` futures
    pub async fn wait_owned(mut self) {
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_after_trigger() {
        let (trigger, signal) = channel();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(signal.clone().wait_owned());
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .expect("waiter should not panic");
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_signal_created_after_trigger_sees_it() {
        let (trigger, _signal) = channel();
        trigger.trigger();

        let mut late = trigger.signal();
        tokio::time::timeout(Duration::from_millis(100), late.wait())
            .await
            .expect("late signal should already be triggered");
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let (trigger, mut signal) = channel();
        drop(trigger);

        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("dropped trigger should release waiters");
    }
}
