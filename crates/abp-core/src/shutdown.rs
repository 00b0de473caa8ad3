//! Cooperative cancellation for the run loops.
//!
//! Every driver selects on [`Shutdown::triggered`] next to its transport wait,
//! so a termination request is observed at the loop's suspension points and
//! the loop returns [`Completion::Cancelled`] instead of the process exiting
//! from inside a signal handler.

use tokio::sync::watch;

/// How a run loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// End of input (sender) or end-of-stream datagram (receiver).
    Finished,
    /// The shutdown trigger fired.
    Cancelled,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// A handle that never fires.
    pub fn never() -> Self {
        channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the trigger has fired. If the trigger is dropped without
    /// firing, this never resolves.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn triggered_resolves_after_trigger() {
        let (trigger, mut shutdown) = channel();
        assert!(!shutdown.is_triggered());
        trigger.trigger();
        shutdown.triggered().await;
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn clones_observe_the_same_trigger() {
        let (trigger, shutdown) = channel();
        let mut a = shutdown.clone();
        let mut b = shutdown;
        trigger.trigger();
        a.triggered().await;
        b.triggered().await;
    }

    #[tokio::test(start_paused = true)]
    async fn never_does_not_resolve() {
        let mut shutdown = Shutdown::never();
        let waited = tokio::time::timeout(Duration::from_secs(5), shutdown.triggered()).await;
        assert!(waited.is_err());
    }
}
