//! Cooperative stop + pause primitives for the meeting loop.
//!
//! The scheduler checks the stop token at every turn boundary and blocks
//! on the pause gate before each turn. `stop` opens the gate too, so a
//! paused loop wakes up, observes the flag, and drains into finalization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A stop flag that can be checked by the meeting loop.
#[derive(Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal a stop request.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Check if a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// A gate the scheduler blocks on while the meeting is paused.
///
/// `close` pauses, `open` resumes. Waiters re-check the flag after every
/// wake so an `open` between the check and the wait cannot be lost.
#[derive(Default)]
pub struct PauseGate {
    paused: AtomicBool,
    notify: Notify,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn open(&self) {
        self.paused.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Wait until the gate is open.
    pub async fn wait(&self) {
        loop {
            if !self.is_closed() {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after arming the waiter: `open` may have landed
            // between the flag check and `notified()`.
            if !self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn stop_token_lifecycle() {
        let token = StopToken::new();
        assert!(!token.is_stopped());
        token.stop();
        assert!(token.is_stopped());
    }

    #[test]
    fn stop_token_clone_shares_state() {
        let token = StopToken::new();
        let clone = token.clone();
        token.stop();
        assert!(clone.is_stopped());
    }

    #[tokio::test]
    async fn open_gate_does_not_block() {
        let gate = PauseGate::new();
        // Completes immediately.
        gate.wait().await;
    }

    #[tokio::test]
    async fn closed_gate_blocks_until_open() {
        let gate = Arc::new(PauseGate::new());
        gate.close();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.wait().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.open();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake after open")
            .unwrap();
    }

    #[tokio::test]
    async fn open_before_wait_is_not_lost() {
        let gate = PauseGate::new();
        gate.close();
        gate.open();
        gate.wait().await;
    }

    #[tokio::test]
    async fn reclose_blocks_again() {
        let gate = Arc::new(PauseGate::new());
        gate.close();
        gate.open();
        gate.wait().await;

        gate.close();
        assert!(gate.is_closed());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        gate.open();
        waiter.await.unwrap();
    }
}
