//! Scoped deadline for upstream calls
//!
//! `Deadline::arm` starts a timer task that flips a watch signal when the
//! budget runs out. The returned `DeadlineGuard` aborts the timer when it is
//! dropped, so a finished call can never be cancelled late. The guard moves
//! along with a streamed body and is released when the body is.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Read side of an armed deadline
#[derive(Debug, Clone)]
pub struct Deadline {
    signal: watch::Receiver<bool>,
    timeout: Duration,
}

/// Keeps the timer alive; dropping it disarms the deadline
#[derive(Debug)]
pub struct DeadlineGuard {
    timer: JoinHandle<()>,
}

/// Returned by [`Deadline::within`] when the deadline fired first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired;

impl Deadline {
    /// Arm a deadline that fires after `timeout`
    pub fn arm(timeout: Duration) -> (Deadline, DeadlineGuard) {
        let (tx, rx) = watch::channel(false);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(true);
        });

        (
            Deadline {
                signal: rx,
                timeout,
            },
            DeadlineGuard { timer },
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_expired(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves when the deadline fires; pends forever once disarmed
    pub async fn expired(&self) {
        let mut signal = self.signal.clone();
        loop {
            if *signal.borrow_and_update() {
                return;
            }
            if signal.changed().await.is_err() {
                if *signal.borrow() {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` unless the deadline fires first
    pub async fn within<F: Future>(&self, fut: F) -> Result<F::Output, Expired> {
        tokio::select! {
            biased;
            _ = self.expired() => Err(Expired),
            out = fut => Ok(out),
        }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
