//! Process-wide shutdown flag
//!
//! Written by the signal handler and the local "shutdown" command, read by the
//! router loop, the run poller and calibration. A single producer flips it
//! once, so an atomic is enough for visibility; the [`Notify`] wakes anything
//! parked on [`ShutdownSignal::wait`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Cloneable handle to the shutdown flag
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    /// Create an untriggered signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Later calls are no-ops.
    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            tracing::info!("shutdown requested");
        }
        self.notify.notify_waiters();
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Shared flag, for threads that cannot await
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Wait until shutdown is requested
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// Trigger on Ctrl-C (and SIGTERM on unix)
    pub fn install_signal_handlers(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                signal.trigger();
            }
        });

        #[cfg(unix)]
        {
            let signal = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{SignalKind, signal as unix_signal};
                match unix_signal(SignalKind::terminate()) {
                    Ok(mut term) => {
                        if term.recv().await.is_some() {
                            tracing::info!("terminate received");
                            signal.trigger();
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_returns_after_trigger() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::task::yield_now().await;
        signal.trigger();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_after_trigger_is_immediate() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();
        signal.wait().await;
        assert!(signal.flag().load(Ordering::SeqCst));
    }
}
