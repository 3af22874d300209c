//! Process-wide shutdown signal.
//!
//! A `watch` channel carrying a single boolean. The trigger side is owned by
//! `main` (Ctrl+C and SIGTERM); every blocking point in the engine and the
//! exchange client holds a cloned [`Shutdown`] and races its work against
//! [`Shutdown::wait`].

use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Fires the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Observes the shutdown signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a linked trigger/observer pair.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // send_replace never fails, even with no live receivers.
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// An observer whose signal never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal has fired. Pends forever if the trigger was
    /// dropped without firing.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Fire `trigger` once `signal` resolves.
pub fn trigger_on<F>(trigger: ShutdownTrigger, signal: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        trigger.trigger();
    })
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM. The SIGTERM listener is
/// registered before this returns.
pub fn termination_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(async move {
        #[cfg(unix)]
        let terminate = async move {
            sigterm.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => info!("Ctrl+C received, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
            },
            _ = terminate => info!("SIGTERM received, shutting down"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let (trigger, shutdown) = channel();
        assert!(!shutdown.is_triggered());

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns_immediately() {
        let (trigger, shutdown) = channel();
        trigger.trigger();
        tokio::time::timeout(Duration::from_millis(50), shutdown.wait())
            .await
            .expect("already triggered");
    }

    #[tokio::test]
    async fn test_trigger_on_fires_when_signal_resolves() {
        let (trigger, shutdown) = channel();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = trigger_on(trigger, async move {
            let _ = rx.await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!shutdown.is_triggered());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .expect("signal should trigger shutdown");
        handle.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let (trigger, shutdown) = channel();
        trigger_on(trigger, termination_signal().unwrap());

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(2), shutdown.wait())
            .await
            .expect("SIGTERM should trigger shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_does_not_fire() {
        let shutdown = Shutdown::never();
        let res = tokio::time::timeout(Duration::from_secs(5), shutdown.wait()).await;
        assert!(res.is_err());
        assert!(!shutdown.is_triggered());
    }
}
