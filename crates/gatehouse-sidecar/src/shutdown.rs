//! Graceful shutdown.
//!
//! [`ShutdownSignal`] fans a single trigger (SIGTERM, SIGINT or a manual
//! call) out to the accept loop and every connection task.
//! [`ConnectionTracker`] counts open connections so the server can wait
//! for in-flight requests before exiting.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{broadcast, Notify};

/// Cloneable shutdown trigger.
///
/// ```
/// use gatehouse_sidecar::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let observer = shutdown.clone();
/// shutdown.trigger();
/// assert!(observer.is_shutdown());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Creates a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Triggers shutdown. Idempotent.
    pub fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` if shutdown has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Future completing once shutdown is triggered, immediately if it
    /// already was.
    pub fn recv(&self) -> ShutdownReceiver {
        ShutdownReceiver {
            triggered: Arc::clone(&self.triggered),
            receiver: self.sender.subscribe(),
        }
    }

    /// Signal triggered by SIGTERM or SIGINT (Ctrl+C elsewhere).
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            wait_for_os_signal().await;
            trigger.trigger();
        });

        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Created by [`ShutdownSignal::recv`].
pub struct ShutdownReceiver {
    triggered: Arc<AtomicBool>,
    receiver: broadcast::Receiver<()>,
}

impl Future for ShutdownReceiver {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.triggered.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }
        match Pin::new(&mut self.receiver).poll_recv(cx) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

// A signal handler that cannot be installed leaves the future pending:
// the sidecar keeps serving and can still be stopped with `trigger`.
async fn wait_for_os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "failed to register signal handlers");
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to wait for Ctrl+C");
            return std::future::pending().await;
        }
        tracing::info!("received Ctrl+C, shutting down");
    }
}

/// Counts open connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection until the token is dropped.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until every token has been dropped.
    pub async fn wait_for_shutdown(&self) {
        loop {
            let notified = self.notify.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// An open connection.
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}
