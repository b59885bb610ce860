use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Whether the monitor should keep polling.
///
/// Starts out running and is cleared once, typically by [`RunState::stop_on_signal`]. Clones
/// share the same flag.
#[derive(Clone, Debug)]
pub struct RunState {
    running: Arc<watch::Sender<bool>>,
}

impl RunState {
    pub fn new() -> Self {
        let (running, _) = watch::channel(true);
        Self {
            running: Arc::new(running),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Request shutdown
    pub fn stop(&self) {
        self.running.send_replace(false);
    }

    /// Resolves once shutdown has been requested
    pub async fn stopped(&self) {
        let mut rx = self.running.subscribe();
        // The sender is owned by `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Spawn a task that requests shutdown on SIGINT or SIGTERM.
    ///
    /// The handler does nothing but clear the flag; the monitor notices at its next check.
    pub fn stop_on_signal(&self) -> std::io::Result<()> {
        let state = self.clone();
        let shutdown = shutdown_signal()?;
        tokio::spawn(async move {
            shutdown.await;
            info!("Received shutdown signal");
            state.stop();
        });
        Ok(())
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}

#[cfg(test)]
use std::time::Duration;

#[test]
fn test_starts_running() {
    assert!(RunState::new().is_running());
}

#[test]
fn test_stop_is_shared_between_clones() {
    let state = RunState::new();
    let other = state.clone();
    other.stop();
    assert!(!state.is_running());
    state.stop();
    assert!(!state.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stopped_resolves_after_stop() {
    let state = RunState::new();
    let waiter = {
        let state = state.clone();
        tokio::spawn(async move { state.stopped().await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!waiter.is_finished());

    state.stop();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_stopped_resolves_immediately_when_already_stopped() {
    let state = RunState::new();
    state.stop();
    state.stopped().await;
}
