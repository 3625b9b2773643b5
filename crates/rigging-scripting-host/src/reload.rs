use tokio::sync::watch;
use tracing::info;

/// Why a reload was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    /// SIGUSR2 was received
    Signal,
    /// The scanner saw files being added, changed, or removed
    FilesChanged,
}

/// Counts SIGUSR2 deliveries
///
/// Each signal bumps the generation, so `changed()` on the receiver resolves
/// once per signal burst without the sender having to reset anything.
#[cfg(unix)]
pub fn spawn_reload_signal_listener() -> watch::Receiver<u64> {
    let (reload_tx, reload_rx) = watch::channel(0u64);

    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigusr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "scripting", "Failed to register SIGUSR2 handler: {}", e);
                return;
            }
        };

        while sigusr2.recv().await.is_some() {
            info!(target: "scripting", "Received SIGUSR2, requesting script reload");
            reload_tx.send_modify(|generation| *generation += 1);

            if reload_tx.is_closed() {
                info!(target: "scripting", "Reload receiver dropped, stopping SIGUSR2 handler");
                break;
            }
        }
    });

    reload_rx
}

/// Non-Unix platforms have no SIGUSR2, so the generation never changes
#[cfg(not(unix))]
pub fn spawn_reload_signal_listener() -> watch::Receiver<u64> {
    let (reload_tx, reload_rx) = watch::channel(0u64);
    tracing::warn!(target: "scripting", "SIGUSR2 reload not supported on this platform");
    tokio::spawn(async move {
        reload_tx.closed().await;
    });
    reload_rx
}
