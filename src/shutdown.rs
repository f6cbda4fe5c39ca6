use tokio::sync::broadcast;

pub type ShutdownSender = broadcast::Sender<()>;
pub type ShutdownReceiver = broadcast::Receiver<()>;

/// Broadcast channel size for shutdown notifications (single signal fan-out).
const SHUTDOWN_CHANNEL_CAPACITY: usize = 1;

#[must_use]
pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    broadcast::channel::<()>(SHUTDOWN_CHANNEL_CAPACITY)
}

/// Spawn a task that broadcasts on the shutdown channel once the process
/// receives a termination signal. The task also ends quietly if somebody
/// else broadcasts first.
pub fn setup_signal_shutdown_handler(shutdown_tx: &ShutdownSender) -> tokio::task::JoinHandle<()> {
    // Subscribe before spawning so a broadcast can never race the task
    // startup.
    let mut shutdown_rx = shutdown_tx.subscribe();
    let shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_rx.recv() => {}
            () = wait_for_termination() => {
                drop(shutdown_tx.send(()));
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            tracing::warn!("SIGTERM handler unavailable ({}), watching Ctrl+C only", err);
            drop(tokio::signal::ctrl_c().await);
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    drop(tokio::signal::ctrl_c().await);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use std::time::Duration;

    #[test]
    fn handler_ends_when_shutdown_is_broadcast() -> AppResult<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| AppError::Message(format!("Failed to build runtime: {}", err)))?;
        runtime.block_on(async {
            let (shutdown_tx, _keep_alive) = shutdown_channel();
            let handle = setup_signal_shutdown_handler(&shutdown_tx);

            // The handler subscribed before spawning, so an immediate
            // broadcast must reach it.
            shutdown_tx
                .send(())
                .map_err(|err| AppError::Message(format!("Broadcast failed: {}", err)))?;

            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .map_err(|err| AppError::Message(format!("Handler never exited: {}", err)))?
                .map_err(|err| AppError::Message(format!("Handler panicked: {}", err)))?;
            Ok(())
        })
    }
}
