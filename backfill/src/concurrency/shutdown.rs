use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
///
/// Every worker subscribes to the same sender, so a single [`ShutdownTx::shutdown`] call reaches
/// all of them.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Sends the shutdown signal to all subscribers.
    ///
    /// Fails only when no receiver is alive, meaning no worker is running.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Creates a new receiver that observes signals sent after this call.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiver side of the shutdown channel.
///
/// A change notification on the receiver means shutdown was requested.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new shutdown channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}

/// Returns `true` when shutdown was requested and not yet consumed by this receiver.
///
/// A closed channel counts as a shutdown request, since no one can resume the worker anymore.
pub fn is_shutdown_requested(shutdown_rx: &ShutdownRx) -> bool {
    shutdown_rx.has_changed().unwrap_or(true)
}
