use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

/// Installs the SIGINT/SIGTERM/SIGQUIT handler. The first signal flips the
/// returned watch channel for a graceful stop; a second signal exits the
/// process immediately.
pub fn listen() -> anyhow::Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
            _ = quit.recv() => {}
        }
        tracing::info!("shutdown signal received; finishing in-flight work");
        let _ = tx.send(true);

        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
            _ = quit.recv() => {}
        }
        tracing::warn!("second shutdown signal; exiting immediately");
        std::process::exit(130);
    });

    Ok(rx)
}
