use tokio::signal::unix::SignalKind;

/// Resolves with the name of the first SIGINT/SIGTERM received.
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}
