//! # Termination signal listener.
//!
//! [`termination_signal`] resolves with the name of the first signal received:
//! `SIGINT`, `SIGTERM` or `SIGQUIT` on unix, Ctrl-C elsewhere. A listener that
//! cannot be registered is logged and never fires; the others keep working.

#[cfg(unix)]
pub(crate) async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let listen = |kind: SignalKind, name: &'static str| async move {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
                name
            }
            Err(e) => {
                tracing::warn!(signal = name, error = %e, "cannot listen for signal");
                std::future::pending().await
            }
        }
    };

    tokio::select! {
        name = listen(SignalKind::interrupt(), "SIGINT") => name,
        name = listen(SignalKind::terminate(), "SIGTERM") => name,
        name = listen(SignalKind::quit(), "SIGQUIT") => name,
    }
}

#[cfg(not(unix))]
pub(crate) async fn termination_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    "ctrl-c"
}
