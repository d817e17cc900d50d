use tokio::select;
use tokio_util::sync::CancellationToken;

/// Resolves the token when the process is asked to terminate.
///
/// SIGTERM is handled alongside Ctrl-C because that is what `focuslog stop`
/// sends; the daemon then still gets its bounded final flush.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install the SIGTERM handler");
        select! {
            _ = tokio::signal::ctrl_c() => cancelation.cancel(),
            _ = terminate.recv() => cancelation.cancel(),
        };
    }
    #[cfg(not(unix))]
    select! {
        _ = tokio::signal::ctrl_c() => cancelation.cancel(),
    };
}
