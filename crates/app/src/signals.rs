//! Signal handling that degrades gracefully: SIGTERM and SIGINT both trigger
//! an orderly shutdown on unix; platforms without `SIGTERM` fall back to
//! ctrl-c alone rather than failing to start (spec §5).

use tracing::info;

pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                info!(error = %e, "could not install SIGTERM handler, relying on ctrl-c only");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
