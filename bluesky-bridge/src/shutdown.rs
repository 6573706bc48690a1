use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Install the SIGTERM handler up front so a failure surfaces at startup, then
/// cancel `token` on the first SIGINT or SIGTERM.
pub fn spawn_signal_listener(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    let sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        wait_for_shutdown_signal(sigterm).await;
        info!("shutdown requested, finishing current work");
        token.cancel();
    }))
}

async fn wait_for_shutdown_signal(mut sigterm: Signal) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}
