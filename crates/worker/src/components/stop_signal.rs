use tokio::sync::watch;

/// Resolves once `true` is published on `stop`. Pends forever when the sender
/// is gone without having requested a stop.
pub async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// A receiver that never signals a stop.
pub fn detached() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}
