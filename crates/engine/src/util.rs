//! Channel helpers for helper tasks.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sends `item`, blocking until the send succeeds or the quit signal fires.
/// Returns `false` if the daemon is shutting down or the receiver is gone.
pub(crate) async fn push_or_quit<T: Send>(
    sender: &mpsc::Sender<T>,
    item: T,
    quit: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = quit.cancelled() => false,
        res = sender.send(item) => res.is_ok(),
    }
}
