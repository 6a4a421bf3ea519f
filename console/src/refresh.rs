//! Periodic refresh for list screens in watch mode.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

/// Call `fetch` on every tick and forward each result until cancelled or the
/// receiver goes away. The first tick fires immediately.
///
/// Failed fetches are logged and retried on the next tick.
pub async fn poll_every<T, F, Fut>(
    interval: Duration,
    snapshots: mpsc::Sender<T>,
    cancel: CancellationToken,
    mut fetch: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = fetch() => result,
        };
        match result {
            Ok(snapshot) => {
                if snapshots.send(snapshot).await.is_err() {
                    break;
                }
                debug!("list refreshed");
            }
            Err(e) => warn!(error = %e, "list refresh failed"),
        }
    }
}
