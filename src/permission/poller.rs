use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const POLL_INTERVAL_MS: u64 = 200;

/// Spawn the periodic permission poll loop.
///
/// The poll future is awaited to completion before the next tick is
/// considered, so at most one poll is ever in flight. Each yielded request
/// is forwarded on `tx`; poll errors are skipped (the next tick retries).
/// Cancelling the token stops the loop; dropping the receiver does too.
pub fn spawn_permission_poller<F, Fut>(
    interval: Duration,
    cancel: CancellationToken,
    mut poll: F,
    tx: mpsc::UnboundedSender<Value>,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<Value>>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Ok(Some(request)) = poll().await {
                        if tx.send(request).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    })
}
