use log::{error, info};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::coordinator::UpdateCoordinator;

/// Runs an update check every `period` until `shutdown` resolves.
///
/// The first check happens one period after the call. A failed pass is
/// logged and the loop continues. Returns the number of completed passes.
#[tracing::instrument(skip(coordinator, shutdown))]
pub async fn watch<F>(coordinator: &UpdateCoordinator, period: Duration, shutdown: F) -> usize
where
    F: Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut passes = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Stopping update checks after {} passes", passes);
                return passes;
            }
            _ = ticker.tick() => {
                match coordinator.check_updates().await {
                    Ok(summary) => info!("Periodic update check: {:?}", summary),
                    Err(e) => error!("Periodic update check failed: {}", e),
                }
                passes += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::MockForgeClient;
    use crate::ledger::MockLedgerStore;
    use crate::observer::MockObserverSink;
    use std::sync::Arc;

    fn empty_coordinator() -> UpdateCoordinator {
        // Nothing is tracked, so a check pass never reaches a collaborator.
        UpdateCoordinator::new(
            Arc::new(MockForgeClient::new()),
            Box::new(MockLedgerStore::new()),
            Arc::new(MockObserverSink::new()),
        )
    }

    #[tokio::test]
    async fn test_watch_stops_on_shutdown() {
        let coordinator = empty_coordinator();
        let passes = watch(&coordinator, Duration::from_secs(3600), async {}).await;
        assert_eq!(passes, 0);
    }

    #[tokio::test]
    async fn test_watch_runs_periodically() {
        let coordinator = empty_coordinator();
        let shutdown = tokio::time::sleep(Duration::from_millis(200));
        let passes = watch(&coordinator, Duration::from_millis(20), shutdown).await;
        assert!(passes >= 2, "only {} passes", passes);
    }
}
