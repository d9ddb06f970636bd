//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::hub::Hub;
use crate::hub::connection::CloseReason;

/// Default timeout for graceful shutdown before aborting tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown across all server tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Drain client connections before stopping.
    ///
    /// 1. Put the hub into draining (no new attaches, inbound rejected)
    /// 2. Wait up to `grace` for every connection to flush and detach
    /// 3. Close whatever is left with the restart close code
    ///
    /// Returns `true` if every connection drained within the grace.
    pub async fn drain(&self, hub: &Hub, grace: Duration) -> bool {
        hub.begin_drain();
        let drained = hub.await_drained(grace).await;
        if drained {
            info!("all connections drained");
        } else {
            let closed = hub.close_all(CloseReason::ServerRestart);
            warn!(closed, "drain grace of {grace:?} elapsed, closing remaining connections");
        }
        drained
    }

    /// Perform a graceful shutdown of all tracked tasks.
    ///
    /// 1. Cancel the shutdown token (signals all tasks)
    /// 2. Wait up to `timeout` for all handles to complete
    /// 3. Abort any remaining tasks after timeout
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let aborts: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, aborting remaining tasks");
            for handle in aborts {
                handle.abort();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mockpilot_bus::{BufferedPublisher, LocalBus, SharedBus};
    use mockpilot_core::SessionId;

    use crate::hub::HubConfig;

    fn hub() -> Hub {
        let bus: SharedBus = Arc::new(LocalBus::new(16));
        Hub::new(HubConfig::default(), Arc::new(BufferedPublisher::new(bus, 4)))
    }

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_sets_flag() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn token_propagates_cancel() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_waits_for_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });
        coord
            .graceful_shutdown(vec![handle], Some(Duration::from_secs(1)))
            .await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_aborts_stuck_tasks() {
        let coord = ShutdownCoordinator::new();
        let stuck = tokio::spawn(std::future::pending::<()>());
        let abort = stuck.abort_handle();
        coord
            .graceful_shutdown(vec![stuck], Some(Duration::from_millis(50)))
            .await;
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn drain_with_no_connections_is_immediate() {
        let coord = ShutdownCoordinator::new();
        let hub = hub();
        assert!(coord.drain(&hub, Duration::from_secs(1)).await);
        assert!(hub.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_closes_stragglers_after_grace() {
        let coord = ShutdownCoordinator::new();
        let hub = hub();
        let conn = hub.attach(SessionId::from("S")).unwrap();
        assert!(!coord.drain(&hub, Duration::from_millis(100)).await);
        assert_eq!(conn.close_reason(), Some(CloseReason::ServerRestart));
    }
}
