//! Periodic archive purge.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::gateway::AuthorityGateway;
use crate::types::Authority;

/// Spawns a task that runs [`AuthorityGateway::purge_archived`] every
/// `interval`. Errors are logged and the task keeps running.
///
/// Abort the returned handle to stop it.
pub fn spawn_archive_purger<E: Authority>(
    gateway: Arc<AuthorityGateway<E>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = gateway.purge_archived().await {
                tracing::error!(kind = %E::KIND, error = %e, "archive purge failed");
            }
        }
    })
}
