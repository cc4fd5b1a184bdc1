//! Background expiry of connections that have waited too long for a partner.
//!
//! Off by default: with `wait_timeout_secs = 0` nobody ever times out.

use std::time::Duration;
use tokio::task::JoinHandle;

use crate::Broker;

/// Spawn the sweeper if a wait timeout is configured.
///
/// Every `every`, waiters older than `timeout` are returned to idle and sent
/// `match-timeout`.
pub fn spawn_wait_sweeper(
    broker: Broker,
    timeout: Duration,
    every: Duration,
) -> Option<JoinHandle<()>> {
    if timeout.is_zero() {
        return None;
    }
    let every = every.max(Duration::from_millis(100));

    tracing::info!(
        timeout_secs = timeout.as_secs(),
        every_secs = every.as_secs(),
        "Wait-timeout sweeper enabled"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let expired = broker.expire_waiting(timeout).await;
            if !expired.is_empty() {
                tracing::info!(count = expired.len(), "Expired waiting connections");
            }
        }
    }))
}
