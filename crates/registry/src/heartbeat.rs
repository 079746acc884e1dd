//! Heartbeat monitor (C6): periodically sweeps the registry and disconnects
//! sessions that have exceeded their activity timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::session::now_millis;
use crate::ConnectionRegistry;

/// Tunables for the heartbeat sweep, defaulting to the values named in §4.6.
#[derive(Clone, Copy, Debug)]
pub struct HeartbeatConfig {
    /// A session with no activity for longer than this is disconnected.
    pub timeout: Duration,
    /// How often the sweep runs; the design recommends `timeout / 3`.
    pub sweep_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        let timeout = Duration::from_secs(45);
        HeartbeatConfig {
            timeout,
            sweep_interval: timeout / 3,
        }
    }
}

/// Runs the heartbeat sweep loop until `cancel` fires.
///
/// On every tick, every session whose `now - last_activity` exceeds
/// `config.timeout` is disconnected (which cancels its token, per
/// [`crate::ClientSession::disconnect`]) and removed from the registry — the
/// owning connection task is expected to observe the cancellation and tear
/// down its socket.
pub async fn run_heartbeat_sweep(
    registry: Arc<ConnectionRegistry>,
    config: HeartbeatConfig,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.sweep_interval);
    let timeout_millis = config.timeout.as_millis() as u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("heartbeat sweep shutting down");
                break;
            }
            _ = ticker.tick() => {
                let now = now_millis();
                for session in registry.snapshot() {
                    let elapsed = now.saturating_sub(session.last_activity_millis());
                    if elapsed > timeout_millis {
                        tracing::warn!(
                            client_id = session.id,
                            elapsed_ms = elapsed,
                            "heartbeat timeout, disconnecting client"
                        );
                        session.disconnect();
                        registry.unregister(session.id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transport;
    use std::time::Duration as StdDuration;

    #[tokio::test(start_paused = true)]
    async fn sweep_disconnects_sessions_past_timeout() {
        let registry = Arc::new(ConnectionRegistry::new("/tmp/relay-heartbeat-test"));
        let session = registry.register(Transport::Plain);
        let cancel = CancellationToken::new();

        let config = HeartbeatConfig {
            timeout: Duration::from_millis(50),
            sweep_interval: Duration::from_millis(10),
        };

        let sweep_cancel = cancel.clone();
        let sweep_registry = Arc::clone(&registry);
        let handle = tokio::spawn(run_heartbeat_sweep(sweep_registry, config, sweep_cancel));

        tokio::time::advance(StdDuration::from_millis(200)).await;
        tokio::time::sleep(StdDuration::from_millis(1)).await;

        assert!(session.cancel.is_cancelled());
        assert!(registry.lookup(session.id).is_none());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_leaves_active_sessions_connected() {
        let registry = Arc::new(ConnectionRegistry::new("/tmp/relay-heartbeat-test-2"));
        let session = registry.register(Transport::Plain);
        let cancel = CancellationToken::new();

        let config = HeartbeatConfig {
            timeout: Duration::from_secs(45),
            sweep_interval: Duration::from_millis(10),
        };

        let sweep_cancel = cancel.clone();
        let sweep_registry = Arc::clone(&registry);
        let handle = tokio::spawn(run_heartbeat_sweep(sweep_registry, config, sweep_cancel));

        tokio::time::advance(StdDuration::from_millis(100)).await;
        tokio::time::sleep(StdDuration::from_millis(1)).await;

        assert!(!session.cancel.is_cancelled());
        assert!(registry.lookup(session.id).is_some());

        cancel.cancel();
        handle.await.unwrap();
    }
}
