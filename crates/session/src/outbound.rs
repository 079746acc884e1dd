//! Outbound relay routing (§4.4): maps a registered client id to its live
//! connection's write side, and the worker-pool [`pool::Handler`] that
//! attempts delivery of a relayed [`OutboundEnvelope`], falling back to the
//! retry controller when the target isn't reachable.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use pool::{DynamicWorkerPool, Handler, HandlerFuture, OutboundEnvelope, RetryController};
use protocol::CommunicationData;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// `clientId -> live outbound channel` for every currently-connected
/// session. A connection registers its sender on accept and removes it on
/// teardown; relaying a frame to a target that isn't present here is
/// indistinguishable, from the caller's perspective, from a send failing on
/// a closed socket.
#[derive(Default)]
pub struct OutboundRouter {
    senders: DashMap<u32, mpsc::UnboundedSender<CommunicationData>>,
}

impl OutboundRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        OutboundRouter::default()
    }

    /// Registers `client_id`'s outbound channel.
    pub fn register(&self, client_id: u32, sender: mpsc::UnboundedSender<CommunicationData>) {
        self.senders.insert(client_id, sender);
    }

    /// Removes `client_id`'s outbound channel.
    pub fn unregister(&self, client_id: u32) {
        self.senders.remove(&client_id);
    }

    /// Attempts to hand `data` to `target_id`'s connection. Returns `false`
    /// if the target is not registered or its channel has closed.
    pub fn try_deliver(&self, target_id: u32, data: &CommunicationData) -> bool {
        match self.senders.get(&target_id) {
            Some(sender) => sender.send(data.clone()).is_ok(),
            None => false,
        }
    }

    /// Number of connections currently reachable for relay delivery.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// True if no connection is currently reachable for relay delivery.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// The `pool::Handler<OutboundEnvelope>` driving relay delivery (C3/C4
/// together): on a dequeued envelope, attempt delivery through the
/// [`OutboundRouter`]; on failure, hand it to the [`RetryController`] and,
/// if it comes back for another attempt, re-enqueue it on the same tier.
///
/// The pool that owns this handler is itself built from an `Arc` of it
/// (`DynamicWorkerPool::spawn` takes the handler before the pool exists), so
/// the back-reference to the pool is filled in after the fact via
/// [`RelayHandler::bind_pool`] rather than threaded through the constructor.
pub struct RelayHandler {
    router: Arc<OutboundRouter>,
    retry: Arc<RetryController>,
    pool: OnceLock<Arc<DynamicWorkerPool<OutboundEnvelope>>>,
    cancel: CancellationToken,
}

impl RelayHandler {
    /// Builds a handler not yet bound to a pool; call [`Self::bind_pool`]
    /// once the pool it will run inside has been spawned.
    #[must_use]
    pub fn new(router: Arc<OutboundRouter>, retry: Arc<RetryController>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(RelayHandler {
            router,
            retry,
            pool: OnceLock::new(),
            cancel,
        })
    }

    /// Supplies the pool this handler runs inside, for re-enqueuing retried
    /// envelopes. A no-op if already bound.
    pub fn bind_pool(&self, pool: Arc<DynamicWorkerPool<OutboundEnvelope>>) {
        let _ = self.pool.set(pool);
    }
}

impl Handler<OutboundEnvelope> for RelayHandler {
    fn call(&self, envelope: OutboundEnvelope) -> HandlerFuture {
        let router = Arc::clone(&self.router);
        let retry = Arc::clone(&self.retry);
        let pool = self.pool.get().cloned();
        let cancel = self.cancel.clone();

        Box::pin(async move {
            if router.try_deliver(envelope.data.target_id, &envelope.data) {
                return;
            }

            let Some(retried) = retry.on_send_failure(envelope, &cancel).await else {
                return;
            };

            match pool {
                Some(pool) => {
                    let priority = retried.data.priority;
                    if pool.enqueue(priority, retried).is_err() {
                        tracing::debug!("worker pool closed, dropping retried envelope");
                    }
                }
                None => tracing::warn!("relay handler has no bound pool, dropping retried envelope"),
            }
        })
    }
}
