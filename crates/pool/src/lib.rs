//! # Overview
//!
//! `pool` implements the concurrency backbone shared by the session server's
//! inbound and outbound paths (§4.3, §4.4): a [`DynamicWorkerPool`] of three
//! priority tiers (HIGH/MEDIUM/LOW), each an elastic set of `tokio` tasks
//! pulling from its own FIFO queue, plus a [`RetryController`] that decides
//! whether a failed outbound send is retried, dropped to a per-target resume
//! queue, or (for ACKs and file-completion notices) never retried at all.
//!
//! # Design
//!
//! Tiers are plain `tokio::sync::mpsc` unbounded channels rather than
//! `crossbeam-channel`: every suspension point in this design (§5) is a
//! `tokio` await point, so pairing the channel with the same runtime avoids
//! a `spawn_blocking` bridge for what is, structurally, cooperative
//! scheduling. A dedicated monitor task resizes each tier's worker count by
//! watching a queue-depth counter maintained alongside the channel (`tokio`'s
//! unbounded channel does not expose a length, so the pool tracks it itself).
//!
//! # Invariants
//!
//! - `min <= active_workers(tier) <= max` once the pool has finished
//!   spawning its initial workers.
//! - A dropped envelope's `retry_count >= max_retries(priority)` at the time
//!   it is moved to the resume queue.

mod error;
mod priority_table;
mod retry;
mod worker_pool;

pub use error::PoolError;
pub use priority_table::{PriorityPolicy, PriorityTable};
pub use retry::{OutboundEnvelope, RetryController};
pub use worker_pool::{DynamicWorkerPool, Handler, PoolMonitorConfig, PoolSnapshot};
