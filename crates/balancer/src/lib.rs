//! # Overview
//!
//! `balancer` implements the proxy's pluggable backend-selection layer
//! (C7, §4.7): [`Target`] tracks one backend's load and health counters,
//! [`TargetPool`] aggregates an endpoint's configured targets, and
//! [`Strategy`] is the common interface the seven selection algorithms
//! implement.
//!
//! # Design
//!
//! Every strategy is a pure function of `(healthy targets, context)` to a
//! selected target; stateful strategies (round-robin's cursor, weighted
//! round-robin's current-weight counter) hold that state behind atomics or
//! a small internal mutex rather than requiring `&mut self`, so a single
//! [`Strategy`] instance can be shared across every concurrent proxy
//! connection for an endpoint.
//!
//! # Invariants
//!
//! - Every strategy fails with [`BalancerError::NoTargetsAvailable`] when
//!   handed an empty target list.
//! - A weighted round-robin cursor, run for `sum(weights)/gcd(weights)`
//!   consecutive selections, returns each target exactly `weight/gcd` times.

mod error;
mod fnv;
mod pool;
mod strategy;
mod target;

pub use error::BalancerError;
pub use pool::TargetPool;
pub use strategy::{
    build_strategy, HashStrategy, LeastConnections, LeastResponseTime, LoadBalancingAlgorithm,
    RandomStrategy, RequestContext, RoundRobin, Strategy, WeightedRoundRobin, ZoneAffinity,
    EMPTY_HASH_KEY,
};
pub use target::{BackendProtocol, Target, TargetConfig};
