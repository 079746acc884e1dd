//! The seven pluggable selection algorithms (§4.7).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::error::BalancerError;
use crate::fnv::fnv1a;
use crate::target::Target;

/// Per-selection context a [`Strategy`] may consult beyond the healthy
/// target list.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Zone inferred for the requesting client (e.g. via the CIDR map),
    /// consulted by [`ZoneAffinity`].
    pub client_zone: Option<String>,
    /// Key produced by the caller's key selector (§9), consulted by
    /// [`HashStrategy`]. `None` maps to the literal `"empty-key"` (§4.7).
    pub hash_key: Option<String>,
}

/// A backend-selection algorithm: a pure function from `(healthy targets,
/// context)` to one selected target.
///
/// Implementations that need state across calls (round-robin's cursor,
/// weighted round-robin's current-weight counter) hold it behind interior
/// mutability so the trait itself stays `&self`.
pub trait Strategy: Send + Sync {
    /// Selects one target from `targets`, which the caller has already
    /// filtered down to the healthy set.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::NoTargetsAvailable`] if `targets` is empty.
    fn select(&self, targets: &[Arc<Target>], context: &RequestContext) -> Result<Arc<Target>, BalancerError>;
}

/// Picks the target with the fewest open connections; ties go to the
/// earliest target in list order.
#[derive(Default)]
pub struct LeastConnections;

impl Strategy for LeastConnections {
    fn select(&self, targets: &[Arc<Target>], _context: &RequestContext) -> Result<Arc<Target>, BalancerError> {
        targets
            .iter()
            .min_by_key(|target| target.current_connections())
            .cloned()
            .ok_or(BalancerError::NoTargetsAvailable)
    }
}

/// Cycles through the target list by a shared index, modulo the current
/// list length.
#[derive(Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// Builds a round-robin strategy starting at index 0.
    #[must_use]
    pub fn new() -> Self {
        RoundRobin::default()
    }
}

impl Strategy for RoundRobin {
    fn select(&self, targets: &[Arc<Target>], _context: &RequestContext) -> Result<Arc<Target>, BalancerError> {
        if targets.is_empty() {
            return Err(BalancerError::NoTargetsAvailable);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % targets.len();
        Ok(Arc::clone(&targets[index]))
    }
}

/// Picks uniformly at random among the healthy targets.
#[derive(Default)]
pub struct RandomStrategy;

impl Strategy for RandomStrategy {
    fn select(&self, targets: &[Arc<Target>], _context: &RequestContext) -> Result<Arc<Target>, BalancerError> {
        if targets.is_empty() {
            return Err(BalancerError::NoTargetsAvailable);
        }
        let index = rand::rng().random_range(0..targets.len());
        Ok(Arc::clone(&targets[index]))
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

struct WrrCursor {
    index: isize,
    current_weight: i64,
}

/// The classic smooth weighted round-robin scheme (§4.7): a descending
/// current-weight cursor stepped by `gcd(weights)`, never selecting a
/// target whose weight is below the cursor.
pub struct WeightedRoundRobin {
    cursor: Mutex<WrrCursor>,
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        WeightedRoundRobin {
            cursor: Mutex::new(WrrCursor {
                index: -1,
                current_weight: 0,
            }),
        }
    }
}

impl WeightedRoundRobin {
    /// Builds a weighted round-robin strategy with a cold cursor.
    #[must_use]
    pub fn new() -> Self {
        WeightedRoundRobin::default()
    }
}

impl Strategy for WeightedRoundRobin {
    fn select(&self, targets: &[Arc<Target>], _context: &RequestContext) -> Result<Arc<Target>, BalancerError> {
        if targets.is_empty() {
            return Err(BalancerError::NoTargetsAvailable);
        }

        let weights: Vec<i64> = targets.iter().map(|target| i64::from(target.config.weight)).collect();
        let weight_gcd = weights.iter().copied().fold(0i64, gcd).max(1);
        let max_weight = weights.iter().copied().max().unwrap_or(0);
        let len = targets.len() as isize;

        let mut cursor = self.cursor.lock().expect("weighted round-robin cursor mutex poisoned");
        loop {
            cursor.index = (cursor.index + 1) % len;
            if cursor.index == 0 {
                cursor.current_weight -= weight_gcd;
                if cursor.current_weight <= 0 {
                    cursor.current_weight = max_weight;
                    if cursor.current_weight == 0 {
                        return Err(BalancerError::NoTargetsAvailable);
                    }
                }
            }
            let index = cursor.index as usize;
            if weights[index] >= cursor.current_weight {
                return Ok(Arc::clone(&targets[index]));
            }
        }
    }
}

/// The literal substituted for a missing hash key (§4.7).
pub const EMPTY_HASH_KEY: &str = "empty-key";

/// Hashes `context.hash_key` with FNV-1a and indexes modulo the target
/// count, giving the same key the same target for a stable list (§4.7,
/// testable scenario F).
#[derive(Default)]
pub struct HashStrategy;

impl Strategy for HashStrategy {
    fn select(&self, targets: &[Arc<Target>], context: &RequestContext) -> Result<Arc<Target>, BalancerError> {
        if targets.is_empty() {
            return Err(BalancerError::NoTargetsAvailable);
        }
        let key = context.hash_key.as_deref().unwrap_or(EMPTY_HASH_KEY);
        let index = (fnv1a(key.as_bytes()) as usize) % targets.len();
        Ok(Arc::clone(&targets[index]))
    }
}

/// Picks the target with the lowest EWMA response time.
#[derive(Default)]
pub struct LeastResponseTime;

impl Strategy for LeastResponseTime {
    fn select(&self, targets: &[Arc<Target>], _context: &RequestContext) -> Result<Arc<Target>, BalancerError> {
        targets
            .iter()
            .min_by(|a, b| {
                a.average_response_time_millis()
                    .partial_cmp(&b.average_response_time_millis())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
            .ok_or(BalancerError::NoTargetsAvailable)
    }
}

/// Prefers targets whose zone matches the client's; falls back to
/// least-connections over the full healthy set when none match (§4.7).
#[derive(Default)]
pub struct ZoneAffinity {
    fallback: LeastConnections,
}

impl ZoneAffinity {
    /// Builds a zone-affinity strategy.
    #[must_use]
    pub fn new() -> Self {
        ZoneAffinity::default()
    }
}

impl Strategy for ZoneAffinity {
    fn select(&self, targets: &[Arc<Target>], context: &RequestContext) -> Result<Arc<Target>, BalancerError> {
        if targets.is_empty() {
            return Err(BalancerError::NoTargetsAvailable);
        }
        if let Some(zone) = &context.client_zone {
            let same_zone: Vec<Arc<Target>> = targets
                .iter()
                .filter(|target| &target.config.zone == zone)
                .cloned()
                .collect();
            if !same_zone.is_empty() {
                return self.fallback.select(&same_zone, context);
            }
        }
        self.fallback.select(targets, context)
    }
}

/// Names the algorithm an endpoint configuration selects, independent of
/// its constructed [`Strategy`] instance (§3 "Endpoint config").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadBalancingAlgorithm {
    /// §4.7 least connections.
    LeastConnections,
    /// §4.7 round robin.
    RoundRobin,
    /// §4.7 random.
    Random,
    /// §4.7 weighted round robin.
    WeightedRoundRobin,
    /// §4.7 hash, keyed by a caller-supplied selector.
    Hash,
    /// §4.7 least response time.
    LeastResponseTime,
    /// §4.7 zone affinity.
    ZoneAffinity,
}

/// Builds the [`Strategy`] instance for `algorithm`.
///
/// # Errors
///
/// Returns [`BalancerError::MissingKeySelector`] if `algorithm` is
/// [`LoadBalancingAlgorithm::Hash`] and `has_key_selector` is `false` — the
/// endpoint builder is expected to have already rejected this combination
/// (§9), but the factory enforces it defensively.
pub fn build_strategy(
    algorithm: LoadBalancingAlgorithm,
    has_key_selector: bool,
) -> Result<Arc<dyn Strategy>, BalancerError> {
    if algorithm == LoadBalancingAlgorithm::Hash && !has_key_selector {
        return Err(BalancerError::MissingKeySelector);
    }
    Ok(match algorithm {
        LoadBalancingAlgorithm::LeastConnections => Arc::new(LeastConnections),
        LoadBalancingAlgorithm::RoundRobin => Arc::new(RoundRobin::new()),
        LoadBalancingAlgorithm::Random => Arc::new(RandomStrategy),
        LoadBalancingAlgorithm::WeightedRoundRobin => Arc::new(WeightedRoundRobin::new()),
        LoadBalancingAlgorithm::Hash => Arc::new(HashStrategy),
        LoadBalancingAlgorithm::LeastResponseTime => Arc::new(LeastResponseTime),
        LoadBalancingAlgorithm::ZoneAffinity => Arc::new(ZoneAffinity::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetConfig;
    use std::collections::HashMap;

    fn target(zone: &str, weight: u32) -> Arc<Target> {
        let mut config = TargetConfig::new("10.0.0.1", 80, 8080, zone);
        config.weight = weight;
        Arc::new(Target::new(config))
    }

    #[test]
    fn least_connections_breaks_ties_by_list_order() {
        let a = target("east", 5);
        let b = target("east", 5);
        let targets = vec![Arc::clone(&a), Arc::clone(&b)];
        let strategy = LeastConnections;
        let selected = strategy.select(&targets, &RequestContext::default()).unwrap();
        assert!(Arc::ptr_eq(&selected, &a));
    }

    #[test]
    fn least_connections_prefers_the_least_loaded_target() {
        let a = target("east", 5);
        let b = target("east", 5);
        a.connection_opened();
        a.connection_opened();
        let targets = vec![Arc::clone(&a), Arc::clone(&b)];
        let strategy = LeastConnections;
        let selected = strategy.select(&targets, &RequestContext::default()).unwrap();
        assert!(Arc::ptr_eq(&selected, &b));
    }

    #[test]
    fn round_robin_cycles_through_every_target() {
        let targets = vec![target("a", 5), target("b", 5), target("c", 5)];
        let strategy = RoundRobin::new();
        let picks: Vec<_> = (0..6)
            .map(|_| strategy.select(&targets, &RequestContext::default()).unwrap())
            .collect();
        assert!(Arc::ptr_eq(&picks[0], &targets[0]));
        assert!(Arc::ptr_eq(&picks[1], &targets[1]));
        assert!(Arc::ptr_eq(&picks[2], &targets[2]));
        assert!(Arc::ptr_eq(&picks[3], &targets[0]));
        assert!(Arc::ptr_eq(&picks[5], &targets[2]));
    }

    #[test]
    fn weighted_round_robin_matches_the_declared_multiset_over_one_cycle() {
        let a = target("a", 2);
        let b = target("b", 3);
        let c = target("c", 5);
        let targets = vec![Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)];
        let strategy = WeightedRoundRobin::new();

        let mut counts = HashMap::new();
        for _ in 0..10 {
            let selected = strategy.select(&targets, &RequestContext::default()).unwrap();
            let label = if Arc::ptr_eq(&selected, &a) {
                "a"
            } else if Arc::ptr_eq(&selected, &b) {
                "b"
            } else {
                "c"
            };
            *counts.entry(label).or_insert(0u32) += 1;
        }

        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&3));
        assert_eq!(counts.get("c"), Some(&5));
    }

    #[test]
    fn hash_strategy_is_stable_for_the_same_key() {
        let targets: Vec<_> = (0..7).map(|i| target(&format!("zone-{i}"), 5)).collect();
        let strategy = HashStrategy;
        let context = RequestContext {
            client_zone: None,
            hash_key: Some("user-42".to_string()),
        };
        let first = strategy.select(&targets, &context).unwrap();
        let second = strategy.select(&targets, &context).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn hash_strategy_falls_back_to_the_empty_key_literal() {
        let targets: Vec<_> = (0..3).map(|i| target(&format!("zone-{i}"), 5)).collect();
        let strategy = HashStrategy;
        let with_none = strategy.select(&targets, &RequestContext::default()).unwrap();
        let explicit_empty = strategy
            .select(
                &targets,
                &RequestContext {
                    client_zone: None,
                    hash_key: Some(EMPTY_HASH_KEY.to_string()),
                },
            )
            .unwrap();
        assert!(Arc::ptr_eq(&with_none, &explicit_empty));
    }

    #[test]
    fn least_response_time_prefers_the_faster_target() {
        let fast = target("east", 5);
        let slow = target("east", 5);
        fast.record_response_time(10.0);
        slow.record_response_time(500.0);
        let targets = vec![Arc::clone(&fast), Arc::clone(&slow)];
        let strategy = LeastResponseTime;
        let selected = strategy.select(&targets, &RequestContext::default()).unwrap();
        assert!(Arc::ptr_eq(&selected, &fast));
    }

    #[test]
    fn zone_affinity_prefers_the_matching_zone() {
        let east = target("east", 5);
        let west = target("west", 5);
        let targets = vec![Arc::clone(&east), Arc::clone(&west)];
        let strategy = ZoneAffinity::new();
        let context = RequestContext {
            client_zone: Some("west".to_string()),
            hash_key: None,
        };
        let selected = strategy.select(&targets, &context).unwrap();
        assert!(Arc::ptr_eq(&selected, &west));
    }

    #[test]
    fn zone_affinity_falls_back_to_least_connections_when_no_zone_matches() {
        let east = target("east", 5);
        let targets = vec![Arc::clone(&east)];
        let strategy = ZoneAffinity::new();
        let context = RequestContext {
            client_zone: Some("nonexistent".to_string()),
            hash_key: None,
        };
        let selected = strategy.select(&targets, &context).unwrap();
        assert!(Arc::ptr_eq(&selected, &east));
    }

    #[test]
    fn every_strategy_fails_with_no_targets_available_on_an_empty_list() {
        let empty: Vec<Arc<Target>> = Vec::new();
        let context = RequestContext::default();
        assert!(matches!(
            LeastConnections.select(&empty, &context),
            Err(BalancerError::NoTargetsAvailable)
        ));
        assert!(matches!(
            RoundRobin::new().select(&empty, &context),
            Err(BalancerError::NoTargetsAvailable)
        ));
        assert!(matches!(
            RandomStrategy.select(&empty, &context),
            Err(BalancerError::NoTargetsAvailable)
        ));
        assert!(matches!(
            WeightedRoundRobin::new().select(&empty, &context),
            Err(BalancerError::NoTargetsAvailable)
        ));
        assert!(matches!(
            HashStrategy.select(&empty, &context),
            Err(BalancerError::NoTargetsAvailable)
        ));
        assert!(matches!(
            LeastResponseTime.select(&empty, &context),
            Err(BalancerError::NoTargetsAvailable)
        ));
        assert!(matches!(
            ZoneAffinity::new().select(&empty, &context),
            Err(BalancerError::NoTargetsAvailable)
        ));
    }

    #[test]
    fn build_strategy_rejects_hash_without_a_key_selector() {
        let err = build_strategy(LoadBalancingAlgorithm::Hash, false).unwrap_err();
        assert!(matches!(err, BalancerError::MissingKeySelector));
        assert!(build_strategy(LoadBalancingAlgorithm::Hash, true).is_ok());
    }
}
