//! Aggregates one endpoint's configured backends (§3 "Endpoint config").

use std::sync::Arc;

use crate::target::Target;

/// The list of backend targets declared for one proxy endpoint.
///
/// List order is preserved exactly as configured: [`Strategy`](crate::Strategy)
/// implementations that index by position (round-robin, weighted
/// round-robin) or tie-break by position (least-connections) rely on it
/// staying stable across calls.
pub struct TargetPool {
    targets: Vec<Arc<Target>>,
}

impl TargetPool {
    /// Builds a pool from an ordered list of targets.
    #[must_use]
    pub fn new(targets: Vec<Arc<Target>>) -> Self {
        TargetPool { targets }
    }

    /// The full configured target list, healthy or not.
    #[must_use]
    pub fn all(&self) -> &[Arc<Target>] {
        &self.targets
    }

    /// The subset of targets currently marked healthy, in list order — the
    /// slice every [`Strategy`](crate::Strategy) selects over (§4.7).
    #[must_use]
    pub fn healthy(&self) -> Vec<Arc<Target>> {
        self.targets.iter().filter(|target| target.is_healthy()).cloned().collect()
    }

    /// Number of configured targets (healthy or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True if no targets are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetConfig;

    #[test]
    fn healthy_filters_out_unhealthy_targets() {
        let healthy = Arc::new(Target::new(TargetConfig::new("10.0.0.1", 80, 8080, "east")));
        let unhealthy = Arc::new(Target::new(TargetConfig::new("10.0.0.2", 80, 8080, "east")));
        unhealthy.set_healthy(false);

        let pool = TargetPool::new(vec![Arc::clone(&healthy), Arc::clone(&unhealthy)]);
        assert_eq!(pool.len(), 2);
        let healthy_targets = pool.healthy();
        assert_eq!(healthy_targets.len(), 1);
        assert!(Arc::ptr_eq(&healthy_targets[0], &healthy));
    }
}
