use std::time::Duration;

use protocol::DataPriority;

/// Per-priority policy: retry bound, retry interval, and worker tier size
/// (§3's priority table).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriorityPolicy {
    /// Maximum number of retries before an envelope is dropped to the resume queue.
    pub max_retries: u32,
    /// Delay between a failed send and the retry attempt.
    pub retry_interval: Duration,
    /// Worker count for this tier.
    pub tier_size: usize,
}

/// The constant priority table (§3), parameterised by the reported processor
/// count `P` (floors clamp at 1).
#[derive(Clone, Copy, Debug)]
pub struct PriorityTable {
    high: PriorityPolicy,
    medium: PriorityPolicy,
    low: PriorityPolicy,
}

impl PriorityTable {
    /// Builds the table from a processor count, applying the HIGH=`2P`,
    /// MEDIUM=`P`, LOW=`P/2` tier sizing with a floor of 1.
    #[must_use]
    pub fn from_processor_count(processors: usize) -> Self {
        let p = processors.max(1);
        PriorityTable {
            high: PriorityPolicy {
                max_retries: 5,
                retry_interval: Duration::from_secs(5),
                tier_size: (2 * p).max(1),
            },
            medium: PriorityPolicy {
                max_retries: 3,
                retry_interval: Duration::from_secs(10),
                tier_size: p.max(1),
            },
            low: PriorityPolicy {
                max_retries: 1,
                retry_interval: Duration::from_secs(15),
                tier_size: (p / 2).max(1),
            },
        }
    }

    /// Builds the table using [`num_cpus::get`] as the processor count.
    #[must_use]
    pub fn from_host() -> Self {
        Self::from_processor_count(num_cpus::get())
    }

    /// The policy for `priority`.
    #[must_use]
    pub fn policy(&self, priority: DataPriority) -> PriorityPolicy {
        match priority {
            DataPriority::High => self.high,
            DataPriority::Medium => self.medium,
            DataPriority::Low => self.low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_sizes_follow_the_2p_p_half_p_rule() {
        let table = PriorityTable::from_processor_count(4);
        assert_eq!(table.policy(DataPriority::High).tier_size, 8);
        assert_eq!(table.policy(DataPriority::Medium).tier_size, 4);
        assert_eq!(table.policy(DataPriority::Low).tier_size, 2);
    }

    #[test]
    fn tier_sizes_floor_at_one_on_a_single_core_host() {
        let table = PriorityTable::from_processor_count(1);
        assert_eq!(table.policy(DataPriority::High).tier_size, 2);
        assert_eq!(table.policy(DataPriority::Medium).tier_size, 1);
        assert_eq!(table.policy(DataPriority::Low).tier_size, 1);
    }

    #[test]
    fn retry_bounds_match_the_design_table() {
        let table = PriorityTable::from_processor_count(4);
        assert_eq!(table.policy(DataPriority::High).max_retries, 5);
        assert_eq!(table.policy(DataPriority::Medium).max_retries, 3);
        assert_eq!(table.policy(DataPriority::Low).max_retries, 1);
    }
}
