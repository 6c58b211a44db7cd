//! Configuration for the executor committee node.

use std::time::Duration;

/// Configuration for [`Node`](crate::Node).
///
/// Bundles the per-node knobs so constructors take a single value.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Deadline for committing write logs to storage.
    pub storage_commit_timeout: Duration,

    /// Minimum number of distinct storage receipts a batch must carry, both
    /// on admission and on commit.
    pub min_write_replication: u64,

    /// Number of root-hash events observed after publishing a commitment
    /// before the fault detector independently resubmits it.
    pub fault_detector_threshold: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage_commit_timeout: Duration::from_secs(5),
            min_write_replication: 1,
            fault_detector_threshold: 6,
        }
    }
}
