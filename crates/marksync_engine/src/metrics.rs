//! Metrics sink for reconciliation events.

use marksync_tree::NodeId;

/// Receives counters the surrounding application may want to report.
///
/// All methods default to no-ops; implement only what you consume.
pub trait ReconcileMetrics: Send + Sync {
    /// An outgoing item failed validation and was excluded from the batch.
    fn validation_failure(&self, id: &NodeId) {
        let _ = id;
    }

    /// An incoming item failed decryption and was dropped.
    fn decryption_failure(&self, id: &NodeId) {
        let _ = id;
    }

    /// A local edit raced the round and won over the incoming content.
    fn local_win(&self, id: &NodeId) {
        let _ = id;
    }
}

/// A metrics sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl ReconcileMetrics for NoopMetrics {}
