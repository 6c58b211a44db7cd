//! Fault detector for a faulty merge committee.
//!
//! After the node publishes an executor commitment it expects the merge
//! committee to fold it into the next block. If root-hash events keep
//! arriving for the round without it finalizing, the entire merge committee
//! may be faulty; the detector then independently resubmits the commitment
//! through the consensus submitter. The detector lives for one round and is
//! disarmed by round-context cancellation.

use crate::CommitmentSubmitter;
use peridot_types::{ExecutorCommitment, RoothashEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Watches one round for lack of progress after a commitment was published.
pub(crate) struct FaultDetector {
    commitment: ExecutorCommitment,
    submitter: Arc<dyn CommitmentSubmitter>,
    round: CancellationToken,
    threshold: u64,
    events_seen: u64,
    fired: bool,
}

impl FaultDetector {
    pub(crate) fn new(
        commitment: ExecutorCommitment,
        submitter: Arc<dyn CommitmentSubmitter>,
        round: CancellationToken,
        threshold: u64,
    ) -> Self {
        Self {
            commitment,
            submitter,
            round,
            threshold,
            events_seen: 0,
            fired: false,
        }
    }

    /// Observe one root-hash event for the round.
    ///
    /// Called under the cross-node lock. Once `threshold` events pass
    /// without the round finalizing, the commitment is resubmitted exactly
    /// once on a background task.
    pub(crate) fn notify(&mut self, _event: &RoothashEvent) {
        if self.fired || self.round.is_cancelled() {
            return;
        }

        self.events_seen += 1;
        if self.events_seen < self.threshold {
            return;
        }
        self.fired = true;

        warn!(
            events_seen = self.events_seen,
            "no merge commitment observed, submitting executor commitment independently"
        );

        let commitment = self.commitment.clone();
        let submitter = self.submitter.clone();
        let round = self.round.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = round.cancelled() => {}
                result = submitter.submit(&commitment) => {
                    if let Err(err) = result {
                        error!(err = %err, "failed to submit commitment");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DistributionError;
    use peridot_types::{PrivateKey, Signed};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubmitter(AtomicUsize);

    #[async_trait::async_trait]
    impl CommitmentSubmitter for CountingSubmitter {
        async fn submit(&self, _commitment: &ExecutorCommitment) -> Result<(), DistributionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn commitment() -> ExecutorCommitment {
        let key = PrivateKey::from_seed(&[1; 32]);
        ExecutorCommitment(Signed::sign(&key, b"TEST", &vec![1u8]).unwrap())
    }

    fn event() -> RoothashEvent {
        RoothashEvent::MergeCommitted { round: 1 }
    }

    #[tokio::test]
    async fn test_fires_once_at_threshold() {
        let submitter = Arc::new(CountingSubmitter(AtomicUsize::new(0)));
        let round = CancellationToken::new();
        let mut detector =
            FaultDetector::new(commitment(), submitter.clone(), round, 3);

        for _ in 0..10 {
            detector.notify(&event());
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(submitter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disarmed_by_round_cancellation() {
        let submitter = Arc::new(CountingSubmitter(AtomicUsize::new(0)));
        let round = CancellationToken::new();
        let mut detector =
            FaultDetector::new(commitment(), submitter.clone(), round.clone(), 3);

        detector.notify(&event());
        round.cancel();
        for _ in 0..10 {
            detector.notify(&event());
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(submitter.0.load(Ordering::SeqCst), 0);
    }
}
