//! Scripted mock runtime and recording seams.

use peridot_committee::{
    CommitmentDistributor, CommitmentSubmitter, DistributionError, MergeHandler, RoleProvider,
    RuntimeAdvertisement,
};
use peridot_host::{Body, RuntimeError, RuntimeEvent, RuntimeHandle};
use peridot_types::{ComputedBatch, ExecutorCommitment, Namespace};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;

/// A runtime handle that serves scripted batch results.
///
/// Execution requests pop the next queued [`ComputedBatch`]; with an empty
/// queue the call pends until cancelled, mimicking a runtime that never
/// finishes. Lifecycle events are injected through the broadcast sender.
pub struct MockRuntime {
    id: Namespace,
    events: broadcast::Sender<RuntimeEvent>,
    responses: parking_lot::Mutex<VecDeque<ComputedBatch>>,
    aborts: AtomicUsize,
}

impl MockRuntime {
    pub fn new(id: Namespace) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            id,
            events,
            responses: parking_lot::Mutex::new(VecDeque::new()),
            aborts: AtomicUsize::new(0),
        }
    }

    /// Queue the result for the next execution request.
    pub fn push_response(&self, batch: ComputedBatch) {
        self.responses.lock().push_back(batch);
    }

    /// Subscribe as the node event loop does.
    pub fn watch_events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    /// Inject a lifecycle event.
    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.events.send(event);
    }

    /// Number of abort requests received.
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RuntimeHandle for MockRuntime {
    fn id(&self) -> Namespace {
        self.id
    }

    async fn call(&self, body: Body) -> Result<Body, RuntimeError> {
        match body {
            Body::ExecuteBatchRequest { .. } => {
                let next = self.responses.lock().pop_front();
                match next {
                    Some(batch) => Ok(Body::ExecuteBatchResponse { batch }),
                    // No scripted result: hang like a stuck runtime until
                    // the caller cancels.
                    None => std::future::pending().await,
                }
            }
            Body::AbortRequest => {
                self.aborts.fetch_add(1, Ordering::SeqCst);
                Ok(Body::AbortResponse)
            }
            _ => Err(RuntimeError::NotReady),
        }
    }

    async fn abort(&self, _force: bool) -> Result<(), RuntimeError> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records availability changes from the node.
#[derive(Default)]
pub struct RecordingRoleProvider {
    /// `Some` for set_available, `None` for set_unavailable, in order.
    pub changes: parking_lot::Mutex<Vec<Option<RuntimeAdvertisement>>>,
}

impl RoleProvider for RecordingRoleProvider {
    fn set_available(&self, advertisement: RuntimeAdvertisement) {
        self.changes.lock().push(Some(advertisement));
    }

    fn set_unavailable(&self) {
        self.changes.lock().push(None);
    }
}

/// Records published commitments; optionally fails.
#[derive(Default)]
pub struct RecordingDistributor {
    pub published: parking_lot::Mutex<Vec<ExecutorCommitment>>,
    pub fail: AtomicBool,
}

#[async_trait::async_trait]
impl CommitmentDistributor for RecordingDistributor {
    async fn publish_execute_finished(
        &self,
        commitment: &ExecutorCommitment,
    ) -> Result<(), DistributionError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DistributionError("injected publish failure".into()));
        }
        self.published.lock().push(commitment.clone());
        Ok(())
    }
}

/// Records directly-submitted commitments.
#[derive(Default)]
pub struct RecordingSubmitter {
    pub submitted: parking_lot::Mutex<Vec<ExecutorCommitment>>,
}

#[async_trait::async_trait]
impl CommitmentSubmitter for RecordingSubmitter {
    async fn submit(&self, commitment: &ExecutorCommitment) -> Result<(), DistributionError> {
        self.submitted.lock().push(commitment.clone());
        Ok(())
    }
}

/// Records commitments delivered to the local merge node.
#[derive(Default)]
pub struct RecordingMerge {
    pub delivered: parking_lot::Mutex<Vec<ExecutorCommitment>>,
}

impl MergeHandler for RecordingMerge {
    fn deliver_commitment(&self, commitment: &ExecutorCommitment) {
        self.delivered.lock().push(commitment.clone());
    }
}
