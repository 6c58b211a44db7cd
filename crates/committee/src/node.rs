//! The executor committee node.
//!
//! One [`Node`] drives one runtime's participation in its executor
//! committee: it admits dispatches from the transaction scheduler, runs them
//! in the hosted runtime, commits the resulting write logs to storage and
//! publishes a signed executor commitment to the merge committee.
//!
//! All state machine handlers run under a single cross-node mutex. The lock
//! is held across storage commits but never across runtime calls; batch
//! execution happens on a detached task whose completion is routed back
//! through a sequence-tagged channel so stale completions are ignored by
//! inspecting the current state.

use crate::epoch::EpochSnapshot;
use crate::fault::FaultDetector;
use crate::state::{transition_allowed, NodeState, PendingBatch, ProcessingState, StateName};
use crate::{
    CommitmentDistributor, CommitmentSubmitter, Error, MergeHandler, NodeConfig, RoleProvider,
    RuntimeAdvertisement,
};
use arc_swap::ArcSwap;
use peridot_host::{Body, RuntimeEvent, RuntimeHandle};
use peridot_metrics as metrics;
use peridot_types::{
    ApplyBatchRequest, ApplyOp, BatchDispatch, Block, CommitteeKind, ComputedBatch,
    ExecutorCommitment, ExecutorCommitmentBody, Hash, Namespace, PeerMessage, PrivateKey,
    ReceiptBody, RoothashEvent, Signature, StorageBackend, Version, RECEIPT_VERSION,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument as _};

const STATE_CHANNEL_CAPACITY: usize = 64;
const BATCH_DONE_CHANNEL_CAPACITY: usize = 4;

/// External collaborators the node drives.
pub struct NodeDependencies {
    /// The hosted runtime the batches execute in.
    pub runtime: Arc<dyn RuntimeHandle>,
    /// The storage backend write logs are committed through.
    pub storage: Arc<dyn StorageBackend>,
    /// Publishes commitments to the merge committee.
    pub distributor: Arc<dyn CommitmentDistributor>,
    /// Submits commitments directly to consensus (fault detector path).
    pub submitter: Arc<dyn CommitmentSubmitter>,
    /// Advertises runtime availability to the registration worker.
    pub role_provider: Arc<dyn RoleProvider>,
    /// Local merge node, when this node is also a merge member.
    pub merge: Option<Arc<dyn MergeHandler>>,
}

/// Result of a detached batch-execution task. `None` means the runtime
/// aborted or failed.
struct BatchCompletion {
    seq: u64,
    result: Option<ComputedBatch>,
}

/// State guarded by the cross-node lock.
struct CrossNodeState {
    state: NodeState,
    current_block: Option<Block>,
    /// Cancellation context valid until the next round.
    round: Option<CancellationToken>,
    fault_detector: Option<FaultDetector>,
}

/// The executor committee node.
pub struct Node {
    runtime_id: Namespace,
    cfg: NodeConfig,
    identity: Arc<PrivateKey>,
    deps: NodeDependencies,

    epoch: ArcSwap<EpochSnapshot>,
    cross: Mutex<CrossNodeState>,

    lifecycle: CancellationToken,
    state_tx: broadcast::Sender<StateName>,
    reselect_tx: mpsc::Sender<()>,
    reselect_rx: parking_lot::Mutex<Option<mpsc::Receiver<()>>>,
    batch_done_tx: mpsc::Sender<BatchCompletion>,
    batch_done_rx: parking_lot::Mutex<Option<mpsc::Receiver<BatchCompletion>>>,
    next_seq: AtomicU64,

    initialized_tx: watch::Sender<bool>,
    metric_label: String,
}

impl Node {
    /// Create a new executor committee node for one runtime.
    pub fn new(
        cfg: NodeConfig,
        identity: Arc<PrivateKey>,
        deps: NodeDependencies,
    ) -> Arc<Self> {
        let runtime_id = deps.runtime.id();
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (reselect_tx, reselect_rx) = mpsc::channel(1);
        let (batch_done_tx, batch_done_rx) = mpsc::channel(BATCH_DONE_CHANNEL_CAPACITY);
        let (initialized_tx, _) = watch::channel(false);

        Arc::new(Self {
            runtime_id,
            cfg,
            identity,
            deps,
            epoch: ArcSwap::from_pointee(EpochSnapshot::empty(0)),
            cross: Mutex::new(CrossNodeState {
                state: NodeState::NotReady,
                current_block: None,
                round: None,
                fault_detector: None,
            }),
            lifecycle: CancellationToken::new(),
            state_tx,
            reselect_tx,
            reselect_rx: parking_lot::Mutex::new(Some(reselect_rx)),
            batch_done_tx,
            batch_done_rx: parking_lot::Mutex::new(Some(batch_done_rx)),
            next_seq: AtomicU64::new(1),
            initialized_tx,
            metric_label: runtime_id.to_string(),
        })
    }

    /// The runtime this node serves.
    pub fn runtime_id(&self) -> Namespace {
        self.runtime_id
    }

    /// Spawn the outer event loop.
    ///
    /// `runtime_events` is the hosted runtime's lifecycle event stream;
    /// `Started`/`Updated` events mark the node available through the role
    /// provider.
    pub fn start(
        self: &Arc<Self>,
        runtime_events: broadcast::Receiver<RuntimeEvent>,
    ) -> JoinHandle<()> {
        let node = self.clone();
        let batch_done_rx = self
            .batch_done_rx
            .lock()
            .take()
            .expect("node event loop started twice");
        let reselect_rx = self
            .reselect_rx
            .lock()
            .take()
            .expect("node event loop started twice");
        tokio::spawn(node.run(runtime_events, batch_done_rx, reselect_rx))
    }

    /// Request the node to stop. Idempotent.
    pub fn stop(&self) {
        self.lifecycle.cancel();
    }

    /// Subscribe to state transitions. Slow subscribers may lose events.
    pub fn watch_state_transitions(&self) -> broadcast::Receiver<StateName> {
        self.state_tx.subscribe()
    }

    /// Wait until the event loop has entered service.
    pub async fn wait_initialized(&self) {
        let mut rx = self.initialized_tx.subscribe();
        let _ = rx.wait_for(|initialized| *initialized).await;
    }

    /// Current state name, for observability and tests.
    pub async fn state_name(&self) -> StateName {
        self.cross.lock().await.state.name()
    }

    // ───────────────────────────────────────────────────────────────────
    // Outer event loop
    // ───────────────────────────────────────────────────────────────────

    async fn run(
        self: Arc<Self>,
        mut runtime_events: broadcast::Receiver<RuntimeEvent>,
        mut batch_done_rx: mpsc::Receiver<BatchCompletion>,
        mut reselect_rx: mpsc::Receiver<()>,
    ) {
        info!(runtime_id = %self.runtime_id, "starting committee node");
        let _ = self.initialized_tx.send(true);

        let mut runtime_version: Option<Version> = None;

        loop {
            tokio::select! {
                _ = self.lifecycle.cancelled() => {
                    info!("termination requested");
                    return;
                }
                event = runtime_events.recv() => match event {
                    Ok(event) => self.handle_runtime_event(event, &mut runtime_version),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "lagged behind hosted runtime events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("hosted runtime event stream closed");
                        return;
                    }
                },
                Some(done) = batch_done_rx.recv() => {
                    self.on_batch_completion(done).await;
                }
                Some(()) = reselect_rx.recv() => {
                    // State changed; recalculate the select set.
                }
            }
        }
    }

    fn handle_runtime_event(&self, event: RuntimeEvent, runtime_version: &mut Option<Version>) {
        match event {
            RuntimeEvent::Started(started) => {
                // We are now able to service requests for this runtime.
                *runtime_version = Some(started.version);
                self.deps.role_provider.set_available(RuntimeAdvertisement {
                    runtime_id: self.runtime_id,
                    version: started.version,
                    capability_tee: started.capability_tee,
                });
            }
            RuntimeEvent::Updated { capability_tee } => {
                let Some(version) = *runtime_version else {
                    warn!("capability update for a runtime that never started");
                    return;
                };
                self.deps.role_provider.set_available(RuntimeAdvertisement {
                    runtime_id: self.runtime_id,
                    version,
                    capability_tee,
                });
            }
            RuntimeEvent::FailedToStart { .. } | RuntimeEvent::Stopped => {
                // We can no longer service requests.
                self.deps.role_provider.set_unavailable();
            }
        }
    }

    async fn on_batch_completion(&self, done: BatchCompletion) {
        let mut cross = self.cross.lock().await;

        // Ignore completions for batches the state machine has moved past.
        match &cross.state {
            NodeState::ProcessingBatch(state) if state.seq == done.seq => {}
            _ => return,
        }

        match done.result {
            None => {
                warn!("worker has aborted batch processing");
                self.abort_batch_locked(&mut cross, &Error::RuntimeAborted);
            }
            Some(batch) => {
                info!("worker has finished processing a batch");
                self.propose_batch_locked(&mut cross, batch).await;
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // State transitions
    // ───────────────────────────────────────────────────────────────────

    fn bump_reselect(&self) {
        // Capacity-1 channel: if a wakeup is already queued, this send is
        // redundant and dropped.
        let _ = self.reselect_tx.try_send(());
    }

    fn transition_locked(&self, cross: &mut CrossNodeState, new_state: NodeState) {
        let from = cross.state.name();
        let to = new_state.name();
        info!(current_state = %from, new_state = %to, "state transition");

        if !transition_allowed(from, to) {
            panic!("invalid state transition: {} -> {}", from, to);
        }

        cross.state = new_state;
        let _ = self.state_tx.send(to);
        // Restart the outer select in case state-specific channels changed.
        self.bump_reselect();
    }

    // ───────────────────────────────────────────────────────────────────
    // Hooks driven by the common node
    // ───────────────────────────────────────────────────────────────────

    /// Handle an epoch transition with a fresh committee snapshot.
    pub async fn handle_epoch_transition(&self, snapshot: EpochSnapshot) {
        self.epoch.store(Arc::new(snapshot));
        let mut cross = self.cross.lock().await;

        if self.epoch.load().is_executor_member() {
            self.transition_locked(
                &mut cross,
                NodeState::WaitingForBatch {
                    pending_event: None,
                },
            );
        } else {
            self.transition_locked(&mut cross, NodeState::NotReady);
        }
    }

    /// First-phase new-block hook: abort any in-flight batch before the
    /// block is processed, since its state is invalidated by the new block.
    pub async fn handle_new_block_early(&self, _block: &Block) {
        let mut cross = self.cross.lock().await;
        self.abort_batch_locked(&mut cross, &Error::SeenNewerBlock);
    }

    /// Handle a new block on the runtime's root-hash chain.
    pub async fn handle_new_block(&self, block: Block) {
        enum BlockAction {
            Nothing,
            StartPending(PendingBatch),
            AwaitedBlockPassed,
            RoundFinalized(Option<Instant>),
        }

        let header = block.header.clone();
        let mut cross = self.cross.lock().await;

        // Cancel the old round context, start a new one.
        if let Some(round) = cross.round.take() {
            round.cancel();
        }
        cross.round = Some(self.lifecycle.child_token());
        cross.fault_detector = None;
        cross.current_block = Some(block);

        let action = match &cross.state {
            NodeState::WaitingForBlock {
                pending,
                header: wait_header,
            } => {
                if wait_header.mostly_equal(&header) {
                    info!("received block needed for batch processing");
                    BlockAction::StartPending(pending.clone())
                } else if header.round >= wait_header.round {
                    // The awaited block will never arrive.
                    warn!(
                        current_round = header.round,
                        wait_round = wait_header.round,
                        "seen newer block while waiting for block"
                    );
                    BlockAction::AwaitedBlockPassed
                } else {
                    info!(
                        current_round = header.round,
                        wait_round = wait_header.round,
                        "still waiting for block"
                    );
                    BlockAction::Nothing
                }
            }
            NodeState::WaitingForEvent { .. } => {
                // Block finalized without the need for a backup worker.
                info!(
                    round = header.round,
                    header_hash = %header.encoded_hash(),
                    "considering the round finalized"
                );
                BlockAction::RoundFinalized(None)
            }
            NodeState::WaitingForFinalize { started_at } => {
                info!(
                    round = header.round,
                    header_hash = %header.encoded_hash(),
                    "considering the round finalized"
                );
                BlockAction::RoundFinalized(Some(*started_at))
            }
            _ => BlockAction::Nothing,
        };

        match action {
            BlockAction::Nothing => {}
            BlockAction::StartPending(pending) => {
                self.maybe_start_processing_batch_locked(&mut cross, pending);
            }
            BlockAction::AwaitedBlockPassed => {
                self.transition_locked(
                    &mut cross,
                    NodeState::WaitingForBatch {
                        pending_event: None,
                    },
                );
            }
            BlockAction::RoundFinalized(started_at) => {
                if let Some(started_at) = started_at {
                    metrics::worker()
                        .batch_processing_time
                        .with_label_values(&[&self.metric_label])
                        .observe(started_at.elapsed().as_secs_f64());
                }
                self.transition_locked(
                    &mut cross,
                    NodeState::WaitingForBatch {
                        pending_event: None,
                    },
                );
            }
        }
    }

    /// Handle a root-hash event for this runtime.
    pub async fn handle_new_event(&self, event: RoothashEvent) {
        enum EventAction {
            RecordPending,
            StartHeld(PendingBatch),
            Ignore(StateName),
        }

        let mut cross = self.cross.lock().await;

        // In case a fault detector exists, notify it of events.
        if let Some(detector) = cross.fault_detector.as_mut() {
            detector.notify(&event);
        }

        let RoothashEvent::ExecutionDiscrepancyDetected(discrepancy) = event else {
            // Ignore other events.
            return;
        };

        let epoch = self.epoch.load_full();
        if epoch.executor_committee_id() != Some(discrepancy.committee_id) {
            debug!(
                committee_id = %discrepancy.committee_id,
                "ignoring discrepancy event for a different committee"
            );
            return;
        }

        warn!(
            committee_id = %discrepancy.committee_id,
            "execution discrepancy detected"
        );
        metrics::worker()
            .execution_discrepancy_detected_count
            .with_label_values(&[&self.metric_label])
            .inc();

        if !epoch.is_executor_backup_worker() {
            return;
        }

        let action = match &cross.state {
            NodeState::WaitingForBatch { .. } => EventAction::RecordPending,
            NodeState::WaitingForEvent { pending } => EventAction::StartHeld(pending.clone()),
            other => EventAction::Ignore(other.name()),
        };

        match action {
            EventAction::RecordPending => {
                // Event received before the batch: record it and keep
                // waiting for the batch.
                self.transition_locked(
                    &mut cross,
                    NodeState::WaitingForBatch {
                        pending_event: Some(discrepancy),
                    },
                );
            }
            EventAction::StartHeld(pending) => {
                info!("backup worker activating and processing batch");
                self.start_processing_batch_locked(&mut cross, pending);
            }
            EventAction::Ignore(state) => {
                warn!(state = %state, "ignoring received discrepancy event in incorrect state");
            }
        }
    }

    /// Handle an inbound peer message. Returns `Ok(true)` when the message
    /// was meant for this node and handled.
    pub async fn handle_peer_message(&self, message: PeerMessage) -> Result<bool, Error> {
        match message {
            PeerMessage::TxnSchedulerBatchDispatch(signed) => {
                // Before opening the signed dispatch, verify that it was
                // actually signed by the current transaction scheduler.
                let epoch = self.epoch.load_full();
                let authorized = epoch
                    .transaction_scheduler_keys()
                    .is_some_and(|keys| keys.contains(&signed.signature().public_key));
                if !authorized {
                    return Err(Error::MsgFromNonTxnScheduler);
                }

                let dispatch = signed.open().map_err(Error::MalformedDispatch)?;
                let txn_sched_signature = *signed.signature();
                self.queue_batch(dispatch, txn_sched_signature).await?;
                Ok(true)
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Admission pipeline
    // ───────────────────────────────────────────────────────────────────

    async fn queue_batch(
        &self,
        dispatch: BatchDispatch,
        txn_sched_signature: Signature,
    ) -> Result<(), Error> {
        let BatchDispatch {
            committee_id,
            io_root,
            storage_signatures,
            header,
        } = dispatch;

        // Quick check to see if the header is compatible.
        if header.namespace != self.runtime_id {
            warn!(header = ?header, "received incompatible header in external batch");
            return Err(Error::IncompatibleHeader);
        }

        let epoch = self.epoch.load_full();

        // Verify storage receipt signers are current committee members.
        if let Err(err) =
            epoch.verify_committee_signatures(CommitteeKind::Storage, &storage_signatures)
        {
            warn!(err = %err, "received bad storage signature");
            return Err(Error::InvalidReceipt);
        }

        // Make sure there are enough signatures.
        if (storage_signatures.len() as u64) < self.cfg.min_write_replication {
            warn!(
                min_write_replication = self.cfg.min_write_replication,
                num_receipts = storage_signatures.len(),
                "received external batch with not enough storage receipts"
            );
            return Err(Error::InvalidReceipt);
        }

        // All signatures must cover the same receipt body over the inputs.
        let receipt_body = ReceiptBody {
            version: RECEIPT_VERSION,
            namespace: header.namespace,
            round: header.round + 1,
            roots: vec![io_root],
        };
        if !peridot_types::verify_many_to_one(
            peridot_types::DOMAIN_STORAGE_RECEIPT,
            &receipt_body.canonical_encoding(),
            &storage_signatures,
        ) {
            warn!("received invalid storage receipt signature in external batch");
            return Err(Error::InvalidReceipt);
        }

        // Fetch inputs from storage.
        let input_root = peridot_types::Root {
            namespace: header.namespace,
            version: header.round + 1,
            hash: io_root,
        };
        let read_start = Instant::now();
        let batch = match self.deps.storage.get_input_batch(input_root).await {
            Ok(batch) if !batch.is_empty() => batch,
            Ok(_) => {
                error!(io_root = %io_root, "fetched empty batch from storage");
                return Err(Error::StorageFailed);
            }
            Err(err) => {
                error!(err = %err, io_root = %io_root, "failed to fetch inputs from storage");
                return Err(Error::StorageFailed);
            }
        };
        metrics::worker()
            .batch_read_time
            .with_label_values(&[&self.metric_label])
            .observe(read_start.elapsed().as_secs_f64());

        let span = info_span!("external_batch", io_root = %io_root, round = header.round);

        let mut cross = self.cross.lock().await;
        self.handle_external_batch_locked(
            &mut cross,
            committee_id,
            PendingBatch {
                io_root,
                batch,
                span,
                txn_sched_signature,
                input_storage_signatures: storage_signatures,
            },
            header,
        )
    }

    fn handle_external_batch_locked(
        &self,
        cross: &mut CrossNodeState,
        committee_id: Hash,
        pending: PendingBatch,
        header: peridot_types::BlockHeader,
    ) -> Result<(), Error> {
        // If we are not waiting for a batch, don't do anything.
        if !matches!(cross.state, NodeState::WaitingForBatch { .. }) {
            return Err(Error::IncorrectState);
        }

        let epoch = self.epoch.load_full();

        // We can only receive external batches if we are an executor member.
        if !epoch.is_executor_member() {
            error!("got external batch while in incorrect role");
            return Err(Error::IncorrectRole);
        }

        // We only accept batches for our own committee.
        let expected_id = epoch.executor_committee_id();
        if expected_id != Some(committee_id) {
            error!(
                expected_committee = ?expected_id,
                committee = %committee_id,
                "got external batch for a different executor committee"
            );
            return Ok(());
        }

        // Check if we have the correct block; in that case start processing.
        match &cross.current_block {
            Some(block) if block.header.mostly_equal(&header) => {
                self.maybe_start_processing_batch_locked(cross, pending);
                return Ok(());
            }
            _ => {}
        }

        // If the current block is the same round or newer than the batch's
        // base but different, the batch can never be processed.
        if let Some(block) = &cross.current_block {
            if block.header.round >= header.round {
                warn!(header = ?header, "got external batch based on incompatible header");
                return Err(Error::IncompatibleHeader);
            }
        }

        // Wait for the correct block to arrive.
        self.transition_locked(cross, NodeState::WaitingForBlock { pending, header });
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────
    // Batch processing
    // ───────────────────────────────────────────────────────────────────

    fn maybe_start_processing_batch_locked(
        &self,
        cross: &mut CrossNodeState,
        pending: PendingBatch,
    ) {
        let epoch = self.epoch.load_full();

        if epoch.is_executor_worker() {
            // Worker, start processing immediately.
            self.start_processing_batch_locked(cross, pending);
        } else if epoch.is_executor_backup_worker() {
            // Backup worker, wait for a discrepancy event unless one has
            // already been recorded.
            if matches!(
                cross.state,
                NodeState::WaitingForBatch {
                    pending_event: Some(_)
                }
            ) {
                info!("already received a discrepancy event, start processing batch");
                self.start_processing_batch_locked(cross, pending);
                return;
            }

            self.transition_locked(cross, NodeState::WaitingForEvent { pending });
        } else {
            warn!("not an executor committee member, ignoring batch");
        }
    }

    fn start_processing_batch_locked(&self, cross: &mut CrossNodeState, pending: PendingBatch) {
        let current_block = cross
            .current_block
            .clone()
            .expect("attempted to start processing batch with no block");

        debug!(batch_size = pending.batch.len(), "processing batch");

        let cancel = self.lifecycle.child_token();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let started_at = Instant::now();

        metrics::worker()
            .batch_size
            .with_label_values(&[&self.metric_label])
            .observe(pending.batch.len() as f64);

        let request = Body::ExecuteBatchRequest {
            io_root: pending.io_root,
            inputs: pending.batch.clone(),
            block: current_block,
        };

        self.transition_locked(
            cross,
            NodeState::ProcessingBatch(ProcessingState {
                io_root: pending.io_root,
                batch: pending.batch,
                span: pending.span.clone(),
                started_at,
                cancel: cancel.clone(),
                seq,
                txn_sched_signature: pending.txn_sched_signature,
                input_storage_signatures: pending.input_storage_signatures,
            }),
        );

        // Ask the hosted runtime to process the batch on a detached task so
        // the committee node can continue processing blocks.
        let runtime = self.deps.runtime.clone();
        let done_tx = self.batch_done_tx.clone();
        let label = self.metric_label.clone();
        tokio::spawn(
            async move {
                let runtime_start = Instant::now();
                let result = tokio::select! {
                    _ = cancel.cancelled() => {
                        // Processing was aborted mid-call; interrupt the
                        // runtime so it can take the next batch.
                        error!("batch processing aborted by context, restarting runtime");
                        if let Err(err) = runtime.abort(false).await {
                            error!(err = %err, "failed to abort the runtime");
                        }
                        None
                    }
                    response = runtime.call(request) => match response {
                        Ok(Body::ExecuteBatchResponse { batch }) => Some(batch),
                        Ok(response) => {
                            error!(response = ?response, "malformed response from runtime");
                            None
                        }
                        Err(err) => {
                            error!(err = %err, "error while sending batch processing request to runtime");
                            None
                        }
                    },
                };
                metrics::worker()
                    .batch_runtime_processing_time
                    .with_label_values(&[&label])
                    .observe(runtime_start.elapsed().as_secs_f64());

                let _ = done_tx.send(BatchCompletion { seq, result }).await;
            }
            .instrument(pending.span),
        );
    }

    fn abort_batch_locked(&self, cross: &mut CrossNodeState, reason: &Error) {
        let started_at = match &cross.state {
            NodeState::ProcessingBatch(state) => {
                // Cancel the batch processing context.
                state.cancel.cancel();
                state.started_at
            }
            // We can only abort if a batch is being processed.
            _ => return,
        };

        warn!(reason = %reason, "aborting batch");

        metrics::worker()
            .aborted_batch_count
            .with_label_values(&[&self.metric_label])
            .inc();

        // After the batch has been aborted we must wait for the round to be
        // finalized.
        self.transition_locked(cross, NodeState::WaitingForFinalize { started_at });
    }

    // ───────────────────────────────────────────────────────────────────
    // Commitment pipeline
    // ───────────────────────────────────────────────────────────────────

    async fn propose_batch_locked(&self, cross: &mut CrossNodeState, computed: ComputedBatch) {
        // We must be in ProcessingBatch state if we are here.
        let (io_root, txn_sched_signature, input_storage_signatures, started_at) =
            match &cross.state {
                NodeState::ProcessingBatch(state) => (
                    state.io_root,
                    state.txn_sched_signature,
                    state.input_storage_signatures.clone(),
                    state.started_at,
                ),
                other => panic!(
                    "proposing batch while in incorrect state: {}",
                    other.name()
                ),
            };

        debug!(header = ?computed.header, "proposing batch");

        let epoch = self.epoch.load_full();
        let Some(committee_id) = epoch.executor_committee_id() else {
            self.abort_batch_locked(cross, &Error::IncorrectRole);
            return;
        };

        let last = cross
            .current_block
            .as_ref()
            .expect("processing implies a current block")
            .header
            .clone();

        let mut proposed = ExecutorCommitmentBody {
            committee_id,
            header: computed.header.clone(),
            rak_signature: computed.rak_signature,
            txn_sched_signature,
            input_root: io_root,
            input_storage_signatures,
            storage_signatures: Vec::new(),
        };

        // Commit I/O and state write logs to storage.
        let commit_start = Instant::now();
        let commit_result = async {
            // NOTE: Order is important for verifying the receipt.
            let ops = vec![
                // I/O root.
                ApplyOp {
                    src_round: last.round + 1,
                    src_root: io_root,
                    dst_root: computed.header.io_root,
                    write_log: computed.io_write_log,
                },
                // State root.
                ApplyOp {
                    src_round: last.round,
                    src_root: last.state_root,
                    dst_root: computed.header.state_root,
                    write_log: computed.state_write_log,
                },
            ];
            let request = ApplyBatchRequest {
                namespace: last.namespace,
                dst_round: last.round + 1,
                ops,
            };

            let receipts = tokio::time::timeout(
                self.cfg.storage_commit_timeout,
                self.deps.storage.apply_batch(request),
            )
            .await
            .map_err(|_| {
                error!("storage commit timed out");
                Error::StorageFailed
            })?
            .map_err(|err| {
                error!(err = %err, "failed to apply to storage");
                Error::StorageFailed
            })?;

            // Verify storage receipts.
            let mut signatures = Vec::with_capacity(receipts.len());
            for receipt in &receipts {
                let body = receipt.open().map_err(|err| {
                    error!(err = %err, "failed to open receipt");
                    Error::InvalidReceipt
                })?;
                proposed
                    .verify_storage_receipt(last.namespace, last.round + 1, &body)
                    .map_err(|err| {
                        error!(err = %err, "failed to validate receipt body");
                        Error::InvalidReceipt
                    })?;
                signatures.push(*receipt.signature());
            }
            epoch
                .verify_committee_signatures(CommitteeKind::Storage, &signatures)
                .map_err(|err| {
                    error!(err = %err, "failed to validate receipt signer");
                    Error::InvalidReceipt
                })?;
            if (signatures.len() as u64) < self.cfg.min_write_replication {
                error!(
                    num_receipts = signatures.len(),
                    "storage commit returned too few receipts"
                );
                return Err(Error::InvalidReceipt);
            }
            Ok(signatures)
        }
        .await;
        metrics::worker()
            .storage_commit_latency
            .with_label_values(&[&self.metric_label])
            .observe(commit_start.elapsed().as_secs_f64());

        match commit_result {
            Ok(signatures) => proposed.storage_signatures = signatures,
            Err(err) => {
                self.abort_batch_locked(cross, &err);
                return;
            }
        }

        // Sign the commitment with the node identity.
        let commitment = match ExecutorCommitment::sign(&self.identity, &proposed) {
            Ok(commitment) => commitment,
            Err(err) => {
                error!(err = %err, "failed to sign commitment");
                self.abort_batch_locked(cross, &Error::SignCommitment(err));
                return;
            }
        };

        // Publish the commitment to the merge committee.
        if let Err(err) = self
            .deps
            .distributor
            .publish_execute_finished(&commitment)
            .await
        {
            error!(err = %err, "failed to publish results to committee");
            self.abort_batch_locked(cross, &Error::PublishFailed);
            return;
        }

        // Arm the fault detector so the commitment is resubmitted
        // independently if the entire merge committee turns out faulty.
        let round = cross
            .round
            .clone()
            .unwrap_or_else(|| self.lifecycle.child_token());
        cross.fault_detector = Some(FaultDetector::new(
            commitment.clone(),
            self.deps.submitter.clone(),
            round,
            self.cfg.fault_detector_threshold,
        ));

        self.transition_locked(cross, NodeState::WaitingForFinalize { started_at });

        if epoch.is_merge_member() {
            match &self.deps.merge {
                Some(merge) => merge.deliver_commitment(&commitment),
                None => error!("scheduler says we are a merge worker, but we are not"),
            }
        }
    }
}
