//! End-to-end scenarios for the executor committee node, driven over an
//! in-memory storage backend and a scripted runtime.

use peridot_committee::{Error, Node, NodeConfig, NodeDependencies, StateName};
use peridot_host::RuntimeEvent;
use peridot_test_helpers::{
    make_computed_batch, make_signed_dispatch, test_block, test_header, MemoryStorage,
    MockRuntime, RecordingDistributor, RecordingMerge, RecordingRoleProvider, RecordingSubmitter,
    TestCommittees,
};
use peridot_types::{
    BatchDispatch, ExecutionDiscrepancyEvent, ExecutorCommitmentBody, Hash, Namespace,
    PeerMessage, PrivateKey, RawBatch, RoothashEvent, SignedDispatch, Version,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Harness {
    committees: TestCommittees,
    namespace: Namespace,
    node: Arc<Node>,
    runtime: Arc<MockRuntime>,
    storage: Arc<MemoryStorage>,
    distributor: Arc<RecordingDistributor>,
    submitter: Arc<RecordingSubmitter>,
    merge: Arc<RecordingMerge>,
    states: broadcast::Receiver<StateName>,
}

impl Harness {
    /// Build and start a node whose identity is selected by `pick_identity`.
    fn new(
        namespace_byte: u8,
        cfg: NodeConfig,
        pick_identity: impl Fn(&TestCommittees) -> PrivateKey,
    ) -> Self {
        let namespace = Namespace::from_raw([namespace_byte; 32]);
        let committees = TestCommittees::new(namespace_byte as u64);
        let identity = pick_identity(&committees);

        let runtime = Arc::new(MockRuntime::new(namespace));
        let storage = Arc::new(MemoryStorage::new(committees.storage_members.clone()));
        let distributor = Arc::new(RecordingDistributor::default());
        let submitter = Arc::new(RecordingSubmitter::default());
        let merge = Arc::new(RecordingMerge::default());

        let node = Node::new(
            cfg,
            Arc::new(identity),
            NodeDependencies {
                runtime: runtime.clone(),
                storage: storage.clone(),
                distributor: distributor.clone(),
                submitter: submitter.clone(),
                role_provider: Arc::new(RecordingRoleProvider::default()),
                merge: Some(merge.clone()),
            },
        );
        let states = node.watch_state_transitions();
        node.start(runtime.watch_events());

        Self {
            committees,
            namespace,
            node,
            runtime,
            storage,
            distributor,
            submitter,
            merge,
            states,
        }
    }

    /// Seed an input batch in storage, returning `(io_root, batch)`.
    fn seed_inputs(&self, tag: &str) -> (Hash, RawBatch) {
        let batch = RawBatch::from(vec![format!("tx/{tag}/1").into_bytes()]);
        let io_root = Hash::digest(format!("inputs/{tag}").as_bytes());
        self.storage.insert_batch(io_root, batch.clone());
        (io_root, batch)
    }

    /// Deliver a new block the way the common node does: early hook first.
    async fn deliver_block(&self, round: u64) {
        let block = test_block(self.namespace, round);
        self.node.handle_new_block_early(&block).await;
        self.node.handle_new_block(block).await;
    }

    async fn wait_for_state(&mut self, want: StateName) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.states.recv().await {
                    Ok(state) if state == want => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(err) => panic!("state stream closed: {err}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want}"));
    }

    fn aborted_batches(&self) -> u64 {
        peridot_metrics::worker()
            .aborted_batch_count
            .with_label_values(&[&self.namespace.to_string()])
            .get()
    }
}

fn worker_identity(committees: &TestCommittees) -> PrivateKey {
    committees.executor_workers[0].clone()
}

fn backup_identity(committees: &TestCommittees) -> PrivateKey {
    committees.executor_backups[0].clone()
}

fn three_replica_config() -> NodeConfig {
    NodeConfig {
        min_write_replication: 3,
        ..NodeConfig::default()
    }
}

#[tokio::test]
async fn test_happy_path_worker() {
    let mut harness = Harness::new(10, three_replica_config(), worker_identity);

    let snapshot = harness.committees.worker_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.wait_for_state(StateName::WaitingForBatch).await;

    harness.deliver_block(5).await;
    let header = test_header(harness.namespace, 5);

    let (io_root, _batch) = harness.seed_inputs("happy");
    harness
        .runtime
        .push_response(make_computed_batch(&header));

    let dispatch = make_signed_dispatch(&harness.committees, header.clone(), io_root, 3);
    let handled = harness
        .node
        .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
        .await
        .unwrap();
    assert!(handled);

    harness.wait_for_state(StateName::ProcessingBatch).await;
    harness.wait_for_state(StateName::WaitingForFinalize).await;

    // The commitment was published and covers what the runtime produced.
    let published = harness.distributor.published.lock().clone();
    assert_eq!(published.len(), 1);
    let body: ExecutorCommitmentBody = published[0].open().unwrap();
    assert_eq!(body.committee_id, harness.committees.executor_committee_id());
    assert_eq!(body.input_root, io_root);
    assert_eq!(body.header.round, 6);
    assert_eq!(body.storage_signatures.len(), 3);
    assert_eq!(body.input_storage_signatures.len(), 3);

    // Write logs were applied in I/O-then-state order against round 5.
    let applies = harness.storage.applies();
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].namespace, harness.namespace);
    assert_eq!(applies[0].dst_round, 6);
    assert_eq!(applies[0].ops.len(), 2);
    assert_eq!(applies[0].ops[0].src_round, 6);
    assert_eq!(applies[0].ops[0].src_root, io_root);
    assert_eq!(applies[0].ops[0].dst_root, body.header.io_root);
    assert_eq!(applies[0].ops[1].src_round, 5);
    assert_eq!(applies[0].ops[1].src_root, header.state_root);
    assert_eq!(applies[0].ops[1].dst_root, body.header.state_root);

    // As a merge member, the commitment was also delivered locally.
    assert_eq!(harness.merge.delivered.lock().len(), 1);

    // No batches were aborted.
    assert_eq!(harness.aborted_batches(), 0);

    // The next block finalizes the round.
    harness.deliver_block(6).await;
    harness.wait_for_state(StateName::WaitingForBatch).await;
}

#[tokio::test]
async fn test_dispatch_ahead_of_local_block() {
    let mut harness = Harness::new(11, three_replica_config(), worker_identity);

    let snapshot = harness.committees.worker_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.deliver_block(5).await;

    // Dispatch scheduled against round 6, one ahead of the local block.
    let header = test_header(harness.namespace, 6);
    let (io_root, _) = harness.seed_inputs("ahead");
    harness
        .runtime
        .push_response(make_computed_batch(&header));

    let dispatch = make_signed_dispatch(&harness.committees, header.clone(), io_root, 3);
    harness
        .node
        .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
        .await
        .unwrap();
    harness.wait_for_state(StateName::WaitingForBlock).await;

    // The awaited block arrives (same round, different timestamp).
    let mut block = test_block(harness.namespace, 6);
    block.header.timestamp += 7;
    harness.node.handle_new_block_early(&block).await;
    harness.node.handle_new_block(block).await;

    harness.wait_for_state(StateName::WaitingForFinalize).await;
    assert_eq!(harness.distributor.published.lock().len(), 1);
}

#[tokio::test]
async fn test_awaited_block_never_arrives() {
    let mut harness = Harness::new(12, three_replica_config(), worker_identity);

    let snapshot = harness.committees.worker_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.deliver_block(5).await;

    let header = test_header(harness.namespace, 6);
    let (io_root, _) = harness.seed_inputs("never");
    let dispatch = make_signed_dispatch(&harness.committees, header, io_root, 3);
    harness
        .node
        .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
        .await
        .unwrap();
    harness.wait_for_state(StateName::WaitingForBlock).await;

    // A round-6 block with a different hash arrives: the dispatch is
    // discarded.
    let mut block = test_block(harness.namespace, 6);
    block.header.io_root = Hash::digest(b"a different fork");
    harness.node.handle_new_block_early(&block).await;
    harness.node.handle_new_block(block).await;

    harness.wait_for_state(StateName::WaitingForBatch).await;
    assert!(harness.distributor.published.lock().is_empty());
}

/// Run the backup-worker discrepancy flow with either ordering of
/// dispatch and discrepancy event, returning the published commitment body.
async fn run_backup_flow(namespace_byte: u8, event_first: bool) -> ExecutorCommitmentBody {
    let mut harness = Harness::new(namespace_byte, three_replica_config(), backup_identity);

    let snapshot = harness.committees.backup_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.deliver_block(5).await;

    let header = test_header(harness.namespace, 5);
    let (io_root, _) = harness.seed_inputs("backup");
    harness
        .runtime
        .push_response(make_computed_batch(&header));

    let dispatch = make_signed_dispatch(&harness.committees, header, io_root, 3);
    let discrepancy = RoothashEvent::ExecutionDiscrepancyDetected(ExecutionDiscrepancyEvent {
        committee_id: harness.committees.executor_committee_id(),
    });

    if event_first {
        harness.node.handle_new_event(discrepancy).await;
        assert_eq!(harness.node.state_name().await, StateName::WaitingForBatch);
        harness
            .node
            .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
            .await
            .unwrap();
    } else {
        harness
            .node
            .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
            .await
            .unwrap();
        harness.wait_for_state(StateName::WaitingForEvent).await;
        harness.node.handle_new_event(discrepancy).await;
    }

    harness.wait_for_state(StateName::WaitingForFinalize).await;

    let published = harness.distributor.published.lock().clone();
    assert_eq!(published.len(), 1);
    published[0].open().unwrap()
}

#[tokio::test]
async fn test_backup_worker_discrepancy_both_orders() {
    let batch_then_event = run_backup_flow(13, false).await;
    let event_then_batch = run_backup_flow(13, true).await;

    // Recording the pending event must yield the same final commitment as
    // receiving it after the batch.
    assert_eq!(batch_then_event, event_then_batch);
}

#[tokio::test]
async fn test_discrepancy_for_other_committee_ignored() {
    let harness = Harness::new(14, three_replica_config(), backup_identity);

    let snapshot = harness.committees.backup_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.deliver_block(5).await;

    harness
        .node
        .handle_new_event(RoothashEvent::ExecutionDiscrepancyDetected(
            ExecutionDiscrepancyEvent {
                committee_id: Hash::digest(b"someone else's committee"),
            },
        ))
        .await;

    // No pending event is recorded; the state is untouched.
    assert_eq!(harness.node.state_name().await, StateName::WaitingForBatch);
}

#[tokio::test]
async fn test_forged_dispatcher_rejected() {
    let harness = Harness::new(15, three_replica_config(), worker_identity);

    let snapshot = harness.committees.worker_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.deliver_block(5).await;

    let header = test_header(harness.namespace, 5);
    let (io_root, _) = harness.seed_inputs("forged");

    // Same body, signed by a key outside the transaction scheduler
    // committee.
    let imposter = PrivateKey::from_seed(&[0xee; 32]);
    let body = BatchDispatch {
        committee_id: harness.committees.executor_committee_id(),
        io_root,
        storage_signatures: peridot_test_helpers::sign_input_receipts(
            &harness.committees,
            harness.namespace,
            5,
            io_root,
            3,
        ),
        header,
    };
    let forged = SignedDispatch::sign(&imposter, &body).unwrap();

    let result = harness
        .node
        .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(forged))
        .await;
    assert_eq!(result, Err(Error::MsgFromNonTxnScheduler));

    // No state change, nothing published, no aborts counted.
    assert_eq!(harness.node.state_name().await, StateName::WaitingForBatch);
    assert!(harness.distributor.published.lock().is_empty());
    assert_eq!(harness.aborted_batches(), 0);
}

#[tokio::test]
async fn test_insufficient_receipts_rejected() {
    let harness = Harness::new(16, three_replica_config(), worker_identity);

    let snapshot = harness.committees.worker_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.deliver_block(5).await;

    let header = test_header(harness.namespace, 5);
    let (io_root, _) = harness.seed_inputs("underreplicated");

    // Only 2 signatures against min_write_replication = 3.
    let dispatch = make_signed_dispatch(&harness.committees, header, io_root, 2);
    let result = harness
        .node
        .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
        .await;
    assert_eq!(result, Err(Error::InvalidReceipt));
    assert_eq!(harness.node.state_name().await, StateName::WaitingForBatch);
}

#[tokio::test]
async fn test_dispatch_for_other_committee_ignored_without_error() {
    let harness = Harness::new(17, three_replica_config(), worker_identity);

    let snapshot = harness.committees.worker_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.deliver_block(5).await;

    let header = test_header(harness.namespace, 5);
    let (io_root, _) = harness.seed_inputs("other-committee");
    let body = BatchDispatch {
        committee_id: Hash::digest(b"other executor committee"),
        io_root,
        storage_signatures: peridot_test_helpers::sign_input_receipts(
            &harness.committees,
            harness.namespace,
            5,
            io_root,
            3,
        ),
        header,
    };
    let dispatch = SignedDispatch::sign(&harness.committees.txn_scheduler, &body).unwrap();

    // Not an error: the dispatch simply isn't ours.
    let handled = harness
        .node
        .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
        .await
        .unwrap();
    assert!(handled);
    assert_eq!(harness.node.state_name().await, StateName::WaitingForBatch);
}

#[tokio::test]
async fn test_new_block_aborts_in_flight_batch() {
    let mut harness = Harness::new(18, three_replica_config(), worker_identity);

    let snapshot = harness.committees.worker_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.deliver_block(5).await;

    let header = test_header(harness.namespace, 5);
    let (io_root, _) = harness.seed_inputs("stuck");
    // No scripted runtime response: the batch task hangs until cancelled.
    let dispatch = make_signed_dispatch(&harness.committees, header, io_root, 3);
    harness
        .node
        .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
        .await
        .unwrap();
    harness.wait_for_state(StateName::ProcessingBatch).await;

    let before = harness.aborted_batches();
    harness.deliver_block(6).await;

    // Early hook aborted the batch, then the new block finalized the round.
    harness.wait_for_state(StateName::WaitingForBatch).await;
    assert_eq!(harness.aborted_batches(), before + 1);
    assert!(harness.distributor.published.lock().is_empty());

    // The cancelled batch task interrupts the runtime.
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.runtime.abort_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("runtime abort was never requested");
}

#[tokio::test]
async fn test_storage_failure_aborts_batch() {
    let mut harness = Harness::new(19, three_replica_config(), worker_identity);

    let snapshot = harness.committees.worker_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.deliver_block(5).await;

    let header = test_header(harness.namespace, 5);
    let (io_root, _) = harness.seed_inputs("apply-fails");
    harness
        .runtime
        .push_response(make_computed_batch(&header));
    harness.storage.set_fail_apply(true);

    let dispatch = make_signed_dispatch(&harness.committees, header, io_root, 3);
    harness
        .node
        .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
        .await
        .unwrap();

    // The commit fails, the batch aborts, and the round finalizes
    // naturally.
    harness.wait_for_state(StateName::WaitingForFinalize).await;
    assert!(harness.distributor.published.lock().is_empty());
    assert_eq!(harness.aborted_batches(), 1);

    harness.deliver_block(6).await;
    harness.wait_for_state(StateName::WaitingForBatch).await;
}

#[tokio::test]
async fn test_fault_detector_resubmits_commitment() {
    let mut harness = Harness::new(
        20,
        NodeConfig {
            min_write_replication: 3,
            fault_detector_threshold: 2,
            ..NodeConfig::default()
        },
        worker_identity,
    );

    let snapshot = harness.committees.worker_snapshot(1);
    harness.node.handle_epoch_transition(snapshot).await;
    harness.deliver_block(5).await;

    let header = test_header(harness.namespace, 5);
    let (io_root, _) = harness.seed_inputs("fault");
    harness
        .runtime
        .push_response(make_computed_batch(&header));

    let dispatch = make_signed_dispatch(&harness.committees, header, io_root, 3);
    harness
        .node
        .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
        .await
        .unwrap();
    harness.wait_for_state(StateName::WaitingForFinalize).await;

    // Events keep arriving without the round finalizing.
    for round in [5u64, 5] {
        harness
            .node
            .handle_new_event(RoothashEvent::MergeCommitted { round })
            .await;
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.submitter.submitted.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("fault detector never resubmitted");

    let submitted = harness.submitter.submitted.lock().clone();
    let published = harness.distributor.published.lock().clone();
    assert_eq!(submitted[0], published[0]);
}

#[tokio::test]
async fn test_not_executor_member_stays_not_ready() {
    let harness = Harness::new(21, three_replica_config(), |_| {
        PrivateKey::from_seed(&[0xaa; 32])
    });

    let snapshot = harness
        .committees
        .snapshot_for(1, &PrivateKey::from_seed(&[0xaa; 32]));
    harness.node.handle_epoch_transition(snapshot).await;
    assert_eq!(harness.node.state_name().await, StateName::NotReady);

    // A dispatch in NotReady is rejected with IncorrectState.
    let header = test_header(harness.namespace, 5);
    let (io_root, _) = harness.seed_inputs("notready");
    let dispatch = make_signed_dispatch(&harness.committees, header, io_root, 3);
    let result = harness
        .node
        .handle_peer_message(PeerMessage::TxnSchedulerBatchDispatch(dispatch))
        .await;
    assert_eq!(result, Err(Error::IncorrectState));
}

#[tokio::test]
async fn test_runtime_events_drive_role_provider() {
    let namespace = Namespace::from_raw([22; 32]);
    let committees = TestCommittees::new(22);
    let runtime = Arc::new(MockRuntime::new(namespace));
    let role_provider = Arc::new(RecordingRoleProvider::default());

    let node = Node::new(
        NodeConfig::default(),
        Arc::new(committees.executor_workers[0].clone()),
        NodeDependencies {
            runtime: runtime.clone(),
            storage: Arc::new(MemoryStorage::new(committees.storage_members.clone())),
            distributor: Arc::new(RecordingDistributor::default()),
            submitter: Arc::new(RecordingSubmitter::default()),
            role_provider: role_provider.clone(),
            merge: None,
        },
    );
    node.start(runtime.watch_events());
    node.wait_initialized().await;

    runtime.emit(RuntimeEvent::Started(peridot_host::StartedEvent {
        version: Version::new(1, 0, 0),
        capability_tee: None,
    }));
    runtime.emit(RuntimeEvent::Stopped);

    tokio::time::timeout(Duration::from_secs(5), async {
        while role_provider.changes.lock().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("role provider never updated");

    let changes = role_provider.changes.lock();
    let advert = changes[0].as_ref().expect("first change is availability");
    assert_eq!(advert.runtime_id, namespace);
    assert_eq!(advert.version, Version::new(1, 0, 0));
    assert!(changes[1].is_none());
}
