use crate::application::error::StoreError;
use crate::application::state::{PlanState, SharedPlanState};
use crate::application::topic_bridge::TopicStatusBridge;
use crate::domain::models::{reconcile_block, BlockId, StudyBlock, StudyBlockPatch};
use crate::infrastructure::config::LockScope;
use crate::infrastructure::study_plan_client::BlockMutationGateway;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State captured before the optimistic apply.
struct PendingMutation {
    snapshot: Vec<StudyBlock>,
    local_before: StudyBlock,
    epoch: u64,
}

/// Applies a block patch locally, sends it, then reconciles or rolls back.
pub struct OptimisticUpdateCoordinator<B>
where
    B: BlockMutationGateway,
{
    gateway: Arc<B>,
    state: Arc<SharedPlanState>,
    bridge: TopicStatusBridge,
}

impl<B> OptimisticUpdateCoordinator<B>
where
    B: BlockMutationGateway,
{
    pub fn new(gateway: Arc<B>, state: Arc<SharedPlanState>, bridge: TopicStatusBridge) -> Self {
        Self {
            gateway,
            state,
            bridge,
        }
    }

    pub fn with_bridge(mut self, bridge: TopicStatusBridge) -> Self {
        self.bridge = bridge;
        self
    }

    pub async fn execute(
        &self,
        block_id: BlockId,
        patch: StudyBlockPatch,
    ) -> Result<StudyBlock, StoreError> {
        if patch.is_empty() {
            return Err(StoreError::EmptyPatch);
        }

        let pending = self.state.update(|state| {
            let result = begin(state, block_id, &patch);
            if let Err(error) = &result {
                state.record_error(error);
            }
            result
        })??;
        debug!(block_id, fields = ?patch.field_names(), "optimistic patch applied");

        let response = self.gateway.update_block(block_id, &patch).await;

        let completed_topic = self.state.update(|state| {
            if state.closed || state.epoch != pending.epoch {
                debug!(block_id, "discarding block update for a replaced plan");
                return Err(StoreError::Discarded);
            }
            let lock_scope = state.locks.scope();
            let Some(plan) = state.plan.as_mut() else {
                return Err(StoreError::Discarded);
            };

            match response {
                Ok(record) => {
                    let merged = reconcile_block(&pending.local_before, record);
                    let Some(current) = plan.block_mut(block_id) else {
                        state.locks.release(block_id);
                        return Err(StoreError::Discarded);
                    };
                    *current = merged.clone();
                    plan.sort_blocks_by_schedule();
                    state.locks.release(block_id);

                    let changed = if patch.completes() {
                        self.bridge
                            .on_block_completed(&mut state.topics, merged.topic_id)
                    } else {
                        None
                    };
                    info!(block_id, plan_id = merged.study_plan_id, "block update reconciled");
                    Ok((merged, changed))
                }
                Err(error) => {
                    match lock_scope {
                        LockScope::Plan => plan.study_blocks = pending.snapshot,
                        // Other blocks may have been reconciled meanwhile; only
                        // the failed block goes back to its snapshot value.
                        LockScope::Block => {
                            if let (Some(current), Some(original)) = (
                                plan.block_mut(block_id),
                                pending.snapshot.iter().find(|block| block.id == block_id),
                            ) {
                                *current = original.clone();
                            }
                        }
                    }
                    let error = StoreError::Gateway(error);
                    let message = error.to_string();
                    warn!(block_id, error = %message, "block update failed; rolled back");
                    state.locks.fail(block_id, message);
                    state.record_error(&error);
                    Err(error)
                }
            }
        })??;

        let (merged, changed) = completed_topic;
        if let Some(topic) = changed {
            self.bridge.notify(&topic);
        }
        Ok(merged)
    }
}

fn begin(
    state: &mut PlanState,
    block_id: BlockId,
    patch: &StudyBlockPatch,
) -> Result<PendingMutation, StoreError> {
    if state.closed {
        return Err(StoreError::Discarded);
    }
    let epoch = state.epoch;
    let Some(plan) = state.plan.as_mut() else {
        return Err(StoreError::NoActivePlan);
    };
    let Some(local_before) = plan.block(block_id).cloned() else {
        return Err(StoreError::UnknownBlock(block_id));
    };
    if !state.locks.try_acquire(block_id) {
        return Err(StoreError::BlockBusy(block_id));
    }

    let snapshot = plan.study_blocks.clone();
    if let Some(block) = plan.block_mut(block_id) {
        patch.apply_to(block);
    }
    state.error = None;

    Ok(PendingMutation {
        snapshot,
        local_before,
        epoch,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::block_locks::BlockSyncState;
    use crate::application::topic_bridge::TopicStatusListener;
    use crate::domain::models::fixtures::{block, fixed_time, plan, topic};
    use crate::domain::models::{
        BlockId, StudyBlockRecord, StudyBlockStatus, Topic, TopicId, TopicStatus,
    };
    use crate::infrastructure::error::InfraError;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[derive(Debug)]
    pub(crate) enum FakeUpdateResponse {
        /// Echo the patch applied to the given authoritative block.
        Echo(StudyBlock),
        Record(StudyBlockRecord),
        HttpError(u16, &'static str),
        /// Wait for the signal, then answer.
        Gated(oneshot::Receiver<()>, Box<FakeUpdateResponse>),
    }

    #[derive(Debug, Default)]
    pub(crate) struct FakeBlockGateway {
        responses: Mutex<VecDeque<FakeUpdateResponse>>,
        pub(crate) calls: AtomicUsize,
        pub(crate) patches: Mutex<Vec<(BlockId, StudyBlockPatch)>>,
    }

    impl FakeBlockGateway {
        pub(crate) fn with_responses(responses: Vec<FakeUpdateResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }
    }

    async fn answer(response: FakeUpdateResponse, patch: &StudyBlockPatch) -> Result<StudyBlockRecord, InfraError> {
        let mut response = response;
        loop {
            match response {
                FakeUpdateResponse::Echo(mut authoritative) => {
                    patch.apply_to(&mut authoritative);
                    let mut record = StudyBlockRecord::from(authoritative);
                    record.topic = None;
                    return Ok(record);
                }
                FakeUpdateResponse::Record(record) => return Ok(record),
                FakeUpdateResponse::HttpError(status, detail) => {
                    return Err(InfraError::Http {
                        status,
                        detail: detail.to_string(),
                    })
                }
                FakeUpdateResponse::Gated(gate, next) => {
                    let _ = gate.await;
                    response = *next;
                }
            }
        }
    }

    #[async_trait]
    impl BlockMutationGateway for FakeBlockGateway {
        async fn update_block(
            &self,
            block_id: BlockId,
            patch: &StudyBlockPatch,
        ) -> Result<StudyBlockRecord, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.patches
                .lock()
                .expect("patch log lock poisoned")
                .push((block_id, patch.clone()));
            let response = self
                .responses
                .lock()
                .expect("response lock poisoned")
                .pop_front();
            match response {
                Some(response) => answer(response, patch).await,
                None => Err(InfraError::Network("no scripted response".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        changed: Mutex<Vec<TopicId>>,
    }

    impl TopicStatusListener for RecordingListener {
        fn topic_status_changed(&self, topic: &Topic) {
            self.changed.lock().expect("listener lock poisoned").push(topic.id);
        }
    }

    fn seeded_state(scope: LockScope, topics: Vec<Topic>, blocks: Vec<StudyBlock>) -> Arc<SharedPlanState> {
        let state = Arc::new(SharedPlanState::new(scope));
        state
            .update(|state| {
                state.switch_subject(1, Some("Algebra".to_string()));
                state.topics.replace(topics);
                state.replace_plan(Some(plan(blocks)));
            })
            .expect("seed state");
        state
    }

    fn blocks_of(state: &SharedPlanState) -> Vec<StudyBlock> {
        state
            .read(|state| state.plan.as_ref().map(|plan| plan.study_blocks.clone()).unwrap_or_default())
            .expect("read blocks")
    }

    #[tokio::test]
    async fn failed_update_restores_exact_snapshot_and_sets_error() {
        let algebra = topic(1, "Algebra", TopicStatus::InProgress);
        let before = vec![block(1, &algebra), block(2, &algebra)];
        let state = seeded_state(LockScope::Plan, vec![algebra.clone()], before.clone());
        let gateway = Arc::new(FakeBlockGateway::with_responses(vec![
            FakeUpdateResponse::HttpError(500, "database unavailable"),
        ]));
        let coordinator = OptimisticUpdateCoordinator::new(gateway, Arc::clone(&state), TopicStatusBridge::default());

        let result = coordinator
            .execute(1, StudyBlockPatch::status(StudyBlockStatus::Completed))
            .await;

        assert!(matches!(result, Err(StoreError::Gateway(_))));
        assert_eq!(blocks_of(&state), before);
        let snapshot = state.snapshot().expect("snapshot");
        assert_eq!(snapshot.error.as_deref(), Some("database unavailable"));
        assert_eq!(
            snapshot.block_state(1),
            BlockSyncState::Error("database unavailable".to_string())
        );
        assert_eq!(snapshot.topics[0].status, TopicStatus::InProgress);
    }

    #[tokio::test]
    async fn completion_propagates_to_topic_but_reverting_does_not() {
        let algebra = topic(1, "Algebra", TopicStatus::InProgress);
        let original = block(1, &algebra);
        let state = seeded_state(LockScope::Plan, vec![algebra.clone()], vec![original.clone()]);
        let gateway = Arc::new(FakeBlockGateway::with_responses(vec![
            FakeUpdateResponse::Echo(original.clone()),
            FakeUpdateResponse::Echo(original.clone()),
        ]));
        let listener = Arc::new(RecordingListener::default());
        let coordinator = OptimisticUpdateCoordinator::new(
            gateway,
            Arc::clone(&state),
            TopicStatusBridge::new(Some(listener.clone())),
        );

        let completed = coordinator
            .execute(1, StudyBlockPatch::status(StudyBlockStatus::Completed))
            .await
            .expect("complete block");
        assert_eq!(completed.status, StudyBlockStatus::Completed);

        let snapshot = state.snapshot().expect("snapshot");
        assert_eq!(snapshot.topics[0].status, TopicStatus::Completed);
        assert_eq!(snapshot.plan.expect("plan").study_blocks[0].status, StudyBlockStatus::Completed);

        coordinator
            .execute(1, StudyBlockPatch::status(StudyBlockStatus::Planned))
            .await
            .expect("revert block");

        let snapshot = state.snapshot().expect("snapshot");
        assert_eq!(snapshot.plan.expect("plan").study_blocks[0].status, StudyBlockStatus::Planned);
        assert_eq!(snapshot.topics[0].status, TopicStatus::Completed);
        assert_eq!(*listener.changed.lock().expect("lock"), vec![1]);
    }

    #[tokio::test]
    async fn reconcile_keeps_topic_detail_when_response_omits_it() {
        let algebra = topic(1, "Algebra", TopicStatus::NotStarted);
        let original = block(1, &algebra);
        let state = seeded_state(LockScope::Plan, vec![algebra.clone()], vec![original.clone()]);
        let gateway = Arc::new(FakeBlockGateway::with_responses(vec![
            FakeUpdateResponse::Echo(original.clone()),
        ]));
        let coordinator = OptimisticUpdateCoordinator::new(gateway, Arc::clone(&state), TopicStatusBridge::default());

        let merged = coordinator
            .execute(1, StudyBlockPatch::notes(Some("review chapter 2".to_string())))
            .await
            .expect("update notes");

        assert_eq!(merged.topic.name, "Algebra");
        assert_eq!(merged.notes.as_deref(), Some("review chapter 2"));
        assert_eq!(blocks_of(&state)[0], merged);
    }

    #[tokio::test]
    async fn reconcile_takes_response_topic_when_it_has_a_name() {
        let algebra = topic(1, "Algebra", TopicStatus::NotStarted);
        let original = block(1, &algebra);
        let state = seeded_state(LockScope::Plan, vec![algebra.clone()], vec![original.clone()]);
        let mut record = StudyBlockRecord::from(original.clone());
        record.duration_minutes = Some(30);
        if let Some(topic) = record.topic.as_mut() {
            topic.name = "Linear Algebra".to_string();
        }
        let gateway = Arc::new(FakeBlockGateway::with_responses(vec![FakeUpdateResponse::Record(record)]));
        let coordinator = OptimisticUpdateCoordinator::new(gateway, Arc::clone(&state), TopicStatusBridge::default());

        let merged = coordinator
            .execute(1, StudyBlockPatch::duration(Some(30)))
            .await
            .expect("update duration");

        assert_eq!(merged.topic.name, "Linear Algebra");
        assert_eq!(merged.duration_minutes, Some(30));
    }

    #[tokio::test]
    async fn busy_block_rejects_second_mutation_without_touching_state() {
        let algebra = topic(1, "Algebra", TopicStatus::NotStarted);
        let original = block(1, &algebra);
        let state = seeded_state(LockScope::Plan, vec![algebra.clone()], vec![original.clone(), block(2, &algebra)]);
        let (release, gate) = oneshot::channel();
        let gateway = Arc::new(FakeBlockGateway::with_responses(vec![FakeUpdateResponse::Gated(
            gate,
            Box::new(FakeUpdateResponse::Echo(original.clone())),
        )]));
        let coordinator = Arc::new(OptimisticUpdateCoordinator::new(
            Arc::clone(&gateway),
            Arc::clone(&state),
            TopicStatusBridge::default(),
        ));

        let in_flight = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .execute(1, StudyBlockPatch::status(StudyBlockStatus::InProgress))
                    .await
            })
        };
        while gateway.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let optimistic = state.snapshot().expect("snapshot");
        assert_eq!(optimistic.block_state(1), BlockSyncState::Pending);
        assert_eq!(
            optimistic.plan.as_ref().expect("plan").study_blocks[0].status,
            StudyBlockStatus::InProgress
        );

        let same_block = coordinator
            .execute(1, StudyBlockPatch::notes(Some("x".to_string())))
            .await;
        assert!(matches!(same_block, Err(StoreError::BlockBusy(1))));
        // Plan scope also serializes other blocks.
        let other_block = coordinator
            .execute(2, StudyBlockPatch::notes(Some("y".to_string())))
            .await;
        assert!(matches!(other_block, Err(StoreError::BlockBusy(2))));
        assert_eq!(state.snapshot().expect("snapshot"), optimistic);

        release.send(()).expect("release gate");
        let finished = in_flight.await.expect("join").expect("update succeeds");
        assert_eq!(finished.status, StudyBlockStatus::InProgress);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.snapshot().expect("snapshot").block_state(1), BlockSyncState::Idle);
    }

    #[tokio::test]
    async fn block_scope_rollback_keeps_other_blocks_reconciled_state() {
        let algebra = topic(1, "Algebra", TopicStatus::NotStarted);
        let first = block(1, &algebra);
        let second = block(2, &algebra);
        let state = seeded_state(LockScope::Block, vec![algebra.clone()], vec![first.clone(), second.clone()]);
        let (release, gate) = oneshot::channel();
        let gateway = Arc::new(FakeBlockGateway::with_responses(vec![
            FakeUpdateResponse::Gated(gate, Box::new(FakeUpdateResponse::HttpError(409, "conflict"))),
            FakeUpdateResponse::Echo(second.clone()),
        ]));
        let coordinator = Arc::new(OptimisticUpdateCoordinator::new(
            Arc::clone(&gateway),
            Arc::clone(&state),
            TopicStatusBridge::default(),
        ));

        let failing = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .execute(1, StudyBlockPatch::status(StudyBlockStatus::Skipped))
                    .await
            })
        };
        while gateway.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        coordinator
            .execute(2, StudyBlockPatch::notes(Some("kept".to_string())))
            .await
            .expect("second block succeeds concurrently");

        release.send(()).expect("release gate");
        assert!(failing.await.expect("join").is_err());

        let blocks = blocks_of(&state);
        assert_eq!(blocks[0], first);
        assert_eq!(blocks[1].notes.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn result_is_discarded_after_plan_replacement() {
        let algebra = topic(1, "Algebra", TopicStatus::NotStarted);
        let original = block(1, &algebra);
        let state = seeded_state(LockScope::Plan, vec![algebra.clone()], vec![original.clone()]);
        let (release, gate) = oneshot::channel();
        let gateway = Arc::new(FakeBlockGateway::with_responses(vec![FakeUpdateResponse::Gated(
            gate,
            Box::new(FakeUpdateResponse::HttpError(500, "late failure")),
        )]));
        let coordinator = Arc::new(OptimisticUpdateCoordinator::new(
            Arc::clone(&gateway),
            Arc::clone(&state),
            TopicStatusBridge::default(),
        ));

        let in_flight = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .execute(1, StudyBlockPatch::status(StudyBlockStatus::Completed))
                    .await
            })
        };
        while gateway.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let mut regenerated = original.clone();
        regenerated.notes = Some("fresh plan".to_string());
        state
            .update(|state| state.replace_plan(Some(plan(vec![regenerated.clone()]))))
            .expect("replace plan");

        release.send(()).expect("release gate");
        assert!(matches!(in_flight.await.expect("join"), Err(StoreError::Discarded)));

        let snapshot = state.snapshot().expect("snapshot");
        assert_eq!(snapshot.plan.expect("plan").study_blocks, vec![regenerated]);
        assert_eq!(snapshot.error, None);
    }

    #[tokio::test]
    async fn close_during_mutation_discards_failure_without_rollback() {
        let algebra = topic(1, "Algebra", TopicStatus::NotStarted);
        let state = seeded_state(LockScope::Plan, vec![algebra.clone()], vec![block(1, &algebra)]);
        let (release, gate) = oneshot::channel();
        let gateway = Arc::new(FakeBlockGateway::with_responses(vec![FakeUpdateResponse::Gated(
            gate,
            Box::new(FakeUpdateResponse::HttpError(500, "late failure")),
        )]));
        let coordinator = Arc::new(OptimisticUpdateCoordinator::new(
            Arc::clone(&gateway),
            Arc::clone(&state),
            TopicStatusBridge::default(),
        ));

        let in_flight = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .execute(1, StudyBlockPatch::status(StudyBlockStatus::Completed))
                    .await
            })
        };
        while gateway.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        state.update(PlanState::close).expect("close");
        release.send(()).expect("release gate");
        assert!(matches!(in_flight.await.expect("join"), Err(StoreError::Discarded)));

        let snapshot = state.snapshot().expect("snapshot");
        assert!(snapshot.closed);
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.block_state(1), BlockSyncState::Idle);
        let blocks = snapshot.plan.expect("plan").study_blocks;
        assert_eq!(blocks[0].status, StudyBlockStatus::Completed);
    }

    #[tokio::test]
    async fn missing_plan_and_unknown_block_are_reported() {
        let state = Arc::new(SharedPlanState::new(LockScope::Plan));
        let gateway = Arc::new(FakeBlockGateway::default());
        let coordinator = OptimisticUpdateCoordinator::new(Arc::clone(&gateway), Arc::clone(&state), TopicStatusBridge::default());

        let no_plan = coordinator
            .execute(1, StudyBlockPatch::status(StudyBlockStatus::Completed))
            .await;
        assert!(matches!(no_plan, Err(StoreError::NoActivePlan)));

        let algebra = topic(1, "Algebra", TopicStatus::NotStarted);
        state
            .update(|state| state.replace_plan(Some(plan(vec![block(1, &algebra)]))))
            .expect("seed plan");
        let unknown = coordinator
            .execute(9, StudyBlockPatch::status(StudyBlockStatus::Completed))
            .await;
        assert!(matches!(unknown, Err(StoreError::UnknownBlock(9))));
        assert!(state.snapshot().expect("snapshot").error.is_some());

        let empty = coordinator.execute(1, StudyBlockPatch::default()).await;
        assert!(matches!(empty, Err(StoreError::EmptyPatch)));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_reschedule_resorts_blocks() {
        let algebra = topic(1, "Algebra", TopicStatus::NotStarted);
        let first = block(1, &algebra);
        let second = block(2, &algebra);
        let state = seeded_state(LockScope::Plan, vec![algebra.clone()], vec![first.clone(), second.clone()]);
        let gateway = Arc::new(FakeBlockGateway::with_responses(vec![
            FakeUpdateResponse::Echo(first.clone()),
        ]));
        let coordinator = OptimisticUpdateCoordinator::new(gateway, Arc::clone(&state), TopicStatusBridge::default());

        coordinator
            .execute(1, StudyBlockPatch::reschedule(fixed_time("2026-03-10T08:00:00Z")))
            .await
            .expect("reschedule");

        let ids = blocks_of(&state).iter().map(|block| block.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 1]);
    }

    // A drag only ever moves the start: duration and notes survive reconcile.
    proptest! {
        #[test]
        fn reschedule_leaves_duration_and_notes(
            offset_minutes in 0i64..(60 * 24 * 30),
            duration in 1u32..600,
            notes in "[a-z ]{0,24}"
        ) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let algebra = topic(1, "Algebra", TopicStatus::NotStarted);
                let mut original = block(1, &algebra);
                original.duration_minutes = Some(duration);
                original.notes = Some(notes.clone());
                let state = seeded_state(LockScope::Plan, vec![algebra.clone()], vec![original.clone()]);
                let gateway = Arc::new(FakeBlockGateway::with_responses(vec![
                    FakeUpdateResponse::Echo(original.clone()),
                ]));
                let coordinator = OptimisticUpdateCoordinator::new(
                    Arc::clone(&gateway),
                    Arc::clone(&state),
                    TopicStatusBridge::default(),
                );
                let new_start = fixed_time("2026-03-01T00:00:00Z") + chrono::Duration::minutes(offset_minutes);

                let merged = coordinator
                    .execute(1, StudyBlockPatch::reschedule(new_start))
                    .await
                    .expect("reschedule");

                let sent = gateway.patches.lock().expect("patch log").clone();
                assert_eq!(sent.len(), 1);
                assert_eq!(sent[0].1.field_names(), vec!["scheduled_at"]);
                assert_eq!(merged.scheduled_at, Some(new_start));
                assert_eq!(merged.duration_minutes, Some(duration));
                assert_eq!(merged.notes.as_deref(), Some(notes.as_str()));
            });
        }
    }
}
