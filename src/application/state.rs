use crate::application::block_locks::{BlockLocks, BlockSyncState};
use crate::application::error::StoreError;
use crate::application::topic_bridge::TopicCollection;
use crate::domain::actionable::{actionable_topic_count, PlanAction};
use crate::domain::models::{BlockId, StudyBlock, StudyPlan, SubjectId, Topic};
use crate::infrastructure::config::LockScope;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

/// What the view layer renders. Derived values are recomputed on every publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStoreSnapshot {
    pub subject_id: Option<SubjectId>,
    pub plan: Option<StudyPlan>,
    pub has_loaded: bool,
    pub is_loading: bool,
    pub is_generating: bool,
    pub error: Option<String>,
    pub topics: Vec<Topic>,
    pub actionable_topics: usize,
    pub plan_action: PlanAction,
    pub block_states: BTreeMap<BlockId, BlockSyncState>,
    pub selected_block: Option<StudyBlock>,
    pub closed: bool,
}

impl PlanStoreSnapshot {
    pub fn block_state(&self, block_id: BlockId) -> BlockSyncState {
        self.block_states
            .get(&block_id)
            .cloned()
            .unwrap_or(BlockSyncState::Idle)
    }
}

#[derive(Debug)]
pub struct PlanState {
    pub subject_id: Option<SubjectId>,
    pub subject_name: Option<String>,
    pub plan: Option<StudyPlan>,
    pub has_loaded: bool,
    pub is_loading: bool,
    pub is_generating: bool,
    pub error: Option<String>,
    pub topics: TopicCollection,
    pub selected_block_id: Option<BlockId>,
    pub locks: BlockLocks,
    /// Advances whenever the plan is replaced wholesale, the subject changes
    /// or the store closes. Block mutations compare against it.
    pub epoch: u64,
    /// Advances only on subject change or close. Generation compares against it.
    pub subject_epoch: u64,
    pub closed: bool,
}

impl PlanState {
    fn new(lock_scope: LockScope) -> Self {
        Self {
            subject_id: None,
            subject_name: None,
            plan: None,
            has_loaded: false,
            is_loading: false,
            is_generating: false,
            error: None,
            topics: TopicCollection::default(),
            selected_block_id: None,
            locks: BlockLocks::new(lock_scope),
            epoch: 0,
            subject_epoch: 0,
            closed: false,
        }
    }

    /// Switches to another subject, dropping everything tied to the old one.
    pub fn switch_subject(&mut self, subject_id: SubjectId, subject_name: Option<String>) {
        if self.subject_id != Some(subject_id) {
            self.subject_id = Some(subject_id);
            self.plan = None;
            self.has_loaded = false;
            self.is_generating = false;
            self.topics.clear();
            self.selected_block_id = None;
            self.locks.reset();
            self.epoch += 1;
            self.subject_epoch += 1;
        }
        if subject_name.is_some() {
            self.subject_name = subject_name;
        }
    }

    pub fn replace_plan(&mut self, plan: Option<StudyPlan>) {
        self.plan = plan;
        self.has_loaded = true;
        self.locks.reset();
        self.epoch += 1;
        let selection_survives = match (self.selected_block_id, self.plan.as_ref()) {
            (Some(block_id), Some(plan)) => plan.block(block_id).is_some(),
            _ => false,
        };
        if !selection_survives {
            self.selected_block_id = None;
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.is_loading = false;
        self.is_generating = false;
        self.locks.reset();
        self.epoch += 1;
        self.subject_epoch += 1;
    }

    pub fn record_error(&mut self, error: &StoreError) {
        if error.is_reportable() {
            self.error = Some(error.to_string());
        }
    }

    pub fn snapshot(&self) -> PlanStoreSnapshot {
        let plan = self.plan.as_ref();
        let actionable_topics = actionable_topic_count(self.topics.as_slice(), plan);
        PlanStoreSnapshot {
            subject_id: self.subject_id,
            plan: self.plan.clone(),
            has_loaded: self.has_loaded,
            is_loading: self.is_loading,
            is_generating: self.is_generating,
            error: self.error.clone(),
            topics: self.topics.as_slice().to_vec(),
            actionable_topics,
            plan_action: PlanAction::derive(actionable_topics, plan),
            block_states: self.locks.states(),
            selected_block: self
                .selected_block_id
                .and_then(|block_id| plan.and_then(|plan| plan.block(block_id)))
                .cloned(),
            closed: self.closed,
        }
    }
}

/// Plan state behind a mutex plus a watch channel carrying the latest snapshot.
/// The mutex is never held across an await.
pub struct SharedPlanState {
    inner: Mutex<PlanState>,
    publisher: watch::Sender<PlanStoreSnapshot>,
}

impl SharedPlanState {
    pub fn new(lock_scope: LockScope) -> Self {
        let state = PlanState::new(lock_scope);
        let (publisher, _) = watch::channel(state.snapshot());
        Self {
            inner: Mutex::new(state),
            publisher,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PlanState>, StoreError> {
        self.inner
            .lock()
            .map_err(|error| StoreError::State(format!("plan state lock poisoned: {error}")))
    }

    pub fn read<T>(&self, read: impl FnOnce(&PlanState) -> T) -> Result<T, StoreError> {
        let guard = self.lock()?;
        Ok(read(&*guard))
    }

    /// Runs `mutate` under the lock and publishes the resulting snapshot when
    /// it differs from the last one. Publishing happens before the lock is
    /// released so snapshots reach subscribers in mutation order.
    pub fn update<T>(&self, mutate: impl FnOnce(&mut PlanState) -> T) -> Result<T, StoreError> {
        let mut guard = self.lock()?;
        let result = mutate(&mut *guard);
        let snapshot = guard.snapshot();

        self.publisher.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
        drop(guard);
        Ok(result)
    }

    pub fn snapshot(&self) -> Result<PlanStoreSnapshot, StoreError> {
        self.read(PlanState::snapshot)
    }

    pub fn subscribe(&self) -> watch::Receiver<PlanStoreSnapshot> {
        self.publisher.subscribe()
    }
}
