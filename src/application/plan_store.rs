use crate::application::error::StoreError;
use crate::application::optimistic::OptimisticUpdateCoordinator;
use crate::application::state::{PlanState, PlanStoreSnapshot, SharedPlanState};
use crate::application::topic_bridge::{TopicStatusBridge, TopicStatusListener};
use crate::domain::models::{
    BlockId, MaterialId, StudyBlock, StudyBlockPatch, StudyBlockStatus, StudyPlan, SubjectId,
    Topic, TopicId,
};
use crate::infrastructure::config::LockScope;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::study_plan_client::{
    BlockMutationGateway, GenerateOptions, GeneratePlanRequest, PlanGenerationGateway,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub lock_scope: LockScope,
    /// Forwarded to generation requests; `None` leaves the backend default.
    pub use_ai: Option<bool>,
}

/// What the user asked the generate button to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationIntent {
    /// First plan for the subject.
    Create,
    /// Add blocks for newly actionable topics to the current plan.
    Update,
    /// Archive the current plan and build a new one.
    StartOver,
}

impl GenerationIntent {
    fn force_regenerate(self, has_plan: bool) -> bool {
        match self {
            Self::Create => !has_plan,
            Self::Update => false,
            Self::StartOver => true,
        }
    }
}

/// Owns the active plan and topic collection for one subject and exposes
/// every plan/block operation the view layer needs.
pub struct PlanStore<P, B>
where
    P: PlanGenerationGateway,
    B: BlockMutationGateway,
{
    plan_gateway: Arc<P>,
    state: Arc<SharedPlanState>,
    coordinator: OptimisticUpdateCoordinator<B>,
    bridge: TopicStatusBridge,
    options: StoreOptions,
}

impl<P, B> PlanStore<P, B>
where
    P: PlanGenerationGateway,
    B: BlockMutationGateway,
{
    pub fn new(plan_gateway: Arc<P>, block_gateway: Arc<B>, options: StoreOptions) -> Self {
        let state = Arc::new(SharedPlanState::new(options.lock_scope));
        let bridge = TopicStatusBridge::default();
        let coordinator =
            OptimisticUpdateCoordinator::new(block_gateway, Arc::clone(&state), bridge.clone());
        Self {
            plan_gateway,
            state,
            coordinator,
            bridge,
            options,
        }
    }

    pub fn with_topic_listener(mut self, listener: Arc<dyn TopicStatusListener>) -> Self {
        self.bridge = TopicStatusBridge::new(Some(listener));
        self.coordinator = self.coordinator.with_bridge(self.bridge.clone());
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<PlanStoreSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> Result<PlanStoreSnapshot, StoreError> {
        self.state.snapshot()
    }

    /// Reads the active plan for `subject_id`. `Ok(None)` means the subject has
    /// no plan yet. On failure the previously loaded plan is kept.
    pub async fn load(
        &self,
        subject_id: SubjectId,
        subject_name: Option<String>,
    ) -> Result<Option<StudyPlan>, StoreError> {
        let epoch = self.state.update(|state| {
            if state.closed {
                return Err(StoreError::Discarded);
            }
            state.switch_subject(subject_id, subject_name);
            state.is_loading = true;
            state.error = None;
            Ok(state.epoch)
        })??;
        debug!(subject_id, "loading active study plan");

        let result = self.plan_gateway.fetch_active(subject_id).await;

        self.state.update(|state| {
            if state.closed || state.epoch != epoch {
                debug!(subject_id, "discarding stale plan read");
                return Err(StoreError::Discarded);
            }
            state.is_loading = false;
            let result = result.and_then(|plan| {
                plan.map(|plan| accept_plan(plan, subject_id, state.topics.as_slice()))
                    .transpose()
            });
            match result {
                Ok(plan) => {
                    info!(
                        subject_id,
                        plan_id = plan.as_ref().map(|plan| plan.id),
                        "study plan loaded"
                    );
                    state.replace_plan(plan.clone());
                    Ok(plan)
                }
                Err(error) => {
                    warn!(subject_id, error = %error, "failed to load study plan");
                    let error = StoreError::Gateway(error);
                    state.record_error(&error);
                    Err(error)
                }
            }
        })?
    }

    pub async fn refresh(&self) -> Result<Option<StudyPlan>, StoreError> {
        let subject_id = self.state.update(|state| {
            let subject_id = state.subject_id.ok_or(StoreError::NoSubject);
            if let Err(error) = &subject_id {
                state.record_error(error);
            }
            subject_id
        })??;
        self.load(subject_id, None).await
    }

    /// Creates, extends or rebuilds the plan. A failure never clears the
    /// previously loaded plan.
    pub async fn generate(&self, intent: GenerationIntent) -> Result<StudyPlan, StoreError> {
        let (request, options, subject_epoch) = self.state.update(|state| {
            let prepared = self.prepare_generation(state, intent);
            if let Err(error) = &prepared {
                state.record_error(error);
            }
            prepared
        })??;
        info!(
            subject_id = request.subject_id,
            force_regenerate = options.force_regenerate,
            "generating study plan"
        );

        let result = self.plan_gateway.generate(&request, &options).await;

        self.state.update(|state| {
            if state.closed || state.subject_epoch != subject_epoch {
                debug!(subject_id = request.subject_id, "discarding plan for a stale subject");
                return Err(StoreError::Discarded);
            }
            state.is_generating = false;
            let result = result
                .and_then(|plan| accept_plan(plan, request.subject_id, state.topics.as_slice()));
            match result {
                Ok(plan) => {
                    info!(
                        subject_id = plan.subject_id,
                        plan_id = plan.id,
                        blocks = plan.study_blocks.len(),
                        "study plan generated"
                    );
                    state.replace_plan(Some(plan.clone()));
                    Ok(plan)
                }
                Err(error) => {
                    warn!(subject_id = request.subject_id, error = %error, "plan generation failed");
                    let error = StoreError::Gateway(error);
                    state.record_error(&error);
                    Err(error)
                }
            }
        })?
    }

    fn prepare_generation(
        &self,
        state: &mut PlanState,
        intent: GenerationIntent,
    ) -> Result<(GeneratePlanRequest, GenerateOptions, u64), StoreError> {
        if state.closed {
            return Err(StoreError::Discarded);
        }
        let subject_id = state.subject_id.ok_or(StoreError::NoSubject)?;
        if state.is_generating {
            return Err(StoreError::GenerationInProgress);
        }

        let has_plan = state.plan.is_some();
        let name = state
            .plan
            .as_ref()
            .and_then(|plan| plan.name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToOwned::to_owned)
            .or_else(|| {
                state
                    .subject_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(|name| format!("Plan for {name}"))
            });

        state.is_generating = true;
        state.error = None;

        Ok((
            GeneratePlanRequest { subject_id, name },
            GenerateOptions {
                force_regenerate: intent.force_regenerate(has_plan),
                use_ai: self.options.use_ai,
            },
            state.subject_epoch,
        ))
    }

    pub async fn update_block(
        &self,
        block_id: BlockId,
        patch: StudyBlockPatch,
    ) -> Result<StudyBlock, StoreError> {
        self.coordinator.execute(block_id, patch).await
    }

    pub async fn update_block_status(
        &self,
        block_id: BlockId,
        status: StudyBlockStatus,
    ) -> Result<StudyBlock, StoreError> {
        self.update_block(block_id, StudyBlockPatch::status(status)).await
    }

    /// `None` clears the notes.
    pub async fn update_block_notes(
        &self,
        block_id: BlockId,
        notes: Option<String>,
    ) -> Result<StudyBlock, StoreError> {
        self.update_block(block_id, StudyBlockPatch::notes(notes)).await
    }

    pub async fn reschedule_block(
        &self,
        block_id: BlockId,
        start: DateTime<Utc>,
    ) -> Result<StudyBlock, StoreError> {
        self.update_block(block_id, StudyBlockPatch::reschedule(start)).await
    }

    pub async fn set_block_duration(
        &self,
        block_id: BlockId,
        minutes: Option<u32>,
    ) -> Result<StudyBlock, StoreError> {
        self.update_block(block_id, StudyBlockPatch::duration(minutes)).await
    }

    pub async fn attach_material(
        &self,
        block_id: BlockId,
        material_id: Option<MaterialId>,
    ) -> Result<StudyBlock, StoreError> {
        self.update_block(block_id, StudyBlockPatch::material(material_id))
            .await
    }

    /// Whether edit affordances for the block must be disabled right now.
    pub fn is_updating(&self, block_id: BlockId) -> Result<bool, StoreError> {
        self.state.read(|state| state.locks.is_updating(block_id))
    }

    pub fn select_block(&self, block_id: BlockId) -> Result<(), StoreError> {
        self.state.update(|state| {
            let exists = state
                .plan
                .as_ref()
                .map(|plan| plan.block(block_id).is_some());
            let result = match exists {
                None => Err(StoreError::NoActivePlan),
                Some(false) => Err(StoreError::UnknownBlock(block_id)),
                Some(true) => {
                    state.selected_block_id = Some(block_id);
                    Ok(())
                }
            };
            if let Err(error) = &result {
                state.record_error(error);
            }
            result
        })?
    }

    pub fn clear_selection(&self) -> Result<(), StoreError> {
        self.state.update(|state| state.selected_block_id = None)
    }

    /// Replaces the topic collection of `subject_id`, selecting that subject
    /// first when another one (or none) is current.
    pub fn set_topics(&self, subject_id: SubjectId, topics: Vec<Topic>) -> Result<(), StoreError> {
        for topic in &topics {
            validate_topic(topic, subject_id)?;
        }
        self.state.update(|state| {
            if state.closed {
                return Err(StoreError::Discarded);
            }
            state.switch_subject(subject_id, None);
            state.topics.replace(topics);
            Ok(())
        })?
    }

    pub fn upsert_topic(&self, topic: Topic) -> Result<Option<Topic>, StoreError> {
        topic.validate().map_err(StoreError::InvalidTopic)?;
        self.state.update(|state| {
            let subject_id = state.subject_id.ok_or(StoreError::NoSubject)?;
            validate_topic(&topic, subject_id)?;
            Ok(state.topics.upsert(topic))
        })?
    }

    /// Drops a deleted topic. When the plan still has blocks for it the plan is
    /// re-read, since the backend removes those blocks with the topic.
    pub async fn remove_topic(&self, topic_id: TopicId) -> Result<Option<Topic>, StoreError> {
        let (removed, referenced) = self.state.update(|state| {
            let removed = state.topics.remove(topic_id);
            let referenced = state
                .plan
                .as_ref()
                .map(|plan| plan.covers_topic(topic_id))
                .unwrap_or(false);
            (removed, referenced)
        })?;
        if referenced {
            debug!(topic_id, "removed topic is part of the plan; refreshing");
            self.refresh().await?;
        }
        Ok(removed)
    }

    /// Detaches the store; in-flight results are dropped on arrival.
    pub fn close(&self) -> Result<(), StoreError> {
        self.state.update(PlanState::close)
    }
}

fn validate_topic(topic: &Topic, subject_id: SubjectId) -> Result<(), StoreError> {
    topic.validate().map_err(StoreError::InvalidTopic)?;
    if topic.subject_id != subject_id {
        return Err(StoreError::InvalidTopic(format!(
            "topic {} belongs to subject {} not {}",
            topic.id, topic.subject_id, subject_id
        )));
    }
    Ok(())
}

/// Rejects a plan for another subject or one whose blocks point at topics of
/// another subject.
fn accept_plan(
    plan: StudyPlan,
    subject_id: SubjectId,
    topics: &[Topic],
) -> Result<StudyPlan, InfraError> {
    if plan.subject_id != subject_id {
        return Err(InfraError::InvalidPayload(format!(
            "plan {} belongs to subject {} not {}",
            plan.id, plan.subject_id, subject_id
        )));
    }
    plan.validate(topics).map_err(InfraError::InvalidPayload)?;
    Ok(plan)
}
