use crate::application::error::StoreError;
use crate::application::plan_store::PlanStore;
use crate::domain::models::StudyBlock;
use crate::infrastructure::calendar_mapper::{
    block_to_event, drop_to_patch, status_palette, CalendarEvent, EventPalette,
};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::study_plan_client::{BlockMutationGateway, PlanGenerationGateway};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::debug;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Binds a plan store to a calendar view: blocks out as events, drops back in
/// as reschedule patches.
pub struct CalendarSyncAdapter<P, B>
where
    P: PlanGenerationGateway,
    B: BlockMutationGateway,
{
    store: Arc<PlanStore<P, B>>,
    timezone: Tz,
    default_event_minutes: u32,
    now_provider: NowProvider,
}

impl<P, B> CalendarSyncAdapter<P, B>
where
    P: PlanGenerationGateway,
    B: BlockMutationGateway,
{
    pub fn new(store: Arc<PlanStore<P, B>>, timezone: Tz, default_event_minutes: u32) -> Self {
        Self {
            store,
            timezone,
            default_event_minutes,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn from_config(store: Arc<PlanStore<P, B>>, config: &ClientConfig) -> Result<Self, InfraError> {
        Ok(Self::new(store, config.tz()?, config.default_event_minutes))
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Events for every block of the current plan; empty when there is no plan.
    pub fn events(&self) -> Result<Vec<CalendarEvent>, StoreError> {
        let snapshot = self.store.snapshot()?;
        let now = (self.now_provider)();
        Ok(snapshot
            .plan
            .map(|plan| {
                plan.study_blocks
                    .iter()
                    .map(|block| block_to_event(block, now, self.timezone, self.default_event_minutes))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Issues exactly one reschedule for the dropped event. The new end is
    /// ignored so a drag never changes the block's length.
    pub async fn handle_drop<Z>(
        &self,
        event: &CalendarEvent,
        new_start: DateTime<Z>,
        new_end: DateTime<Z>,
    ) -> Result<StudyBlock, StoreError>
    where
        Z: TimeZone,
    {
        let (block_id, patch) = drop_to_patch(event, new_start, new_end);
        debug!(block_id, "calendar drop translated to reschedule");
        self.store.update_block(block_id, patch).await
    }

    pub fn select_event(&self, event: &CalendarEvent) -> Result<(), StoreError> {
        self.store.select_block(event.id)
    }

    pub fn palette(&self, event: &CalendarEvent) -> EventPalette {
        status_palette(event.resource.status)
    }
}
