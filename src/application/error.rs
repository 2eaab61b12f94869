use crate::domain::models::BlockId;
use crate::infrastructure::error::InfraError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Gateway(#[from] InfraError),
    #[error("no active study plan is loaded")]
    NoActivePlan,
    #[error("study block {0} is not part of the active plan")]
    UnknownBlock(BlockId),
    #[error("study block {0} already has an update in flight")]
    BlockBusy(BlockId),
    #[error("a plan generation is already in progress")]
    GenerationInProgress,
    #[error("no subject is selected")]
    NoSubject,
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
    #[error("result discarded: the store moved on while the request was in flight")]
    Discarded,
    #[error("block patch has no fields to update")]
    EmptyPatch,
    #[error("store state error: {0}")]
    State(String),
}

impl StoreError {
    /// Whether the failure is surfaced as the plan-level error message.
    /// Rejections that happen before any state change are not.
    pub fn is_reportable(&self) -> bool {
        !matches!(
            self,
            Self::BlockBusy(_) | Self::GenerationInProgress | Self::Discarded | Self::EmptyPatch
        )
    }
}
