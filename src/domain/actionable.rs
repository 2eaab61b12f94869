use crate::domain::models::{StudyPlan, Topic, TopicId};
use std::collections::HashSet;

/// Topics that are neither completed nor represented by a block in `plan`.
/// With no plan every unfinished topic is actionable.
pub fn actionable_topics<'a>(topics: &'a [Topic], plan: Option<&StudyPlan>) -> Vec<&'a Topic> {
    let planned = plan
        .map(|plan| {
            plan.study_blocks
                .iter()
                .map(|block| block.topic_id)
                .collect::<HashSet<TopicId>>()
        })
        .unwrap_or_default();

    topics
        .iter()
        .filter(|topic| !topic.is_completed() && !planned.contains(&topic.id))
        .collect()
}

pub fn actionable_topic_count(topics: &[Topic], plan: Option<&StudyPlan>) -> usize {
    actionable_topics(topics, plan).len()
}

/// State of the "Generate/Update Plan" affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    CreatePlan { new_topics: usize },
    UpdatePlan { new_topics: usize },
    AddTopicsFirst,
    PlanIsCurrent,
}

impl PlanAction {
    pub fn derive(actionable: usize, plan: Option<&StudyPlan>) -> Self {
        match (plan.is_some(), actionable) {
            (false, 0) => Self::AddTopicsFirst,
            (false, new_topics) => Self::CreatePlan { new_topics },
            (true, 0) => Self::PlanIsCurrent,
            (true, new_topics) => Self::UpdatePlan { new_topics },
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::CreatePlan { .. } | Self::UpdatePlan { .. })
    }

    pub fn label(&self) -> String {
        match self {
            Self::CreatePlan { .. } => "Generate plan".to_string(),
            Self::UpdatePlan { new_topics: 1 } => "Update plan (1 new topic)".to_string(),
            Self::UpdatePlan { new_topics } => format!("Update plan ({new_topics} new topics)"),
            Self::AddTopicsFirst => "Add topics first".to_string(),
            Self::PlanIsCurrent => "Plan is current".to_string(),
        }
    }
}
