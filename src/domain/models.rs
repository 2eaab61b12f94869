use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type SubjectId = i64;
pub type TopicId = i64;
pub type PlanId = i64;
pub type BlockId = i64;
pub type MaterialId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    NotStarted,
    InProgress,
    Completed,
    NeedsReview,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserDifficulty {
    VeryEasy,
    Easy,
    Medium,
    Hard,
    VeryHard,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StudyBlockStatus {
    Planned,
    InProgress,
    Completed,
    Skipped,
}

impl StudyBlockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StudyPlanStatus {
    Active,
    Archived,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub id: TopicId,
    pub subject_id: SubjectId,
    pub name: String,
    pub status: TopicStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_difficulty: Option<UserDifficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_difficulty_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_estimated_duration: Option<u32>,
}

impl Topic {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "topic.name")?;
        if let Some(score) = self.ai_difficulty_score {
            if !score.is_finite() {
                return Err("topic.ai_difficulty_score must be finite".to_string());
            }
        }
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.status == TopicStatus::Completed
    }
}

/// Topic detail embedded in a study block. The backend nests the whole topic,
/// but only the fields the schedule views need are kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicSummary {
    pub id: TopicId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<SubjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TopicStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_difficulty: Option<UserDifficulty>,
}

impl TopicSummary {
    pub fn is_blank(&self) -> bool {
        self.name.trim().is_empty()
    }
}

impl From<&Topic> for TopicSummary {
    fn from(topic: &Topic) -> Self {
        Self {
            id: topic.id,
            name: topic.name.clone(),
            subject_id: Some(topic.subject_id),
            status: Some(topic.status),
            user_difficulty: topic.user_difficulty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudyBlock {
    pub id: BlockId,
    pub study_plan_id: PlanId,
    pub topic_id: TopicId,
    pub topic: TopicSummary,
    #[serde(default, deserialize_with = "timestamp::deserialize_optional")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    pub status: StudyBlockStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub material_id: Option<MaterialId>,
}

impl StudyBlock {
    pub fn validate(&self) -> Result<(), String> {
        if self.topic.id != self.topic_id {
            return Err(format!(
                "block {} embeds topic {} but references topic {}",
                self.id, self.topic.id, self.topic_id
            ));
        }
        Ok(())
    }

    /// Start and end of the block for display, substituting `fallback_start`
    /// and `default_minutes` for missing schedule data.
    pub fn display_range(
        &self,
        fallback_start: DateTime<Utc>,
        default_minutes: u32,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.scheduled_at.unwrap_or(fallback_start);
        let minutes = self.duration_minutes.unwrap_or(default_minutes);
        (start, start + Duration::minutes(i64::from(minutes)))
    }
}

/// Block as returned by `PUT /study-plans/blocks/{id}`. The nested topic is
/// not guaranteed to be present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudyBlockRecord {
    pub id: BlockId,
    pub study_plan_id: PlanId,
    pub topic_id: TopicId,
    #[serde(default)]
    pub topic: Option<TopicSummary>,
    #[serde(default, deserialize_with = "timestamp::deserialize_optional")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    pub status: StudyBlockStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub material_id: Option<MaterialId>,
}

impl From<StudyBlock> for StudyBlockRecord {
    fn from(block: StudyBlock) -> Self {
        Self {
            id: block.id,
            study_plan_id: block.study_plan_id,
            topic_id: block.topic_id,
            topic: Some(block.topic),
            scheduled_at: block.scheduled_at,
            duration_minutes: block.duration_minutes,
            status: block.status,
            notes: block.notes,
            material_id: block.material_id,
        }
    }
}

/// Merges an authoritative block into its local counterpart. Every field comes
/// from the response except the embedded topic, which is taken from `local`
/// unless the response carries a non-blank one.
pub fn reconcile_block(local: &StudyBlock, response: StudyBlockRecord) -> StudyBlock {
    let topic = response
        .topic
        .filter(|topic| !topic.is_blank())
        .unwrap_or_else(|| local.topic.clone());

    StudyBlock {
        id: response.id,
        study_plan_id: response.study_plan_id,
        topic_id: response.topic_id,
        topic,
        scheduled_at: response.scheduled_at,
        duration_minutes: response.duration_minutes,
        status: response.status,
        notes: response.notes,
        material_id: response.material_id,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudyPlan {
    pub id: PlanId,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    pub status: StudyPlanStatus,
    #[serde(default)]
    pub study_blocks: Vec<StudyBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
}

impl StudyPlan {
    pub fn validate(&self, topics: &[Topic]) -> Result<(), String> {
        for block in &self.study_blocks {
            block.validate()?;
            if block.study_plan_id != self.id {
                return Err(format!(
                    "block {} belongs to plan {} not {}",
                    block.id, block.study_plan_id, self.id
                ));
            }
            let topic_subject = topics
                .iter()
                .find(|topic| topic.id == block.topic_id)
                .map(|topic| topic.subject_id)
                .or(block.topic.subject_id);
            if let Some(subject_id) = topic_subject.filter(|subject_id| *subject_id != self.subject_id) {
                return Err(format!(
                    "block {} references topic {} of subject {} in a plan for subject {}",
                    block.id, block.topic_id, subject_id, self.subject_id
                ));
            }
        }
        Ok(())
    }

    pub fn block(&self, block_id: BlockId) -> Option<&StudyBlock> {
        self.study_blocks.iter().find(|block| block.id == block_id)
    }

    pub fn block_mut(&mut self, block_id: BlockId) -> Option<&mut StudyBlock> {
        self.study_blocks.iter_mut().find(|block| block.id == block_id)
    }

    pub fn covers_topic(&self, topic_id: TopicId) -> bool {
        self.study_blocks.iter().any(|block| block.topic_id == topic_id)
    }

    /// Stable sort by schedule; unscheduled blocks come first.
    pub fn sort_blocks_by_schedule(&mut self) {
        self.study_blocks.sort_by_key(|block| block.scheduled_at);
    }
}

/// Partial block update. Outer `None` means "leave unchanged"; for nullable
/// fields `Some(None)` clears the value and is sent as JSON `null`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StudyBlockPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<Option<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StudyBlockStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_id: Option<Option<MaterialId>>,
}

impl StudyBlockPatch {
    pub fn status(status: StudyBlockStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn notes(notes: Option<String>) -> Self {
        Self {
            notes: Some(notes),
            ..Self::default()
        }
    }

    pub fn reschedule(start: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: Some(Some(start)),
            ..Self::default()
        }
    }

    pub fn duration(minutes: Option<u32>) -> Self {
        Self {
            duration_minutes: Some(minutes),
            ..Self::default()
        }
    }

    pub fn material(material_id: Option<MaterialId>) -> Self {
        Self {
            material_id: Some(material_id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled_at.is_none()
            && self.duration_minutes.is_none()
            && self.status.is_none()
            && self.notes.is_none()
            && self.material_id.is_none()
    }

    pub fn completes(&self) -> bool {
        self.status == Some(StudyBlockStatus::Completed)
    }

    pub fn apply_to(&self, block: &mut StudyBlock) {
        if let Some(scheduled_at) = self.scheduled_at {
            block.scheduled_at = scheduled_at;
        }
        if let Some(duration_minutes) = self.duration_minutes {
            block.duration_minutes = duration_minutes;
        }
        if let Some(status) = self.status {
            block.status = status;
        }
        if let Some(notes) = &self.notes {
            block.notes = notes.clone();
        }
        if let Some(material_id) = self.material_id {
            block.material_id = material_id;
        }
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.scheduled_at.is_some() {
            fields.push("scheduled_at");
        }
        if self.duration_minutes.is_some() {
            fields.push("duration_minutes");
        }
        if self.status.is_some() {
            fields.push("status");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        if self.material_id.is_some() {
            fields.push("material_id");
        }
        fields
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

/// The backend emits naive ISO timestamps (no offset); those are read as UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn parse(value: &str) -> Result<DateTime<Utc>, String> {
        let trimmed = value.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(parsed.with_timezone(&Utc));
        }
        for format in NAIVE_FORMATS {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(parsed.and_utc());
            }
        }
        Err(format!("invalid timestamp '{value}'"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn deserialize_optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(parse)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
