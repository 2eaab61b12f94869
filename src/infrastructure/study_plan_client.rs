use crate::domain::models::{
    BlockId, StudyBlockPatch, StudyBlockRecord, StudyPlan, SubjectId,
};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::credential_store::TokenProvider;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const UPDATE_BLOCK_FALLBACK: &str = "failed to update study block";
const GENERATE_PLAN_FALLBACK: &str = "failed to generate or get study plan";
const FETCH_PLAN_FALLBACK: &str = "failed to fetch study plan";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Archive the active plan and build a new one.
    pub force_regenerate: bool,
    /// `Some(false)` asks the backend for its non-AI fallback scheduler.
    pub use_ai: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratePlanRequest {
    pub subject_id: SubjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[async_trait]
pub trait PlanGenerationGateway: Send + Sync {
    async fn generate(
        &self,
        request: &GeneratePlanRequest,
        options: &GenerateOptions,
    ) -> Result<StudyPlan, InfraError>;

    /// Active plan for the subject, `None` when the subject has none.
    async fn fetch_active(&self, subject_id: SubjectId) -> Result<Option<StudyPlan>, InfraError>;
}

#[async_trait]
pub trait BlockMutationGateway: Send + Sync {
    async fn update_block(
        &self,
        block_id: BlockId,
        patch: &StudyBlockPatch,
    ) -> Result<StudyBlockRecord, InfraError>;
}

#[derive(Clone)]
pub struct ReqwestStudyPlanClient {
    client: Client,
    base_url: Url,
    token_provider: Arc<dyn TokenProvider>,
}

impl ReqwestStudyPlanClient {
    pub fn new(
        base_url: Url,
        token_provider: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(format!(
                "api base url cannot be a base: {base_url}"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Network(format!("failed to build http client: {error}")))?;
        Ok(Self {
            client,
            base_url,
            token_provider,
        })
    }

    pub fn from_config(
        config: &ClientConfig,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Result<Self, InfraError> {
        Self::new(
            config.api_url()?,
            token_provider,
            Duration::from_secs(config.request_timeout_seconds),
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("api base url cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn http_error(status: StatusCode, body: &str, fallback: &str) -> InfraError {
        let detail = match serde_json::from_str::<serde_json::Value>(body) {
            Ok(parsed) => extract_detail(&parsed)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            Err(_) => fallback.to_string(),
        };
        InfraError::Http {
            status: status.as_u16(),
            detail,
        }
    }
}

fn extract_detail(payload: &serde_json::Value) -> Option<String> {
    let detail = payload.get("detail")?;
    if let Some(message) = detail.as_str() {
        return Some(message.trim().to_string()).filter(|message| !message.is_empty());
    }
    // Validation errors arrive as a list of {loc, msg, type}.
    detail
        .as_array()
        .and_then(|items| items.first())
        .and_then(|item| item.get("msg"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
}

#[async_trait]
impl PlanGenerationGateway for ReqwestStudyPlanClient {
    async fn generate(
        &self,
        request: &GeneratePlanRequest,
        options: &GenerateOptions,
    ) -> Result<StudyPlan, InfraError> {
        let token = self.token_provider.require_token()?;
        // Trailing empty segment keeps the collection route's slash.
        let endpoint = self.endpoint(&["study-plans", ""])?;

        let mut req = self.client.post(endpoint).bearer_auth(token).json(request);
        if options.force_regenerate {
            req = req.query(&[("force_regenerate", "true")]);
        }
        if options.use_ai == Some(false) {
            req = req.query(&[("use_ai", "false")]);
        }

        debug!(
            subject_id = request.subject_id,
            force_regenerate = options.force_regenerate,
            "requesting study plan generation"
        );
        let response = req.send().await.map_err(|error| {
            InfraError::Network(format!("network error while generating study plan: {error}"))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading study plan response: {error}"))
        })?;

        if !status.is_success() {
            warn!(subject_id = request.subject_id, status = status.as_u16(), "plan generation rejected");
            return Err(Self::http_error(status, &body, GENERATE_PLAN_FALLBACK));
        }

        serde_json::from_str(&body).map_err(|error| {
            InfraError::InvalidPayload(format!("invalid study plan payload: {error}; body={body}"))
        })
    }

    async fn fetch_active(&self, subject_id: SubjectId) -> Result<Option<StudyPlan>, InfraError> {
        let token = self.token_provider.require_token()?;
        let subject_segment = subject_id.to_string();
        let endpoint = self.endpoint(&["study-plans", "subject", &subject_segment])?;

        let response = self
            .client
            .get(endpoint)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| {
                InfraError::Network(format!("network error while fetching study plan: {error}"))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(subject_id, "no active study plan");
            return Ok(None);
        }

        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading study plan response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::http_error(status, &body, FETCH_PLAN_FALLBACK));
        }

        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }

        serde_json::from_str(trimmed).map(Some).map_err(|error| {
            InfraError::InvalidPayload(format!("invalid study plan payload: {error}; body={body}"))
        })
    }
}

#[async_trait]
impl BlockMutationGateway for ReqwestStudyPlanClient {
    async fn update_block(
        &self,
        block_id: BlockId,
        patch: &StudyBlockPatch,
    ) -> Result<StudyBlockRecord, InfraError> {
        let token = self.token_provider.require_token()?;
        let block_segment = block_id.to_string();
        let endpoint = self.endpoint(&["study-plans", "blocks", &block_segment])?;

        debug!(block_id, fields = ?patch.field_names(), "sending block patch");
        let response = self
            .client
            .put(endpoint)
            .bearer_auth(token)
            .json(patch)
            .send()
            .await
            .map_err(|error| {
                InfraError::Network(format!("network error while updating study block: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading study block response: {error}"))
        })?;

        if !status.is_success() {
            warn!(block_id, status = status.as_u16(), "block patch rejected");
            return Err(Self::http_error(status, &body, UPDATE_BLOCK_FALLBACK));
        }

        serde_json::from_str(&body).map_err(|error| {
            InfraError::InvalidPayload(format!("invalid study block payload: {error}; body={body}"))
        })
    }
}
