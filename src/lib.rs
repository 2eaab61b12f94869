pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::block_locks::BlockSyncState;
pub use application::calendar_sync::CalendarSyncAdapter;
pub use application::error::StoreError;
pub use application::plan_store::{GenerationIntent, PlanStore, StoreOptions};
pub use application::state::PlanStoreSnapshot;
pub use application::topic_bridge::TopicStatusListener;
pub use domain::actionable::PlanAction;
pub use domain::models::{
    StudyBlock, StudyBlockPatch, StudyBlockStatus, StudyPlan, StudyPlanStatus, Topic, TopicStatus,
};
pub use infrastructure::error::InfraError;

use application::bootstrap::bootstrap_workspace;
use infrastructure::config::{apply_overrides, ClientConfig};
use infrastructure::credential_store::{KeyringTokenProvider, StaticTokenProvider, TokenProvider};
use infrastructure::study_plan_client::ReqwestStudyPlanClient;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub type HttpPlanStore = PlanStore<ReqwestStudyPlanClient, ReqwestStudyPlanClient>;
pub type HttpCalendarAdapter = CalendarSyncAdapter<ReqwestStudyPlanClient, ReqwestStudyPlanClient>;

pub struct OpenedStore {
    pub config: ClientConfig,
    pub store: Arc<HttpPlanStore>,
    pub calendar: HttpCalendarAdapter,
}

/// `STUDYPLAN_TOKEN` wins over the keyring entry.
pub fn token_provider_for(config: &ClientConfig) -> Arc<dyn TokenProvider> {
    match config.static_token.as_deref() {
        Some(token) => Arc::new(StaticTokenProvider::new(token)),
        None => Arc::new(KeyringTokenProvider::new(
            config.credential_service.clone(),
            config.credential_account.clone(),
        )),
    }
}

/// Bootstraps `workspace_root`, applies environment overrides and wires a
/// store against the configured backend.
pub fn open_store(workspace_root: &Path) -> Result<OpenedStore, InfraError> {
    open_store_with(workspace_root, |key| std::env::var(key).ok())
}

pub fn open_store_with<F>(workspace_root: &Path, lookup: F) -> Result<OpenedStore, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let bootstrap = bootstrap_workspace(workspace_root)?;
    let config = apply_overrides(bootstrap.config, lookup)?;

    let client = Arc::new(ReqwestStudyPlanClient::from_config(
        &config,
        token_provider_for(&config),
    )?);
    let store = Arc::new(PlanStore::new(
        Arc::clone(&client),
        client,
        StoreOptions {
            lock_scope: config.lock_scope,
            use_ai: None,
        },
    ));
    let calendar = CalendarSyncAdapter::from_config(Arc::clone(&store), &config)?;
    info!(
        api_base_url = %config.api_base_url,
        timezone = %config.timezone,
        "study plan store ready"
    );

    Ok(OpenedStore {
        config,
        store,
        calendar,
    })
}
