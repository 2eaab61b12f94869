use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV_VAR: &str = "STUDYPLAN_LOG";

fn build_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Installs the global subscriber. Returns `false` when one is already set,
/// so embedding hosts and repeated calls from tests are harmless.
pub fn init_tracing(default_directive: &str, json: bool) -> bool {
    let registry = tracing_subscriber::registry().with(build_filter(default_directive));
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.is_ok()
}
