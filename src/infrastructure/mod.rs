pub mod calendar_mapper;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod logging;
pub mod study_plan_client;
