pub mod actionable;
pub mod models;
