pub mod block_locks;
pub mod bootstrap;
pub mod calendar_sync;
pub mod error;
pub mod optimistic;
pub mod plan_store;
pub mod state;
pub mod topic_bridge;
