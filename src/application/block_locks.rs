use crate::domain::models::BlockId;
use crate::infrastructure::config::LockScope;
use std::collections::BTreeMap;

/// Sync state of one block as seen by the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSyncState {
    Idle,
    Pending,
    Error(String),
}

/// Explicit replacement for per-view `isUpdating` flags.
///
/// With [`LockScope::Plan`] a single pending edit anywhere in the plan blocks
/// all other edits; with [`LockScope::Block`] only the same block is blocked.
#[derive(Debug, Clone)]
pub struct BlockLocks {
    scope: LockScope,
    states: BTreeMap<BlockId, BlockSyncState>,
}

impl BlockLocks {
    pub fn new(scope: LockScope) -> Self {
        Self {
            scope,
            states: BTreeMap::new(),
        }
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    pub fn state(&self, block_id: BlockId) -> BlockSyncState {
        self.states
            .get(&block_id)
            .cloned()
            .unwrap_or(BlockSyncState::Idle)
    }

    pub fn any_pending(&self) -> bool {
        self.states
            .values()
            .any(|state| *state == BlockSyncState::Pending)
    }

    /// Whether edit affordances for `block_id` must be disabled.
    pub fn is_updating(&self, block_id: BlockId) -> bool {
        match self.scope {
            LockScope::Plan => self.any_pending(),
            LockScope::Block => self.state(block_id) == BlockSyncState::Pending,
        }
    }

    pub fn try_acquire(&mut self, block_id: BlockId) -> bool {
        if self.is_updating(block_id) {
            return false;
        }
        self.states.insert(block_id, BlockSyncState::Pending);
        true
    }

    pub fn release(&mut self, block_id: BlockId) {
        self.states.remove(&block_id);
    }

    pub fn fail(&mut self, block_id: BlockId, message: impl Into<String>) {
        self.states
            .insert(block_id, BlockSyncState::Error(message.into()));
    }

    pub fn reset(&mut self) {
        self.states.clear();
    }

    pub fn states(&self) -> BTreeMap<BlockId, BlockSyncState> {
        self.states.clone()
    }
}
