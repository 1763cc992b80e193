use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::saga::state::SagaState;

/// Storage for booking saga journals: one ordered list of serialized steps per attempt,
/// plus a lock record saying who runs the attempt and how it ended.
#[async_trait::async_trait]
pub trait StepPersister: Send + Sync {
    async fn lock(&self, scope: LockScope, lock_type: LockType) -> Result<(), PersistError>;
    async fn retrieve(&self, id: Uuid) -> Result<SagaState, PersistError>;
    async fn store(&self, id: Uuid, step: u16, state: String) -> Result<(), PersistError>;
    /// Hands a failed or stalled saga to a fresh executor: `(id, name, executor_id)`.
    async fn get_next_failed(
        &self,
        for_duration: Duration,
    ) -> Result<Option<(Uuid, String, Uuid)>, PersistError>;
}

#[derive(Debug, Clone)]
pub struct LockScope {
    pub id: Uuid,
    pub executor_id: Uuid,
    pub name: String,
}

impl LockScope {
    pub fn from_id(id: Uuid, name: String) -> Self {
        Self {
            id,
            executor_id: Uuid::new_v4(),
            name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Executing,
    Failed,
    Finished,
    Retry,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to persist: Locked")]
    Locked,
    #[error("Failed to persist: NotFound")]
    NotFound,
    #[error("Failed to persist: {0}")]
    Serialization(#[from] serde_json::Error),
}
