use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::saga::state::SagaState;

use super::persister::{LockScope, LockType, PersistError, StepPersister};

#[derive(Debug, Clone)]
pub struct InMemoryPersister {
    sagas: Arc<RwLock<HashMap<Uuid, SagaState>>>,
    locks: Arc<RwLock<HashMap<Uuid, ExecutingContext>>>,
    lock_timeout: Duration,
}

impl InMemoryPersister {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            sagas: Arc::new(RwLock::new(Default::default())),
            locks: Arc::new(RwLock::new(Default::default())),
            lock_timeout,
        }
    }

    pub async fn lock_type(&self, id: Uuid) -> Option<LockType> {
        self.locks.read().await.get(&id).map(|c| c.lock_type)
    }
}

#[async_trait::async_trait]
impl StepPersister for InMemoryPersister {
    async fn lock(&self, scope: LockScope, lock_type: LockType) -> Result<(), PersistError> {
        let mut locks = self.locks.write().await;
        let insert = if let Some(context) = locks.get(&scope.id) {
            scope.executor_id == context.executor_id
                || matches!(context.lock_type, LockType::Failed)
                || context.instant_started.elapsed() > self.lock_timeout
        } else {
            true
        };

        if insert {
            log::trace!("saga {} locked as {lock_type:?}", scope.id);
            locks.insert(
                scope.id,
                ExecutingContext {
                    executor_id: scope.executor_id,
                    lock_type,
                    instant_started: Instant::now(),
                    name: scope.name,
                },
            );
            Ok(())
        } else {
            Err(PersistError::Locked)
        }
    }

    async fn retrieve(&self, id: Uuid) -> Result<SagaState, PersistError> {
        self.sagas
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(PersistError::NotFound)
    }

    async fn store(&self, id: Uuid, step: u16, state: String) -> Result<(), PersistError> {
        self.sagas
            .write()
            .await
            .entry(id)
            .or_insert_with(|| SagaState::new(id))
            .states
            .insert(step, state);
        Ok(())
    }

    /// Also forgets sagas that finished more than `lock_timeout` ago, journal included,
    /// so the scan stays proportional to live attempts.
    async fn get_next_failed(
        &self,
        for_duration: Duration,
    ) -> Result<Option<(Uuid, String, Uuid)>, PersistError> {
        let mut locks = self.locks.write().await;
        let settled: Vec<Uuid> = locks
            .iter()
            .filter(|(_, context)| {
                context.lock_type == LockType::Finished
                    && context.instant_started.elapsed() > self.lock_timeout
            })
            .map(|(id, _)| *id)
            .collect();
        if !settled.is_empty() {
            let mut sagas = self.sagas.write().await;
            for id in &settled {
                locks.remove(id);
                sagas.remove(id);
            }
            log::trace!("pruned {} finished sagas", settled.len());
        }

        let candidate = locks
            .iter()
            .find(|(_, context)| match context.lock_type {
                LockType::Failed => true,
                LockType::Finished => false,
                _ => context.instant_started.elapsed() > for_duration,
            })
            .map(|(key, context)| (*key, context.name.clone()));

        let Some((id, name)) = candidate else {
            return Ok(None);
        };
        let executor_id = Uuid::new_v4();
        locks.insert(
            id,
            ExecutingContext {
                executor_id,
                lock_type: LockType::Retry,
                instant_started: Instant::now(),
                name: name.clone(),
            },
        );
        Ok(Some((id, name, executor_id)))
    }
}

#[derive(Debug)]
struct ExecutingContext {
    executor_id: Uuid,
    lock_type: LockType,
    instant_started: Instant,
    name: String,
}
