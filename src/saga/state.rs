use std::collections::BTreeMap;

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SagaState {
    pub id: Uuid,
    pub states: BTreeMap<u16, String>,
}

impl SagaState {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            states: Default::default(),
        }
    }

    pub fn last_step(&self) -> u16 {
        self.states.last_key_value().map(|(k, _)| *k).unwrap_or(0)
    }

    pub fn next_step(&self) -> u16 {
        if self.states.is_empty() {
            0
        } else {
            self.last_step().saturating_add(1)
        }
    }
}
