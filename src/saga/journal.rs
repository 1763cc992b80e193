use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    models::{
        booking::BookingLine, caller::UserId, event::EventId, payment::PaymentId,
        ticket::TicketId,
    },
    persisters::persister::{LockScope, LockType, PersistError, StepPersister},
};

use super::state::SagaState;

pub const BOOKING_SAGA: &str = "book_tickets";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum JournalEntry {
    Started {
        event_id: EventId,
        buyer_id: UserId,
        lines: Vec<BookingLine>,
    },
    Reserved {
        category: String,
        quantity: u32,
    },
    Released {
        category: String,
        quantity: u32,
    },
    PaymentCreated {
        payment_id: PaymentId,
    },
    TicketsMinted {
        ticket_ids: Vec<TicketId>,
    },
    Completed {
        payment_id: PaymentId,
    },
    Aborted {
        reason: String,
    },
}

/// Append-only step log of one booking attempt.
pub struct BookingJournal {
    scope: LockScope,
    persister: Arc<dyn StepPersister>,
    next_step: u16,
}

impl BookingJournal {
    pub async fn open(
        persister: Arc<dyn StepPersister>,
        scope: LockScope,
        started: JournalEntry,
    ) -> Result<Self, PersistError> {
        let mut journal = Self {
            scope,
            persister,
            next_step: 0,
        };
        journal.record(started).await?;
        Ok(journal)
    }

    /// Takes over an attempt handed out by `get_next_failed`.
    pub async fn resume(
        persister: Arc<dyn StepPersister>,
        scope: LockScope,
    ) -> Result<(Self, Vec<JournalEntry>), PersistError> {
        persister.lock(scope.clone(), LockType::Executing).await?;
        let saga = persister.retrieve(scope.id).await?;
        let entries = decode(&saga)?;
        let journal = Self {
            scope,
            persister,
            next_step: saga.next_step(),
        };
        Ok((journal, entries))
    }

    /// Re-asserts ownership. Fails with `Locked` once recovery has taken the attempt over.
    pub async fn claim(&self) -> Result<(), PersistError> {
        self.persister
            .lock(self.scope.clone(), LockType::Executing)
            .await
    }

    pub async fn record(&mut self, entry: JournalEntry) -> Result<(), PersistError> {
        let state = serde_json::to_string(&entry)?;
        self.claim().await?;
        log::trace!("saga {} step {} {state}", self.scope.id, self.next_step);
        self.persister
            .store(self.scope.id, self.next_step, state)
            .await?;
        self.next_step = self.next_step.saturating_add(1);
        Ok(())
    }

    /// `settled` means nothing is left for recovery to do.
    pub async fn finish(&self, settled: bool) -> Result<(), PersistError> {
        let lock_type = if settled {
            LockType::Finished
        } else {
            LockType::Failed
        };
        self.persister.lock(self.scope.clone(), lock_type).await
    }
}

pub fn decode(saga: &SagaState) -> Result<Vec<JournalEntry>, PersistError> {
    saga.states
        .values()
        .map(|s| serde_json::from_str(s).map_err(PersistError::from))
        .collect()
}

/// Units per category that the journal shows as reserved and not yet released.
pub fn outstanding_reservations(entries: &[JournalEntry]) -> BTreeMap<String, u32> {
    let mut outstanding: BTreeMap<String, u32> = BTreeMap::new();
    for entry in entries {
        match entry {
            JournalEntry::Reserved { category, quantity } => {
                *outstanding.entry(category.clone()).or_default() += quantity;
            }
            JournalEntry::Released { category, quantity } => {
                if let Some(units) = outstanding.get_mut(category) {
                    *units = units.saturating_sub(*quantity);
                }
            }
            _ => {}
        }
    }
    outstanding.retain(|_, units| *units > 0);
    outstanding
}
