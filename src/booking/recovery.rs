use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tokio::time::sleep;
use uuid::Uuid;

use crate::{
    error::BookingError,
    models::ticket::TicketStatus,
    persisters::persister::LockScope,
    saga::journal::{outstanding_reservations, BookingJournal, JournalEntry, BOOKING_SAGA},
    stores::store::TicketChange,
};

use super::BookingOrchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub attempt_id: Uuid,
    /// The attempt had completed and only needed closing.
    pub completed: bool,
    pub released: BTreeMap<String, u32>,
}

impl BookingOrchestrator {
    /// Takes over one booking attempt whose compensation failed or whose executor went
    /// quiet for `stale_after`, and unwinds whatever its journal shows as still held.
    pub async fn recover_next(
        &self,
        stale_after: Duration,
    ) -> Result<Option<RecoveryReport>, BookingError> {
        let Some((id, name, executor_id)) = self.journal.get_next_failed(stale_after).await? else {
            return Ok(None);
        };
        if name != BOOKING_SAGA {
            log::warn!("saga {id} has unknown name {name}, skipping");
            return Ok(None);
        }
        let scope = LockScope {
            id,
            executor_id,
            name,
        };
        let (mut journal, entries) = BookingJournal::resume(self.journal.clone(), scope).await?;

        if entries
            .iter()
            .any(|e| matches!(e, JournalEntry::Completed { .. }))
        {
            journal.finish(true).await?;
            log::info!("recovered attempt={id} was already complete");
            return Ok(Some(RecoveryReport {
                attempt_id: id,
                completed: true,
                released: BTreeMap::new(),
            }));
        }

        for entry in &entries {
            match entry {
                JournalEntry::TicketsMinted { ticket_ids } => {
                    for ticket_id in ticket_ids {
                        self.tickets
                            .transition(
                                *ticket_id,
                                &[TicketStatus::Pending, TicketStatus::Confirmed],
                                TicketChange::status(TicketStatus::Cancelled),
                            )
                            .await?;
                    }
                }
                JournalEntry::PaymentCreated { payment_id } => {
                    let payment = self.payments.get(*payment_id).await?;
                    self.payments.abandon(payment, "booking recovered").await?;
                }
                _ => {}
            }
        }

        let event_id = entries.iter().find_map(|e| match e {
            JournalEntry::Started { event_id, .. } => Some(*event_id),
            _ => None,
        });
        let outstanding = outstanding_reservations(&entries);
        if let Some(event_id) = event_id {
            for (category, quantity) in &outstanding {
                journal.claim().await?;
                self.ledger.release(event_id, category, *quantity).await?;
                journal
                    .record(JournalEntry::Released {
                        category: category.clone(),
                        quantity: *quantity,
                    })
                    .await?;
            }
        }
        journal
            .record(JournalEntry::Aborted {
                reason: "recovered".to_string(),
            })
            .await?;
        journal.finish(true).await?;
        log::info!("recovered attempt={id} released={outstanding:?}");
        Ok(Some(RecoveryReport {
            attempt_id: id,
            completed: false,
            released: outstanding,
        }))
    }
}

/// Background loop handing stalled or failed booking attempts to `recover_next`.
pub async fn run_resumer(
    orchestrator: Arc<BookingOrchestrator>,
    restart_with_duration: Duration,
    sleep_when_empty: Duration,
) {
    loop {
        match orchestrator.recover_next(restart_with_duration).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => log::error!("booking recovery failed: {e}"),
        }
        sleep(sleep_when_empty).await;
    }
}
