use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    error::BookingError,
    models::{
        caller::Caller,
        ticket::{TicketId, TicketStatus},
    },
    qr::TokenSigner,
    stores::store::{StoreError, TicketChange, TicketStore, Transition},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub ticket_id: TicketId,
    pub ticket_number: String,
    pub category: String,
    pub used_at: DateTime<Utc>,
    pub used_by: String,
}

/// Door check-in. Only a confirmed ticket presenting its own token is admitted, and only once.
pub struct VerificationService {
    tickets: Arc<dyn TicketStore>,
    signer: Arc<dyn TokenSigner>,
    clock: Arc<dyn Clock>,
}

impl VerificationService {
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        signer: Arc<dyn TokenSigner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tickets,
            signer,
            clock,
        }
    }

    pub async fn verify(
        &self,
        caller: &Caller,
        ticket_id: TicketId,
        presented: &str,
        verifier_label: &str,
    ) -> Result<VerificationResult, BookingError> {
        if !caller.is_staff() {
            return Err(BookingError::Forbidden);
        }
        let ticket = self.tickets.get(ticket_id).await.map_err(|e| match e {
            StoreError::NotFound => BookingError::TicketNotFound(ticket_id),
            e => BookingError::Store(e),
        })?;
        if let Err(e) = self.signer.verify(&ticket, presented) {
            log::warn!("ticket={ticket_id} rejected at {verifier_label}: {e}");
            return Err(BookingError::InvalidToken);
        }

        let now = self.clock.now();
        let result = self
            .tickets
            .transition(
                ticket_id,
                &[TicketStatus::Confirmed],
                TicketChange::used(now, verifier_label.to_string()),
            )
            .await?;
        match result {
            Transition::Applied(ticket) => {
                log::info!(
                    "ticket verified ticket={ticket_id} number={} by={verifier_label}",
                    ticket.ticket_number
                );
                Ok(VerificationResult {
                    ticket_id,
                    ticket_number: ticket.ticket_number,
                    category: ticket.category.name,
                    used_at: now,
                    used_by: verifier_label.to_string(),
                })
            }
            Transition::Rejected(current) if current.status == TicketStatus::Used => {
                Err(BookingError::AlreadyUsed {
                    used_at: current.used_at,
                    used_by: current.used_by,
                })
            }
            Transition::Rejected(current) => Err(BookingError::NotConfirmed(current.status)),
        }
    }
}
