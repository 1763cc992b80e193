use crate::{
    error::BookingError,
    models::{
        caller::Caller,
        ticket::{Ticket, TicketId, TicketStatus},
    },
    stores::store::{TicketChange, Transition},
};

use super::BookingOrchestrator;

fn refusal(ticket: &Ticket) -> BookingError {
    match ticket.status {
        TicketStatus::Used => BookingError::AlreadyUsed {
            used_at: ticket.used_at,
            used_by: ticket.used_by.clone(),
        },
        _ => BookingError::AlreadyCancelled,
    }
}

impl BookingOrchestrator {
    /// Buyer-initiated cancellation of one ticket before the event starts.
    /// Puts exactly one unit back on sale.
    pub async fn cancel(
        &self,
        caller: &Caller,
        ticket_id: TicketId,
    ) -> Result<Ticket, BookingError> {
        let ticket = self.ticket(ticket_id).await?;
        if ticket.buyer_id != caller.id {
            return Err(BookingError::Forbidden);
        }
        if !matches!(ticket.status, TicketStatus::Pending | TicketStatus::Confirmed) {
            return Err(refusal(&ticket));
        }
        let event = self.event(ticket.event_id).await?;
        if event.has_started(self.clock.now()) {
            return Err(BookingError::EventStarted);
        }
        let payment = self.payments.get(ticket.payment_id).await?;
        self.expire(&payment).await?;

        let result = self
            .tickets
            .transition(
                ticket_id,
                &[TicketStatus::Pending, TicketStatus::Confirmed],
                TicketChange::status(TicketStatus::Cancelled),
            )
            .await?;
        let ticket = match result {
            Transition::Applied(ticket) => ticket,
            Transition::Rejected(current) => return Err(refusal(&current)),
        };
        self.ledger
            .release(ticket.event_id, &ticket.category.name, 1)
            .await?;
        log::info!(
            "ticket cancelled ticket={} number={} category={}",
            ticket.id,
            ticket.ticket_number,
            ticket.category.name
        );
        Ok(ticket)
    }
}
