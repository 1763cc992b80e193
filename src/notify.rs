use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{caller::UserId, event::EventId, payment::PaymentId, ticket::TicketId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketsReady {
    pub buyer_id: UserId,
    pub event_id: EventId,
    pub payment_id: PaymentId,
    pub ticket_ids: Vec<TicketId>,
}

#[derive(Debug, Error)]
#[error("notification not delivered: {0}")]
pub struct NotifyError(pub String);

/// Best effort. A failure is logged by the caller and never undoes a booking.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn tickets_ready(&self, notice: TicketsReady) -> Result<(), NotifyError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn tickets_ready(&self, notice: TicketsReady) -> Result<(), NotifyError> {
        let body = serde_json::to_string(&notice).map_err(|e| NotifyError(e.to_string()))?;
        log::info!("tickets ready buyer={} {body}", notice.buyer_id);
        Ok(())
    }
}
