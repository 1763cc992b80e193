use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    event::{Event, EventId, PricingCategory},
    payment::{Payment, PaymentId},
    ticket::{Ticket, TicketId, TicketStatus},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("stale write on {0}")]
    VersionConflict(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a conditional status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<T> {
    Applied(T),
    /// The record was not in one of the expected statuses; carries it unchanged.
    Rejected(T),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketChange {
    pub status: TicketStatus,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by: Option<String>,
}

impl TicketChange {
    pub fn status(status: TicketStatus) -> Self {
        Self {
            status,
            used_at: None,
            used_by: None,
        }
    }

    pub fn used(at: DateTime<Utc>, by: String) -> Self {
        Self {
            status: TicketStatus::Used,
            used_at: Some(at),
            used_by: Some(by),
        }
    }
}

/// Read side of the event catalog plus the one write the booking engine owns.
#[async_trait::async_trait]
pub trait EventCatalog: Send + Sync {
    async fn event(&self, id: EventId) -> Result<Event, StoreError>;

    /// `Ok(None)` when the event exists but has no category by that name.
    async fn category(&self, id: EventId, name: &str)
        -> Result<Option<PricingCategory>, StoreError>;

    /// Sets `available_units` to `new` only if it still equals `expected`.
    async fn compare_and_set_available(
        &self,
        id: EventId,
        name: &str,
        expected: u32,
        new: u32,
    ) -> Result<bool, StoreError>;
}

#[async_trait::async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: Payment) -> Result<Payment, StoreError>;
    async fn get(&self, id: PaymentId) -> Result<Payment, StoreError>;
    /// Writes only if the stored version equals `payment.version`, returns the record with
    /// the bumped version.
    async fn update(&self, payment: Payment) -> Result<Payment, StoreError>;
}

#[async_trait::async_trait]
pub trait TicketStore: Send + Sync {
    /// Fails with `Duplicate` if the ticket number is taken.
    async fn insert(&self, ticket: Ticket) -> Result<Ticket, StoreError>;
    async fn get(&self, id: TicketId) -> Result<Ticket, StoreError>;
    async fn by_payment(&self, payment_id: PaymentId) -> Result<Vec<Ticket>, StoreError>;
    async fn transition(
        &self,
        id: TicketId,
        from: &[TicketStatus],
        change: TicketChange,
    ) -> Result<Transition<Ticket>, StoreError>;
}
