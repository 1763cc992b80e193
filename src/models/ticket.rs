use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{caller::UserId, event::EventId, money::Money, payment::PaymentId};

pub type TicketId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Confirmed,
    Cancelled,
    Used,
    Refunded,
}

impl TicketStatus {
    /// Statuses that keep one unit of the category's inventory claimed.
    pub fn holds_inventory(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed | Self::Used)
    }
}

/// Category name and price as they were when the ticket was minted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySnapshot {
    pub name: String,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrToken {
    pub payload: String,
    pub signature: String,
    pub issued_at: DateTime<Utc>,
}

impl QrToken {
    /// The string rendered into the QR image and presented at the door.
    pub fn encoded(&self) -> String {
        format!("{}.{}", self.payload, self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub ticket_number: String,
    pub buyer_id: UserId,
    pub event_id: EventId,
    pub payment_id: PaymentId,
    pub category: CategorySnapshot,
    pub qr: QrToken,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by: Option<String>,
}
