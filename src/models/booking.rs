use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    event::EventId,
    money::Money,
    payment::{BillingContact, PaymentId, PaymentMethod, PaymentStatus},
    ticket::Ticket,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingLine {
    pub category: String,
    pub quantity: u32,
}

impl BookingLine {
    pub fn new(category: impl Into<String>, quantity: u32) -> Self {
        Self {
            category: category.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub event_id: EventId,
    pub lines: Vec<BookingLine>,
    pub billing: BillingContact,
    pub method: PaymentMethod,
}

impl BookingRequest {
    pub fn requested_units(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingReceipt {
    pub attempt_id: Uuid,
    pub payment_id: PaymentId,
    pub payment_status: PaymentStatus,
    pub tickets: Vec<Ticket>,
    pub total: Money,
}
