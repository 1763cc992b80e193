use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    models::{
        caller::UserId,
        event::EventId,
        money::Money,
        payment::{
            Amount, BillingContact, Currency, Payment, PaymentId, PaymentMethod, PaymentStatus,
        },
        ticket::{CategorySnapshot, QrToken, Ticket, TicketId, TicketStatus},
    },
    qr::{HmacTokenSigner, QrError, QrPayload, TokenSigner},
};

pub fn ticket_for(payment_id: PaymentId, status: TicketStatus) -> Ticket {
    let now = Utc::now();
    Ticket {
        id: TicketId::new_v4(),
        ticket_number: format!("TKT-TEST-{}", Uuid::new_v4().simple()),
        buyer_id: UserId::new_v4(),
        event_id: EventId::new_v4(),
        payment_id,
        category: CategorySnapshot {
            name: "Normal".to_string(),
            price: Money::new(1000),
        },
        qr: QrToken {
            payload: String::new(),
            signature: String::new(),
            issued_at: now,
        },
        status,
        created_at: now,
        used_at: None,
        used_by: None,
    }
}

pub fn payment_for(event_id: EventId) -> Payment {
    let now = Utc::now();
    Payment {
        id: PaymentId::new_v4(),
        buyer_id: UserId::new_v4(),
        event_id,
        ticket_ids: Vec::new(),
        amount: Amount::from_subtotal(Money::new(2000), Currency::Lkr),
        method: PaymentMethod::card("4242"),
        status: PaymentStatus::Pending,
        refunds: Vec::new(),
        billing: billing(),
        gateway: None,
        created_at: now,
        processed_at: None,
        expires_at: now + Duration::hours(24),
        version: 0,
    }
}

pub fn billing() -> BillingContact {
    BillingContact {
        name: "Nimal Perera".to_string(),
        email: "nimal@example.com".to_string(),
        phone: "+94771234567".to_string(),
        address: None,
    }
}

/// Signs the first `remaining` payloads, then reports the signer as unavailable.
pub struct FailingSigner {
    inner: HmacTokenSigner,
    remaining: AtomicUsize,
}

impl FailingSigner {
    pub fn after(successes: usize) -> Self {
        Self {
            inner: HmacTokenSigner::new("test-secret").unwrap(),
            remaining: AtomicUsize::new(successes),
        }
    }
}

impl TokenSigner for FailingSigner {
    fn sign(&self, payload: &QrPayload) -> Result<QrToken, QrError> {
        let granted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match granted {
            Ok(_) => self.inner.sign(payload),
            Err(_) => Err(QrError::Unavailable("signer offline".to_string())),
        }
    }

    fn verify(&self, ticket: &Ticket, presented: &str) -> Result<(), QrError> {
        self.inner.verify(ticket, presented)
    }
}
