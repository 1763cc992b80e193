use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;

use crate::{
    clock::Clock,
    models::{
        money::Money,
        payment::{Payment, PaymentStatus},
        ticket::{CategorySnapshot, QrToken, Ticket, TicketId, TicketStatus},
    },
    qr::{QrError, QrPayload, TokenSigner},
    stores::store::{StoreError, TicketStore},
};

const NUMBER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const NUMBER_RANDOM_LEN: usize = 8;
const MAX_NUMBER_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum MintError {
    #[error("failed to sign QR token: {0}")]
    Signing(#[from] QrError),
    #[error("failed to persist ticket: {source}")]
    Persist {
        #[source]
        source: StoreError,
        /// Tickets of this call that did reach the store.
        persisted: Vec<TicketId>,
    },
}

impl MintError {
    pub fn persisted(&self) -> &[TicketId] {
        match self {
            MintError::Signing(_) => &[],
            MintError::Persist { persisted, .. } => persisted,
        }
    }
}

#[derive(Clone)]
pub struct TicketFactory {
    signer: Arc<dyn TokenSigner>,
    tickets: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
}

impl TicketFactory {
    pub fn new(
        signer: Arc<dyn TokenSigner>,
        tickets: Arc<dyn TicketStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            signer,
            tickets,
            clock,
        }
    }

    /// Signs every ticket before storing any, so a signing failure leaves nothing behind.
    pub async fn mint(
        &self,
        payment: &Payment,
        category: &str,
        price: Money,
        count: u32,
    ) -> Result<Vec<Ticket>, MintError> {
        let now = self.clock.now();
        let status = if payment.status == PaymentStatus::Completed {
            TicketStatus::Confirmed
        } else {
            TicketStatus::Pending
        };

        let mut drafts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut ticket = Ticket {
                id: TicketId::new_v4(),
                ticket_number: ticket_number(now),
                buyer_id: payment.buyer_id,
                event_id: payment.event_id,
                payment_id: payment.id,
                category: CategorySnapshot {
                    name: category.to_string(),
                    price,
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
            };
            ticket.qr = self.signer.sign(&QrPayload::for_ticket(&ticket))?;
            drafts.push(ticket);
        }

        let mut minted = Vec::with_capacity(drafts.len());
        for draft in drafts {
            match self.persist(draft, now).await {
                Ok(ticket) => minted.push(ticket),
                Err(source) => {
                    return Err(MintError::Persist {
                        source,
                        persisted: minted.iter().map(|t| t.id).collect(),
                    })
                }
            }
        }
        log::debug!(
            "minted payment={} category={category} count={count} status={status:?}",
            payment.id
        );
        Ok(minted)
    }

    /// A taken ticket number gets a fresh number and a fresh signature.
    async fn persist(&self, mut ticket: Ticket, now: DateTime<Utc>) -> Result<Ticket, StoreError> {
        let mut attempt = 1;
        loop {
            match self.tickets.insert(ticket.clone()).await {
                Err(StoreError::Duplicate(number)) if attempt < MAX_NUMBER_ATTEMPTS => {
                    log::warn!("ticket number {number} taken, regenerating");
                    attempt += 1;
                    ticket.ticket_number = ticket_number(now);
                    ticket.qr = self
                        .signer
                        .sign(&QrPayload::for_ticket(&ticket))
                        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                }
                result => return result,
            }
        }
    }
}

fn ticket_number(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..NUMBER_RANDOM_LEN)
        .map(|_| NUMBER_ALPHABET[rng.gen_range(0..NUMBER_ALPHABET.len())] as char)
        .collect();
    format!("TKT-{}-{random}", base36(now.timestamp_millis().unsigned_abs()))
}

fn base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.iter().rev().map(|b| *b as char).collect()
}
