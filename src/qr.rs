use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::models::{
    caller::UserId,
    event::EventId,
    ticket::{QrToken, Ticket, TicketId},
};

type HmacSha256 = Hmac<Sha256>;

const MAX_TOKEN_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum QrError {
    #[error("QR signing secret is empty")]
    MissingSecret,
    #[error("QR payload could not be encoded: {0}")]
    Encoding(String),
    #[error("QR token is malformed")]
    Malformed,
    #[error("QR token does not belong to this ticket")]
    IdentityMismatch,
    #[error("QR token signature mismatch")]
    SignatureMismatch,
    #[error("QR signer unavailable: {0}")]
    Unavailable(String),
}

/// Identity fields bound into a ticket's QR token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    pub ticket_id: TicketId,
    pub ticket_number: String,
    pub event_id: EventId,
    pub buyer_id: UserId,
    pub issued_at: DateTime<Utc>,
}

impl QrPayload {
    pub fn for_ticket(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.id,
            ticket_number: ticket.ticket_number.clone(),
            event_id: ticket.event_id,
            buyer_id: ticket.buyer_id,
            issued_at: ticket.qr.issued_at,
        }
    }
}

pub trait TokenSigner: Send + Sync {
    fn sign(&self, payload: &QrPayload) -> Result<QrToken, QrError>;

    /// Checks a presented token against the ticket record. Never mutates anything.
    fn verify(&self, ticket: &Ticket, presented: &str) -> Result<(), QrError>;
}

pub struct HmacTokenSigner {
    secret: Vec<u8>,
}

impl HmacTokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, QrError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(QrError::MissingSecret);
        }
        Ok(Self { secret })
    }

    fn mac(&self, payload_part: &str) -> Result<HmacSha256, QrError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| QrError::Unavailable(e.to_string()))?;
        mac.update(payload_part.as_bytes());
        Ok(mac)
    }
}

fn encode_payload(payload: &QrPayload) -> Result<String, QrError> {
    let bytes = serde_json::to_vec(payload).map_err(|e| QrError::Encoding(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

impl TokenSigner for HmacTokenSigner {
    fn sign(&self, payload: &QrPayload) -> Result<QrToken, QrError> {
        let payload_part = encode_payload(payload)?;
        let signature = self.mac(&payload_part)?.finalize().into_bytes();
        Ok(QrToken {
            payload: payload_part,
            signature: URL_SAFE_NO_PAD.encode(signature),
            issued_at: payload.issued_at,
        })
    }

    fn verify(&self, ticket: &Ticket, presented: &str) -> Result<(), QrError> {
        if presented.len() > MAX_TOKEN_LEN {
            return Err(QrError::Malformed);
        }
        let (payload_part, sig_part) = presented.split_once('.').ok_or(QrError::Malformed)?;
        let expected_payload = encode_payload(&QrPayload::for_ticket(ticket))?;
        if payload_part != expected_payload {
            return Err(QrError::IdentityMismatch);
        }
        let presented_sig = URL_SAFE_NO_PAD
            .decode(sig_part)
            .map_err(|_| QrError::Malformed)?;
        self.mac(&expected_payload)?
            .verify_slice(&presented_sig)
            .map_err(|_| QrError::SignatureMismatch)
    }
}
