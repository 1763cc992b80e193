use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    factory::MintError,
    ledger::LedgerError,
    models::{
        event::EventId,
        money::Money,
        payment::{PaymentId, PaymentStatus},
        ticket::{TicketId, TicketStatus},
    },
    persisters::persister::PersistError,
    qr::QrError,
    stores::store::StoreError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input. Nothing was mutated.
    Validation,
    NotFound,
    Forbidden,
    /// Rejected against current state. Anything done on the way was undone.
    Conflict,
    /// Failed mid-sequence and compensated. Safe to retry.
    Integrity,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("event {0} not found")]
    EventNotFound(EventId),
    #[error("event {0} is not available for booking")]
    EventNotBookable(EventId),
    #[error("pricing category '{0}' not found")]
    UnknownCategory(String),
    #[error("ticket {0} not found")]
    TicketNotFound(TicketId),
    #[error("payment {0} not found")]
    PaymentNotFound(PaymentId),
    #[error("access denied")]
    Forbidden,
    #[error("only {available} tickets available for {category}")]
    InsufficientInventory {
        category: String,
        requested: u32,
        available: u32,
    },
    #[error("ticket has already been used")]
    AlreadyUsed {
        used_at: Option<DateTime<Utc>>,
        used_by: Option<String>,
    },
    #[error("ticket is already cancelled")]
    AlreadyCancelled,
    #[error("ticket is not confirmed (status {0:?})")]
    NotConfirmed(TicketStatus),
    #[error("event has already started")]
    EventStarted,
    #[error("payment is not refundable: {0}")]
    NotRefundable(String),
    #[error("refund amount {requested} exceeds available amount {available}")]
    AmountExceedsAvailable { requested: Money, available: Money },
    #[error("payment {payment_id} cannot move from {from:?} to {to:?}")]
    InvalidPaymentTransition {
        payment_id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
    },
    #[error("payment {0} has expired")]
    PaymentExpired(PaymentId),
    #[error("payment declined: {0}")]
    PaymentDeclined(String),
    #[error("invalid QR code")]
    InvalidToken,
    #[error("QR token signing failed: {0}")]
    TokenSigning(QrError),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("journal failure: {0}")]
    Journal(#[from] PersistError),
    #[error("inventory contention on '{0}'")]
    Contention(String),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::EventNotFound(_)
            | Self::UnknownCategory(_)
            | Self::TicketNotFound(_)
            | Self::PaymentNotFound(_) => ErrorKind::NotFound,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::EventNotBookable(_)
            | Self::InsufficientInventory { .. }
            | Self::AlreadyUsed { .. }
            | Self::AlreadyCancelled
            | Self::NotConfirmed(_)
            | Self::EventStarted
            | Self::NotRefundable(_)
            | Self::AmountExceedsAvailable { .. }
            | Self::InvalidPaymentTransition { .. }
            | Self::PaymentExpired(_)
            | Self::PaymentDeclined(_)
            | Self::InvalidToken => ErrorKind::Conflict,
            Self::TokenSigning(_) | Self::Store(_) | Self::Journal(_) | Self::Contention(_) => {
                ErrorKind::Integrity
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Integrity
    }
}

impl From<LedgerError> for BookingError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::InvalidQuantity => {
                BookingError::Validation("quantity must be at least 1".to_string())
            }
            LedgerError::EventNotFound(id) => BookingError::EventNotFound(id),
            LedgerError::CategoryNotFound(name) => BookingError::UnknownCategory(name),
            LedgerError::InsufficientInventory {
                category,
                requested,
                available,
            } => BookingError::InsufficientInventory {
                category,
                requested,
                available,
            },
            LedgerError::Contention(category) => BookingError::Contention(category),
            LedgerError::Store(e) => BookingError::Store(e),
        }
    }
}

impl From<MintError> for BookingError {
    fn from(value: MintError) -> Self {
        match value {
            MintError::Signing(e) => BookingError::TokenSigning(e),
            MintError::Persist { source, .. } => BookingError::Store(source),
        }
    }
}
