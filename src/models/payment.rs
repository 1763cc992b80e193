use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{caller::UserId, event::EventId, money::Money, ticket::TicketId};

pub type PaymentId = Uuid;
pub type RefundId = Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Lkr,
    Usd,
    Eur,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Lkr => write!(f, "LKR"),
            Self::Usd => write!(f, "USD"),
            Self::Eur => write!(f, "EUR"),
        }
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LKR" => Ok(Self::Lkr),
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            other => Err(format!("unsupported currency {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub subtotal: Money,
    pub tax: Money,
    pub fee: Money,
    pub discount: Money,
    pub total: Money,
    pub currency: Currency,
}

impl Amount {
    pub fn from_subtotal(subtotal: Money, currency: Currency) -> Self {
        Self {
            subtotal,
            tax: Money::ZERO,
            fee: Money::ZERO,
            discount: Money::ZERO,
            total: subtotal,
            currency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    CreditCard,
    DebitCard,
    MobileWallet,
    BankTransfer,
    CashOnDelivery,
}

impl PaymentMethodType {
    /// Whether a gateway round trip is needed before the payment counts as settled.
    pub fn requires_confirmation(self) -> bool {
        !matches!(self, Self::CashOnDelivery)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Stripe,
    Payhere,
    Dialog,
    Mobitel,
    Hutch,
    Cod,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDetails {
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
    pub wallet_type: Option<String>,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub kind: PaymentMethodType,
    pub provider: Option<Provider>,
    pub details: MethodDetails,
}

impl PaymentMethod {
    pub fn new(kind: PaymentMethodType) -> Self {
        Self {
            kind,
            provider: None,
            details: MethodDetails::default(),
        }
    }

    pub fn card(last4: impl Into<String>) -> Self {
        Self {
            kind: PaymentMethodType::CreditCard,
            provider: Some(Provider::Stripe),
            details: MethodDetails {
                card_last4: Some(last4.into()),
                ..MethodDetails::default()
            },
        }
    }

    pub fn cash_on_delivery() -> Self {
        Self {
            kind: PaymentMethodType::CashOnDelivery,
            provider: Some(Provider::Cod),
            details: MethodDetails::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing | Completed | Failed | Cancelled)
                | (Processing, Completed | Failed)
                | (Completed, Refunded | PartiallyRefunded | Cancelled)
                | (PartiallyRefunded, Refunded | PartiallyRefunded)
        )
    }

    pub fn is_refundable(self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyRefunded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: RefundId,
    pub amount: Money,
    pub reason: String,
    pub status: RefundStatus,
    pub processed_at: DateTime<Utc>,
    pub gateway_refund_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayReference {
    pub transaction_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingContact {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub buyer_id: UserId,
    pub event_id: EventId,
    pub ticket_ids: Vec<TicketId>,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub refunds: Vec<Refund>,
    pub billing: BillingContact,
    pub gateway: Option<GatewayReference>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    /// Bumped by the store on every successful write.
    pub version: u64,
}

impl Payment {
    /// A payment that never settled by its deadline. Covers `Processing` too, so a gateway
    /// call that was never recorded does not hold inventory forever.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, PaymentStatus::Pending | PaymentStatus::Processing)
            && now > self.expires_at
    }

    /// Status as any reader must interpret it: an expired unsettled payment is failed.
    pub fn effective_status(&self, now: DateTime<Utc>) -> PaymentStatus {
        if self.is_expired(now) {
            PaymentStatus::Failed
        } else {
            self.status
        }
    }

    pub fn total_refunded(&self) -> Money {
        self.sum_refunds(|r| r.status == RefundStatus::Completed)
    }

    /// Refunds that are completed or still awaiting the gateway.
    pub fn committed_refunds(&self) -> Money {
        self.sum_refunds(|r| r.status != RefundStatus::Failed)
    }

    pub fn refundable_amount(&self) -> Money {
        self.amount.total.saturating_sub(self.committed_refunds())
    }

    fn sum_refunds(&self, include: impl Fn(&Refund) -> bool) -> Money {
        self.refunds
            .iter()
            .filter(|r| include(r))
            .fold(Money::ZERO, |acc, r| {
                acc.checked_add(r.amount).unwrap_or(Money::new(u64::MAX))
            })
    }
}
