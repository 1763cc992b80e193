use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    clock::Clock,
    error::BookingError,
    models::{
        caller::UserId,
        event::EventId,
        money::Money,
        payment::{
            Amount, BillingContact, GatewayReference, Payment, PaymentId, PaymentMethod,
            PaymentStatus, Refund, RefundId, RefundStatus,
        },
        ticket::TicketId,
    },
    stores::store::{PaymentStore, StoreError},
};

pub struct PaymentDraft {
    pub buyer_id: UserId,
    pub event_id: EventId,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub billing: BillingContact,
}

/// Owns every payment status change. Each write is checked against
/// [`PaymentStatus::can_transition_to`] and stored with the version it was read at.
#[derive(Clone)]
pub struct PaymentRecordManager {
    store: Arc<dyn PaymentStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl PaymentRecordManager {
    pub fn new(store: Arc<dyn PaymentStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub async fn create(&self, draft: PaymentDraft) -> Result<Payment, BookingError> {
        let now = self.clock.now();
        let settled = !draft.method.kind.requires_confirmation();
        let payment = Payment {
            id: PaymentId::new_v4(),
            buyer_id: draft.buyer_id,
            event_id: draft.event_id,
            ticket_ids: Vec::new(),
            amount: draft.amount,
            method: draft.method,
            status: if settled {
                PaymentStatus::Completed
            } else {
                PaymentStatus::Pending
            },
            refunds: Vec::new(),
            billing: draft.billing,
            gateway: None,
            created_at: now,
            processed_at: settled.then_some(now),
            expires_at: now + self.ttl,
            version: 0,
        };
        let payment = self.store.insert(payment).await?;
        log::debug!(
            "payment created payment={} status={:?} total={}",
            payment.id,
            payment.status,
            payment.amount.total
        );
        Ok(payment)
    }

    pub async fn get(&self, id: PaymentId) -> Result<Payment, BookingError> {
        self.store.get(id).await.map_err(|e| match e {
            StoreError::NotFound => BookingError::PaymentNotFound(id),
            e => BookingError::Store(e),
        })
    }

    pub async fn attach_tickets(
        &self,
        mut payment: Payment,
        ticket_ids: &[TicketId],
    ) -> Result<Payment, BookingError> {
        payment.ticket_ids.extend_from_slice(ticket_ids);
        Ok(self.store.update(payment).await?)
    }

    pub async fn mark_processing(&self, payment: Payment) -> Result<Payment, BookingError> {
        self.move_to(payment, PaymentStatus::Processing, |_| {}).await
    }

    pub async fn mark_completed(
        &self,
        payment: Payment,
        gateway: GatewayReference,
    ) -> Result<Payment, BookingError> {
        let now = self.clock.now();
        self.move_to(payment, PaymentStatus::Completed, |p| {
            p.processed_at = Some(now);
            p.gateway = Some(gateway);
        })
        .await
    }

    pub async fn mark_failed(
        &self,
        payment: Payment,
        gateway: GatewayReference,
    ) -> Result<Payment, BookingError> {
        let now = self.clock.now();
        self.move_to(payment, PaymentStatus::Failed, |p| {
            p.processed_at = Some(now);
            p.gateway = Some(gateway);
        })
        .await
    }

    /// Compensation for a booking that did not complete. Money that never moved is failed,
    /// a payment that settled without a gateway round trip is cancelled.
    pub async fn abandon(&self, payment: Payment, reason: &str) -> Result<Payment, BookingError> {
        let next = match payment.status {
            PaymentStatus::Pending | PaymentStatus::Processing => PaymentStatus::Failed,
            PaymentStatus::Completed => PaymentStatus::Cancelled,
            _ => return Ok(payment),
        };
        let reference = GatewayReference {
            transaction_id: String::new(),
            message: reason.to_string(),
        };
        self.move_to(payment, next, |p| p.gateway = Some(reference))
            .await
    }

    /// Marks a pending or processing payment past `expires_at` as failed. `None` when it
    /// has not expired.
    pub async fn expire(&self, payment: &Payment) -> Result<Option<Payment>, BookingError> {
        if !payment.is_expired(self.clock.now()) {
            return Ok(None);
        }
        log::warn!("payment={} expired at {}", payment.id, payment.expires_at);
        let expired = self
            .mark_failed(
                payment.clone(),
                GatewayReference {
                    transaction_id: String::new(),
                    message: "payment expired".to_string(),
                },
            )
            .await?;
        Ok(Some(expired))
    }

    pub async fn refund(
        &self,
        mut payment: Payment,
        amount: Money,
        reason: &str,
        event_starts_at: DateTime<Utc>,
    ) -> Result<(Payment, Refund), BookingError> {
        let now = self.clock.now();
        match payment.effective_status(now) {
            PaymentStatus::Refunded => {
                return Err(BookingError::NotRefundable("already refunded".to_string()))
            }
            PaymentStatus::Failed => {
                return Err(BookingError::NotRefundable("payment failed".to_string()))
            }
            status if !status.is_refundable() => {
                return Err(BookingError::NotRefundable(
                    "payment not completed".to_string(),
                ))
            }
            _ => {}
        }
        if event_starts_at <= now {
            return Err(BookingError::NotRefundable(
                "event has already started".to_string(),
            ));
        }
        if amount.is_zero() {
            return Err(BookingError::Validation(
                "refund amount must be positive".to_string(),
            ));
        }
        let available = payment.refundable_amount();
        if amount > available {
            return Err(BookingError::AmountExceedsAvailable {
                requested: amount,
                available,
            });
        }

        let refund = Refund {
            id: RefundId::new_v4(),
            amount,
            reason: reason.to_string(),
            status: RefundStatus::Pending,
            processed_at: now,
            gateway_refund_id: None,
        };
        let next = if amount == available {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        payment.refunds.push(refund.clone());
        let payment = self.move_to(payment, next, |_| {}).await?;
        log::info!(
            "refund requested payment={} refund={} amount={amount} status={next:?}",
            payment.id,
            refund.id
        );
        Ok((payment, refund))
    }

    /// Records the gateway's answer for a pending refund. A failed refund stops counting
    /// against the refundable amount; the payment status is left as it is.
    pub async fn settle_refund(
        &self,
        payment_id: PaymentId,
        refund_id: RefundId,
        succeeded: bool,
        gateway_refund_id: Option<String>,
    ) -> Result<Payment, BookingError> {
        let mut payment = self.get(payment_id).await?;
        let now = self.clock.now();
        let refund = payment
            .refunds
            .iter_mut()
            .find(|r| r.id == refund_id)
            .ok_or_else(|| BookingError::Validation(format!("unknown refund {refund_id}")))?;
        if refund.status != RefundStatus::Pending {
            return Err(BookingError::Validation(format!(
                "refund {refund_id} is already {:?}",
                refund.status
            )));
        }
        refund.status = if succeeded {
            RefundStatus::Completed
        } else {
            RefundStatus::Failed
        };
        refund.processed_at = now;
        refund.gateway_refund_id = gateway_refund_id;
        let status = refund.status;
        let payment = self.store.update(payment).await?;
        log::info!("refund settled payment={payment_id} refund={refund_id} status={status:?}");
        Ok(payment)
    }

    async fn move_to(
        &self,
        mut payment: Payment,
        next: PaymentStatus,
        apply: impl FnOnce(&mut Payment),
    ) -> Result<Payment, BookingError> {
        if !payment.status.can_transition_to(next) {
            return Err(BookingError::InvalidPaymentTransition {
                payment_id: payment.id,
                from: payment.status,
                to: next,
            });
        }
        let from = payment.status;
        payment.status = next;
        apply(&mut payment);
        let payment = self.store.update(payment).await?;
        log::debug!("payment={} {from:?} -> {next:?}", payment.id);
        Ok(payment)
    }
}
