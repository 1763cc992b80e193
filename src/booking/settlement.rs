use crate::{
    error::BookingError,
    gateway::GatewayOutcome,
    models::{
        caller::Caller,
        money::Money,
        payment::{GatewayReference, Payment, PaymentId, PaymentStatus, Refund, RefundId},
        ticket::{TicketId, TicketStatus},
    },
    stores::store::{TicketChange, Transition},
};

use super::BookingOrchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub payment: Payment,
    pub refund: Refund,
    /// Tickets cancelled because the refund covered everything that was left.
    pub cancelled_tickets: Vec<TicketId>,
}

impl BookingOrchestrator {
    /// Runs the gateway for a pending payment. On success its tickets are confirmed;
    /// on a decline they are cancelled and their units go back on sale.
    pub async fn process_payment(
        &self,
        caller: &Caller,
        payment_id: PaymentId,
    ) -> Result<Payment, BookingError> {
        let payment = self.payments.get(payment_id).await?;
        if payment.buyer_id != caller.id {
            return Err(BookingError::Forbidden);
        }
        if self.expire(&payment).await?.is_some() {
            return Err(BookingError::PaymentExpired(payment_id));
        }
        let payment = self.payments.mark_processing(payment).await?;

        let outcome = match self.processors.process(&payment.method, &payment.amount).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("payment={payment_id} gateway error: {e}");
                GatewayOutcome {
                    succeeded: false,
                    reference: String::new(),
                    message: e.to_string(),
                }
            }
        };
        let reference = GatewayReference {
            transaction_id: outcome.reference,
            message: outcome.message.clone(),
        };

        if outcome.succeeded {
            let payment = self.payments.mark_completed(payment, reference).await?;
            let confirmed = self.confirm_tickets(&payment).await?;
            log::info!(
                "payment completed payment={payment_id} reference={} tickets={confirmed}",
                reference_of(&payment)
            );
            Ok(payment)
        } else {
            let payment = self.payments.mark_failed(payment, reference).await?;
            let cancelled = self
                .cancel_and_release(&payment, &[TicketStatus::Pending])
                .await?;
            log::info!(
                "payment declined payment={payment_id} released={}: {}",
                cancelled.len(),
                outcome.message
            );
            Err(BookingError::PaymentDeclined(outcome.message))
        }
    }

    /// Allowed for the buyer and for staff. A refund of everything still refundable
    /// cancels the payment's live tickets; a smaller one only moves money.
    pub async fn refund(
        &self,
        caller: &Caller,
        payment_id: PaymentId,
        amount: Money,
        reason: &str,
    ) -> Result<RefundReceipt, BookingError> {
        let payment = self.payments.get(payment_id).await?;
        if payment.buyer_id != caller.id && !caller.is_staff() {
            return Err(BookingError::Forbidden);
        }
        let payment = self.expire(&payment).await?.unwrap_or(payment);
        let event = self.event(payment.event_id).await?;

        let (payment, refund) = self
            .payments
            .refund(payment, amount, reason, event.starts_at)
            .await?;
        let cancelled_tickets = if payment.status == PaymentStatus::Refunded {
            self.cancel_and_release(
                &payment,
                &[TicketStatus::Pending, TicketStatus::Confirmed],
            )
            .await?
        } else {
            Vec::new()
        };
        Ok(RefundReceipt {
            payment,
            refund,
            cancelled_tickets,
        })
    }

    pub async fn settle_refund(
        &self,
        payment_id: PaymentId,
        refund_id: RefundId,
        succeeded: bool,
        gateway_refund_id: Option<String>,
    ) -> Result<Payment, BookingError> {
        self.payments
            .settle_refund(payment_id, refund_id, succeeded, gateway_refund_id)
            .await
    }

    /// Fails a pending payment past its deadline and puts its tickets' units back.
    /// `None` when the payment had not expired.
    pub async fn expire_stale_payment(
        &self,
        payment_id: PaymentId,
    ) -> Result<Option<Payment>, BookingError> {
        let payment = self.payments.get(payment_id).await?;
        self.expire(&payment).await
    }

    /// The lazy expiry check every state-changing read goes through.
    pub(super) async fn expire(&self, payment: &Payment) -> Result<Option<Payment>, BookingError> {
        let Some(expired) = self.payments.expire(payment).await? else {
            return Ok(None);
        };
        self.cancel_and_release(&expired, &[TicketStatus::Pending])
            .await?;
        Ok(Some(expired))
    }

    async fn confirm_tickets(&self, payment: &Payment) -> Result<usize, BookingError> {
        let mut confirmed = 0;
        for ticket in self.tickets.by_payment(payment.id).await? {
            let result = self
                .tickets
                .transition(
                    ticket.id,
                    &[TicketStatus::Pending],
                    TicketChange::status(TicketStatus::Confirmed),
                )
                .await?;
            if matches!(result, Transition::Applied(_)) {
                confirmed += 1;
            }
        }
        Ok(confirmed)
    }

    /// Cancels the payment's tickets that are in one of `from`, releasing one unit for each
    /// ticket this call actually moved.
    pub(super) async fn cancel_and_release(
        &self,
        payment: &Payment,
        from: &[TicketStatus],
    ) -> Result<Vec<TicketId>, BookingError> {
        let mut cancelled = Vec::new();
        for ticket in self.tickets.by_payment(payment.id).await? {
            let result = self
                .tickets
                .transition(ticket.id, from, TicketChange::status(TicketStatus::Cancelled))
                .await?;
            if let Transition::Applied(ticket) = result {
                self.ledger
                    .release(ticket.event_id, &ticket.category.name, 1)
                    .await?;
                cancelled.push(ticket.id);
            }
        }
        if !cancelled.is_empty() {
            log::debug!(
                "payment={} cancelled {} tickets and released their units",
                payment.id,
                cancelled.len()
            );
        }
        Ok(cancelled)
    }
}

fn reference_of(payment: &Payment) -> &str {
    payment
        .gateway
        .as_ref()
        .map(|g| g.transaction_id.as_str())
        .unwrap_or_default()
}
