mod cancellation;
mod recovery;
mod reservations;
mod settlement;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    clock::Clock,
    config::BookingConfig,
    error::BookingError,
    factory::TicketFactory,
    gateway::ProcessorRegistry,
    ledger::{InventoryLedger, ReservationToken},
    models::{
        booking::{BookingReceipt, BookingRequest},
        caller::Caller,
        event::{Event, EventId, PricingCategory},
        payment::{Amount, Payment, PaymentId},
        ticket::{Ticket, TicketId, TicketStatus},
    },
    notify::{Notifier, TicketsReady},
    payments::{PaymentDraft, PaymentRecordManager},
    persisters::persister::{LockScope, PersistError, StepPersister},
    qr::TokenSigner,
    saga::journal::{BookingJournal, JournalEntry, BOOKING_SAGA},
    stores::store::{EventCatalog, PaymentStore, StoreError, TicketChange, TicketStore},
};

pub use recovery::{run_resumer, RecoveryReport};
pub use settlement::RefundReceipt;

use reservations::ReservationSet;

/// Boundaries the orchestrator is wired to.
pub struct BookingServices {
    pub catalog: Arc<dyn EventCatalog>,
    pub payments: Arc<dyn PaymentStore>,
    pub tickets: Arc<dyn TicketStore>,
    pub journal: Arc<dyn StepPersister>,
    pub signer: Arc<dyn TokenSigner>,
    pub processors: ProcessorRegistry,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPhase {
    Validating,
    Reserving,
    PaymentRecordCreated,
    TicketsMinted,
    Complete,
    ReservationFailed,
    MintingFailed,
    Compensating,
    Aborted,
}

struct BookingAttempt {
    id: Uuid,
    phase: BookingPhase,
    reservations: ReservationSet,
    payment: Option<Payment>,
    minted: Vec<Ticket>,
    /// Persisted by a mint call that then failed.
    stray: Vec<TicketId>,
}

impl BookingAttempt {
    fn new(reservations: ReservationSet) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: BookingPhase::Validating,
            reservations,
            payment: None,
            minted: Vec::new(),
            stray: Vec::new(),
        }
    }

    fn advance(&mut self, phase: BookingPhase) {
        log::debug!("booking attempt={} {:?} -> {phase:?}", self.id, self.phase);
        self.phase = phase;
    }

    fn ticket_ids(&self) -> Vec<TicketId> {
        self.minted
            .iter()
            .map(|t| t.id)
            .chain(self.stray.iter().copied())
            .collect()
    }
}

/// Runs bookings end to end: reserve inventory, create the payment, mint tickets.
/// A failure after anything was reserved is compensated before the error is returned.
pub struct BookingOrchestrator {
    catalog: Arc<dyn EventCatalog>,
    tickets: Arc<dyn TicketStore>,
    journal: Arc<dyn StepPersister>,
    ledger: InventoryLedger,
    payments: PaymentRecordManager,
    factory: TicketFactory,
    processors: ProcessorRegistry,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: BookingConfig,
}

impl BookingOrchestrator {
    pub fn new(services: BookingServices, config: BookingConfig) -> Self {
        let ledger = InventoryLedger::new(services.catalog.clone(), config.reserve_retry_limit);
        let payments = PaymentRecordManager::new(
            services.payments,
            services.clock.clone(),
            config.payment_ttl(),
        );
        let factory = TicketFactory::new(
            services.signer,
            services.tickets.clone(),
            services.clock.clone(),
        );
        Self {
            catalog: services.catalog,
            tickets: services.tickets,
            journal: services.journal,
            ledger,
            payments,
            factory,
            processors: services.processors,
            notifier: services.notifier,
            clock: services.clock,
            config,
        }
    }

    pub async fn book(
        &self,
        caller: &Caller,
        request: BookingRequest,
    ) -> Result<BookingReceipt, BookingError> {
        let mut attempt =
            BookingAttempt::new(ReservationSet::new(self.ledger.clone(), request.event_id));
        log::debug!(
            "booking attempt={} buyer={} event={} units={}",
            attempt.id,
            caller.id,
            request.event_id,
            request.requested_units()
        );
        if let Err(err) = self.validate(&request).await {
            log::debug!("booking attempt={} rejected: {err}", attempt.id);
            return Err(err);
        }

        let mut journal = BookingJournal::open(
            self.journal.clone(),
            LockScope::from_id(attempt.id, BOOKING_SAGA.to_string()),
            JournalEntry::Started {
                event_id: request.event_id,
                buyer_id: caller.id,
                lines: request.lines.clone(),
            },
        )
        .await?;

        match self.run(caller, &request, &mut attempt, &mut journal).await {
            Ok(receipt) => {
                if let Err(e) = journal.finish(true).await {
                    log::warn!("booking attempt={} completed but not closed: {e}", attempt.id);
                }
                log::info!(
                    "booking completed attempt={} payment={} tickets={} total={}",
                    attempt.id,
                    receipt.payment_id,
                    receipt.tickets.len(),
                    receipt.total
                );
                self.notify(caller, request.event_id, &receipt).await;
                Ok(receipt)
            }
            Err(err) => {
                self.compensate(&mut attempt, &mut journal, &err).await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        caller: &Caller,
        request: &BookingRequest,
        attempt: &mut BookingAttempt,
        journal: &mut BookingJournal,
    ) -> Result<BookingReceipt, BookingError> {
        attempt.advance(BookingPhase::Reserving);
        for line in &request.lines {
            if let Err(e) = attempt
                .reservations
                .reserve(&line.category, line.quantity)
                .await
            {
                attempt.advance(BookingPhase::ReservationFailed);
                return Err(e.into());
            }
            journal
                .record(JournalEntry::Reserved {
                    category: line.category.clone(),
                    quantity: line.quantity,
                })
                .await?;
            attempt.reservations.journaled();
        }

        let subtotal = attempt
            .reservations
            .total()
            .ok_or_else(|| BookingError::Validation("order total is too large".to_string()))?;
        let payment = self
            .payments
            .create(PaymentDraft {
                buyer_id: caller.id,
                event_id: request.event_id,
                amount: Amount::from_subtotal(subtotal, self.config.currency),
                method: request.method.clone(),
                billing: request.billing.clone(),
            })
            .await?;
        attempt.payment = Some(payment.clone());
        attempt.advance(BookingPhase::PaymentRecordCreated);
        journal
            .record(JournalEntry::PaymentCreated {
                payment_id: payment.id,
            })
            .await?;

        let tokens: Vec<ReservationToken> = attempt.reservations.tokens().cloned().collect();
        for token in tokens {
            match self
                .factory
                .mint(&payment, &token.category, token.unit_price, token.quantity)
                .await
            {
                Ok(minted) => {
                    let ticket_ids = minted.iter().map(|t| t.id).collect();
                    attempt.minted.extend(minted);
                    journal
                        .record(JournalEntry::TicketsMinted { ticket_ids })
                        .await?;
                }
                Err(e) => {
                    attempt.stray.extend_from_slice(e.persisted());
                    attempt.advance(BookingPhase::MintingFailed);
                    return Err(e.into());
                }
            }
        }
        attempt.advance(BookingPhase::TicketsMinted);

        let payment = self
            .payments
            .attach_tickets(payment, &attempt.ticket_ids())
            .await?;
        attempt.payment = Some(payment.clone());
        journal
            .record(JournalEntry::Completed {
                payment_id: payment.id,
            })
            .await?;
        attempt.advance(BookingPhase::Complete);

        Ok(BookingReceipt {
            attempt_id: attempt.id,
            payment_id: payment.id,
            payment_status: payment.status,
            tickets: attempt.minted.clone(),
            total: payment.amount.total,
        })
    }

    /// Undoes whatever the attempt got done. Failures here are logged and leave the
    /// journal marked failed so recovery finishes the job.
    async fn compensate(
        &self,
        attempt: &mut BookingAttempt,
        journal: &mut BookingJournal,
        cause: &BookingError,
    ) {
        let failed_in = attempt.phase;
        attempt.advance(BookingPhase::Compensating);
        let mut settled = true;

        for id in attempt.ticket_ids() {
            let cancelled = self
                .tickets
                .transition(
                    id,
                    &[TicketStatus::Pending, TicketStatus::Confirmed],
                    TicketChange::status(TicketStatus::Cancelled),
                )
                .await;
            if let Err(e) = cancelled {
                log::error!("attempt={} could not cancel ticket={id}: {e}", attempt.id);
                settled = false;
            }
        }
        if let Some(payment) = attempt.payment.take() {
            let payment_id = payment.id;
            if let Err(e) = self.payments.abandon(payment, &cause.to_string()).await {
                log::error!("attempt={} could not abandon payment={payment_id}: {e}", attempt.id);
                settled = false;
            }
        }

        let mut taken_over = is_taken_over(cause);
        if !taken_over {
            match attempt.reservations.release_all(journal).await {
                Ok(()) => {}
                Err(e) if is_taken_over(&e) => taken_over = true,
                Err(e) => {
                    log::error!(
                        "attempt={} kept {} reservations: {e}",
                        attempt.id,
                        attempt.reservations.outstanding()
                    );
                    settled = false;
                }
            }
        }
        if taken_over {
            match attempt.reservations.release_unjournaled().await {
                Ok(units) => log::warn!(
                    "attempt={} taken over, released {units} unjournaled units to the ledger",
                    attempt.id
                ),
                Err(e) => log::error!(
                    "attempt={} was taken over and kept unjournaled reservations: {e}",
                    attempt.id
                ),
            }
            return;
        }
        let aborted = journal
            .record(JournalEntry::Aborted {
                reason: cause.to_string(),
            })
            .await;
        if let Err(e) = aborted {
            log::error!("attempt={} abort not journaled: {e}", attempt.id);
            settled = false;
        }
        attempt.advance(BookingPhase::Aborted);
        if let Err(e) = journal.finish(settled).await {
            log::error!("attempt={} could not close journal: {e}", attempt.id);
        }
        log::info!(
            "booking aborted attempt={} phase={failed_in:?} settled={settled}: {cause}",
            attempt.id
        );
    }

    async fn validate(&self, request: &BookingRequest) -> Result<(), BookingError> {
        if request.lines.is_empty() {
            return Err(BookingError::Validation(
                "at least one ticket line is required".to_string(),
            ));
        }
        if request.lines.len() > self.config.max_lines {
            return Err(BookingError::Validation(format!(
                "at most {} ticket lines per booking",
                self.config.max_lines
            )));
        }
        let max = self.config.max_quantity_per_line;
        for line in &request.lines {
            if line.category.trim().is_empty() {
                return Err(BookingError::Validation(
                    "category name is required".to_string(),
                ));
            }
            if line.quantity == 0 || line.quantity > max {
                return Err(BookingError::Validation(format!(
                    "quantity for {} must be between 1 and {max}",
                    line.category
                )));
            }
        }
        let billing = &request.billing;
        if billing.name.trim().is_empty() {
            return Err(BookingError::Validation("billing name is required".to_string()));
        }
        if !billing.email.contains('@') {
            return Err(BookingError::Validation("billing email is invalid".to_string()));
        }
        if billing.phone.trim().is_empty() {
            return Err(BookingError::Validation(
                "billing phone is required".to_string(),
            ));
        }

        let event = self.event(request.event_id).await?;
        if !event.is_bookable(self.clock.now()) {
            return Err(BookingError::EventNotBookable(event.id));
        }
        if let Some(line) = request
            .lines
            .iter()
            .find(|l| event.category(&l.category).is_none())
        {
            return Err(BookingError::UnknownCategory(line.category.clone()));
        }
        Ok(())
    }

    async fn notify(&self, caller: &Caller, event_id: EventId, receipt: &BookingReceipt) {
        let notice = TicketsReady {
            buyer_id: caller.id,
            event_id,
            payment_id: receipt.payment_id,
            ticket_ids: receipt.tickets.iter().map(|t| t.id).collect(),
        };
        if let Err(e) = self.notifier.tickets_ready(notice).await {
            log::warn!("payment={} {e}", receipt.payment_id);
        }
    }

    async fn event(&self, id: EventId) -> Result<Event, BookingError> {
        self.catalog.event(id).await.map_err(|e| match e {
            StoreError::NotFound => BookingError::EventNotFound(id),
            e => BookingError::Store(e),
        })
    }

    async fn ticket(&self, id: TicketId) -> Result<Ticket, BookingError> {
        self.tickets.get(id).await.map_err(|e| match e {
            StoreError::NotFound => BookingError::TicketNotFound(id),
            e => BookingError::Store(e),
        })
    }

    pub async fn availability(
        &self,
        event_id: EventId,
        category: &str,
    ) -> Result<PricingCategory, BookingError> {
        Ok(self.ledger.availability(event_id, category).await?)
    }

    /// The stored payment with lazy expiry applied to its status. Writes nothing.
    pub async fn payment(&self, id: PaymentId) -> Result<Payment, BookingError> {
        let mut payment = self.payments.get(id).await?;
        payment.status = payment.effective_status(self.clock.now());
        Ok(payment)
    }

    pub async fn tickets_for_payment(&self, id: PaymentId) -> Result<Vec<Ticket>, BookingError> {
        self.payments.get(id).await?;
        Ok(self.tickets.by_payment(id).await?)
    }
}

/// Another executor (recovery) now owns the attempt's journal.
fn is_taken_over(err: &BookingError) -> bool {
    matches!(err, BookingError::Journal(PersistError::Locked))
}
