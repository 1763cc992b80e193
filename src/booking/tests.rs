use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration as StdDuration,
};

use chrono::{Duration, Utc};

use crate::{
    clock::ManualClock,
    error::ErrorKind,
    models::{
        booking::BookingLine,
        caller::{Role, UserId},
        event::EventStatus,
        money::Money,
        payment::{PaymentMethod, PaymentStatus},
    },
    notify::{LogNotifier, NotifyError},
    persisters::{blackhole::Blackhole, in_memory::InMemoryPersister, persister::LockType},
    qr::HmacTokenSigner,
    saga::journal::decode,
    stores::in_memory::{InMemoryCatalog, InMemoryPayments, InMemoryTickets},
    testing::{billing, FailingSigner},
    verification::VerificationService,
};

use super::*;

struct Harness {
    orchestrator: Arc<BookingOrchestrator>,
    catalog: InMemoryCatalog,
    tickets: InMemoryTickets,
    persister: InMemoryPersister,
    signer: Arc<dyn TokenSigner>,
    clock: Arc<ManualClock>,
    event_id: EventId,
    buyer: Caller,
}

impl Harness {
    async fn available(&self, category: &str) -> u32 {
        self.orchestrator
            .availability(self.event_id, category)
            .await
            .unwrap()
            .available_units
    }

    async fn add_event(
        &self,
        status: EventStatus,
        starts_in: Duration,
        categories: Vec<PricingCategory>,
    ) -> EventId {
        let event = Event::new(status, self.clock.now() + starts_in, categories);
        let id = event.id;
        self.catalog.insert_event(event).await;
        id
    }

    /// Held units per category must equal the tickets that still claim inventory.
    async fn assert_conserved(&self, event_id: EventId) {
        let event = self.catalog.event(event_id).await.unwrap();
        let mut holding: HashMap<String, u32> = HashMap::new();
        for ticket in self.tickets.all().await {
            if ticket.event_id == event_id && ticket.status.holds_inventory() {
                *holding.entry(ticket.category.name.clone()).or_default() += 1;
            }
        }
        for category in &event.categories {
            assert_eq!(
                category.held_units(),
                holding.get(&category.name).copied().unwrap_or(0),
                "category {}",
                category.name
            );
        }
    }

    fn verifier(&self) -> VerificationService {
        VerificationService::new(
            Arc::new(self.tickets.clone()),
            self.signer.clone(),
            self.clock.clone(),
        )
    }
}

struct SilentNotifier;

#[async_trait::async_trait]
impl Notifier for SilentNotifier {
    async fn tickets_ready(&self, _notice: TicketsReady) -> Result<(), NotifyError> {
        Err(NotifyError("smtp down".to_string()))
    }
}

async fn harness_with(
    signer: Arc<dyn TokenSigner>,
    notifier: Arc<dyn Notifier>,
    journal: Option<Arc<dyn StepPersister>>,
) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let catalog = InMemoryCatalog::new();
    let tickets = InMemoryTickets::new();
    let persister = InMemoryPersister::new(StdDuration::from_secs(300));
    let event = Event::new(
        EventStatus::Published,
        clock.now() + Duration::days(7),
        vec![
            PricingCategory::new("Normal", Money::new(1000), 100),
            PricingCategory::new("VIP", Money::new(5000), 10),
        ],
    );
    let event_id = event.id;
    catalog.insert_event(event).await;

    let journal: Arc<dyn StepPersister> = match journal {
        Some(journal) => journal,
        None => Arc::new(persister.clone()),
    };
    let config = BookingConfig {
        qr_secret: "test-secret".to_string(),
        ..BookingConfig::default()
    };
    let orchestrator = BookingOrchestrator::new(
        BookingServices {
            catalog: Arc::new(catalog.clone()),
            payments: Arc::new(InMemoryPayments::new()),
            tickets: Arc::new(tickets.clone()),
            journal,
            signer: signer.clone(),
            processors: ProcessorRegistry::with_defaults(),
            notifier,
            clock: clock.clone(),
        },
        config,
    );
    Harness {
        orchestrator: Arc::new(orchestrator),
        catalog,
        tickets,
        persister,
        signer,
        clock,
        event_id,
        buyer: Caller::user(UserId::new_v4()),
    }
}

async fn harness() -> Harness {
    harness_with(
        Arc::new(HmacTokenSigner::new("test-secret").unwrap()),
        Arc::new(LogNotifier),
        None,
    )
    .await
}

fn request(event_id: EventId, lines: &[(&str, u32)], method: PaymentMethod) -> BookingRequest {
    BookingRequest {
        event_id,
        lines: lines
            .iter()
            .map(|(category, quantity)| BookingLine::new(*category, *quantity))
            .collect(),
        billing: billing(),
        method,
    }
}

fn card() -> PaymentMethod {
    PaymentMethod::card("4242")
}

#[tokio::test]
async fn test_booking_two_normal_tickets() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("Normal", 2)], card()))
        .await
        .unwrap();

    assert_eq!(Money::new(2000), receipt.total);
    assert_eq!(PaymentStatus::Pending, receipt.payment_status);
    assert_eq!(2, receipt.tickets.len());
    for ticket in &receipt.tickets {
        assert_eq!(Money::new(1000), ticket.category.price);
        assert_eq!(TicketStatus::Pending, ticket.status);
        assert_eq!(h.buyer.id, ticket.buyer_id);
    }
    assert_eq!(98, h.available("Normal").await);
    assert_eq!(10, h.available("VIP").await);

    let payment = h.orchestrator.payment(receipt.payment_id).await.unwrap();
    assert_eq!(2, payment.ticket_ids.len());
    assert_eq!(
        Some(LockType::Finished),
        h.persister.lock_type(receipt.attempt_id).await
    );
    h.assert_conserved(h.event_id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_unit_goes_to_exactly_one_buyer() {
    let h = harness().await;
    let event_id = h
        .add_event(
            EventStatus::Published,
            Duration::days(1),
            vec![PricingCategory::new("Front", Money::new(7500), 1)],
        )
        .await;

    let mut handles = vec![];
    for _ in 0..2 {
        let orchestrator = h.orchestrator.clone();
        let buyer = Caller::user(UserId::new_v4());
        handles.push(tokio::spawn(async move {
            orchestrator
                .book(&buyer, request(event_id, &[("Front", 1)], card()))
                .await
        }));
    }
    let mut booked = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => booked += 1,
            Err(BookingError::InsufficientInventory { available: 0, .. }) => refused += 1,
            Err(e) => panic!("unexpected {e}"),
        }
    }
    assert_eq!((1, 1), (booked, refused));
    let front = h.orchestrator.availability(event_id, "Front").await.unwrap();
    assert_eq!(0, front.available_units);
    h.assert_conserved(event_id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_never_oversell() {
    let h = harness().await;
    let mut handles = vec![];
    for i in 0..30u32 {
        let orchestrator = h.orchestrator.clone();
        let event_id = h.event_id;
        handles.push(tokio::spawn(async move {
            let buyer = Caller::user(UserId::new_v4());
            orchestrator
                .book(&buyer, request(event_id, &[("VIP", 1 + i % 3)], card()))
                .await
        }));
    }
    let mut sold = 0;
    for handle in handles {
        if let Ok(receipt) = handle.await.unwrap() {
            sold += receipt.tickets.len() as u32;
        }
    }
    assert!(sold <= 10);
    assert_eq!(10 - sold, h.available("VIP").await);
    h.assert_conserved(h.event_id).await;
}

#[tokio::test]
async fn test_unknown_category_leaves_inventory_alone() {
    let h = harness().await;
    let result = h
        .orchestrator
        .book(
            &h.buyer,
            request(h.event_id, &[("Normal", 2), ("Balcony", 1)], card()),
        )
        .await;
    assert!(matches!(result, Err(BookingError::UnknownCategory(ref c)) if c == "Balcony"));
    assert_eq!(ErrorKind::NotFound, result.unwrap_err().kind());
    assert_eq!(100, h.available("Normal").await);
    assert_eq!(10, h.available("VIP").await);
    assert!(h.tickets.all().await.is_empty());
}

#[tokio::test]
async fn test_later_shortage_releases_earlier_reservations() {
    let h = harness().await;
    let result = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("Normal", 3), ("VIP", 11)], card()))
        .await;
    match result {
        Err(err @ BookingError::InsufficientInventory { .. }) => {
            assert_eq!("only 10 tickets available for VIP", err.to_string());
            assert_eq!(ErrorKind::Conflict, err.kind());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(100, h.available("Normal").await);
    assert_eq!(10, h.available("VIP").await);
}

#[tokio::test]
async fn test_unbookable_events_are_refused() {
    let h = harness().await;
    let draft = h
        .add_event(
            EventStatus::Draft,
            Duration::days(3),
            vec![PricingCategory::new("Normal", Money::new(1000), 5)],
        )
        .await;
    let started = h
        .add_event(
            EventStatus::Published,
            Duration::zero(),
            vec![PricingCategory::new("Normal", Money::new(1000), 5)],
        )
        .await;
    for event_id in [draft, started] {
        let result = h
            .orchestrator
            .book(&h.buyer, request(event_id, &[("Normal", 1)], card()))
            .await;
        assert!(matches!(result, Err(BookingError::EventNotBookable(id)) if id == event_id));
    }
    let result = h
        .orchestrator
        .book(&h.buyer, request(EventId::new_v4(), &[("Normal", 1)], card()))
        .await;
    assert!(matches!(result, Err(BookingError::EventNotFound(_))));
}

#[tokio::test]
async fn test_malformed_requests_are_validation_errors() {
    let h = harness().await;
    let mut bad_email = request(h.event_id, &[("Normal", 1)], card());
    bad_email.billing.email = "nobody".to_string();
    for bad in [
        request(h.event_id, &[], card()),
        request(h.event_id, &[("Normal", 0)], card()),
        request(h.event_id, &[("Normal", 11)], card()),
        request(h.event_id, &[(" ", 1)], card()),
        bad_email,
    ] {
        let err = h.orchestrator.book(&h.buyer, bad).await.unwrap_err();
        assert_eq!(ErrorKind::Validation, err.kind(), "{err}");
    }
    assert_eq!(100, h.available("Normal").await);
}

#[tokio::test]
async fn test_paid_booking_confirms_tickets_and_admits_once() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("VIP", 1)], card()))
        .await
        .unwrap();
    let pending = &receipt.tickets[0];
    let verifier = h.verifier();
    let staff = Caller::new(UserId::new_v4(), Role::Organizer);

    let result = verifier
        .verify(&staff, pending.id, &pending.qr.encoded(), "gate-1")
        .await;
    assert!(matches!(
        result,
        Err(BookingError::NotConfirmed(TicketStatus::Pending))
    ));

    let payment = h
        .orchestrator
        .process_payment(&h.buyer, receipt.payment_id)
        .await
        .unwrap();
    assert_eq!(PaymentStatus::Completed, payment.status);
    assert!(payment
        .gateway
        .as_ref()
        .is_some_and(|g| g.transaction_id.starts_with("CARD_")));

    verifier
        .verify(&staff, pending.id, &pending.qr.encoded(), "gate-1")
        .await
        .unwrap();
    let again = verifier
        .verify(&staff, pending.id, &pending.qr.encoded(), "gate-2")
        .await;
    assert!(matches!(again, Err(BookingError::AlreadyUsed { .. })));
    h.assert_conserved(h.event_id).await;
}

#[tokio::test]
async fn test_full_refund_cancels_tickets_and_restores_inventory() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("Normal", 2)], card()))
        .await
        .unwrap();
    h.orchestrator
        .process_payment(&h.buyer, receipt.payment_id)
        .await
        .unwrap();
    assert_eq!(98, h.available("Normal").await);

    let refunded = h
        .orchestrator
        .refund(&h.buyer, receipt.payment_id, Money::new(2000), "cannot attend")
        .await
        .unwrap();
    assert_eq!(PaymentStatus::Refunded, refunded.payment.status);
    assert_eq!(2, refunded.cancelled_tickets.len());
    for ticket in h.orchestrator.tickets_for_payment(receipt.payment_id).await.unwrap() {
        assert_eq!(TicketStatus::Cancelled, ticket.status);
    }
    assert_eq!(100, h.available("Normal").await);
    h.assert_conserved(h.event_id).await;
}

#[tokio::test]
async fn test_partial_refund_only_moves_money() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("Normal", 2)], card()))
        .await
        .unwrap();
    h.orchestrator
        .process_payment(&h.buyer, receipt.payment_id)
        .await
        .unwrap();

    let staff = Caller::new(UserId::new_v4(), Role::Admin);
    let refunded = h
        .orchestrator
        .refund(&staff, receipt.payment_id, Money::new(500), "goodwill")
        .await
        .unwrap();
    assert_eq!(PaymentStatus::PartiallyRefunded, refunded.payment.status);
    assert!(refunded.cancelled_tickets.is_empty());
    assert_eq!(98, h.available("Normal").await);

    let result = h
        .orchestrator
        .refund(&h.buyer, receipt.payment_id, Money::new(1501), "too much")
        .await;
    assert!(matches!(result, Err(BookingError::AmountExceedsAvailable { .. })));

    let stranger = Caller::user(UserId::new_v4());
    let result = h
        .orchestrator
        .refund(&stranger, receipt.payment_id, Money::new(1), "not mine")
        .await;
    assert!(matches!(result, Err(BookingError::Forbidden)));

    let settled = h
        .orchestrator
        .settle_refund(receipt.payment_id, refunded.refund.id, true, Some("re_1".to_string()))
        .await
        .unwrap();
    assert_eq!(Money::new(500), settled.total_refunded());
}

#[tokio::test]
async fn test_price_edit_does_not_touch_minted_tickets() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("VIP", 2)], card()))
        .await
        .unwrap();
    h.catalog
        .set_unit_price(h.event_id, "VIP", Money::new(9000))
        .await
        .unwrap();

    for ticket in h.orchestrator.tickets_for_payment(receipt.payment_id).await.unwrap() {
        assert_eq!(Money::new(5000), ticket.category.price);
    }
    let payment = h.orchestrator.payment(receipt.payment_id).await.unwrap();
    assert_eq!(Money::new(10000), payment.amount.total);

    let later = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("VIP", 1)], card()))
        .await
        .unwrap();
    assert_eq!(Money::new(9000), later.total);
}

#[tokio::test]
async fn test_signing_failure_rolls_everything_back() {
    let h = harness_with(
        Arc::new(FailingSigner::after(2)),
        Arc::new(LogNotifier),
        None,
    )
    .await;
    let result = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("Normal", 2), ("VIP", 1)], card()))
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, BookingError::TokenSigning(_)));
    assert!(err.is_retryable());

    assert_eq!(100, h.available("Normal").await);
    assert_eq!(10, h.available("VIP").await);
    let tickets = h.tickets.all().await;
    assert_eq!(2, tickets.len());
    assert!(tickets.iter().all(|t| t.status == TicketStatus::Cancelled));
    let payment = h.orchestrator.payment(tickets[0].payment_id).await.unwrap();
    assert_eq!(PaymentStatus::Failed, payment.status);
    h.assert_conserved(h.event_id).await;

    assert!(h
        .persister
        .get_next_failed(StdDuration::from_secs(60))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_declined_card_releases_units() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(
            &h.buyer,
            request(h.event_id, &[("VIP", 3)], PaymentMethod::card("12")),
        )
        .await
        .unwrap();
    assert_eq!(7, h.available("VIP").await);

    let result = h
        .orchestrator
        .process_payment(&h.buyer, receipt.payment_id)
        .await;
    assert!(matches!(result, Err(BookingError::PaymentDeclined(_))));
    let payment = h.orchestrator.payment(receipt.payment_id).await.unwrap();
    assert_eq!(PaymentStatus::Failed, payment.status);
    assert_eq!(10, h.available("VIP").await);
    h.assert_conserved(h.event_id).await;

    let retry = h
        .orchestrator
        .process_payment(&h.buyer, receipt.payment_id)
        .await;
    assert!(matches!(retry, Err(BookingError::InvalidPaymentTransition { .. })));
}

#[tokio::test]
async fn test_cash_on_delivery_is_settled_at_booking() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(
            &h.buyer,
            request(h.event_id, &[("Normal", 1)], PaymentMethod::cash_on_delivery()),
        )
        .await
        .unwrap();
    assert_eq!(PaymentStatus::Completed, receipt.payment_status);
    assert_eq!(TicketStatus::Confirmed, receipt.tickets[0].status);

    let ticket = &receipt.tickets[0];
    let staff = Caller::new(UserId::new_v4(), Role::Admin);
    h.verifier()
        .verify(&staff, ticket.id, &ticket.qr.encoded(), "box-office")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_expired_payment_is_failed_before_any_action() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("Normal", 4)], card()))
        .await
        .unwrap();
    h.clock.advance(Duration::hours(24) + Duration::seconds(1));

    let payment = h.orchestrator.payment(receipt.payment_id).await.unwrap();
    assert_eq!(PaymentStatus::Failed, payment.status);
    assert_eq!(96, h.available("Normal").await);

    let result = h
        .orchestrator
        .process_payment(&h.buyer, receipt.payment_id)
        .await;
    assert!(matches!(result, Err(BookingError::PaymentExpired(_))));
    assert_eq!(100, h.available("Normal").await);
    assert!(h
        .orchestrator
        .expire_stale_payment(receipt.payment_id)
        .await
        .unwrap()
        .is_none());
    h.assert_conserved(h.event_id).await;
}

#[tokio::test]
async fn test_expire_stale_payment_sweeps_one_payment() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("VIP", 2)], card()))
        .await
        .unwrap();
    assert!(h
        .orchestrator
        .expire_stale_payment(receipt.payment_id)
        .await
        .unwrap()
        .is_none());

    h.clock.advance(Duration::days(2));
    let expired = h
        .orchestrator
        .expire_stale_payment(receipt.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(PaymentStatus::Failed, expired.status);
    assert_eq!(10, h.available("VIP").await);
}

#[tokio::test]
async fn test_payment_stuck_processing_expires_and_releases() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("VIP", 3)], card()))
        .await
        .unwrap();
    let payment = h.orchestrator.payments.get(receipt.payment_id).await.unwrap();
    // The gateway answer was never recorded.
    h.orchestrator.payments.mark_processing(payment).await.unwrap();
    assert_eq!(7, h.available("VIP").await);

    h.clock.advance(Duration::hours(24) + Duration::seconds(1));
    let payment = h.orchestrator.payment(receipt.payment_id).await.unwrap();
    assert_eq!(PaymentStatus::Failed, payment.status);

    let expired = h
        .orchestrator
        .expire_stale_payment(receipt.payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(PaymentStatus::Failed, expired.status);
    assert_eq!(10, h.available("VIP").await);
    for ticket in h.orchestrator.tickets_for_payment(receipt.payment_id).await.unwrap() {
        assert_eq!(TicketStatus::Cancelled, ticket.status);
    }
    h.assert_conserved(h.event_id).await;
}

#[tokio::test]
async fn test_cancellation_rules() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("Normal", 3)], card()))
        .await
        .unwrap();
    h.orchestrator
        .process_payment(&h.buyer, receipt.payment_id)
        .await
        .unwrap();
    let [first, second, third] = [
        receipt.tickets[0].clone(),
        receipt.tickets[1].clone(),
        receipt.tickets[2].clone(),
    ];

    let stranger = Caller::user(UserId::new_v4());
    let result = h.orchestrator.cancel(&stranger, first.id).await;
    assert!(matches!(result, Err(BookingError::Forbidden)));

    let cancelled = h.orchestrator.cancel(&h.buyer, first.id).await.unwrap();
    assert_eq!(TicketStatus::Cancelled, cancelled.status);
    assert_eq!(98, h.available("Normal").await);
    let again = h.orchestrator.cancel(&h.buyer, first.id).await;
    assert!(matches!(again, Err(BookingError::AlreadyCancelled)));
    assert_eq!(98, h.available("Normal").await);

    let staff = Caller::new(UserId::new_v4(), Role::Organizer);
    h.verifier()
        .verify(&staff, second.id, &second.qr.encoded(), "gate-3")
        .await
        .unwrap();
    let used = h.orchestrator.cancel(&h.buyer, second.id).await;
    assert!(matches!(
        used,
        Err(BookingError::AlreadyUsed { used_by: Some(ref by), .. }) if by == "gate-3"
    ));

    h.clock.advance(Duration::days(8));
    let late = h.orchestrator.cancel(&h.buyer, third.id).await;
    assert!(matches!(late, Err(BookingError::EventStarted)));
    h.assert_conserved(h.event_id).await;
}

#[tokio::test]
async fn test_only_the_buyer_processes_payment() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("Normal", 1)], card()))
        .await
        .unwrap();
    let admin = Caller::new(UserId::new_v4(), Role::Admin);
    let result = h.orchestrator.process_payment(&admin, receipt.payment_id).await;
    assert!(matches!(result, Err(BookingError::Forbidden)));
}

#[tokio::test]
async fn test_notification_failure_keeps_booking() {
    let h = harness_with(
        Arc::new(HmacTokenSigner::new("test-secret").unwrap()),
        Arc::new(SilentNotifier),
        None,
    )
    .await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("Normal", 1)], card()))
        .await
        .unwrap();
    assert_eq!(1, receipt.tickets.len());
    assert_eq!(99, h.available("Normal").await);
}

#[tokio::test]
async fn test_bookings_run_without_journal() {
    let h = harness_with(
        Arc::new(FailingSigner::after(1)),
        Arc::new(LogNotifier),
        Some(Arc::new(Blackhole::default())),
    )
    .await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("VIP", 1)], card()))
        .await
        .unwrap();
    assert_eq!(1, receipt.tickets.len());

    let result = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("VIP", 1)], card()))
        .await;
    assert!(matches!(result, Err(BookingError::TokenSigning(_))));
    assert_eq!(9, h.available("VIP").await);
    assert!(h
        .orchestrator
        .recover_next(StdDuration::ZERO)
        .await
        .unwrap()
        .is_none());
}

/// Hands the running attempt to recovery as soon as units of `category` are reserved.
struct TakeoverCatalog {
    inner: InMemoryCatalog,
    journal: InMemoryPersister,
    category: &'static str,
    fired: AtomicBool,
}

#[async_trait::async_trait]
impl EventCatalog for TakeoverCatalog {
    async fn event(&self, id: EventId) -> Result<Event, StoreError> {
        self.inner.event(id).await
    }

    async fn category(
        &self,
        id: EventId,
        name: &str,
    ) -> Result<Option<PricingCategory>, StoreError> {
        self.inner.category(id, name).await
    }

    async fn compare_and_set_available(
        &self,
        id: EventId,
        name: &str,
        expected: u32,
        new: u32,
    ) -> Result<bool, StoreError> {
        let swapped = self
            .inner
            .compare_and_set_available(id, name, expected, new)
            .await?;
        let reserved = swapped && new < expected && name == self.category;
        if reserved && !self.fired.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
            let taken = self
                .journal
                .get_next_failed(StdDuration::from_millis(1))
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            assert!(taken.is_some());
        }
        Ok(swapped)
    }
}

#[tokio::test]
async fn test_taken_over_attempt_hands_back_every_unit() {
    let h = harness().await;
    let executor = BookingOrchestrator::new(
        BookingServices {
            catalog: Arc::new(TakeoverCatalog {
                inner: h.catalog.clone(),
                journal: h.persister.clone(),
                category: "VIP",
                fired: AtomicBool::new(false),
            }),
            payments: Arc::new(InMemoryPayments::new()),
            tickets: Arc::new(h.tickets.clone()),
            journal: Arc::new(h.persister.clone()),
            signer: h.signer.clone(),
            processors: ProcessorRegistry::with_defaults(),
            notifier: Arc::new(LogNotifier),
            clock: h.clock.clone(),
        },
        BookingConfig {
            qr_secret: "test-secret".to_string(),
            ..BookingConfig::default()
        },
    );

    let result = executor
        .book(&h.buyer, request(h.event_id, &[("Normal", 1), ("VIP", 2)], card()))
        .await;
    assert!(matches!(result, Err(BookingError::Journal(PersistError::Locked))));
    // The VIP reservation never reached the journal, so the executor hands it back itself.
    assert_eq!(10, h.available("VIP").await);
    assert_eq!(99, h.available("Normal").await);

    tokio::time::sleep(StdDuration::from_millis(5)).await;
    let report = h
        .orchestrator
        .recover_next(StdDuration::from_millis(1))
        .await
        .unwrap()
        .unwrap();
    assert!(!report.completed);
    assert_eq!(Some(&1), report.released.get("Normal"));
    assert_eq!(None, report.released.get("VIP"));
    assert_eq!(100, h.available("Normal").await);
    assert_eq!(10, h.available("VIP").await);
    h.assert_conserved(h.event_id).await;
}

async fn crashed_attempt(h: &Harness, entries: Vec<JournalEntry>) -> Uuid {
    let id = Uuid::new_v4();
    let shared: Arc<dyn StepPersister> = Arc::new(h.persister.clone());
    let mut journal = BookingJournal::open(
        shared,
        LockScope::from_id(id, BOOKING_SAGA.to_string()),
        JournalEntry::Started {
            event_id: h.event_id,
            buyer_id: h.buyer.id,
            lines: vec![BookingLine::new("Normal", 3)],
        },
    )
    .await
    .unwrap();
    for entry in entries {
        journal.record(entry).await.unwrap();
    }
    id
}

#[tokio::test]
async fn test_recovery_releases_what_a_stalled_attempt_held() {
    let h = harness().await;
    let ledger = InventoryLedger::new(Arc::new(h.catalog.clone()), 8);
    ledger.reserve(h.event_id, "Normal", 3).await.unwrap();
    let id = crashed_attempt(
        &h,
        vec![JournalEntry::Reserved {
            category: "Normal".to_string(),
            quantity: 3,
        }],
    )
    .await;
    assert_eq!(97, h.available("Normal").await);

    assert!(h
        .orchestrator
        .recover_next(StdDuration::from_secs(60))
        .await
        .unwrap()
        .is_none());

    tokio::time::sleep(StdDuration::from_millis(5)).await;
    let report = h
        .orchestrator
        .recover_next(StdDuration::from_millis(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, report.attempt_id);
    assert!(!report.completed);
    assert_eq!(Some(&3), report.released.get("Normal"));
    assert_eq!(100, h.available("Normal").await);
    assert_eq!(Some(LockType::Finished), h.persister.lock_type(id).await);

    let entries = decode(&h.persister.retrieve(id).await.unwrap()).unwrap();
    assert!(matches!(entries.last(), Some(JournalEntry::Aborted { .. })));
}

#[tokio::test]
async fn test_recovery_closes_completed_attempt_without_undoing_it() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .book(&h.buyer, request(h.event_id, &[("Normal", 3)], card()))
        .await
        .unwrap();
    let id = crashed_attempt(
        &h,
        vec![
            JournalEntry::Reserved {
                category: "Normal".to_string(),
                quantity: 3,
            },
            JournalEntry::Completed {
                payment_id: receipt.payment_id,
            },
        ],
    )
    .await;

    tokio::time::sleep(StdDuration::from_millis(5)).await;
    let report = h
        .orchestrator
        .recover_next(StdDuration::from_millis(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, report.attempt_id);
    assert!(report.completed);
    assert_eq!(97, h.available("Normal").await);
}

#[tokio::test]
async fn test_resumer_drains_failed_attempts() {
    let h = harness().await;
    let ledger = InventoryLedger::new(Arc::new(h.catalog.clone()), 8);
    ledger.reserve(h.event_id, "Normal", 2).await.unwrap();
    crashed_attempt(
        &h,
        vec![JournalEntry::Reserved {
            category: "Normal".to_string(),
            quantity: 2,
        }],
    )
    .await;

    let resumer = tokio::spawn(run_resumer(
        h.orchestrator.clone(),
        StdDuration::from_millis(1),
        StdDuration::from_millis(5),
    ));
    for _ in 0..100 {
        if h.available("Normal").await == 100 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    resumer.abort();
    assert_eq!(100, h.available("Normal").await);
}
