use std::{error::Error, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::spawn;
use ticket_booking::{
    booking::run_resumer,
    clock::{Clock, SystemClock},
    gateway::ProcessorRegistry,
    models::{
        booking::{BookingLine, BookingRequest},
        caller::{Caller, Role, UserId},
        event::{Event, EventStatus, PricingCategory},
        money::Money,
        payment::{BillingContact, PaymentMethod},
    },
    notify::LogNotifier,
    persisters::in_memory::InMemoryPersister,
    qr::{HmacTokenSigner, TokenSigner},
    stores::in_memory::{InMemoryCatalog, InMemoryPayments, InMemoryTickets},
    BookingConfig, BookingOrchestrator, BookingServices, VerificationService,
};

fn billing(n: usize) -> BillingContact {
    BillingContact {
        name: format!("Buyer {n}"),
        email: format!("buyer{n}@example.com"),
        phone: format!("+9477000000{n}"),
        address: None,
    }
}

// book -> pay -> scan at the door -> cancel, with several buyers racing for VIP seats
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let config = BookingConfig::from_env()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let catalog = InMemoryCatalog::new();
    let tickets = InMemoryTickets::new();
    let signer: Arc<dyn TokenSigner> = Arc::new(HmacTokenSigner::new(config.qr_secret.clone())?);
    let event = Event::new(
        EventStatus::Published,
        Utc::now() + chrono::Duration::days(14),
        vec![
            PricingCategory::new("Normal", Money::new(1000), 100),
            PricingCategory::new("VIP", Money::new(5000), 4),
        ],
    );
    let event_id = event.id;
    catalog.insert_event(event).await;

    let orchestrator = Arc::new(BookingOrchestrator::new(
        BookingServices {
            catalog: Arc::new(catalog),
            payments: Arc::new(InMemoryPayments::new()),
            tickets: Arc::new(tickets.clone()),
            journal: Arc::new(InMemoryPersister::new(config.journal_lock_timeout())),
            signer: signer.clone(),
            processors: ProcessorRegistry::with_defaults(),
            notifier: Arc::new(LogNotifier),
            clock: clock.clone(),
        },
        config.clone(),
    ));
    let runner = spawn(run_resumer(
        orchestrator.clone(),
        config.journal_lock_timeout(),
        Duration::from_millis(500),
    ));

    let mut handles = vec![];
    for n in 0..5 {
        let orchestrator = orchestrator.clone();
        handles.push(spawn(async move {
            let buyer = Caller::user(UserId::new_v4());
            let method = if n % 2 == 0 {
                PaymentMethod::card("4242")
            } else {
                PaymentMethod::cash_on_delivery()
            };
            let request = BookingRequest {
                event_id,
                lines: vec![BookingLine::new("Normal", 1), BookingLine::new("VIP", 2)],
                billing: billing(n),
                method,
            };
            (buyer, orchestrator.book(&buyer, request).await)
        }));
    }

    let mut booked = vec![];
    for handle in handles {
        match handle.await? {
            (buyer, Ok(receipt)) => {
                println!(
                    "booked payment={} tickets={} total={} status={:?}",
                    receipt.payment_id,
                    receipt.tickets.len(),
                    receipt.total,
                    receipt.payment_status
                );
                booked.push((buyer, receipt));
            }
            (_, Err(e)) => println!("booking refused ({:?}): {e}", e.kind()),
        }
    }

    let verifier = VerificationService::new(Arc::new(tickets), signer, clock);
    let door = Caller::new(UserId::new_v4(), Role::Organizer);
    for (buyer, receipt) in &booked {
        if receipt.payment_status.is_refundable() {
            continue;
        }
        let payment = orchestrator.process_payment(buyer, receipt.payment_id).await?;
        println!("payment={} is {:?}", payment.id, payment.status);
    }
    if let Some((buyer, receipt)) = booked.first() {
        let [first, second, ..] = receipt.tickets.as_slice() else {
            return Ok(());
        };
        let admitted = verifier
            .verify(&door, first.id, &first.qr.encoded(), "gate-1")
            .await?;
        println!("admitted {} at {}", admitted.ticket_number, admitted.used_by);
        if let Err(e) = verifier
            .verify(&door, first.id, &first.qr.encoded(), "gate-2")
            .await
        {
            println!("second scan refused: {e}");
        }
        let cancelled = orchestrator.cancel(buyer, second.id).await?;
        println!("cancelled {}", cancelled.ticket_number);
    }

    for category in ["Normal", "VIP"] {
        let snapshot = orchestrator.availability(event_id, category).await?;
        println!(
            "{category}: {}/{} available",
            snapshot.available_units, snapshot.total_units
        );
    }
    runner.abort();
    Ok(())
}
