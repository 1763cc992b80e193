use crate::{
    error::BookingError,
    ledger::{InventoryLedger, LedgerError, ReservationToken},
    models::{event::EventId, money::Money},
    saga::journal::{BookingJournal, JournalEntry},
};

struct Held {
    token: ReservationToken,
    /// Its `Reserved` entry made it into the journal, so recovery can see it.
    journaled: bool,
    released: bool,
}

/// Reservations taken by one booking attempt. Each is released at most once,
/// however many failure paths ask for it.
pub(crate) struct ReservationSet {
    ledger: InventoryLedger,
    event_id: EventId,
    held: Vec<Held>,
}

impl ReservationSet {
    pub(crate) fn new(ledger: InventoryLedger, event_id: EventId) -> Self {
        Self {
            ledger,
            event_id,
            held: Vec::new(),
        }
    }

    pub(crate) async fn reserve(
        &mut self,
        category: &str,
        quantity: u32,
    ) -> Result<ReservationToken, LedgerError> {
        let token = self.ledger.reserve(self.event_id, category, quantity).await?;
        self.held.push(Held {
            token: token.clone(),
            journaled: false,
            released: false,
        });
        Ok(token)
    }

    /// Marks the latest reservation as written to the journal.
    pub(crate) fn journaled(&mut self) {
        if let Some(held) = self.held.last_mut() {
            held.journaled = true;
        }
    }

    pub(crate) fn tokens(&self) -> impl Iterator<Item = &ReservationToken> {
        self.held.iter().map(|h| &h.token)
    }

    pub(crate) fn total(&self) -> Option<Money> {
        self.tokens()
            .try_fold(Money::ZERO, |acc, t| acc.checked_add(t.subtotal()?))
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.held.iter().filter(|h| !h.released).count()
    }

    /// Stops at the first reservation it cannot hand back, leaving the rest for recovery.
    pub(crate) async fn release_all(
        &mut self,
        journal: &mut BookingJournal,
    ) -> Result<(), BookingError> {
        for held in self.held.iter_mut().filter(|h| !h.released) {
            journal.claim().await?;
            self.ledger
                .release(self.event_id, &held.token.category, held.token.quantity)
                .await?;
            held.released = true;
            journal
                .record(JournalEntry::Released {
                    category: held.token.category.clone(),
                    quantity: held.token.quantity,
                })
                .await?;
        }
        Ok(())
    }

    /// Hands back reservations the journal never heard of. Used once another executor
    /// owns the attempt: it unwinds the journaled ones, nobody else knows about these.
    pub(crate) async fn release_unjournaled(&mut self) -> Result<u32, LedgerError> {
        let mut units = 0;
        for held in self.held.iter_mut().filter(|h| !h.journaled && !h.released) {
            units += self
                .ledger
                .release(self.event_id, &held.token.category, held.token.quantity)
                .await?;
            held.released = true;
        }
        Ok(units)
    }
}
