use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio::sync::{Mutex, RwLock};

use crate::models::{
    event::{Event, EventId, PricingCategory},
    money::Money,
    payment::{Payment, PaymentId},
    ticket::{Ticket, TicketId, TicketStatus},
};

use super::store::{
    EventCatalog, PaymentStore, StoreError, TicketChange, TicketStore, Transition,
};

/// Each event sits behind its own mutex so writes to one event never wait on another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    events: Arc<RwLock<HashMap<EventId, Arc<Mutex<Event>>>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_event(&self, event: Event) {
        self.events
            .write()
            .await
            .insert(event.id, Arc::new(Mutex::new(event)));
    }

    /// Organizer-side price edit.
    pub async fn set_unit_price(
        &self,
        id: EventId,
        name: &str,
        price: Money,
    ) -> Result<(), StoreError> {
        let record = self.record(id).await?;
        let mut event = record.lock().await;
        let category = event.category_mut(name).ok_or(StoreError::NotFound)?;
        category.unit_price = price;
        Ok(())
    }

    async fn record(&self, id: EventId) -> Result<Arc<Mutex<Event>>, StoreError> {
        self.events
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait::async_trait]
impl EventCatalog for InMemoryCatalog {
    async fn event(&self, id: EventId) -> Result<Event, StoreError> {
        let record = self.record(id).await?;
        let event = record.lock().await.clone();
        Ok(event)
    }

    async fn category(
        &self,
        id: EventId,
        name: &str,
    ) -> Result<Option<PricingCategory>, StoreError> {
        let record = self.record(id).await?;
        let event = record.lock().await;
        Ok(event.category(name).cloned())
    }

    async fn compare_and_set_available(
        &self,
        id: EventId,
        name: &str,
        expected: u32,
        new: u32,
    ) -> Result<bool, StoreError> {
        let record = self.record(id).await?;
        let mut event = record.lock().await;
        let category = event.category_mut(name).ok_or(StoreError::NotFound)?;
        if category.available_units != expected || new > category.total_units {
            return Ok(false);
        }
        category.available_units = new;
        Ok(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPayments {
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
}

impl InMemoryPayments {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PaymentStore for InMemoryPayments {
    async fn insert(&self, payment: Payment) -> Result<Payment, StoreError> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(StoreError::Duplicate(payment.id.to_string()));
        }
        payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: PaymentId) -> Result<Payment, StoreError> {
        self.payments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, mut payment: Payment) -> Result<Payment, StoreError> {
        let mut payments = self.payments.write().await;
        let stored = payments.get(&payment.id).ok_or(StoreError::NotFound)?;
        if stored.version != payment.version {
            return Err(StoreError::VersionConflict(payment.id.to_string()));
        }
        payment.version += 1;
        payments.insert(payment.id, payment.clone());
        Ok(payment)
    }
}

#[derive(Debug, Default)]
struct TicketTable {
    tickets: HashMap<TicketId, Ticket>,
    numbers: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTickets {
    table: Arc<RwLock<TicketTable>>,
}

impl InMemoryTickets {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Ticket> {
        self.table.read().await.tickets.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl TicketStore for InMemoryTickets {
    async fn insert(&self, ticket: Ticket) -> Result<Ticket, StoreError> {
        let mut table = self.table.write().await;
        if table.tickets.contains_key(&ticket.id) {
            return Err(StoreError::Duplicate(ticket.id.to_string()));
        }
        if !table.numbers.insert(ticket.ticket_number.clone()) {
            return Err(StoreError::Duplicate(ticket.ticket_number));
        }
        table.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn get(&self, id: TicketId) -> Result<Ticket, StoreError> {
        self.table
            .read()
            .await
            .tickets
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn by_payment(&self, payment_id: PaymentId) -> Result<Vec<Ticket>, StoreError> {
        let mut tickets: Vec<Ticket> = self
            .table
            .read()
            .await
            .tickets
            .values()
            .filter(|t| t.payment_id == payment_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tickets)
    }

    async fn transition(
        &self,
        id: TicketId,
        from: &[TicketStatus],
        change: TicketChange,
    ) -> Result<Transition<Ticket>, StoreError> {
        let mut table = self.table.write().await;
        let ticket = table.tickets.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !from.contains(&ticket.status) {
            return Ok(Transition::Rejected(ticket.clone()));
        }
        ticket.status = change.status;
        if change.used_at.is_some() {
            ticket.used_at = change.used_at;
        }
        if change.used_by.is_some() {
            ticket.used_by = change.used_by;
        }
        Ok(Transition::Applied(ticket.clone()))
    }
}
