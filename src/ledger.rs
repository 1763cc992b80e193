use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    models::{
        event::{EventId, PricingCategory},
        money::Money,
    },
    stores::store::{EventCatalog, StoreError},
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("quantity must be at least 1")]
    InvalidQuantity,
    #[error("event {0} not found")]
    EventNotFound(EventId),
    #[error("category '{0}' not found")]
    CategoryNotFound(String),
    #[error("only {available} units of '{category}' available, {requested} requested")]
    InsufficientInventory {
        category: String,
        requested: u32,
        available: u32,
    },
    #[error("gave up on '{0}' after repeated write conflicts")]
    Contention(String),
    #[error(transparent)]
    Store(StoreError),
}

/// Proof that `quantity` units were taken from a category, priced as they were at that moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationToken {
    pub event_id: EventId,
    pub category: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl ReservationToken {
    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Sole writer of `available_units`. Every change is a conditional write on the
/// counter value it was computed from, retried when another writer got there first.
#[derive(Clone)]
pub struct InventoryLedger {
    catalog: Arc<dyn EventCatalog>,
    retry_limit: u32,
}

impl InventoryLedger {
    pub fn new(catalog: Arc<dyn EventCatalog>, retry_limit: u32) -> Self {
        Self {
            catalog,
            retry_limit: retry_limit.max(1),
        }
    }

    pub async fn reserve(
        &self,
        event_id: EventId,
        category: &str,
        quantity: u32,
    ) -> Result<ReservationToken, LedgerError> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }
        for attempt in 0..self.retry_limit {
            let current = self.current(event_id, category).await?;
            if current.available_units < quantity {
                return Err(LedgerError::InsufficientInventory {
                    category: category.to_string(),
                    requested: quantity,
                    available: current.available_units,
                });
            }
            let remaining = current.available_units - quantity;
            if self
                .cas(event_id, category, current.available_units, remaining)
                .await?
            {
                log::debug!(
                    "reserved event={event_id} category={category} quantity={quantity} remaining={remaining}"
                );
                return Ok(ReservationToken {
                    event_id,
                    category: category.to_string(),
                    quantity,
                    unit_price: current.unit_price,
                });
            }
            log::trace!("reserve conflict event={event_id} category={category} attempt={attempt}");
            tokio::task::yield_now().await;
        }
        Err(LedgerError::Contention(category.to_string()))
    }

    /// Returns the units actually put back; never lifts `available_units` above `total_units`.
    pub async fn release(
        &self,
        event_id: EventId,
        category: &str,
        quantity: u32,
    ) -> Result<u32, LedgerError> {
        for attempt in 0..self.retry_limit {
            let current = self.current(event_id, category).await?;
            let restored = current
                .available_units
                .saturating_add(quantity)
                .min(current.total_units);
            let released = restored.saturating_sub(current.available_units);
            if released < quantity {
                log::warn!(
                    "release capped event={event_id} category={category} requested={quantity} released={released}"
                );
            }
            if released == 0 {
                return Ok(0);
            }
            if self
                .cas(event_id, category, current.available_units, restored)
                .await?
            {
                log::debug!(
                    "released event={event_id} category={category} quantity={released} available={restored}"
                );
                return Ok(released);
            }
            log::trace!("release conflict event={event_id} category={category} attempt={attempt}");
            tokio::task::yield_now().await;
        }
        Err(LedgerError::Contention(category.to_string()))
    }

    pub async fn availability(
        &self,
        event_id: EventId,
        category: &str,
    ) -> Result<PricingCategory, LedgerError> {
        self.current(event_id, category).await
    }

    async fn current(
        &self,
        event_id: EventId,
        category: &str,
    ) -> Result<PricingCategory, LedgerError> {
        match self.catalog.category(event_id, category).await {
            Ok(Some(c)) => Ok(c),
            Ok(None) => Err(LedgerError::CategoryNotFound(category.to_string())),
            Err(StoreError::NotFound) => Err(LedgerError::EventNotFound(event_id)),
            Err(e) => Err(LedgerError::Store(e)),
        }
    }

    async fn cas(
        &self,
        event_id: EventId,
        category: &str,
        expected: u32,
        new: u32,
    ) -> Result<bool, LedgerError> {
        self.catalog
            .compare_and_set_available(event_id, category, expected, new)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => LedgerError::CategoryNotFound(category.to_string()),
                e => LedgerError::Store(e),
            })
    }
}
