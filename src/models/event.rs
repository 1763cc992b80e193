use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::Money;

pub type EventId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingCategory {
    pub name: String,
    pub unit_price: Money,
    pub total_units: u32,
    pub available_units: u32,
}

impl PricingCategory {
    pub fn new(name: impl Into<String>, unit_price: Money, total_units: u32) -> Self {
        Self {
            name: name.into(),
            unit_price,
            total_units,
            available_units: total_units,
        }
    }

    pub fn held_units(&self) -> u32 {
        self.total_units.saturating_sub(self.available_units)
    }
}

/// The slice of an event the booking engine reads from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub status: EventStatus,
    pub starts_at: DateTime<Utc>,
    pub categories: Vec<PricingCategory>,
}

impl Event {
    pub fn new(
        status: EventStatus,
        starts_at: DateTime<Utc>,
        categories: Vec<PricingCategory>,
    ) -> Self {
        Self {
            id: EventId::new_v4(),
            status,
            starts_at,
            categories,
        }
    }

    pub fn category(&self, name: &str) -> Option<&PricingCategory> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn category_mut(&mut self, name: &str) -> Option<&mut PricingCategory> {
        self.categories.iter_mut().find(|c| c.name == name)
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now
    }

    pub fn is_bookable(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Published && !self.has_started(now)
    }
}
