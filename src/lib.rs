//! Ticket booking engine: per-category inventory that cannot be oversold, payments and
//! tickets created together or not at all, signed QR tokens checked once at the door.

pub mod booking;
pub mod clock;
pub mod config;
pub mod error;
pub mod factory;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod payments;
pub mod persisters;
pub mod qr;
pub mod saga;
pub mod stores;
pub mod verification;

#[cfg(test)]
mod testing;

pub use booking::{BookingOrchestrator, BookingServices};
pub use config::BookingConfig;
pub use error::{BookingError, ErrorKind};
pub use verification::VerificationService;
