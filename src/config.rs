use std::{env, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::payment::Currency;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Engine settings, read from `TICKETING_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfig {
    /// HMAC key for QR tokens.
    pub qr_secret: String,
    /// How long a pending payment stays payable.
    pub payment_ttl_secs: u64,
    pub max_quantity_per_line: u32,
    pub max_lines: usize,
    pub currency: Currency,
    /// Conditional-write attempts per reserve/release before giving up.
    pub reserve_retry_limit: u32,
    pub journal_lock_timeout_secs: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            qr_secret: String::new(),
            payment_ttl_secs: 24 * 60 * 60,
            max_quantity_per_line: 10,
            max_lines: 10,
            currency: Currency::Lkr,
            reserve_retry_limit: 64,
            journal_lock_timeout_secs: 300,
        }
    }
}

impl BookingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let qr_secret = lookup("TICKETING_QR_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("TICKETING_QR_SECRET"))?;
        Ok(Self {
            qr_secret,
            payment_ttl_secs: parsed(
                &lookup,
                "TICKETING_PAYMENT_TTL_SECS",
                defaults.payment_ttl_secs,
            )?,
            max_quantity_per_line: parsed(
                &lookup,
                "TICKETING_MAX_QUANTITY_PER_LINE",
                defaults.max_quantity_per_line,
            )?,
            max_lines: parsed(&lookup, "TICKETING_MAX_LINES", defaults.max_lines)?,
            currency: parsed(&lookup, "TICKETING_CURRENCY", defaults.currency)?,
            reserve_retry_limit: parsed(
                &lookup,
                "TICKETING_RESERVE_RETRY_LIMIT",
                defaults.reserve_retry_limit,
            )?,
            journal_lock_timeout_secs: parsed(
                &lookup,
                "TICKETING_JOURNAL_LOCK_TIMEOUT_SECS",
                defaults.journal_lock_timeout_secs,
            )?,
        })
    }

    pub fn payment_ttl(&self) -> chrono::Duration {
        const MAX_TTL_SECS: u64 = 10 * 366 * 24 * 60 * 60;
        chrono::Duration::seconds(self.payment_ttl_secs.min(MAX_TTL_SECS) as i64)
    }

    pub fn journal_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.journal_lock_timeout_secs)
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
