use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use uuid::Uuid;

use crate::models::payment::{Amount, PaymentMethod, PaymentMethodType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOutcome {
    pub succeeded: bool,
    pub reference: String,
    pub message: String,
}

impl GatewayOutcome {
    fn approved(prefix: &str, message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            reference: reference(prefix),
            message: message.into(),
        }
    }

    fn declined(prefix: &str, message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            reference: reference(prefix),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment method {0:?} is not supported")]
    Unsupported(PaymentMethodType),
}

/// One implementation per payment method family. A decline is an `Ok` outcome with
/// `succeeded == false`; `Err` means the gateway could not answer at all.
#[async_trait::async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn process_external_payment(
        &self,
        method: &PaymentMethod,
        amount: &Amount,
    ) -> Result<GatewayOutcome, GatewayError>;
}

fn reference(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &id[..12].to_ascii_uppercase())
}

pub struct CardProcessor;

#[async_trait::async_trait]
impl PaymentProcessor for CardProcessor {
    async fn process_external_payment(
        &self,
        method: &PaymentMethod,
        amount: &Amount,
    ) -> Result<GatewayOutcome, GatewayError> {
        let valid_card = method
            .details
            .card_last4
            .as_deref()
            .is_some_and(|d| d.len() == 4 && d.chars().all(|c| c.is_ascii_digit()));
        if !valid_card {
            return Ok(GatewayOutcome::declined("CARD", "card details are invalid"));
        }
        Ok(GatewayOutcome::approved(
            "CARD",
            format!("charged {} {}", amount.total, amount.currency),
        ))
    }
}

pub struct MobileWalletProcessor;

#[async_trait::async_trait]
impl PaymentProcessor for MobileWalletProcessor {
    async fn process_external_payment(
        &self,
        method: &PaymentMethod,
        amount: &Amount,
    ) -> Result<GatewayOutcome, GatewayError> {
        let wallet = method
            .details
            .wallet_type
            .clone()
            .or_else(|| method.provider.map(|p| format!("{p:?}").to_lowercase()))
            .unwrap_or_else(|| "wallet".to_string());
        Ok(GatewayOutcome::approved(
            "MW",
            format!("{wallet} debited {} {}", amount.total, amount.currency),
        ))
    }
}

pub struct BankTransferProcessor;

#[async_trait::async_trait]
impl PaymentProcessor for BankTransferProcessor {
    async fn process_external_payment(
        &self,
        method: &PaymentMethod,
        _amount: &Amount,
    ) -> Result<GatewayOutcome, GatewayError> {
        if method.details.account_number.as_deref().is_some_and(str::is_empty) {
            return Ok(GatewayOutcome::declined("BT", "account number is empty"));
        }
        Ok(GatewayOutcome::approved("BT", "bank transfer initiated"))
    }
}

pub struct CashOnDeliveryProcessor;

#[async_trait::async_trait]
impl PaymentProcessor for CashOnDeliveryProcessor {
    async fn process_external_payment(
        &self,
        _method: &PaymentMethod,
        _amount: &Amount,
    ) -> Result<GatewayOutcome, GatewayError> {
        Ok(GatewayOutcome::approved("COD", "cash on delivery confirmed"))
    }
}

#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<PaymentMethodType, Arc<dyn PaymentProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let card: Arc<dyn PaymentProcessor> = Arc::new(CardProcessor);
        Self::new()
            .register(PaymentMethodType::CreditCard, card.clone())
            .register(PaymentMethodType::DebitCard, card)
            .register(PaymentMethodType::MobileWallet, Arc::new(MobileWalletProcessor))
            .register(PaymentMethodType::BankTransfer, Arc::new(BankTransferProcessor))
            .register(
                PaymentMethodType::CashOnDelivery,
                Arc::new(CashOnDeliveryProcessor),
            )
    }

    pub fn register(
        mut self,
        kind: PaymentMethodType,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        self.processors.insert(kind, processor);
        self
    }

    pub async fn process(
        &self,
        method: &PaymentMethod,
        amount: &Amount,
    ) -> Result<GatewayOutcome, GatewayError> {
        let processor = self
            .processors
            .get(&method.kind)
            .ok_or(GatewayError::Unsupported(method.kind))?;
        processor.process_external_payment(method, amount).await
    }
}
