//! Payment verification against the card gateway.
//!
//! The storefront collects the payment itself; the server only checks a
//! transaction reference before marking an order paid.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::PaymentsConfig;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment gateway is not configured")]
    NotConfigured,
    #[error("Payment gateway unreachable: {0}")]
    Unavailable(String),
    #[error("Unexpected payment gateway response: {0}")]
    InvalidResponse(String),
}

/// Outcome of looking up a transaction reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub successful: bool,
    /// Charged amount in minor units (kobo for NGN)
    pub amount_minor: i64,
    pub currency: String,
    pub reference: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn verify(&self, reference: &str) -> Result<PaymentVerification, PaymentError>;
}

/// Paystack transaction verification
pub struct PaystackGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: Option<String>,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<PaystackTransaction>,
}

#[derive(Debug, Deserialize)]
struct PaystackTransaction {
    status: String,
    amount: i64,
    #[serde(default)]
    currency: Option<String>,
    reference: String,
}

impl PaystackGateway {
    pub fn new(config: &PaymentsConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sybertailor/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            currency: config.currency.clone(),
        }
    }

    fn interpret(&self, reference: &str, envelope: PaystackEnvelope) -> PaymentVerification {
        match envelope.data {
            Some(tx) if envelope.status => PaymentVerification {
                successful: tx.status == "success",
                amount_minor: tx.amount,
                currency: tx.currency.unwrap_or_else(|| self.currency.clone()),
                reference: tx.reference,
            },
            _ => {
                tracing::info!(reference = %reference, message = %envelope.message, "Payment not verified by gateway");
                PaymentVerification {
                    successful: false,
                    amount_minor: 0,
                    currency: self.currency.clone(),
                    reference: reference.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn verify(&self, reference: &str) -> Result<PaymentVerification, PaymentError> {
        let secret = self.secret_key.as_deref().ok_or(PaymentError::NotConfigured)?;
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);

        let response = self
            .client
            .get(&url)
            .bearer_auth(secret)
            .send()
            .await
            .map_err(|e| PaymentError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Unavailable(format!("{} - {}", status, body)));
        }

        // 4xx responses still carry the envelope, e.g. for an unknown reference
        let envelope: PaystackEnvelope = response
            .json()
            .await
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;

        Ok(self.interpret(reference, envelope))
    }
}
