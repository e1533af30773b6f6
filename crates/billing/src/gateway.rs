//! External collaborator boundaries
//!
//! The payment gateway and the credential/KYC pipeline are consumed
//! through these traits. A decline is a business outcome that feeds
//! dunning; only transport-level trouble surfaces as an error, and the
//! engine retries it with exponential backoff outside the per-subscription
//! lock. Timeouts on the underlying calls are enforced by the
//! collaborator, not here.

use async_trait::async_trait;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use vendhub_shared::types::{CredentialReport, CredentialType, SubscriptionId, TenantId, UserId};

use crate::config::RetryConfig;
use crate::error::{BillingError, BillingResult};

/// Transport-level gateway failure (transient; retried)
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Business outcome of a charge attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
}

/// Refund confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub refund_id: String,
}

/// Card/bank rails boundary
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        subscription_id: SubscriptionId,
        amount_cents: i64,
        currency: &str,
    ) -> Result<ChargeOutcome, GatewayError>;

    /// Full refund when `amount_cents` is `None`
    async fn refund(
        &self,
        transaction_id: &str,
        amount_cents: Option<i64>,
    ) -> Result<RefundReceipt, GatewayError>;
}

/// Identity / credential verification boundary
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn status(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        credential: CredentialType,
    ) -> Result<CredentialReport, GatewayError>;
}

fn backoff(retry: &RetryConfig) -> impl Iterator<Item = std::time::Duration> {
    ExponentialBackoff::from_millis(retry.base_delay_ms)
        .map(jitter)
        .take(retry.max_attempts.saturating_sub(1))
}

/// Charge with backoff on transient failures
///
/// Declines are returned, not retried. Must be called without holding the
/// subscription lock.
pub async fn charge_with_retry(
    gateway: &dyn PaymentGateway,
    retry: &RetryConfig,
    subscription_id: SubscriptionId,
    amount_cents: i64,
    currency: &str,
) -> BillingResult<ChargeOutcome> {
    Retry::spawn(backoff(retry), || {
        gateway.charge(subscription_id, amount_cents, currency)
    })
    .await
    .map_err(|e| BillingError::ExternalFailure(e.to_string()))
}

/// Credential lookup with backoff on transient failures
pub async fn credential_status_with_retry(
    verifier: &dyn CredentialVerifier,
    retry: &RetryConfig,
    tenant_id: TenantId,
    user_id: UserId,
    credential: CredentialType,
) -> BillingResult<CredentialReport> {
    Retry::spawn(backoff(retry), || {
        verifier.status(tenant_id, user_id, credential)
    })
    .await
    .map_err(|e| BillingError::ExternalFailure(e.to_string()))
}
