//! Billing error types

use thiserror::Error;

/// Billing-specific errors
///
/// Expected failure modes are variants, not panics. `NotFound`,
/// `InvalidState`, and `Validation` are surfaced to the caller and never
/// retried; `ExternalFailure` marks transient collaborator trouble the
/// caller may retry. Blocked entitlements and dunning escalations are
/// modeled states, not errors.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation not legal from current state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("External collaborator failed: {0}")]
    ExternalFailure(String),

    #[error("Concurrent modification detected: {0}")]
    ConcurrentModification(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

pub type BillingResult<T> = Result<T, BillingError>;
