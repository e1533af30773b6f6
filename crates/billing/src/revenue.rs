//! Platform / vendor revenue split
//!
//! A settlement record is computed at the moment a gross amount clears:
//! card capture or invoice full payment. Records are append-only and keyed
//! by their settlement source so re-processing a payment can never split
//! the same dollars twice. Conservation holds exactly in cents:
//! `platform_fee + vendor_amount == gross`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;
use vendhub_shared::types::{InvoiceId, SubscriptionId, TenantId, VendorId};

use crate::error::{BillingError, BillingResult};

/// What cleared the money
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementSource {
    /// Gateway capture, keyed by transaction id
    GatewayTransaction { transaction_id: String },
    /// Invoice that just transitioned into `paid`
    Invoice { invoice_id: InvoiceId },
}

impl std::fmt::Display for SettlementSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GatewayTransaction { transaction_id } => {
                write!(f, "txn:{transaction_id}")
            }
            Self::Invoice { invoice_id } => write!(f, "invoice:{invoice_id}"),
        }
    }
}

/// Immutable settlement record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueShare {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub subscription_id: SubscriptionId,
    pub vendor_id: VendorId,
    pub source: SettlementSource,
    pub gross_cents: i64,
    pub platform_fee_cents: i64,
    pub vendor_cents: i64,
    pub fee_percent: f64,
    pub settled_at: OffsetDateTime,
}

impl RevenueShare {
    /// Split a settled gross amount
    ///
    /// The platform fee rounds to the nearest cent; the vendor takes the
    /// exact remainder, so the two always reconcile to the gross.
    pub fn settle(
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        vendor_id: VendorId,
        source: SettlementSource,
        gross_cents: i64,
        fee_percent: f64,
        settled_at: OffsetDateTime,
    ) -> BillingResult<Self> {
        if gross_cents < 0 {
            return Err(BillingError::InvalidAmount(format!(
                "gross must be non-negative, got {gross_cents}"
            )));
        }
        if !(0.0..=100.0).contains(&fee_percent) {
            return Err(BillingError::Validation(format!(
                "fee percent out of range: {fee_percent}"
            )));
        }
        let platform_fee = (gross_cents as f64 * fee_percent / 100.0).round() as i64;
        let platform_fee = platform_fee.clamp(0, gross_cents);
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id,
            subscription_id,
            vendor_id,
            source,
            gross_cents,
            platform_fee_cents: platform_fee,
            vendor_cents: gross_cents - platform_fee,
            fee_percent,
            settled_at,
        })
    }
}
