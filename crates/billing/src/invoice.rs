//! Invoicing
//!
//! Invoice-billed subscriptions settle through these records instead of an
//! immediate card capture. Payments accumulate; only the transition into
//! `paid` feeds revenue-share creation, no matter how many partial
//! payments precede it. `paid` and `void` are terminal.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use vendhub_shared::types::{InvoiceId, SubscriptionId, TenantId, VendorId};

use crate::error::{BillingError, BillingResult};

/// When an invoice falls due, relative to its issue date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTerms {
    DueOnReceipt,
    NetDays(u16),
}

impl PaymentTerms {
    pub fn due_at(&self, issued_at: OffsetDateTime) -> OffsetDateTime {
        match self {
            Self::DueOnReceipt => issued_at,
            Self::NetDays(days) => issued_at + Duration::days(i64::from(*days)),
        }
    }
}

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Void,
}

impl InvoiceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Void)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Sent => write!(f, "sent"),
            Self::PartiallyPaid => write!(f, "partially_paid"),
            Self::Paid => write!(f, "paid"),
            Self::Overdue => write!(f, "overdue"),
            Self::Void => write!(f, "void"),
        }
    }
}

/// One billed line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub amount_cents: i64,
}

impl LineItem {
    pub fn new(description: impl Into<String>, quantity: i64, unit_price_cents: i64) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price_cents,
            amount_cents: quantity.saturating_mul(unit_price_cents),
        }
    }

    /// A negative line carrying a credit into this invoice
    pub fn credit(description: impl Into<String>, amount_cents: i64) -> Self {
        Self {
            description: description.into(),
            quantity: 1,
            unit_price_cents: -amount_cents.abs(),
            amount_cents: -amount_cents.abs(),
        }
    }
}

/// Result of applying one payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentApplication {
    pub status: InvoiceStatus,
    pub amount_due_cents: i64,
    /// True only on the application that crossed into `paid`
    pub settled: bool,
}

/// Invoice record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub tenant_id: TenantId,
    pub subscription_id: SubscriptionId,
    pub vendor_id: VendorId,
    pub lines: Vec<LineItem>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub amount_paid_cents: i64,
    pub status: InvoiceStatus,
    pub terms: PaymentTerms,
    pub issued_at: OffsetDateTime,
    pub due_at: OffsetDateTime,
    pub paid_at: Option<OffsetDateTime>,
    pub voided_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub revision: u64,
}

impl Invoice {
    /// Issue an invoice from line items
    ///
    /// Tax applies to the subtotal at a flat rate, rounded once. The
    /// subtotal floors at zero so credit lines can never produce a
    /// negative invoice.
    pub fn issue(
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        vendor_id: VendorId,
        lines: Vec<LineItem>,
        tax_percent: f64,
        terms: PaymentTerms,
        issued_at: OffsetDateTime,
    ) -> BillingResult<Self> {
        if lines.is_empty() {
            return Err(BillingError::Validation(
                "invoice requires at least one line item".to_string(),
            ));
        }
        let subtotal: i64 = lines.iter().map(|l| l.amount_cents).sum::<i64>().max(0);
        let tax = (subtotal as f64 * tax_percent / 100.0).round() as i64;
        Ok(Self {
            id: InvoiceId::new(),
            tenant_id,
            subscription_id,
            vendor_id,
            lines,
            subtotal_cents: subtotal,
            tax_cents: tax,
            total_cents: subtotal + tax,
            amount_paid_cents: 0,
            status: InvoiceStatus::Sent,
            terms,
            issued_at,
            due_at: terms.due_at(issued_at),
            paid_at: None,
            voided_at: None,
            created_at: issued_at,
            revision: 0,
        })
    }

    pub fn amount_due_cents(&self) -> i64 {
        (self.total_cents - self.amount_paid_cents).max(0)
    }

    /// Apply a payment against the open balance
    ///
    /// `settled` fires exactly once, on the application that reaches the
    /// total. Paying a terminal invoice is an invalid-state error.
    pub fn record_payment(
        &mut self,
        amount_cents: i64,
        paid_at: OffsetDateTime,
    ) -> BillingResult<PaymentApplication> {
        if amount_cents <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "payment must be positive, got {amount_cents}"
            )));
        }
        if self.status.is_terminal() {
            return Err(BillingError::InvalidState(format!(
                "invoice {} is {}",
                self.id, self.status
            )));
        }

        self.amount_paid_cents = self.amount_paid_cents.saturating_add(amount_cents);
        let settled = self.amount_paid_cents >= self.total_cents;
        self.status = if settled {
            self.paid_at = Some(paid_at);
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::PartiallyPaid
        };

        Ok(PaymentApplication {
            status: self.status,
            amount_due_cents: self.amount_due_cents(),
            settled,
        })
    }

    /// Void an open invoice
    pub fn void(&mut self, at: OffsetDateTime) -> BillingResult<()> {
        if self.status.is_terminal() {
            return Err(BillingError::InvalidState(format!(
                "invoice {} is {}",
                self.id, self.status
            )));
        }
        self.status = InvoiceStatus::Void;
        self.voided_at = Some(at);
        Ok(())
    }

    /// Mark an unpaid invoice past its due date
    pub fn mark_overdue_if_due(&mut self, now: OffsetDateTime) -> bool {
        let eligible = matches!(
            self.status,
            InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid
        );
        if eligible && self.due_at < now {
            self.status = InvoiceStatus::Overdue;
            true
        } else {
            false
        }
    }
}
