//! Domain events
//!
//! Every engine operation publishes typed events through the bus boundary.
//! Delivery is fire-and-forget and at-least-once, so all consumers
//! (including this engine's own credential-change handler) must be
//! idempotent. Events answer "why is this subscription in this state?"
//! questions and drive downstream notifications.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use vendhub_shared::types::{
    CredentialStatus, CredentialType, InvoiceId, PlanId, SubscriptionId, TenantId, UserId,
};

use crate::dunning::DunningStatus;
use crate::subscription::SubscriptionStatus;

/// Typed event payloads, grouped by topic prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    SubscriptionCreated {
        subscription_id: SubscriptionId,
        plan_id: PlanId,
        status: SubscriptionStatus,
    },
    TrialStarted {
        subscription_id: SubscriptionId,
        ends_at: OffsetDateTime,
    },
    TrialConverted {
        subscription_id: SubscriptionId,
    },
    PlanChanged {
        subscription_id: SubscriptionId,
        from_plan: PlanId,
        to_plan: PlanId,
    },
    SubscriptionPaused {
        subscription_id: SubscriptionId,
    },
    SubscriptionResumed {
        subscription_id: SubscriptionId,
    },
    SubscriptionCanceled {
        subscription_id: SubscriptionId,
        immediate: bool,
    },
    SubscriptionExpired {
        subscription_id: SubscriptionId,
    },
    SubscriptionSuspended {
        subscription_id: SubscriptionId,
    },
    SubscriptionReinstated {
        subscription_id: SubscriptionId,
    },
    SubscriptionRenewed {
        subscription_id: SubscriptionId,
        period_end: OffsetDateTime,
    },
    SeatCountChanged {
        subscription_id: SubscriptionId,
        seat_count: u32,
    },
    UsageRecorded {
        subscription_id: SubscriptionId,
        units: u64,
        total_units: u64,
    },
    PaymentSucceeded {
        subscription_id: SubscriptionId,
        transaction_id: String,
        amount_cents: i64,
    },
    PaymentFailed {
        subscription_id: SubscriptionId,
        failed_payment_count: u32,
    },
    PaymentRefunded {
        subscription_id: SubscriptionId,
        transaction_id: String,
        refund_id: String,
        amount_cents: Option<i64>,
    },
    InvoiceCreated {
        invoice_id: InvoiceId,
        subscription_id: SubscriptionId,
        total_cents: i64,
        due_at: OffsetDateTime,
    },
    InvoicePaid {
        invoice_id: InvoiceId,
        amount_paid_cents: i64,
    },
    InvoicePartiallyPaid {
        invoice_id: InvoiceId,
        amount_due_cents: i64,
    },
    InvoiceOverdue {
        invoice_id: InvoiceId,
    },
    InvoiceVoided {
        invoice_id: InvoiceId,
    },
    EntitlementGranted {
        user_id: UserId,
        key: String,
        subscription_id: SubscriptionId,
    },
    EntitlementRevoked {
        user_id: UserId,
        key: String,
        subscription_id: SubscriptionId,
    },
    EntitlementBlocked {
        user_id: UserId,
        key: String,
        credential: CredentialType,
        status: CredentialStatus,
    },
    DunningEscalated {
        subscription_id: SubscriptionId,
        status: DunningStatus,
        failed_payment_count: u32,
    },
    DunningRecovered {
        subscription_id: SubscriptionId,
    },
    CredentialStatusProcessed {
        user_id: UserId,
        credential: CredentialType,
        status: CredentialStatus,
    },
}

impl DomainEvent {
    /// Bus topic, `<entity>.<action>`
    pub fn topic(&self) -> &'static str {
        match self {
            Self::SubscriptionCreated { .. } => "subscription.created",
            Self::TrialStarted { .. } => "subscription.trial_started",
            Self::TrialConverted { .. } => "subscription.trial_converted",
            Self::PlanChanged { .. } => "subscription.plan_changed",
            Self::SubscriptionPaused { .. } => "subscription.paused",
            Self::SubscriptionResumed { .. } => "subscription.resumed",
            Self::SubscriptionCanceled { .. } => "subscription.canceled",
            Self::SubscriptionExpired { .. } => "subscription.expired",
            Self::SubscriptionSuspended { .. } => "subscription.suspended",
            Self::SubscriptionReinstated { .. } => "subscription.reinstated",
            Self::SubscriptionRenewed { .. } => "subscription.renewed",
            Self::SeatCountChanged { .. } => "subscription.seats_changed",
            Self::UsageRecorded { .. } => "subscription.usage_recorded",
            Self::PaymentSucceeded { .. } => "payment.succeeded",
            Self::PaymentFailed { .. } => "payment.failed",
            Self::PaymentRefunded { .. } => "payment.refunded",
            Self::InvoiceCreated { .. } => "invoice.created",
            Self::InvoicePaid { .. } => "invoice.paid",
            Self::InvoicePartiallyPaid { .. } => "invoice.partially_paid",
            Self::InvoiceOverdue { .. } => "invoice.overdue",
            Self::InvoiceVoided { .. } => "invoice.voided",
            Self::EntitlementGranted { .. } => "entitlement.granted",
            Self::EntitlementRevoked { .. } => "entitlement.revoked",
            Self::EntitlementBlocked { .. } => "entitlement.blocked",
            Self::DunningEscalated { .. } => "dunning.escalated",
            Self::DunningRecovered { .. } => "dunning.recovered",
            Self::CredentialStatusProcessed { .. } => "credential.status_processed",
        }
    }
}

/// Envelope published to the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub tenant_id: TenantId,
    pub occurred_at: OffsetDateTime,
    #[serde(flatten)]
    pub event: DomainEvent,
}

/// Fire-and-forget event bus boundary
///
/// Publish failures are the bus's problem; the engine logs and moves on.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope);
}
