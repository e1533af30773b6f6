//! Subscription aggregate
//!
//! The mutable root every engine operation revolves around. Exactly one
//! lifecycle status holds at a time and `current_period_end` is always
//! strictly after `current_period_start`. Mutations go through the store's
//! optimistic revision check; the aggregate itself never talks to I/O.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;
use vendhub_shared::types::{Metadata, PlanId, SubscriptionId, TenantId, UserId, VendorId};

use crate::catalog::TrialIntent;
use crate::dunning::DunningStatus;
use crate::error::{BillingError, BillingResult};

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Paused,
    Canceled,
    Unpaid,
    Expired,
    Suspended,
}

impl SubscriptionStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired)
    }

    /// Whether entitlements may be held in this status
    ///
    /// `unpaid` is non-terminal but access-revoked; a successful retry
    /// re-activates it.
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Trialing | Self::Active | Self::PastDue)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trialing => write!(f, "trialing"),
            Self::Active => write!(f, "active"),
            Self::PastDue => write!(f, "past_due"),
            Self::Paused => write!(f, "paused"),
            Self::Canceled => write!(f, "canceled"),
            Self::Unpaid => write!(f, "unpaid"),
            Self::Expired => write!(f, "expired"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "paused" => Ok(Self::Paused),
            "canceled" => Ok(Self::Canceled),
            "unpaid" => Ok(Self::Unpaid),
            "expired" => Ok(Self::Expired),
            "suspended" => Ok(Self::Suspended),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// Per-user license held by a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub id: Uuid,
    pub user_id: UserId,
    pub assigned_at: OffsetDateTime,
    pub released_at: Option<OffsetDateTime>,
}

/// Role of a member within the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

/// Member status for seat-limit enforcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Suspended,
    Pending,
}

/// Family/team participant attached to a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub joined_at: OffsetDateTime,
}

/// Trial window captured at trial start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialWindow {
    pub intent: TrialIntent,
    pub started_at: OffsetDateTime,
    pub ends_at: OffsetDateTime,
    pub converted_at: Option<OffsetDateTime>,
}

/// The subscription aggregate root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    /// Customer who owns the subscription and receives its entitlements
    pub customer_id: UserId,
    pub vendor_id: VendorId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub trial: Option<TrialWindow>,
    pub seat_count: u32,
    pub usage_units: u64,
    /// Subscription-level discount, percent, applied after model pricing
    pub discount_percent: Option<f64>,
    pub dunning_status: DunningStatus,
    pub failed_payment_count: u32,
    /// Gateway transaction ids already settled against this subscription;
    /// the idempotency record for payment-success processing
    pub applied_transactions: Vec<String>,
    pub seats: Vec<Seat>,
    pub members: Vec<Member>,
    /// Credit carried from a downgrade, consumed at the next billing
    pub pending_credit_cents: i64,
    /// Status to restore when a compliance suspension lifts
    pub suspended_from: Option<SubscriptionStatus>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub terminated_at: Option<OffsetDateTime>,
    pub metadata: Metadata,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    /// Optimistic concurrency revision, bumped by the store on update
    pub revision: u64,
}

impl Subscription {
    /// Guard an operation that is only legal from some statuses
    pub fn require_status(&self, allowed: &[SubscriptionStatus]) -> BillingResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(BillingError::InvalidState(format!(
                "subscription {} is {}, expected one of [{}]",
                self.id,
                self.status,
                allowed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }

    /// Whether a renewal is due at `now`
    pub fn renewal_due(&self, now: OffsetDateTime) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        ) && !self.cancel_at_period_end
            && self.current_period_end <= now
    }

    /// Whether the scheduled-cancellation expiry sweep should pick this up
    pub fn expiry_due(&self, now: OffsetDateTime) -> bool {
        (self.status == SubscriptionStatus::Canceled
            || (self.cancel_at_period_end && self.status.grants_access()))
            && self.current_period_end <= now
    }

    /// Record a settled transaction id; false if it was already applied
    pub fn record_transaction(&mut self, transaction_id: &str) -> bool {
        if self.applied_transactions.iter().any(|t| t == transaction_id) {
            return false;
        }
        self.applied_transactions.push(transaction_id.to_string());
        true
    }

    pub fn set_period(&mut self, start: OffsetDateTime, end: OffsetDateTime) -> BillingResult<()> {
        if end <= start {
            return Err(BillingError::Validation(format!(
                "period end {end} not after start {start}"
            )));
        }
        self.current_period_start = start;
        self.current_period_end = end;
        Ok(())
    }

    /// Seats currently held (assigned and not released)
    pub fn occupied_seats(&self) -> usize {
        self.seats.iter().filter(|s| s.released_at.is_none()).count()
    }

    /// Assign a license seat to a user
    ///
    /// The seat count caps occupancy; a user holds at most one live seat.
    pub fn assign_seat(&mut self, user_id: UserId, at: OffsetDateTime) -> BillingResult<()> {
        if self
            .seats
            .iter()
            .any(|s| s.user_id == user_id && s.released_at.is_none())
        {
            return Err(BillingError::Validation(format!(
                "user {user_id} already holds a seat"
            )));
        }
        if self.occupied_seats() >= self.seat_count as usize {
            return Err(BillingError::InvalidState(format!(
                "all {} seats are occupied",
                self.seat_count
            )));
        }
        self.seats.push(Seat {
            id: Uuid::new_v4(),
            user_id,
            assigned_at: at,
            released_at: None,
        });
        Ok(())
    }

    /// Release a user's seat; absent or released seats are a no-op
    pub fn release_seat(&mut self, user_id: UserId, at: OffsetDateTime) -> bool {
        match self
            .seats
            .iter_mut()
            .find(|s| s.user_id == user_id && s.released_at.is_none())
        {
            Some(seat) => {
                seat.released_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Add a participant; duplicate members are rejected
    pub fn add_member(
        &mut self,
        user_id: UserId,
        role: MemberRole,
        at: OffsetDateTime,
    ) -> BillingResult<()> {
        if self.members.iter().any(|m| m.user_id == user_id) {
            return Err(BillingError::Validation(format!(
                "user {user_id} is already a member"
            )));
        }
        self.members.push(Member {
            user_id,
            role,
            status: MemberStatus::Active,
            joined_at: at,
        });
        Ok(())
    }
}
