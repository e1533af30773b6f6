//! Payment-failure escalation
//!
//! Dunning is driven by a per-subscription failure counter: it only climbs
//! across consecutive failures and snaps back to zero on any success. Every
//! step is notification-worthy, but access is preserved until the terminal
//! step revokes entitlements.

use serde::{Deserialize, Serialize};

/// Escalation thresholds
///
/// With the defaults, failures map to: 1st -> past_due, 2nd -> grace_period,
/// (max-1)th -> final_notice, and the max-th failure terminates access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningConfig {
    /// Failure count at which the grace-period warning starts
    pub grace_threshold: u32,
    /// Attempts before access is revoked
    pub max_retry_attempts: u32,
}

impl Default for DunningConfig {
    fn default() -> Self {
        Self {
            grace_threshold: 2,
            max_retry_attempts: 4,
        }
    }
}

/// Where a subscription sits on the escalation ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DunningStatus {
    /// No outstanding failures
    Clear,
    /// First failure recorded
    PastDue,
    /// Repeated failures, still warning only
    GracePeriod,
    /// One failure away from revocation
    FinalNotice,
    /// Retries exhausted, access revoked
    Unpaid,
}

impl DunningStatus {
    /// Whether entitlements survive at this step
    pub fn access_preserved(&self) -> bool {
        !matches!(self, Self::Unpaid)
    }
}

impl std::fmt::Display for DunningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clear => write!(f, "clear"),
            Self::PastDue => write!(f, "past_due"),
            Self::GracePeriod => write!(f, "grace_period"),
            Self::FinalNotice => write!(f, "final_notice"),
            Self::Unpaid => write!(f, "unpaid"),
        }
    }
}

/// Map a failure count onto the ladder
pub fn status_for_failures(config: &DunningConfig, failed_payment_count: u32) -> DunningStatus {
    let max = config.max_retry_attempts.max(2);
    if failed_payment_count == 0 {
        DunningStatus::Clear
    } else if failed_payment_count >= max {
        DunningStatus::Unpaid
    } else if failed_payment_count == max - 1 {
        DunningStatus::FinalNotice
    } else if failed_payment_count >= config.grace_threshold {
        DunningStatus::GracePeriod
    } else {
        DunningStatus::PastDue
    }
}

/// Outcome of recording one more failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    pub failed_payment_count: u32,
    pub status: DunningStatus,
    /// Set on the step that crosses into `Unpaid`
    pub revoke_access: bool,
}

/// Record a failed attempt against the current counter
pub fn escalate(config: &DunningConfig, current_failures: u32) -> Escalation {
    let count = current_failures.saturating_add(1);
    let status = status_for_failures(config, count);
    let was_unpaid = status_for_failures(config, current_failures) == DunningStatus::Unpaid;
    Escalation {
        failed_payment_count: count,
        status,
        revoke_access: status == DunningStatus::Unpaid && !was_unpaid,
    }
}
