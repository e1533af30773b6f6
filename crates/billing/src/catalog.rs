//! Plan catalog types
//!
//! Plans are immutable per version: subscriptions reference a `PlanId` and
//! never observe in-place edits. Publishing a change mints a new version
//! with a fresh id that records what it supersedes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use vendhub_shared::types::{CredentialType, Metadata, PlanId, TenantId, VendorId};

use crate::period::BillingInterval;
use crate::pricing::PricingModel;

/// How a plan collects payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    /// Capture via the payment gateway at period start
    Charge,
    /// Issue an invoice; access follows settlement
    Invoice,
}

/// Capability category an entitlement grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementType {
    Feature,
    Quota,
    Discount,
    ModuleAccess,
    ApiAccess,
}

/// A capability the plan can grant to subscribed users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementDefinition {
    /// Capability key other modules gate on, e.g. "listings.publish"
    pub key: String,
    pub entitlement_type: EntitlementType,
    /// Optional value carried with the grant (quota size, discount percent)
    pub value: Option<String>,
    /// External credential the holder must possess
    pub required_credential: Option<CredentialType>,
    /// If set, the credential must be currently valid, not merely on file
    pub must_be_valid: bool,
    /// Whether trials receive this entitlement
    pub trial_eligible: bool,
}

impl EntitlementDefinition {
    pub fn ungated(key: impl Into<String>, entitlement_type: EntitlementType) -> Self {
        Self {
            key: key.into(),
            entitlement_type,
            value: None,
            required_credential: None,
            must_be_valid: false,
            trial_eligible: true,
        }
    }

    pub fn credential_gated(
        key: impl Into<String>,
        entitlement_type: EntitlementType,
        credential: CredentialType,
    ) -> Self {
        Self {
            key: key.into(),
            entitlement_type,
            value: None,
            required_credential: Some(credential),
            must_be_valid: true,
            trial_eligible: false,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// Why a user started a trial; selects the trial configuration
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialIntent {
    Evaluation,
    Migration,
    SalesLed,
    WinBack,
    Other(String),
}

/// Trial window configuration for one intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    pub duration_days: u32,
    /// Seat ceiling during the trial, if tighter than the plan's
    pub max_seats: Option<u32>,
}

/// Recurrence configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub interval: BillingInterval,
    pub interval_count: u32,
}

impl IntervalConfig {
    pub fn monthly() -> Self {
        Self {
            interval: BillingInterval::Month,
            interval_count: 1,
        }
    }
}

/// Immutable-per-version catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub tenant_id: TenantId,
    pub vendor_id: VendorId,
    pub name: String,
    pub version: u32,
    /// Plan version this one replaced, if any
    pub supersedes: Option<PlanId>,
    pub pricing: PricingModel,
    pub interval: IntervalConfig,
    pub billing_type: BillingType,
    pub currency: String,
    /// Platform share of every settled payment, percent
    pub fee_percent: f64,
    pub entitlements: Vec<EntitlementDefinition>,
    /// Trial configurations keyed by intent
    pub trials: Vec<(TrialIntent, TrialConfig)>,
    /// Fallback when no intent-specific trial exists
    pub default_trial: Option<TrialConfig>,
    pub metadata: Metadata,
    pub created_at: OffsetDateTime,
}

impl Plan {
    /// Trial configuration for an intent, falling back to the default
    pub fn trial_for(&self, intent: &TrialIntent) -> Option<&TrialConfig> {
        self.trials
            .iter()
            .find(|(i, _)| i == intent)
            .map(|(_, c)| c)
            .or(self.default_trial.as_ref())
    }

    /// Entitlement definitions a trial subscription receives
    pub fn trial_entitlements(&self) -> impl Iterator<Item = &EntitlementDefinition> {
        self.entitlements.iter().filter(|d| d.trial_eligible)
    }

    /// Definitions present here but absent (by key) from `other`
    pub fn entitlements_not_in<'a>(
        &'a self,
        other: &'a Plan,
    ) -> impl Iterator<Item = &'a EntitlementDefinition> {
        self.entitlements
            .iter()
            .filter(|d| !other.entitlements.iter().any(|o| o.key == d.key))
    }

    /// Next version of this plan with new pricing or entitlements
    pub fn new_version(&self, pricing: PricingModel) -> Self {
        let mut next = self.clone();
        next.id = PlanId::new();
        next.version = self.version + 1;
        next.supersedes = Some(self.id);
        next.pricing = pricing;
        next
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn plan() -> Plan {
        Plan {
            id: PlanId::new(),
            tenant_id: TenantId::new(),
            vendor_id: VendorId::new(),
            name: "Team".to_string(),
            version: 1,
            supersedes: None,
            pricing: PricingModel::Flat { amount_cents: 4900 },
            interval: IntervalConfig::monthly(),
            billing_type: BillingType::Charge,
            currency: "USD".to_string(),
            fee_percent: 20.0,
            entitlements: vec![
                EntitlementDefinition::ungated("reports.advanced", EntitlementType::Feature),
                EntitlementDefinition::credential_gated(
                    "payouts.receive",
                    EntitlementType::ModuleAccess,
                    CredentialType::TaxRegistration,
                ),
            ],
            trials: vec![(
                TrialIntent::Evaluation,
                TrialConfig {
                    duration_days: 14,
                    max_seats: Some(3),
                },
            )],
            default_trial: Some(TrialConfig {
                duration_days: 7,
                max_seats: None,
            }),
            metadata: Metadata::new(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_trial_for_intent_and_default() {
        let plan = plan();
        assert_eq!(
            plan.trial_for(&TrialIntent::Evaluation).unwrap().duration_days,
            14
        );
        // Unknown intent falls back to the default trial
        assert_eq!(
            plan.trial_for(&TrialIntent::WinBack).unwrap().duration_days,
            7
        );
    }

    #[test]
    fn test_trial_entitlements_exclude_gated() {
        let plan = plan();
        let keys: Vec<_> = plan.trial_entitlements().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["reports.advanced"]);
    }

    #[test]
    fn test_entitlement_diff_between_versions() {
        let old = plan();
        let mut new = old.new_version(PricingModel::Flat { amount_cents: 5900 });
        new.entitlements
            .push(EntitlementDefinition::ungated("sso", EntitlementType::Feature));
        new.entitlements.retain(|d| d.key != "reports.advanced");

        let removed: Vec<_> = old.entitlements_not_in(&new).map(|d| d.key.as_str()).collect();
        let added: Vec<_> = new.entitlements_not_in(&old).map(|d| d.key.as_str()).collect();
        assert_eq!(removed, vec!["reports.advanced"]);
        assert_eq!(added, vec!["sso"]);
    }

    #[test]
    fn test_new_version_links_predecessor() {
        let old = plan();
        let new = old.new_version(PricingModel::Flat { amount_cents: 5900 });
        assert_eq!(new.version, 2);
        assert_eq!(new.supersedes, Some(old.id));
        assert_ne!(new.id, old.id);
    }
}
