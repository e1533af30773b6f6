//! Common types used across Vendhub

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

macro_rules! id_wrapper {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_wrapper!(
    /// Tenant ID wrapper (every record is scoped by tenant)
    TenantId
);
id_wrapper!(
    /// User ID wrapper
    UserId
);
id_wrapper!(
    /// Vendor ID wrapper (the party that owns a plan)
    VendorId
);
id_wrapper!(
    /// Subscription ID wrapper
    SubscriptionId
);
id_wrapper!(
    /// Plan ID wrapper (per-version; new versions get new IDs)
    PlanId
);
id_wrapper!(
    /// Invoice ID wrapper
    InvoiceId
);

// =============================================================================
// Credentials
// =============================================================================

/// Externally-verified credential categories that can gate entitlements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    IdentityVerification,
    ProfessionalLicense,
    BackgroundCheck,
    TaxRegistration,
}

impl std::fmt::Display for CredentialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdentityVerification => write!(f, "identity_verification"),
            Self::ProfessionalLicense => write!(f, "professional_license"),
            Self::BackgroundCheck => write!(f, "background_check"),
            Self::TaxRegistration => write!(f, "tax_registration"),
        }
    }
}

/// Verification status as reported by the credential pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Valid,
    Expired,
    Revoked,
    Pending,
    NotFound,
}

impl CredentialStatus {
    /// Whether this status satisfies a `must_be_valid` gate
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl std::fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Expired => write!(f, "expired"),
            Self::Revoked => write!(f, "revoked"),
            Self::Pending => write!(f, "pending"),
            Self::NotFound => write!(f, "not_found"),
        }
    }
}

/// Point-in-time credential lookup result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialReport {
    pub status: CredentialStatus,
    pub verified_at: Option<OffsetDateTime>,
    pub expires_at: Option<OffsetDateTime>,
}

impl CredentialReport {
    pub fn not_found() -> Self {
        Self {
            status: CredentialStatus::NotFound,
            verified_at: None,
            expires_at: None,
        }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Recognized metadata keys
///
/// Plans and subscriptions carry a small key-value bag for feature-specific
/// annotations. The key set is closed: adding a feature that needs metadata
/// means adding a variant here, so stored bags never drift silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKey {
    /// Marketing campaign that acquired the customer
    AcquisitionCampaign,
    /// Sales-owned account identifier
    CrmAccountId,
    /// Human-entered note shown in the admin console
    InternalNote,
    /// Identifier of the plan version this one superseded
    MigratedFromPlan,
    /// Free-form cancellation reason captured at cancel time
    CancellationReason,
}

/// Typed key-value bag with a closed key set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<MetadataKey, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: MetadataKey, value: impl Into<String>) {
        self.0.insert(key, value.into());
    }

    pub fn get(&self, key: MetadataKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_id_wrappers_unique() {
        assert_ne!(TenantId::new(), TenantId::new());
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
    }

    #[test]
    fn test_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let id: PlanId = uuid.into();
        assert_eq!(id.0, uuid);
    }

    #[test]
    fn test_credential_status_is_valid() {
        assert!(CredentialStatus::Valid.is_valid());
        assert!(!CredentialStatus::Expired.is_valid());
        assert!(!CredentialStatus::Revoked.is_valid());
        assert!(!CredentialStatus::Pending.is_valid());
        assert!(!CredentialStatus::NotFound.is_valid());
    }

    #[test]
    fn test_credential_type_display() {
        assert_eq!(
            CredentialType::IdentityVerification.to_string(),
            "identity_verification"
        );
        assert_eq!(
            CredentialType::ProfessionalLicense.to_string(),
            "professional_license"
        );
    }

    #[test]
    fn test_metadata_round_trip() {
        let mut meta = Metadata::new();
        assert!(meta.is_empty());

        meta.set(MetadataKey::CrmAccountId, "acct-42");
        meta.set(MetadataKey::InternalNote, "migrated 2026-01");

        assert_eq!(meta.get(MetadataKey::CrmAccountId), Some("acct-42"));
        assert_eq!(meta.get(MetadataKey::AcquisitionCampaign), None);
        assert!(!meta.is_empty());
    }

    #[test]
    fn test_metadata_serializes_transparent() {
        let mut meta = Metadata::new();
        meta.set(MetadataKey::CancellationReason, "too expensive");
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"cancellation_reason":"too expensive"}"#);
    }
}
