//! Entitlement grant/revoke engine
//!
//! Decides which capabilities a user may hold and applies them through
//! compare-and-set mutations, so credential-event processing can run
//! concurrently with billing operations without blind overwrites. A
//! definition blocked by its credential gate is a signal, not an error:
//! the rest of the batch still evaluates, and downstream UIs render the
//! blocked state as a nudge.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;
use vendhub_shared::types::{
    CredentialStatus, CredentialType, SubscriptionId, TenantId, UserId,
};

use crate::catalog::{EntitlementDefinition, EntitlementType};
use crate::config::RetryConfig;
use crate::error::BillingResult;
use crate::gateway::{credential_status_with_retry, CredentialVerifier};
use crate::store::EntitlementStore;

/// The runtime fact that a user currently holds a capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantedEntitlement {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub key: String,
    pub entitlement_type: EntitlementType,
    pub value: Option<String>,
    /// Which subscription granted the capability
    pub source_subscription: SubscriptionId,
    pub is_active: bool,
    pub granted_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

/// Per-definition result of a grant batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted { key: String },
    /// Idempotent no-op
    AlreadyActive { key: String },
    /// Credential gate not satisfied; not an error
    Blocked {
        key: String,
        credential: CredentialType,
        status: CredentialStatus,
    },
}

impl GrantOutcome {
    pub fn key(&self) -> &str {
        match self {
            Self::Granted { key } | Self::AlreadyActive { key } | Self::Blocked { key, .. } => key,
        }
    }
}

/// Answer for `check_entitlement`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementCheck {
    pub has_entitlement: bool,
    pub value: Option<String>,
}

/// Grant/revoke engine over the entitlement store and credential pipeline
pub struct EntitlementEngine {
    store: Arc<dyn EntitlementStore>,
    verifier: Arc<dyn CredentialVerifier>,
    retry: RetryConfig,
}

impl EntitlementEngine {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        verifier: Arc<dyn CredentialVerifier>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            verifier,
            retry,
        }
    }

    /// Evaluate and apply a batch of definitions for one user
    ///
    /// Definitions are independent: a blocked gate never aborts the batch.
    pub async fn grant_batch(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        subscription_id: SubscriptionId,
        definitions: &[EntitlementDefinition],
        now: OffsetDateTime,
    ) -> BillingResult<Vec<GrantOutcome>> {
        let mut outcomes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if let Some(credential) = definition.required_credential {
                let report = credential_status_with_retry(
                    self.verifier.as_ref(),
                    &self.retry,
                    tenant_id,
                    user_id,
                    credential,
                )
                .await?;
                let satisfied = if definition.must_be_valid {
                    report.status.is_valid()
                } else {
                    report.status != CredentialStatus::NotFound
                };
                if !satisfied {
                    debug!(
                        user_id = %user_id,
                        key = %definition.key,
                        credential = %credential,
                        status = %report.status,
                        "entitlement blocked by credential gate"
                    );
                    outcomes.push(GrantOutcome::Blocked {
                        key: definition.key.clone(),
                        credential,
                        status: report.status,
                    });
                    continue;
                }
            }
            outcomes.push(
                self.activate(tenant_id, user_id, subscription_id, definition, now)
                    .await?,
            );
        }
        Ok(outcomes)
    }

    /// Revoke a set of keys; inactive or absent grants are no-ops
    ///
    /// Returns the keys actually deactivated.
    pub async fn revoke_batch(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        keys: &[String],
        now: OffsetDateTime,
    ) -> BillingResult<Vec<String>> {
        let mut revoked = Vec::new();
        for key in keys {
            if self
                .store
                .set_active(tenant_id, user_id, key, true, false, now)
                .await?
            {
                revoked.push(key.clone());
            }
        }
        if !revoked.is_empty() {
            info!(user_id = %user_id, count = revoked.len(), "entitlements revoked");
        }
        Ok(revoked)
    }

    /// React to a credential-status event
    ///
    /// Only the definitions referencing the changed credential type are
    /// re-evaluated, across the supplied (subscription, definitions)
    /// pairs. Grants and revocations are compare-and-set, so replayed
    /// events settle to the same state.
    pub async fn apply_credential_change(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        credential: CredentialType,
        status: CredentialStatus,
        affected: &[(SubscriptionId, Vec<EntitlementDefinition>)],
        now: OffsetDateTime,
    ) -> BillingResult<Vec<GrantOutcome>> {
        let mut outcomes = Vec::new();
        for (subscription_id, definitions) in affected {
            for definition in definitions
                .iter()
                .filter(|d| d.required_credential == Some(credential))
            {
                let satisfied = if definition.must_be_valid {
                    status.is_valid()
                } else {
                    status != CredentialStatus::NotFound
                };
                if satisfied {
                    outcomes.push(
                        self.activate(tenant_id, user_id, *subscription_id, definition, now)
                            .await?,
                    );
                } else {
                    self.store
                        .set_active(tenant_id, user_id, &definition.key, true, false, now)
                        .await?;
                    outcomes.push(GrantOutcome::Blocked {
                        key: definition.key.clone(),
                        credential,
                        status,
                    });
                }
            }
        }
        Ok(outcomes)
    }

    /// What other modules call to gate behavior
    pub async fn check(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        key: &str,
    ) -> BillingResult<EntitlementCheck> {
        let grant = self.store.find(tenant_id, user_id, key).await?;
        Ok(match grant {
            Some(g) if g.is_active => EntitlementCheck {
                has_entitlement: true,
                value: g.value,
            },
            _ => EntitlementCheck {
                has_entitlement: false,
                value: None,
            },
        })
    }

    async fn activate(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        subscription_id: SubscriptionId,
        definition: &EntitlementDefinition,
        now: OffsetDateTime,
    ) -> BillingResult<GrantOutcome> {
        match self.store.find(tenant_id, user_id, &definition.key).await? {
            Some(existing) if existing.is_active => Ok(GrantOutcome::AlreadyActive {
                key: definition.key.clone(),
            }),
            Some(_) => {
                // Reactivate only if still inactive; a concurrent grant
                // winning the race is the same outcome
                let swapped = self
                    .store
                    .set_active(tenant_id, user_id, &definition.key, false, true, now)
                    .await?;
                if swapped {
                    Ok(GrantOutcome::Granted {
                        key: definition.key.clone(),
                    })
                } else {
                    Ok(GrantOutcome::AlreadyActive {
                        key: definition.key.clone(),
                    })
                }
            }
            None => {
                self.store
                    .insert(GrantedEntitlement {
                        id: Uuid::new_v4(),
                        tenant_id,
                        user_id,
                        key: definition.key.clone(),
                        entitlement_type: definition.entitlement_type,
                        value: definition.value.clone(),
                        source_subscription: subscription_id,
                        is_active: true,
                        granted_at: now,
                        revoked_at: None,
                    })
                    .await?;
                Ok(GrantOutcome::Granted {
                    key: definition.key.clone(),
                })
            }
        }
    }
}
