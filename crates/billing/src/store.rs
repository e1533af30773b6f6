//! Persistence boundary
//!
//! The repository layer lives elsewhere; these traits are the narrow
//! contract the engine consumes. Every operation is tenant-scoped.
//! Subscription and invoice updates are optimistic: the caller submits the
//! record at the revision it loaded, and the store rejects a stale write
//! with `ConcurrentModification`. Entitlement activation flips through
//! compare-and-set, never blind overwrite.

use async_trait::async_trait;
use time::OffsetDateTime;
use vendhub_shared::types::{InvoiceId, PlanId, SubscriptionId, TenantId, UserId};

use crate::catalog::Plan;
use crate::entitlement::GrantedEntitlement;
use crate::error::BillingResult;
use crate::invoice::Invoice;
use crate::revenue::RevenueShare;
use crate::subscription::Subscription;

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn get(&self, tenant_id: TenantId, plan_id: PlanId) -> BillingResult<Plan>;
    async fn insert(&self, plan: Plan) -> BillingResult<()>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
    ) -> BillingResult<Subscription>;

    async fn insert(&self, subscription: Subscription) -> BillingResult<()>;

    /// Optimistic update at the revision the record was loaded with
    ///
    /// Returns the stored record with its revision bumped.
    async fn update(&self, subscription: Subscription) -> BillingResult<Subscription>;

    async fn list_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> BillingResult<Vec<Subscription>>;

    async fn list_by_tenant(&self, tenant_id: TenantId) -> BillingResult<Vec<Subscription>>;
}

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn find(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        key: &str,
    ) -> BillingResult<Option<GrantedEntitlement>>;

    async fn insert(&self, grant: GrantedEntitlement) -> BillingResult<()>;

    /// Compare-and-set on the active flag
    ///
    /// Ok(true) if the flag moved from `expected` to `active`; Ok(false)
    /// if the current value did not match (including absent grants).
    async fn set_active(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        key: &str,
        expected: bool,
        active: bool,
        at: OffsetDateTime,
    ) -> BillingResult<bool>;

    async fn list_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> BillingResult<Vec<GrantedEntitlement>>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn get(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> BillingResult<Invoice>;
    async fn insert(&self, invoice: Invoice) -> BillingResult<()>;
    /// Optimistic update, same contract as subscriptions
    async fn update(&self, invoice: Invoice) -> BillingResult<Invoice>;
    async fn list_open_by_tenant(&self, tenant_id: TenantId) -> BillingResult<Vec<Invoice>>;
}

#[async_trait]
pub trait RevenueShareStore: Send + Sync {
    /// Append-only insert keyed by settlement source
    ///
    /// Ok(false) when the source was already settled; the caller treats
    /// that as an idempotent replay, not an error.
    async fn insert_if_absent(&self, share: RevenueShare) -> BillingResult<bool>;

    async fn list_by_tenant(&self, tenant_id: TenantId) -> BillingResult<Vec<RevenueShare>>;
}
