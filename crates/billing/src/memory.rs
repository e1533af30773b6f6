//! In-memory boundary implementations
//!
//! Swap-in implementations of the store, bus, gateway, and credential
//! boundaries backed by process memory. They power the test suite and
//! give embedders a zero-infrastructure starting point. Locking uses
//! short-lived `std::sync::Mutex` sections; nothing awaits while holding
//! one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use vendhub_shared::types::{
    CredentialReport, CredentialStatus, CredentialType, InvoiceId, PlanId, SubscriptionId,
    TenantId, UserId,
};

use crate::catalog::Plan;
use crate::entitlement::GrantedEntitlement;
use crate::error::{BillingError, BillingResult};
use crate::events::{EventEnvelope, EventPublisher};
use crate::gateway::{ChargeOutcome, CredentialVerifier, GatewayError, PaymentGateway, RefundReceipt};
use crate::invoice::Invoice;
use crate::revenue::RevenueShare;
use crate::store::{
    EntitlementStore, InvoiceStore, PlanStore, RevenueShareStore, SubscriptionStore,
};
use crate::subscription::Subscription;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// All five store traits over `HashMap`s
#[derive(Default)]
pub struct MemoryStore {
    plans: Mutex<HashMap<(TenantId, PlanId), Plan>>,
    subscriptions: Mutex<HashMap<(TenantId, SubscriptionId), Subscription>>,
    entitlements: Mutex<HashMap<(TenantId, UserId, String), GrantedEntitlement>>,
    invoices: Mutex<HashMap<(TenantId, InvoiceId), Invoice>>,
    revenue: Mutex<Vec<RevenueShare>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn get(&self, tenant_id: TenantId, plan_id: PlanId) -> BillingResult<Plan> {
        lock(&self.plans)
            .get(&(tenant_id, plan_id))
            .cloned()
            .ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))
    }

    async fn insert(&self, plan: Plan) -> BillingResult<()> {
        lock(&self.plans).insert((plan.tenant_id, plan.id), plan);
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn get(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
    ) -> BillingResult<Subscription> {
        lock(&self.subscriptions)
            .get(&(tenant_id, subscription_id))
            .cloned()
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))
    }

    async fn insert(&self, subscription: Subscription) -> BillingResult<()> {
        lock(&self.subscriptions)
            .insert((subscription.tenant_id, subscription.id), subscription);
        Ok(())
    }

    async fn update(&self, mut subscription: Subscription) -> BillingResult<Subscription> {
        let mut subscriptions = lock(&self.subscriptions);
        let key = (subscription.tenant_id, subscription.id);
        let stored = subscriptions
            .get(&key)
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription.id.to_string()))?;
        if stored.revision != subscription.revision {
            return Err(BillingError::ConcurrentModification(format!(
                "subscription {} at revision {}, submitted {}",
                subscription.id, stored.revision, subscription.revision
            )));
        }
        subscription.revision += 1;
        subscriptions.insert(key, subscription.clone());
        Ok(subscription)
    }

    async fn list_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> BillingResult<Vec<Subscription>> {
        Ok(lock(&self.subscriptions)
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.customer_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_by_tenant(&self, tenant_id: TenantId) -> BillingResult<Vec<Subscription>> {
        Ok(lock(&self.subscriptions)
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn find(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        key: &str,
    ) -> BillingResult<Option<GrantedEntitlement>> {
        Ok(lock(&self.entitlements)
            .get(&(tenant_id, user_id, key.to_string()))
            .cloned())
    }

    async fn insert(&self, grant: GrantedEntitlement) -> BillingResult<()> {
        lock(&self.entitlements).insert(
            (grant.tenant_id, grant.user_id, grant.key.clone()),
            grant,
        );
        Ok(())
    }

    async fn set_active(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        key: &str,
        expected: bool,
        active: bool,
        at: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut entitlements = lock(&self.entitlements);
        match entitlements.get_mut(&(tenant_id, user_id, key.to_string())) {
            Some(grant) if grant.is_active == expected => {
                grant.is_active = active;
                if active {
                    grant.granted_at = at;
                    grant.revoked_at = None;
                } else {
                    grant.revoked_at = Some(at);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> BillingResult<Vec<GrantedEntitlement>> {
        Ok(lock(&self.entitlements)
            .values()
            .filter(|g| g.tenant_id == tenant_id && g.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn get(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> BillingResult<Invoice> {
        lock(&self.invoices)
            .get(&(tenant_id, invoice_id))
            .cloned()
            .ok_or_else(|| BillingError::InvoiceNotFound(invoice_id.to_string()))
    }

    async fn insert(&self, invoice: Invoice) -> BillingResult<()> {
        lock(&self.invoices).insert((invoice.tenant_id, invoice.id), invoice);
        Ok(())
    }

    async fn update(&self, mut invoice: Invoice) -> BillingResult<Invoice> {
        let mut invoices = lock(&self.invoices);
        let key = (invoice.tenant_id, invoice.id);
        let stored = invoices
            .get(&key)
            .ok_or_else(|| BillingError::InvoiceNotFound(invoice.id.to_string()))?;
        if stored.revision != invoice.revision {
            return Err(BillingError::ConcurrentModification(format!(
                "invoice {} at revision {}, submitted {}",
                invoice.id, stored.revision, invoice.revision
            )));
        }
        invoice.revision += 1;
        invoices.insert(key, invoice.clone());
        Ok(invoice)
    }

    async fn list_open_by_tenant(&self, tenant_id: TenantId) -> BillingResult<Vec<Invoice>> {
        Ok(lock(&self.invoices)
            .values()
            .filter(|i| i.tenant_id == tenant_id && !i.status.is_terminal())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RevenueShareStore for MemoryStore {
    async fn insert_if_absent(&self, share: RevenueShare) -> BillingResult<bool> {
        let mut revenue = lock(&self.revenue);
        if revenue
            .iter()
            .any(|r| r.tenant_id == share.tenant_id && r.source == share.source)
        {
            return Ok(false);
        }
        revenue.push(share);
        Ok(true)
    }

    async fn list_by_tenant(&self, tenant_id: TenantId) -> BillingResult<Vec<RevenueShare>> {
        Ok(lock(&self.revenue)
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

/// Captures published envelopes for assertions
#[derive(Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<EventEnvelope>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        lock(&self.events).clone()
    }

    pub fn topics(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(|e| e.event.topic()).collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, envelope: EventEnvelope) {
        lock(&self.events).push(envelope);
    }
}

/// Scriptable gateway fake
///
/// Approves by default with sequential transaction ids. Queue declines or
/// outages ahead of the calls that should hit them.
#[derive(Default)]
pub struct StaticGateway {
    counter: AtomicU64,
    decline_next: AtomicU32,
    outage_next: AtomicU32,
    charges: Mutex<Vec<(SubscriptionId, i64)>>,
}

impl StaticGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decline the next `n` charge attempts
    pub fn decline_next(&self, n: u32) {
        self.decline_next.store(n, Ordering::SeqCst);
    }

    /// Report the gateway unavailable for the next `n` attempts
    pub fn outage_next(&self, n: u32) {
        self.outage_next.store(n, Ordering::SeqCst);
    }

    /// Charges attempted so far (subscription, amount)
    pub fn charges(&self) -> Vec<(SubscriptionId, i64)> {
        lock(&self.charges).clone()
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PaymentGateway for StaticGateway {
    async fn charge(
        &self,
        subscription_id: SubscriptionId,
        amount_cents: i64,
        _currency: &str,
    ) -> Result<ChargeOutcome, GatewayError> {
        if Self::take(&self.outage_next) {
            return Err(GatewayError::Unavailable("scripted outage".to_string()));
        }
        lock(&self.charges).push((subscription_id, amount_cents));
        if Self::take(&self.decline_next) {
            return Ok(ChargeOutcome::Declined {
                reason: "card_declined".to_string(),
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(ChargeOutcome::Approved {
            transaction_id: format!("txn_{n}"),
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        _amount_cents: Option<i64>,
    ) -> Result<RefundReceipt, GatewayError> {
        Ok(RefundReceipt {
            refund_id: format!("re_{transaction_id}"),
        })
    }
}

/// Credential pipeline fake backed by a status map
#[derive(Default)]
pub struct StaticVerifier {
    statuses: Mutex<HashMap<(UserId, CredentialType), CredentialStatus>>,
}

impl StaticVerifier {
    /// Every lookup reports `NotFound`
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_status(user_id: UserId, credential: CredentialType, status: CredentialStatus) -> Self {
        let verifier = Self::default();
        verifier.set(user_id, credential, status);
        verifier
    }

    pub fn set(&self, user_id: UserId, credential: CredentialType, status: CredentialStatus) {
        lock(&self.statuses).insert((user_id, credential), status);
    }
}

#[async_trait]
impl CredentialVerifier for StaticVerifier {
    async fn status(
        &self,
        _tenant_id: TenantId,
        user_id: UserId,
        credential: CredentialType,
    ) -> Result<CredentialReport, GatewayError> {
        let status = lock(&self.statuses)
            .get(&(user_id, credential))
            .copied()
            .unwrap_or(CredentialStatus::NotFound);
        Ok(CredentialReport {
            status,
            verified_at: None,
            expires_at: None,
        })
    }
}
