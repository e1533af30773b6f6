//! Billing engine façade
//!
//! The orchestrator every trigger lands on: subscription operations,
//! payment-gateway callbacks, credential events, and the renewal/expiry
//! sweeps. Mutations on one subscription serialize through the lock
//! registry; different subscriptions proceed in parallel. A lifecycle
//! step is computed pure, persisted optimistically, and its command list
//! executed in order. Gateway charges are the exception: they settle outside
//! the lock (retries included) with the lock re-acquired only to commit
//! the outcome. Payment settlement is idempotent per transaction id.

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};
use vendhub_shared::types::{
    CredentialStatus, CredentialType, InvoiceId, PlanId, SubscriptionId, TenantId, UserId,
    VendorId,
};

use crate::analytics::{self, AnalyticsSnapshot};
use crate::catalog::{Plan, TrialIntent};
use crate::config::EngineConfig;
use crate::entitlement::{EntitlementCheck, EntitlementEngine, GrantOutcome};
use crate::error::{BillingError, BillingResult};
use crate::events::{DomainEvent, EventEnvelope, EventPublisher};
use crate::gateway::{
    charge_with_retry, ChargeOutcome, CredentialVerifier, PaymentGateway,
};
use crate::invoice::Invoice;
use crate::lifecycle::{self, ChangeOptions, Command, NewSubscription, Transition};
use crate::locks::LockRegistry;
use crate::revenue::{RevenueShare, SettlementSource};
use crate::store::{
    EntitlementStore, InvoiceStore, PlanStore, RevenueShareStore, SubscriptionStore,
};
use crate::subscription::Subscription;

/// The engine other modules construct once and call into
pub struct BillingEngine {
    config: EngineConfig,
    plans: Arc<dyn PlanStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    invoices: Arc<dyn InvoiceStore>,
    revenue: Arc<dyn RevenueShareStore>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Arc<dyn EventPublisher>,
    entitlements: EntitlementEngine,
    locks: LockRegistry,
}

impl BillingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        plans: Arc<dyn PlanStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        entitlement_store: Arc<dyn EntitlementStore>,
        invoices: Arc<dyn InvoiceStore>,
        revenue: Arc<dyn RevenueShareStore>,
        gateway: Arc<dyn PaymentGateway>,
        verifier: Arc<dyn CredentialVerifier>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let entitlements =
            EntitlementEngine::new(entitlement_store, verifier, config.gateway_retry);
        Self {
            config,
            plans,
            subscriptions,
            invoices,
            revenue,
            gateway,
            publisher,
            entitlements,
            locks: LockRegistry::new(),
        }
    }

    // =========================================================================
    // Subscription operations
    // =========================================================================

    /// Create an active subscription on a plan and bill the first period
    pub async fn subscribe(
        &self,
        input: NewSubscription,
        plan_id: PlanId,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        let tenant_id = input.tenant_id;
        let plan = self.plans.get(tenant_id, plan_id).await?;
        let transition = lifecycle::subscribe(input, &plan, now);

        self.subscriptions
            .insert(transition.subscription.clone())
            .await?;
        let subscription_id = transition.subscription.id;
        info!(subscription_id = %subscription_id, plan_id = %plan_id, "subscription created");

        let charge = self
            .apply_commands(&transition.subscription, transition.commands, now)
            .await?;
        match charge {
            Some(amount_cents) => {
                self.settle_charge(tenant_id, subscription_id, amount_cents, now)
                    .await
            }
            None => self.subscriptions.get(tenant_id, subscription_id).await,
        }
    }

    /// Start a trial for the given intent
    pub async fn start_trial(
        &self,
        input: NewSubscription,
        plan_id: PlanId,
        intent: TrialIntent,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        let tenant_id = input.tenant_id;
        let plan = self.plans.get(tenant_id, plan_id).await?;
        let transition = lifecycle::start_trial(input, &plan, intent, now)?;

        self.subscriptions
            .insert(transition.subscription.clone())
            .await?;
        info!(subscription_id = %transition.subscription.id, "trial started");

        let subscription_id = transition.subscription.id;
        self.apply_commands(&transition.subscription, transition.commands, now)
            .await?;
        self.subscriptions.get(tenant_id, subscription_id).await
    }

    /// Convert a trial into a paying subscription
    pub async fn convert_trial(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        let charge = {
            let _guard = self.locks.acquire(subscription_id).await;
            let subscription = self.subscriptions.get(tenant_id, subscription_id).await?;
            let plan = self.plans.get(tenant_id, subscription.plan_id).await?;
            let transition = lifecycle::convert_trial(&subscription, &plan, now)?;
            self.commit(transition, now).await?
        };
        match charge {
            Some(amount_cents) => {
                self.settle_charge(tenant_id, subscription_id, amount_cents, now)
                    .await
            }
            None => self.subscriptions.get(tenant_id, subscription_id).await,
        }
    }

    /// Move a subscription to another plan version
    pub async fn change_plan(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        new_plan_id: PlanId,
        options: ChangeOptions,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        let charge = {
            let _guard = self.locks.acquire(subscription_id).await;
            let subscription = self.subscriptions.get(tenant_id, subscription_id).await?;
            let old_plan = self.plans.get(tenant_id, subscription.plan_id).await?;
            let new_plan = self.plans.get(tenant_id, new_plan_id).await?;
            let transition = lifecycle::change_plan(
                &subscription,
                &old_plan,
                &new_plan,
                options,
                &self.config,
                now,
            )?;
            self.commit(transition, now).await?
        };
        match charge {
            Some(amount_cents) => {
                self.settle_charge(tenant_id, subscription_id, amount_cents, now)
                    .await
            }
            None => self.subscriptions.get(tenant_id, subscription_id).await,
        }
    }

    pub async fn pause(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.locked_step(tenant_id, subscription_id, now, |sub, plan| {
            lifecycle::pause(sub, plan)
        })
        .await
    }

    pub async fn resume(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.locked_step(tenant_id, subscription_id, now, |sub, plan| {
            lifecycle::resume(sub, plan)
        })
        .await
    }

    /// Cancel immediately or at period end
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        immediate: bool,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.locked_step(tenant_id, subscription_id, now, |sub, plan| {
            lifecycle::cancel(sub, plan, immediate, now)
        })
        .await
    }

    /// Compliance override: freeze the subscription
    pub async fn suspend(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.locked_step(tenant_id, subscription_id, now, |sub, plan| {
            lifecycle::suspend(sub, plan)
        })
        .await
    }

    /// Lift a compliance suspension
    pub async fn reinstate(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.locked_step(tenant_id, subscription_id, now, |sub, plan| {
            lifecycle::reinstate(sub, plan)
        })
        .await
    }

    /// Change the seat ceiling; billed from the next renewal
    pub async fn update_seat_count(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        seat_count: u32,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.locked_step(tenant_id, subscription_id, now, |sub, _plan| {
            lifecycle::update_seats(sub, seat_count)
        })
        .await
    }

    /// Meter usage against the current period
    pub async fn record_usage(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        units: u64,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.locked_step(tenant_id, subscription_id, now, |sub, _plan| {
            lifecycle::record_usage(sub, units)
        })
        .await
    }

    // =========================================================================
    // Payment outcomes
    // =========================================================================

    /// Gateway callback: a payment settled
    ///
    /// Replays of the same transaction id are no-ops: one revenue-share
    /// record, one counter reset, no double grants.
    pub async fn record_payment_success(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        transaction_id: &str,
        amount_cents: i64,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        let _guard = self.locks.acquire(subscription_id).await;
        let subscription = self.subscriptions.get(tenant_id, subscription_id).await?;
        let plan = self.plans.get(tenant_id, subscription.plan_id).await?;
        self.apply_payment_success(subscription, &plan, transaction_id, amount_cents, now)
            .await
    }

    /// Gateway callback: a payment failed
    pub async fn record_payment_failure(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        let _guard = self.locks.acquire(subscription_id).await;
        let subscription = self.subscriptions.get(tenant_id, subscription_id).await?;
        let plan = self.plans.get(tenant_id, subscription.plan_id).await?;
        let transition = lifecycle::payment_failed(&subscription, &plan, &self.config, now)?;
        warn!(
            subscription_id = %subscription_id,
            failed_payment_count = transition.subscription.failed_payment_count,
            dunning_status = %transition.subscription.dunning_status,
            "payment failure recorded"
        );
        self.commit(transition, now).await?;
        self.subscriptions.get(tenant_id, subscription_id).await
    }

    /// Refund a previously settled transaction
    pub async fn refund_transaction(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        transaction_id: &str,
        amount_cents: Option<i64>,
        now: OffsetDateTime,
    ) -> BillingResult<String> {
        let subscription = self.subscriptions.get(tenant_id, subscription_id).await?;
        if !subscription
            .applied_transactions
            .iter()
            .any(|t| t == transaction_id)
        {
            return Err(BillingError::NotFound(format!(
                "transaction {transaction_id} was not settled against subscription {subscription_id}"
            )));
        }
        let receipt = self
            .gateway
            .refund(transaction_id, amount_cents)
            .await
            .map_err(|e| BillingError::ExternalFailure(e.to_string()))?;
        self.publish(
            tenant_id,
            now,
            DomainEvent::PaymentRefunded {
                subscription_id,
                transaction_id: transaction_id.to_string(),
                refund_id: receipt.refund_id.clone(),
                amount_cents,
            },
        )
        .await;
        Ok(receipt.refund_id)
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Record a payment against an invoice
    ///
    /// Partial payments accumulate; only the transition into `paid`
    /// settles revenue and feeds the lifecycle payment-success path.
    pub async fn record_invoice_payment(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        amount_cents: i64,
        now: OffsetDateTime,
    ) -> BillingResult<Invoice> {
        let invoice = self.invoices.get(tenant_id, invoice_id).await?;
        let _guard = self.locks.acquire(invoice.subscription_id).await;

        let mut invoice = self.invoices.get(tenant_id, invoice_id).await?;
        let application = invoice.record_payment(amount_cents, now)?;
        let invoice = self.invoices.update(invoice).await?;

        if application.settled {
            self.publish(
                tenant_id,
                now,
                DomainEvent::InvoicePaid {
                    invoice_id,
                    amount_paid_cents: invoice.amount_paid_cents,
                },
            )
            .await;
            let subscription = self
                .subscriptions
                .get(tenant_id, invoice.subscription_id)
                .await?;
            let plan = self.plans.get(tenant_id, subscription.plan_id).await?;
            // The invoice id doubles as the settlement transaction id so
            // replayed callbacks stay idempotent
            self.apply_settlement(
                &subscription,
                &plan,
                &format!("invoice:{invoice_id}"),
                SettlementSource::Invoice { invoice_id },
                invoice.total_cents,
                now,
            )
            .await?;
        } else {
            self.publish(
                tenant_id,
                now,
                DomainEvent::InvoicePartiallyPaid {
                    invoice_id,
                    amount_due_cents: application.amount_due_cents,
                },
            )
            .await;
        }
        Ok(invoice)
    }

    /// Void an open invoice
    pub async fn void_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        now: OffsetDateTime,
    ) -> BillingResult<Invoice> {
        let invoice = self.invoices.get(tenant_id, invoice_id).await?;
        let _guard = self.locks.acquire(invoice.subscription_id).await;

        let mut invoice = self.invoices.get(tenant_id, invoice_id).await?;
        invoice.void(now)?;
        let invoice = self.invoices.update(invoice).await?;
        self.publish(tenant_id, now, DomainEvent::InvoiceVoided { invoice_id })
            .await;
        Ok(invoice)
    }

    /// Sweep open invoices past their due date into `overdue`
    pub async fn process_overdue_invoices(
        &self,
        tenant_id: TenantId,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<InvoiceId>> {
        let mut flagged = Vec::new();
        for mut invoice in self.invoices.list_open_by_tenant(tenant_id).await? {
            if invoice.mark_overdue_if_due(now) {
                let invoice_id = invoice.id;
                self.invoices.update(invoice).await?;
                self.publish(tenant_id, now, DomainEvent::InvoiceOverdue { invoice_id })
                    .await;
                flagged.push(invoice_id);
            }
        }
        Ok(flagged)
    }

    // =========================================================================
    // Sweeps
    // =========================================================================

    /// Renewal sweep: roll due periods and bill them
    ///
    /// Per-subscription failures are logged and skipped so one bad record
    /// cannot stall the sweep.
    pub async fn process_renewals(
        &self,
        tenant_id: TenantId,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<SubscriptionId>> {
        let due: Vec<SubscriptionId> = self
            .subscriptions
            .list_by_tenant(tenant_id)
            .await?
            .into_iter()
            .filter(|s| s.renewal_due(now))
            .map(|s| s.id)
            .collect();

        let mut renewed = Vec::new();
        for subscription_id in due {
            match self.renew_one(tenant_id, subscription_id, now).await {
                Ok(()) => renewed.push(subscription_id),
                Err(e) => {
                    warn!(subscription_id = %subscription_id, error = %e, "renewal failed");
                }
            }
        }
        Ok(renewed)
    }

    /// Expiry sweep: terminate canceled subscriptions past period end
    pub async fn process_expirations(
        &self,
        tenant_id: TenantId,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<SubscriptionId>> {
        let due: Vec<SubscriptionId> = self
            .subscriptions
            .list_by_tenant(tenant_id)
            .await?
            .into_iter()
            .filter(|s| s.expiry_due(now))
            .map(|s| s.id)
            .collect();

        let mut expired = Vec::new();
        for subscription_id in due {
            let result = self
                .locked_step(tenant_id, subscription_id, now, |sub, plan| {
                    lifecycle::expire(sub, plan, now)
                })
                .await;
            match result {
                Ok(_) => expired.push(subscription_id),
                Err(e) => {
                    warn!(subscription_id = %subscription_id, error = %e, "expiry failed");
                }
            }
        }
        Ok(expired)
    }

    // =========================================================================
    // Entitlements & credential events
    // =========================================================================

    /// What other modules call to gate behavior
    pub async fn check_entitlement(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        key: &str,
    ) -> BillingResult<EntitlementCheck> {
        self.entitlements.check(tenant_id, user_id, key).await
    }

    /// Inbound credential-status event
    ///
    /// Re-evaluates only the definitions referencing the changed
    /// credential, across the user's access-granting subscriptions.
    /// At-least-once delivery is fine: every mutation is compare-and-set.
    pub async fn handle_credential_event(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        credential: CredentialType,
        status: CredentialStatus,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<GrantOutcome>> {
        let mut affected = Vec::new();
        for subscription in self
            .subscriptions
            .list_for_user(tenant_id, user_id)
            .await?
            .into_iter()
            .filter(|s| s.status.grants_access())
        {
            let plan = self.plans.get(tenant_id, subscription.plan_id).await?;
            affected.push((subscription.id, plan.entitlements));
        }

        let outcomes = self
            .entitlements
            .apply_credential_change(tenant_id, user_id, credential, status, &affected, now)
            .await?;

        for outcome in &outcomes {
            let event = match outcome {
                GrantOutcome::Granted { key } => Some(DomainEvent::EntitlementGranted {
                    user_id,
                    key: key.clone(),
                    // Provenance is per-subscription; the first affected
                    // subscription granted it
                    subscription_id: affected
                        .first()
                        .map(|(id, _)| *id)
                        .unwrap_or_else(SubscriptionId::new),
                }),
                GrantOutcome::Blocked {
                    key,
                    credential,
                    status,
                } => Some(DomainEvent::EntitlementBlocked {
                    user_id,
                    key: key.clone(),
                    credential: *credential,
                    status: *status,
                }),
                GrantOutcome::AlreadyActive { .. } => None,
            };
            if let Some(event) = event {
                self.publish(tenant_id, now, event).await;
            }
        }
        self.publish(
            tenant_id,
            now,
            DomainEvent::CredentialStatusProcessed {
                user_id,
                credential,
                status,
            },
        )
        .await;
        Ok(outcomes)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_subscription(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
    ) -> BillingResult<Subscription> {
        self.subscriptions.get(tenant_id, subscription_id).await
    }

    /// MRR/ARR, churn, and trial conversion for a tenant
    pub async fn get_analytics(
        &self,
        tenant_id: TenantId,
        vendor_id: Option<VendorId>,
    ) -> BillingResult<AnalyticsSnapshot> {
        let subscriptions = self.subscriptions.list_by_tenant(tenant_id).await?;
        let mut plans: HashMap<PlanId, Plan> = HashMap::new();
        for subscription in &subscriptions {
            if !plans.contains_key(&subscription.plan_id) {
                let plan = self.plans.get(tenant_id, subscription.plan_id).await?;
                plans.insert(plan.id, plan);
            }
        }
        Ok(analytics::compute(&subscriptions, &plans, vendor_id))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Lock, load, run one pure lifecycle step, commit
    async fn locked_step<F>(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
        step: F,
    ) -> BillingResult<Subscription>
    where
        F: FnOnce(&Subscription, &Plan) -> BillingResult<Transition>,
    {
        let _guard = self.locks.acquire(subscription_id).await;
        let subscription = self.subscriptions.get(tenant_id, subscription_id).await?;
        let plan = self.plans.get(tenant_id, subscription.plan_id).await?;
        let transition = step(&subscription, &plan)?;
        self.commit(transition, now).await?;
        self.subscriptions.get(tenant_id, subscription_id).await
    }

    /// Persist the aggregate, then execute the command list
    ///
    /// Returns the charge amount the caller must settle outside the lock,
    /// if the transition produced one.
    async fn commit(&self, transition: Transition, now: OffsetDateTime) -> BillingResult<Option<i64>> {
        let updated = self.subscriptions.update(transition.subscription).await?;
        self.apply_commands(&updated, transition.commands, now).await
    }

    async fn apply_commands(
        &self,
        subscription: &Subscription,
        commands: Vec<Command>,
        now: OffsetDateTime,
    ) -> BillingResult<Option<i64>> {
        let tenant_id = subscription.tenant_id;
        let mut charge = None;
        for command in commands {
            match command {
                Command::GrantEntitlements {
                    user_id,
                    definitions,
                } => {
                    let outcomes = self
                        .entitlements
                        .grant_batch(tenant_id, user_id, subscription.id, &definitions, now)
                        .await?;
                    for outcome in outcomes {
                        match outcome {
                            GrantOutcome::Granted { key } => {
                                self.publish(
                                    tenant_id,
                                    now,
                                    DomainEvent::EntitlementGranted {
                                        user_id,
                                        key,
                                        subscription_id: subscription.id,
                                    },
                                )
                                .await;
                            }
                            GrantOutcome::Blocked {
                                key,
                                credential,
                                status,
                            } => {
                                self.publish(
                                    tenant_id,
                                    now,
                                    DomainEvent::EntitlementBlocked {
                                        user_id,
                                        key,
                                        credential,
                                        status,
                                    },
                                )
                                .await;
                            }
                            GrantOutcome::AlreadyActive { .. } => {}
                        }
                    }
                }
                Command::RevokeEntitlements { user_id, keys } => {
                    let revoked = self
                        .entitlements
                        .revoke_batch(tenant_id, user_id, &keys, now)
                        .await?;
                    for key in revoked {
                        self.publish(
                            tenant_id,
                            now,
                            DomainEvent::EntitlementRevoked {
                                user_id,
                                key,
                                subscription_id: subscription.id,
                            },
                        )
                        .await;
                    }
                }
                Command::Charge { amount_cents } => {
                    charge = Some(amount_cents);
                }
                Command::CreateInvoice { lines } => {
                    let invoice = Invoice::issue(
                        tenant_id,
                        subscription.id,
                        subscription.vendor_id,
                        lines,
                        self.config.tax_percent,
                        self.config.invoice_terms,
                        now,
                    )?;
                    let event = DomainEvent::InvoiceCreated {
                        invoice_id: invoice.id,
                        subscription_id: subscription.id,
                        total_cents: invoice.total_cents,
                        due_at: invoice.due_at,
                    };
                    self.invoices.insert(invoice).await?;
                    self.publish(tenant_id, now, event).await;
                }
                Command::Publish(event) => {
                    self.publish(tenant_id, now, event).await;
                }
            }
        }
        Ok(charge)
    }

    /// Settle a charge produced by a committed transition
    ///
    /// The gateway call (and its backoff retries) runs without the
    /// subscription lock; the lock is re-acquired to commit the outcome.
    async fn settle_charge(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        amount_cents: i64,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        let outcome = charge_with_retry(
            self.gateway.as_ref(),
            &self.config.gateway_retry,
            subscription_id,
            amount_cents,
            &self.config.currency,
        )
        .await?;

        let _guard = self.locks.acquire(subscription_id).await;
        let subscription = self.subscriptions.get(tenant_id, subscription_id).await?;
        let plan = self.plans.get(tenant_id, subscription.plan_id).await?;
        match outcome {
            ChargeOutcome::Approved { transaction_id } => {
                self.apply_payment_success(
                    subscription,
                    &plan,
                    &transaction_id,
                    amount_cents,
                    now,
                )
                .await
            }
            ChargeOutcome::Declined { reason } => {
                warn!(subscription_id = %subscription_id, reason = %reason, "charge declined");
                let transition =
                    lifecycle::payment_failed(&subscription, &plan, &self.config, now)?;
                self.commit(transition, now).await?;
                self.subscriptions.get(tenant_id, subscription_id).await
            }
        }
    }

    /// Payment-success path shared by gateway captures and callbacks
    ///
    /// Caller must hold the subscription lock.
    async fn apply_payment_success(
        &self,
        subscription: Subscription,
        plan: &Plan,
        transaction_id: &str,
        amount_cents: i64,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        self.apply_settlement(
            &subscription,
            plan,
            transaction_id,
            SettlementSource::GatewayTransaction {
                transaction_id: transaction_id.to_string(),
            },
            amount_cents,
            now,
        )
        .await
    }

    async fn apply_settlement(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        transaction_id: &str,
        source: SettlementSource,
        gross_cents: i64,
        now: OffsetDateTime,
    ) -> BillingResult<Subscription> {
        let tenant_id = subscription.tenant_id;
        if subscription
            .applied_transactions
            .iter()
            .any(|t| t == transaction_id)
        {
            info!(
                subscription_id = %subscription.id,
                transaction_id = %transaction_id,
                "settlement replay ignored"
            );
            return Ok(subscription.clone());
        }

        let transition = lifecycle::payment_succeeded(
            subscription,
            plan,
            transaction_id,
            gross_cents,
            now,
        )?;
        self.commit(transition, now).await?;

        let share = RevenueShare::settle(
            tenant_id,
            subscription.id,
            subscription.vendor_id,
            source,
            gross_cents,
            plan.fee_percent,
            now,
        )?;
        let platform_fee_cents = share.platform_fee_cents;
        if self.revenue.insert_if_absent(share).await? {
            info!(
                subscription_id = %subscription.id,
                gross_cents,
                platform_fee_cents,
                "revenue share settled"
            );
        }
        self.subscriptions.get(tenant_id, subscription.id).await
    }

    async fn renew_one(
        &self,
        tenant_id: TenantId,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        let charge = {
            let _guard = self.locks.acquire(subscription_id).await;
            let subscription = self.subscriptions.get(tenant_id, subscription_id).await?;
            let plan = self.plans.get(tenant_id, subscription.plan_id).await?;
            let transition = lifecycle::renew(&subscription, &plan, now)?;
            self.commit(transition, now).await?
        };
        if let Some(amount_cents) = charge {
            self.settle_charge(tenant_id, subscription_id, amount_cents, now)
                .await?;
        }
        Ok(())
    }

    async fn publish(&self, tenant_id: TenantId, now: OffsetDateTime, event: DomainEvent) {
        self.publisher
            .publish(EventEnvelope {
                tenant_id,
                occurred_at: now,
                event,
            })
            .await;
    }
}
