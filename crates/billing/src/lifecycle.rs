//! Subscription lifecycle transitions
//!
//! Every operation is a pure function from the current aggregate (and its
//! plan) to a `Transition`: the updated aggregate plus an ordered command
//! list. The orchestrator executes the commands under the per-subscription
//! lock, so nothing here re-enters another state machine and the lock
//! discipline stays auditable. Invalid-state calls fail before any field
//! changes.

use time::{Duration, OffsetDateTime};
use vendhub_shared::types::{Metadata, SubscriptionId, TenantId, UserId, VendorId};

use crate::catalog::{BillingType, EntitlementDefinition, Plan, TrialIntent};
use crate::config::EngineConfig;
use crate::dunning::{self, DunningStatus};
use crate::error::{BillingError, BillingResult};
use crate::events::DomainEvent;
use crate::invoice::LineItem;
use crate::period;
use crate::proration::{self, ProrationOutcome};
use crate::subscription::{Subscription, SubscriptionStatus, TrialWindow};

/// Side effect the orchestrator must execute for a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GrantEntitlements {
        user_id: UserId,
        definitions: Vec<EntitlementDefinition>,
    },
    RevokeEntitlements {
        user_id: UserId,
        keys: Vec<String>,
    },
    /// Capture through the payment gateway
    Charge { amount_cents: i64 },
    /// Issue an invoice for these lines
    CreateInvoice { lines: Vec<LineItem> },
    Publish(DomainEvent),
}

/// One atomic lifecycle step: new aggregate state plus its side effects
#[derive(Debug, Clone)]
pub struct Transition {
    pub subscription: Subscription,
    pub commands: Vec<Command>,
}

/// Inputs for creating a subscription
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub tenant_id: TenantId,
    pub customer_id: UserId,
    pub vendor_id: VendorId,
    pub seat_count: u32,
    pub discount_percent: Option<f64>,
    pub metadata: Metadata,
}

fn base_subscription(input: NewSubscription, plan: &Plan, now: OffsetDateTime) -> Subscription {
    Subscription {
        id: SubscriptionId::new(),
        tenant_id: input.tenant_id,
        customer_id: input.customer_id,
        vendor_id: input.vendor_id,
        plan_id: plan.id,
        status: SubscriptionStatus::Active,
        current_period_start: now,
        current_period_end: period::advance(now, plan.interval.interval, plan.interval.interval_count),
        trial: None,
        seat_count: input.seat_count.max(1),
        usage_units: 0,
        discount_percent: input.discount_percent,
        dunning_status: DunningStatus::Clear,
        failed_payment_count: 0,
        applied_transactions: vec![],
        seats: vec![],
        members: vec![],
        pending_credit_cents: 0,
        suspended_from: None,
        cancel_at_period_end: false,
        canceled_at: None,
        terminated_at: None,
        metadata: input.metadata,
        created_at: now,
        updated_at: now,
        revision: 0,
    }
}

/// Period amount for the subscription on its plan, after pending credit
///
/// Returns the amount to collect and the credit left over.
fn billable_amount(subscription: &Subscription, plan: &Plan) -> (i64, i64) {
    let amount = plan.pricing.amount_cents(
        subscription.seat_count,
        subscription.usage_units,
        subscription.discount_percent,
    );
    let credit = subscription.pending_credit_cents.max(0);
    ((amount - credit).max(0), (credit - amount).max(0))
}

/// Billing command for a period amount, per the plan's billing type
fn collect(plan: &Plan, description: &str, amount_cents: i64) -> Option<Command> {
    if amount_cents <= 0 {
        return None;
    }
    Some(match plan.billing_type {
        BillingType::Charge => Command::Charge { amount_cents },
        BillingType::Invoice => Command::CreateInvoice {
            lines: vec![LineItem::new(description, 1, amount_cents)],
        },
    })
}

/// Create an active subscription and bill the first period
pub fn subscribe(input: NewSubscription, plan: &Plan, now: OffsetDateTime) -> Transition {
    let subscription = base_subscription(input, plan, now);
    let (due, leftover) = billable_amount(&subscription, plan);
    let mut subscription = subscription;
    subscription.pending_credit_cents = leftover;

    let mut commands = vec![Command::GrantEntitlements {
        user_id: subscription.customer_id,
        definitions: plan.entitlements.clone(),
    }];
    commands.extend(collect(plan, &format!("{} first period", plan.name), due));
    commands.push(Command::Publish(DomainEvent::SubscriptionCreated {
        subscription_id: subscription.id,
        plan_id: plan.id,
        status: subscription.status,
    }));

    Transition {
        subscription,
        commands,
    }
}

/// Start a trial under the plan's configuration for the given intent
///
/// Trials receive the trial-scoped entitlement subset and bill nothing.
pub fn start_trial(
    input: NewSubscription,
    plan: &Plan,
    intent: TrialIntent,
    now: OffsetDateTime,
) -> BillingResult<Transition> {
    let trial_config = plan.trial_for(&intent).ok_or_else(|| {
        BillingError::Validation(format!(
            "plan {} has no trial configuration for intent {:?}",
            plan.id, intent
        ))
    })?;

    let mut subscription = base_subscription(input, plan, now);
    let ends_at = now + Duration::days(i64::from(trial_config.duration_days));
    subscription.status = SubscriptionStatus::Trialing;
    subscription.current_period_end = ends_at;
    if let Some(max_seats) = trial_config.max_seats {
        subscription.seat_count = subscription.seat_count.min(max_seats);
    }
    subscription.trial = Some(TrialWindow {
        intent,
        started_at: now,
        ends_at,
        converted_at: None,
    });

    let commands = vec![
        Command::GrantEntitlements {
            user_id: subscription.customer_id,
            definitions: plan.trial_entitlements().cloned().collect(),
        },
        Command::Publish(DomainEvent::SubscriptionCreated {
            subscription_id: subscription.id,
            plan_id: plan.id,
            status: subscription.status,
        }),
        Command::Publish(DomainEvent::TrialStarted {
            subscription_id: subscription.id,
            ends_at,
        }),
    ];

    Ok(Transition {
        subscription,
        commands,
    })
}

/// Convert a trial to a paying subscription
///
/// The billing period starts at the conversion instant, not the trial
/// start, and trial entitlements are replaced by the full plan set in the
/// same step.
pub fn convert_trial(
    subscription: &Subscription,
    plan: &Plan,
    now: OffsetDateTime,
) -> BillingResult<Transition> {
    subscription.require_status(&[SubscriptionStatus::Trialing])?;

    let mut updated = subscription.clone();
    updated.status = SubscriptionStatus::Active;
    updated.set_period(
        now,
        period::advance(now, plan.interval.interval, plan.interval.interval_count),
    )?;
    if let Some(trial) = updated.trial.as_mut() {
        trial.converted_at = Some(now);
    }

    let trial_keys: Vec<String> = plan.trial_entitlements().map(|d| d.key.clone()).collect();
    // Usage accrued during the free trial is not billed
    updated.usage_units = 0;
    let (due, leftover) = billable_amount(&updated, plan);
    updated.pending_credit_cents = leftover;

    let mut commands = vec![
        Command::RevokeEntitlements {
            user_id: updated.customer_id,
            keys: trial_keys,
        },
        Command::GrantEntitlements {
            user_id: updated.customer_id,
            definitions: plan.entitlements.clone(),
        },
    ];
    commands.extend(collect(plan, &format!("{} first period", plan.name), due));
    commands.push(Command::Publish(DomainEvent::TrialConverted {
        subscription_id: updated.id,
    }));

    Ok(Transition {
        subscription: updated,
        commands,
    })
}

/// Options for a plan change
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeOptions {
    /// Restart the billing period at the change instant
    pub reset_period: bool,
}

/// Move the subscription to a different plan version
///
/// Entitlements unique to the old plan are revoked, ones unique to the new
/// plan granted; shared keys are untouched. The running period is kept
/// unless the caller or the proration behavior resets it.
pub fn change_plan(
    subscription: &Subscription,
    old_plan: &Plan,
    new_plan: &Plan,
    options: ChangeOptions,
    config: &EngineConfig,
    now: OffsetDateTime,
) -> BillingResult<Transition> {
    subscription.require_status(&[SubscriptionStatus::Active, SubscriptionStatus::PastDue])?;
    if old_plan.currency != new_plan.currency {
        return Err(BillingError::Validation(format!(
            "cannot change plans across currencies ({} -> {})",
            old_plan.currency, new_plan.currency
        )));
    }

    let mut updated = subscription.clone();
    updated.plan_id = new_plan.id;

    let old_amount = old_plan.pricing.amount_cents(
        subscription.seat_count,
        subscription.usage_units,
        subscription.discount_percent,
    );
    let new_amount = new_plan.pricing.amount_cents(
        subscription.seat_count,
        subscription.usage_units,
        subscription.discount_percent,
    );
    let fraction = period::fraction_remaining(
        now,
        subscription.current_period_start,
        subscription.current_period_end,
    );
    let (outcome, behavior_resets) =
        proration::plan_change(config.proration, old_amount, new_amount, fraction);

    if options.reset_period || behavior_resets {
        updated.set_period(
            now,
            period::advance(now, new_plan.interval.interval, new_plan.interval.interval_count),
        )?;
    }

    let removed: Vec<String> = old_plan
        .entitlements_not_in(new_plan)
        .map(|d| d.key.clone())
        .collect();
    let added: Vec<EntitlementDefinition> =
        new_plan.entitlements_not_in(old_plan).cloned().collect();

    let mut commands = Vec::new();
    if !removed.is_empty() {
        commands.push(Command::RevokeEntitlements {
            user_id: updated.customer_id,
            keys: removed,
        });
    }
    if !added.is_empty() {
        commands.push(Command::GrantEntitlements {
            user_id: updated.customer_id,
            definitions: added,
        });
    }
    match outcome {
        ProrationOutcome::ChargeNow { amount_cents } => {
            commands.extend(collect(
                new_plan,
                &format!("{} plan change", new_plan.name),
                amount_cents,
            ));
        }
        ProrationOutcome::CreditNext { amount_cents } => {
            updated.pending_credit_cents =
                updated.pending_credit_cents.saturating_add(amount_cents);
        }
        ProrationOutcome::NoCharge => {}
    }
    commands.push(Command::Publish(DomainEvent::PlanChanged {
        subscription_id: updated.id,
        from_plan: old_plan.id,
        to_plan: new_plan.id,
    }));

    Ok(Transition {
        subscription: updated,
        commands,
    })
}

/// Pause an active subscription; access is suspended until resume
pub fn pause(subscription: &Subscription, plan: &Plan) -> BillingResult<Transition> {
    subscription.require_status(&[SubscriptionStatus::Active])?;

    let mut updated = subscription.clone();
    updated.status = SubscriptionStatus::Paused;

    Ok(Transition {
        commands: vec![
            Command::RevokeEntitlements {
                user_id: updated.customer_id,
                keys: plan.entitlements.iter().map(|d| d.key.clone()).collect(),
            },
            Command::Publish(DomainEvent::SubscriptionPaused {
                subscription_id: updated.id,
            }),
        ],
        subscription: updated,
    })
}

/// Resume a paused subscription
pub fn resume(subscription: &Subscription, plan: &Plan) -> BillingResult<Transition> {
    subscription.require_status(&[SubscriptionStatus::Paused])?;

    let mut updated = subscription.clone();
    updated.status = SubscriptionStatus::Active;

    Ok(Transition {
        commands: vec![
            Command::GrantEntitlements {
                user_id: updated.customer_id,
                definitions: plan.entitlements.clone(),
            },
            Command::Publish(DomainEvent::SubscriptionResumed {
                subscription_id: updated.id,
            }),
        ],
        subscription: updated,
    })
}

/// Cancel now or at period end
pub fn cancel(
    subscription: &Subscription,
    plan: &Plan,
    immediate: bool,
    now: OffsetDateTime,
) -> BillingResult<Transition> {
    subscription.require_status(&[
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Paused,
    ])?;

    let mut updated = subscription.clone();
    updated.canceled_at = Some(now);

    let mut commands = Vec::new();
    if immediate {
        updated.status = SubscriptionStatus::Canceled;
        commands.push(Command::RevokeEntitlements {
            user_id: updated.customer_id,
            keys: plan.entitlements.iter().map(|d| d.key.clone()).collect(),
        });
    } else {
        // Access continues until the expiry sweep picks the period end up
        updated.cancel_at_period_end = true;
    }
    commands.push(Command::Publish(DomainEvent::SubscriptionCanceled {
        subscription_id: updated.id,
        immediate,
    }));

    Ok(Transition {
        subscription: updated,
        commands,
    })
}

/// Expiry-sweep step: a canceled subscription whose period has lapsed
pub fn expire(
    subscription: &Subscription,
    plan: &Plan,
    now: OffsetDateTime,
) -> BillingResult<Transition> {
    if !subscription.expiry_due(now) {
        return Err(BillingError::InvalidState(format!(
            "subscription {} is not due for expiry",
            subscription.id
        )));
    }

    let mut updated = subscription.clone();
    updated.status = SubscriptionStatus::Expired;
    updated.terminated_at = Some(now);

    Ok(Transition {
        commands: vec![
            Command::RevokeEntitlements {
                user_id: updated.customer_id,
                keys: plan.entitlements.iter().map(|d| d.key.clone()).collect(),
            },
            Command::Publish(DomainEvent::SubscriptionExpired {
                subscription_id: updated.id,
            }),
        ],
        subscription: updated,
    })
}

/// Compliance override: freeze any non-terminal subscription
pub fn suspend(subscription: &Subscription, plan: &Plan) -> BillingResult<Transition> {
    if subscription.status.is_terminal() || subscription.status == SubscriptionStatus::Suspended {
        return Err(BillingError::InvalidState(format!(
            "subscription {} is {}",
            subscription.id, subscription.status
        )));
    }

    let mut updated = subscription.clone();
    updated.suspended_from = Some(updated.status);
    updated.status = SubscriptionStatus::Suspended;

    Ok(Transition {
        commands: vec![
            Command::RevokeEntitlements {
                user_id: updated.customer_id,
                keys: plan.entitlements.iter().map(|d| d.key.clone()).collect(),
            },
            Command::Publish(DomainEvent::SubscriptionSuspended {
                subscription_id: updated.id,
            }),
        ],
        subscription: updated,
    })
}

/// Lift a compliance suspension, restoring the prior status
pub fn reinstate(subscription: &Subscription, plan: &Plan) -> BillingResult<Transition> {
    subscription.require_status(&[SubscriptionStatus::Suspended])?;

    let mut updated = subscription.clone();
    updated.status = updated.suspended_from.take().unwrap_or(SubscriptionStatus::Active);

    let mut commands = Vec::new();
    if updated.status.grants_access() {
        commands.push(Command::GrantEntitlements {
            user_id: updated.customer_id,
            definitions: plan.entitlements.clone(),
        });
    }
    commands.push(Command::Publish(DomainEvent::SubscriptionReinstated {
        subscription_id: updated.id,
    }));

    Ok(Transition {
        subscription: updated,
        commands,
    })
}

/// Renewal-sweep step: roll the period and bill it
pub fn renew(
    subscription: &Subscription,
    plan: &Plan,
    now: OffsetDateTime,
) -> BillingResult<Transition> {
    if !subscription.renewal_due(now) {
        return Err(BillingError::InvalidState(format!(
            "subscription {} is not due for renewal",
            subscription.id
        )));
    }
    if plan.pricing.is_one_time() {
        return Err(BillingError::InvalidState(format!(
            "subscription {} is on one-time pricing and does not renew",
            subscription.id
        )));
    }

    let mut updated = subscription.clone();
    let start = updated.current_period_end;
    updated.set_period(
        start,
        period::advance(start, plan.interval.interval, plan.interval.interval_count),
    )?;
    // Bills the usage accrued over the elapsed period, then the counter
    // starts over for the new one
    let (due, leftover) = billable_amount(&updated, plan);
    updated.pending_credit_cents = leftover;
    updated.usage_units = 0;

    let mut commands = Vec::new();
    commands.extend(collect(plan, &format!("{} renewal", plan.name), due));
    commands.push(Command::Publish(DomainEvent::SubscriptionRenewed {
        subscription_id: updated.id,
        period_end: updated.current_period_end,
    }));

    Ok(Transition {
        subscription: updated,
        commands,
    })
}

/// Change the seat ceiling
///
/// The new count takes effect on the next billing; the running period is
/// never re-billed. Shrinking below the occupied seats is rejected.
pub fn update_seats(subscription: &Subscription, seat_count: u32) -> BillingResult<Transition> {
    subscription.require_status(&[
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
    ])?;
    if seat_count == 0 {
        return Err(BillingError::Validation(
            "seat count must be at least 1".to_string(),
        ));
    }
    if (seat_count as usize) < subscription.occupied_seats() {
        return Err(BillingError::InvalidState(format!(
            "{} seats are occupied, cannot shrink to {}",
            subscription.occupied_seats(),
            seat_count
        )));
    }

    let mut updated = subscription.clone();
    updated.seat_count = seat_count;

    Ok(Transition {
        commands: vec![Command::Publish(DomainEvent::SeatCountChanged {
            subscription_id: updated.id,
            seat_count,
        })],
        subscription: updated,
    })
}

/// Meter usage against the current period
pub fn record_usage(subscription: &Subscription, units: u64) -> BillingResult<Transition> {
    subscription.require_status(&[
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
    ])?;

    let mut updated = subscription.clone();
    updated.usage_units = updated.usage_units.saturating_add(units);

    Ok(Transition {
        commands: vec![Command::Publish(DomainEvent::UsageRecorded {
            subscription_id: updated.id,
            units,
            total_units: updated.usage_units,
        })],
        subscription: updated,
    })
}

/// A settled payment: reset dunning and restore access
///
/// Idempotence lives one level up: the orchestrator drops transactions the
/// aggregate has already recorded before calling this.
pub fn payment_succeeded(
    subscription: &Subscription,
    plan: &Plan,
    transaction_id: &str,
    amount_cents: i64,
    now: OffsetDateTime,
) -> BillingResult<Transition> {
    subscription.require_status(&[
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Unpaid,
    ])?;

    let was_dunning = subscription.dunning_status != DunningStatus::Clear;
    let mut updated = subscription.clone();
    updated.failed_payment_count = 0;
    updated.dunning_status = DunningStatus::Clear;
    if matches!(
        updated.status,
        SubscriptionStatus::PastDue | SubscriptionStatus::Unpaid
    ) {
        updated.status = SubscriptionStatus::Active;
    }
    updated.record_transaction(transaction_id);

    let mut commands = vec![Command::GrantEntitlements {
        user_id: updated.customer_id,
        definitions: plan.entitlements.clone(),
    }];
    commands.push(Command::Publish(DomainEvent::PaymentSucceeded {
        subscription_id: updated.id,
        transaction_id: transaction_id.to_string(),
        amount_cents,
    }));
    if was_dunning {
        commands.push(Command::Publish(DomainEvent::DunningRecovered {
            subscription_id: updated.id,
        }));
    }

    Ok(Transition {
        subscription: updated,
        commands,
    })
}

/// A failed payment: climb the dunning ladder
pub fn payment_failed(
    subscription: &Subscription,
    plan: &Plan,
    config: &EngineConfig,
    _now: OffsetDateTime,
) -> BillingResult<Transition> {
    subscription.require_status(&[
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Unpaid,
    ])?;

    let escalation = dunning::escalate(&config.dunning, subscription.failed_payment_count);
    let mut updated = subscription.clone();
    updated.failed_payment_count = escalation.failed_payment_count;
    updated.dunning_status = escalation.status;
    updated.status = if escalation.status == DunningStatus::Unpaid {
        SubscriptionStatus::Unpaid
    } else {
        SubscriptionStatus::PastDue
    };

    let mut commands = vec![
        Command::Publish(DomainEvent::PaymentFailed {
            subscription_id: updated.id,
            failed_payment_count: updated.failed_payment_count,
        }),
        Command::Publish(DomainEvent::DunningEscalated {
            subscription_id: updated.id,
            status: escalation.status,
            failed_payment_count: updated.failed_payment_count,
        }),
    ];
    if escalation.revoke_access {
        commands.push(Command::RevokeEntitlements {
            user_id: updated.customer_id,
            keys: plan.entitlements.iter().map(|d| d.key.clone()).collect(),
        });
    }

    Ok(Transition {
        subscription: updated,
        commands,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{EntitlementType, IntervalConfig, TrialConfig};
    use crate::pricing::PricingModel;
    use time::macros::datetime;
    use vendhub_shared::types::PlanId;

    fn plan() -> Plan {
        Plan {
            id: PlanId::new(),
            tenant_id: TenantId::new(),
            vendor_id: VendorId::new(),
            name: "Pro".to_string(),
            version: 1,
            supersedes: None,
            pricing: PricingModel::Flat { amount_cents: 10000 },
            interval: IntervalConfig::monthly(),
            billing_type: BillingType::Charge,
            currency: "USD".to_string(),
            fee_percent: 20.0,
            entitlements: vec![
                EntitlementDefinition::ungated("api.access", EntitlementType::ApiAccess),
                EntitlementDefinition {
                    trial_eligible: false,
                    ..EntitlementDefinition::ungated("exports.bulk", EntitlementType::Feature)
                },
            ],
            trials: vec![(
                TrialIntent::Evaluation,
                TrialConfig {
                    duration_days: 14,
                    max_seats: None,
                },
            )],
            default_trial: None,
            metadata: Metadata::new(),
            created_at: datetime!(2026-01-01 00:00 UTC),
        }
    }

    fn new_input(plan: &Plan) -> NewSubscription {
        NewSubscription {
            tenant_id: plan.tenant_id,
            customer_id: UserId::new(),
            vendor_id: plan.vendor_id,
            seat_count: 1,
            discount_percent: None,
            metadata: Metadata::new(),
        }
    }

    fn charged(commands: &[Command]) -> Vec<i64> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::Charge { amount_cents } => Some(*amount_cents),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_subscribe_grants_and_charges() {
        let plan = plan();
        let now = datetime!(2026-03-01 00:00 UTC);
        let transition = subscribe(new_input(&plan), &plan, now);

        assert_eq!(transition.subscription.status, SubscriptionStatus::Active);
        assert_eq!(
            transition.subscription.current_period_end,
            datetime!(2026-04-01 00:00 UTC)
        );
        assert_eq!(charged(&transition.commands), vec![10000]);
        assert!(matches!(
            transition.commands[0],
            Command::GrantEntitlements { ref definitions, .. } if definitions.len() == 2
        ));
    }

    #[test]
    fn test_start_trial_grants_subset_only() {
        let plan = plan();
        let now = datetime!(2026-03-01 00:00 UTC);
        let transition =
            start_trial(new_input(&plan), &plan, TrialIntent::Evaluation, now).unwrap();

        assert_eq!(transition.subscription.status, SubscriptionStatus::Trialing);
        let trial = transition.subscription.trial.as_ref().unwrap();
        assert_eq!(trial.ends_at, datetime!(2026-03-15 00:00 UTC));
        // No money moves on trial start
        assert!(charged(&transition.commands).is_empty());
        // Only the trial-eligible definition is granted
        assert!(matches!(
            transition.commands[0],
            Command::GrantEntitlements { ref definitions, .. }
                if definitions.len() == 1 && definitions[0].key == "api.access"
        ));
    }

    #[test]
    fn test_start_trial_without_config_is_validation_error() {
        let mut plan = plan();
        plan.trials.clear();
        plan.default_trial = None;
        let err = start_trial(new_input(&plan), &plan, TrialIntent::WinBack, datetime!(2026-03-01 00:00 UTC))
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }

    #[test]
    fn test_convert_trial_restarts_period_at_conversion() {
        let plan = plan();
        let start = datetime!(2026-03-01 00:00 UTC);
        let trial = start_trial(new_input(&plan), &plan, TrialIntent::Evaluation, start)
            .unwrap()
            .subscription;

        // Converted early, on day 5
        let day5 = datetime!(2026-03-06 00:00 UTC);
        let transition = convert_trial(&trial, &plan, day5).unwrap();

        assert_eq!(transition.subscription.status, SubscriptionStatus::Active);
        assert_eq!(transition.subscription.current_period_start, day5);
        assert_eq!(
            transition.subscription.current_period_end,
            datetime!(2026-04-06 00:00 UTC)
        );
        assert_eq!(
            transition.subscription.trial.as_ref().unwrap().converted_at,
            Some(day5)
        );
        // Revoke trial grants, then grant the full set, then bill
        assert!(matches!(transition.commands[0], Command::RevokeEntitlements { .. }));
        assert!(matches!(
            transition.commands[1],
            Command::GrantEntitlements { ref definitions, .. } if definitions.len() == 2
        ));
        assert_eq!(charged(&transition.commands), vec![10000]);
    }

    #[test]
    fn test_convert_non_trialing_is_invalid_state() {
        let plan = plan();
        let now = datetime!(2026-03-01 00:00 UTC);
        let active = subscribe(new_input(&plan), &plan, now).subscription;
        assert!(matches!(
            convert_trial(&active, &plan, now),
            Err(BillingError::InvalidState(_))
        ));
    }

    #[test]
    fn test_convert_trial_invoice_billing() {
        let mut plan = plan();
        plan.billing_type = BillingType::Invoice;
        let start = datetime!(2026-03-01 00:00 UTC);
        let trial = start_trial(new_input(&plan), &plan, TrialIntent::Evaluation, start)
            .unwrap()
            .subscription;
        let transition = convert_trial(&trial, &plan, start).unwrap();
        assert!(transition
            .commands
            .iter()
            .any(|c| matches!(c, Command::CreateInvoice { .. })));
        assert!(charged(&transition.commands).is_empty());
    }

    #[test]
    fn test_change_plan_swaps_unique_entitlements() {
        let old_plan = plan();
        let mut new_plan = old_plan.new_version(PricingModel::Flat { amount_cents: 20000 });
        new_plan
            .entitlements
            .retain(|d| d.key != "exports.bulk");
        new_plan
            .entitlements
            .push(EntitlementDefinition::ungated("sso", EntitlementType::Feature));

        let now = datetime!(2026-03-01 00:00 UTC);
        let sub = subscribe(new_input(&old_plan), &old_plan, now).subscription;
        let config = EngineConfig::default();
        let mid = datetime!(2026-03-16 12:00 UTC);
        let transition =
            change_plan(&sub, &old_plan, &new_plan, ChangeOptions::default(), &config, mid)
                .unwrap();

        assert_eq!(transition.subscription.plan_id, new_plan.id);
        // Period in progress is preserved
        assert_eq!(transition.subscription.current_period_start, now);
        assert!(matches!(
            &transition.commands[0],
            Command::RevokeEntitlements { keys, .. } if keys == &vec!["exports.bulk".to_string()]
        ));
        assert!(matches!(
            &transition.commands[1],
            Command::GrantEntitlements { definitions, .. }
                if definitions.len() == 1 && definitions[0].key == "sso"
        ));
        // Upgrade with half the period left prorates roughly half the diff
        let charges = charged(&transition.commands);
        assert_eq!(charges.len(), 1);
        assert!((4900..=5100).contains(&charges[0]), "got {}", charges[0]);
    }

    #[test]
    fn test_change_plan_reset_period_on_request() {
        let old_plan = plan();
        let new_plan = old_plan.new_version(PricingModel::Flat { amount_cents: 20000 });
        let now = datetime!(2026-03-01 00:00 UTC);
        let sub = subscribe(new_input(&old_plan), &old_plan, now).subscription;
        let mid = datetime!(2026-03-16 00:00 UTC);
        let transition = change_plan(
            &sub,
            &old_plan,
            &new_plan,
            ChangeOptions { reset_period: true },
            &EngineConfig::default(),
            mid,
        )
        .unwrap();
        assert_eq!(transition.subscription.current_period_start, mid);
    }

    #[test]
    fn test_pause_resume_round_trip() {
        let plan = plan();
        let now = datetime!(2026-03-01 00:00 UTC);
        let sub = subscribe(new_input(&plan), &plan, now).subscription;

        let paused = pause(&sub, &plan).unwrap();
        assert_eq!(paused.subscription.status, SubscriptionStatus::Paused);
        assert!(matches!(paused.commands[0], Command::RevokeEntitlements { .. }));

        let resumed = resume(&paused.subscription, &plan).unwrap();
        assert_eq!(resumed.subscription.status, SubscriptionStatus::Active);
        assert!(matches!(resumed.commands[0], Command::GrantEntitlements { .. }));

        // Pausing a paused subscription is invalid
        assert!(pause(&paused.subscription, &plan).is_err());
    }

    #[test]
    fn test_cancel_immediate_revokes_now() {
        let plan = plan();
        let now = datetime!(2026-03-01 00:00 UTC);
        let sub = subscribe(new_input(&plan), &plan, now).subscription;
        let transition = cancel(&sub, &plan, true, now).unwrap();
        assert_eq!(transition.subscription.status, SubscriptionStatus::Canceled);
        assert!(matches!(transition.commands[0], Command::RevokeEntitlements { .. }));
    }

    #[test]
    fn test_cancel_scheduled_keeps_access_until_expiry() {
        let plan = plan();
        let now = datetime!(2026-03-01 00:00 UTC);
        let sub = subscribe(new_input(&plan), &plan, now).subscription;
        let transition = cancel(&sub, &plan, false, now).unwrap();

        assert_eq!(transition.subscription.status, SubscriptionStatus::Active);
        assert!(transition.subscription.cancel_at_period_end);
        assert!(!transition
            .commands
            .iter()
            .any(|c| matches!(c, Command::RevokeEntitlements { .. })));

        // Not yet due
        assert!(expire(&transition.subscription, &plan, now).is_err());
        // After period end the sweep expires and revokes
        let later = datetime!(2026-04-02 00:00 UTC);
        let expired = expire(&transition.subscription, &plan, later).unwrap();
        assert_eq!(expired.subscription.status, SubscriptionStatus::Expired);
        assert!(matches!(expired.commands[0], Command::RevokeEntitlements { .. }));
    }

    #[test]
    fn test_suspend_reinstate_restores_prior_status() {
        let plan = plan();
        let now = datetime!(2026-03-01 00:00 UTC);
        let mut sub = subscribe(new_input(&plan), &plan, now).subscription;
        sub.status = SubscriptionStatus::PastDue;

        let suspended = suspend(&sub, &plan).unwrap();
        assert_eq!(suspended.subscription.status, SubscriptionStatus::Suspended);

        let reinstated = reinstate(&suspended.subscription, &plan).unwrap();
        assert_eq!(reinstated.subscription.status, SubscriptionStatus::PastDue);
    }

    #[test]
    fn test_renew_rolls_period_and_applies_credit() {
        let plan = plan();
        let now = datetime!(2026-03-01 00:00 UTC);
        let mut sub = subscribe(new_input(&plan), &plan, now).subscription;
        sub.pending_credit_cents = 3000;

        let due = datetime!(2026-04-01 00:00 UTC);
        let transition = renew(&sub, &plan, due).unwrap();
        assert_eq!(
            transition.subscription.current_period_start,
            datetime!(2026-04-01 00:00 UTC)
        );
        assert_eq!(
            transition.subscription.current_period_end,
            datetime!(2026-05-01 00:00 UTC)
        );
        assert_eq!(charged(&transition.commands), vec![7000]);
        assert_eq!(transition.subscription.pending_credit_cents, 0);
    }

    #[test]
    fn test_renew_bills_usage_overage_then_resets_counter() {
        let mut plan = plan();
        plan.pricing = PricingModel::Usage {
            base_cents: 2000,
            price_per_unit_cents: 5,
            included_units: 100,
        };
        let now = datetime!(2026-03-01 00:00 UTC);
        let mut sub = subscribe(new_input(&plan), &plan, now).subscription;

        sub = record_usage(&sub, 340).unwrap().subscription;
        assert_eq!(sub.usage_units, 340);

        let transition = renew(&sub, &plan, datetime!(2026-04-01 00:00 UTC)).unwrap();
        // base + 240 units over the allotment
        assert_eq!(charged(&transition.commands), vec![2000 + 240 * 5]);
        assert_eq!(transition.subscription.usage_units, 0);
    }

    #[test]
    fn test_update_seats_takes_effect_without_rebilling() {
        let plan = plan();
        let now = datetime!(2026-03-01 00:00 UTC);
        let sub = subscribe(new_input(&plan), &plan, now).subscription;

        let transition = update_seats(&sub, 5).unwrap();
        assert_eq!(transition.subscription.seat_count, 5);
        assert!(charged(&transition.commands).is_empty());

        assert!(matches!(
            update_seats(&sub, 0),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_update_seats_cannot_shrink_below_occupied() {
        let plan = plan();
        let now = datetime!(2026-03-01 00:00 UTC);
        let mut sub = subscribe(new_input(&plan), &plan, now).subscription;
        sub.seat_count = 3;
        sub.assign_seat(UserId::new(), now).unwrap();
        sub.assign_seat(UserId::new(), now).unwrap();

        assert!(matches!(
            update_seats(&sub, 1),
            Err(BillingError::InvalidState(_))
        ));
        assert!(update_seats(&sub, 2).is_ok());
    }

    #[test]
    fn test_convert_trial_does_not_bill_trial_usage() {
        let mut plan = plan();
        plan.pricing = PricingModel::Usage {
            base_cents: 2000,
            price_per_unit_cents: 5,
            included_units: 0,
        };
        let start = datetime!(2026-03-01 00:00 UTC);
        let mut trial = start_trial(new_input(&plan), &plan, TrialIntent::Evaluation, start)
            .unwrap()
            .subscription;
        trial = record_usage(&trial, 500).unwrap().subscription;

        let transition = convert_trial(&trial, &plan, start).unwrap();
        assert_eq!(charged(&transition.commands), vec![2000]);
        assert_eq!(transition.subscription.usage_units, 0);
    }

    #[test]
    fn test_payment_failure_escalation_and_recovery() {
        let plan = plan();
        let config = EngineConfig::default();
        let now = datetime!(2026-03-01 00:00 UTC);
        let mut sub = subscribe(new_input(&plan), &plan, now).subscription;

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let transition = payment_failed(&sub, &plan, &config, now).unwrap();
            sub = transition.subscription;
            statuses.push(sub.dunning_status);
            // Access preserved below the terminal step
            assert_eq!(sub.status, SubscriptionStatus::PastDue);
        }
        assert_eq!(
            statuses,
            vec![
                DunningStatus::PastDue,
                DunningStatus::GracePeriod,
                DunningStatus::FinalNotice
            ]
        );

        // Fourth failure terminates access
        let transition = payment_failed(&sub, &plan, &config, now).unwrap();
        assert_eq!(transition.subscription.status, SubscriptionStatus::Unpaid);
        assert!(transition
            .commands
            .iter()
            .any(|c| matches!(c, Command::RevokeEntitlements { .. })));
        sub = transition.subscription;

        // A successful retry resets the counter to exactly zero and re-grants
        let transition = payment_succeeded(&sub, &plan, "txn_retry", 10000, now).unwrap();
        assert_eq!(transition.subscription.failed_payment_count, 0);
        assert_eq!(transition.subscription.status, SubscriptionStatus::Active);
        assert_eq!(transition.subscription.dunning_status, DunningStatus::Clear);
        assert!(matches!(transition.commands[0], Command::GrantEntitlements { .. }));
        assert!(transition.commands.iter().any(|c| matches!(
            c,
            Command::Publish(DomainEvent::DunningRecovered { .. })
        )));
    }
}
