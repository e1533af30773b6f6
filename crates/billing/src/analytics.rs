//! Revenue and lifecycle analytics
//!
//! Per-tenant aggregates other modules render: recurring revenue, churn,
//! and trial conversion. Pure computation over loaded records; the engine
//! façade does the loading.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use vendhub_shared::types::{PlanId, VendorId};

use crate::catalog::Plan;
use crate::subscription::{Subscription, SubscriptionStatus};

/// Point-in-time analytics for a tenant (optionally one vendor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    /// Monthly recurring revenue, normalized across billing intervals
    pub mrr_cents: i64,
    /// Annualized recurring revenue (12 x MRR)
    pub arr_cents: i64,
    /// (canceled + expired) / all subscriptions ever created
    pub churn_rate: f64,
    /// Converted trials / trials started
    pub trial_conversion_rate: f64,
    pub total_subscriptions: usize,
    pub active_subscriptions: usize,
    pub trialing_subscriptions: usize,
    pub past_due_subscriptions: usize,
}

/// Compute analytics over a tenant's subscriptions
///
/// Subscriptions whose plan is missing from `plans` are counted but
/// contribute no revenue. One-time plans never contribute to MRR.
pub fn compute(
    subscriptions: &[Subscription],
    plans: &HashMap<PlanId, Plan>,
    vendor_id: Option<VendorId>,
) -> AnalyticsSnapshot {
    let scoped: Vec<&Subscription> = subscriptions
        .iter()
        .filter(|s| vendor_id.map_or(true, |v| s.vendor_id == v))
        .collect();

    let mut mrr = 0.0_f64;
    let mut active = 0;
    let mut trialing = 0;
    let mut past_due = 0;
    let mut churned = 0;
    let mut trials_started = 0;
    let mut trials_converted = 0;

    for subscription in &scoped {
        match subscription.status {
            SubscriptionStatus::Active => active += 1,
            SubscriptionStatus::Trialing => trialing += 1,
            SubscriptionStatus::PastDue => past_due += 1,
            SubscriptionStatus::Canceled | SubscriptionStatus::Expired => churned += 1,
            _ => {}
        }
        if let Some(trial) = &subscription.trial {
            trials_started += 1;
            if trial.converted_at.is_some() {
                trials_converted += 1;
            }
        }
        let recurring = matches!(
            subscription.status,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue
        );
        if recurring {
            if let Some(plan) = plans.get(&subscription.plan_id) {
                if !plan.pricing.is_one_time() {
                    let amount = plan.pricing.amount_cents(
                        subscription.seat_count,
                        subscription.usage_units,
                        subscription.discount_percent,
                    );
                    let months = plan.interval.interval.months()
                        * f64::from(plan.interval.interval_count.max(1));
                    mrr += amount as f64 / months;
                }
            }
        }
    }

    let total = scoped.len();
    let mrr_cents = mrr.round() as i64;
    AnalyticsSnapshot {
        mrr_cents,
        arr_cents: mrr_cents * 12,
        churn_rate: ratio(churned, total),
        trial_conversion_rate: ratio(trials_converted, trials_started),
        total_subscriptions: total,
        active_subscriptions: active,
        trialing_subscriptions: trialing,
        past_due_subscriptions: past_due,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BillingType, IntervalConfig};
    use crate::dunning::DunningStatus;
    use crate::period::BillingInterval;
    use crate::pricing::PricingModel;
    use crate::subscription::TrialWindow;
    use crate::catalog::TrialIntent;
    use time::macros::datetime;
    use vendhub_shared::types::{Metadata, SubscriptionId, TenantId, UserId};

    fn plan(amount_cents: i64, interval: BillingInterval) -> Plan {
        Plan {
            id: PlanId::new(),
            tenant_id: TenantId::new(),
            vendor_id: VendorId::new(),
            name: "Plan".to_string(),
            version: 1,
            supersedes: None,
            pricing: PricingModel::Flat { amount_cents },
            interval: IntervalConfig {
                interval,
                interval_count: 1,
            },
            billing_type: BillingType::Charge,
            currency: "USD".to_string(),
            fee_percent: 20.0,
            entitlements: vec![],
            trials: vec![],
            default_trial: None,
            metadata: Metadata::new(),
            created_at: datetime!(2026-01-01 00:00 UTC),
        }
    }

    fn subscription(plan: &Plan, status: SubscriptionStatus) -> Subscription {
        Subscription {
            id: SubscriptionId::new(),
            tenant_id: plan.tenant_id,
            customer_id: UserId::new(),
            vendor_id: plan.vendor_id,
            plan_id: plan.id,
            status,
            current_period_start: datetime!(2026-01-01 00:00 UTC),
            current_period_end: datetime!(2026-02-01 00:00 UTC),
            trial: None,
            seat_count: 1,
            usage_units: 0,
            discount_percent: None,
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
            metadata: Metadata::new(),
            created_at: datetime!(2026-01-01 00:00 UTC),
            updated_at: datetime!(2026-01-01 00:00 UTC),
            revision: 0,
        }
    }

    #[test]
    fn test_mrr_normalizes_annual_plans() {
        let monthly = plan(1000, BillingInterval::Month);
        let annual = plan(12000, BillingInterval::Year);
        let plans: HashMap<_, _> =
            [(monthly.id, monthly.clone()), (annual.id, annual.clone())].into();

        let subs = vec![
            subscription(&monthly, SubscriptionStatus::Active),
            subscription(&annual, SubscriptionStatus::Active),
        ];
        let snapshot = compute(&subs, &plans, None);
        assert_eq!(snapshot.mrr_cents, 2000);
        assert_eq!(snapshot.arr_cents, 24000);
    }

    #[test]
    fn test_only_recurring_statuses_contribute() {
        let monthly = plan(1000, BillingInterval::Month);
        let plans: HashMap<_, _> = [(monthly.id, monthly.clone())].into();
        let subs = vec![
            subscription(&monthly, SubscriptionStatus::Active),
            subscription(&monthly, SubscriptionStatus::PastDue),
            subscription(&monthly, SubscriptionStatus::Paused),
            subscription(&monthly, SubscriptionStatus::Canceled),
            subscription(&monthly, SubscriptionStatus::Unpaid),
        ];
        let snapshot = compute(&subs, &plans, None);
        assert_eq!(snapshot.mrr_cents, 2000);
        assert_eq!(snapshot.total_subscriptions, 5);
        assert_eq!(snapshot.past_due_subscriptions, 1);
    }

    #[test]
    fn test_churn_and_trial_conversion() {
        let monthly = plan(1000, BillingInterval::Month);
        let plans: HashMap<_, _> = [(monthly.id, monthly.clone())].into();

        let mut converted = subscription(&monthly, SubscriptionStatus::Active);
        converted.trial = Some(TrialWindow {
            intent: TrialIntent::Evaluation,
            started_at: datetime!(2026-01-01 00:00 UTC),
            ends_at: datetime!(2026-01-15 00:00 UTC),
            converted_at: Some(datetime!(2026-01-05 00:00 UTC)),
        });
        let mut abandoned = subscription(&monthly, SubscriptionStatus::Expired);
        abandoned.trial = Some(TrialWindow {
            intent: TrialIntent::Evaluation,
            started_at: datetime!(2026-01-01 00:00 UTC),
            ends_at: datetime!(2026-01-15 00:00 UTC),
            converted_at: None,
        });
        let subs = vec![
            converted,
            abandoned,
            subscription(&monthly, SubscriptionStatus::Canceled),
            subscription(&monthly, SubscriptionStatus::Active),
        ];

        let snapshot = compute(&subs, &plans, None);
        assert_eq!(snapshot.churn_rate, 0.5);
        assert_eq!(snapshot.trial_conversion_rate, 0.5);
    }

    #[test]
    fn test_vendor_scoping() {
        let plan_a = plan(1000, BillingInterval::Month);
        let plan_b = plan(5000, BillingInterval::Month);
        let plans: HashMap<_, _> =
            [(plan_a.id, plan_a.clone()), (plan_b.id, plan_b.clone())].into();
        let subs = vec![
            subscription(&plan_a, SubscriptionStatus::Active),
            subscription(&plan_b, SubscriptionStatus::Active),
        ];

        let scoped = compute(&subs, &plans, Some(plan_a.vendor_id));
        assert_eq!(scoped.mrr_cents, 1000);
        assert_eq!(scoped.total_subscriptions, 1);
    }

    #[test]
    fn test_empty_tenant() {
        let snapshot = compute(&[], &HashMap::new(), None);
        assert_eq!(snapshot.mrr_cents, 0);
        assert_eq!(snapshot.churn_rate, 0.0);
        assert_eq!(snapshot.trial_conversion_rate, 0.0);
    }
}
