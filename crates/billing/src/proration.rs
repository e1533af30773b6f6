//! Plan-change proration
//!
//! When a plan changes mid-period, the configured behavior decides whether
//! the price difference settles now, later, or as a credit. The immediate
//! cases settle the net of an unused-time credit on the old plan against a
//! pro-rated charge on the new plan, computed linearly on the fraction of
//! the period remaining and rounded once.

use serde::{Deserialize, Serialize};

/// What to do with the price difference on a mid-period plan change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationBehavior {
    /// Charge or forgive the pro-rated difference immediately
    ImmediateProrate,
    /// Charge the full new-plan amount now and restart the period
    ImmediateFull,
    /// No adjustment; the new price takes effect at the next renewal
    NextCycle,
    /// Like `ImmediateProrate`, but a downgrade surplus becomes a credit
    /// line on the next invoice instead of being forgiven
    CreateCredit,
}

/// Settlement decided for a plan change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProrationOutcome {
    /// Collect this amount now
    ChargeNow { amount_cents: i64 },
    /// Carry this amount as a credit into the next billing cycle
    CreditNext { amount_cents: i64 },
    /// Nothing owed either way
    NoCharge,
}

/// Resolve a plan change into a settlement and period handling
///
/// `fraction_remaining` is the unused share of the current period in
/// [0, 1]. Returns the outcome and whether the period restarts now.
pub fn plan_change(
    behavior: ProrationBehavior,
    old_amount_cents: i64,
    new_amount_cents: i64,
    fraction_remaining: f64,
) -> (ProrationOutcome, bool) {
    let fraction = fraction_remaining.clamp(0.0, 1.0);
    match behavior {
        ProrationBehavior::NextCycle => (ProrationOutcome::NoCharge, false),
        ProrationBehavior::ImmediateFull => (
            ProrationOutcome::ChargeNow {
                amount_cents: new_amount_cents.max(0),
            },
            true,
        ),
        ProrationBehavior::ImmediateProrate | ProrationBehavior::CreateCredit => {
            let net = ((new_amount_cents - old_amount_cents) as f64 * fraction).round() as i64;
            if net > 0 {
                (ProrationOutcome::ChargeNow { amount_cents: net }, false)
            } else if net < 0 && behavior == ProrationBehavior::CreateCredit {
                (ProrationOutcome::CreditNext { amount_cents: -net }, false)
            } else {
                // Downgrade surplus is forgiven; the period is already paid
                (ProrationOutcome::NoCharge, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_cycle_defers() {
        let (outcome, reset) = plan_change(ProrationBehavior::NextCycle, 1000, 5000, 0.5);
        assert_eq!(outcome, ProrationOutcome::NoCharge);
        assert!(!reset);
    }

    #[test]
    fn test_immediate_full_restarts_period() {
        let (outcome, reset) = plan_change(ProrationBehavior::ImmediateFull, 1000, 5000, 0.5);
        assert_eq!(outcome, ProrationOutcome::ChargeNow { amount_cents: 5000 });
        assert!(reset);
    }

    #[test]
    fn test_prorated_upgrade_charges_difference() {
        // Half the period left on a 10 -> 30 upgrade: (3000-1000) * 0.5
        let (outcome, reset) =
            plan_change(ProrationBehavior::ImmediateProrate, 1000, 3000, 0.5);
        assert_eq!(outcome, ProrationOutcome::ChargeNow { amount_cents: 1000 });
        assert!(!reset);
    }

    #[test]
    fn test_prorated_downgrade_forgiven() {
        let (outcome, _) = plan_change(ProrationBehavior::ImmediateProrate, 3000, 1000, 0.5);
        assert_eq!(outcome, ProrationOutcome::NoCharge);
    }

    #[test]
    fn test_downgrade_credit() {
        let (outcome, _) = plan_change(ProrationBehavior::CreateCredit, 3000, 1000, 0.5);
        assert_eq!(outcome, ProrationOutcome::CreditNext { amount_cents: 1000 });
    }

    #[test]
    fn test_period_end_boundary_owes_nothing() {
        let (outcome, _) = plan_change(ProrationBehavior::ImmediateProrate, 1000, 9000, 0.0);
        assert_eq!(outcome, ProrationOutcome::NoCharge);
    }
}
