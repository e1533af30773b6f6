//! Pricing models and period amount calculation
//!
//! All money is cents as `i64`. Intermediate math runs in `f64` and the
//! result is rounded exactly once, so stacked discounts never compound
//! rounding error.

use serde::{Deserialize, Serialize};

/// Volume discount tier for per-seat pricing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeDiscount {
    /// Minimum seats to qualify
    pub min_seats: u32,
    /// Discount percentage (0-100)
    pub discount_percent: f64,
}

/// Pricing model for a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PricingModel {
    /// Fixed amount per billing period
    Flat { amount_cents: i64 },

    /// Fixed amount charged once at subscription start
    OneTime { amount_cents: i64 },

    /// Price per seat, with optional volume discounts
    PerSeat {
        price_per_seat_cents: i64,
        #[serde(default)]
        volume_discounts: Vec<VolumeDiscount>,
    },

    /// Base amount plus per-seat pricing beyond an included allotment
    BaseSeat {
        base_cents: i64,
        price_per_seat_cents: i64,
        included_seats: u32,
    },

    /// Base amount plus metered usage beyond an included allotment
    Usage {
        base_cents: i64,
        price_per_unit_cents: i64,
        included_units: u64,
    },
}

impl PricingModel {
    /// Whether this model bills once rather than per period
    pub fn is_one_time(&self) -> bool {
        matches!(self, Self::OneTime { .. })
    }

    /// Gross amount due for a period, in cents
    ///
    /// `discount_percent` is the subscription-level discount, applied last.
    /// Volume discounts pick the steepest applicable tier. The result is
    /// never negative and rounding happens only at the end.
    pub fn amount_cents(&self, seats: u32, usage: u64, discount_percent: Option<f64>) -> i64 {
        let raw: f64 = match self {
            Self::Flat { amount_cents } | Self::OneTime { amount_cents } => {
                *amount_cents as f64
            }
            Self::PerSeat {
                price_per_seat_cents,
                volume_discounts,
            } => {
                let gross = *price_per_seat_cents as f64 * f64::from(seats);
                match steepest_discount(volume_discounts, seats) {
                    Some(percent) => gross * (1.0 - percent / 100.0),
                    None => gross,
                }
            }
            Self::BaseSeat {
                base_cents,
                price_per_seat_cents,
                included_seats,
            } => {
                let billable = seats.saturating_sub(*included_seats);
                *base_cents as f64 + *price_per_seat_cents as f64 * f64::from(billable)
            }
            Self::Usage {
                base_cents,
                price_per_unit_cents,
                included_units,
            } => {
                let billable = usage.saturating_sub(*included_units);
                *base_cents as f64 + *price_per_unit_cents as f64 * billable as f64
            }
        };

        let discounted = match discount_percent {
            Some(percent) if percent > 0.0 => raw * (1.0 - percent / 100.0),
            _ => raw,
        };

        (discounted.round() as i64).max(0)
    }
}

/// Steepest applicable volume discount for a seat count
///
/// Ties between equally-qualified tiers break toward the larger discount.
fn steepest_discount(tiers: &[VolumeDiscount], seats: u32) -> Option<f64> {
    tiers
        .iter()
        .filter(|t| seats >= t.min_seats)
        .map(|t| t.discount_percent)
        .fold(None, |best, d| match best {
            Some(b) if b >= d => Some(b),
            _ => Some(d),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_amount() {
        let model = PricingModel::Flat { amount_cents: 2999 };
        assert_eq!(model.amount_cents(0, 0, None), 2999);
        assert_eq!(model.amount_cents(10, 500, None), 2999);
    }

    #[test]
    fn test_per_seat_volume_discount_scenario() {
        // $10/seat, 10% off at 20+ seats, 25 seats => 25 x 10 x 0.9 = $225.00
        let model = PricingModel::PerSeat {
            price_per_seat_cents: 1000,
            volume_discounts: vec![VolumeDiscount {
                min_seats: 20,
                discount_percent: 10.0,
            }],
        };
        assert_eq!(model.amount_cents(25, 0, None), 22500);
        // Below the tier, no discount
        assert_eq!(model.amount_cents(19, 0, None), 19000);
    }

    #[test]
    fn test_per_seat_steepest_tier_wins() {
        let model = PricingModel::PerSeat {
            price_per_seat_cents: 1000,
            volume_discounts: vec![
                VolumeDiscount {
                    min_seats: 10,
                    discount_percent: 5.0,
                },
                VolumeDiscount {
                    min_seats: 50,
                    discount_percent: 20.0,
                },
                VolumeDiscount {
                    min_seats: 50,
                    discount_percent: 15.0,
                },
            ],
        };
        // Both 50-seat tiers qualify; the larger discount applies
        assert_eq!(model.amount_cents(60, 0, None), 48000);
        // Only the 10-seat tier qualifies
        assert_eq!(model.amount_cents(12, 0, None), 11400);
    }

    #[test]
    fn test_base_seat_included_allotment() {
        let model = PricingModel::BaseSeat {
            base_cents: 5000,
            price_per_seat_cents: 800,
            included_seats: 5,
        };
        // Seats at or under the allotment bill the base only
        assert_eq!(model.amount_cents(0, 0, None), 5000);
        assert_eq!(model.amount_cents(5, 0, None), 5000);
        assert_eq!(model.amount_cents(8, 0, None), 5000 + 3 * 800);
    }

    #[test]
    fn test_usage_included_allotment() {
        let model = PricingModel::Usage {
            base_cents: 2000,
            price_per_unit_cents: 3,
            included_units: 1_000,
        };
        assert_eq!(model.amount_cents(0, 0, None), 2000);
        assert_eq!(model.amount_cents(0, 1_000, None), 2000);
        assert_eq!(model.amount_cents(0, 1_500, None), 2000 + 500 * 3);
    }

    #[test]
    fn test_subscription_discount_applies_last() {
        let model = PricingModel::PerSeat {
            price_per_seat_cents: 1000,
            volume_discounts: vec![VolumeDiscount {
                min_seats: 20,
                discount_percent: 10.0,
            }],
        };
        // 25 x 10 x 0.9 x 0.8 = $180.00
        assert_eq!(model.amount_cents(25, 0, Some(20.0)), 18000);
    }

    #[test]
    fn test_stacked_discounts_round_once() {
        // 999 * 0.85 * 0.93 = 789.7095, rounded once at the end
        let model = PricingModel::PerSeat {
            price_per_seat_cents: 333,
            volume_discounts: vec![VolumeDiscount {
                min_seats: 2,
                discount_percent: 15.0,
            }],
        };
        assert_eq!(model.amount_cents(3, 0, Some(7.0)), 790);
    }

    #[test]
    fn test_amount_never_negative() {
        let model = PricingModel::Flat { amount_cents: 100 };
        assert_eq!(model.amount_cents(0, 0, Some(150.0)), 0);
    }
}
