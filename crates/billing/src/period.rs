//! Billing period arithmetic
//!
//! Pure calendar math for period boundaries. Month, quarter, and year
//! intervals follow calendar semantics: adding a month to Jan 31 lands on
//! Feb 28 (or 29), not an error and not Mar 2/3.

use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime};

/// Recurring billing interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl BillingInterval {
    /// Approximate length in months, used for revenue normalization
    pub fn months(&self) -> f64 {
        match self {
            Self::Day => 1.0 / 30.0,
            Self::Week => 7.0 / 30.0,
            Self::Month => 1.0,
            Self::Quarter => 3.0,
            Self::Year => 12.0,
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
            Self::Quarter => write!(f, "quarter"),
            Self::Year => write!(f, "year"),
        }
    }
}

/// Compute the end of a period starting at `start`
///
/// `count` is clamped to at least 1. The result is always strictly after
/// `start`. Day-of-month overflow clamps to the last day of the target
/// month.
pub fn advance(start: OffsetDateTime, interval: BillingInterval, count: u32) -> OffsetDateTime {
    let count = count.max(1);
    match interval {
        BillingInterval::Day => start + Duration::days(i64::from(count)),
        BillingInterval::Week => start + Duration::weeks(i64::from(count)),
        BillingInterval::Month => add_months(start, i32::try_from(count).unwrap_or(i32::MAX)),
        BillingInterval::Quarter => {
            add_months(start, i32::try_from(count).unwrap_or(i32::MAX / 3).saturating_mul(3))
        }
        BillingInterval::Year => {
            add_months(start, i32::try_from(count).unwrap_or(i32::MAX / 12).saturating_mul(12))
        }
    }
}

/// Fraction of the period [start, end) still ahead of `now`, in [0, 1]
///
/// Used for proration. Degenerate periods return 0.
pub fn fraction_remaining(
    now: OffsetDateTime,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> f64 {
    if end <= start {
        return 0.0;
    }
    let total = (end - start).whole_seconds() as f64;
    if total <= 0.0 {
        return 0.0;
    }
    let left = (end - now).whole_seconds() as f64;
    (left / total).clamp(0.0, 1.0)
}

fn add_months(start: OffsetDateTime, months: i32) -> OffsetDateTime {
    let date = start.date();
    let zero_based =
        i64::from(date.year()) * 12 + i64::from(date.month() as u8) - 1 + i64::from(months);
    let year = i32::try_from(zero_based.div_euclid(12)).unwrap_or(date.year());
    let month_number = zero_based.rem_euclid(12) as u8 + 1;
    // month_number is always 1..=12 here
    let month = Month::try_from(month_number).unwrap_or(Month::January);
    let day = date.day().min(time::util::days_in_year_month(year, month));
    // clamped day is always valid for (year, month)
    let new_date = Date::from_calendar_date(year, month, day).unwrap_or(date);
    PrimitiveDateTime::new(new_date, start.time()).assume_offset(start.offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_day_and_week_intervals() {
        let start = datetime!(2026-03-10 09:00 UTC);
        assert_eq!(
            advance(start, BillingInterval::Day, 1),
            datetime!(2026-03-11 09:00 UTC)
        );
        assert_eq!(
            advance(start, BillingInterval::Week, 2),
            datetime!(2026-03-24 09:00 UTC)
        );
    }

    #[test]
    fn test_month_rollover_clamps_day() {
        let start = datetime!(2026-01-31 00:00 UTC);
        assert_eq!(
            advance(start, BillingInterval::Month, 1),
            datetime!(2026-02-28 00:00 UTC)
        );
        // Leap year
        let start = datetime!(2028-01-31 00:00 UTC);
        assert_eq!(
            advance(start, BillingInterval::Month, 1),
            datetime!(2028-02-29 00:00 UTC)
        );
    }

    #[test]
    fn test_quarter_crosses_year_boundary() {
        let start = datetime!(2026-11-30 12:00 UTC);
        assert_eq!(
            advance(start, BillingInterval::Quarter, 1),
            datetime!(2027-02-28 12:00 UTC)
        );
    }

    #[test]
    fn test_year_interval_leap_day() {
        let start = datetime!(2028-02-29 00:00 UTC);
        assert_eq!(
            advance(start, BillingInterval::Year, 1),
            datetime!(2029-02-28 00:00 UTC)
        );
    }

    #[test]
    fn test_zero_count_treated_as_one() {
        let start = datetime!(2026-06-15 00:00 UTC);
        assert_eq!(
            advance(start, BillingInterval::Month, 0),
            datetime!(2026-07-15 00:00 UTC)
        );
    }

    #[test]
    fn test_end_always_after_start() {
        let start = datetime!(2026-01-31 23:59 UTC);
        for interval in [
            BillingInterval::Day,
            BillingInterval::Week,
            BillingInterval::Month,
            BillingInterval::Quarter,
            BillingInterval::Year,
        ] {
            for count in [1, 2, 12] {
                assert!(advance(start, interval, count) > start, "{interval} x{count}");
            }
        }
    }

    #[test]
    fn test_fraction_remaining_bounds() {
        let start = datetime!(2026-01-01 00:00 UTC);
        let end = datetime!(2026-01-31 00:00 UTC);

        assert_eq!(fraction_remaining(start, start, end), 1.0);
        assert_eq!(fraction_remaining(end, start, end), 0.0);

        let mid = datetime!(2026-01-16 00:00 UTC);
        let f = fraction_remaining(mid, start, end);
        assert!(f > 0.49 && f < 0.51, "got {f}");

        // Degenerate period
        assert_eq!(fraction_remaining(start, end, start), 0.0);
        // Before the period starts, clamp at 1
        let early = datetime!(2025-12-01 00:00 UTC);
        assert_eq!(fraction_remaining(early, start, end), 1.0);
    }
}
