use crate::error::{NetSalesError, Result};
use chrono::{Datelike, Days, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};

pub fn first_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        NetSalesError::DateError(format!("Invalid year/month: {:04}-{:02}", year, month))
    })
}

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    first_day_of_month(next_year, next_month)?
        .checked_sub_days(Days::new(1))
        .ok_or_else(|| {
            NetSalesError::DateError(format!("No month end for {:04}-{:02}", year, month))
        })
}

/// Rounds a currency amount half away from zero, matching SQL `ROUND`.
/// The result always carries exactly `scale` decimal places.
pub fn round_currency(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

/// Parses a period string in the format "YYYY-MM" or "YYYY-MM:YYYY-MM"
/// Returns (start_date, end_date), both inclusive.
pub fn parse_period_string(period: &str) -> Result<(NaiveDate, NaiveDate)> {
    let parts: Vec<&str> = period.split(':').collect();

    let parse_month = |part: &str, label: &str| -> Result<NaiveDate> {
        let month_str = format!("{}-01", part.trim());
        NaiveDate::parse_from_str(&month_str, "%Y-%m-%d").map_err(|_| {
            NetSalesError::DateError(format!(
                "Invalid {}date format in period: {}. Expected YYYY-MM",
                label, part
            ))
        })
    };

    match parts.as_slice() {
        [single] => {
            let start_date = parse_month(single, "")?;
            let end_date = last_day_of_month(start_date.year(), start_date.month())?;
            Ok((start_date, end_date))
        }
        [start, end] => {
            let start_date = parse_month(start, "start ")?;
            let end_ref = parse_month(end, "end ")?;
            let end_date = last_day_of_month(end_ref.year(), end_ref.month())?;

            if end_date < start_date {
                return Err(NetSalesError::DateError(format!(
                    "Period '{}' ends before it starts",
                    period
                )));
            }
            Ok((start_date, end_date))
        }
        _ => Err(NetSalesError::DateError(format!(
            "Invalid period format: {}. Expected 'YYYY-MM' or 'YYYY-MM:YYYY-MM'",
            period
        ))),
    }
}
