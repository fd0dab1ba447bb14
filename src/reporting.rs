//! Yearly rollups and rankings over computed records.

use crate::aggregation::{add_checked, sum_by_bucket, BatchQuery, EntityKind, Measure, SalesFact};
use crate::error::{NetSalesError, Result};
use crate::fiscal::FiscalYear;
use crate::utils::round_currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalYearTotal {
    pub fiscal_year: FiscalYear,
    pub entity: Option<String>,
    pub measure: Measure,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntity {
    /// 1-based.
    pub rank: usize,
    pub entity: String,
    pub net_sales: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityShare {
    pub entity: String,
    pub net_sales: Decimal,
    /// Percentage of the year's net sales, two decimals.
    pub share_pct: Decimal,
}

/// Same grouping as `aggregate`, bucketed by fiscal year instead of month.
pub fn fiscal_year_totals<T: SalesFact>(
    records: &[T],
    query: &BatchQuery,
) -> Result<Vec<FiscalYearTotal>> {
    if query.keys.is_empty() {
        return Ok(Vec::new());
    }

    let groups = sum_by_bucket(records, query, |r| r.fiscal_year())?;

    Ok(groups
        .into_iter()
        .map(|((fiscal_year, entity), value)| FiscalYearTotal {
            fiscal_year,
            entity,
            measure: query.measure,
            value,
        })
        .collect())
}

fn net_sales_by_entity<T: SalesFact>(
    records: &[T],
    dimension: EntityKind,
    fiscal_year: FiscalYear,
) -> Result<BTreeMap<String, Decimal>> {
    let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();

    for record in records.iter().filter(|r| r.fiscal_year() == fiscal_year) {
        let Some(entity) = record.entity(dimension) else {
            continue;
        };
        let net_sales = record.measure(Measure::NetSales).ok_or_else(|| {
            NetSalesError::InvalidInput("Ranking requires records with net sales".to_string())
        })?;
        add_checked(totals.entry(entity.to_string()).or_default(), net_sales)?;
    }

    Ok(totals)
}

fn descending(totals: BTreeMap<String, Decimal>) -> Vec<(String, Decimal)> {
    let mut ordered: Vec<(String, Decimal)> = totals.into_iter().collect();
    // Stable sort keeps ascending key order among equal totals.
    ordered.sort_by(|a, b| b.1.cmp(&a.1));
    ordered
}

pub fn top_n<T: SalesFact>(
    records: &[T],
    dimension: EntityKind,
    fiscal_year: FiscalYear,
    n: usize,
) -> Result<Vec<RankedEntity>> {
    let ordered = descending(net_sales_by_entity(records, dimension, fiscal_year)?);

    Ok(ordered
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, (entity, net_sales))| RankedEntity {
            rank: i + 1,
            entity,
            net_sales,
        })
        .collect())
}

/// Each entity's share of the year's net sales, largest first. A zero total
/// gives every entity a zero share.
pub fn net_sales_share<T: SalesFact>(
    records: &[T],
    dimension: EntityKind,
    fiscal_year: FiscalYear,
) -> Result<Vec<EntityShare>> {
    let totals = net_sales_by_entity(records, dimension, fiscal_year)?;
    let mut grand_total = Decimal::ZERO;
    for net_sales in totals.values() {
        add_checked(&mut grand_total, *net_sales)?;
    }

    descending(totals)
        .into_iter()
        .map(|(entity, net_sales)| {
            let share_pct = if grand_total.is_zero() {
                round_currency(Decimal::ZERO, 2)
            } else {
                round_currency(share_of(net_sales, grand_total)?, 2)
            };
            Ok(EntityShare {
                entity,
                net_sales,
                share_pct,
            })
        })
        .collect()
}

/// `part` as a percentage of a non-zero `total`. Multiplies first for
/// precision and divides first only when the product would not fit.
fn share_of(part: Decimal, total: Decimal) -> Result<Decimal> {
    part.checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|scaled| scaled.checked_div(total))
        .or_else(|| {
            part.checked_div(total)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        })
        .ok_or_else(|| {
            NetSalesError::InvalidInput(format!("Share of {part} in {total} does not fit"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{EntityKeys, GroupBy};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    struct Row {
        date: NaiveDate,
        fiscal_year: FiscalYear,
        customer: &'static str,
        market: &'static str,
        net_sales: Decimal,
    }

    impl SalesFact for Row {
        fn date(&self) -> NaiveDate {
            self.date
        }
        fn fiscal_year(&self) -> FiscalYear {
            self.fiscal_year
        }
        fn customer_code(&self) -> &str {
            self.customer
        }
        fn product_code(&self) -> &str {
            "P1"
        }
        fn market(&self) -> Option<&str> {
            Some(self.market)
        }
        fn measure(&self, measure: Measure) -> Option<Decimal> {
            match measure {
                Measure::NetSales => Some(self.net_sales),
                _ => None,
            }
        }
    }

    fn row(fy: i32, customer: &'static str, market: &'static str, net: Decimal) -> Row {
        Row {
            date: NaiveDate::from_ymd_opt(fy, 1, 1).unwrap(),
            fiscal_year: FiscalYear(fy),
            customer,
            market,
            net_sales: net,
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            row(2021, "C1", "India", dec!(300.00)),
            row(2021, "C2", "India", dec!(100.00)),
            row(2021, "C3", "USA", dec!(100.00)),
            row(2022, "C1", "India", dec!(50.00)),
        ]
    }

    #[test]
    fn test_fiscal_year_totals_per_entity() {
        let query = BatchQuery::new(
            EntityKind::Customer,
            EntityKeys::parse("C1,C3").unwrap(),
            GroupBy::DateAndEntity,
            Measure::NetSales,
        );
        let totals = fiscal_year_totals(&rows(), &query).unwrap();

        let flat: Vec<(i32, Option<&str>, Decimal)> = totals
            .iter()
            .map(|t| (t.fiscal_year.0, t.entity.as_deref(), t.value))
            .collect();
        assert_eq!(
            flat,
            vec![
                (2021, Some("C1"), dec!(300.00)),
                (2021, Some("C3"), dec!(100.00)),
                (2022, Some("C1"), dec!(50.00)),
            ]
        );
    }

    #[test]
    fn test_top_n_breaks_ties_by_key() {
        let ranked = top_n(&rows(), EntityKind::Customer, FiscalYear(2021), 3).unwrap();

        let order: Vec<(usize, &str)> =
            ranked.iter().map(|r| (r.rank, r.entity.as_str())).collect();
        assert_eq!(order, vec![(1, "C1"), (2, "C2"), (3, "C3")]);
    }

    #[test]
    fn test_top_n_by_market() {
        let ranked = top_n(&rows(), EntityKind::Market, FiscalYear(2021), 1).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].entity, "India");
        assert_eq!(ranked[0].net_sales, dec!(400.00));
    }

    #[test]
    fn test_share_sums_to_hundred() {
        let shares = net_sales_share(&rows(), EntityKind::Market, FiscalYear(2021)).unwrap();

        assert_eq!(shares[0].share_pct, dec!(80.00));
        assert_eq!(shares[1].share_pct, dec!(20.00));
        let total: Decimal = shares.iter().map(|s| s.share_pct).sum();
        assert_eq!(total, dec!(100.00));
    }

    #[test]
    fn test_share_of_zero_total_is_zero() {
        let rows = vec![row(2021, "C1", "India", dec!(0))];
        let shares = net_sales_share(&rows, EntityKind::Customer, FiscalYear(2021)).unwrap();
        assert_eq!(shares[0].share_pct, dec!(0.00));
    }

    #[test]
    fn test_share_of_very_large_totals() {
        let half = Decimal::MAX / dec!(4);
        let rows = vec![row(2021, "C1", "India", half), row(2021, "C2", "USA", half)];
        let shares = net_sales_share(&rows, EntityKind::Market, FiscalYear(2021)).unwrap();

        assert_eq!(shares[0].share_pct, dec!(50.00));
        assert_eq!(shares[1].share_pct, dec!(50.00));
    }

    #[test]
    fn test_overflowing_entity_total_is_invalid_input() {
        let rows = vec![
            row(2021, "C1", "India", Decimal::MAX),
            row(2021, "C2", "India", Decimal::MAX),
        ];

        assert!(matches!(
            top_n(&rows, EntityKind::Market, FiscalYear(2021), 1),
            Err(NetSalesError::InvalidInput(_))
        ));
        // Per-customer totals fit; their grand total does not.
        assert!(matches!(
            net_sales_share(&rows, EntityKind::Customer, FiscalYear(2021)),
            Err(NetSalesError::InvalidInput(_))
        ));
    }
}
