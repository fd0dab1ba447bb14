use crate::error::{NetSalesError, Result};
use crate::fiscal::FiscalYear;
use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// A normalized, de-duplicated set of entity codes.
///
/// One code and many codes are the same type, so single-key reports are just
/// batch reports over a set of size one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKeys(BTreeSet<String>);

impl EntityKeys {
    /// Parses a comma-delimited list such as `"90002002, 90002008"`.
    ///
    /// Whitespace around codes is dropped and duplicates collapse. A blank
    /// string is the empty set; an empty entry inside a list is rejected.
    pub fn parse(list: &str) -> Result<Self> {
        if list.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut keys = BTreeSet::new();
        for (idx, raw) in list.split(',').enumerate() {
            let code = raw.trim();
            if code.is_empty() {
                return Err(NetSalesError::InvalidInput(format!(
                    "Entry #{} of key list '{}' is empty",
                    idx, list
                )));
            }
            if code.chars().any(char::is_control) {
                return Err(NetSalesError::InvalidInput(format!(
                    "Entry #{} of key list contains control characters",
                    idx
                )));
            }
            keys.insert(code.to_string());
        }

        Ok(Self(keys))
    }

    pub fn single(code: impl Into<String>) -> Self {
        Self(BTreeSet::from([code.into()]))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn union(&self, other: &EntityKeys) -> EntityKeys {
        Self(self.0.union(&other.0).cloned().collect())
    }
}

impl FromStr for EntityKeys {
    type Err = NetSalesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl<S: Into<String>> FromIterator<S> for EntityKeys {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Customer,
    Market,
    Product,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    SoldQuantity,
    GrossPriceTotal,
    NetInvoiceSales,
    NetSales,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// One row per month across all selected entities.
    Date,
    /// One row per month and selected entity.
    DateAndEntity,
}

/// Read access shared by enriched and netted records.
pub trait SalesFact {
    fn date(&self) -> NaiveDate;
    fn fiscal_year(&self) -> FiscalYear;
    fn customer_code(&self) -> &str;
    fn product_code(&self) -> &str;
    fn market(&self) -> Option<&str>;

    /// `None` when the record type does not carry the measure.
    fn measure(&self, measure: Measure) -> Option<Decimal>;

    fn entity(&self, kind: EntityKind) -> Option<&str> {
        match kind {
            EntityKind::Customer => Some(self.customer_code()),
            EntityKind::Market => self.market(),
            EntityKind::Product => Some(self.product_code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchQuery {
    pub scope: EntityKind,
    pub keys: EntityKeys,
    pub group_by: GroupBy,
    pub measure: Measure,
}

impl BatchQuery {
    pub fn new(scope: EntityKind, keys: EntityKeys, group_by: GroupBy, measure: Measure) -> Self {
        Self {
            scope,
            keys,
            group_by,
            measure,
        }
    }

    /// Builds a query from a delimited key list parameter.
    pub fn parse(
        scope: EntityKind,
        keys: &str,
        group_by: GroupBy,
        measure: Measure,
    ) -> Result<Self> {
        Ok(Self::new(scope, EntityKeys::parse(keys)?, group_by, measure))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub date: NaiveDate,
    pub entity: Option<String>,
    pub measure: Measure,
    pub value: Decimal,
}

/// Sums the query measure into `(bucket, entity)` groups.
pub(crate) fn sum_by_bucket<T, B, F>(
    records: &[T],
    query: &BatchQuery,
    bucket: F,
) -> Result<BTreeMap<(B, Option<String>), Decimal>>
where
    T: SalesFact,
    B: Ord,
    F: Fn(&T) -> B,
{
    let mut groups: BTreeMap<(B, Option<String>), Decimal> = BTreeMap::new();

    for record in records {
        let Some(entity) = record.entity(query.scope) else {
            continue;
        };
        if !query.keys.contains(entity) {
            continue;
        }

        let value = record.measure(query.measure).ok_or_else(|| {
            NetSalesError::InvalidInput(format!(
                "Measure {:?} is not available on these records",
                query.measure
            ))
        })?;

        let entity_key = match query.group_by {
            GroupBy::Date => None,
            GroupBy::DateAndEntity => Some(entity.to_string()),
        };

        add_checked(groups.entry((bucket(record), entity_key)).or_default(), value)?;
    }

    Ok(groups)
}

/// Adds `value` into a running total, failing instead of overflowing.
pub(crate) fn add_checked(total: &mut Decimal, value: Decimal) -> Result<()> {
    let sum = total.checked_add(value).ok_or_else(|| {
        NetSalesError::InvalidInput(format!("Sum overflowed adding {value} to {total}"))
    })?;
    *total = sum;
    Ok(())
}

/// Aggregates records for one or many entity codes.
///
/// Rows come back ascending by date, then entity. An empty key set yields no
/// rows.
pub fn aggregate<T: SalesFact>(records: &[T], query: &BatchQuery) -> Result<Vec<AggregateRow>> {
    if query.keys.is_empty() {
        return Ok(Vec::new());
    }

    let groups = sum_by_bucket(records, query, |r| r.date())?;

    Ok(groups
        .into_iter()
        .map(|((date, entity), value)| AggregateRow {
            date,
            entity,
            measure: query.measure,
            value,
        })
        .collect())
}

/// Aggregates each fiscal-year partition independently and combines the
/// partial results.
pub fn aggregate_parallel<T>(records: &[T], query: &BatchQuery) -> Result<Vec<AggregateRow>>
where
    T: SalesFact + Sync,
{
    let mut partitions: BTreeMap<FiscalYear, Vec<&T>> = BTreeMap::new();
    for record in records {
        partitions.entry(record.fiscal_year()).or_default().push(record);
    }

    let partials: Vec<Vec<AggregateRow>> = partitions
        .into_par_iter()
        .map(|(_, partition)| {
            let owned: Vec<RecordRef<'_, T>> = partition.into_iter().map(RecordRef).collect();
            aggregate(&owned, query)
        })
        .collect::<Result<_>>()?;

    partials
        .into_iter()
        .try_fold(Vec::new(), |acc, rows| combine_rows(&acc, &rows))
}

/// Adds two aggregate results bucket by bucket.
pub fn combine_rows(left: &[AggregateRow], right: &[AggregateRow]) -> Result<Vec<AggregateRow>> {
    let mut merged: BTreeMap<(NaiveDate, Option<String>, Measure), Decimal> = BTreeMap::new();

    for row in left.iter().chain(right) {
        let total = merged
            .entry((row.date, row.entity.clone(), row.measure))
            .or_default();
        add_checked(total, row.value)?;
    }

    Ok(merged
        .into_iter()
        .map(|((date, entity, measure), value)| AggregateRow {
            date,
            entity,
            measure,
            value,
        })
        .collect())
}

struct RecordRef<'a, T>(&'a T);

impl<T: SalesFact> SalesFact for RecordRef<'_, T> {
    fn date(&self) -> NaiveDate {
        self.0.date()
    }

    fn fiscal_year(&self) -> FiscalYear {
        self.0.fiscal_year()
    }

    fn customer_code(&self) -> &str {
        self.0.customer_code()
    }

    fn product_code(&self) -> &str {
        self.0.product_code()
    }

    fn market(&self) -> Option<&str> {
        self.0.market()
    }

    fn measure(&self, measure: Measure) -> Option<Decimal> {
        self.0.measure(measure)
    }
}
