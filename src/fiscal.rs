use crate::error::{NetSalesError, Result};
use crate::schema::{SaleKey, SalesRecord};
use crate::utils::{first_day_of_month, last_day_of_month};
use chrono::{Datelike, NaiveDate};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// The fiscal year starts on September 1st.
pub const DEFAULT_FISCAL_YEAR_START_MONTH: u32 = 9;

/// A fiscal year, labeled by the calendar year in which it ends.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct FiscalYear(pub i32);

impl fmt::Display for FiscalYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FY{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FiscalQuarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl fmt::Display for FiscalQuarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FiscalQuarter::Q1 => "Q1",
            FiscalQuarter::Q2 => "Q2",
            FiscalQuarter::Q3 => "Q3",
            FiscalQuarter::Q4 => "Q4",
        };
        f.write_str(label)
    }
}

pub fn validate_fiscal_year_start_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(NetSalesError::InvalidFiscalYearStartMonth(month));
    }
    Ok(())
}

/// Maps calendar dates onto a fixed-offset fiscal calendar.
///
/// A date belongs to fiscal year `year(date + shift months)`, where the shift
/// moves the start month onto January. With the default September start the
/// shift is four months: `2020-09-01` is in FY2021, `2021-08-31` still is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiscalCalendar {
    start_month: u32,
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        Self {
            start_month: DEFAULT_FISCAL_YEAR_START_MONTH,
        }
    }
}

impl FiscalCalendar {
    pub fn new(start_month: u32) -> Result<Self> {
        validate_fiscal_year_start_month(start_month)?;
        Ok(Self { start_month })
    }

    pub fn start_month(&self) -> u32 {
        self.start_month
    }

    /// Number of months added to a date before reading off its calendar year.
    pub fn shift_months(&self) -> u32 {
        (13 - self.start_month) % 12
    }

    pub fn fiscal_year(&self, date: NaiveDate) -> FiscalYear {
        let shifted = date.month0() + self.shift_months();
        FiscalYear(date.year() + (shifted / 12) as i32)
    }

    /// Returns the 0-based index of the month within its fiscal year.
    ///
    /// With a September start: Sep=0, Dec=3, Jan=4, Aug=11.
    pub fn fiscal_month_index(&self, date: NaiveDate) -> u32 {
        (date.month0() + self.shift_months()) % 12
    }

    pub fn fiscal_quarter(&self, date: NaiveDate) -> FiscalQuarter {
        match self.fiscal_month_index(date) / 3 {
            0 => FiscalQuarter::Q1,
            1 => FiscalQuarter::Q2,
            2 => FiscalQuarter::Q3,
            _ => FiscalQuarter::Q4,
        }
    }

    /// First calendar day of the fiscal year.
    pub fn fiscal_year_start(&self, fiscal_year: FiscalYear) -> Result<NaiveDate> {
        let year = if self.start_month == 1 {
            fiscal_year.0
        } else {
            fiscal_year.0 - 1
        };
        first_day_of_month(year, self.start_month)
    }

    /// Last calendar day of the fiscal year.
    pub fn fiscal_year_end(&self, fiscal_year: FiscalYear) -> Result<NaiveDate> {
        let end_month = if self.start_month == 1 {
            12
        } else {
            self.start_month - 1
        };
        last_day_of_month(fiscal_year.0, end_month)
    }

    pub fn annotate(&self, sales: Vec<SalesRecord>) -> Vec<AnnotatedSale> {
        sales
            .into_iter()
            .map(|record| AnnotatedSale {
                fiscal_year: self.fiscal_year(record.date),
                record,
            })
            .collect()
    }
}

/// Resolves a date with the default September-start calendar.
pub fn resolve(date: NaiveDate) -> FiscalYear {
    FiscalCalendar::default().fiscal_year(date)
}

/// A sales record carrying its fiscal year, resolved once at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedSale {
    #[serde(flatten)]
    pub record: SalesRecord,
    pub fiscal_year: FiscalYear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FiscalYearEntry {
    sale: SaleKey,
    fiscal_year: FiscalYear,
}

/// Materialized `(sale, fiscal_year)` annotation.
///
/// Readers take an `Arc` snapshot of the current table. A rebuild computes the
/// replacement table completely before swapping it in, so no reader ever sees a
/// partially regenerated mapping.
#[derive(Debug)]
pub struct FiscalYearIndex {
    calendar: FiscalCalendar,
    entries: RwLock<Arc<BTreeMap<SaleKey, FiscalYear>>>,
}

impl FiscalYearIndex {
    pub fn build(calendar: FiscalCalendar, sales: &[SalesRecord]) -> Self {
        Self {
            calendar,
            entries: RwLock::new(Arc::new(Self::compute(&calendar, sales))),
        }
    }

    fn compute(calendar: &FiscalCalendar, sales: &[SalesRecord]) -> BTreeMap<SaleKey, FiscalYear> {
        sales
            .iter()
            .map(|s| (s.key(), calendar.fiscal_year(s.date)))
            .collect()
    }

    pub fn calendar(&self) -> FiscalCalendar {
        self.calendar
    }

    pub fn snapshot(&self) -> Arc<BTreeMap<SaleKey, FiscalYear>> {
        let guard = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn rebuild(&self, sales: &[SalesRecord]) {
        let fresh = Arc::new(Self::compute(&self.calendar, sales));
        debug!("Rebuilt fiscal year index with {} entries", fresh.len());

        let mut guard = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = fresh;
    }

    pub fn get(&self, key: &SaleKey) -> Option<FiscalYear> {
        self.snapshot().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Annotates sales from the materialized table, resolving on the fly for
    /// records the table has not seen.
    pub fn annotate(&self, sales: Vec<SalesRecord>) -> Vec<AnnotatedSale> {
        let table = self.snapshot();
        sales
            .into_iter()
            .map(|record| {
                let fiscal_year = table
                    .get(&record.key())
                    .copied()
                    .unwrap_or_else(|| self.calendar.fiscal_year(record.date));
                AnnotatedSale {
                    record,
                    fiscal_year,
                }
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        let entries: Vec<FiscalYearEntry> = self
            .snapshot()
            .iter()
            .map(|(sale, fiscal_year)| FiscalYearEntry {
                sale: sale.clone(),
                fiscal_year: *fiscal_year,
            })
            .collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    pub fn from_json(calendar: FiscalCalendar, json: &str) -> Result<Self> {
        let entries: Vec<FiscalYearEntry> = serde_json::from_str(json)?;
        let table = entries
            .into_iter()
            .map(|entry| (entry.sale, entry.fiscal_year))
            .collect();
        Ok(Self {
            calendar,
            entries: RwLock::new(Arc::new(table)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Months;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sale(y: i32, m: u32, product: &str) -> SalesRecord {
        SalesRecord {
            date: date(y, m, 1),
            product_code: product.to_string(),
            customer_code: "90002002".to_string(),
            sold_quantity: 10,
        }
    }

    #[test]
    fn test_fiscal_year_boundaries() {
        assert_eq!(resolve(date(2020, 9, 1)), FiscalYear(2021));
        assert_eq!(resolve(date(2021, 8, 31)), FiscalYear(2021));
        assert_eq!(resolve(date(2020, 8, 31)), FiscalYear(2020));
        assert_eq!(resolve(date(2020, 12, 31)), FiscalYear(2021));
        assert_eq!(resolve(date(2021, 1, 1)), FiscalYear(2021));
    }

    #[test]
    fn test_fiscal_year_matches_four_month_shift() {
        let calendar = FiscalCalendar::default();
        let mut current = date(2019, 1, 1);
        while current <= date(2022, 12, 31) {
            let shifted = current.checked_add_months(Months::new(4)).unwrap();
            assert_eq!(calendar.fiscal_year(current), FiscalYear(shifted.year()));
            current = current.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_calendar_year_start() {
        let calendar = FiscalCalendar::new(1).unwrap();
        assert_eq!(calendar.fiscal_year(date(2021, 12, 31)), FiscalYear(2021));
        assert_eq!(calendar.fiscal_year(date(2021, 1, 1)), FiscalYear(2021));
        assert_eq!(calendar.fiscal_month_index(date(2021, 1, 15)), 0);
    }

    #[test]
    fn test_invalid_start_month() {
        assert!(FiscalCalendar::new(0).is_err());
        assert!(FiscalCalendar::new(13).is_err());
    }

    #[test]
    fn test_fiscal_month_index_and_quarter() {
        let calendar = FiscalCalendar::default();
        assert_eq!(calendar.fiscal_month_index(date(2020, 9, 1)), 0);
        assert_eq!(calendar.fiscal_month_index(date(2020, 12, 1)), 3);
        assert_eq!(calendar.fiscal_month_index(date(2021, 8, 1)), 11);

        assert_eq!(calendar.fiscal_quarter(date(2020, 11, 1)), FiscalQuarter::Q1);
        assert_eq!(calendar.fiscal_quarter(date(2020, 12, 1)), FiscalQuarter::Q2);
        assert_eq!(calendar.fiscal_quarter(date(2021, 3, 1)), FiscalQuarter::Q3);
        assert_eq!(calendar.fiscal_quarter(date(2021, 6, 1)), FiscalQuarter::Q4);
    }

    #[test]
    fn test_fiscal_year_start_and_end() {
        let calendar = FiscalCalendar::default();
        assert_eq!(calendar.fiscal_year_start(FiscalYear(2021)).unwrap(), date(2020, 9, 1));
        assert_eq!(calendar.fiscal_year_end(FiscalYear(2021)).unwrap(), date(2021, 8, 31));

        let calendar = FiscalCalendar::new(1).unwrap();
        assert_eq!(calendar.fiscal_year_start(FiscalYear(2021)).unwrap(), date(2021, 1, 1));
        assert_eq!(calendar.fiscal_year_end(FiscalYear(2021)).unwrap(), date(2021, 12, 31));
    }

    #[test]
    fn test_index_matches_on_the_fly_resolution() {
        let calendar = FiscalCalendar::default();
        let sales = vec![sale(2020, 8, "A"), sale(2020, 9, "A"), sale(2021, 2, "B")];

        let index = FiscalYearIndex::build(calendar, &sales);
        let from_index = index.annotate(sales.clone());
        let on_the_fly = calendar.annotate(sales);

        assert_eq!(from_index, on_the_fly);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_index_rebuild_swaps_whole_table() {
        let calendar = FiscalCalendar::default();
        let index = FiscalYearIndex::build(calendar, &[sale(2020, 9, "A")]);
        let before = index.snapshot();

        index.rebuild(&[sale(2021, 9, "B"), sale(2021, 10, "B")]);

        assert_eq!(before.len(), 1);
        assert_eq!(index.len(), 2);
        assert!(index.get(&sale(2020, 9, "A").key()).is_none());
        assert_eq!(index.get(&sale(2021, 9, "B").key()), Some(FiscalYear(2022)));
    }

    #[test]
    fn test_index_json_persistence() {
        let calendar = FiscalCalendar::default();
        let index = FiscalYearIndex::build(calendar, &[sale(2020, 9, "A"), sale(2021, 1, "B")]);

        let json = index.to_json().unwrap();
        assert!(json.contains("fiscal_year"));

        let restored = FiscalYearIndex::from_json(calendar, &json).unwrap();
        assert_eq!(*restored.snapshot(), *index.snapshot());
    }
}
