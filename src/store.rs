use crate::aggregation::EntityKeys;
use crate::error::{NetSalesError, Result};
use crate::fiscal::{AnnotatedSale, FiscalCalendar, FiscalYear, FiscalYearIndex};
use crate::schema::{
    Customer, PostInvoiceDeduction, PreInvoiceDeduction, PriceRecord, Product, SalesRecord,
};
use crate::utils::parse_period_string;
use chrono::NaiveDate;
use log::{debug, info};
use std::collections::HashMap;

/// Selection applied when reading raw facts.
///
/// Every criterion is optional; an unset criterion matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactFilter {
    pub customer_codes: Option<EntityKeys>,
    pub product_codes: Option<EntityKeys>,
    /// Inclusive date range.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl FactFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_customers(mut self, keys: EntityKeys) -> Self {
        self.customer_codes = Some(keys);
        self
    }

    pub fn with_products(mut self, keys: EntityKeys) -> Self {
        self.product_codes = Some(keys);
        self
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(NetSalesError::InvalidInput(format!(
                "Date range ends ({}) before it starts ({})",
                end, start
            )));
        }
        self.date_range = Some((start, end));
        Ok(self)
    }

    /// Restricts to a `YYYY-MM` or `YYYY-MM:YYYY-MM` period.
    pub fn with_period(self, period: &str) -> Result<Self> {
        let (start, end) = parse_period_string(period)?;
        self.with_date_range(start, end)
    }

    pub fn for_fiscal_year(calendar: &FiscalCalendar, fiscal_year: FiscalYear) -> Result<Self> {
        let start = calendar.fiscal_year_start(fiscal_year)?;
        let end = calendar.fiscal_year_end(fiscal_year)?;
        Self::all().with_date_range(start, end)
    }

    pub fn matches_customer(&self, code: &str) -> bool {
        self.customer_codes
            .as_ref()
            .map_or(true, |keys| keys.contains(code))
    }

    pub fn matches_product(&self, code: &str) -> bool {
        self.product_codes
            .as_ref()
            .map_or(true, |keys| keys.contains(code))
    }

    pub fn matches_date(&self, date: NaiveDate) -> bool {
        self.date_range
            .map_or(true, |(start, end)| start <= date && date <= end)
    }

    /// Annual facts match when their fiscal year overlaps the date range.
    pub fn matches_fiscal_year(&self, calendar: &FiscalCalendar, fiscal_year: FiscalYear) -> bool {
        self.date_range.map_or(true, |(start, end)| {
            calendar.fiscal_year(start) <= fiscal_year && fiscal_year <= calendar.fiscal_year(end)
        })
    }
}

/// Source of raw fact and dimension rows.
///
/// Implementations own retrieval; the engine only reads through this trait.
pub trait FactStore {
    fn calendar(&self) -> FiscalCalendar;
    fn sales(&self, filter: &FactFilter) -> Result<Vec<SalesRecord>>;
    fn prices(&self, filter: &FactFilter) -> Result<Vec<PriceRecord>>;
    fn pre_invoice_deductions(&self, filter: &FactFilter) -> Result<Vec<PreInvoiceDeduction>>;
    fn post_invoice_deductions(&self, filter: &FactFilter) -> Result<Vec<PostInvoiceDeduction>>;
    fn customers(&self, filter: &FactFilter) -> Result<Vec<Customer>>;
    fn products(&self, filter: &FactFilter) -> Result<Vec<Product>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryFactStore {
    pub calendar: FiscalCalendar,
    pub sales: Vec<SalesRecord>,
    pub prices: Vec<PriceRecord>,
    pub pre_invoice: Vec<PreInvoiceDeduction>,
    pub post_invoice: Vec<PostInvoiceDeduction>,
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
}

impl InMemoryFactStore {
    pub fn new(calendar: FiscalCalendar) -> Self {
        Self {
            calendar,
            ..Self::default()
        }
    }
}

impl FactStore for InMemoryFactStore {
    fn calendar(&self) -> FiscalCalendar {
        self.calendar
    }

    fn sales(&self, filter: &FactFilter) -> Result<Vec<SalesRecord>> {
        Ok(self
            .sales
            .iter()
            .filter(|s| {
                filter.matches_customer(&s.customer_code)
                    && filter.matches_product(&s.product_code)
                    && filter.matches_date(s.date)
            })
            .cloned()
            .collect())
    }

    fn prices(&self, filter: &FactFilter) -> Result<Vec<PriceRecord>> {
        Ok(self
            .prices
            .iter()
            .filter(|p| {
                filter.matches_product(&p.product_code)
                    && filter.matches_fiscal_year(&self.calendar, p.fiscal_year)
            })
            .cloned()
            .collect())
    }

    fn pre_invoice_deductions(&self, filter: &FactFilter) -> Result<Vec<PreInvoiceDeduction>> {
        Ok(self
            .pre_invoice
            .iter()
            .filter(|d| {
                filter.matches_customer(&d.customer_code)
                    && filter.matches_fiscal_year(&self.calendar, d.fiscal_year)
            })
            .cloned()
            .collect())
    }

    fn post_invoice_deductions(&self, filter: &FactFilter) -> Result<Vec<PostInvoiceDeduction>> {
        Ok(self
            .post_invoice
            .iter()
            .filter(|d| {
                filter.matches_customer(&d.customer_code)
                    && filter.matches_product(&d.product_code)
                    && filter.matches_date(d.date)
            })
            .cloned()
            .collect())
    }

    fn customers(&self, filter: &FactFilter) -> Result<Vec<Customer>> {
        Ok(self
            .customers
            .iter()
            .filter(|c| filter.matches_customer(&c.customer_code))
            .cloned()
            .collect())
    }

    fn products(&self, filter: &FactFilter) -> Result<Vec<Product>> {
        Ok(self
            .products
            .iter()
            .filter(|p| filter.matches_product(&p.product_code))
            .cloned()
            .collect())
    }
}

/// All raw facts needed for one computation, read in a single pass.
///
/// Sales carry their fiscal year from the moment they are loaded, so no
/// downstream join resolves a date again.
#[derive(Debug, Clone)]
pub struct FactSnapshot {
    pub calendar: FiscalCalendar,
    pub sales: Vec<AnnotatedSale>,
    pub prices: Vec<PriceRecord>,
    pub pre_invoice: Vec<PreInvoiceDeduction>,
    pub post_invoice: Vec<PostInvoiceDeduction>,
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
}

impl FactSnapshot {
    pub fn load<S: FactStore + ?Sized>(store: &S, filter: &FactFilter) -> Result<Self> {
        let calendar = store.calendar();
        let sales = store.sales(filter)?;
        validate_sales(&sales)?;
        Self::read_remaining(store, filter, calendar, calendar.annotate(sales))
    }

    /// Loads using a materialized fiscal year annotation.
    pub fn load_with_index<S: FactStore + ?Sized>(
        store: &S,
        filter: &FactFilter,
        index: &FiscalYearIndex,
    ) -> Result<Self> {
        let sales = store.sales(filter)?;
        validate_sales(&sales)?;
        Self::read_remaining(store, filter, index.calendar(), index.annotate(sales))
    }

    fn read_remaining<S: FactStore + ?Sized>(
        store: &S,
        filter: &FactFilter,
        calendar: FiscalCalendar,
        sales: Vec<AnnotatedSale>,
    ) -> Result<Self> {
        let snapshot = Self {
            calendar,
            sales,
            prices: store.prices(filter)?,
            pre_invoice: store.pre_invoice_deductions(filter)?,
            post_invoice: store.post_invoice_deductions(filter)?,
            // Dimensions are read whole: market membership must not depend on the fact filter.
            customers: store.customers(&FactFilter::all())?,
            products: store.products(&FactFilter::all())?,
        };

        info!(
            "Loaded snapshot: {} sales, {} prices, {} pre-invoice rates, {} post-invoice deductions",
            snapshot.sales.len(),
            snapshot.prices.len(),
            snapshot.pre_invoice.len(),
            snapshot.post_invoice.len()
        );
        debug!(
            "Snapshot dimensions: {} customers, {} products",
            snapshot.customers.len(),
            snapshot.products.len()
        );

        Ok(snapshot)
    }

    pub fn customer_markets(&self) -> HashMap<&str, &str> {
        self.customers
            .iter()
            .map(|c| (c.customer_code.as_str(), c.market.as_str()))
            .collect()
    }
}

pub fn validate_sales(sales: &[SalesRecord]) -> Result<()> {
    if let Some(bad) = sales.iter().find(|s| s.sold_quantity < 0) {
        return Err(NetSalesError::InvalidInput(format!(
            "Negative sold_quantity {} for customer {}, product {} on {}",
            bad.sold_quantity, bad.customer_code, bad.product_code, bad.date
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Channel, Platform};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn store() -> InMemoryFactStore {
        let mut store = InMemoryFactStore::new(FiscalCalendar::default());
        store.sales = vec![
            SalesRecord {
                date: date(2020, 8, 1),
                product_code: "P1".to_string(),
                customer_code: "C1".to_string(),
                sold_quantity: 5,
            },
            SalesRecord {
                date: date(2020, 9, 1),
                product_code: "P1".to_string(),
                customer_code: "C2".to_string(),
                sold_quantity: 7,
            },
        ];
        store.prices = vec![
            PriceRecord {
                product_code: "P1".to_string(),
                fiscal_year: FiscalYear(2020),
                gross_price: dec!(10.00),
            },
            PriceRecord {
                product_code: "P1".to_string(),
                fiscal_year: FiscalYear(2021),
                gross_price: dec!(11.00),
            },
        ];
        store.customers = vec![Customer {
            customer_code: "C1".to_string(),
            customer: "Croma".to_string(),
            platform: Platform::BrickAndMortar,
            channel: Channel::Retailer,
            market: "India".to_string(),
            sub_zone: String::new(),
            region: String::new(),
        }];
        store
    }

    #[test]
    fn test_fiscal_year_filter() {
        let store = store();
        let filter = FactFilter::for_fiscal_year(&store.calendar, FiscalYear(2021)).unwrap();

        let sales = store.sales(&filter).unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].customer_code, "C2");

        let prices = store.prices(&filter).unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].fiscal_year, FiscalYear(2021));
    }

    #[test]
    fn test_customer_filter_keeps_dimensions_whole() {
        let store = store();
        let filter = FactFilter::all().with_customers(EntityKeys::single("C2"));
        let snapshot = FactSnapshot::load(&store, &filter).unwrap();

        assert_eq!(snapshot.sales.len(), 1);
        assert_eq!(snapshot.sales[0].fiscal_year, FiscalYear(2021));
        assert_eq!(snapshot.customers.len(), 1);
    }

    #[test]
    fn test_negative_quantity_rejected_before_computation() {
        let mut store = store();
        store.sales[0].sold_quantity = -1;
        let result = FactSnapshot::load(&store, &FactFilter::all());
        assert!(matches!(result, Err(NetSalesError::InvalidInput(_))));
    }

    #[test]
    fn test_load_with_index_matches_plain_load() {
        let store = store();
        let index = FiscalYearIndex::build(store.calendar, &store.sales);

        let plain = FactSnapshot::load(&store, &FactFilter::all()).unwrap();
        let indexed = FactSnapshot::load_with_index(&store, &FactFilter::all(), &index).unwrap();
        assert_eq!(plain.sales, indexed.sales);
    }

    #[test]
    fn test_period_filter() {
        let filter = FactFilter::all().with_period("2020-09:2020-12").unwrap();
        assert!(filter.matches_date(date(2020, 9, 1)));
        assert!(!filter.matches_date(date(2020, 8, 1)));
        assert!(FactFilter::all()
            .with_date_range(date(2021, 1, 1), date(2020, 1, 1))
            .is_err());
    }
}
