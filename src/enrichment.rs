use crate::aggregation::{Measure, SalesFact};
use crate::error::{DataIntegrityError, MissingReference};
use crate::fiscal::{AnnotatedSale, FiscalYear};
use crate::report::{SkipReason, SkippedRecord};
use crate::schema::{Customer, PriceRecord, Product, SaleKey};
use crate::utils::round_currency;
use chrono::NaiveDate;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_CURRENCY_SCALE: u32 = 2;

/// A sale joined to its annual gross price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedSalesRecord {
    pub date: NaiveDate,
    pub fiscal_year: FiscalYear,
    pub product_code: String,
    pub customer_code: String,
    pub sold_quantity: i64,
    pub gross_price: Decimal,
    /// `gross_price * sold_quantity`, already rounded to the currency scale.
    pub gross_price_total: Decimal,
    pub market: Option<String>,
    pub customer_name: Option<String>,
    pub product_name: Option<String>,
    pub variant: Option<String>,
}

impl EnrichedSalesRecord {
    pub fn key(&self) -> SaleKey {
        SaleKey {
            date: self.date,
            customer_code: self.customer_code.clone(),
            product_code: self.product_code.clone(),
        }
    }
}

impl SalesFact for EnrichedSalesRecord {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn fiscal_year(&self) -> FiscalYear {
        self.fiscal_year
    }

    fn customer_code(&self) -> &str {
        &self.customer_code
    }

    fn product_code(&self) -> &str {
        &self.product_code
    }

    fn market(&self) -> Option<&str> {
        self.market.as_deref()
    }

    fn measure(&self, measure: Measure) -> Option<Decimal> {
        match measure {
            Measure::SoldQuantity => Some(Decimal::from(self.sold_quantity)),
            Measure::GrossPriceTotal => Some(self.gross_price_total),
            Measure::NetInvoiceSales | Measure::NetSales => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichmentOutcome {
    pub records: Vec<EnrichedSalesRecord>,
    pub skipped: Vec<SkippedRecord>,
}

/// Joins sales to prices on `(product_code, fiscal_year)`.
///
/// Exactly one price must match. No match excludes the sale; several matches
/// fail it with a `DataIntegrityError`. Both outcomes are logged and reported.
pub struct Enricher<'a> {
    prices: HashMap<&'a str, HashMap<FiscalYear, Vec<&'a PriceRecord>>>,
    customers: HashMap<&'a str, &'a Customer>,
    products: HashMap<&'a str, &'a Product>,
    currency_scale: u32,
}

impl<'a> Enricher<'a> {
    pub fn new(
        prices: &'a [PriceRecord],
        customers: &'a [Customer],
        products: &'a [Product],
        currency_scale: u32,
    ) -> Self {
        let mut price_index: HashMap<&'a str, HashMap<FiscalYear, Vec<&'a PriceRecord>>> =
            HashMap::new();
        for price in prices {
            price_index
                .entry(price.product_code.as_str())
                .or_default()
                .entry(price.fiscal_year)
                .or_default()
                .push(price);
        }

        Self {
            prices: price_index,
            customers: customers
                .iter()
                .map(|c| (c.customer_code.as_str(), c))
                .collect(),
            products: products
                .iter()
                .map(|p| (p.product_code.as_str(), p))
                .collect(),
            currency_scale,
        }
    }

    pub fn price_for(
        &self,
        product_code: &str,
        fiscal_year: FiscalYear,
    ) -> std::result::Result<&'a PriceRecord, SkipReason> {
        let matches = self
            .prices
            .get(product_code)
            .and_then(|by_year| by_year.get(&fiscal_year))
            .map(Vec::as_slice)
            .unwrap_or_default();

        match matches {
            [price] => Ok(*price),
            [] => Err(MissingReference::Price {
                product_code: product_code.to_string(),
                fiscal_year,
            }
            .into()),
            _ => Err(DataIntegrityError::DuplicatePrice {
                product_code: product_code.to_string(),
                fiscal_year,
                matches: matches.len(),
            }
            .into()),
        }
    }

    pub fn enrich_one(
        &self,
        sale: &AnnotatedSale,
    ) -> std::result::Result<EnrichedSalesRecord, SkipReason> {
        let record = &sale.record;
        let price = self.price_for(&record.product_code, sale.fiscal_year)?;

        let gross_price_total = price
            .gross_price
            .checked_mul(Decimal::from(record.sold_quantity))
            .map(|total| round_currency(total, self.currency_scale))
            .ok_or_else(|| {
                DataIntegrityError::amount_overflow(&record.key(), "gross_price_total")
            })?;

        let customer = self.customers.get(record.customer_code.as_str());
        let product = self.products.get(record.product_code.as_str());

        Ok(EnrichedSalesRecord {
            date: record.date,
            fiscal_year: sale.fiscal_year,
            product_code: record.product_code.clone(),
            customer_code: record.customer_code.clone(),
            sold_quantity: record.sold_quantity,
            gross_price: price.gross_price,
            gross_price_total,
            market: customer.map(|c| c.market.clone()),
            customer_name: customer.map(|c| c.customer.clone()),
            product_name: product.map(|p| p.product.clone()),
            variant: product.map(|p| p.variant.clone()),
        })
    }

    pub fn enrich<'s, I>(&self, sales: I) -> EnrichmentOutcome
    where
        I: IntoIterator<Item = &'s AnnotatedSale>,
    {
        let mut outcome = EnrichmentOutcome::default();

        for sale in sales {
            match self.enrich_one(sale) {
                Ok(record) => outcome.records.push(record),
                Err(reason) => {
                    warn!(
                        "Sale {} / {} on {} not enriched: {}",
                        sale.record.customer_code,
                        sale.record.product_code,
                        sale.record.date,
                        reason
                    );
                    outcome.skipped.push(SkippedRecord {
                        sale: sale.record.key(),
                        fiscal_year: sale.fiscal_year,
                        reason,
                    });
                }
            }
        }

        debug!(
            "Enriched {} sales, skipped {}",
            outcome.records.len(),
            outcome.skipped.len()
        );
        outcome
    }
}

/// Enriches sales against prices and label dimensions with two-decimal rounding.
pub fn enrich(
    sales: &[AnnotatedSale],
    prices: &[PriceRecord],
    customers: &[Customer],
    products: &[Product],
) -> EnrichmentOutcome {
    Enricher::new(prices, customers, products, DEFAULT_CURRENCY_SCALE).enrich(sales)
}
