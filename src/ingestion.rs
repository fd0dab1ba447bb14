use crate::aggregation::{AggregateRow, Measure};
use crate::cascade::NetSalesRecord;
use crate::error::Result;
use crate::fiscal::FiscalCalendar;
use crate::store::InMemoryFactStore;
use log::info;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub const CUSTOMERS_FILE: &str = "dim_customer.csv";
pub const PRODUCTS_FILE: &str = "dim_product.csv";
pub const SALES_FILE: &str = "fact_sales_monthly.csv";
pub const PRICES_FILE: &str = "fact_gross_price.csv";
pub const PRE_INVOICE_FILE: &str = "fact_pre_invoice_deductions.csv";
pub const POST_INVOICE_FILE: &str = "fact_post_invoice_deductions.csv";

const AGGREGATE_HEADER: [&str; 4] = ["date", "entity", "measure", "value"];

const NET_SALES_HEADER: [&str; 12] = [
    "date",
    "fiscal_year",
    "customer_code",
    "product_code",
    "market",
    "sold_quantity",
    "gross_price",
    "gross_price_total",
    "pre_invoice_discount_pct",
    "net_invoice_sales",
    "post_invoice_discount_pct",
    "net_sales",
];

/// Reads typed rows from CSV with a header line. Fields are trimmed.
pub fn read_csv<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in csv_reader.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}

pub fn read_csv_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    read_csv(File::open(path)?)
}

impl InMemoryFactStore {
    /// Loads the six source tables from `dir`, one CSV file per table.
    pub fn from_csv_dir(dir: impl AsRef<Path>, calendar: FiscalCalendar) -> Result<Self> {
        let dir = dir.as_ref();
        let store = Self {
            calendar,
            sales: read_csv_file(dir.join(SALES_FILE))?,
            prices: read_csv_file(dir.join(PRICES_FILE))?,
            pre_invoice: read_csv_file(dir.join(PRE_INVOICE_FILE))?,
            post_invoice: read_csv_file(dir.join(POST_INVOICE_FILE))?,
            customers: read_csv_file(dir.join(CUSTOMERS_FILE))?,
            products: read_csv_file(dir.join(PRODUCTS_FILE))?,
        };

        info!(
            "Read {} sales, {} prices, {} customers and {} products from {}",
            store.sales.len(),
            store.prices.len(),
            store.customers.len(),
            store.products.len(),
            dir.display()
        );
        Ok(store)
    }
}

fn measure_name(measure: Measure) -> &'static str {
    match measure {
        Measure::SoldQuantity => "sold_quantity",
        Measure::GrossPriceTotal => "gross_price_total",
        Measure::NetInvoiceSales => "net_invoice_sales",
        Measure::NetSales => "net_sales",
    }
}

/// Writes aggregate rows in the order given.
pub fn write_aggregate_csv(rows: &[AggregateRow], writer: impl Write) -> Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    csv.write_record(AGGREGATE_HEADER)?;
    for row in rows {
        csv.write_record([
            row.date.format("%Y-%m-%d").to_string(),
            row.entity.clone().unwrap_or_default(),
            measure_name(row.measure).to_string(),
            row.value.to_string(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_net_sales_csv(records: &[NetSalesRecord], writer: impl Write) -> Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    csv.write_record(NET_SALES_HEADER)?;
    for record in records {
        let enriched = &record.enriched;
        csv.write_record([
            enriched.date.format("%Y-%m-%d").to_string(),
            enriched.fiscal_year.0.to_string(),
            enriched.customer_code.clone(),
            enriched.product_code.clone(),
            enriched.market.clone().unwrap_or_default(),
            enriched.sold_quantity.to_string(),
            enriched.gross_price.to_string(),
            enriched.gross_price_total.to_string(),
            record.pre_invoice_discount_pct.to_string(),
            record.net_invoice_sales.to_string(),
            record.post_invoice_discount_pct.to_string(),
            record.net_sales.to_string(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}
