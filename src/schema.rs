use crate::error::{NetSalesError, Result};
use crate::fiscal::{validate_fiscal_year_start_month, FiscalCalendar, FiscalYear};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Platform {
    #[serde(rename = "Brick & Mortar")]
    #[schemars(description = "Physical stores")]
    BrickAndMortar,

    #[serde(rename = "E-Commerce")]
    #[schemars(description = "Online storefronts")]
    ECommerce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Channel {
    Retailer,
    Direct,
    Distributor,
}

/// Product dimension row. Every field apart from the code is a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Product {
    pub product_code: String,
    #[serde(default)]
    pub division: String,
    #[serde(default)]
    pub segment: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub variant: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Customer {
    pub customer_code: String,
    #[schemars(description = "Display name of the customer (e.g. 'Croma', 'Amazon')")]
    pub customer: String,
    pub platform: Platform,
    pub channel: Channel,
    #[schemars(description = "The market (country-level region) this customer belongs to")]
    pub market: String,
    #[serde(default)]
    pub sub_zone: String,
    #[serde(default)]
    pub region: String,
}

/// Natural key of a monthly sales fact: one row per product, customer and month.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SaleKey {
    pub date: NaiveDate,
    pub customer_code: String,
    pub product_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SalesRecord {
    #[schemars(description = "First day of the month the sales belong to")]
    pub date: NaiveDate,
    pub product_code: String,
    pub customer_code: String,
    #[schemars(description = "Units sold in the month. Must be zero or positive.")]
    pub sold_quantity: i64,
}

impl SalesRecord {
    pub fn key(&self) -> SaleKey {
        SaleKey {
            date: self.date,
            customer_code: self.customer_code.clone(),
            product_code: self.product_code.clone(),
        }
    }
}

/// Annual gross unit price of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PriceRecord {
    pub product_code: String,
    pub fiscal_year: FiscalYear,
    #[serde(deserialize_with = "rust_decimal::serde::str::deserialize")]
    pub gross_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PreInvoiceDeduction {
    pub customer_code: String,
    pub fiscal_year: FiscalYear,
    #[schemars(description = "Fraction between 0 and 1 deducted before invoicing")]
    #[serde(deserialize_with = "rust_decimal::serde::str::deserialize")]
    pub pre_invoice_discount_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PostInvoiceDeduction {
    pub customer_code: String,
    pub product_code: String,
    pub date: NaiveDate,
    #[schemars(description = "Promotional rebate fraction between 0 and 1")]
    #[serde(deserialize_with = "rust_decimal::serde::str::deserialize")]
    pub discounts_pct: Decimal,
    #[schemars(description = "Other deductions fraction between 0 and 1")]
    #[serde(deserialize_with = "rust_decimal::serde::str::deserialize")]
    pub other_deductions_pct: Decimal,
}

fn default_fiscal_year_start_month() -> u32 {
    crate::fiscal::DEFAULT_FISCAL_YEAR_START_MONTH
}

fn default_market() -> String {
    "India".to_string()
}

fn default_gold_threshold() -> u64 {
    5_000_000
}

fn default_currency_scale() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NetSalesConfig {
    #[serde(default = "default_fiscal_year_start_month")]
    #[schemars(
        description = "The calendar month on which the fiscal year starts (1 = January, 9 = September). The fiscal year is labeled by the calendar year in which it ends."
    )]
    pub fiscal_year_start_month: u32,

    #[serde(default = "default_market")]
    #[schemars(description = "Market classified when a tiering request names no market")]
    pub default_market: String,

    #[serde(default = "default_gold_threshold")]
    #[schemars(
        description = "Annual sold quantity a market must strictly exceed to earn the Gold badge"
    )]
    pub gold_threshold: u64,

    #[serde(default = "default_currency_scale")]
    #[schemars(description = "Decimal places currency amounts are rounded to")]
    pub currency_scale: u32,
}

impl Default for NetSalesConfig {
    fn default() -> Self {
        Self {
            fiscal_year_start_month: default_fiscal_year_start_month(),
            default_market: default_market(),
            gold_threshold: default_gold_threshold(),
            currency_scale: default_currency_scale(),
        }
    }
}

impl NetSalesConfig {
    pub fn validate(&self) -> Result<()> {
        validate_fiscal_year_start_month(self.fiscal_year_start_month)?;

        if self.default_market.trim().is_empty() {
            return Err(NetSalesError::InvalidConfig(
                "default_market must not be empty".to_string(),
            ));
        }

        if self.currency_scale > 10 {
            return Err(NetSalesError::InvalidConfig(format!(
                "currency_scale {} is larger than 10",
                self.currency_scale
            )));
        }

        Ok(())
    }

    pub fn calendar(&self) -> Result<FiscalCalendar> {
        FiscalCalendar::new(self.fiscal_year_start_month)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(NetSalesConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
