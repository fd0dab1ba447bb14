use crate::fiscal::FiscalYear;
use crate::schema::SaleKey;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetSalesError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid fiscal year start month {0}: must be between 1 and 12")]
    InvalidFiscalYearStartMonth(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityError),

    #[error(
        "Cascade invariant violated for customer {customer_code}, product {product_code} on {date}: {detail}"
    )]
    CascadeInvariantViolation {
        customer_code: String,
        product_code: String,
        date: NaiveDate,
        detail: String,
    },

    #[error("Computation cancelled between partitions")]
    Cancelled,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A join that must match exactly one row matched several, or a sale's
/// amounts do not fit in a decimal.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataIntegrityError {
    #[error("{matches} gross prices found for product {product_code} in {fiscal_year}")]
    DuplicatePrice {
        product_code: String,
        fiscal_year: FiscalYear,
        matches: usize,
    },

    #[error("{matches} pre-invoice rates found for customer {customer_code} in {fiscal_year}")]
    DuplicatePreInvoiceRate {
        customer_code: String,
        fiscal_year: FiscalYear,
        matches: usize,
    },

    #[error(
        "{matches} post-invoice deductions found for customer {customer_code}, product {product_code} on {date}"
    )]
    DuplicatePostInvoiceDeduction {
        customer_code: String,
        product_code: String,
        date: NaiveDate,
        matches: usize,
    },

    #[error("{stage} overflowed for customer {customer_code}, product {product_code} on {date}")]
    AmountOverflow {
        customer_code: String,
        product_code: String,
        date: NaiveDate,
        stage: String,
    },
}

impl DataIntegrityError {
    pub(crate) fn amount_overflow(key: &SaleKey, stage: &str) -> Self {
        DataIntegrityError::AmountOverflow {
            customer_code: key.customer_code.clone(),
            product_code: key.product_code.clone(),
            date: key.date,
            stage: stage.to_string(),
        }
    }
}

/// A required reference row is absent; the sale is excluded, not failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingReference {
    Price {
        product_code: String,
        fiscal_year: FiscalYear,
    },
    PreInvoiceRate {
        customer_code: String,
        fiscal_year: FiscalYear,
    },
}

impl std::fmt::Display for MissingReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingReference::Price {
                product_code,
                fiscal_year,
            } => write!(f, "no gross price for product {product_code} in {fiscal_year}"),
            MissingReference::PreInvoiceRate {
                customer_code,
                fiscal_year,
            } => write!(
                f,
                "no pre-invoice rate for customer {customer_code} in {fiscal_year}"
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetSalesError>;
