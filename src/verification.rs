use crate::cascade::NetSalesRecord;
use crate::error::{NetSalesError, Result};
use crate::schema::{NetSalesConfig, SaleKey};
use log::warn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    NegativeNetSales,
    NetSalesAboveNetInvoice,
    NetInvoiceAboveGross,
    GrossScale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub sale: SaleKey,
    pub kind: ViolationKind,
    pub gross_price_total: Decimal,
    pub net_invoice_sales: Decimal,
    pub net_sales: Decimal,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::NegativeNetSales => write!(f, "net sales {} < 0", self.net_sales),
            ViolationKind::NetSalesAboveNetInvoice => write!(
                f,
                "net sales {} > net invoice sales {}",
                self.net_sales, self.net_invoice_sales
            ),
            ViolationKind::NetInvoiceAboveGross => write!(
                f,
                "net invoice sales {} > gross total {}",
                self.net_invoice_sales, self.gross_price_total
            ),
            ViolationKind::GrossScale => write!(
                f,
                "gross total {} has scale {}",
                self.gross_price_total,
                self.gross_price_total.scale()
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub checked: usize,
    pub violations: Vec<InvariantViolation>,
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Checks `0 <= net_sales <= net_invoice_sales <= gross_price_total` on
/// computed records. Values are reported as found, never adjusted.
pub struct CascadeVerifier {
    currency_scale: u32,
}

impl CascadeVerifier {
    pub fn new(config: &NetSalesConfig) -> Self {
        Self {
            currency_scale: config.currency_scale,
        }
    }

    pub fn check(&self, record: &NetSalesRecord) -> Vec<InvariantViolation> {
        let gross = record.enriched.gross_price_total;
        let mut kinds = Vec::new();

        if record.net_sales < Decimal::ZERO {
            kinds.push(ViolationKind::NegativeNetSales);
        }
        if record.net_sales > record.net_invoice_sales {
            kinds.push(ViolationKind::NetSalesAboveNetInvoice);
        }
        if record.net_invoice_sales > gross {
            kinds.push(ViolationKind::NetInvoiceAboveGross);
        }
        if gross.scale() != self.currency_scale {
            kinds.push(ViolationKind::GrossScale);
        }

        kinds
            .into_iter()
            .map(|kind| InvariantViolation {
                sale: record.key(),
                kind,
                gross_price_total: gross,
                net_invoice_sales: record.net_invoice_sales,
                net_sales: record.net_sales,
            })
            .collect()
    }

    pub fn verify(&self, records: &[NetSalesRecord]) -> VerificationResult {
        let mut result = VerificationResult {
            checked: records.len(),
            violations: Vec::new(),
        };

        for record in records {
            for violation in self.check(record) {
                warn!(
                    "Cascade invariant violated for {} / {} on {}: {}",
                    violation.sale.customer_code,
                    violation.sale.product_code,
                    violation.sale.date,
                    violation
                );
                result.violations.push(violation);
            }
        }

        result
    }

    pub fn verify_strict(&self, records: &[NetSalesRecord]) -> Result<()> {
        match self.verify(records).violations.into_iter().next() {
            None => Ok(()),
            Some(violation) => Err(NetSalesError::CascadeInvariantViolation {
                customer_code: violation.sale.customer_code.clone(),
                product_code: violation.sale.product_code.clone(),
                date: violation.sale.date,
                detail: violation.to_string(),
            }),
        }
    }
}

pub fn verify_cascade(config: &NetSalesConfig, records: &[NetSalesRecord]) -> VerificationResult {
    CascadeVerifier::new(config).verify(records)
}
