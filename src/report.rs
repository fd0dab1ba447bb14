use crate::cascade::NetSalesRecord;
use crate::error::{DataIntegrityError, MissingReference};
use crate::fiscal::FiscalYear;
use crate::schema::SaleKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a sale produced no net sales record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "details", rename_all = "snake_case")]
pub enum SkipReason {
    MissingReference(MissingReference),
    DataIntegrity(DataIntegrityError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingReference(missing) => write!(f, "excluded: {}", missing),
            SkipReason::DataIntegrity(err) => write!(f, "integrity failure: {}", err),
        }
    }
}

impl From<MissingReference> for SkipReason {
    fn from(missing: MissingReference) -> Self {
        SkipReason::MissingReference(missing)
    }
}

impl From<DataIntegrityError> for SkipReason {
    fn from(err: DataIntegrityError) -> Self {
        SkipReason::DataIntegrity(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub sale: SaleKey,
    pub fiscal_year: FiscalYear,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub input_records: usize,
    pub net_sales_records: usize,
    pub missing_price: usize,
    pub missing_pre_invoice_rate: usize,
    pub integrity_failures: usize,
    /// Records kept with `net_sales = net_invoice_sales`.
    pub missing_post_invoice_deductions: usize,
}

impl ReportSummary {
    pub fn tally(
        input_records: usize,
        records: &[NetSalesRecord],
        skipped: &[SkippedRecord],
    ) -> Self {
        let mut summary = Self {
            input_records,
            net_sales_records: records.len(),
            missing_post_invoice_deductions: records.iter().filter(|r| r.deduction_missing).count(),
            ..Self::default()
        };

        for entry in skipped {
            match &entry.reason {
                SkipReason::MissingReference(MissingReference::Price { .. }) => {
                    summary.missing_price += 1
                }
                SkipReason::MissingReference(MissingReference::PreInvoiceRate { .. }) => {
                    summary.missing_pre_invoice_rate += 1
                }
                SkipReason::DataIntegrity(_) => summary.integrity_failures += 1,
            }
        }

        summary
    }

    pub fn skipped(&self) -> usize {
        self.missing_price + self.missing_pre_invoice_rate + self.integrity_failures
    }
}

/// Output of a batch run: what was computed and what was not, and why.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetSalesReport {
    pub records: Vec<NetSalesRecord>,
    pub skipped: Vec<SkippedRecord>,
    pub summary: ReportSummary,
}

impl NetSalesReport {
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
